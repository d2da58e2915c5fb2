//! Filter expression tree.

use crate::schema::{AttributePath, TypedValue};

use std::fmt;

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    /// `attrPath op literal`
    Compare {
        path: AttributePath,
        op: CompareOp,
        value: TypedValue,
    },
    /// `attrPath pr`
    Present { path: AttributePath },
    And(Box<FilterNode>, Box<FilterNode>),
    Or(Box<FilterNode>, Box<FilterNode>),
    Not(Box<FilterNode>),
    /// `attr[filter]`: at least one element of `attr` satisfies `filter`,
    /// whose paths are relative to the element.
    ValuePath {
        path: AttributePath,
        filter: Box<FilterNode>,
    },
}

impl FilterNode {
    pub fn compare(path: &str, op: CompareOp, value: TypedValue) -> Option<Self> {
        Some(FilterNode::Compare {
            path: AttributePath::parse(path)?,
            op,
            value,
        })
    }

    pub fn and(self, other: FilterNode) -> Self {
        FilterNode::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: FilterNode) -> Self {
        FilterNode::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        FilterNode::Not(Box::new(self))
    }
}

impl fmt::Display for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterNode::Compare { path, op, value } => write!(f, "{} {} {}", path, op, value),
            FilterNode::Present { path } => write!(f, "{} pr", path),
            FilterNode::And(left, right) => write!(f, "({} and {})", left, right),
            FilterNode::Or(left, right) => write!(f, "({} or {})", left, right),
            FilterNode::Not(inner) => write!(f, "not ({})", inner),
            FilterNode::ValuePath { path, filter } => write!(f, "{}[{}]", path, filter),
        }
    }
}

/// Comparison operators per RFC 7644.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    /// Contains
    Co,
    /// Starts with
    Sw,
    /// Ends with
    Ew,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "eq" => Some(CompareOp::Eq),
            "ne" => Some(CompareOp::Ne),
            "co" => Some(CompareOp::Co),
            "sw" => Some(CompareOp::Sw),
            "ew" => Some(CompareOp::Ew),
            "gt" => Some(CompareOp::Gt),
            "ge" => Some(CompareOp::Ge),
            "lt" => Some(CompareOp::Lt),
            "le" => Some(CompareOp::Le),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Co => "co",
            CompareOp::Sw => "sw",
            CompareOp::Ew => "ew",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
        }
    }

    /// `co`, `sw`, `ew`
    pub fn is_substring(self) -> bool {
        matches!(self, CompareOp::Co | CompareOp::Sw | CompareOp::Ew)
    }

    /// `gt`, `ge`, `lt`, `le`
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            CompareOp::Gt | CompareOp::Ge | CompareOp::Lt | CompareOp::Le
        )
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
