//! PATCH path expressions.
//!
//! ```text
//! path      = attrPath / valuePath
//! attrPath  = [URN ":"] ATTRNAME ["." SUBATTR]
//! valuePath = [URN ":"] ATTRNAME "[" valFilter "]" ["." SUBATTR]
//! ```
//!
//! The bracketed filter is parsed in selector mode: its attribute names are
//! relative to one element of the multi-valued attribute, and dotted names
//! inside the brackets are rejected as ambiguous.

use crate::error::{ValidationError, ValidationResult};
use crate::filter::{FilterNode, parse_selector};
use crate::schema::AttributePath;

use std::fmt;

/// A parsed PATCH path.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchPath {
    /// Attribute (and optional sub-attribute) the operation targets
    pub target: AttributePath,
    /// Element selector for multi-valued attributes
    pub selector: Option<FilterNode>,
    raw: String,
}

impl PatchPath {
    pub fn parse(input: &str) -> ValidationResult<Self> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(ValidationError::invalid_path(raw, "empty path"));
        }
        let invalid = |message: &str| ValidationError::invalid_path(raw, message);

        let Some(open) = raw.find('[') else {
            let target = AttributePath::parse(raw).ok_or_else(|| invalid("malformed attribute path"))?;
            return Ok(Self {
                target,
                selector: None,
                raw: raw.to_string(),
            });
        };

        let close = raw
            .rfind(']')
            .filter(|close| *close > open)
            .ok_or_else(|| invalid("unclosed '['"))?;

        let mut target = AttributePath::parse(&raw[..open])
            .filter(|path| path.sub.is_none())
            .ok_or_else(|| invalid("malformed attribute before '['"))?;

        let selector = parse_selector(&raw[open + 1..close]).map_err(|e| match e {
            ValidationError::AmbiguousFilter { .. } => ValidationError::AmbiguousFilter {
                path: raw.to_string(),
            },
            other => ValidationError::invalid_path(raw, other.to_string()),
        })?;

        let rest = &raw[close + 1..];
        if !rest.is_empty() {
            let sub = rest
                .strip_prefix('.')
                .filter(|sub| !sub.is_empty() && !sub.contains('.'))
                .ok_or_else(|| invalid("unexpected characters after ']'"))?;
            target.sub = Some(sub.to_string());
        }

        Ok(Self {
            target,
            selector: Some(selector),
            raw: raw.to_string(),
        })
    }

    /// A plain attribute path with no selector.
    pub fn attribute(target: AttributePath) -> Self {
        Self {
            raw: target.to_string(),
            target,
            selector: None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for PatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
