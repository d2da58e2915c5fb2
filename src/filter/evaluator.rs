//! Filter evaluation and binding against a resource type.
//!
//! Evaluation never fails: anything that does not resolve (unknown attribute,
//! wrong value shape, incomparable literal) is a definite `false` for that
//! comparison. [`bind`] runs the checks that must surface as client errors
//! before any resource is looked at.

use super::ast::{CompareOp, FilterNode};
use crate::error::{ValidationError, ValidationResult};
use crate::schema::value::{coerce, coerce_literal, compare, get_attribute, is_present};
use crate::schema::{
    AttributeDefinition, AttributePath, AttributeType, ResourceType, SchemaRegistry, TypedValue,
};

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Schema context a filter is evaluated in.
#[derive(Debug, Clone, Copy)]
pub struct FilterScope<'a> {
    pub registry: &'a SchemaRegistry,
    pub resource_type: &'a ResourceType,
}

impl<'a> FilterScope<'a> {
    pub fn new(registry: &'a SchemaRegistry, resource_type: &'a ResourceType) -> Self {
        Self {
            registry,
            resource_type,
        }
    }

    /// Evaluate against a resource representation.
    pub fn matches(&self, node: &FilterNode, resource: &Map<String, Value>) -> bool {
        match node {
            FilterNode::And(left, right) => {
                self.matches(left, resource) && self.matches(right, resource)
            }
            FilterNode::Or(left, right) => {
                self.matches(left, resource) || self.matches(right, resource)
            }
            FilterNode::Not(inner) => !self.matches(inner, resource),
            FilterNode::Compare { path, op, value } => {
                let Some((def, values)) = self.collect(path, resource) else {
                    return false;
                };
                compare_any(def, &values, *op, value)
            }
            FilterNode::Present { path } => self.present(path, resource),
            FilterNode::ValuePath { path, filter } => {
                let Some(resolved) = self.registry.resolve(self.resource_type, path) else {
                    return false;
                };
                let Some(value) =
                    get_attribute(resource, resolved.extension, &resolved.attribute.name)
                else {
                    return false;
                };
                elements(value)
                    .into_iter()
                    .any(|element| matches_element(filter, resolved.attribute, element))
            }
        }
    }

    /// A bare attribute is present when it holds anything at all; complex
    /// attributes are not routed through `value` here.
    fn present(&self, path: &AttributePath, resource: &Map<String, Value>) -> bool {
        let Some(resolved) = self.registry.resolve(self.resource_type, path) else {
            return false;
        };
        if resolved.sub_attribute.is_some() {
            return self
                .collect(path, resource)
                .is_some_and(|(_, values)| values.into_iter().any(is_present));
        }
        get_attribute(resource, resolved.extension, &resolved.attribute.name)
            .is_some_and(is_present)
    }

    /// Resolve `path` and gather every value it reaches, flattening
    /// multi-valued attributes.
    fn collect<'r>(
        &self,
        path: &AttributePath,
        resource: &'r Map<String, Value>,
    ) -> Option<(&'a AttributeDefinition, Vec<&'r Value>)> {
        let resolved = self.registry.resolve(self.resource_type, path)?;
        let attribute = resolved.attribute;
        let top = get_attribute(resource, resolved.extension, &attribute.name);

        // A bare complex attribute compares through its `value` sub-attribute.
        let sub = match resolved.sub_attribute {
            Some(sub) => Some(sub),
            None if attribute.is_complex() => Some(attribute.sub_attribute("value")?),
            None => None,
        };

        let Some(top) = top else {
            return Some((sub.unwrap_or(attribute), Vec::new()));
        };
        let values = match sub {
            None => elements(top),
            Some(sub) => elements(top)
                .into_iter()
                .filter_map(|element| element.get(&sub.name))
                .flat_map(elements)
                .collect(),
        };
        Some((sub.unwrap_or(attribute), values))
    }
}

/// Evaluate an element-relative filter against one element of `parent`.
pub fn matches_element(node: &FilterNode, parent: &AttributeDefinition, element: &Value) -> bool {
    match node {
        FilterNode::And(left, right) => {
            matches_element(left, parent, element) && matches_element(right, parent, element)
        }
        FilterNode::Or(left, right) => {
            matches_element(left, parent, element) || matches_element(right, parent, element)
        }
        FilterNode::Not(inner) => !matches_element(inner, parent, element),
        FilterNode::Compare { path, op, value } => match element_values(path, parent, element) {
            Some((def, values)) => compare_any(def, &values, *op, value),
            None => false,
        },
        FilterNode::Present { path } => element_values(path, parent, element)
            .is_some_and(|(_, values)| values.into_iter().any(is_present)),
        FilterNode::ValuePath { .. } => false,
    }
}

fn element_values<'p, 'e>(
    path: &AttributePath,
    parent: &'p AttributeDefinition,
    element: &'e Value,
) -> Option<(&'p AttributeDefinition, Vec<&'e Value>)> {
    if path.schema.is_some() || path.sub.is_some() {
        return None;
    }
    // Simple multi-valued attributes are filtered through `value`.
    if !parent.is_complex() {
        return path
            .name
            .eq_ignore_ascii_case("value")
            .then(|| (parent, vec![element]));
    }
    let def = parent.sub_attribute(&path.name)?;
    let values = element.get(&def.name).map(elements).unwrap_or_default();
    Some((def, values))
}

fn elements(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

/// Multi-valued semantics: a comparison holds if any value satisfies it,
/// except `ne`, which holds when values exist and none equals the literal.
fn compare_any(def: &AttributeDefinition, values: &[&Value], op: CompareOp, literal: &TypedValue) -> bool {
    let Ok(literal) = coerce_literal(def, literal) else {
        return false;
    };

    if literal == TypedValue::Null {
        let present = values.iter().any(|v| is_present(v));
        return match op {
            CompareOp::Eq => !present,
            CompareOp::Ne => present,
            _ => false,
        };
    }

    let typed: Vec<TypedValue> = values
        .iter()
        .filter_map(|v| coerce(def.data_type, v))
        .filter(|v| *v != TypedValue::Null)
        .collect();

    match op {
        CompareOp::Ne => {
            !typed.is_empty()
                && !typed
                    .iter()
                    .any(|v| compare(v, &literal) == Some(Ordering::Equal))
        }
        _ => typed.iter().any(|v| apply(op, v, &literal)),
    }
}

fn apply(op: CompareOp, value: &TypedValue, literal: &TypedValue) -> bool {
    if op.is_substring() {
        let (TypedValue::Text(value), TypedValue::Text(literal)) = (value, literal) else {
            return false;
        };
        let (value, literal) = (value.to_lowercase(), literal.to_lowercase());
        return match op {
            CompareOp::Co => value.contains(&literal),
            CompareOp::Sw => value.starts_with(&literal),
            _ => value.ends_with(&literal),
        };
    }

    let Some(ordering) = compare(value, literal) else {
        return false;
    };
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Co | CompareOp::Sw | CompareOp::Ew => false,
    }
}

/// Check literals and operators against the attribute types they meet.
///
/// Unknown attributes pass; they evaluate to false later.
pub fn bind(node: &FilterNode, scope: &FilterScope<'_>) -> ValidationResult<()> {
    match node {
        FilterNode::And(left, right) | FilterNode::Or(left, right) => {
            bind(left, scope)?;
            bind(right, scope)
        }
        FilterNode::Not(inner) => bind(inner, scope),
        FilterNode::Present { .. } => Ok(()),
        FilterNode::Compare { path, op, value } => {
            match scope.registry.resolve(scope.resource_type, path) {
                Some(resolved) => {
                    let target = match resolved.sub_attribute {
                        Some(sub) => sub,
                        None if resolved.attribute.is_complex() => {
                            match resolved.attribute.sub_attribute("value") {
                                Some(sub) => sub,
                                None => return Ok(()),
                            }
                        }
                        None => resolved.attribute,
                    };
                    check_comparison(target, *op, value)
                }
                None => Ok(()),
            }
        }
        FilterNode::ValuePath { path, filter } => {
            match scope.registry.resolve(scope.resource_type, path) {
                Some(resolved) => bind_element(filter, resolved.attribute),
                None => Ok(()),
            }
        }
    }
}

/// [`bind`] for an element-relative filter.
pub fn bind_element(node: &FilterNode, parent: &AttributeDefinition) -> ValidationResult<()> {
    match node {
        FilterNode::And(left, right) | FilterNode::Or(left, right) => {
            bind_element(left, parent)?;
            bind_element(right, parent)
        }
        FilterNode::Not(inner) => bind_element(inner, parent),
        FilterNode::Compare { path, op, value } if path.schema.is_none() && path.sub.is_none() => {
            let target = if parent.is_complex() {
                parent.sub_attribute(&path.name)
            } else {
                Some(parent)
            };
            match target {
                Some(def) => check_comparison(def, *op, value),
                None => Ok(()),
            }
        }
        _ => Ok(()),
    }
}

fn check_comparison(
    def: &AttributeDefinition,
    op: CompareOp,
    literal: &TypedValue,
) -> ValidationResult<()> {
    let unsupported = || ValidationError::UnsupportedOperator {
        attribute: def.name.clone(),
        attribute_type: def.data_type.as_str().to_string(),
        operator: op.as_str().to_string(),
    };

    if *literal == TypedValue::Null {
        return match op {
            CompareOp::Eq | CompareOp::Ne => Ok(()),
            _ => Err(unsupported()),
        };
    }
    if op.is_substring() && !def.data_type.is_textual() {
        return Err(unsupported());
    }
    if op.is_ordering() && matches!(def.data_type, AttributeType::Boolean | AttributeType::Binary)
    {
        return Err(unsupported());
    }
    coerce_literal(def, literal).map(|_| ())
}
