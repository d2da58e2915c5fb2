//! Typed attribute values and the per-type capability table.
//!
//! Filter evaluation, uniqueness checks and body validation all go through
//! the same three operations: [`coerce`] a stored JSON value into a
//! [`TypedValue`], [`coerce_literal`] a filter literal into the attribute's
//! type, and [`compare`] two typed values.

use super::types::{AttributeDefinition, AttributeType};
use crate::error::{ValidationError, ValidationResult};

use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A scalar value tagged with its SCIM type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Null,
    Text(String),
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    DateTime(DateTime<FixedOffset>),
}

impl TypedValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            TypedValue::Null => "null",
            TypedValue::Text(_) => "string",
            TypedValue::Boolean(_) => "boolean",
            TypedValue::Integer(_) => "integer",
            TypedValue::Decimal(_) => "decimal",
            TypedValue::DateTime(_) => "dateTime",
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Integer(i) => Some(*i as f64),
            TypedValue::Decimal(d) => Some(*d),
            _ => None,
        }
    }
}

impl std::fmt::Display for TypedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypedValue::Null => write!(f, "null"),
            TypedValue::Text(s) => write!(f, "\"{}\"", s),
            TypedValue::Boolean(b) => write!(f, "{}", b),
            TypedValue::Integer(i) => write!(f, "{}", i),
            TypedValue::Decimal(d) => write!(f, "{}", d),
            TypedValue::DateTime(dt) => write!(f, "\"{}\"", dt.to_rfc3339()),
        }
    }
}

/// Coerce a stored JSON scalar into the attribute's type.
///
/// Returns `None` for complex types and for values of the wrong shape.
pub fn coerce(data_type: AttributeType, value: &Value) -> Option<TypedValue> {
    match (data_type, value) {
        (_, Value::Null) => Some(TypedValue::Null),
        (AttributeType::String | AttributeType::Reference | AttributeType::Binary, Value::String(s)) => {
            Some(TypedValue::Text(s.clone()))
        }
        (AttributeType::Boolean, Value::Bool(b)) => Some(TypedValue::Boolean(*b)),
        (AttributeType::Integer, Value::Number(n)) => n.as_i64().map(TypedValue::Integer),
        (AttributeType::Decimal, Value::Number(n)) => n.as_f64().map(TypedValue::Decimal),
        (AttributeType::DateTime, Value::String(s)) => parse_datetime(s).map(TypedValue::DateTime),
        _ => None,
    }
}

/// Convert a lexically typed filter literal into the attribute's type.
///
/// A quoted literal compared against a datetime attribute must be RFC 3339;
/// a numeric attribute needs a numeric literal. `null` is accepted for any
/// type and means absence.
pub fn coerce_literal(
    definition: &AttributeDefinition,
    literal: &TypedValue,
) -> ValidationResult<TypedValue> {
    let malformed = || ValidationError::MalformedLiteral {
        attribute: definition.name.clone(),
        expected: definition.data_type.as_str().to_string(),
        literal: literal.to_string(),
    };

    match (definition.data_type, literal) {
        (_, TypedValue::Null) => Ok(TypedValue::Null),
        (t, TypedValue::Text(s)) if t.is_textual() => Ok(TypedValue::Text(s.clone())),
        (AttributeType::DateTime, TypedValue::Text(s)) => parse_datetime(s)
            .map(TypedValue::DateTime)
            .ok_or_else(malformed),
        (AttributeType::Boolean, TypedValue::Boolean(b)) => Ok(TypedValue::Boolean(*b)),
        (AttributeType::Integer, TypedValue::Integer(i)) => Ok(TypedValue::Integer(*i)),
        (AttributeType::Integer, TypedValue::Decimal(d)) => Ok(TypedValue::Decimal(*d)),
        (AttributeType::Decimal, TypedValue::Integer(i)) => Ok(TypedValue::Decimal(*i as f64)),
        (AttributeType::Decimal, TypedValue::Decimal(d)) => Ok(TypedValue::Decimal(*d)),
        _ => Err(malformed()),
    }
}

/// Type-aware ordering.
///
/// Text orders case-insensitively, numbers numerically across integer and
/// decimal, datetimes chronologically. Mismatched types are unordered.
pub fn compare(left: &TypedValue, right: &TypedValue) -> Option<Ordering> {
    match (left, right) {
        (TypedValue::Text(a), TypedValue::Text(b)) => {
            Some(a.to_lowercase().cmp(&b.to_lowercase()))
        }
        (TypedValue::Boolean(a), TypedValue::Boolean(b)) => Some(a.cmp(b)),
        (TypedValue::Integer(a), TypedValue::Integer(b)) => Some(a.cmp(b)),
        (TypedValue::DateTime(a), TypedValue::DateTime(b)) => Some(a.cmp(b)),
        (TypedValue::Null, TypedValue::Null) => Some(Ordering::Equal),
        (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

/// RFC 3339 parse, the lexical form SCIM uses for dateTime.
pub fn parse_datetime(value: &str) -> Option<DateTime<FixedOffset>> {
    if value.is_empty() {
        return None;
    }
    DateTime::<FixedOffset>::parse_from_rfc3339(value).ok()
}

/// Get the type name of a JSON value for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() => "integer",
        Value::Number(_) => "decimal",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Whether a JSON value counts as present for `pr` and required checks.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => items.iter().any(is_present),
        Value::Object(map) => map.values().any(is_present),
        _ => true,
    }
}

/// Read a top-level attribute from a canonical attribute map.
///
/// Extension attributes live inside a container keyed by the extension URN.
pub fn get_attribute<'v>(
    attributes: &'v Map<String, Value>,
    extension: Option<&str>,
    name: &str,
) -> Option<&'v Value> {
    match extension {
        Some(urn) => attributes.get(urn)?.as_object()?.get(name),
        None => attributes.get(name),
    }
}

/// Write or clear a top-level attribute, dropping extension containers that
/// become empty.
pub fn set_attribute(
    attributes: &mut Map<String, Value>,
    extension: Option<&str>,
    name: &str,
    value: Option<Value>,
) {
    let Some(urn) = extension else {
        match value {
            Some(v) => attributes.insert(name.to_string(), v),
            None => attributes.remove(name),
        };
        return;
    };

    let container = attributes
        .entry(urn.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(map) = container {
        match value {
            Some(v) => map.insert(name.to_string(), v),
            None => map.remove(name),
        };
        if map.is_empty() {
            attributes.remove(urn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(data_type: AttributeType) -> AttributeDefinition {
        AttributeDefinition {
            name: "attr".into(),
            data_type,
            ..Default::default()
        }
    }

    #[test]
    fn test_text_compare_ignores_case() {
        let a = TypedValue::Text("Snowden".into());
        let b = TypedValue::Text("snowden".into());
        assert_eq!(compare(&a, &b), Some(Ordering::Equal));
    }

    #[test]
    fn test_numeric_compare_across_integer_and_decimal() {
        assert_eq!(
            compare(&TypedValue::Integer(2), &TypedValue::Decimal(1.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            compare(&TypedValue::Text("2".into()), &TypedValue::Integer(2)),
            None
        );
    }

    #[test]
    fn test_datetime_compares_as_instant() {
        let a = coerce(AttributeType::DateTime, &json!("2024-01-01T10:00:00+02:00")).unwrap();
        let b = coerce(AttributeType::DateTime, &json!("2024-01-01T09:00:00Z")).unwrap();
        assert_eq!(compare(&a, &b), Some(Ordering::Less));
    }

    #[test]
    fn test_coerce_literal_rejects_malformed_datetime() {
        let result = coerce_literal(
            &def(AttributeType::DateTime),
            &TypedValue::Text("2024-13-45".into()),
        );
        assert!(matches!(result, Err(ValidationError::MalformedLiteral { .. })));
    }

    #[test]
    fn test_coerce_literal_rejects_text_for_integer() {
        let result = coerce_literal(&def(AttributeType::Integer), &TypedValue::Text("7".into()));
        assert!(result.is_err());
        assert_eq!(
            coerce_literal(&def(AttributeType::Decimal), &TypedValue::Integer(7)).unwrap(),
            TypedValue::Decimal(7.0)
        );
    }

    #[test]
    fn test_extension_container_layout() {
        let urn = "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User";
        let mut attrs = Map::new();
        set_attribute(&mut attrs, Some(urn), "department", Some(json!("R&D")));
        assert_eq!(get_attribute(&attrs, Some(urn), "department"), Some(&json!("R&D")));

        set_attribute(&mut attrs, Some(urn), "department", None);
        assert!(attrs.is_empty());
    }

    #[test]
    fn test_presence() {
        assert!(!is_present(&json!("")));
        assert!(!is_present(&json!([])));
        assert!(!is_present(&json!({"value": null})));
        assert!(is_present(&json!(false)));
        assert!(is_present(&json!([{"value": "x"}])));
    }
}
