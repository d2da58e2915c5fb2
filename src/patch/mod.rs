//! SCIM PATCH (RFC 7644 §3.5.2).
//!
//! A [`PatchRequest`] is parsed from the `PatchOp` message body and applied
//! with a [`PatchContext`]. Application is all-or-nothing: operations run in
//! order against a working copy and the first failure discards it.

pub mod apply;
pub mod path;

pub use apply::PatchContext;
pub use path::PatchPath;

use crate::error::{ValidationError, ValidationResult};
use crate::schema::value::json_type_name;

use serde_json::Value;
use std::fmt;

/// Message schema URN of a PATCH request body.
pub const PATCH_OP_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOpKind {
    Add,
    Remove,
    Replace,
}

impl PatchOpKind {
    /// Operation names are matched case-insensitively.
    pub fn parse(op: &str) -> Option<Self> {
        match op.to_ascii_lowercase().as_str() {
            "add" => Some(Self::Add),
            "remove" => Some(Self::Remove),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Replace => "replace",
        }
    }
}

impl fmt::Display for PatchOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchOperation {
    pub op: PatchOpKind,
    pub path: Option<PatchPath>,
    pub value: Option<Value>,
}

impl PatchOperation {
    pub fn add(path: Option<&str>, value: Value) -> ValidationResult<Self> {
        Self::new(PatchOpKind::Add, path, Some(value))
    }

    pub fn replace(path: Option<&str>, value: Value) -> ValidationResult<Self> {
        Self::new(PatchOpKind::Replace, path, Some(value))
    }

    pub fn remove(path: &str) -> ValidationResult<Self> {
        Self::new(PatchOpKind::Remove, Some(path), None)
    }

    /// Build and check one operation.
    ///
    /// `add` and `replace` need a non-null value; `remove` needs a path.
    pub fn new(op: PatchOpKind, path: Option<&str>, value: Option<Value>) -> ValidationResult<Self> {
        let path = path.map(PatchPath::parse).transpose()?;
        let value = value.filter(|v| !v.is_null());
        match op {
            PatchOpKind::Remove if path.is_none() => {
                return Err(ValidationError::NoTarget {
                    path: String::new(),
                });
            }
            PatchOpKind::Add | PatchOpKind::Replace if value.is_none() => {
                return Err(ValidationError::custom(format!(
                    "'{}' operation requires a value",
                    op
                )));
            }
            _ => {}
        }
        Ok(Self { op, path, value })
    }

    fn from_json(index: usize, raw: &Value) -> ValidationResult<Self> {
        let object = raw.as_object().ok_or_else(|| {
            ValidationError::invalid_type(
                format!("Operations[{}]", index),
                "complex",
                json_type_name(raw),
            )
        })?;
        let field = |name: &str| {
            object
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        };

        let op_text = field("op").and_then(Value::as_str).ok_or_else(|| {
            ValidationError::custom(format!("Operations[{}] is missing 'op'", index))
        })?;
        let op = PatchOpKind::parse(op_text).ok_or_else(|| {
            ValidationError::custom(format!("unsupported patch operation '{}'", op_text))
        })?;

        let path = match field("path") {
            None | Some(Value::Null) => None,
            Some(Value::String(p)) => Some(p.as_str()),
            Some(other) => {
                return Err(ValidationError::invalid_type(
                    "path",
                    "string",
                    json_type_name(other),
                ));
            }
        };

        Self::new(op, path, field("value").cloned())
    }
}

/// A parsed `PatchOp` request body.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRequest {
    pub operations: Vec<PatchOperation>,
}

impl PatchRequest {
    pub fn new(operations: Vec<PatchOperation>) -> ValidationResult<Self> {
        if operations.is_empty() {
            return Err(ValidationError::custom(
                "patch request must contain at least one operation",
            ));
        }
        Ok(Self { operations })
    }

    /// Parse `{"schemas": [...], "Operations": [...]}`.
    ///
    /// `schemas` may be omitted; when present it must name the PatchOp
    /// message schema.
    pub fn from_json(body: &Value) -> ValidationResult<Self> {
        let object = body.as_object().ok_or_else(|| {
            ValidationError::invalid_type("PatchOp", "complex", json_type_name(body))
        })?;

        if let Some(schemas) = object.get("schemas").and_then(Value::as_array) {
            let declared = schemas
                .iter()
                .filter_map(Value::as_str)
                .any(|s| s.eq_ignore_ascii_case(PATCH_OP_SCHEMA));
            if !schemas.is_empty() && !declared {
                return Err(ValidationError::custom(format!(
                    "patch request schemas must include '{}'",
                    PATCH_OP_SCHEMA
                )));
            }
        }

        let raw_ops = object
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Operations"))
            .and_then(|(_, v)| v.as_array())
            .ok_or_else(|| ValidationError::custom("patch request requires an 'Operations' array"))?;

        let operations = raw_ops
            .iter()
            .enumerate()
            .map(|(i, raw)| PatchOperation::from_json(i, raw))
            .collect::<ValidationResult<Vec<_>>>()?;
        Self::new(operations)
    }
}
