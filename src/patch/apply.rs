//! PATCH operation application.
//!
//! Operations are applied in order to a working copy of a canonical attribute
//! map. Each operation reports whether it changed anything so that the caller
//! can skip the version bump for no-op requests such as re-adding an existing
//! group member.

use super::path::PatchPath;
use super::{PatchOpKind, PatchOperation};
use crate::error::{ValidationError, ValidationResult};
use crate::filter::{bind_element, matches_element};
use crate::schema::validation::{
    SERVER_MANAGED_KEYS, check_single_primary, normalize_element, normalize_value,
};
use crate::schema::value::{get_attribute, json_type_name, set_attribute};
use crate::schema::{
    AttributeDefinition, AttributePath, ResourceType, Schema, SchemaRegistry,
    UnknownAttributePolicy, is_urn,
};

use log::{debug, warn};
use serde_json::{Map, Value};

/// Schema context for applying patch operations to one resource kind.
#[derive(Debug, Clone, Copy)]
pub struct PatchContext<'a> {
    pub registry: &'a SchemaRegistry,
    pub resource_type: &'a ResourceType,
    pub policy: UnknownAttributePolicy,
}

impl<'a> PatchContext<'a> {
    pub fn new(
        registry: &'a SchemaRegistry,
        resource_type: &'a ResourceType,
        policy: UnknownAttributePolicy,
    ) -> Self {
        Self {
            registry,
            resource_type,
            policy,
        }
    }

    /// Apply every operation, in order, to a copy of `attributes`.
    ///
    /// Nothing is returned on error, so a failing operation never leaves a
    /// partial result behind.
    pub fn apply_all(
        &self,
        attributes: &Map<String, Value>,
        operations: &[PatchOperation],
    ) -> ValidationResult<(Map<String, Value>, bool)> {
        let mut working = attributes.clone();
        for operation in operations {
            self.apply(&mut working, operation)?;
        }
        let changed = working != *attributes;
        Ok((working, changed))
    }

    /// Apply one operation; returns whether the attribute map changed.
    pub fn apply(
        &self,
        attributes: &mut Map<String, Value>,
        operation: &PatchOperation,
    ) -> ValidationResult<bool> {
        let before = attributes.clone();
        let value = operation.value.as_ref();
        match &operation.path {
            None => self.apply_root(attributes, operation.op, value)?,
            Some(path) => self.apply_path(attributes, operation.op, path, value)?,
        }
        Ok(*attributes != before)
    }

    /// No path: the value is an object whose keys are individual targets.
    fn apply_root(
        &self,
        attributes: &mut Map<String, Value>,
        op: PatchOpKind,
        value: Option<&Value>,
    ) -> ValidationResult<()> {
        if op == PatchOpKind::Remove {
            return Err(ValidationError::NoTarget {
                path: String::new(),
            });
        }
        let object = require_object("value", value)?;

        for (key, value) in object {
            if SERVER_MANAGED_KEYS
                .iter()
                .any(|k| k.eq_ignore_ascii_case(key))
            {
                continue;
            }
            if is_urn(key) {
                if let Some(ext) = self.registry.extension_schema(self.resource_type, key) {
                    self.apply_extension(attributes, op, ext, Some(value))?;
                    continue;
                }
            }

            let known = AttributePath::parse(key)
                .filter(|target| target.sub.is_none())
                .filter(|target| self.registry.resolve(self.resource_type, target).is_some());
            match known {
                Some(target) => {
                    self.apply_path(attributes, op, &PatchPath::attribute(target), Some(value))?
                }
                None => self.unknown(key)?,
            }
        }
        Ok(())
    }

    /// Whole extension container as the target.
    fn apply_extension(
        &self,
        attributes: &mut Map<String, Value>,
        op: PatchOpKind,
        ext: &Schema,
        value: Option<&Value>,
    ) -> ValidationResult<()> {
        if op == PatchOpKind::Replace || op == PatchOpKind::Remove {
            attributes.remove(&ext.id);
        }
        if op == PatchOpKind::Remove {
            return Ok(());
        }

        for (key, value) in require_object(&ext.id, value)? {
            let Some(def) = ext.attribute(key) else {
                self.unknown(key)?;
                continue;
            };
            let target = AttributePath {
                schema: Some(ext.id.clone()),
                name: def.name.clone(),
                sub: None,
            };
            self.apply_path(attributes, op, &PatchPath::attribute(target), Some(value))?;
        }
        Ok(())
    }

    fn apply_path(
        &self,
        attributes: &mut Map<String, Value>,
        op: PatchOpKind,
        path: &PatchPath,
        value: Option<&Value>,
    ) -> ValidationResult<()> {
        if path.selector.is_none() {
            if let Some(ext) = self
                .registry
                .extension_schema(self.resource_type, path.as_str())
            {
                return self.apply_extension(attributes, op, ext, value);
            }
        }

        let resolved = self
            .registry
            .resolve(self.resource_type, &path.target)
            .ok_or_else(|| ValidationError::invalid_path(path.as_str(), "unknown attribute"))?;
        let def = resolved.attribute;
        if def.is_read_only() || resolved.sub_attribute.is_some_and(|s| s.is_read_only()) {
            debug!("Ignoring patch of read-only attribute '{}'", path);
            return Ok(());
        }

        let current = get_attribute(attributes, resolved.extension, &def.name).cloned();
        let updated = match (&path.selector, resolved.sub_attribute) {
            (None, None) => self.patch_whole(def, current, op, value)?,
            (None, Some(sub)) => self.patch_sub_attribute(def, sub, current, op, value, path)?,
            (Some(selector), sub) => {
                if !def.multi_valued {
                    return Err(ValidationError::invalid_path(
                        path.as_str(),
                        "value selector requires a multi-valued attribute",
                    ));
                }
                bind_element(selector, def)?;
                let mut items = into_items(current);
                let matched: Vec<usize> = items
                    .iter()
                    .enumerate()
                    .filter(|(_, item)| matches_element(selector, def, item))
                    .map(|(i, _)| i)
                    .collect();
                if matched.is_empty() {
                    if op == PatchOpKind::Remove {
                        return Ok(());
                    }
                    return Err(ValidationError::NoTarget {
                        path: path.to_string(),
                    });
                }
                self.patch_selected(def, sub, &mut items, &matched, op, value)?;
                check_single_primary(def, &items)?;
                (!items.is_empty()).then_some(Value::Array(items))
            }
        };

        set_attribute(attributes, resolved.extension, &def.name, updated);
        Ok(())
    }

    /// `attr`: the whole attribute.
    fn patch_whole(
        &self,
        def: &AttributeDefinition,
        current: Option<Value>,
        op: PatchOpKind,
        value: Option<&Value>,
    ) -> ValidationResult<Option<Value>> {
        if op == PatchOpKind::Remove {
            let listed = match value {
                Some(value) if def.multi_valued => {
                    normalize_value(def, &as_array(value), self.policy)?
                }
                _ => return Ok(None),
            };
            let listed = into_items(listed);
            let mut items = into_items(current);
            items.retain(|item| !listed.iter().any(|l| same_element(def, item, l)));
            return Ok((!items.is_empty()).then_some(Value::Array(items)));
        }

        let value = value.ok_or_else(|| ValidationError::custom("operation requires a value"))?;
        let incoming = if def.multi_valued {
            as_array(value)
        } else {
            value.clone()
        };
        let Some(incoming) = normalize_value(def, &incoming, self.policy)? else {
            return Ok(if op == PatchOpKind::Replace {
                None
            } else {
                current
            });
        };

        if def.multi_valued {
            if op == PatchOpKind::Replace {
                return Ok(Some(incoming));
            }
            let mut items = into_items(current);
            for item in into_items(Some(incoming)) {
                if items.iter().any(|existing| same_element(def, existing, &item)) {
                    continue;
                }
                if is_primary(&item) {
                    clear_primary(&mut items, &[]);
                }
                items.push(item);
            }
            check_single_primary(def, &items)?;
            return Ok(Some(Value::Array(items)));
        }

        if def.is_complex() {
            let mut merged = current
                .and_then(|c| c.as_object().cloned())
                .unwrap_or_default();
            if let Value::Object(incoming) = incoming {
                merged.extend(incoming);
            }
            return Ok(Some(Value::Object(merged)));
        }
        Ok(Some(incoming))
    }

    /// `attr.sub`: every element of a multi-valued attribute, or the single
    /// complex value.
    fn patch_sub_attribute(
        &self,
        def: &AttributeDefinition,
        sub: &AttributeDefinition,
        current: Option<Value>,
        op: PatchOpKind,
        value: Option<&Value>,
        path: &PatchPath,
    ) -> ValidationResult<Option<Value>> {
        let scalar = match op {
            PatchOpKind::Remove => None,
            _ => self.sub_value(sub, value)?,
        };

        if def.multi_valued {
            let mut items = into_items(current);
            if items.is_empty() {
                if op == PatchOpKind::Remove {
                    return Ok(None);
                }
                return Err(ValidationError::NoTarget {
                    path: path.to_string(),
                });
            }
            let all: Vec<usize> = (0..items.len()).collect();
            set_sub(&mut items, &all, sub, scalar);
            check_single_primary(def, &items)?;
            return Ok((!items.is_empty()).then_some(Value::Array(items)));
        }

        let mut object = current
            .and_then(|c| c.as_object().cloned())
            .unwrap_or_default();
        match scalar {
            Some(v) => object.insert(sub.name.clone(), v),
            None => object.remove(&sub.name),
        };
        Ok((!object.is_empty()).then_some(Value::Object(object)))
    }

    /// `attr[filter]` and `attr[filter].sub` over the matched elements.
    fn patch_selected(
        &self,
        def: &AttributeDefinition,
        sub: Option<&AttributeDefinition>,
        items: &mut Vec<Value>,
        matched: &[usize],
        op: PatchOpKind,
        value: Option<&Value>,
    ) -> ValidationResult<()> {
        match (op, sub) {
            (PatchOpKind::Remove, None) => {
                let mut index = 0;
                items.retain(|_| {
                    let keep = !matched.contains(&index);
                    index += 1;
                    keep
                });
            }
            (PatchOpKind::Remove, Some(sub)) => set_sub(items, matched, sub, None),
            (_, Some(sub)) => {
                let scalar = self.sub_value(sub, value)?;
                set_sub(items, matched, sub, scalar);
            }
            (_, None) => {
                let value =
                    value.ok_or_else(|| ValidationError::custom("operation requires a value"))?;
                let Some(element) = normalize_element(def, value, self.policy)? else {
                    return Ok(());
                };
                // Selected elements keep the sub-attributes the value leaves out.
                for &i in matched {
                    match (items[i].as_object_mut(), element.as_object()) {
                        (Some(target), Some(incoming)) => target.extend(incoming.clone()),
                        _ => items[i] = element.clone(),
                    }
                }
                if is_primary(&element) {
                    clear_primary(items, matched);
                }
            }
        }
        Ok(())
    }

    fn sub_value(
        &self,
        sub: &AttributeDefinition,
        value: Option<&Value>,
    ) -> ValidationResult<Option<Value>> {
        let value = value.ok_or_else(|| ValidationError::custom("operation requires a value"))?;
        if value.is_null() {
            return Ok(None);
        }
        normalize_element(sub, value, self.policy)
    }

    fn unknown(&self, key: &str) -> ValidationResult<()> {
        match self.policy {
            UnknownAttributePolicy::Reject => Err(ValidationError::UnknownAttribute {
                attribute: key.to_string(),
                resource_type: self.resource_type.name.clone(),
            }),
            UnknownAttributePolicy::Drop => {
                warn!(
                    "Dropping unknown patch attribute '{}' for {}",
                    key, self.resource_type.name
                );
                Ok(())
            }
        }
    }
}

/// Set (or clear) `sub` on the selected elements; drops elements left empty
/// and keeps a newly set primary unique.
fn set_sub(items: &mut Vec<Value>, selected: &[usize], sub: &AttributeDefinition, value: Option<Value>) {
    let sets_primary = sub.name == "primary" && value == Some(Value::Bool(true));
    for &i in selected {
        if let Some(object) = items[i].as_object_mut() {
            match &value {
                Some(v) => object.insert(sub.name.clone(), v.clone()),
                None => object.remove(&sub.name),
            };
        }
    }
    if sets_primary {
        clear_primary(items, selected);
    }
    items.retain(|item| item.as_object().is_none_or(|o| !o.is_empty()));
}

/// Drop the primary flag from every element not in `keep`.
fn clear_primary(items: &mut [Value], keep: &[usize]) {
    for (i, item) in items.iter_mut().enumerate() {
        if keep.contains(&i) {
            continue;
        }
        if let Some(object) = item.as_object_mut() {
            object.remove("primary");
        }
    }
}

fn is_primary(item: &Value) -> bool {
    item.get("primary") == Some(&Value::Bool(true))
}

/// Structural equality ignoring read-only (server-filled) sub-attributes.
fn same_element(def: &AttributeDefinition, a: &Value, b: &Value) -> bool {
    if !def.is_complex() {
        return a == b;
    }
    let client_view = |v: &Value| -> Option<Map<String, Value>> {
        v.as_object().map(|object| {
            object
                .iter()
                .filter(|(k, _)| !def.sub_attribute(k).is_some_and(|s| s.is_read_only()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    };
    client_view(a) == client_view(b)
}

fn as_array(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Null => value.clone(),
        other => Value::Array(vec![other.clone()]),
    }
}

fn into_items(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

fn require_object<'v>(
    name: &str,
    value: Option<&'v Value>,
) -> ValidationResult<&'v Map<String, Value>> {
    let value = value.ok_or_else(|| ValidationError::custom("operation requires a value"))?;
    value
        .as_object()
        .ok_or_else(|| ValidationError::invalid_type(name, "complex", json_type_name(value)))
}
