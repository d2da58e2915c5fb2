//! Schema validation logic for SCIM resources.
//!
//! Client bodies are validated and canonicalized in one pass: keys take the
//! schema's spelling, read-only input is stripped, extension attributes move
//! under their URN container, and every value is type checked.

use super::registry::{SchemaRegistry, is_urn};
use super::types::{AttributeDefinition, Mutability, ResourceType, Schema};
use super::value::{coerce, get_attribute, is_present, json_type_name, set_attribute};
use crate::error::{ValidationError, ValidationResult};

use log::warn;
use serde_json::{Map, Value};

/// Keys the engine manages itself; silently ignored on input.
pub const SERVER_MANAGED_KEYS: [&str; 3] = ["schemas", "id", "meta"];

/// Treatment of attributes the schema does not define.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownAttributePolicy {
    /// Drop the attribute and log a warning
    #[default]
    Drop,
    /// Fail with [`ValidationError::UnknownAttribute`]
    Reject,
}

impl SchemaRegistry {
    /// Validate a client-supplied body and return its canonical attribute map.
    pub fn normalize_resource(
        &self,
        resource_type: &ResourceType,
        body: &Value,
        policy: UnknownAttributePolicy,
    ) -> ValidationResult<Map<String, Value>> {
        let obj = body
            .as_object()
            .ok_or_else(|| ValidationError::custom("Resource must be a JSON object"))?;
        let core = self.core_schema(resource_type).ok_or_else(|| {
            ValidationError::custom(format!("No schema for {}", resource_type.name))
        })?;

        let mut out = Map::new();
        for (key, value) in obj {
            if SERVER_MANAGED_KEYS
                .iter()
                .any(|k| k.eq_ignore_ascii_case(key))
            {
                continue;
            }

            if is_urn(key) {
                if let Some(ext) = self.extension_schema(resource_type, key) {
                    if value.is_null() {
                        continue;
                    }
                    let container = value.as_object().ok_or_else(|| {
                        ValidationError::invalid_type(key, "complex", json_type_name(value))
                    })?;
                    let normalized =
                        normalize_container(ext, container, policy, &resource_type.name)?;
                    if !normalized.is_empty() {
                        out.insert(ext.id.clone(), Value::Object(normalized));
                    }
                    continue;
                }
                if let Some(resolved) = self.resolve_str(resource_type, key) {
                    if resolved.sub_attribute.is_none() && !resolved.attribute.is_read_only() {
                        let normalized = normalize_value(resolved.attribute, value, policy)?;
                        set_attribute(
                            &mut out,
                            resolved.extension,
                            &resolved.attribute.name,
                            normalized,
                        );
                    }
                    continue;
                }
            }

            match core.attribute(key) {
                Some(def) if def.is_read_only() => {}
                Some(def) => {
                    if let Some(normalized) = normalize_value(def, value, policy)? {
                        out.insert(def.name.clone(), normalized);
                    }
                }
                None => unknown_attribute(key, &resource_type.name, policy)?,
            }
        }
        Ok(out)
    }

    /// Check required attributes, including those of required extensions.
    pub fn check_required(
        &self,
        resource_type: &ResourceType,
        attributes: &Map<String, Value>,
    ) -> ValidationResult<()> {
        for (extension, def) in self.attributes(resource_type) {
            if !def.required {
                continue;
            }
            if let Some(urn) = extension {
                // Optional extension not supplied at all.
                if !attributes.contains_key(urn) {
                    continue;
                }
            }
            if !get_attribute(attributes, extension, &def.name).is_some_and(is_present) {
                return Err(ValidationError::missing_required(&def.name));
            }
        }

        for ext in &resource_type.schema_extensions {
            if ext.required && !attributes.contains_key(&ext.schema) {
                return Err(ValidationError::missing_required(&ext.schema));
            }
        }
        Ok(())
    }

    /// Reject changes to immutable attributes that already hold a value.
    pub fn check_immutable(
        &self,
        resource_type: &ResourceType,
        before: &Map<String, Value>,
        after: &Map<String, Value>,
    ) -> ValidationResult<()> {
        for (extension, def) in self.attributes(resource_type) {
            if def.mutability != Mutability::Immutable {
                continue;
            }
            let Some(old) = get_attribute(before, extension, &def.name).filter(|v| is_present(v))
            else {
                continue;
            };
            if get_attribute(after, extension, &def.name) != Some(old) {
                return Err(ValidationError::ImmutableMutabilityViolation {
                    attribute: def.name.clone(),
                });
            }
        }
        Ok(())
    }
}

fn unknown_attribute(
    key: &str,
    resource_type: &str,
    policy: UnknownAttributePolicy,
) -> ValidationResult<()> {
    match policy {
        UnknownAttributePolicy::Reject => Err(ValidationError::UnknownAttribute {
            attribute: key.to_string(),
            resource_type: resource_type.to_string(),
        }),
        UnknownAttributePolicy::Drop => {
            warn!("Dropping unknown attribute '{}' for {}", key, resource_type);
            Ok(())
        }
    }
}

fn normalize_container(
    schema: &Schema,
    container: &Map<String, Value>,
    policy: UnknownAttributePolicy,
    resource_type: &str,
) -> ValidationResult<Map<String, Value>> {
    let mut out = Map::new();
    for (key, value) in container {
        match schema.attribute(key) {
            Some(def) if def.is_read_only() => {}
            Some(def) => {
                if let Some(normalized) = normalize_value(def, value, policy)? {
                    out.insert(def.name.clone(), normalized);
                }
            }
            None => unknown_attribute(key, resource_type, policy)?,
        }
    }
    Ok(out)
}

/// Validate one attribute value and return its canonical form.
///
/// `Ok(None)` means the value is null or empty and the attribute should be
/// treated as absent.
pub fn normalize_value(
    def: &AttributeDefinition,
    value: &Value,
    policy: UnknownAttributePolicy,
) -> ValidationResult<Option<Value>> {
    if value.is_null() {
        return Ok(None);
    }

    if !def.multi_valued {
        if value.is_array() {
            return Err(ValidationError::ExpectedSingleValue {
                attribute: def.name.clone(),
            });
        }
        return normalize_element(def, value, policy);
    }

    let Value::Array(items) = value else {
        return Err(ValidationError::ExpectedMultiValue {
            attribute: def.name.clone(),
        });
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if let Some(normalized) = normalize_element(def, item, policy)? {
            out.push(normalized);
        }
    }
    check_single_primary(def, &out)?;

    Ok((!out.is_empty()).then_some(Value::Array(out)))
}

/// Validate one element of an attribute (the whole value when single-valued).
pub fn normalize_element(
    def: &AttributeDefinition,
    value: &Value,
    policy: UnknownAttributePolicy,
) -> ValidationResult<Option<Value>> {
    if !def.is_complex() {
        check_scalar(def, value)?;
        return Ok(Some(value.clone()));
    }

    let obj = value
        .as_object()
        .ok_or_else(|| ValidationError::invalid_type(&def.name, "complex", json_type_name(value)))?;
    let mut out = Map::new();
    for (key, sub_value) in obj {
        let Some(sub) = def.sub_attribute(key) else {
            if policy == UnknownAttributePolicy::Reject {
                return Err(ValidationError::UnknownSubAttribute {
                    attribute: def.name.clone(),
                    sub_attribute: key.clone(),
                });
            }
            warn!("Dropping unknown sub-attribute '{}.{}'", def.name, key);
            continue;
        };
        if sub.is_read_only() || sub_value.is_null() {
            continue;
        }
        check_scalar(sub, sub_value)?;
        out.insert(sub.name.clone(), sub_value.clone());
    }
    Ok((!out.is_empty()).then_some(Value::Object(out)))
}

fn check_scalar(def: &AttributeDefinition, value: &Value) -> ValidationResult<()> {
    if coerce(def.data_type, value).is_some() {
        return Ok(());
    }
    if def.data_type == super::types::AttributeType::DateTime && value.is_string() {
        return Err(ValidationError::InvalidDateTimeFormat {
            attribute: def.name.clone(),
            value: value.as_str().unwrap_or_default().to_string(),
        });
    }
    Err(ValidationError::invalid_type(
        &def.name,
        def.data_type.as_str(),
        json_type_name(value),
    ))
}

/// At most one element of a multi-valued attribute may be primary.
pub fn check_single_primary(def: &AttributeDefinition, elements: &[Value]) -> ValidationResult<()> {
    let primaries = elements
        .iter()
        .filter(|e| e.get("primary") == Some(&Value::Bool(true)))
        .count();
    if primaries > 1 {
        return Err(ValidationError::MultiplePrimaryValues {
            attribute: def.name.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::embedded::ENTERPRISE_USER_SCHEMA;
    use crate::schema::types::AttributeType;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new().unwrap()
    }

    fn normalize(body: Value) -> ValidationResult<Map<String, Value>> {
        let registry = registry();
        let user = registry.resource_type("User").unwrap().clone();
        registry.normalize_resource(&user, &body, UnknownAttributePolicy::Drop)
    }

    #[test]
    fn test_canonical_keys_and_stripped_server_fields() {
        let attrs = normalize(json!({
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
            "id": "client-chosen",
            "meta": {"version": "W/\"9\""},
            "USERNAME": "bjensen",
            "Emails": [{"VALUE": "b@example.com", "Type": "work"}],
            "groups": [{"value": "g1"}]
        }))
        .unwrap();

        assert_eq!(attrs.get("userName"), Some(&json!("bjensen")));
        assert_eq!(
            attrs.get("emails"),
            Some(&json!([{"value": "b@example.com", "type": "work"}]))
        );
        assert!(!attrs.contains_key("id"));
        assert!(!attrs.contains_key("groups"));
    }

    #[test]
    fn test_extension_container_is_canonicalized() {
        let attrs = normalize(json!({
            "userName": "bjensen",
            "urn:ietf:params:scim:schemas:extension:enterprise:2.0:user": {"Department": "Sales"}
        }))
        .unwrap();
        assert_eq!(
            attrs.get(ENTERPRISE_USER_SCHEMA),
            Some(&json!({"department": "Sales"}))
        );
    }

    #[test]
    fn test_type_and_shape_errors() {
        assert!(matches!(
            normalize(json!({"userName": "a", "active": "yes"})),
            Err(ValidationError::InvalidAttributeType { .. })
        ));
        assert!(matches!(
            normalize(json!({"userName": "a", "emails": {"value": "x"}})),
            Err(ValidationError::ExpectedMultiValue { .. })
        ));
        assert!(matches!(
            normalize(json!({"userName": ["a", "b"]})),
            Err(ValidationError::ExpectedSingleValue { .. })
        ));
        assert!(matches!(
            normalize(json!({"userName": "a", "emails": [
                {"value": "x", "primary": true},
                {"value": "y", "primary": true}
            ]})),
            Err(ValidationError::MultiplePrimaryValues { .. })
        ));
    }

    #[test]
    fn test_unknown_attribute_policy() {
        let registry = registry();
        let user = registry.resource_type("User").unwrap().clone();
        let body = json!({"userName": "a", "shoeSize": 44});

        let attrs = registry
            .normalize_resource(&user, &body, UnknownAttributePolicy::Drop)
            .unwrap();
        assert!(!attrs.contains_key("shoeSize"));

        let result = registry.normalize_resource(&user, &body, UnknownAttributePolicy::Reject);
        assert!(matches!(result, Err(ValidationError::UnknownAttribute { .. })));
    }

    #[test]
    fn test_required_attributes() {
        let registry = registry();
        let user = registry.resource_type("User").unwrap();
        let attrs = normalize(json!({"displayName": "Babs"})).unwrap();
        assert_eq!(
            registry.check_required(user, &attrs),
            Err(ValidationError::missing_required("userName"))
        );
    }

    #[test]
    fn test_immutable_attribute_set_once() {
        let mut registry = registry();
        registry.add_schema(Schema {
            id: "urn:example:Device".into(),
            name: "Device".into(),
            description: String::new(),
            attributes: vec![AttributeDefinition {
                name: "serial".into(),
                data_type: AttributeType::String,
                mutability: Mutability::Immutable,
                ..Default::default()
            }],
        });
        registry
            .add_resource_type(ResourceType::new("Device", "urn:example:Device"))
            .unwrap();
        let device = registry.resource_type("Device").unwrap();

        let empty = Map::new();
        let set: Map<String, Value> = json!({"serial": "A1"}).as_object().unwrap().clone();
        let changed: Map<String, Value> = json!({"serial": "B2"}).as_object().unwrap().clone();

        assert!(registry.check_immutable(device, &empty, &set).is_ok());
        assert!(registry.check_immutable(device, &set, &set).is_ok());
        assert!(matches!(
            registry.check_immutable(device, &set, &changed),
            Err(ValidationError::ImmutableMutabilityViolation { .. })
        ));
    }
}
