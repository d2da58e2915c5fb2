//! The stored resource record.

use super::version::{HttpVersion, RawVersion};
use crate::schema::{ResourceType, SchemaRegistry};
use crate::storage::{StorageError, StorageKey};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A versioned resource as the coordinator stores it.
///
/// `attributes` holds the canonical attribute map: core attributes by their
/// schema names and extension attributes inside a container keyed by the
/// extension URN. `id`, `schemas` and `meta` are never part of it; they are
/// rendered from the record's own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub resource_type: String,
    pub id: String,
    pub version: RawVersion,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub attributes: Map<String, Value>,
}

impl Resource {
    /// A new resource at the initial version.
    pub fn new(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        attributes: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version: RawVersion::initial(),
            created: now,
            last_modified: now,
            attributes,
        }
    }

    pub fn key(&self) -> StorageKey {
        StorageKey::new(&self.resource_type, &self.id)
    }

    pub fn etag(&self) -> HttpVersion {
        self.version.clone().into()
    }

    /// Advance to the next version.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.version = self.version.next();
        self.last_modified = now;
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    /// `displayName`, falling back to `userName`.
    pub fn display(&self) -> Option<&str> {
        display_of(&self.attributes)
    }

    pub fn to_record(&self) -> Result<Value, StorageError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_record(key: &StorageKey, record: Value) -> Result<Self, StorageError> {
        serde_json::from_value(record).map_err(|e| {
            StorageError::corruption(key.resource_type(), key.resource_id(), e.to_string())
        })
    }

    /// `{base}/{endpoint}/{id}`
    pub fn location(&self, resource_type: &ResourceType, base_location: &str) -> String {
        format!(
            "{}{}/{}",
            base_location.trim_end_matches('/'),
            resource_type.endpoint,
            self.id
        )
    }

    /// Full representation: `schemas`, `id`, attributes and `meta`.
    pub fn representation(
        &self,
        registry: &SchemaRegistry,
        resource_type: &ResourceType,
        base_location: &str,
    ) -> Map<String, Value> {
        let mut schemas = vec![Value::String(resource_type.schema.clone())];
        schemas.extend(
            registry
                .extension_schemas(resource_type)
                .filter(|ext| self.attributes.contains_key(&ext.id))
                .map(|ext| Value::String(ext.id.clone())),
        );

        let mut out = Map::new();
        out.insert("schemas".to_string(), Value::Array(schemas));
        out.insert("id".to_string(), Value::String(self.id.clone()));
        for (key, value) in &self.attributes {
            out.insert(key.clone(), value.clone());
        }
        out.insert(
            "meta".to_string(),
            json!({
                "resourceType": resource_type.name,
                "created": self.created.to_rfc3339_opts(SecondsFormat::Millis, true),
                "lastModified": self.last_modified.to_rfc3339_opts(SecondsFormat::Millis, true),
                "version": self.etag().to_string(),
                "location": self.location(resource_type, base_location),
            }),
        );
        out
    }
}

/// `displayName`, falling back to `userName`, of an attribute map.
pub fn display_of(attributes: &Map<String, Value>) -> Option<&str> {
    attributes
        .get("displayName")
        .or_else(|| attributes.get("userName"))
        .and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Resource {
        let attributes = json!({"userName": "bjensen", "displayName": "Babs"});
        Resource::new(
            "User",
            "2819c223",
            attributes.as_object().cloned().unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn test_touch_advances_version() {
        let mut resource = sample();
        assert_eq!(resource.etag().to_string(), "W/\"1\"");
        let created = resource.created;
        resource.touch(Utc::now());
        assert_eq!(resource.version.as_str(), "2");
        assert_eq!(resource.created, created);
    }

    #[test]
    fn test_record_round_trip() {
        let resource = sample();
        let record = resource.to_record().unwrap();
        assert_eq!(record["resourceType"], "User");
        let back = Resource::from_record(&resource.key(), record).unwrap();
        assert_eq!(back, resource);

        let err = Resource::from_record(&resource.key(), json!({"id": 1})).unwrap_err();
        assert!(matches!(err, StorageError::DataCorruption { .. }));
    }

    #[test]
    fn test_representation_meta() {
        let registry = SchemaRegistry::new().unwrap();
        let user = registry.resource_type("User").unwrap();
        let out = sample().representation(&registry, user, "https://example.com/scim/v2/");
        assert_eq!(out["id"], "2819c223");
        assert_eq!(out["schemas"], json!(["urn:ietf:params:scim:schemas:core:2.0:User"]));
        assert_eq!(out["meta"]["version"], "W/\"1\"");
        assert_eq!(
            out["meta"]["location"],
            "https://example.com/scim/v2/Users/2819c223"
        );
        assert_eq!(sample().display(), Some("Babs"));
    }
}
