//! Schema registry for managing and accessing SCIM schemas.
//!
//! The registry owns every schema and resource type known to the engine and
//! resolves attribute paths (plain, dotted, or URN-qualified) to their
//! definitions. It is built once and then shared read-only; the
//! [`SharedSchemaRegistry`] wrapper provides the reload boundary.

use super::embedded;
use super::types::{AttributeDefinition, ResourceType, Schema, find_attribute};
use crate::error::{ScimError, ScimResult, ValidationError};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// A syntactic attribute path: `[urn:]name[.sub]`.
///
/// Parsing does not consult the registry; whether the URN names the core
/// schema or an extension is decided at resolution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributePath {
    pub schema: Option<String>,
    pub name: String,
    pub sub: Option<String>,
}

impl AttributePath {
    /// Parse `name`, `name.sub` or `urn:...:name[.sub]`.
    ///
    /// Returns `None` for empty segments or more than one dot after the schema
    /// prefix.
    pub fn parse(text: &str) -> Option<Self> {
        let (schema, rest) = if is_urn(text) {
            let idx = text.rfind(':')?;
            (Some(text[..idx].to_string()), &text[idx + 1..])
        } else {
            (None, text)
        };

        let mut parts = rest.split('.');
        let name = parts.next()?.to_string();
        let sub = parts.next().map(str::to_string);
        if parts.next().is_some() || name.is_empty() || sub.as_deref() == Some("") {
            return None;
        }
        if !name.chars().all(is_attr_char) || !sub.as_deref().unwrap_or("").chars().all(is_attr_char)
        {
            return None;
        }
        Some(Self { schema, name, sub })
    }

    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            sub: None,
        }
    }

    /// The path without its sub-attribute.
    pub fn parent(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            name: self.name.clone(),
            sub: None,
        }
    }
}

/// Whether `text` starts with a `urn:` scheme prefix.
pub fn is_urn(text: &str) -> bool {
    text.get(..4)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("urn:"))
}

fn is_attr_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '$'
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(schema) = &self.schema {
            write!(f, "{}:", schema)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(sub) = &self.sub {
            write!(f, ".{}", sub)?;
        }
        Ok(())
    }
}

/// An attribute path resolved against a resource type.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedAttribute<'a> {
    /// `Some(urn)` when the attribute lives in an extension container
    pub extension: Option<&'a str>,
    pub attribute: &'a AttributeDefinition,
    pub sub_attribute: Option<&'a AttributeDefinition>,
}

impl<'a> ResolvedAttribute<'a> {
    /// The definition the path ultimately points at.
    pub fn target(&self) -> &'a AttributeDefinition {
        self.sub_attribute.unwrap_or(self.attribute)
    }

    /// Top-level qualified name used for grants and change sets.
    pub fn qualified_name(&self) -> String {
        qualified_name(self.extension, &self.attribute.name)
    }
}

/// `name` for core attributes and `urn:name` for extension attributes.
pub fn qualified_name(extension: Option<&str>, name: &str) -> String {
    match extension {
        Some(urn) => format!("{}:{}", urn, name),
        None => name.to_string(),
    }
}

/// Registry for SCIM schemas and resource types.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Schema>,
    resource_types: Vec<ResourceType>,
    /// Server-managed attributes shared by every kind (`meta`)
    common: Vec<AttributeDefinition>,
}

impl SchemaRegistry {
    /// Create a registry holding the embedded User, Group and Enterprise
    /// extension schemas with their standard resource types.
    pub fn new() -> ScimResult<Self> {
        Self::with_embedded_schemas()
    }

    pub fn with_embedded_schemas() -> ScimResult<Self> {
        let mut registry = Self {
            common: serde_json::from_str(embedded::common_attributes())?,
            ..Self::default()
        };
        registry.add_schema(Self::load_schema_from_str(embedded::core_user_schema())?);
        registry.add_schema(Self::load_schema_from_str(embedded::core_group_schema())?);
        registry.add_schema(Self::load_schema_from_str(
            embedded::enterprise_user_schema(),
        )?);

        registry.add_resource_type(
            ResourceType::new("User", embedded::USER_SCHEMA)
                .with_extension(embedded::ENTERPRISE_USER_SCHEMA, false),
        )?;
        registry.add_resource_type(ResourceType::new("Group", embedded::GROUP_SCHEMA))?;
        Ok(registry)
    }

    /// Load a schema from a JSON string.
    pub fn load_schema_from_str(content: &str) -> ScimResult<Schema> {
        Ok(serde_json::from_str(content)?)
    }

    /// Add (or replace) a schema.
    pub fn add_schema(&mut self, schema: Schema) {
        self.schemas.insert(schema.id.to_ascii_lowercase(), schema);
    }

    /// Register a resource type; its core and extension schemas must exist.
    pub fn add_resource_type(&mut self, resource_type: ResourceType) -> ScimResult<()> {
        let missing = std::iter::once(&resource_type.schema)
            .chain(resource_type.schema_extensions.iter().map(|e| &e.schema))
            .find(|id| self.get_schema(id).is_none());
        if let Some(id) = missing {
            return Err(ValidationError::custom(format!(
                "Resource type '{}' references unknown schema '{}'",
                resource_type.name, id
            ))
            .into());
        }

        self.resource_types
            .retain(|rt| !rt.name.eq_ignore_ascii_case(&resource_type.name));
        self.resource_types.push(resource_type);
        Ok(())
    }

    /// Get a specific schema by URN, case-insensitively.
    pub fn get_schema(&self, id: &str) -> Option<&Schema> {
        self.schemas.get(&id.to_ascii_lowercase())
    }

    pub fn get_schemas(&self) -> Vec<&Schema> {
        self.schemas.values().collect()
    }

    pub fn resource_types(&self) -> &[ResourceType] {
        &self.resource_types
    }

    pub fn resource_type(&self, name: &str) -> Option<&ResourceType> {
        self.resource_types
            .iter()
            .find(|rt| rt.name.eq_ignore_ascii_case(name))
    }

    /// Like [`resource_type`](Self::resource_type) but reports unknown kinds.
    pub fn require_resource_type(&self, name: &str) -> ScimResult<&ResourceType> {
        self.resource_type(name)
            .ok_or_else(|| ScimError::UnsupportedResourceType(name.to_string()))
    }

    pub fn core_schema(&self, resource_type: &ResourceType) -> Option<&Schema> {
        self.get_schema(&resource_type.schema)
    }

    pub fn extension_schemas<'a>(
        &'a self,
        resource_type: &'a ResourceType,
    ) -> impl Iterator<Item = &'a Schema> + 'a {
        resource_type
            .schema_extensions
            .iter()
            .filter_map(|ext| self.get_schema(&ext.schema))
    }

    /// The extension schema of `resource_type` named by `urn`, if any.
    pub fn extension_schema(&self, resource_type: &ResourceType, urn: &str) -> Option<&Schema> {
        if resource_type.has_extension(urn) {
            self.get_schema(urn)
        } else {
            None
        }
    }

    /// Resolve a path against a resource type.
    ///
    /// A URN prefix selects the core schema or one of the type's extensions;
    /// no prefix means the core schema. Returns `None` for anything unknown.
    pub fn resolve<'a>(
        &'a self,
        resource_type: &ResourceType,
        path: &AttributePath,
    ) -> Option<ResolvedAttribute<'a>> {
        let (attribute, extension) = match &path.schema {
            Some(urn) if !urn.eq_ignore_ascii_case(&resource_type.schema) => {
                let schema = self.extension_schema(resource_type, urn)?;
                (schema.attribute(&path.name)?, Some(schema.id.as_str()))
            }
            _ => {
                let core = self.get_schema(&resource_type.schema)?;
                let attribute = core
                    .attribute(&path.name)
                    .or_else(|| find_attribute(&self.common, &path.name))?;
                (attribute, None)
            }
        };

        let sub_attribute = match &path.sub {
            Some(sub) => Some(attribute.sub_attribute(sub)?),
            None => None,
        };
        Some(ResolvedAttribute {
            extension,
            attribute,
            sub_attribute,
        })
    }

    /// Resolve a path given as text.
    pub fn resolve_str<'a>(
        &'a self,
        resource_type: &ResourceType,
        path: &str,
    ) -> Option<ResolvedAttribute<'a>> {
        self.resolve(resource_type, &AttributePath::parse(path)?)
    }

    /// Every top-level attribute of a resource type as `(extension, definition)`.
    pub fn attributes<'a>(
        &'a self,
        resource_type: &'a ResourceType,
    ) -> Vec<(Option<&'a str>, &'a AttributeDefinition)> {
        let mut out: Vec<(Option<&str>, &AttributeDefinition)> = self
            .core_schema(resource_type)
            .map(|s| s.attributes.iter().map(|a| (None, a)).collect())
            .unwrap_or_default();
        for ext in self.extension_schemas(resource_type) {
            out.extend(ext.attributes.iter().map(|a| (Some(ext.id.as_str()), a)));
        }
        out
    }
}

/// Process-wide registry handle with a defined reload boundary.
///
/// Readers take an [`Arc`] snapshot and keep using it for the whole request,
/// so a concurrent [`reload`](Self::reload) never changes schemas under them.
#[derive(Debug, Clone)]
pub struct SharedSchemaRegistry {
    inner: Arc<RwLock<Arc<SchemaRegistry>>>,
}

impl SharedSchemaRegistry {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    pub fn snapshot(&self) -> Arc<SchemaRegistry> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Swap in a new registry; snapshots taken earlier are unaffected.
    pub fn reload(&self, registry: SchemaRegistry) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(registry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::embedded::ENTERPRISE_USER_SCHEMA;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new().expect("embedded schemas load")
    }

    #[test]
    fn test_embedded_resource_types() {
        let registry = registry();
        assert!(registry.resource_type("user").is_some());
        assert!(registry.resource_type("Group").is_some());
        assert!(matches!(
            registry.require_resource_type("Device"),
            Err(ScimError::UnsupportedResourceType(_))
        ));
    }

    #[test]
    fn test_path_parsing() {
        let path = AttributePath::parse("name.givenName").unwrap();
        assert_eq!(path.name, "name");
        assert_eq!(path.sub.as_deref(), Some("givenName"));

        let path = AttributePath::parse(
            "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User:manager.value",
        )
        .unwrap();
        assert_eq!(path.schema.as_deref(), Some(ENTERPRISE_USER_SCHEMA));
        assert_eq!(path.name, "manager");
        assert_eq!(path.sub.as_deref(), Some("value"));

        assert!(AttributePath::parse("a.b.c").is_none());
        assert!(AttributePath::parse("emails.").is_none());
        assert!(AttributePath::parse("").is_none());
    }

    #[test]
    fn test_resolve_case_insensitive_and_qualified() {
        let registry = registry();
        let user = registry.resource_type("User").unwrap();

        let resolved = registry.resolve_str(user, "USERNAME").unwrap();
        assert_eq!(resolved.attribute.name, "userName");
        assert_eq!(resolved.qualified_name(), "userName");

        let resolved = registry
            .resolve_str(user, "urn:ietf:params:scim:schemas:core:2.0:User:emails.type")
            .unwrap();
        assert_eq!(resolved.target().name, "type");
        assert!(resolved.extension.is_none());

        let resolved = registry
            .resolve_str(
                user,
                "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User:employeeNumber",
            )
            .unwrap();
        assert_eq!(
            resolved.qualified_name(),
            format!("{}:employeeNumber", ENTERPRISE_USER_SCHEMA)
        );

        let resolved = registry.resolve_str(user, "meta.lastModified").unwrap();
        assert_eq!(resolved.target().data_type, crate::schema::AttributeType::DateTime);

        assert!(registry.resolve_str(user, "shoeSize").is_none());
        assert!(registry.resolve_str(user, "emails.colour").is_none());
    }

    #[test]
    fn test_extension_not_attached_to_group() {
        let registry = registry();
        let group = registry.resource_type("Group").unwrap();
        assert!(
            registry
                .resolve_str(
                    group,
                    "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User:department"
                )
                .is_none()
        );
    }

    #[test]
    fn test_resource_type_requires_known_schema() {
        let mut registry = registry();
        let result = registry.add_resource_type(ResourceType::new("Device", "urn:example:Device"));
        assert!(result.is_err());
    }

    #[test]
    fn test_shared_registry_reload_keeps_old_snapshots() {
        let shared = SharedSchemaRegistry::new(registry());
        let before = shared.snapshot();

        let mut next = registry();
        next.add_schema(Schema {
            id: "urn:example:Device".into(),
            name: "Device".into(),
            description: String::new(),
            attributes: vec![],
        });
        next.add_resource_type(ResourceType::new("Device", "urn:example:Device"))
            .unwrap();
        shared.reload(next);

        assert!(before.resource_type("Device").is_none());
        assert!(shared.snapshot().resource_type("Device").is_some());
    }
}
