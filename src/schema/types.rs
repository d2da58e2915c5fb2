//! Core schema type definitions for SCIM resources.
//!
//! This module contains the data structures that describe SCIM schemas,
//! attribute definitions and resource types as specified in RFC 7643.

use serde::{Deserialize, Serialize};

/// A SCIM schema definition.
///
/// Each schema defines the attribute structure of either a core resource
/// kind (User, Group) or an extension attached to one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// Unique schema identifier (URI)
    pub id: String,
    /// Human-readable schema name
    pub name: String,
    /// Schema description
    #[serde(default)]
    pub description: String,
    /// List of attribute definitions
    pub attributes: Vec<AttributeDefinition>,
}

impl Schema {
    /// Case-insensitive lookup of a top-level attribute.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDefinition> {
        find_attribute(&self.attributes, name)
    }
}

/// Definition of a SCIM attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDefinition {
    /// Attribute name
    pub name: String,
    /// Data type of the attribute
    #[serde(rename = "type")]
    pub data_type: AttributeType,
    #[serde(default)]
    pub multi_valued: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub case_exact: bool,
    #[serde(default)]
    pub mutability: Mutability,
    #[serde(default)]
    pub uniqueness: Uniqueness,
    #[serde(default)]
    pub returned: Returned,
    /// Allowed values for string attributes
    #[serde(default)]
    pub canonical_values: Vec<String>,
    /// Sub-attributes for complex types
    #[serde(default)]
    pub sub_attributes: Vec<AttributeDefinition>,
}

impl Default for AttributeDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            data_type: AttributeType::String,
            multi_valued: false,
            required: false,
            case_exact: false,
            mutability: Mutability::ReadWrite,
            uniqueness: Uniqueness::None,
            returned: Returned::Default,
            canonical_values: Vec::new(),
            sub_attributes: Vec::new(),
        }
    }
}

impl AttributeDefinition {
    /// Case-insensitive lookup of a sub-attribute.
    pub fn sub_attribute(&self, name: &str) -> Option<&AttributeDefinition> {
        find_attribute(&self.sub_attributes, name)
    }

    pub fn is_complex(&self) -> bool {
        self.data_type == AttributeType::Complex
    }

    /// Attributes a client can never set or read back as written.
    pub fn is_read_only(&self) -> bool {
        self.mutability == Mutability::ReadOnly
    }

    /// Whether the value may leave the engine in any response.
    pub fn is_never_returned(&self) -> bool {
        self.returned == Returned::Never || self.mutability == Mutability::WriteOnly
    }
}

/// Case-insensitive attribute lookup over a definition list.
pub fn find_attribute<'a>(
    definitions: &'a [AttributeDefinition],
    name: &str,
) -> Option<&'a AttributeDefinition> {
    definitions
        .iter()
        .find(|attr| attr.name.eq_ignore_ascii_case(name))
}

/// SCIM attribute data types.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum AttributeType {
    #[default]
    String,
    Boolean,
    Decimal,
    Integer,
    /// DateTime in RFC3339 format
    DateTime,
    /// Binary data (base64 encoded)
    Binary,
    /// URI reference
    Reference,
    /// Complex attribute with sub-attributes
    Complex,
}

impl AttributeType {
    pub fn as_str(self) -> &'static str {
        match self {
            AttributeType::String => "string",
            AttributeType::Boolean => "boolean",
            AttributeType::Decimal => "decimal",
            AttributeType::Integer => "integer",
            AttributeType::DateTime => "dateTime",
            AttributeType::Binary => "binary",
            AttributeType::Reference => "reference",
            AttributeType::Complex => "complex",
        }
    }

    /// Types compared as text by the filter engine.
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            AttributeType::String | AttributeType::Reference | AttributeType::Binary
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, AttributeType::Integer | AttributeType::Decimal)
    }
}

/// Attribute mutability characteristics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Mutability {
    /// Managed by the server
    ReadOnly,
    #[default]
    ReadWrite,
    /// Set once, never modified
    Immutable,
    /// Passwords and similar
    WriteOnly,
}

/// Attribute uniqueness constraints.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Uniqueness {
    #[default]
    None,
    /// Unique among resources of the same kind
    Server,
    Global,
}

/// Return policy of an attribute.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Returned {
    Always,
    Never,
    #[default]
    Default,
    Request,
}

/// An extension schema attached to a resource type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaExtension {
    pub schema: String,
    #[serde(default)]
    pub required: bool,
}

/// Binds a resource kind name to its core schema and extensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceType {
    pub name: String,
    pub endpoint: String,
    pub schema: String,
    #[serde(default)]
    pub schema_extensions: Vec<SchemaExtension>,
}

impl ResourceType {
    pub fn new(name: impl Into<String>, schema: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            endpoint: format!("/{}s", name),
            name,
            schema: schema.into(),
            schema_extensions: Vec::new(),
        }
    }

    pub fn with_extension(mut self, schema: impl Into<String>, required: bool) -> Self {
        self.schema_extensions.push(SchemaExtension {
            schema: schema.into(),
            required,
        });
        self
    }

    /// Whether the given URN names one of this type's extensions.
    pub fn has_extension(&self, urn: &str) -> bool {
        self.schema_extensions
            .iter()
            .any(|ext| ext.schema.eq_ignore_ascii_case(urn))
    }
}
