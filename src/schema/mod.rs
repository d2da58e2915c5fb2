//! Schema definitions and validation for SCIM resources.
//!
//! This module provides the schema registry, the typed-value capability table
//! and body validation for the RFC 7643 core schemas and any registered
//! extensions.
//!
//! # Key Types
//!
//! - [`SchemaRegistry`] - Schemas and resource types, attribute path resolution
//! - [`SharedSchemaRegistry`] - Read-mostly handle with a reload boundary
//! - [`AttributeDefinition`] - Individual attribute specifications and constraints
//! - [`TypedValue`] - Scalar values tagged with their SCIM type
//!
//! # Examples
//!
//! ```rust
//! use scim_engine::schema::SchemaRegistry;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = SchemaRegistry::new()?;
//! let user = registry.require_resource_type("User")?;
//! let resolved = registry.resolve_str(user, "name.givenName").unwrap();
//! assert_eq!(resolved.qualified_name(), "name");
//! # Ok(())
//! # }
//! ```

pub mod embedded;
pub mod registry;
pub mod types;
pub mod validation;
pub mod value;

pub use registry::{
    AttributePath, ResolvedAttribute, SchemaRegistry, SharedSchemaRegistry, is_urn,
    qualified_name,
};
pub use types::{
    AttributeDefinition, AttributeType, Mutability, ResourceType, Returned, Schema,
    SchemaExtension, Uniqueness,
};
pub use validation::UnknownAttributePolicy;
pub use value::TypedValue;
