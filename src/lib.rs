//! SCIM 2.0 resource engine for Rust.
//!
//! Provides schema-driven validation, filtering, patching, role-based access
//! control and referential integrity for SCIM resources over pluggable
//! storage backends. Transport and authentication are left to the caller.
//!
//! # Core Components
//!
//! - [`ResourceCoordinator`] - CRUD, search, preconditions and back-references
//! - [`ScimOperationHandler`] - Structured request/response front end
//! - [`SchemaRegistry`] - Schemas, resource types and attribute resolution
//! - [`StorageProvider`] - Trait for implementing storage backends
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use scim_engine::ScimEngineBuilder;
//! use scim_engine::auth::Subject;
//! use scim_engine::projection::AttributeSelection;
//! use scim_engine::resource::RequestContext;
//! use scim_engine::storage::InMemoryStorage;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = ScimEngineBuilder::new(InMemoryStorage::new()).build()?;
//! let context = RequestContext::for_subject(Subject::system());
//! let created = coordinator
//!     .create("User", &json!({"userName": "bjensen"}), &AttributeSelection::new(), &context)
//!     .await?;
//! println!("created {} at {}", created.id, created.version);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod filter;
pub mod operation_handler;
pub mod patch;
pub mod projection;
pub mod providers;
pub mod resource;
pub mod schema;
pub mod storage;

// Re-export commonly used types for convenience
pub use auth::{Permission, RoleTable, Subject};
pub use config::{EngineConfig, ScimEngineBuilder};
pub use error::{OutcomeCode, ScimError, ScimResult, ValidationError};
pub use filter::{FilterNode, parse_filter};
pub use operation_handler::{
    OperationMetadata, OperationRequest, OperationResponse, OperationType, ScimOperationHandler,
};
pub use patch::{PatchOperation, PatchRequest};
pub use projection::AttributeSelection;
pub use providers::{ResourceCoordinator, ResourceResult, SearchResult};
pub use resource::{HttpVersion, ListQuery, Preconditions, RequestContext, Resource};
pub use schema::{Schema, SchemaRegistry, SharedSchemaRegistry};
pub use storage::{InMemoryStorage, StorageProvider};
