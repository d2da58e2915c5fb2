//! Engine configuration and builder.
//!
//! ```rust
//! use scim_engine::config::{EngineConfig, ScimEngineBuilder};
//! use scim_engine::storage::InMemoryStorage;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::from_json_str(r#"{
//!     "base_location": "https://idp.example.com/scim/v2",
//!     "max_results": 200
//! }"#)?;
//! assert!(config.enforce_rbac);
//!
//! let engine = ScimEngineBuilder::new(InMemoryStorage::new())
//!     .with_config(config)
//!     .build()?;
//! assert_eq!(engine.config().max_results, 200);
//! # Ok(())
//! # }
//! ```

use crate::error::{ScimError, ScimResult};
use crate::operation_handler::ScimOperationHandler;
use crate::providers::ResourceCoordinator;
use crate::schema::{SchemaRegistry, SharedSchemaRegistry, UnknownAttributePolicy};
use crate::storage::StorageProvider;

use serde::Deserialize;

/// Runtime settings of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// URI prefix used for `meta.location`
    pub base_location: String,
    /// Upper bound on the number of resources one search returns
    pub max_results: usize,
    /// Apply role-based grants; when false every subject is unrestricted
    pub enforce_rbac: bool,
    /// Reject unknown input attributes instead of dropping them
    pub reject_unknown_attributes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_location: "https://localhost/scim/v2".to_string(),
            max_results: 1000,
            enforce_rbac: true,
            reject_unknown_attributes: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(content: &str) -> ScimResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ScimResult<()> {
        if self.max_results == 0 {
            return Err(ScimError::invalid_request("max_results must be at least 1"));
        }
        Ok(())
    }

    pub fn unknown_attribute_policy(&self) -> UnknownAttributePolicy {
        if self.reject_unknown_attributes {
            UnknownAttributePolicy::Reject
        } else {
            UnknownAttributePolicy::Drop
        }
    }
}

/// Wires configuration, schemas and storage into a coordinator.
pub struct ScimEngineBuilder<S: StorageProvider> {
    storage: S,
    config: EngineConfig,
    registry: Option<SharedSchemaRegistry>,
}

impl<S: StorageProvider> ScimEngineBuilder<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            config: EngineConfig::default(),
            registry: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_base_location(mut self, base_location: impl Into<String>) -> Self {
        self.config.base_location = base_location.into();
        self
    }

    pub fn with_rbac(mut self, enforce: bool) -> Self {
        self.config.enforce_rbac = enforce;
        self
    }

    pub fn with_registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = Some(SharedSchemaRegistry::new(registry));
        self
    }

    /// Share a registry handle so that reloads reach this engine.
    pub fn with_shared_registry(mut self, registry: SharedSchemaRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> ScimResult<ResourceCoordinator<S>> {
        self.config.validate()?;
        let registry = match self.registry {
            Some(registry) => registry,
            None => SharedSchemaRegistry::new(SchemaRegistry::new()?),
        };
        Ok(ResourceCoordinator::new(self.storage, registry, self.config))
    }

    pub fn build_handler(self) -> ScimResult<ScimOperationHandler<S>> {
        Ok(ScimOperationHandler::new(self.build()?))
    }
}
