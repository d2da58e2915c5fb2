//! Core operation handler infrastructure
//!
//! This module contains the request/response types and the dispatcher that
//! routes each request to its handler.

use crate::{
    auth::Subject,
    error::{OutcomeCode, ScimResult},
    providers::ResourceCoordinator,
    resource::{ListQuery, Preconditions, RequestContext, version::HttpVersion},
    storage::StorageProvider,
};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Transport-agnostic entry point to the engine.
///
/// Transport collaborators hand in an [`OperationRequest`] and always get an
/// [`OperationResponse`] back; engine errors are mapped to outcome codes and
/// never escape as [`ScimError`](crate::ScimError).
pub struct ScimOperationHandler<S: StorageProvider> {
    pub(super) coordinator: ResourceCoordinator<S>,
}

/// Structured request for one SCIM operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub operation: OperationType,
    /// The resource type (e.g., "User", "Group")
    pub resource_type: String,
    /// Resource ID for operations that target a specific resource
    pub resource_id: Option<String>,
    /// Authenticated caller, as resolved by the authentication collaborator
    pub subject: Subject,
    /// Resource body for create/replace, `PatchOp` message for patch
    pub data: Option<Value>,
    /// Filter, paging and attribute selection
    pub query: ListQuery,
    /// Raw `ifMatch` token
    pub if_match: Option<String>,
    /// Raw `ifNoneMatch` token
    pub if_none_match: Option<String>,
    /// Request ID for tracing and correlation
    pub request_id: Option<String>,
}

/// Operations supported by the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Get,
    Replace,
    Patch,
    Delete,
    Search,
}

/// Structured response for one SCIM operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResponse {
    pub outcome: OutcomeCode,
    /// Single-resource result
    pub resource: Option<Value>,
    /// Search result; `None` when nothing matched
    pub resources: Option<Vec<Value>>,
    /// Version after the operation, as a weak ETag
    pub version: Option<HttpVersion>,
    pub error: Option<OperationError>,
    pub metadata: OperationMetadata,
}

/// Error details for a failed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationError {
    /// HTTP-equivalent status
    pub status: u16,
    /// SCIM `scimType` hint
    pub scim_type: Option<String>,
    pub detail: String,
}

/// Metadata about an operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OperationMetadata {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    /// Total matches of a search across all pages
    pub total_results: Option<usize>,
    pub start_index: Option<usize>,
    pub items_per_page: Option<usize>,
    pub request_id: String,
    /// Additional metadata such as version conflict details
    pub additional: HashMap<String, Value>,
}

impl OperationResponse {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

impl<S: StorageProvider> ScimOperationHandler<S> {
    pub fn new(coordinator: ResourceCoordinator<S>) -> Self {
        Self { coordinator }
    }

    /// Handle a structured SCIM operation request.
    ///
    /// This is the main entry point that dispatches to specific operation
    /// handlers based on the operation type.
    pub async fn handle_operation(&self, request: OperationRequest) -> OperationResponse {
        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        info!(
            "SCIM operation handler processing {:?} for {} (request: '{}')",
            request.operation, request.resource_type, request_id
        );

        let context = RequestContext::new(request_id.clone()).with_subject(request.subject.clone());
        let resource_type = request.resource_type.clone();
        let resource_id = request.resource_id.clone();

        let result = match request.operation {
            OperationType::Create => super::handlers::crud::handle_create(self, request, &context).await,
            OperationType::Get => super::handlers::crud::handle_get(self, request, &context).await,
            OperationType::Replace => {
                super::handlers::crud::handle_replace(self, request, &context).await
            }
            OperationType::Patch => super::handlers::crud::handle_patch(self, request, &context).await,
            OperationType::Delete => {
                super::handlers::crud::handle_delete(self, request, &context).await
            }
            OperationType::Search => {
                super::handlers::query::handle_search(self, request, &context).await
            }
        };

        match result {
            Ok(response) => {
                debug!(
                    "SCIM operation handler completed with {:?} (request: '{}')",
                    response.outcome, request_id
                );
                response
            }
            Err(e) => {
                if e.is_fatal() {
                    error!("SCIM operation handler failed: {} (request: '{}')", e, request_id);
                } else {
                    warn!("SCIM operation handler failed: {} (request: '{}')", e, request_id);
                }
                let mut response = super::errors::create_error_response(&e, request_id);
                response.metadata.resource_type = Some(resource_type);
                response.metadata.resource_id = resource_id;
                response
            }
        }
    }

    /// Access the underlying coordinator.
    pub fn coordinator(&self) -> &ResourceCoordinator<S> {
        &self.coordinator
    }

    pub(super) fn preconditions(request: &OperationRequest) -> ScimResult<Preconditions> {
        Preconditions::from_tokens(request.if_match.as_deref(), request.if_none_match.as_deref())
            .map_err(|e| crate::ScimError::invalid_request(e.to_string()))
    }
}
