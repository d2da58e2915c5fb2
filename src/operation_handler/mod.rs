//! Framework-agnostic SCIM operation handler.
//!
//! Wraps a [`ResourceCoordinator`](crate::providers::ResourceCoordinator)
//! behind structured requests and responses. Conditional tokens arrive as raw
//! `ifMatch`/`ifNoneMatch` strings and every engine error comes back as an
//! outcome code, so a transport only has to translate envelopes.
//!
//! # Key Types
//!
//! - [`ScimOperationHandler`] - Dispatches requests to the coordinator
//! - [`OperationRequest`] - Structured request with subject and preconditions
//! - [`OperationResponse`] - Outcome, body, version and metadata
//!
//! # Examples
//!
//! ```rust
//! use scim_engine::auth::Subject;
//! use scim_engine::config::ScimEngineBuilder;
//! use scim_engine::error::OutcomeCode;
//! use scim_engine::operation_handler::OperationRequest;
//! use scim_engine::storage::InMemoryStorage;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handler = ScimEngineBuilder::new(InMemoryStorage::new()).build_handler()?;
//!
//! let request = OperationRequest::create("User", json!({"userName": "bjensen"}))
//!     .with_subject(Subject::system());
//! let response = handler.handle_operation(request).await;
//! assert_eq!(response.outcome, OutcomeCode::Created);
//! # Ok(())
//! # }
//! ```

mod builders;
mod core;
mod errors;
mod handlers;

pub use core::{
    OperationError, OperationMetadata, OperationRequest, OperationResponse, OperationType,
    ScimOperationHandler,
};

// Re-export error utilities for advanced usage
pub use errors::{create_error_response, create_version_conflict_response};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Subject;
    use crate::config::ScimEngineBuilder;
    use crate::error::OutcomeCode;
    use crate::storage::InMemoryStorage;
    use serde_json::json;

    fn handler() -> ScimOperationHandler<InMemoryStorage> {
        ScimEngineBuilder::new(InMemoryStorage::new())
            .build_handler()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_conditional_get() {
        let handler = handler();
        let created = handler
            .handle_operation(
                OperationRequest::create("User", json!({"userName": "bjensen"}))
                    .with_subject(Subject::system()),
            )
            .await;
        assert_eq!(created.outcome, OutcomeCode::Created);
        let id = created.metadata.resource_id.clone().unwrap();
        let etag = created.version.clone().unwrap().to_string();

        let cached = handler
            .handle_operation(
                OperationRequest::get("User", &id)
                    .with_subject(Subject::system())
                    .with_if_none_match(etag),
            )
            .await;
        assert_eq!(cached.outcome, OutcomeCode::NotModified);
        assert!(!cached.is_success());
    }

    #[tokio::test]
    async fn test_patch_without_attributes_is_no_content() {
        let handler = handler();
        let created = handler
            .handle_operation(
                OperationRequest::create("User", json!({"userName": "bjensen"}))
                    .with_subject(Subject::system()),
            )
            .await;
        let id = created.metadata.resource_id.unwrap();

        let patched = handler
            .handle_operation(
                OperationRequest::patch(
                    "User",
                    &id,
                    json!({
                        "schemas": ["urn:ietf:params:scim:api:messages:2.0:PatchOp"],
                        "Operations": [{"op": "replace", "path": "nickName", "value": "Babs"}]
                    }),
                )
                .with_subject(Subject::system()),
            )
            .await;
        assert_eq!(patched.outcome, OutcomeCode::NoContent);
        assert!(patched.resource.is_none());
        assert_eq!(patched.version.unwrap().to_string(), "W/\"2\"");
    }

    #[tokio::test]
    async fn test_malformed_token_is_bad_request() {
        let handler = handler();
        let response = handler
            .handle_operation(
                OperationRequest::delete("User", "missing")
                    .with_subject(Subject::system())
                    .with_if_match("W/3"),
            )
            .await;
        assert_eq!(response.outcome, OutcomeCode::BadRequest);
        assert_eq!(response.metadata.resource_type.as_deref(), Some("User"));
    }

    #[tokio::test]
    async fn test_missing_id_is_bad_request() {
        let handler = handler();
        let mut request = OperationRequest::get("User", "x").with_subject(Subject::system());
        request.resource_id = None;
        let response = handler.handle_operation(request).await;
        assert_eq!(response.outcome, OutcomeCode::BadRequest);
        assert!(response.error.unwrap().detail.contains("resource_id"));
    }

    #[tokio::test]
    async fn test_anonymous_search_is_forbidden() {
        let handler = handler();
        let response = handler
            .handle_operation(OperationRequest::search("User"))
            .await;
        assert_eq!(response.outcome, OutcomeCode::Forbidden);
        assert_eq!(response.error.unwrap().status, 403);
    }
}
