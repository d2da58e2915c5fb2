//! Error handling utilities for operation handlers
//!
//! Maps engine errors onto response outcomes. Forbidden responses carry the
//! kind and operation only, never a resource id.

use crate::{
    ScimError,
    operation_handler::core::{OperationError, OperationMetadata, OperationResponse},
    resource::version::{HttpVersion, VersionConflict},
};
use serde_json::Value;
use std::collections::HashMap;

/// Create an error response from a ScimError.
pub fn create_error_response(error: &ScimError, request_id: String) -> OperationResponse {
    if let ScimError::PreconditionFailed(conflict) = error {
        return create_version_conflict_response(conflict, request_id);
    }

    let outcome = error.outcome();
    OperationResponse {
        outcome,
        resource: None,
        resources: None,
        version: None,
        error: Some(OperationError {
            status: outcome.status(),
            scim_type: error.scim_type().map(str::to_string),
            detail: error.to_string(),
        }),
        metadata: OperationMetadata {
            request_id,
            ..OperationMetadata::default()
        },
    }
}

/// Create a response for version conflicts.
pub fn create_version_conflict_response(
    conflict: &VersionConflict,
    request_id: String,
) -> OperationResponse {
    let current = HttpVersion::from(conflict.current.clone());
    let mut additional = HashMap::new();
    additional.insert(
        "expected_version".to_string(),
        Value::String(conflict.expected.clone()),
    );
    additional.insert(
        "current_version".to_string(),
        Value::String(current.to_string()),
    );

    let error = ScimError::PreconditionFailed(conflict.clone());
    let outcome = error.outcome();
    OperationResponse {
        outcome,
        resource: None,
        resources: None,
        version: Some(current),
        error: Some(OperationError {
            status: outcome.status(),
            scim_type: error.scim_type().map(str::to_string),
            detail: conflict.message.clone(),
        }),
        metadata: OperationMetadata {
            request_id,
            additional,
            ..OperationMetadata::default()
        },
    }
}
