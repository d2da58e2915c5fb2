//! Query operation handlers
//!
//! Search with filtering, paging and attribute selection.

use crate::{
    error::{OutcomeCode, ScimResult},
    operation_handler::core::{
        OperationMetadata, OperationRequest, OperationResponse, ScimOperationHandler,
    },
    resource::RequestContext,
    storage::StorageProvider,
};
use serde_json::Value;

/// Handle search operations.
pub async fn handle_search<S: StorageProvider>(
    handler: &ScimOperationHandler<S>,
    request: OperationRequest,
    context: &RequestContext,
) -> ScimResult<OperationResponse> {
    let result = handler
        .coordinator
        .search(&request.resource_type, &request.query, context)
        .await?;

    Ok(OperationResponse {
        outcome: OutcomeCode::Ok,
        resource: None,
        resources: result
            .resources
            .map(|page| page.into_iter().map(Value::Object).collect()),
        version: None,
        error: None,
        metadata: OperationMetadata {
            resource_type: Some(request.resource_type),
            resource_id: None,
            total_results: Some(result.total_results),
            start_index: Some(result.start_index),
            items_per_page: Some(result.items_per_page),
            request_id: context.request_id.clone(),
            ..OperationMetadata::default()
        },
    })
}
