//! CRUD operation handlers
//!
//! This module contains handlers for Create, Get, Replace, Patch and Delete
//! operations, plus the response assembly they share.

use crate::{
    ScimError,
    error::{OutcomeCode, ScimResult},
    operation_handler::core::{
        OperationMetadata, OperationRequest, OperationResponse, ScimOperationHandler,
    },
    patch::PatchRequest,
    providers::ResourceResult,
    resource::RequestContext,
    storage::StorageProvider,
};
use serde_json::Value;

fn require_id(request: &OperationRequest, operation: &str) -> ScimResult<String> {
    request
        .resource_id
        .clone()
        .ok_or_else(|| ScimError::invalid_request(format!("Missing resource_id for {} operation", operation)))
}

fn require_data(request: &mut OperationRequest, operation: &str) -> ScimResult<Value> {
    request
        .data
        .take()
        .ok_or_else(|| ScimError::invalid_request(format!("Missing data for {} operation", operation)))
}

/// Build the response for a single-resource result.
fn single_resource_response(
    outcome: OutcomeCode,
    resource_type: String,
    result: ResourceResult,
    context: &RequestContext,
) -> OperationResponse {
    OperationResponse {
        outcome,
        resource: result.resource.map(Value::Object),
        resources: None,
        version: Some(result.version),
        error: None,
        metadata: OperationMetadata {
            resource_type: Some(resource_type),
            resource_id: Some(result.id),
            request_id: context.request_id.clone(),
            ..OperationMetadata::default()
        },
    }
}

/// Handle create operations.
pub async fn handle_create<S: StorageProvider>(
    handler: &ScimOperationHandler<S>,
    mut request: OperationRequest,
    context: &RequestContext,
) -> ScimResult<OperationResponse> {
    let data = require_data(&mut request, "create")?;
    let result = handler
        .coordinator
        .create(&request.resource_type, &data, &request.query.selection(), context)
        .await?;
    Ok(single_resource_response(
        OutcomeCode::Created,
        request.resource_type,
        result,
        context,
    ))
}

/// Handle get operations.
pub async fn handle_get<S: StorageProvider>(
    handler: &ScimOperationHandler<S>,
    request: OperationRequest,
    context: &RequestContext,
) -> ScimResult<OperationResponse> {
    let resource_id = require_id(&request, "get")?;
    let preconditions = ScimOperationHandler::<S>::preconditions(&request)?;
    let result = handler
        .coordinator
        .get(
            &request.resource_type,
            &resource_id,
            &preconditions,
            &request.query.selection(),
            context,
        )
        .await?;
    Ok(single_resource_response(
        OutcomeCode::Ok,
        request.resource_type,
        result,
        context,
    ))
}

/// Handle replace operations.
pub async fn handle_replace<S: StorageProvider>(
    handler: &ScimOperationHandler<S>,
    mut request: OperationRequest,
    context: &RequestContext,
) -> ScimResult<OperationResponse> {
    let resource_id = require_id(&request, "replace")?;
    let data = require_data(&mut request, "replace")?;
    let preconditions = ScimOperationHandler::<S>::preconditions(&request)?;
    let result = handler
        .coordinator
        .replace(
            &request.resource_type,
            &resource_id,
            &data,
            &preconditions,
            &request.query.selection(),
            context,
        )
        .await?;
    Ok(single_resource_response(
        OutcomeCode::Ok,
        request.resource_type,
        result,
        context,
    ))
}

/// Handle patch operations.
///
/// Without requested attributes the response carries no body and reports
/// `NoContent`.
pub async fn handle_patch<S: StorageProvider>(
    handler: &ScimOperationHandler<S>,
    mut request: OperationRequest,
    context: &RequestContext,
) -> ScimResult<OperationResponse> {
    let resource_id = require_id(&request, "patch")?;
    let data = require_data(&mut request, "patch")?;
    let patch = PatchRequest::from_json(&data)?;
    let preconditions = ScimOperationHandler::<S>::preconditions(&request)?;
    let result = handler
        .coordinator
        .patch(
            &request.resource_type,
            &resource_id,
            &patch,
            &preconditions,
            &request.query.selection(),
            context,
        )
        .await?;
    let outcome = if result.resource.is_some() {
        OutcomeCode::Ok
    } else {
        OutcomeCode::NoContent
    };
    Ok(single_resource_response(
        outcome,
        request.resource_type,
        result,
        context,
    ))
}

/// Handle delete operations.
pub async fn handle_delete<S: StorageProvider>(
    handler: &ScimOperationHandler<S>,
    request: OperationRequest,
    context: &RequestContext,
) -> ScimResult<OperationResponse> {
    let resource_id = require_id(&request, "delete")?;
    let preconditions = ScimOperationHandler::<S>::preconditions(&request)?;
    handler
        .coordinator
        .delete(&request.resource_type, &resource_id, &preconditions, context)
        .await?;

    Ok(OperationResponse {
        outcome: OutcomeCode::NoContent,
        resource: None,
        resources: None,
        version: None,
        error: None,
        metadata: OperationMetadata {
            resource_type: Some(request.resource_type),
            resource_id: Some(resource_id),
            request_id: context.request_id.clone(),
            ..OperationMetadata::default()
        },
    })
}
