//! Request builder utilities for OperationRequest
//!
//! This module provides convenient builder methods for constructing
//! OperationRequest instances for different operation types.

use crate::{
    auth::Subject,
    operation_handler::core::{OperationRequest, OperationType},
    resource::ListQuery,
};
use serde_json::Value;

impl OperationRequest {
    fn new(
        operation: OperationType,
        resource_type: impl Into<String>,
        resource_id: Option<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            operation,
            resource_type: resource_type.into(),
            resource_id,
            subject: Subject::anonymous(),
            data,
            query: ListQuery::default(),
            if_match: None,
            if_none_match: None,
            request_id: None,
        }
    }

    /// Create a new create operation request.
    pub fn create(resource_type: impl Into<String>, data: Value) -> Self {
        Self::new(OperationType::Create, resource_type, None, Some(data))
    }

    /// Create a new get operation request.
    pub fn get(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self::new(OperationType::Get, resource_type, Some(resource_id.into()), None)
    }

    /// Create a new replace operation request.
    pub fn replace(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        data: Value,
    ) -> Self {
        Self::new(
            OperationType::Replace,
            resource_type,
            Some(resource_id.into()),
            Some(data),
        )
    }

    /// Create a new patch operation request from a `PatchOp` message.
    pub fn patch(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        message: Value,
    ) -> Self {
        Self::new(
            OperationType::Patch,
            resource_type,
            Some(resource_id.into()),
            Some(message),
        )
    }

    /// Create a new delete operation request.
    pub fn delete(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self::new(OperationType::Delete, resource_type, Some(resource_id.into()), None)
    }

    /// Create a new search operation request.
    pub fn search(resource_type: impl Into<String>) -> Self {
        Self::new(OperationType::Search, resource_type, None, None)
    }

    /// Act as the given subject.
    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = subject;
        self
    }

    /// Add request ID for tracing.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_if_match(mut self, token: impl Into<String>) -> Self {
        self.if_match = Some(token.into());
        self
    }

    pub fn with_if_none_match(mut self, token: impl Into<String>) -> Self {
        self.if_none_match = Some(token.into());
        self
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query = self.query.with_attributes(attributes);
        self
    }

    pub fn with_excluded_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query = self.query.with_excluded_attributes(attributes);
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.query = self.query.with_filter(filter);
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.query = self.query.with_count(count);
        self
    }

    pub fn with_start_index(mut self, start_index: usize) -> Self {
        self.query = self.query.with_start_index(start_index);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_patch_request_builder() {
        let request = OperationRequest::patch("User", "u1", json!({"Operations": []}))
            .with_subject(Subject::user("admin"))
            .with_if_match("W/\"3\"")
            .with_attributes(["userName"])
            .with_request_id("req-7");
        assert_eq!(request.operation, OperationType::Patch);
        assert_eq!(request.resource_id.as_deref(), Some("u1"));
        assert_eq!(request.if_match.as_deref(), Some("W/\"3\""));
        assert_eq!(request.query.attributes, vec!["userName"]);
        assert_eq!(request.subject, Subject::user("admin"));
    }

    #[test]
    fn test_search_request_builder() {
        let request = OperationRequest::search("Group")
            .with_filter("displayName sw \"Adm\"")
            .with_count(10)
            .with_start_index(2);
        assert!(request.resource_id.is_none());
        assert!(request.data.is_none());
        assert_eq!(request.query.count, Some(10));
        assert_eq!(request.query.start_index, Some(2));
        assert_eq!(request.subject, Subject::anonymous());
    }
}
