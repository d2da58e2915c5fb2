//! Error types for SCIM engine operations.
//!
//! Every failure the engine can report maps onto one [`ScimError`] variant, and
//! every variant maps onto one [`OutcomeCode`] so that transport collaborators can
//! pick a status without inspecting error internals. Only [`ScimError::Storage`]
//! is treated as fatal; everything else is recovered at the coordinator boundary.

use crate::resource::version::VersionConflict;

/// Main error type for SCIM engine operations.
#[derive(Debug, thiserror::Error)]
pub enum ScimError {
    /// The request body, filter, or patch path failed validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A unique attribute collides with another resource of the same kind
    #[error("Uniqueness conflict on '{attribute}' for {resource_type}")]
    Conflict {
        resource_type: String,
        attribute: String,
    },

    /// The supplied version token does not satisfy the precondition
    #[error("Precondition failed: {0}")]
    PreconditionFailed(VersionConflict),

    /// `ifNoneMatch` matched the current version on a read
    #[error("Resource not modified")]
    NotModified,

    /// The subject's grant does not cover the operation.
    ///
    /// Deliberately carries no resource identity so that a forbidden read never
    /// confirms the resource exists.
    #[error("Forbidden: {operation} on {resource_type}")]
    Forbidden {
        resource_type: String,
        operation: String,
    },

    /// Resource not found errors
    #[error("Resource not found: {resource_type} with ID {id}")]
    ResourceNotFound { resource_type: String, id: String },

    /// Unknown resource kind
    #[error("Unsupported resource type: {0}")]
    UnsupportedResourceType(String),

    /// Malformed operation envelope (missing id, missing body, ...)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backing storage failure, the only fatal class
    #[error("Storage failure: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

/// Validation errors for schema compliance, filter and path checking.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Required attribute is missing
    #[error("Required attribute '{attribute}' is missing")]
    MissingRequiredAttribute { attribute: String },

    /// Attribute value doesn't match expected type
    #[error("Attribute '{attribute}' has invalid type, expected {expected}, got {actual}")]
    InvalidAttributeType {
        attribute: String,
        expected: String,
        actual: String,
    },

    /// Multi-valued attribute provided as single value
    #[error("Attribute '{attribute}' must be multi-valued (array)")]
    ExpectedMultiValue { attribute: String },

    /// Single-valued attribute provided as array
    #[error("Attribute '{attribute}' must be single-valued (not array)")]
    ExpectedSingleValue { attribute: String },

    /// Unknown attribute in resource or path
    #[error("Unknown attribute '{attribute}' for resource type '{resource_type}'")]
    UnknownAttribute {
        attribute: String,
        resource_type: String,
    },

    /// Unknown sub-attribute in complex attribute
    #[error("Complex attribute '{attribute}' contains unknown sub-attribute '{sub_attribute}'")]
    UnknownSubAttribute {
        attribute: String,
        sub_attribute: String,
    },

    /// Immutable attribute changed after it was set
    #[error("Attribute '{attribute}' is immutable and cannot be modified after creation")]
    ImmutableMutabilityViolation { attribute: String },

    /// Datetime value failed RFC 3339 parsing
    #[error("Attribute '{attribute}' has invalid datetime format: {value}")]
    InvalidDateTimeFormat { attribute: String, value: String },

    /// Literal in a filter cannot be compared with the attribute's type
    #[error("Filter literal '{literal}' is not valid for {expected} attribute '{attribute}'")]
    MalformedLiteral {
        attribute: String,
        expected: String,
        literal: String,
    },

    /// Operator not applicable to the attribute's type
    #[error("Operator '{operator}' cannot be applied to {attribute_type} attribute '{attribute}'")]
    UnsupportedOperator {
        attribute: String,
        attribute_type: String,
        operator: String,
    },

    /// Filter text failed to parse
    #[error("Invalid filter at position {position}: {message}")]
    InvalidFilter { position: usize, message: String },

    /// Patch path failed to parse or resolve
    #[error("Invalid path '{path}': {message}")]
    InvalidPath { path: String, message: String },

    /// Element-scoped condition written outside a single bracketed group
    #[error("Ambiguous selector '{path}': element conditions must be written as attr[...]")]
    AmbiguousFilter { path: String },

    /// Patch target selector matched nothing
    #[error("No target matched path '{path}'")]
    NoTarget { path: String },

    /// Member reference does not resolve to an existing resource
    #[error("Attribute '{attribute}' contains broken reference: {reference}")]
    BrokenReference {
        attribute: String,
        reference: String,
    },

    /// Multiple primary values in multi-valued attribute
    #[error("Attribute '{attribute}' cannot have multiple primary values")]
    MultiplePrimaryValues { attribute: String },

    /// General validation error with custom message
    #[error("Validation failed: {message}")]
    Custom { message: String },
}

/// Outcome codes handed to transport collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeCode {
    Ok,
    Created,
    NoContent,
    NotModified,
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
    PreconditionFailed,
    ServerError,
}

impl OutcomeCode {
    /// HTTP-equivalent status number.
    pub fn status(self) -> u16 {
        match self {
            OutcomeCode::Ok => 200,
            OutcomeCode::Created => 201,
            OutcomeCode::NoContent => 204,
            OutcomeCode::NotModified => 304,
            OutcomeCode::BadRequest => 400,
            OutcomeCode::Forbidden => 403,
            OutcomeCode::NotFound => 404,
            OutcomeCode::Conflict => 409,
            OutcomeCode::PreconditionFailed => 412,
            OutcomeCode::ServerError => 500,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            OutcomeCode::Ok | OutcomeCode::Created | OutcomeCode::NoContent
        )
    }
}

impl ScimError {
    /// Create a resource not found error
    pub fn resource_not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn forbidden(resource_type: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Forbidden {
            resource_type: resource_type.into(),
            operation: operation.into(),
        }
    }

    pub fn conflict(resource_type: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Conflict {
            resource_type: resource_type.into(),
            attribute: attribute.into(),
        }
    }

    /// Map this error to the outcome code reported to the transport layer.
    pub fn outcome(&self) -> OutcomeCode {
        match self {
            ScimError::Validation(_)
            | ScimError::InvalidRequest { .. }
            | ScimError::UnsupportedResourceType(_)
            | ScimError::Json(_) => OutcomeCode::BadRequest,
            ScimError::Conflict { .. } => OutcomeCode::Conflict,
            ScimError::PreconditionFailed(_) => OutcomeCode::PreconditionFailed,
            ScimError::NotModified => OutcomeCode::NotModified,
            ScimError::Forbidden { .. } => OutcomeCode::Forbidden,
            ScimError::ResourceNotFound { .. } => OutcomeCode::NotFound,
            ScimError::Storage(_) => OutcomeCode::ServerError,
        }
    }

    /// SCIM `scimType` detail for bad-request style errors, RFC 7644 §3.12.
    pub fn scim_type(&self) -> Option<&'static str> {
        match self {
            ScimError::Validation(ve) => Some(match ve {
                ValidationError::InvalidFilter { .. }
                | ValidationError::MalformedLiteral { .. }
                | ValidationError::UnsupportedOperator { .. } => "invalidFilter",
                ValidationError::InvalidPath { .. } | ValidationError::AmbiguousFilter { .. } => {
                    "invalidPath"
                }
                ValidationError::NoTarget { .. } => "noTarget",
                ValidationError::ImmutableMutabilityViolation { .. } => "mutability",
                _ => "invalidValue",
            }),
            ScimError::Conflict { .. } => Some("uniqueness"),
            ScimError::PreconditionFailed(_) => Some("invalidVers"),
            _ => None,
        }
    }

    /// Whether this error should abort the caller rather than be reported.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScimError::Storage(_))
    }
}

impl ValidationError {
    /// Create a missing required attribute error
    pub fn missing_required(attribute: impl Into<String>) -> Self {
        Self::MissingRequiredAttribute {
            attribute: attribute.into(),
        }
    }

    /// Create an invalid type error
    pub fn invalid_type(
        attribute: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::InvalidAttributeType {
            attribute: attribute.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a custom validation error
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }
}

// Result type aliases for convenience
pub type ScimResult<T> = Result<T, ScimError>;
pub type ValidationResult<T> = Result<T, ValidationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = ScimError::resource_not_found("User", "123");
        assert!(error.to_string().contains("User"));
        assert!(error.to_string().contains("123"));
        assert_eq!(error.outcome(), OutcomeCode::NotFound);
    }

    #[test]
    fn test_validation_error_maps_to_bad_request() {
        let scim_error = ScimError::from(ValidationError::missing_required("userName"));
        assert!(scim_error.to_string().contains("Validation error"));
        assert_eq!(scim_error.outcome(), OutcomeCode::BadRequest);
        assert_eq!(scim_error.scim_type(), Some("invalidValue"));
    }

    #[test]
    fn test_filter_errors_report_invalid_filter() {
        let error = ScimError::from(ValidationError::InvalidFilter {
            position: 12,
            message: "missing value".into(),
        });
        assert_eq!(error.scim_type(), Some("invalidFilter"));
        assert_eq!(error.outcome().status(), 400);
    }

    #[test]
    fn test_forbidden_hides_resource_identity() {
        let error = ScimError::forbidden("User", "read");
        assert_eq!(error.outcome(), OutcomeCode::Forbidden);
        assert!(!error.to_string().contains("ID"));
        assert!(!error.is_fatal());
    }
}
