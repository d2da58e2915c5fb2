//! Storage-level errors.
//!
//! These are failures of the backing store itself and carry no SCIM meaning;
//! the engine treats every one of them as fatal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend cannot be reached or refused the operation
    #[error("Storage unavailable: {message}")]
    Unavailable { message: String },

    /// A stored record could not be decoded
    #[error("Corrupt record {resource_type}/{id}: {details}")]
    DataCorruption {
        resource_type: String,
        id: String,
        details: String,
    },

    /// A record could not be encoded for storage
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Error raised by a backend's own error type
    #[error("Storage backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StorageError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn corruption(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self::DataCorruption {
            resource_type: resource_type.into(),
            id: id.into(),
            details: details.into(),
        }
    }

    /// Wrap an arbitrary backend error.
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_backend_keeps_source() {
        let io = std::io::Error::other("disk on fire");
        let err = StorageError::backend(io);
        assert_eq!(err.to_string(), "Storage backend error: disk on fire");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_corruption_display() {
        let err = StorageError::corruption("User", "42", "missing version");
        assert_eq!(err.to_string(), "Corrupt record User/42: missing version");
    }
}
