//! Error handling for the civic portal
//!
//! Two layers: `ValidationError` for deterministic input problems, and
//! `PortalError` for everything a portal operation can fail with. The HTTP
//! mapping lives in `api_errors`.

use thiserror::Error;

/// Input shape problems. Always surfaced to the caller, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Invalid category: {0}")]
    InvalidCategory(String),

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid {field}: {message}")]
    InvalidField { field: String, message: String },
}

impl ValidationError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Names of the missing fields, empty for every other kind
    pub fn missing_fields(&self) -> &[String] {
        match self {
            ValidationError::MissingFields(fields) => fields,
            _ => &[],
        }
    }
}

/// Main error type for portal operations
#[derive(Error, Debug)]
pub enum PortalError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Resource not found: {resource} - {id}")]
    NotFound { resource: String, id: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Cannot cancel at this stage: application is {status}")]
    CannotCancel { status: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Storage unavailable: no document store configured")]
    StorageUnavailable,

    #[error("Storage operation failed: {operation} - {source}")]
    Storage {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type PortalResult<T> = Result<T, PortalError>;

impl PortalError {
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Wrap a failure of the storage collaborator itself
    pub fn storage(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Storage failure described only by a message
    pub fn storage_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Storage {
            operation: operation.into(),
            source: message.into(),
        }
    }

    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True when the caller supplied bad input, as opposed to the system failing
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            PortalError::Validation(_)
                | PortalError::NotFound { .. }
                | PortalError::Unauthorized { .. }
                | PortalError::Forbidden { .. }
                | PortalError::InvalidCredentials
                | PortalError::CannotCancel { .. }
                | PortalError::Conflict { .. }
        )
    }
}

impl From<sled::Error> for PortalError {
    fn from(err: sled::Error) -> Self {
        PortalError::storage("sled_operation", err)
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(err: serde_json::Error) -> Self {
        PortalError::serialization("json_operation", err)
    }
}

impl From<figment::Error> for PortalError {
    fn from(err: figment::Error) -> Self {
        PortalError::config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_message_lists_every_field() {
        let err = ValidationError::MissingFields(vec![
            "applicantName".to_string(),
            "applicantEmail".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Missing required fields: applicantName, applicantEmail"
        );
        assert_eq!(err.missing_fields().len(), 2);
    }

    #[test]
    fn test_error_chaining() {
        use std::error::Error;

        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = PortalError::storage("write logs", io_err);

        assert!(err.source().is_some());
        assert!(err.to_string().contains("Storage operation failed"));
        assert!(!err.is_user_error());
    }

    #[test]
    fn test_validation_is_user_error() {
        let err: PortalError = ValidationError::InvalidStatus("done".into()).into();
        assert!(err.is_user_error());
        assert_eq!(err.to_string(), "Invalid status: done");
    }
}
