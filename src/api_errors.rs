//! HTTP error responses: every failure becomes a status code and a JSON `{error}` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::errors::PortalError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrBody {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.status();
        (code, Json(ErrBody { error: self.to_string() })).into_response()
    }
}

// Input problems keep their message; system failures are reported generically
// so storage details never reach the end user.
impl From<PortalError> for AppError {
    fn from(err: PortalError) -> Self {
        match err {
            PortalError::Validation(e) => AppError::BadRequest(e.to_string()),
            PortalError::NotFound { resource, id } => {
                AppError::NotFound(format!("{resource} '{id}' not found"))
            }
            PortalError::Unauthorized { message } => AppError::Unauthorized(message),
            PortalError::InvalidCredentials => {
                AppError::Unauthorized("Invalid email or password".to_string())
            }
            PortalError::Forbidden { message } => AppError::Forbidden(message),
            PortalError::CannotCancel { status } => AppError::Conflict(format!(
                "Application cannot be cancelled at this stage (status: {status})"
            )),
            PortalError::Conflict { message } => AppError::Conflict(message),
            PortalError::StorageUnavailable => AppError::Unavailable(
                "The system could not complete this action: storage is unavailable".to_string(),
            ),
            PortalError::Storage { .. }
            | PortalError::Serialization { .. }
            | PortalError::Config { .. }
            | PortalError::Internal { .. } => AppError::Internal(
                "The system could not complete this action, please try again later".to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ValidationError;

    #[test]
    fn validation_maps_to_bad_request_with_message() {
        let err: AppError =
            PortalError::from(ValidationError::InvalidEmail("nope".into())).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn storage_failure_hides_details() {
        let err: AppError = PortalError::storage_msg("commit", "quota exceeded").into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.to_string().contains("quota"));
    }

    #[test]
    fn cannot_cancel_is_conflict() {
        let err: AppError = PortalError::CannotCancel {
            status: "approved".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
