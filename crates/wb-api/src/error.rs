//! API error type and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use tracing::error;

use wb_common::{ApiResponse, BroadcastDispatchResponse, TemplateError};
use wb_dispatch::DispatchError;
use wb_store::StoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    #[error("Media upload failed: {message}")]
    MediaUpload {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Batch-level broadcast failure, rendered as a dispatch response
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn upload(message: impl Into<String>, source: Option<std::io::Error>) -> Self {
        Self::MediaUpload {
            message: message.into(),
            source,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Template(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::MediaUpload { source: None, .. } => StatusCode::BAD_REQUEST,
            ApiError::MediaUpload { source: Some(_), .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Store(e) => match e {
                StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                StoreError::Duplicate(_) => StatusCode::CONFLICT,
                StoreError::InsufficientBalance { .. } | StoreError::BalanceOverflow { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Dispatch(e) => match e {
                DispatchError::TemplateNotFound(_) | DispatchError::AccountNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                DispatchError::TemplateNotApproved { .. }
                | DispatchError::NoRecipients
                | DispatchError::InvalidSchedule(_)
                | DispatchError::Template(_)
                | DispatchError::Csv(_) => StatusCode::BAD_REQUEST,
                DispatchError::ShutdownInProgress => StatusCode::SERVICE_UNAVAILABLE,
                DispatchError::Store(_) | DispatchError::Http(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, error_debug = ?self, "Request failed");
        }

        match self {
            ApiError::Dispatch(e) => {
                (status, Json(BroadcastDispatchResponse::failed(e.to_string()))).into_response()
            }
            other => (status, Json(ApiResponse::<()>::error(other.to_string()))).into_response(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::not_found("Wallet", "u1").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(StoreError::Duplicate("wallet".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(DispatchError::TemplateNotFound("t".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(DispatchError::ShutdownInProgress).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ApiError::upload("empty body", None).status_code(), StatusCode::BAD_REQUEST);
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(
            ApiError::upload("write failed", Some(io)).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_upload_error_keeps_source() {
        use std::error::Error as _;
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = ApiError::upload("could not store file", Some(io));
        assert_eq!(err.to_string(), "Media upload failed: could not store file");
        assert!(err.source().is_some());
    }
}
