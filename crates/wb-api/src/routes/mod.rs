//! Route handlers, one module per resource

pub mod accounts;
pub mod broadcasts;
pub mod countries;
pub mod health;
pub mod media;
pub mod templates;
pub mod wallet;

use axum::{http::StatusCode, Json};
use wb_common::ApiResponse;

pub(crate) type Envelope<T> = Json<ApiResponse<T>>;

pub(crate) fn ok<T>(message: &str, data: T) -> Envelope<T> {
    Json(ApiResponse::success(message, data))
}

pub(crate) fn created<T>(message: &str, data: T) -> (StatusCode, Envelope<T>) {
    (StatusCode::CREATED, ok(message, data))
}

/// Reject blank required fields
pub(crate) fn require(field: &str, value: &str) -> crate::Result<()> {
    if value.trim().is_empty() {
        return Err(crate::ApiError::validation(format!("{} is required", field)));
    }
    Ok(())
}
