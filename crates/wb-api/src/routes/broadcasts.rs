//! Broadcast dispatch endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use wb_common::{ApiResponse, BroadcastDispatchResponse};
use wb_dispatch::{BatchSnapshot, BatchTicket, BroadcastRequest, RecipientSource};

use super::Envelope;
use crate::model::{BroadcastRequestBody, CsvBroadcastQuery};
use crate::{ApiError, AppState, Result};

impl From<BroadcastRequestBody> for BroadcastRequest {
    fn from(body: BroadcastRequestBody) -> Self {
        let mut request = BroadcastRequest::new(
            body.template_id,
            body.user_id,
            RecipientSource::Numbers(body.recipients),
        )
        .with_carousel(body.carousel);
        request.media = body.media;
        request.scheduled_at = body.scheduled_at;
        request.idempotency_key = body.idempotency_key;
        request
    }
}

/// Send a broadcast and wait for every recipient
///
/// Batch-level problems such as an unapproved template return a failed
/// response with zero counts.
#[utoipa::path(
    post,
    path = "/api/v1/broadcasts/dispatch",
    tag = "broadcasts",
    request_body = BroadcastRequestBody,
    responses(
        (status = 200, description = "Broadcast finished", body = BroadcastDispatchResponse),
        (status = 400, description = "Broadcast rejected", body = BroadcastDispatchResponse),
        (status = 404, description = "Template or account not found",
            body = BroadcastDispatchResponse),
        (status = 503, description = "Shutting down", body = BroadcastDispatchResponse)
    )
)]
pub async fn dispatch_broadcast(
    State(state): State<AppState>,
    Json(body): Json<BroadcastRequestBody>,
) -> Result<Json<BroadcastDispatchResponse>> {
    let data = state.dispatcher.dispatch(body.into()).await?;
    Ok(Json(BroadcastDispatchResponse::completed(data)))
}

/// Send a broadcast to the numbers in a CSV body
#[utoipa::path(
    post,
    path = "/api/v1/broadcasts/csv",
    tag = "broadcasts",
    params(
        ("templateId" = String, Query, description = "Template to send"),
        ("userId" = String, Query, description = "Owner of the sending account")
    ),
    request_body(content = String, content_type = "text/csv"),
    responses(
        (status = 200, description = "Broadcast finished", body = BroadcastDispatchResponse),
        (status = 400, description = "Broadcast rejected", body = BroadcastDispatchResponse)
    )
)]
pub async fn dispatch_csv_broadcast(
    State(state): State<AppState>,
    Query(query): Query<CsvBroadcastQuery>,
    csv: String,
) -> Result<Json<BroadcastDispatchResponse>> {
    let data = state
        .dispatcher
        .dispatch_csv(&query.template_id, &query.user_id, csv)
        .await?;
    Ok(Json(BroadcastDispatchResponse::completed(data)))
}

/// Accept a broadcast for background delivery
#[utoipa::path(
    post,
    path = "/api/v1/broadcasts",
    tag = "broadcasts",
    request_body = BroadcastRequestBody,
    responses(
        (status = 202, description = "Broadcast accepted", body = BatchTicket),
        (status = 400, description = "Broadcast rejected", body = BroadcastDispatchResponse),
        (status = 404, description = "Template or account not found",
            body = BroadcastDispatchResponse)
    )
)]
pub async fn submit_broadcast(
    State(state): State<AppState>,
    Json(body): Json<BroadcastRequestBody>,
) -> Result<(StatusCode, Envelope<BatchTicket>)> {
    let ticket = state.dispatcher.submit(body.into()).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success("Broadcast accepted", ticket)),
    ))
}

/// Accept a CSV broadcast for background delivery
#[utoipa::path(
    post,
    path = "/api/v1/broadcasts/csv/submit",
    tag = "broadcasts",
    params(
        ("templateId" = String, Query, description = "Template to send"),
        ("userId" = String, Query, description = "Owner of the sending account")
    ),
    request_body(content = String, content_type = "text/csv"),
    responses(
        (status = 202, description = "Broadcast accepted", body = BatchTicket),
        (status = 400, description = "Broadcast rejected", body = BroadcastDispatchResponse)
    )
)]
pub async fn submit_csv_broadcast(
    State(state): State<AppState>,
    Query(query): Query<CsvBroadcastQuery>,
    csv: String,
) -> Result<(StatusCode, Envelope<BatchTicket>)> {
    let ticket = state
        .dispatcher
        .submit_csv(&query.template_id, &query.user_id, csv)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success("Broadcast accepted", ticket)),
    ))
}

/// Progress or final report of a submitted broadcast
#[utoipa::path(
    get,
    path = "/api/v1/broadcasts/{batch_id}",
    tag = "broadcasts",
    params(("batch_id" = Uuid, Path, description = "Batch id from the submission ticket")),
    responses(
        (status = 200, description = "Batch state", body = BatchSnapshot),
        (status = 404, description = "Unknown or evicted batch")
    )
)]
pub async fn get_broadcast(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Envelope<BatchSnapshot>> {
    let snapshot = state
        .dispatcher
        .batch_status(batch_id)
        .ok_or_else(|| ApiError::not_found("Broadcast", batch_id.to_string()))?;
    Ok(Json(ApiResponse::success("Broadcast retrieved", snapshot)))
}
