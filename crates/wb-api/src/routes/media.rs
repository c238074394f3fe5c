//! Broadcast media records and raw uploads
//!
//! Uploads are stored under the configured upload directory with a generated
//! name and served back by the static media route under `url_prefix`.

use std::path::Path as FsPath;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use bytes::Bytes;
use tracing::{error, info};
use uuid::Uuid;

use wb_common::{BroadcastMedia, MediaType};

use super::{created, ok, require, Envelope};
use crate::model::{CreateBroadcastMediaRequest, UploadResponse};
use crate::{ApiError, AppState, Result};

/// Attach a media URL to a broadcast
#[utoipa::path(
    post,
    path = "/api/v1/broadcast-media",
    tag = "media",
    request_body = CreateBroadcastMediaRequest,
    responses(
        (status = 201, description = "Media attached", body = BroadcastMedia),
        (status = 400, description = "Invalid request")
    )
)]
pub async fn create_broadcast_media(
    State(state): State<AppState>,
    Json(req): Json<CreateBroadcastMediaRequest>,
) -> Result<(StatusCode, Envelope<BroadcastMedia>)> {
    require("broadcastId", &req.broadcast_id)?;
    require("url", &req.url)?;

    let media = BroadcastMedia::new(req.broadcast_id.trim(), req.media_type, req.url.trim());
    state.repos.media.insert(&media).await?;
    Ok(created("Broadcast media created", media))
}

/// Live media of a broadcast
#[utoipa::path(
    get,
    path = "/api/v1/broadcast-media/{id}",
    tag = "media",
    params(("id" = String, Path, description = "Broadcast id")),
    responses((status = 200, description = "Media records", body = Vec<BroadcastMedia>))
)]
pub async fn list_broadcast_media(
    State(state): State<AppState>,
    Path(broadcast_id): Path<String>,
) -> Result<Envelope<Vec<BroadcastMedia>>> {
    let media = state.repos.media.find_by_broadcast_id(&broadcast_id).await?;
    Ok(ok("Broadcast media retrieved", media))
}

/// Soft delete a media record
#[utoipa::path(
    delete,
    path = "/api/v1/broadcast-media/{id}",
    tag = "media",
    params(("id" = String, Path, description = "Media record id")),
    responses(
        (status = 200, description = "Media deleted"),
        (status = 404, description = "Unknown or already deleted media")
    )
)]
pub async fn delete_broadcast_media(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<String>> {
    state.repos.media.soft_delete(&id).await?;
    Ok(ok("Broadcast media deleted", id))
}

/// Store the raw request body as a media file
#[utoipa::path(
    post,
    path = "/api/v1/media/upload",
    tag = "media",
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 201, description = "File stored", body = UploadResponse),
        (status = 400, description = "Empty body or unsupported content type"),
        (status = 413, description = "File too large")
    )
)]
pub async fn upload_media(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Envelope<UploadResponse>)> {
    if body.is_empty() {
        return Err(ApiError::upload("request body is empty", None));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::upload("Content-Type header is required", None))?;
    let media_type = MediaType::from_content_type(content_type)
        .map_err(|e| ApiError::upload(e.to_string(), None))?;

    let file_name = format!("{}.{}", Uuid::new_v4().simple(), extension_for(content_type));
    let dir = state.upload_dir();
    write_file(&dir, &file_name, &body).await?;

    let url = format!(
        "{}/{}",
        state.media.url_prefix.trim_end_matches('/'),
        file_name
    );
    info!(file = %file_name, size = body.len(), media_type = %media_type, "Media uploaded");

    Ok(created(
        "Media uploaded",
        UploadResponse {
            url,
            file_name,
            media_type,
            size: body.len(),
        },
    ))
}

async fn write_file(dir: &FsPath, file_name: &str, body: &[u8]) -> Result<()> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        error!(dir = %dir.display(), error = %e, "Could not create upload directory");
        ApiError::upload("could not create upload directory", Some(e))
    })?;

    tokio::fs::write(dir.join(file_name), body).await.map_err(|e| {
        error!(file = %file_name, error = %e, "Could not write uploaded file");
        ApiError::upload("could not store uploaded file", Some(e))
    })
}

fn extension_for(content_type: &str) -> &'static str {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    match essence.to_ascii_lowercase().as_str() {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/3gpp" => "3gp",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        "audio/aac" => "aac",
        "audio/mp4" => "m4a",
        "audio/amr" => "amr",
        "application/pdf" => "pdf",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "text/plain" => "txt",
        _ => "bin",
    }
}
