use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use wb_common::template::validate_components;
use wb_common::Template;

use super::{created, ok, require, Envelope};
use crate::model::{CreateTemplateRequest, TemplateListQuery, UpdateTemplateStatusRequest};
use crate::{ApiError, AppState, Result};

/// Register a template. New templates start as PENDING.
#[utoipa::path(
    post,
    path = "/api/v1/templates",
    tag = "templates",
    request_body = CreateTemplateRequest,
    responses(
        (status = 201, description = "Template created"),
        (status = 400, description = "Invalid template structure"),
        (status = 404, description = "Unknown account"),
        (status = 409, description = "Name and language already used by the account")
    )
)]
pub async fn create_template(
    State(state): State<AppState>,
    Json(req): Json<CreateTemplateRequest>,
) -> Result<(StatusCode, Envelope<Template>)> {
    require("accountId", &req.account_id)?;
    require("name", &req.name)?;
    require("language", &req.language)?;
    if req.components.is_empty() {
        return Err(ApiError::validation("components must not be empty"));
    }
    validate_components(&req.components)?;

    if state.repos.accounts.find_by_id(&req.account_id).await?.is_none() {
        return Err(ApiError::not_found("Account", &req.account_id));
    }
    if state
        .repos
        .templates
        .exists_by_name(&req.account_id, &req.name, &req.language)
        .await?
    {
        return Err(ApiError::Conflict(format!(
            "Template '{}' ({}) already exists",
            req.name, req.language
        )));
    }

    let template = Template::new(
        req.account_id,
        req.name.trim(),
        req.language.trim(),
        req.category,
        req.components,
    );
    state.repos.templates.insert(&template).await?;

    Ok(created("Template created", template))
}

/// Live templates of an account
#[utoipa::path(
    get,
    path = "/api/v1/templates",
    tag = "templates",
    params(("accountId" = String, Query, description = "Owning account id")),
    responses(
        (status = 200, description = "Templates"),
        (status = 400, description = "accountId missing")
    )
)]
pub async fn list_templates(
    State(state): State<AppState>,
    Query(query): Query<TemplateListQuery>,
) -> Result<Envelope<Vec<Template>>> {
    let account_id = query
        .account_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::validation("accountId query parameter is required"))?;

    let templates = state.repos.templates.find_by_account(&account_id).await?;
    Ok(ok("Templates retrieved", templates))
}

#[utoipa::path(
    get,
    path = "/api/v1/templates/{id}",
    tag = "templates",
    params(("id" = String, Path, description = "Template id")),
    responses(
        (status = 200, description = "Template"),
        (status = 404, description = "Unknown or deleted template")
    )
)]
pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<Template>> {
    let template = state
        .repos
        .templates
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Template", &id))?;
    Ok(ok("Template retrieved", template))
}

/// Record the review outcome (APPROVED, REJECTED, PAUSED, DISABLED)
#[utoipa::path(
    put,
    path = "/api/v1/templates/{id}/status",
    tag = "templates",
    params(("id" = String, Path, description = "Template id")),
    request_body = UpdateTemplateStatusRequest,
    responses(
        (status = 200, description = "Status updated"),
        (status = 404, description = "Unknown or deleted template")
    )
)]
pub async fn update_template_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTemplateStatusRequest>,
) -> Result<Envelope<Template>> {
    let template = state.repos.templates.update_status(&id, req.status).await?;
    Ok(ok("Template status updated", template))
}

/// Soft delete
#[utoipa::path(
    delete,
    path = "/api/v1/templates/{id}",
    tag = "templates",
    params(("id" = String, Path, description = "Template id")),
    responses(
        (status = 200, description = "Template deleted"),
        (status = 404, description = "Unknown or already deleted template")
    )
)]
pub async fn delete_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<String>> {
    state.repos.templates.soft_delete(&id).await?;
    Ok(ok("Template deleted", id))
}
