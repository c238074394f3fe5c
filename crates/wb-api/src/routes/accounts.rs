use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use wb_common::WhatsAppAccount;

use super::{created, ok, require, Envelope};
use crate::model::CreateAccountRequest;
use crate::{ApiError, AppState, Result};

/// Register a WhatsApp Business phone number for a user
#[utoipa::path(
    post,
    path = "/api/v1/accounts",
    tag = "accounts",
    request_body = CreateAccountRequest,
    responses(
        (status = 201, description = "Account registered"),
        (status = 409, description = "Phone number id already registered")
    )
)]
pub async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Envelope<WhatsAppAccount>)> {
    require("userId", &req.user_id)?;
    require("wabaId", &req.waba_id)?;
    require("phoneNumberId", &req.phone_number_id)?;
    require("accessToken", &req.access_token)?;

    if state
        .repos
        .accounts
        .exists_by_phone_number_id(&req.phone_number_id)
        .await?
    {
        return Err(ApiError::Conflict(format!(
            "Phone number id {} is already registered",
            req.phone_number_id
        )));
    }

    let mut account = WhatsAppAccount::new(
        req.user_id.trim(),
        req.waba_id.trim(),
        req.phone_number_id.trim(),
        req.access_token,
    );
    account.display_phone_number = req.display_phone_number;
    state.repos.accounts.insert(&account).await?;

    Ok(created("Account registered", account))
}

/// Account used to send on behalf of a user
#[utoipa::path(
    get,
    path = "/api/v1/accounts/user/{user_id}",
    tag = "accounts",
    params(("user_id" = String, Path, description = "Account owner")),
    responses(
        (status = 200, description = "Account"),
        (status = 404, description = "No account for user")
    )
)]
pub async fn get_account_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Envelope<WhatsAppAccount>> {
    let account = state
        .repos
        .accounts
        .find_by_user_id(&user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Account", &user_id))?;
    Ok(ok("Account retrieved", account))
}
