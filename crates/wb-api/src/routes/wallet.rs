use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use wb_common::Wallet;

use super::{created, ok, require, Envelope};
use crate::model::{BalanceAdjustmentRequest, CreateWalletRequest};
use crate::{ApiError, AppState, Result};

/// Create a wallet for a user
#[utoipa::path(
    post,
    path = "/api/v1/wallet",
    tag = "wallet",
    request_body = CreateWalletRequest,
    responses(
        (status = 201, description = "Wallet created"),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "User already has a wallet")
    )
)]
pub async fn create_wallet(
    State(state): State<AppState>,
    Json(req): Json<CreateWalletRequest>,
) -> Result<(StatusCode, Envelope<Wallet>)> {
    require("userId", &req.user_id)?;
    require("currency", &req.currency)?;
    if req.initial_balance < 0 {
        return Err(ApiError::validation("initialBalance must not be negative"));
    }
    if state.repos.wallets.exists_by_user_id(&req.user_id).await? {
        return Err(ApiError::Conflict(format!(
            "Wallet already exists for user {}",
            req.user_id
        )));
    }

    let wallet = Wallet::new(
        req.user_id.trim(),
        req.currency.trim().to_ascii_uppercase(),
        req.initial_balance,
    );
    state.repos.wallets.insert(&wallet).await?;

    Ok(created("Wallet created", wallet))
}

/// Get a user's wallet
#[utoipa::path(
    get,
    path = "/api/v1/wallet/{user_id}",
    tag = "wallet",
    params(("user_id" = String, Path, description = "Wallet owner")),
    responses(
        (status = 200, description = "Wallet", body = Wallet),
        (status = 404, description = "No wallet for user")
    )
)]
pub async fn get_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Envelope<Wallet>> {
    let wallet = state
        .repos
        .wallets
        .find_by_user_id(&user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Wallet", &user_id))?;
    Ok(ok("Wallet retrieved", wallet))
}

/// Add funds to a wallet
#[utoipa::path(
    post,
    path = "/api/v1/wallet/{user_id}/credit",
    tag = "wallet",
    params(("user_id" = String, Path, description = "Wallet owner")),
    request_body = BalanceAdjustmentRequest,
    responses(
        (status = 200, description = "Balance updated", body = Wallet),
        (status = 404, description = "No wallet for user"),
        (status = 422, description = "Balance would exceed the maximum")
    )
)]
pub async fn credit_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<BalanceAdjustmentRequest>,
) -> Result<Envelope<Wallet>> {
    let amount = positive_amount(req.amount)?;
    let wallet = state.repos.wallets.adjust_balance(&user_id, amount).await?;
    info!(user_id = %user_id, amount, "Wallet credited");
    Ok(ok("Wallet credited", wallet))
}

/// Take funds from a wallet; the balance cannot go negative
#[utoipa::path(
    post,
    path = "/api/v1/wallet/{user_id}/debit",
    tag = "wallet",
    params(("user_id" = String, Path, description = "Wallet owner")),
    request_body = BalanceAdjustmentRequest,
    responses(
        (status = 200, description = "Balance updated", body = Wallet),
        (status = 404, description = "No wallet for user"),
        (status = 422, description = "Insufficient balance")
    )
)]
pub async fn debit_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<BalanceAdjustmentRequest>,
) -> Result<Envelope<Wallet>> {
    let amount = positive_amount(req.amount)?;
    let wallet = state.repos.wallets.adjust_balance(&user_id, -amount).await?;
    info!(user_id = %user_id, amount, "Wallet debited");
    Ok(ok("Wallet debited", wallet))
}

fn positive_amount(amount: i64) -> Result<i64> {
    if amount <= 0 {
        return Err(ApiError::validation("amount must be positive"));
    }
    Ok(amount)
}
