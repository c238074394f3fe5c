use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use wb_common::Country;

use super::{created, ok, require, Envelope};
use crate::model::CreateCountryRequest;
use crate::{ApiError, AppState, Result};

/// Add a country with its per-message price
#[utoipa::path(
    post,
    path = "/api/v1/countries",
    tag = "countries",
    request_body = CreateCountryRequest,
    responses(
        (status = 201, description = "Country created", body = Country),
        (status = 400, description = "Invalid ISO or dial code"),
        (status = 409, description = "ISO code already exists")
    )
)]
pub async fn create_country(
    State(state): State<AppState>,
    Json(req): Json<CreateCountryRequest>,
) -> Result<(StatusCode, Envelope<Country>)> {
    require("name", &req.name)?;

    let iso = req.iso_code.trim();
    if iso.len() != 2 || !iso.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ApiError::validation("isoCode must be two letters"));
    }
    let dial = req.dial_code.trim().trim_start_matches('+');
    if dial.is_empty() || dial.len() > 4 || !dial.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::validation("dialCode must be 1 to 4 digits"));
    }
    if req.message_price_minor < 0 {
        return Err(ApiError::validation("messagePriceMinor must not be negative"));
    }
    if state.repos.countries.exists_by_iso_code(iso).await? {
        return Err(ApiError::Conflict(format!(
            "Country {} already exists",
            iso.to_ascii_uppercase()
        )));
    }

    let country = Country::new(req.name.trim(), iso, dial, req.message_price_minor);
    state.repos.countries.insert(&country).await?;

    Ok(created("Country created", country))
}

/// All countries, by name
#[utoipa::path(
    get,
    path = "/api/v1/countries",
    tag = "countries",
    responses((status = 200, description = "Countries", body = Vec<Country>))
)]
pub async fn list_countries(State(state): State<AppState>) -> Result<Envelope<Vec<Country>>> {
    let countries = state.repos.countries.list().await?;
    Ok(ok("Countries retrieved", countries))
}

#[utoipa::path(
    get,
    path = "/api/v1/countries/{iso_code}",
    tag = "countries",
    params(("iso_code" = String, Path, description = "ISO 3166-1 alpha-2 code")),
    responses(
        (status = 200, description = "Country", body = Country),
        (status = 404, description = "Unknown country")
    )
)]
pub async fn get_country(
    State(state): State<AppState>,
    Path(iso_code): Path<String>,
) -> Result<Envelope<Country>> {
    let country = state
        .repos
        .countries
        .find_by_iso_code(&iso_code)
        .await?
        .ok_or_else(|| ApiError::not_found("Country", &iso_code))?;
    Ok(ok("Country retrieved", country))
}
