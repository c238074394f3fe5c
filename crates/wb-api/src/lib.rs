//! WaBroadcast HTTP API
//!
//! HTTP API endpoints for:
//! - Wallets, WhatsApp accounts, templates and countries
//! - Broadcast media records and media uploads
//! - Broadcast dispatch (sync, CSV, async with polling)
//! - Health checks, executor monitoring and Prometheus metrics
//! - Static serving of uploaded media

use std::path::PathBuf;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue},
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use wb_config::MediaConfig;
use wb_dispatch::BroadcastDispatcher;
use wb_store::Repositories;

pub mod error;
pub mod model;
pub mod routes;

pub use error::{ApiError, Result};

use routes::{accounts, broadcasts, countries, health, media, templates, wallet};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub repos: Repositories,
    pub dispatcher: BroadcastDispatcher,
    pub media: MediaConfig,
    /// Absent when no recorder is installed (tests)
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn upload_dir(&self) -> PathBuf {
        PathBuf::from(&self.media.upload_dir)
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "WaBroadcast API",
        version = "0.1.0",
        description = "WhatsApp Business template management and broadcast dispatch"
    ),
    paths(
        health::health_handler,
        health::liveness,
        health::readiness,
        health::executor_stats_handler,
        health::metrics_handler,
        wallet::create_wallet,
        wallet::get_wallet,
        wallet::credit_wallet,
        wallet::debit_wallet,
        templates::create_template,
        templates::list_templates,
        templates::get_template,
        templates::update_template_status,
        templates::delete_template,
        accounts::create_account,
        accounts::get_account_by_user,
        countries::create_country,
        countries::list_countries,
        countries::get_country,
        media::create_broadcast_media,
        media::list_broadcast_media,
        media::delete_broadcast_media,
        media::upload_media,
        broadcasts::dispatch_broadcast,
        broadcasts::dispatch_csv_broadcast,
        broadcasts::submit_broadcast,
        broadcasts::submit_csv_broadcast,
        broadcasts::get_broadcast,
    ),
    components(schemas(
        model::CreateWalletRequest,
        model::BalanceAdjustmentRequest,
        model::CreateTemplateRequest,
        model::UpdateTemplateStatusRequest,
        model::CreateAccountRequest,
        model::CreateCountryRequest,
        model::CreateBroadcastMediaRequest,
        model::UploadResponse,
        model::BroadcastRequestBody,
        model::SimpleHealthResponse,
        model::HealthCheckResponse,
        wb_common::BroadcastDispatchResponse,
        wb_common::DispatchResultData,
        wb_common::Wallet,
        wb_common::Country,
        wb_common::BroadcastMedia,
        wb_dispatch::ExecutorStats,
        wb_dispatch::BatchTicket,
        wb_dispatch::BatchSnapshot,
    )),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "monitoring", description = "Monitoring and metrics endpoints"),
        (name = "wallet", description = "Wallet management"),
        (name = "templates", description = "Message template management"),
        (name = "accounts", description = "WhatsApp Business accounts"),
        (name = "countries", description = "Country pricing"),
        (name = "media", description = "Broadcast media and uploads"),
        (name = "broadcasts", description = "Broadcast dispatch"),
    )
)]
pub struct ApiDoc;

/// Create the full router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let cache_control = HeaderValue::from_str(&format!(
        "public, max-age={}",
        state.media.cache_max_age_secs
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("public, max-age=604800"));

    let static_media = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(header::CACHE_CONTROL, cache_control))
        .service(ServeDir::new(state.upload_dir()));

    let media_prefix = normalize_prefix(&state.media.url_prefix);
    let upload_limit = state.media.max_upload_bytes;

    Router::new()
        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        // Health and monitoring
        .route("/health", get(health::health_handler))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/monitoring/executor", get(health::executor_stats_handler))
        .route("/metrics", get(health::metrics_handler))
        // Wallets
        .route("/api/v1/wallet", post(wallet::create_wallet))
        .route("/api/v1/wallet/{user_id}", get(wallet::get_wallet))
        .route("/api/v1/wallet/{user_id}/credit", post(wallet::credit_wallet))
        .route("/api/v1/wallet/{user_id}/debit", post(wallet::debit_wallet))
        // Templates
        .route(
            "/api/v1/templates",
            post(templates::create_template).get(templates::list_templates),
        )
        .route(
            "/api/v1/templates/{id}",
            get(templates::get_template).delete(templates::delete_template),
        )
        .route("/api/v1/templates/{id}/status", put(templates::update_template_status))
        // Accounts
        .route("/api/v1/accounts", post(accounts::create_account))
        .route("/api/v1/accounts/user/{user_id}", get(accounts::get_account_by_user))
        // Countries
        .route(
            "/api/v1/countries",
            post(countries::create_country).get(countries::list_countries),
        )
        .route("/api/v1/countries/{iso_code}", get(countries::get_country))
        // Broadcast media
        .route("/api/v1/broadcast-media", post(media::create_broadcast_media))
        // GET takes a broadcast id, DELETE a media record id
        .route(
            "/api/v1/broadcast-media/{id}",
            get(media::list_broadcast_media).delete(media::delete_broadcast_media),
        )
        .route(
            "/api/v1/media/upload",
            post(media::upload_media).layer(DefaultBodyLimit::max(upload_limit)),
        )
        // Broadcasts
        .route("/api/v1/broadcasts", post(broadcasts::submit_broadcast))
        .route("/api/v1/broadcasts/dispatch", post(broadcasts::dispatch_broadcast))
        .route("/api/v1/broadcasts/csv", post(broadcasts::dispatch_csv_broadcast))
        .route("/api/v1/broadcasts/csv/submit", post(broadcasts::submit_csv_broadcast))
        .route("/api/v1/broadcasts/{batch_id}", get(broadcasts::get_broadcast))
        // Uploaded media
        .nest_service(&media_prefix, static_media)
        .with_state(state)
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/media".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("/media"), "/media");
        assert_eq!(normalize_prefix("media/"), "/media");
        assert_eq!(normalize_prefix(""), "/media");
        assert_eq!(normalize_prefix("/static/files/"), "/static/files");
    }
}
