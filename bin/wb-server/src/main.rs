//! WaBroadcast Server
//!
//! Serves the WaBroadcast HTTP API and runs the broadcast executor behind it.
//!
//! ## Configuration
//!
//! Settings come from a TOML file (`WB_CONFIG` or the first of the standard
//! search paths) with `WB_*` environment overrides. `--print-config` writes an
//! example file to stdout and exits.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use wb_api::{create_router, AppState};
use wb_config::{AppConfig, ConfigLoader};
use wb_dispatch::{
    BroadcastDispatcher, DispatchExecutor, HttpMessagingClient, LifecycleManager,
};
use wb_store::Repositories;

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args().any(|arg| arg == "--print-config") {
        println!("{}", AppConfig::example_toml());
        return Ok(());
    }

    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();

    wb_common::logging::init_logging("wb-server");

    info!("Starting WaBroadcast server");

    // 1. Configuration
    let loader = match std::env::args().skip_while(|arg| arg != "--config").nth(1) {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load().context("failed to load configuration")?;

    // 2. Store
    let pool = wb_store::connect(&config.database)
        .await
        .context("failed to open database")?;
    wb_store::init_schema(&pool)
        .await
        .context("failed to initialize schema")?;
    let repos = Repositories::new(pool);

    // 3. Metrics recorder
    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed, /metrics disabled");
            None
        }
    };

    // 4. Executor and dispatcher
    let executor = DispatchExecutor::new((&config.dispatch).into());
    executor.start();

    let client = Arc::new(
        HttpMessagingClient::new(config.messaging.clone())
            .context("failed to build messaging client")?,
    );
    let dispatcher = BroadcastDispatcher::new(
        executor.clone(),
        client,
        repos.templates.clone(),
        repos.accounts.clone(),
    );

    // 5. Background maintenance
    let lifecycle = LifecycleManager::start(
        executor.clone(),
        dispatcher.tracker().clone(),
        (&config.dispatch).into(),
    );

    // 6. HTTP API
    let state = AppState {
        repos,
        dispatcher,
        media: config.media.clone(),
        metrics,
    };
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config));

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    log_startup_summary(&config, &addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "HTTP server error");
    }

    info!("Shutdown signal received, draining broadcasts...");
    let report = lifecycle.shutdown().await;
    if report.forced {
        warn!(
            aborted_workers = report.aborted_workers,
            dropped_jobs = report.dropped_jobs,
            "Shutdown grace period expired"
        );
    } else {
        info!("All in-flight messages completed");
    }

    info!("WaBroadcast server stopped");
    Ok(())
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.dev_mode || config.http.cors_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .http
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

fn log_startup_summary(config: &AppConfig, addr: &str) {
    let d = &config.dispatch;
    info!("==========================================");
    info!("WaBroadcast server started");
    info!("  HTTP: {}", addr);
    info!("  Database: {}", config.database.url);
    info!(
        "  Executor: core={} max={} queue={}",
        d.core_workers, d.max_workers, d.queue_capacity
    );
    info!("  Messaging API: {}", config.messaging.base_url);
    info!(
        "  Media: {} served at {}",
        config.media.upload_dir, config.media.url_prefix
    );
    if config.dev_mode {
        info!("  Development mode: enabled");
    }
    info!("==========================================");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
