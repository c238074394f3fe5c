//! Structured logging setup shared by every WaBroadcast binary.
//!
//! - `LOG_FORMAT=json` switches to flattened JSON lines for log shipping
//! - anything else gives compact, coloured text for local work
//! - `RUST_LOG` filters as usual; without it the default directive set is used
//!
//! ```rust,ignore
//! wb_common::logging::init_logging("wb-server");
//! tracing::info!(batch_id = %id, recipients = 150, "Broadcast accepted");
//! ```
//!
//! Batch-scoped work should run inside a span so every send log line carries
//! the batch id:
//!
//! ```rust,ignore
//! let span = tracing::info_span!("broadcast", batch_id = %batch_id, template = %template_id);
//! run_batch(prepared).instrument(span).await;
//! ```

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Directives applied when `RUST_LOG` is unset. sqlx logs every statement at info.
pub const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn,hyper=warn";

/// Initialize the global subscriber.
///
/// Safe to call more than once; later calls are ignored, which keeps test
/// binaries that share a process from panicking.
pub fn init_logging(service_name: &str) {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    let env_filter = build_filter();

    let initialized = if log_format.eq_ignore_ascii_case("json") {
        init_json_logging(env_filter)
    } else {
        init_text_logging(env_filter)
    };

    if initialized {
        tracing::debug!(service = %service_name, format = %log_format, "Logging initialized");
    }
}

fn build_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

fn init_json_logging(env_filter: EnvFilter) -> bool {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(true)
                .flatten_event(true)
                .with_span_events(FmtSpan::CLOSE),
        )
        .try_init()
        .is_ok()
}

fn init_text_logging(env_filter: EnvFilter) -> bool {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(true),
        )
        .try_init()
        .is_ok()
}
