//! Messaging client - template message delivery over the Cloud API
//!
//! - POST `{base_url}/{api_version}/{phone_number_id}/messages` with the
//!   sender's bearer token
//! - 2xx is delivered, with the platform message id when present
//! - 4xx other than 429 is a permanent platform rejection
//! - 429, 5xx and network errors are transient and retried
//! - A circuit breaker fails fast while the API keeps erroring

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use wb_common::{DeliveryResult, FailureKind, WhatsAppAccount};
use wb_config::MessagingConfig;

use crate::Result;

/// Sends one template message on behalf of an account
#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn send_template(
        &self,
        sender: &WhatsAppAccount,
        payload: &serde_json::Value,
    ) -> DeliveryResult;
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: PlatformError,
}

#[derive(Debug, Deserialize)]
struct PlatformError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker guarding the messaging API
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    opened_at: RwLock<Option<Instant>>,
    failure_threshold: u32,
    /// Successes in half-open needed to close
    success_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            opened_at: RwLock::new(None),
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            reset_timeout,
        }
    }

    pub fn allow_request(&self) -> bool {
        let state = *self.state.read();
        match state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = (*self.opened_at.read()).map(|t| t.elapsed());
                if elapsed.is_some_and(|e| e >= self.reset_timeout) {
                    *self.state.write() = CircuitState::HalfOpen;
                    self.success_count.store(0, Ordering::SeqCst);
                    debug!("Circuit breaker half-open, probing messaging API");
                    return true;
                }
                false
            }
        }
    }

    pub fn record_success(&self) {
        let state = *self.state.read();
        match state {
            CircuitState::HalfOpen => {
                let count = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.success_threshold {
                    *self.state.write() = CircuitState::Closed;
                    self.failure_count.store(0, Ordering::SeqCst);
                    info!(successes = count, "Circuit breaker closed");
                }
            }
            CircuitState::Closed => self.failure_count.store(0, Ordering::SeqCst),
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let state = *self.state.read();
        match state {
            CircuitState::Closed => {
                let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.failure_threshold {
                    self.open();
                    warn!(failures = count, "Circuit breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                self.open();
                warn!("Circuit breaker re-opened by failed trial request");
            }
            CircuitState::Open => {}
        }
    }

    fn open(&self) {
        *self.state.write() = CircuitState::Open;
        *self.opened_at.write() = Some(Instant::now());
        self.success_count.store(0, Ordering::SeqCst);
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read()
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(10, 3, Duration::from_secs(30))
    }
}

enum Attempt {
    Final(DeliveryResult),
    Retryable {
        result: DeliveryResult,
        retry_after: Option<Duration>,
    },
}

/// HTTP messaging client with retry, circuit breaker and optional rate limit
pub struct HttpMessagingClient {
    client: Client,
    config: MessagingConfig,
    circuit_breaker: CircuitBreaker,
    rate_limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl HttpMessagingClient {
    pub fn new(config: MessagingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(32)
            .build()?;

        let circuit_breaker = CircuitBreaker::new(
            config.circuit_breaker_threshold,
            3,
            Duration::from_secs(config.circuit_breaker_reset_secs),
        );

        let rate_limiter = NonZeroU32::new(config.rate_limit_per_second)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        info!(
            base_url = %config.base_url,
            api_version = %config.api_version,
            timeout_ms = config.timeout_ms,
            max_retries = config.max_retries,
            rate_limit_per_second = config.rate_limit_per_second,
            "Messaging client initialized"
        );

        Ok(Self {
            client,
            config,
            circuit_breaker,
            rate_limiter,
        })
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    fn messages_url(&self, phone_number_id: &str) -> String {
        format!(
            "{}/{}/{}/messages",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_version.trim_matches('/'),
            phone_number_id
        )
    }

    async fn send_once(&self, sender: &WhatsAppAccount, payload: &serde_json::Value) -> Attempt {
        if !self.circuit_breaker.allow_request() {
            return Attempt::Final(DeliveryResult::failed(
                FailureKind::CircuitOpen,
                "Messaging API circuit breaker is open",
            ));
        }

        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let response = self
            .client
            .post(self.messages_url(&sender.phone_number_id))
            .bearer_auth(&sender.access_token)
            .json(payload)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.circuit_breaker.record_failure();
                let detail = if e.is_timeout() {
                    "Request timeout".to_string()
                } else if e.is_connect() {
                    format!("Connection error: {}", e)
                } else {
                    error!(error = %e, error_debug = ?e, "Messaging request failed");
                    format!("Request failed: {}", e)
                };
                warn!(
                    phone_number_id = %sender.phone_number_id,
                    detail = %detail,
                    "Send attempt failed"
                );
                return Attempt::Retryable {
                    result: DeliveryResult::failed(FailureKind::Transient, detail),
                    retry_after: None,
                };
            }
        };

        let status = response.status();
        if status.is_success() {
            self.circuit_breaker.record_success();
            let message_id = response
                .json::<SendResponse>()
                .await
                .ok()
                .and_then(|body| body.messages.into_iter().next())
                .map(|m| m.id);
            return Attempt::Final(DeliveryResult::delivered(message_id));
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            // Throttling is not an outage
            self.circuit_breaker.record_success();
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(|secs| Duration::from_secs(secs).min(self.config.max_retry_after()));
            warn!(retry_after = ?retry_after, "Messaging API rate limited (429)");
            return Attempt::Retryable {
                result: DeliveryResult::failed(
                    FailureKind::Transient,
                    "HTTP 429: Too Many Requests",
                ),
                retry_after,
            };
        }

        let body = response.text().await.unwrap_or_default();
        let platform_message = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .map(|env| match env.error.code {
                Some(code) => format!("{} (code {})", env.error.message, code),
                None => env.error.message,
            });

        if status.is_client_error() {
            self.circuit_breaker.record_success();
            let detail = format!(
                "HTTP {}: {}",
                status.as_u16(),
                platform_message.unwrap_or_else(|| "Client error".to_string())
            );
            warn!(
                status_code = status.as_u16(),
                detail = %detail,
                "Messaging API rejected message"
            );
            return Attempt::Final(DeliveryResult::failed(FailureKind::PlatformRejected, detail));
        }

        self.circuit_breaker.record_failure();
        let detail = format!(
            "HTTP {}: {}",
            status.as_u16(),
            platform_message.unwrap_or_else(|| "Server error".to_string())
        );
        warn!(status_code = status.as_u16(), "Messaging API server error");
        Attempt::Retryable {
            result: DeliveryResult::failed(FailureKind::Transient, detail),
            retry_after: None,
        }
    }
}

#[async_trait]
impl MessagingClient for HttpMessagingClient {
    async fn send_template(
        &self,
        sender: &WhatsAppAccount,
        payload: &serde_json::Value,
    ) -> DeliveryResult {
        let started = Instant::now();
        let mut retries = 0;

        let result = loop {
            match self.send_once(sender, payload).await {
                Attempt::Final(result) => break result,
                Attempt::Retryable {
                    result,
                    retry_after,
                } => {
                    if retries >= self.config.max_retries {
                        break result;
                    }
                    retries += 1;
                    let delay = retry_after.unwrap_or_else(|| self.config.retry_delay(retries));
                    debug!(
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying send"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        crate::metrics::record_send_duration(started.elapsed(), result.is_delivered());
        result
    }
}
