//! HTTP API Tests
//!
//! Drives the full router against an in-memory SQLite store and a stub
//! messaging client.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;
use tower::ServiceExt;

use wb_api::{create_router, AppState};
use wb_common::{DeliveryResult, FailureKind, WhatsAppAccount};
use wb_config::MediaConfig;
use wb_dispatch::{BroadcastDispatcher, DispatchExecutor, ExecutorConfig, MessagingClient};
use wb_store::Repositories;

const UNREACHABLE: &str = "14155550199";

#[derive(Default)]
struct StubClient {
    sends: AtomicU32,
}

#[async_trait]
impl MessagingClient for StubClient {
    async fn send_template(&self, _sender: &WhatsAppAccount, payload: &Value) -> DeliveryResult {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if payload["to"] == UNREACHABLE {
            DeliveryResult::failed(FailureKind::PlatformRejected, "HTTP 400: not on WhatsApp")
        } else {
            DeliveryResult::delivered(Some("wamid.test".to_string()))
        }
    }
}

struct TestApp {
    router: Router,
    client: Arc<StubClient>,
    executor: DispatchExecutor,
    _uploads: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        wb_store::init_schema(&pool).await.unwrap();
        let repos = Repositories::new(pool);

        let executor = DispatchExecutor::new(ExecutorConfig::default());
        executor.start();

        let client = Arc::new(StubClient::default());
        let dispatcher = BroadcastDispatcher::new(
            executor.clone(),
            client.clone(),
            repos.templates.clone(),
            repos.accounts.clone(),
        );

        let uploads = TempDir::new().unwrap();
        let media = MediaConfig {
            upload_dir: uploads.path().to_string_lossy().into_owned(),
            max_upload_bytes: 1024,
            ..MediaConfig::default()
        };

        let router = create_router(AppState {
            repos,
            dispatcher,
            media,
            metrics: None,
        });

        Self {
            router,
            client,
            executor,
            _uploads: uploads,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec(), headers)
    }

    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let (status, bytes, _) = self.send(request).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// Account for `user-1` with one approved template; returns the template id
    async fn approved_template(&self) -> String {
        let (status, account) = self
            .call(
                "POST",
                "/api/v1/accounts",
                Some(json!({
                    "userId": "user-1",
                    "wabaId": "waba-1",
                    "phoneNumberId": "1098765",
                    "accessToken": "token"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let account_id = account["data"]["id"].as_str().unwrap().to_string();

        let (status, template) = self
            .call(
                "POST",
                "/api/v1/templates",
                Some(json!({
                    "accountId": account_id,
                    "name": "order_update",
                    "language": "en_US",
                    "category": "UTILITY",
                    "components": [
                        { "type": "BODY", "text": "Hi {{1}}, your order shipped." }
                    ]
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", template);
        assert_eq!(template["data"]["status"], "PENDING");
        let template_id = template["data"]["id"].as_str().unwrap().to_string();

        let (status, _) = self
            .call(
                "PUT",
                &format!("/api/v1/templates/{}/status", template_id),
                Some(json!({ "status": "APPROVED" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        template_id
    }
}

fn recipients(numbers: &[&str]) -> Value {
    Value::Array(
        numbers
            .iter()
            .map(|n| json!({ "phone": n, "variables": { "1": "Ada" } }))
            .collect(),
    )
}

#[tokio::test]
async fn test_wallet_lifecycle() {
    let app = TestApp::new().await;

    let (status, body) = app
        .call(
            "POST",
            "/api/v1/wallet",
            Some(json!({ "userId": "user-1", "initialBalance": 500 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["balanceMinor"], 500);
    assert_eq!(body["data"]["currency"], "USD");

    let (status, body) = app
        .call("POST", "/api/v1/wallet", Some(json!({ "userId": "user-1" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "error");

    let (status, body) = app
        .call("POST", "/api/v1/wallet/user-1/credit", Some(json!({ "amount": 250 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["balanceMinor"], 750);

    let (status, _) = app
        .call("POST", "/api/v1/wallet/user-1/debit", Some(json!({ "amount": 1000 })))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .call("POST", "/api/v1/wallet/user-1/debit", Some(json!({ "amount": -5 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.call("GET", "/api/v1/wallet/user-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["balanceMinor"], 750);

    let (status, _) = app.call("GET", "/api/v1/wallet/nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_wallet_credit_overflow() {
    let app = TestApp::new().await;
    app.call(
        "POST",
        "/api/v1/wallet",
        Some(json!({ "userId": "user-1", "initialBalance": 100 })),
    )
    .await;

    let (status, body) = app
        .call(
            "POST",
            "/api/v1/wallet/user-1/credit",
            Some(json!({ "amount": i64::MAX })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["status"], "error");

    let (status, body) = app.call("GET", "/api/v1/wallet/user-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["balanceMinor"], 100);
}

#[tokio::test]
async fn test_template_rules() {
    let app = TestApp::new().await;
    let template_id = app.approved_template().await;

    let (status, body) = app
        .call("GET", &format!("/api/v1/templates/{}", template_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "APPROVED");
    let account_id = body["data"]["accountId"].as_str().unwrap().to_string();

    let (status, body) = app
        .call("GET", &format!("/api/v1/templates?accountId={}", account_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    // Same name and language under the same account
    let (status, _) = app
        .call(
            "POST",
            "/api/v1/templates",
            Some(json!({
                "accountId": account_id,
                "name": "order_update",
                "language": "en_US",
                "category": "UTILITY",
                "components": [{ "type": "BODY", "text": "Again" }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .call(
            "POST",
            "/api/v1/templates",
            Some(json!({
                "accountId": "missing-account",
                "name": "promo",
                "language": "en_US",
                "category": "MARKETING",
                "components": [{ "type": "BODY", "text": "Sale" }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .call("DELETE", &format!("/api/v1/templates/{}", template_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .call("GET", &format!("/api/v1/templates/{}", template_id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sync_broadcast_counts() {
    let app = TestApp::new().await;
    let template_id = app.approved_template().await;

    let (status, body) = app
        .call(
            "POST",
            "/api/v1/broadcasts/dispatch",
            Some(json!({
                "templateId": template_id,
                "userId": "user-1",
                "recipients": recipients(&["+1 415 555 0101", UNREACHABLE, "14155550103"])
            })),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["totalDispatched"], 2);
    assert_eq!(body["data"]["failedCount"], 1);
    assert_eq!(app.client.sends.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_broadcast_unknown_template() {
    let app = TestApp::new().await;
    app.approved_template().await;

    let (status, body) = app
        .call(
            "POST",
            "/api/v1/broadcasts/dispatch",
            Some(json!({
                "templateId": "no-such-template",
                "userId": "user-1",
                "recipients": recipients(&["14155550101"])
            })),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
    assert_eq!(body["data"]["totalDispatched"], 0);
    assert_eq!(body["data"]["failedCount"], 0);
    assert!(body["data"]["message"].as_str().unwrap().contains("no-such-template"));
    assert_eq!(app.client.sends.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_csv_broadcast() {
    let app = TestApp::new().await;
    let template_id = app.approved_template().await;

    let request = Request::builder()
        .method("POST")
        .uri(format!(
            "/api/v1/broadcasts/csv?templateId={}&userId=user-1",
            template_id
        ))
        .header(header::CONTENT_TYPE, "text/csv")
        .body(Body::from("phone,1\n14155550101,Ada\n14155550102,Grace\n"))
        .unwrap();
    let (status, bytes, _) = app.send(request).await;
    let body: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["totalDispatched"], 2);
    assert_eq!(body["data"]["failedCount"], 0);
}

#[tokio::test]
async fn test_submit_then_poll() {
    let app = TestApp::new().await;
    let template_id = app.approved_template().await;

    let (status, body) = app
        .call(
            "POST",
            "/api/v1/broadcasts",
            Some(json!({
                "templateId": template_id,
                "userId": "user-1",
                "recipients": recipients(&["14155550101", "14155550102"])
            })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", body);
    assert_eq!(body["data"]["recipients"], 2);
    let batch_id = body["data"]["batchId"].as_str().unwrap().to_string();

    let mut last = Value::Null;
    for _ in 0..100 {
        let (status, body) = app
            .call("GET", &format!("/api/v1/broadcasts/{}", batch_id), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        if body["data"]["state"] == "COMPLETED" {
            last = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(last["data"]["report"]["data"]["totalDispatched"], 2);
    assert_eq!(last["data"]["progress"]["delivered"], 2);

    let (status, _) = app
        .call("GET", &format!("/api/v1/broadcasts/{}", uuid::Uuid::new_v4()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_and_serve_media() {
    let app = TestApp::new().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/media/upload")
        .header(header::CONTENT_TYPE, "image/png")
        .body(Body::from(vec![0x89, b'P', b'N', b'G', 1, 2, 3]))
        .unwrap();
    let (status, bytes, _) = app.send(request).await;
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["data"]["mediaType"], "IMAGE");
    assert_eq!(body["data"]["size"], 7);
    let url = body["data"]["url"].as_str().unwrap().to_string();
    assert!(url.starts_with("/media/") && url.ends_with(".png"));

    let request = Request::builder().uri(&url).body(Body::empty()).unwrap();
    let (status, bytes, headers) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, vec![0x89, b'P', b'N', b'G', 1, 2, 3]);
    assert_eq!(
        headers.get(header::CACHE_CONTROL).unwrap(),
        "public, max-age=604800"
    );
}

#[tokio::test]
async fn test_upload_rejections() {
    let app = TestApp::new().await;

    let empty = Request::builder()
        .method("POST")
        .uri("/api/v1/media/upload")
        .header(header::CONTENT_TYPE, "image/png")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(empty).await.0, StatusCode::BAD_REQUEST);

    let unsupported = Request::builder()
        .method("POST")
        .uri("/api/v1/media/upload")
        .header(header::CONTENT_TYPE, "application/x-msdownload")
        .body(Body::from("MZ"))
        .unwrap();
    assert_eq!(app.send(unsupported).await.0, StatusCode::BAD_REQUEST);

    let oversized = Request::builder()
        .method("POST")
        .uri("/api/v1/media/upload")
        .header(header::CONTENT_TYPE, "image/png")
        .body(Body::from(vec![0u8; 4096]))
        .unwrap();
    assert_eq!(app.send(oversized).await.0, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_broadcast_media_records() {
    let app = TestApp::new().await;

    let (status, body) = app
        .call(
            "POST",
            "/api/v1/broadcast-media",
            Some(json!({
                "broadcastId": "bc-1",
                "mediaType": "IMAGE",
                "url": "https://cdn.example.com/a.png"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let media_id = body["data"]["id"].as_str().unwrap().to_string();

    let (_, body) = app.call("GET", "/api/v1/broadcast-media/bc-1", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _) = app
        .call("DELETE", &format!("/api/v1/broadcast-media/{}", media_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .call("DELETE", &format!("/api/v1/broadcast-media/{}", media_id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app.call("GET", "/api/v1/broadcast-media/bc-1", None).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::new().await;

    let (status, body) = app.call("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "UP");

    let (status, body) = app.call("GET", "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "READY");

    let (status, body) = app.call("GET", "/monitoring/executor", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["coreWorkers"], 10);

    app.executor.shutdown().await;

    let (status, body) = app.call("GET", "/health/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "NOT_READY");

    let (status, _) = app
        .call(
            "POST",
            "/api/v1/broadcasts/dispatch",
            Some(json!({ "templateId": "t", "userId": "user-1", "recipients": [] })),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
