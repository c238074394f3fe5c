//! BroadcastDispatcher Tests
//!
//! - Partial failure accounting
//! - Batch-level validation leaves nothing dispatched
//! - Large batches against the default pool sizing
//! - Panic isolation, independent batches
//! - CSV recipients, async submission, scheduling, idempotency
//! - SQLite-backed lookups

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;

use wb_common::template::TemplateComponent;
use wb_common::{
    DeliveryResult, FailureKind, RecipientEntry, Template, TemplateCategory, TemplateStatus,
    WhatsAppAccount,
};
use wb_dispatch::{
    AccountLookup, BatchState, BroadcastDispatcher, BroadcastRequest, DispatchError,
    DispatchExecutor, ExecutorConfig, MessagingClient, RecipientSource, TemplateLookup,
};
use wb_store::Repositories;

const PANIC_NUMBER: &str = "14155559999";

/// Records every send; fails or panics for configured numbers
#[derive(Default)]
struct MockClient {
    sends: AtomicU32,
    recipients: Mutex<Vec<String>>,
    failing: HashSet<String>,
    delay_ms: u64,
}

impl MockClient {
    fn failing(numbers: &[&str]) -> Self {
        Self {
            failing: numbers.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    fn with_delay(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Self::default()
        }
    }

    fn sends(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingClient for MockClient {
    async fn send_template(&self, _sender: &WhatsAppAccount, payload: &Value) -> DeliveryResult {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        let to = payload["to"].as_str().unwrap_or_default().to_string();
        if to == PANIC_NUMBER {
            panic!("simulated send panic");
        }

        self.sends.fetch_add(1, Ordering::SeqCst);
        self.recipients.lock().push(to.clone());

        if self.failing.contains(&to) {
            DeliveryResult::failed(FailureKind::PlatformRejected, "HTTP 400: invalid recipient")
        } else {
            DeliveryResult::delivered(Some(format!("wamid.{}", to)))
        }
    }
}

#[derive(Default)]
struct MemoryLookup {
    templates: HashMap<String, Template>,
    accounts: HashMap<String, WhatsAppAccount>,
}

#[async_trait]
impl TemplateLookup for MemoryLookup {
    async fn find_template(&self, id: &str) -> wb_dispatch::Result<Option<Template>> {
        Ok(self.templates.get(id).cloned())
    }
}

#[async_trait]
impl AccountLookup for MemoryLookup {
    async fn find_account(&self, user_id: &str) -> wb_dispatch::Result<Option<WhatsAppAccount>> {
        Ok(self.accounts.get(user_id).cloned())
    }
}

fn body(text: &str) -> TemplateComponent {
    TemplateComponent {
        component_type: "BODY".to_string(),
        format: None,
        text: Some(text.to_string()),
        buttons: vec![],
        cards: vec![],
    }
}

fn approved_template(text: &str) -> Template {
    let mut template = Template::new(
        "acc-1",
        "spring_sale",
        "en_US",
        TemplateCategory::Marketing,
        vec![body(text)],
    );
    template.status = TemplateStatus::Approved;
    template
}

struct Fixture {
    dispatcher: BroadcastDispatcher,
    client: Arc<MockClient>,
    template_id: String,
    executor: DispatchExecutor,
}

fn fixture_with(
    client: MockClient,
    template: Template,
    executor_config: ExecutorConfig,
) -> Fixture {
    let template_id = template.id.clone();
    let mut lookup = MemoryLookup::default();
    lookup.templates.insert(template.id.clone(), template);
    lookup.accounts.insert(
        "user-1".to_string(),
        WhatsAppAccount::new("user-1", "waba-1", "1098765", "token"),
    );
    let lookup = Arc::new(lookup);

    let executor = DispatchExecutor::new(executor_config);
    executor.start();

    let client = Arc::new(client);
    let dispatcher = BroadcastDispatcher::new(
        executor.clone(),
        client.clone(),
        lookup.clone(),
        lookup,
    );

    Fixture {
        dispatcher,
        client,
        template_id,
        executor,
    }
}

fn fixture(client: MockClient) -> Fixture {
    fixture_with(client, approved_template("Hello, spring sale is on!"), ExecutorConfig::default())
}

fn numbers(list: &[&str]) -> RecipientSource {
    RecipientSource::Numbers(list.iter().map(|n| RecipientEntry::new(*n)).collect())
}

async fn wait_for_completion(dispatcher: &BroadcastDispatcher, batch_id: uuid::Uuid) {
    for _ in 0..200 {
        if let Some(snapshot) = dispatcher.batch_status(batch_id) {
            if snapshot.state == BatchState::Completed {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("batch {} did not complete", batch_id);
}

#[tokio::test]
async fn test_partial_failure_counts() {
    let f = fixture(MockClient::failing(&["14155550102"]));

    let data = f
        .dispatcher
        .dispatch(BroadcastRequest::new(
            &f.template_id,
            "user-1",
            numbers(&["14155550101", "14155550102", "14155550103"]),
        ))
        .await
        .unwrap();

    assert_eq!(data.total_dispatched, 2);
    assert_eq!(data.failed_count, 1);
    assert_eq!(data.message, "2 of 3 delivered");
    assert_eq!(f.client.sends(), 3);
}

#[tokio::test]
async fn test_all_delivered_message() {
    let f = fixture(MockClient::default());
    let data = f
        .dispatcher
        .dispatch(BroadcastRequest::new(
            &f.template_id,
            "user-1",
            numbers(&["14155550101", "14155550102"]),
        ))
        .await
        .unwrap();
    assert_eq!(data.message, "all 2 delivered");
}

#[tokio::test]
async fn test_missing_template_dispatches_nothing() {
    let f = fixture(MockClient::default());

    let err = f
        .dispatcher
        .dispatch(BroadcastRequest::new("no-such-template", "user-1", numbers(&["14155550101"])))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::TemplateNotFound(_)));
    assert_eq!(f.client.sends(), 0);
    assert_eq!(f.executor.stats().completed, 0);
}

#[tokio::test]
async fn test_unapproved_template_rejected() {
    let mut template = approved_template("Hi");
    template.status = TemplateStatus::Pending;
    let f = fixture_with(MockClient::default(), template, ExecutorConfig::default());

    let err = f
        .dispatcher
        .dispatch(BroadcastRequest::new(&f.template_id, "user-1", numbers(&["14155550101"])))
        .await
        .unwrap_err();

    match err {
        DispatchError::TemplateNotApproved { status, .. } => assert_eq!(status, "PENDING"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(f.client.sends(), 0);
}

#[tokio::test]
async fn test_deleted_template_not_found() {
    let mut template = approved_template("Hi");
    template.deleted_at = Some(Utc::now());
    let f = fixture_with(MockClient::default(), template, ExecutorConfig::default());

    let err = f
        .dispatcher
        .dispatch(BroadcastRequest::new(&f.template_id, "user-1", numbers(&["14155550101"])))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::TemplateNotFound(_)));
}

#[tokio::test]
async fn test_missing_account_and_empty_list() {
    let f = fixture(MockClient::default());

    let err = f
        .dispatcher
        .dispatch(BroadcastRequest::new(&f.template_id, "user-404", numbers(&["14155550101"])))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::AccountNotFound(_)));

    let err = f
        .dispatcher
        .dispatch(BroadcastRequest::new(&f.template_id, "user-1", numbers(&[])))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NoRecipients));
    assert_eq!(f.client.sends(), 0);
}

#[tokio::test]
async fn test_invalid_recipients_fold_into_failures() {
    let f = fixture(MockClient::default());

    let report = f
        .dispatcher
        .dispatch_report(BroadcastRequest::new(
            &f.template_id,
            "user-1",
            numbers(&["14155550101", "abc", "0041"]),
        ))
        .await
        .unwrap();

    assert_eq!(report.data.total_dispatched, 1);
    assert_eq!(report.data.failed_count, 2);
    assert_eq!(report.failures_by_kind[&FailureKind::InvalidRecipient], 2);
    assert_eq!(report.failures[0].index, 1);
    assert_eq!(f.client.sends(), 1);
}

#[tokio::test]
async fn test_missing_variable_fails_only_that_recipient() {
    let f = fixture_with(
        MockClient::default(),
        approved_template("Hi {{name}}, your code is {{code}}"),
        ExecutorConfig::default(),
    );

    let recipients = RecipientSource::Numbers(vec![
        RecipientEntry::new("14155550101")
            .with_variable("name", "Ada")
            .with_variable("code", "X1"),
        RecipientEntry::new("14155550102").with_variable("name", "Grace"),
    ]);

    let report = f
        .dispatcher
        .dispatch_report(BroadcastRequest::new(&f.template_id, "user-1", recipients))
        .await
        .unwrap();

    assert_eq!(report.data.total_dispatched, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, FailureKind::InvalidVariables);
    assert_eq!(report.failures[0].recipient, "14155550102");
    assert_eq!(f.client.sends(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_150_recipients_all_dispatch() {
    let f = fixture(MockClient::with_delay(5));
    let list: Vec<String> = (0..150).map(|i| format!("1415556{:04}", i)).collect();
    let refs: Vec<&str> = list.iter().map(String::as_str).collect();

    let data = f
        .dispatcher
        .dispatch(BroadcastRequest::new(&f.template_id, "user-1", numbers(&refs)))
        .await
        .unwrap();

    assert_eq!(data.total_dispatched, 150);
    assert_eq!(data.failed_count, 0);
    assert_eq!(data.message, "all 150 delivered");
    assert_eq!(f.executor.stats().rejected, 0);
}

#[tokio::test]
async fn test_panicking_send_is_isolated() {
    let f = fixture(MockClient::default());

    let report = f
        .dispatcher
        .dispatch_report(BroadcastRequest::new(
            &f.template_id,
            "user-1",
            numbers(&["14155550101", PANIC_NUMBER, "14155550103"]),
        ))
        .await
        .unwrap();

    assert_eq!(report.data.total_dispatched, 2);
    assert_eq!(report.data.failed_count, 1);
    assert_eq!(report.failures[0].kind, FailureKind::Panicked);
    assert_eq!(report.failures[0].recipient, PANIC_NUMBER);
}

#[tokio::test]
async fn test_repeated_batches_are_independent() {
    let f = fixture(MockClient::failing(&["14155550102"]));
    let request = BroadcastRequest::new(
        &f.template_id,
        "user-1",
        numbers(&["14155550101", "14155550102"]),
    );

    let (first, second) = tokio::join!(
        f.dispatcher.dispatch(request.clone()),
        f.dispatcher.dispatch(request)
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first, second);
    assert_eq!(first.total_dispatched, 1);
    assert_eq!(first.failed_count, 1);
    assert_eq!(f.client.sends(), 4);
}

#[tokio::test]
async fn test_csv_dispatch_with_variables() {
    let f = fixture_with(
        MockClient::default(),
        approved_template("Hi {{name}}"),
        ExecutorConfig::default(),
    );

    let csv = "phone,name\n+1 415 555 0101,Ada\n14155550102,Grace\nnot-a-phone,Nobody\n";
    let data = f
        .dispatcher
        .dispatch_csv(&f.template_id, "user-1", csv.to_string())
        .await
        .unwrap();

    assert_eq!(data.total_dispatched, 2);
    assert_eq!(data.failed_count, 1);

    let mut sent = f.client.recipients.lock().clone();
    sent.sort();
    assert_eq!(sent, vec!["14155550101", "14155550102"]);
}

#[tokio::test]
async fn test_async_submit_and_poll() {
    let f = fixture(MockClient::with_delay(10));

    let ticket = f
        .dispatcher
        .submit(BroadcastRequest::new(
            &f.template_id,
            "user-1",
            numbers(&["14155550101", "14155550102", "14155550103"]),
        ))
        .await
        .unwrap();
    assert_eq!(ticket.state, BatchState::Running);
    assert_eq!(ticket.recipients, 3);
    assert!(!ticket.duplicate);

    wait_for_completion(&f.dispatcher, ticket.batch_id).await;

    let snapshot = f.dispatcher.batch_status(ticket.batch_id).unwrap();
    let report = snapshot.report.unwrap();
    assert_eq!(report.data.total_dispatched, 3);
    assert_eq!(snapshot.progress.delivered, 3);
}

#[tokio::test]
async fn test_submit_validation_errors_are_immediate() {
    let f = fixture(MockClient::default());
    let err = f
        .dispatcher
        .submit(BroadcastRequest::new("missing", "user-1", numbers(&["14155550101"])))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::TemplateNotFound(_)));
    assert!(f.dispatcher.tracker().is_empty());
}

#[tokio::test]
async fn test_scheduled_submission_deferred() {
    let f = fixture(MockClient::default());
    let at = Utc::now() + chrono::Duration::milliseconds(300);

    let ticket = f
        .dispatcher
        .submit(
            BroadcastRequest::new(&f.template_id, "user-1", numbers(&["14155550101"]))
                .scheduled_at(at),
        )
        .await
        .unwrap();

    assert_eq!(ticket.state, BatchState::Scheduled);
    assert_eq!(
        f.dispatcher.batch_status(ticket.batch_id).unwrap().state,
        BatchState::Scheduled
    );
    assert_eq!(f.client.sends(), 0);

    wait_for_completion(&f.dispatcher, ticket.batch_id).await;
    assert_eq!(f.client.sends(), 1);
}

#[tokio::test]
async fn test_sync_dispatch_refuses_future_schedule() {
    let f = fixture(MockClient::default());
    let err = f
        .dispatcher
        .dispatch(
            BroadcastRequest::new(&f.template_id, "user-1", numbers(&["14155550101"]))
                .scheduled_at(Utc::now() + chrono::Duration::minutes(10)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidSchedule(_)));
}

#[tokio::test]
async fn test_idempotency_key_returns_original_batch() {
    let f = fixture(MockClient::default());
    let request = BroadcastRequest::new(
        &f.template_id,
        "user-1",
        numbers(&["14155550101", "14155550102"]),
    )
    .with_idempotency_key("campaign-42");

    let first = f.dispatcher.submit(request.clone()).await.unwrap();
    let second = f.dispatcher.submit(request).await.unwrap();

    assert_eq!(first.batch_id, second.batch_id);
    assert!(second.duplicate);

    wait_for_completion(&f.dispatcher, first.batch_id).await;
    assert_eq!(f.client.sends(), 2);
    assert_eq!(f.dispatcher.tracker().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_submissions_share_ticket() {
    let f = fixture(MockClient::with_delay(20));
    let request = BroadcastRequest::new(
        &f.template_id,
        "user-1",
        numbers(&["14155550101", "14155550102", "14155550103"]),
    )
    .with_idempotency_key("campaign-race");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let dispatcher = f.dispatcher.clone();
            let request = request.clone();
            tokio::spawn(async move { dispatcher.submit(request).await.unwrap() })
        })
        .collect();
    let tickets: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let original = tickets.iter().find(|t| !t.duplicate).unwrap();
    assert_eq!(tickets.iter().filter(|t| !t.duplicate).count(), 1);
    for ticket in &tickets {
        assert_eq!(ticket.batch_id, original.batch_id);
        assert_eq!(ticket.recipients, 3);
    }

    wait_for_completion(&f.dispatcher, original.batch_id).await;
    assert_eq!(f.client.sends(), 3);
    assert_eq!(f.dispatcher.tracker().len(), 1);
}

#[tokio::test]
async fn test_dispatch_after_shutdown_refused() {
    let f = fixture(MockClient::default());
    f.executor.shutdown().await;

    let err = f
        .dispatcher
        .dispatch(BroadcastRequest::new(&f.template_id, "user-1", numbers(&["14155550101"])))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::ShutdownInProgress));
}

#[tokio::test]
async fn test_sqlite_backed_lookups() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    wb_store::init_schema(&pool).await.unwrap();
    let repos = Repositories::new(pool);

    let account = WhatsAppAccount::new("user-7", "waba-7", "1098765", "token");
    repos.accounts.insert(&account).await.unwrap();
    let template = approved_template("Hello from the store");
    repos.templates.insert(&template).await.unwrap();

    let executor = DispatchExecutor::new(ExecutorConfig::default());
    executor.start();
    let client = Arc::new(MockClient::default());
    let dispatcher = BroadcastDispatcher::new(
        executor,
        client.clone(),
        repos.templates.clone(),
        repos.accounts.clone(),
    );

    let data = dispatcher
        .dispatch(BroadcastRequest::new(&template.id, "user-7", numbers(&["14155550101"])))
        .await
        .unwrap();
    assert_eq!(data.total_dispatched, 1);

    repos.templates.soft_delete(&template.id).await.unwrap();
    let err = dispatcher
        .dispatch(BroadcastRequest::new(&template.id, "user-7", numbers(&["14155550101"])))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::TemplateNotFound(_)));
    assert_eq!(client.sends(), 1);
}
