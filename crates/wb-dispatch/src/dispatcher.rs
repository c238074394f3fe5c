//! BroadcastDispatcher - one template, many recipients
//!
//! A batch is validated as a whole before anything is sent: the template must
//! exist and be approved, the sender account must exist, and the template
//! structure must agree with the supplied media and carousel cards. After that
//! every recipient produces exactly one outcome, in whatever order the sends
//! finish.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use wb_common::{
    CarouselCardInput, DeliveryResult, DispatchOutcome, DispatchResultData, FailureKind, MediaRef,
    Template, TemplateStatus, WhatsAppAccount,
};
use wb_store::{SqliteAccountRepository, SqliteTemplateRepository};

use crate::aggregator::{BatchReport, ResultAggregator};
use crate::client::MessagingClient;
use crate::error::DispatchError;
use crate::executor::{DispatchExecutor, SubmitError, TaskError};
use crate::payload::TemplatePlan;
use crate::recipients::{PreparedRecipients, RecipientSource};
use crate::task::DispatchTask;
use crate::tracker::{BatchSnapshot, BatchState, BatchTracker, NewBatch};
use crate::Result;

/// Resolves templates by id
#[async_trait]
pub trait TemplateLookup: Send + Sync {
    async fn find_template(&self, id: &str) -> Result<Option<Template>>;
}

/// Resolves the sending account for a user
#[async_trait]
pub trait AccountLookup: Send + Sync {
    async fn find_account(&self, user_id: &str) -> Result<Option<WhatsAppAccount>>;
}

#[async_trait]
impl TemplateLookup for SqliteTemplateRepository {
    async fn find_template(&self, id: &str) -> Result<Option<Template>> {
        Ok(self.find_by_id(id).await?)
    }
}

#[async_trait]
impl AccountLookup for SqliteAccountRepository {
    async fn find_account(&self, user_id: &str) -> Result<Option<WhatsAppAccount>> {
        Ok(self.find_by_user_id(user_id).await?)
    }
}

/// One broadcast
#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub template_id: String,
    pub user_id: String,
    pub recipients: RecipientSource,
    pub media: Option<MediaRef>,
    pub carousel: Vec<CarouselCardInput>,
    /// Deferred start; async submission only
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Repeated async submissions with the same key return the first batch
    pub idempotency_key: Option<String>,
}

impl BroadcastRequest {
    pub fn new(
        template_id: impl Into<String>,
        user_id: impl Into<String>,
        recipients: RecipientSource,
    ) -> Self {
        Self {
            template_id: template_id.into(),
            user_id: user_id.into(),
            recipients,
            media: None,
            carousel: Vec::new(),
            scheduled_at: None,
            idempotency_key: None,
        }
    }

    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_carousel(mut self, cards: Vec<CarouselCardInput>) -> Self {
        self.carousel = cards;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Returned by async submission
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchTicket {
    pub batch_id: Uuid,
    pub state: BatchState,
    pub recipients: usize,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// True when an earlier submission with the same idempotency key was returned
    pub duplicate: bool,
}

struct PreparedBatch {
    batch_id: Uuid,
    template_id: String,
    user_id: String,
    plan: Arc<TemplatePlan>,
    sender: Arc<WhatsAppAccount>,
    recipients: PreparedRecipients,
}

#[derive(Clone)]
pub struct BroadcastDispatcher {
    executor: DispatchExecutor,
    client: Arc<dyn MessagingClient>,
    templates: Arc<dyn TemplateLookup>,
    accounts: Arc<dyn AccountLookup>,
    tracker: Arc<BatchTracker>,
}

impl BroadcastDispatcher {
    pub fn new(
        executor: DispatchExecutor,
        client: Arc<dyn MessagingClient>,
        templates: Arc<dyn TemplateLookup>,
        accounts: Arc<dyn AccountLookup>,
    ) -> Self {
        Self {
            executor,
            client,
            templates,
            accounts,
            tracker: Arc::new(BatchTracker::new()),
        }
    }

    pub fn executor(&self) -> &DispatchExecutor {
        &self.executor
    }

    pub fn tracker(&self) -> &Arc<BatchTracker> {
        &self.tracker
    }

    /// Dispatch and wait for every recipient's outcome
    pub async fn dispatch(&self, request: BroadcastRequest) -> Result<DispatchResultData> {
        Ok(self.dispatch_report(request).await?.data)
    }

    /// Like [`dispatch`](Self::dispatch), keeping the failure details
    pub async fn dispatch_report(&self, request: BroadcastRequest) -> Result<BatchReport> {
        if let Some(at) = request.scheduled_at {
            if at > Utc::now() {
                return Err(DispatchError::InvalidSchedule(
                    "scheduled broadcasts must be submitted asynchronously".to_string(),
                ));
            }
        }

        let batch = self.prepare(request).await?;
        let aggregator = Arc::new(ResultAggregator::new(batch.batch_id, batch.recipients.total()));
        let span = info_span!("broadcast", batch_id = %batch.batch_id);
        Ok(self.run_batch(batch, aggregator).instrument(span).await)
    }

    pub async fn dispatch_csv(
        &self,
        template_id: &str,
        user_id: &str,
        csv: String,
    ) -> Result<DispatchResultData> {
        self.dispatch(BroadcastRequest::new(template_id, user_id, RecipientSource::Csv(csv)))
            .await
    }

    /// Validate and start a batch in the background
    pub async fn submit(&self, request: BroadcastRequest) -> Result<BatchTicket> {
        let scheduled_at = request.scheduled_at.filter(|at| *at > Utc::now());
        let idempotency_key = request
            .idempotency_key
            .as_ref()
            .map(|key| format!("{}:{}", request.user_id, key));

        let batch = self.prepare(request).await?;
        let batch_id = batch.batch_id;
        let recipients = batch.recipients.total();

        let aggregator = Arc::new(ResultAggregator::new(batch_id, recipients));
        let existing = self.tracker.register_or_existing(
            batch_id,
            NewBatch {
                template_id: batch.template_id.clone(),
                user_id: batch.user_id.clone(),
                aggregator: aggregator.clone(),
                scheduled_at,
                idempotency_key,
            },
        );
        if let Some(existing) = existing {
            info!(batch_id = %existing.batch_id, "Duplicate submission, returning existing batch");
            return Ok(BatchTicket {
                batch_id: existing.batch_id,
                state: existing.state,
                recipients: existing.progress.expected as usize,
                scheduled_at: existing.scheduled_at,
                duplicate: true,
            });
        }

        let dispatcher = self.clone();
        let span = info_span!("broadcast", batch_id = %batch_id);
        tokio::spawn(
            async move {
                if let Some(at) = scheduled_at {
                    let delay = (at - Utc::now()).to_std().unwrap_or_default();
                    info!(scheduled_at = %at, delay_secs = delay.as_secs(), "Broadcast scheduled");
                    tokio::time::sleep(delay).await;
                    dispatcher.tracker.mark_running(batch_id);
                }
                let report = dispatcher.run_batch(batch, aggregator).await;
                dispatcher.tracker.complete(batch_id, report);
            }
            .instrument(span),
        );

        Ok(BatchTicket {
            batch_id,
            state: if scheduled_at.is_some() {
                BatchState::Scheduled
            } else {
                BatchState::Running
            },
            recipients,
            scheduled_at,
            duplicate: false,
        })
    }

    pub async fn submit_csv(
        &self,
        template_id: &str,
        user_id: &str,
        csv: String,
    ) -> Result<BatchTicket> {
        self.submit(BroadcastRequest::new(template_id, user_id, RecipientSource::Csv(csv)))
            .await
    }

    pub fn batch_status(&self, batch_id: Uuid) -> Option<BatchSnapshot> {
        self.tracker.snapshot(batch_id)
    }

    async fn prepare(&self, request: BroadcastRequest) -> Result<PreparedBatch> {
        if !self.executor.is_running() {
            return Err(DispatchError::ShutdownInProgress);
        }

        let template = self
            .templates
            .find_template(&request.template_id)
            .await?
            .filter(|t| t.deleted_at.is_none())
            .ok_or_else(|| DispatchError::TemplateNotFound(request.template_id.clone()))?;

        if template.status != TemplateStatus::Approved {
            return Err(DispatchError::TemplateNotApproved {
                id: template.id,
                status: template.status.as_str().to_string(),
            });
        }

        let sender = self
            .accounts
            .find_account(&request.user_id)
            .await?
            .ok_or_else(|| DispatchError::AccountNotFound(request.user_id.clone()))?;

        let plan = TemplatePlan::compile(&template, request.media.as_ref(), &request.carousel)?;
        let recipients = request.recipients.prepare()?;

        Ok(PreparedBatch {
            batch_id: Uuid::new_v4(),
            template_id: template.id,
            user_id: request.user_id,
            plan: Arc::new(plan),
            sender: Arc::new(sender),
            recipients,
        })
    }

    async fn run_batch(
        &self,
        batch: PreparedBatch,
        aggregator: Arc<ResultAggregator>,
    ) -> BatchReport {
        let total = batch.recipients.total();
        info!(
            template_id = %batch.template_id,
            template = %batch.plan.template_name(),
            user_id = %batch.user_id,
            recipients = total,
            rejected = batch.recipients.rejected.len(),
            "Dispatching broadcast"
        );
        crate::metrics::record_batch_started(total);

        for rejected in batch.recipients.rejected {
            aggregator.record(DispatchOutcome {
                batch_id: batch.batch_id,
                index: rejected.index,
                recipient: rejected.raw,
                result: DeliveryResult::failed(FailureKind::InvalidRecipient, rejected.reason),
            });
        }

        let mut pending = FuturesUnordered::new();
        for recipient in batch.recipients.valid {
            let index = recipient.index;
            let phone = recipient.phone.clone();
            let task = DispatchTask {
                batch_id: batch.batch_id,
                index,
                recipient: recipient.phone,
                variables: recipient.variables,
                plan: batch.plan.clone(),
                sender: batch.sender.clone(),
            };

            match self.executor.submit(task.execute(self.client.clone())).await {
                Ok(handle) => pending.push(async move { (index, phone, handle.await) }),
                Err(e) => {
                    warn!(index, recipient = %phone, error = %e, "Send task not accepted");
                    let kind = match e {
                        SubmitError::ShuttingDown => FailureKind::Aborted,
                        _ => FailureKind::Rejected,
                    };
                    aggregator.record(DispatchOutcome {
                        batch_id: batch.batch_id,
                        index,
                        recipient: phone,
                        result: DeliveryResult::failed(kind, e.to_string()),
                    });
                }
            }
        }

        while let Some((index, recipient, result)) = pending.next().await {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    let kind = match e {
                        TaskError::Panicked(_) => FailureKind::Panicked,
                        TaskError::Aborted => FailureKind::Aborted,
                    };
                    warn!(index, recipient = %recipient, error = %e, "Send task did not complete");
                    DispatchOutcome {
                        batch_id: batch.batch_id,
                        index,
                        recipient,
                        result: DeliveryResult::failed(kind, e.to_string()),
                    }
                }
            };
            aggregator.record(outcome);
        }

        let report = aggregator.finish();
        crate::metrics::record_batch_completed(
            report.data.total_dispatched,
            report.data.failed_count,
        );
        info!(
            delivered = report.data.total_dispatched,
            failed = report.data.failed_count,
            message = %report.data.message,
            "Broadcast completed"
        );
        report
    }
}
