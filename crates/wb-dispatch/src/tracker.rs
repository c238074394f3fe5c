//! In-process registry of broadcast batches
//!
//! Async submissions are polled by batch id. Entries stay until evicted by the
//! lifecycle task once completed for longer than the retention window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::aggregator::{BatchProgress, BatchReport, ResultAggregator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchState {
    Scheduled,
    Running,
    Completed,
}

/// Poll view of a batch
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchSnapshot {
    pub batch_id: Uuid,
    pub template_id: String,
    pub user_id: String,
    pub state: BatchState,
    pub progress: BatchProgress,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<BatchReport>,
}

struct BatchEntry {
    template_id: String,
    user_id: String,
    state: BatchState,
    aggregator: Arc<ResultAggregator>,
    report: Option<BatchReport>,
    created_at: DateTime<Utc>,
    scheduled_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    completed_instant: Option<Instant>,
    idempotency_key: Option<String>,
}

/// Registration details for a new batch
pub struct NewBatch {
    pub template_id: String,
    pub user_id: String,
    pub aggregator: Arc<ResultAggregator>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
}

#[derive(Default)]
pub struct BatchTracker {
    batches: DashMap<Uuid, BatchEntry>,
    idempotency: DashMap<String, Uuid>,
}

impl BatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an idempotency key to a batch id.
    ///
    /// Returns the batch already holding the key, if any.
    fn claim_key(&self, key: &str, batch_id: Uuid) -> Option<Uuid> {
        match self.idempotency.entry(key.to_string()) {
            Entry::Occupied(existing) => Some(*existing.get()),
            Entry::Vacant(slot) => {
                slot.insert(batch_id);
                None
            }
        }
    }

    pub fn register(&self, batch_id: Uuid, batch: NewBatch) {
        let state = if batch.scheduled_at.is_some() {
            BatchState::Scheduled
        } else {
            BatchState::Running
        };

        self.batches.insert(
            batch_id,
            BatchEntry {
                template_id: batch.template_id,
                user_id: batch.user_id,
                state,
                aggregator: batch.aggregator,
                report: None,
                created_at: Utc::now(),
                scheduled_at: batch.scheduled_at,
                completed_at: None,
                completed_instant: None,
                idempotency_key: batch.idempotency_key,
            },
        );
        crate::metrics::set_tracked_batches(self.batches.len());
    }

    /// Register a batch, unless its idempotency key already belongs to another.
    ///
    /// The batch is inserted before the key is claimed, so a key always points
    /// at a registered batch. Returns the earlier batch when the key is taken;
    /// the new batch is then discarded.
    pub fn register_or_existing(&self, batch_id: Uuid, batch: NewBatch) -> Option<BatchSnapshot> {
        let key = batch.idempotency_key.clone();
        self.register(batch_id, batch);
        let key = match key {
            Some(key) => key,
            None => return None,
        };

        loop {
            let existing = self.claim_key(&key, batch_id)?;
            if let Some(snapshot) = self.snapshot(existing) {
                self.batches.remove(&batch_id);
                crate::metrics::set_tracked_batches(self.batches.len());
                return Some(snapshot);
            }
            // Holder was evicted between the claim and the lookup
            self.idempotency.remove_if(&key, |_, holder| *holder == existing);
        }
    }

    pub fn mark_running(&self, batch_id: Uuid) {
        if let Some(mut entry) = self.batches.get_mut(&batch_id) {
            entry.state = BatchState::Running;
        }
    }

    pub fn complete(&self, batch_id: Uuid, report: BatchReport) {
        if let Some(mut entry) = self.batches.get_mut(&batch_id) {
            entry.state = BatchState::Completed;
            entry.report = Some(report);
            entry.completed_at = Some(Utc::now());
            entry.completed_instant = Some(Instant::now());
        }
    }

    pub fn snapshot(&self, batch_id: Uuid) -> Option<BatchSnapshot> {
        self.batches.get(&batch_id).map(|entry| BatchSnapshot {
            batch_id,
            template_id: entry.template_id.clone(),
            user_id: entry.user_id.clone(),
            state: entry.state,
            progress: entry.aggregator.progress(),
            created_at: entry.created_at,
            scheduled_at: entry.scheduled_at,
            completed_at: entry.completed_at,
            report: entry.report.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Drop batches completed more than `retention` ago, with their keys
    pub fn evict_completed(&self, retention: Duration) -> usize {
        let expired: Vec<(Uuid, Option<String>)> = self
            .batches
            .iter()
            .filter(|entry| {
                entry
                    .completed_instant
                    .map(|at| at.elapsed() >= retention)
                    .unwrap_or(false)
            })
            .map(|entry| (*entry.key(), entry.idempotency_key.clone()))
            .collect();

        for (batch_id, key) in &expired {
            self.batches.remove(batch_id);
            if let Some(key) = key {
                self.idempotency.remove_if(key, |_, holder| holder == batch_id);
            }
        }

        if !expired.is_empty() {
            debug!(evicted = expired.len(), "Evicted completed batches");
        }
        crate::metrics::set_tracked_batches(self.batches.len());
        expired.len()
    }
}
