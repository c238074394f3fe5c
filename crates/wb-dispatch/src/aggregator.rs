//! Per-batch outcome accumulation

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use wb_common::{DeliveryResult, DispatchOutcome, DispatchResultData, FailureKind};

/// Failure details kept per batch; counts are always exact
pub const MAX_FAILURE_DETAILS: usize = 500;

/// One failed recipient
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    pub index: usize,
    pub recipient: String,
    pub kind: FailureKind,
    pub detail: String,
}

/// Live counters for a running batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub expected: u32,
    pub delivered: u32,
    pub failed: u32,
}

impl BatchProgress {
    pub fn remaining(&self) -> u32 {
        self.expected.saturating_sub(self.delivered + self.failed)
    }
}

/// Final result of a batch
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub data: DispatchResultData,
    #[schema(value_type = Object)]
    pub failures_by_kind: HashMap<FailureKind, u32>,
    pub failures: Vec<FailureDetail>,
    /// True when more failures happened than were kept
    pub failures_truncated: bool,
}

/// Thread-safe accumulator for one batch's outcomes
pub struct ResultAggregator {
    batch_id: Uuid,
    expected: u32,
    delivered: AtomicU32,
    failed: AtomicU32,
    failures: Mutex<Vec<FailureDetail>>,
    failures_by_kind: Mutex<HashMap<FailureKind, u32>>,
    finished: AtomicBool,
}

impl ResultAggregator {
    pub fn new(batch_id: Uuid, expected: usize) -> Self {
        Self {
            batch_id,
            expected: u32::try_from(expected).unwrap_or(u32::MAX),
            delivered: AtomicU32::new(0),
            failed: AtomicU32::new(0),
            failures: Mutex::new(Vec::new()),
            failures_by_kind: Mutex::new(HashMap::new()),
            finished: AtomicBool::new(false),
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn record(&self, outcome: DispatchOutcome) {
        if self.finished.load(Ordering::SeqCst) {
            warn!(
                batch_id = %self.batch_id,
                index = outcome.index,
                "Outcome recorded after batch finished, ignoring"
            );
            return;
        }

        crate::metrics::record_outcome(&outcome.result);

        match outcome.result {
            DeliveryResult::Delivered { .. } => {
                self.delivered.fetch_add(1, Ordering::SeqCst);
            }
            DeliveryResult::Failed { kind, detail } => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                *self.failures_by_kind.lock().entry(kind).or_insert(0) += 1;

                let mut failures = self.failures.lock();
                if failures.len() < MAX_FAILURE_DETAILS {
                    failures.push(FailureDetail {
                        index: outcome.index,
                        recipient: outcome.recipient,
                        kind,
                        detail,
                    });
                }
            }
        }
    }

    pub fn progress(&self) -> BatchProgress {
        BatchProgress {
            expected: self.expected,
            delivered: self.delivered.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    /// Freeze the batch. Later `record` calls are ignored.
    pub fn finish(&self) -> BatchReport {
        self.finished.store(true, Ordering::SeqCst);
        let progress = self.progress();

        if progress.remaining() > 0 {
            warn!(
                batch_id = %self.batch_id,
                missing = progress.remaining(),
                "Batch finished with outcomes missing"
            );
        }

        let mut failures = self.failures.lock().clone();
        failures.sort_by_key(|f| f.index);

        BatchReport {
            batch_id: self.batch_id,
            data: DispatchResultData {
                total_dispatched: progress.delivered,
                failed_count: progress.failed,
                message: summary_message(progress.delivered, progress.expected),
            },
            failures_by_kind: self.failures_by_kind.lock().clone(),
            failures_truncated: (progress.failed as usize) > failures.len(),
            failures,
        }
    }
}

pub fn summary_message(delivered: u32, total: u32) -> String {
    if total == 0 {
        "no recipients".to_string()
    } else if delivered == total {
        format!("all {} delivered", total)
    } else {
        format!("{} of {} delivered", delivered, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn outcome(batch_id: Uuid, index: usize, result: DeliveryResult) -> DispatchOutcome {
        DispatchOutcome {
            batch_id,
            index,
            recipient: format!("1415555{:04}", index),
            result,
        }
    }

    #[test]
    fn test_summary_messages() {
        assert_eq!(summary_message(0, 0), "no recipients");
        assert_eq!(summary_message(3, 3), "all 3 delivered");
        assert_eq!(summary_message(2, 3), "2 of 3 delivered");
        assert_eq!(summary_message(0, 4), "0 of 4 delivered");
    }

    #[test]
    fn test_counts_and_failures() {
        let batch_id = Uuid::new_v4();
        let agg = ResultAggregator::new(batch_id, 3);

        agg.record(outcome(batch_id, 0, DeliveryResult::delivered(Some("wamid.1".into()))));
        agg.record(outcome(
            batch_id,
            1,
            DeliveryResult::failed(FailureKind::PlatformRejected, "HTTP 400"),
        ));
        agg.record(outcome(batch_id, 2, DeliveryResult::delivered(None)));

        let report = agg.finish();
        assert_eq!(report.data.total_dispatched, 2);
        assert_eq!(report.data.failed_count, 1);
        assert_eq!(report.data.message, "2 of 3 delivered");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert_eq!(report.failures_by_kind[&FailureKind::PlatformRejected], 1);
        assert!(!report.failures_truncated);
    }

    #[test]
    fn test_frozen_after_finish() {
        let batch_id = Uuid::new_v4();
        let agg = ResultAggregator::new(batch_id, 1);
        agg.record(outcome(batch_id, 0, DeliveryResult::delivered(None)));
        let first = agg.finish();

        agg.record(outcome(batch_id, 0, DeliveryResult::failed(FailureKind::Transient, "late")));
        let second = agg.finish();
        assert_eq!(first.data, second.data);
        assert_eq!(second.data.failed_count, 0);
    }

    #[test]
    fn test_concurrent_recording() {
        let batch_id = Uuid::new_v4();
        let agg = Arc::new(ResultAggregator::new(batch_id, 800));

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let index = t * 100 + i;
                        let result = if index % 4 == 0 {
                            DeliveryResult::failed(FailureKind::Transient, "timeout")
                        } else {
                            DeliveryResult::delivered(None)
                        };
                        agg.record(outcome(batch_id, index, result));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let report = agg.finish();
        assert_eq!(report.data.total_dispatched, 600);
        assert_eq!(report.data.failed_count, 200);
        assert_eq!(report.data.total(), 800);
    }

    #[test]
    fn test_expected_saturates_instead_of_wrapping() {
        let agg = ResultAggregator::new(Uuid::new_v4(), usize::MAX);
        assert_eq!(agg.progress().expected, u32::MAX);
        assert_eq!(agg.progress().remaining(), u32::MAX);
    }

    #[test]
    fn test_failure_details_bounded() {
        let batch_id = Uuid::new_v4();
        let total = MAX_FAILURE_DETAILS + 10;
        let agg = ResultAggregator::new(batch_id, total);
        for i in 0..total {
            let result = DeliveryResult::failed(FailureKind::InvalidRecipient, "bad");
            agg.record(outcome(batch_id, i, result));
        }
        let report = agg.finish();
        assert_eq!(report.data.failed_count as usize, total);
        assert_eq!(report.failures.len(), MAX_FAILURE_DETAILS);
        assert!(report.failures_truncated);
    }
}
