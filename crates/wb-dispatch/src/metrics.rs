//! Prometheus-compatible metrics for broadcast dispatch

use metrics::{counter, gauge, histogram};
use std::time::Duration;

use crate::executor::ExecutorStats;
use wb_common::DeliveryResult;

/// Record one recipient outcome
pub fn record_outcome(result: &DeliveryResult) {
    let label = match result {
        DeliveryResult::Delivered { .. } => "delivered",
        DeliveryResult::Failed { kind, .. } => kind.as_str(),
    };
    counter!("wb_dispatch_outcomes_total", "result" => label).increment(1);
}

/// Record a task refused by the executor
pub fn record_rejection() {
    counter!("wb_executor_rejections_total").increment(1);
}

/// Record the latency of one messaging API call, retries included
pub fn record_send_duration(duration: Duration, success: bool) {
    histogram!(
        "wb_send_duration_seconds",
        "success" => success.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_batch_started(recipients: usize) {
    counter!("wb_batches_started_total").increment(1);
    histogram!("wb_batch_recipients").record(recipients as f64);
}

pub fn record_batch_completed(delivered: u32, failed: u32) {
    counter!("wb_batches_completed_total").increment(1);
    counter!("wb_batch_recipients_delivered_total").increment(delivered as u64);
    counter!("wb_batch_recipients_failed_total").increment(failed as u64);
}

/// Publish executor gauges
pub fn set_executor_stats(stats: &ExecutorStats) {
    gauge!("wb_executor_queue_size").set(stats.queued as f64);
    gauge!("wb_executor_active_workers").set(stats.active_workers as f64);
    gauge!("wb_executor_workers").set(stats.worker_count as f64);
}

pub fn set_tracked_batches(count: usize) {
    gauge!("wb_tracked_batches").set(count as f64);
}
