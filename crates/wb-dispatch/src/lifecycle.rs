//! Lifecycle Manager - background tasks for broadcast dispatch
//!
//! Handles:
//! - Eviction of completed batches past the retention window
//! - Executor gauge publication
//! - Shutdown coordination (tickers first, then the executor)

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use wb_config::DispatchConfig;

use crate::executor::{DispatchExecutor, ShutdownReport};
use crate::tracker::BatchTracker;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// How long a completed batch stays pollable
    pub batch_retention: Duration,
    pub eviction_interval: Duration,
    pub stats_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            batch_retention: Duration::from_secs(3600),
            eviction_interval: Duration::from_secs(60),
            stats_interval: Duration::from_secs(10),
        }
    }
}

impl From<&DispatchConfig> for LifecycleConfig {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            batch_retention: Duration::from_secs(config.batch_retention_secs),
            ..Self::default()
        }
    }
}

pub struct LifecycleManager {
    shutdown_tx: broadcast::Sender<()>,
    executor: DispatchExecutor,
}

impl LifecycleManager {
    /// Start all lifecycle tasks
    pub fn start(
        executor: DispatchExecutor,
        tracker: Arc<BatchTracker>,
        config: LifecycleConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        // Completed batch eviction
        {
            let mut shutdown_rx = shutdown_tx.subscribe();
            let retention = config.batch_retention;
            let interval = config.eviction_interval;

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let evicted = tracker.evict_completed(retention);
                            if evicted > 0 {
                                debug!(evicted, remaining = tracker.len(), "Batch eviction ran");
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            info!("Batch eviction task shutting down");
                            break;
                        }
                    }
                }
            });
        }

        // Executor gauges
        {
            let executor = executor.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            let interval = config.stats_interval;

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let stats = executor.stats();
                            crate::metrics::set_executor_stats(&stats);
                            if stats.running && stats.queued >= stats.queue_capacity {
                                warn!(
                                    queued = stats.queued,
                                    workers = stats.worker_count,
                                    "Dispatch executor queue is full"
                                );
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            info!("Executor stats task shutting down");
                            break;
                        }
                    }
                }
            });
        }

        info!(
            retention_secs = config.batch_retention.as_secs(),
            "Lifecycle tasks started"
        );

        Self {
            shutdown_tx,
            executor,
        }
    }

    /// Stop background tasks, then shut the executor down
    pub async fn shutdown(&self) -> ShutdownReport {
        info!("Lifecycle manager shutting down");
        let _ = self.shutdown_tx.send(());

        let report = self.executor.shutdown().await;
        crate::metrics::set_executor_stats(&self.executor.stats());
        report
    }
}
