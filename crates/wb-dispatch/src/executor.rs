//! DispatchExecutor - bounded worker pool for send tasks
//!
//! Sizing follows a core/max/queue model:
//! - Below `core_workers`, every submission starts a new worker
//! - At core, submissions wait in a bounded FIFO queue
//! - When the queue is full, extra workers are started up to `max_workers`
//! - When both are exhausted the submission is rejected (`try_submit`) or
//!   waits for queue space up to `submit_timeout` (`submit`)
//!
//! Workers above the core count retire after `keep_alive` without work.
//! A panic inside a task is caught and reported through its `TaskHandle`;
//! the worker keeps running.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use utoipa::ToSchema;

use wb_config::DispatchConfig;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Executor sizing and timing
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub core_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub keep_alive: Duration,
    pub submit_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub thread_name_prefix: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for ExecutorConfig {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            core_workers: config.core_workers.max(1),
            max_workers: config.max_workers.max(config.core_workers.max(1)),
            queue_capacity: config.queue_capacity.max(1),
            keep_alive: Duration::from_secs(config.keep_alive_secs),
            submit_timeout: Duration::from_millis(config.submit_timeout_ms),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
            thread_name_prefix: config.thread_name_prefix.clone(),
        }
    }
}

/// Why a submission was refused
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("executor has not been started")]
    NotStarted,

    #[error("executor is saturated: all workers busy and queue full")]
    Saturated,

    #[error("timed out waiting for executor capacity")]
    Timeout,

    #[error("executor is shutting down")]
    ShuttingDown,
}

/// Why a submitted task produced no value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task was aborted before completing")]
    Aborted,
}

/// Completion handle for one submitted task
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the job was discarded without running to the end
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TaskError::Aborted)))
    }
}

/// Summary of a shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// True when the grace period ran out and workers were aborted
    pub forced: bool,
    pub aborted_workers: usize,
    /// Queued jobs discarded after the grace period
    pub dropped_jobs: usize,
}

/// Point-in-time executor statistics
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorStats {
    pub running: bool,
    pub core_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub worker_count: usize,
    pub active_workers: usize,
    pub queued: usize,
    pub completed: u64,
    pub rejected: u64,
}

struct Inner {
    config: ExecutorConfig,
    /// Taken on drain so the channel closes once queued jobs are consumed
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    receiver: Mutex<mpsc::Receiver<Job>>,
    started: AtomicBool,
    running: AtomicBool,
    stopping: Notify,
    worker_count: AtomicUsize,
    active: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicU64,
    rejected: AtomicU64,
    next_worker_id: AtomicU64,
    workers: DashMap<u64, AbortHandle>,
}

/// Bounded worker pool. Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct DispatchExecutor {
    inner: Arc<Inner>,
}

enum Offer {
    Accepted,
    Full(Job),
    Closed,
}

impl DispatchExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                sender: RwLock::new(Some(tx)),
                receiver: Mutex::new(rx),
                started: AtomicBool::new(false),
                running: AtomicBool::new(false),
                stopping: Notify::new(),
                worker_count: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                next_worker_id: AtomicU64::new(1),
                workers: DashMap::new(),
            }),
        }
    }

    /// Start accepting work and spawn the core workers
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.running.store(true, Ordering::SeqCst);

        let core = self.inner.config.core_workers;
        for _ in 0..core {
            if self.inner.try_reserve_worker(core) {
                Inner::spawn_worker(&self.inner, None);
            }
        }

        info!(
            core_workers = core,
            max_workers = self.inner.config.max_workers,
            queue_capacity = self.inner.config.queue_capacity,
            "Dispatch executor started"
        );
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Submit without waiting; rejects when workers and queue are exhausted
    pub fn try_submit<F, T>(&self, task: F) -> Result<TaskHandle<T>, SubmitError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.check_accepting()?;
        let (job, handle) = wrap(task);

        match self.inner.offer(job) {
            Offer::Accepted => Ok(handle),
            Offer::Full(_) => {
                self.inner.record_rejection();
                Err(SubmitError::Saturated)
            }
            Offer::Closed => Err(SubmitError::ShuttingDown),
        }
    }

    /// Submit, waiting up to `submit_timeout` for queue space when saturated
    pub async fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>, SubmitError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.check_accepting()?;
        let (job, handle) = wrap(task);

        let job = match self.inner.offer(job) {
            Offer::Accepted => return Ok(handle),
            Offer::Full(job) => job,
            Offer::Closed => return Err(SubmitError::ShuttingDown),
        };

        let sender = match self.inner.sender.read().clone() {
            Some(sender) => sender,
            None => return Err(SubmitError::ShuttingDown),
        };

        let stopping = self.inner.stopping.notified();
        tokio::pin!(stopping);
        stopping.as_mut().enable();
        if !self.is_running() {
            return Err(SubmitError::ShuttingDown);
        }

        debug!("Executor saturated, waiting for queue space");
        let deadline = Instant::now() + self.inner.config.submit_timeout;

        tokio::select! {
            reserved = tokio::time::timeout_at(deadline, sender.reserve()) => match reserved {
                Ok(Ok(permit)) => {
                    self.inner.queued.fetch_add(1, Ordering::SeqCst);
                    permit.send(job);
                    Ok(handle)
                }
                Ok(Err(_)) => Err(SubmitError::ShuttingDown),
                Err(_) => {
                    self.inner.record_rejection();
                    Err(SubmitError::Timeout)
                }
            },
            _ = &mut stopping => Err(SubmitError::ShuttingDown),
        }
    }

    fn check_accepting(&self) -> Result<(), SubmitError> {
        if !self.inner.started.load(Ordering::SeqCst) {
            return Err(SubmitError::NotStarted);
        }
        if !self.is_running() {
            return Err(SubmitError::ShuttingDown);
        }
        Ok(())
    }

    /// Stop accepting work. Queued jobs still run; workers exit once the queue is empty.
    pub fn drain(&self) {
        let was_running = self.inner.running.swap(false, Ordering::SeqCst);
        self.inner.sender.write().take();
        self.inner.stopping.notify_waiters();
        if was_running {
            info!(
                queued = self.inner.queued.load(Ordering::SeqCst),
                active = self.inner.active.load(Ordering::SeqCst),
                "Draining dispatch executor"
            );
        }
    }

    pub fn is_drained(&self) -> bool {
        self.inner.worker_count.load(Ordering::SeqCst) == 0
            && self.inner.queued.load(Ordering::SeqCst) == 0
    }

    /// Drain, wait up to `shutdown_timeout`, then abort whatever is left.
    ///
    /// Aborted and discarded tasks resolve their handles with `TaskError::Aborted`.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.drain();

        let grace = self.inner.config.shutdown_timeout;
        let deadline = Instant::now() + grace;
        while self.inner.worker_count.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }

        if self.inner.worker_count.load(Ordering::SeqCst) == 0 {
            info!(
                completed = self.inner.completed.load(Ordering::SeqCst),
                "Dispatch executor terminated"
            );
            return ShutdownReport {
                forced: false,
                aborted_workers: 0,
                dropped_jobs: 0,
            };
        }

        warn!(
            grace_secs = grace.as_secs(),
            workers = self.inner.worker_count.load(Ordering::SeqCst),
            queued = self.inner.queued.load(Ordering::SeqCst),
            "Shutdown grace period elapsed, aborting workers"
        );

        let mut aborted_workers = 0;
        for entry in self.inner.workers.iter() {
            entry.value().abort();
            aborted_workers += 1;
        }
        self.inner.workers.clear();

        let dropped_jobs = {
            let mut rx = self.inner.receiver.lock().await;
            rx.close();
            let mut dropped = 0;
            while let Ok(job) = rx.try_recv() {
                drop(job);
                dropped += 1;
            }
            dropped
        };

        self.inner.queued.store(0, Ordering::SeqCst);
        self.inner.active.store(0, Ordering::SeqCst);
        self.inner.worker_count.store(0, Ordering::SeqCst);

        warn!(aborted_workers, dropped_jobs, "Dispatch executor force-stopped");
        ShutdownReport {
            forced: true,
            aborted_workers,
            dropped_jobs,
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        let inner = &self.inner;
        ExecutorStats {
            running: self.is_running(),
            core_workers: inner.config.core_workers,
            max_workers: inner.config.max_workers,
            queue_capacity: inner.config.queue_capacity,
            worker_count: inner.worker_count.load(Ordering::SeqCst),
            active_workers: inner.active.load(Ordering::SeqCst),
            queued: inner.queued.load(Ordering::SeqCst),
            completed: inner.completed.load(Ordering::SeqCst),
            rejected: inner.rejected.load(Ordering::SeqCst),
        }
    }
}

impl Inner {
    fn offer(self: &Arc<Self>, job: Job) -> Offer {
        if !self.running.load(Ordering::SeqCst) {
            return Offer::Closed;
        }

        if self.try_reserve_worker(self.config.core_workers) {
            Self::spawn_worker(self, Some(job));
            return Offer::Accepted;
        }

        let sender = match self.sender.read().clone() {
            Some(sender) => sender,
            None => return Offer::Closed,
        };

        // Count before sending so a fast worker never decrements below zero
        self.queued.fetch_add(1, Ordering::SeqCst);
        let job = match sender.try_send(job) {
            Ok(()) => return Offer::Accepted,
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                job
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                return Offer::Closed;
            }
        };

        if self.try_reserve_worker(self.config.max_workers) {
            debug!(
                workers = self.worker_count.load(Ordering::SeqCst),
                "Queue full, starting extra worker"
            );
            Self::spawn_worker(self, Some(job));
            return Offer::Accepted;
        }

        Offer::Full(job)
    }

    fn record_rejection(&self) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
        crate::metrics::record_rejection();
        warn!(
            workers = self.worker_count.load(Ordering::SeqCst),
            queued = self.queued.load(Ordering::SeqCst),
            "Dispatch executor rejected a task"
        );
    }

    fn try_reserve_worker(&self, limit: usize) -> bool {
        let mut current = self.worker_count.load(Ordering::SeqCst);
        while current < limit {
            match self.worker_count.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Release a worker slot if the pool is above its core size
    fn try_retire(&self) -> bool {
        let mut current = self.worker_count.load(Ordering::SeqCst);
        while current > self.config.core_workers {
            match self.worker_count.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Caller must already hold a reserved worker slot
    fn spawn_worker(this: &Arc<Self>, first: Option<Job>) {
        let id = this.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let name = format!("{}{}", this.config.thread_name_prefix, id);
        let span = info_span!("worker", name = %name);
        let inner = Arc::clone(this);

        // The worker removes its own entry on exit, so it waits until inserted
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(
            async move {
                let _ = registered_rx.await;
                Self::run_worker(inner, id, first).await;
            }
            .instrument(span),
        );
        this.workers.insert(id, handle.abort_handle());
        let _ = registered_tx.send(());
    }

    async fn run_worker(inner: Arc<Self>, id: u64, first: Option<Job>) {
        debug!("Worker started");

        if let Some(job) = first {
            inner.run_job(job).await;
        }

        let keep_alive = inner.config.keep_alive;
        let retired = loop {
            let next = tokio::time::timeout(keep_alive, async {
                inner.receiver.lock().await.recv().await
            })
            .await;

            match next {
                Ok(Some(job)) => {
                    inner.queued.fetch_sub(1, Ordering::SeqCst);
                    inner.run_job(job).await;
                }
                // Channel closed and empty
                Ok(None) => break false,
                Err(_) => {
                    if inner.try_retire() {
                        debug!("Idle worker above core size retiring");
                        break true;
                    }
                }
            }
        };

        if !retired {
            saturating_decrement(&inner.worker_count);
        }
        inner.workers.remove(&id);
        debug!("Worker exited");
    }

    async fn run_job(&self, job: Job) {
        self.active.fetch_add(1, Ordering::SeqCst);
        job.await;
        saturating_decrement(&self.active);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counters are reset on forced shutdown while stragglers may still exit
fn saturating_decrement(counter: &AtomicUsize) {
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
}

fn wrap<F, T>(task: F) -> (Job, TaskHandle<T>)
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let job = Box::pin(async move {
        let result = AssertUnwindSafe(task)
            .catch_unwind()
            .await
            .map_err(|payload| {
                let message = panic_message(payload.as_ref());
                warn!(panic = %message, "Dispatch task panicked");
                TaskError::Panicked(message)
            });
        let _ = tx.send(result);
    });
    (job, TaskHandle { rx })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ExecutorConfig {
        ExecutorConfig {
            core_workers: 2,
            max_workers: 3,
            queue_capacity: 2,
            keep_alive: Duration::from_millis(100),
            submit_timeout: Duration::from_millis(200),
            shutdown_timeout: Duration::from_secs(2),
            thread_name_prefix: "test-dispatch-".to_string(),
        }
    }

    #[test]
    fn test_config_from_dispatch_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.core_workers, 10);
        assert_eq!(config.max_workers, 20);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_submit_before_start_refused() {
        let executor = DispatchExecutor::new(small_config());
        assert_eq!(executor.try_submit(async {}).err(), Some(SubmitError::NotStarted));
    }

    #[tokio::test]
    async fn test_handle_returns_value() {
        let executor = DispatchExecutor::new(small_config());
        executor.start();

        let handle = executor.try_submit(async { 21 * 2 }).unwrap();
        assert_eq!(handle.await, Ok(42));
    }

    #[tokio::test]
    async fn test_panic_caught() {
        let executor = DispatchExecutor::new(small_config());
        executor.start();

        let handle = executor
            .try_submit(async {
                panic!("boom");
            })
            .unwrap();
        assert_eq!(handle.await, Err::<(), _>(TaskError::Panicked("boom".to_string())));

        // Worker survives
        let handle = executor.try_submit(async { "still alive" }).unwrap();
        assert_eq!(handle.await, Ok("still alive"));
    }

    #[test]
    fn test_panic_message_variants() {
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
