//! Broadcast dispatch
//!
//! A broadcast turns one approved template and a recipient list into one send
//! task per recipient. Tasks run on the shared [`DispatchExecutor`]; their
//! outcomes fold into a [`ResultAggregator`] owned by the batch.

pub mod aggregator;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod metrics;
pub mod payload;
pub mod recipients;
pub mod task;
pub mod tracker;

pub use aggregator::{BatchProgress, BatchReport, FailureDetail, ResultAggregator};
pub use client::{CircuitBreaker, CircuitState, HttpMessagingClient, MessagingClient};
pub use dispatcher::{
    AccountLookup, BatchTicket, BroadcastDispatcher, BroadcastRequest, TemplateLookup,
};
pub use error::DispatchError;
pub use executor::{
    DispatchExecutor, ExecutorConfig, ExecutorStats, ShutdownReport, SubmitError, TaskError,
    TaskHandle,
};
pub use lifecycle::{LifecycleConfig, LifecycleManager};
pub use payload::TemplatePlan;
pub use recipients::{PreparedRecipients, RecipientSource};
pub use task::DispatchTask;
pub use tracker::{BatchSnapshot, BatchState, BatchTracker};

pub type Result<T> = std::result::Result<T, DispatchError>;
