use thiserror::Error;
use wb_common::TemplateError;
use wb_store::StoreError;

/// Batch-level failures. Nothing has been dispatched when one of these is returned.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template {id} is not approved (status {status})")]
    TemplateNotApproved { id: String, status: String },

    #[error("No WhatsApp account registered for user {0}")]
    AccountNotFound(String),

    #[error("Broadcast has no recipients")]
    NoRecipients,

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Shutdown in progress")]
    ShutdownInProgress,
}

impl From<csv::Error> for DispatchError {
    fn from(e: csv::Error) -> Self {
        DispatchError::Csv(e.to_string())
    }
}
