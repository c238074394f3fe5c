pub mod entity;
pub mod logging;
pub mod phone;
pub mod template;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

pub use entity::*;
pub use template::{MediaType, TemplateComponent, TemplateError};

/// Per-recipient placeholder values, keyed by placeholder name (`"1"`, `"first_name"`)
pub type Variables = BTreeMap<String, String>;

/// Media attached to a broadcast header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub media_type: MediaType,
    pub url: String,
}

/// Input for one carousel card, in card order
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CarouselCardInput {
    #[serde(default)]
    pub media: Option<MediaRef>,
    #[serde(default)]
    pub variables: Variables,
}

/// One recipient of a broadcast, before normalization
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecipientEntry {
    pub phone: String,
    #[serde(default)]
    pub variables: Variables,
}

impl RecipientEntry {
    pub fn new(phone: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            variables: Variables::new(),
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }
}

/// Why a single recipient was not delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Phone number failed normalization
    InvalidRecipient,
    /// Template placeholders could not be filled
    InvalidVariables,
    /// Executor refused the task
    Rejected,
    /// Messaging platform refused the message (4xx)
    PlatformRejected,
    /// Network error, 429 or 5xx after retries
    Transient,
    CircuitOpen,
    /// The send task panicked
    Panicked,
    /// The task was dropped during shutdown
    Aborted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidRecipient => "invalid_recipient",
            FailureKind::InvalidVariables => "invalid_variables",
            FailureKind::Rejected => "rejected",
            FailureKind::PlatformRejected => "platform_rejected",
            FailureKind::Transient => "transient",
            FailureKind::CircuitOpen => "circuit_open",
            FailureKind::Panicked => "panicked",
            FailureKind::Aborted => "aborted",
        }
    }
}

/// Result of sending one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryResult {
    Delivered {
        #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    Failed {
        kind: FailureKind,
        detail: String,
    },
}

impl DeliveryResult {
    pub fn delivered(message_id: Option<String>) -> Self {
        DeliveryResult::Delivered { message_id }
    }

    pub fn failed(kind: FailureKind, detail: impl Into<String>) -> Self {
        DeliveryResult::Failed {
            kind,
            detail: detail.into(),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryResult::Delivered { .. })
    }
}

/// Outcome of one dispatch task. Exactly one per recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub batch_id: Uuid,
    /// Position in the submitted recipient list
    pub index: usize,
    pub recipient: String,
    pub result: DeliveryResult,
}

/// Aggregate counts for a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResultData {
    pub total_dispatched: u32,
    pub failed_count: u32,
    pub message: String,
}

impl DispatchResultData {
    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            total_dispatched: 0,
            failed_count: 0,
            message: message.into(),
        }
    }

    pub fn total(&self) -> u32 {
        self.total_dispatched + self.failed_count
    }
}

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";

/// Response body of the broadcast dispatch endpoints
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BroadcastDispatchResponse {
    pub status: String,
    pub message: String,
    pub data: DispatchResultData,
}

impl BroadcastDispatchResponse {
    pub fn completed(data: DispatchResultData) -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            message: "Broadcast dispatched".to_string(),
            data,
        }
    }

    /// Batch-level failure: nothing was dispatched
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: STATUS_ERROR.to_string(),
            data: DispatchResultData::empty(message.clone()),
            message,
        }
    }
}

/// Standard `{status, message, data}` envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR.to_string(),
            message: message.into(),
            data: None,
        }
    }
}
