//! Persisted records: templates, WhatsApp accounts, wallets, countries, broadcast media.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::template::{MediaType, TemplateComponent};

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// ============================================================================
// Templates
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateStatus {
    Pending,
    Approved,
    Rejected,
    Paused,
    Disabled,
}

impl TemplateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateStatus::Pending => "PENDING",
            TemplateStatus::Approved => "APPROVED",
            TemplateStatus::Rejected => "REJECTED",
            TemplateStatus::Paused => "PAUSED",
            TemplateStatus::Disabled => "DISABLED",
        }
    }
}

impl FromStr for TemplateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(TemplateStatus::Pending),
            "APPROVED" => Ok(TemplateStatus::Approved),
            "REJECTED" => Ok(TemplateStatus::Rejected),
            "PAUSED" => Ok(TemplateStatus::Paused),
            "DISABLED" => Ok(TemplateStatus::Disabled),
            other => Err(format!("unknown template status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateCategory {
    Marketing,
    Utility,
    Authentication,
}

impl TemplateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateCategory::Marketing => "MARKETING",
            TemplateCategory::Utility => "UTILITY",
            TemplateCategory::Authentication => "AUTHENTICATION",
        }
    }
}

impl FromStr for TemplateCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MARKETING" => Ok(TemplateCategory::Marketing),
            "UTILITY" => Ok(TemplateCategory::Utility),
            "AUTHENTICATION" => Ok(TemplateCategory::Authentication),
            other => Err(format!("unknown template category: {}", other)),
        }
    }
}

/// A message template registered for an account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub account_id: String,
    pub name: String,
    pub language: String,
    pub category: TemplateCategory,
    pub status: TemplateStatus,
    pub components: Vec<TemplateComponent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Template {
    pub fn new(
        account_id: impl Into<String>,
        name: impl Into<String>,
        language: impl Into<String>,
        category: TemplateCategory,
        components: Vec<TemplateComponent>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            account_id: account_id.into(),
            name: name.into(),
            language: language.into(),
            category,
            status: TemplateStatus::Pending,
            components,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_dispatchable(&self) -> bool {
        self.status == TemplateStatus::Approved && self.deleted_at.is_none()
    }
}

// ============================================================================
// WhatsApp Accounts
// ============================================================================

/// Sender credentials for a platform user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppAccount {
    pub id: String,
    pub user_id: String,
    /// WhatsApp Business Account id
    pub waba_id: String,
    pub phone_number_id: String,
    pub display_phone_number: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WhatsAppAccount {
    pub fn new(
        user_id: impl Into<String>,
        waba_id: impl Into<String>,
        phone_number_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            user_id: user_id.into(),
            waba_id: waba_id.into(),
            phone_number_id: phone_number_id.into(),
            display_phone_number: None,
            access_token: access_token.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// Wallets
// ============================================================================

/// Prepaid message balance, kept in minor currency units
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: String,
    pub user_id: String,
    pub balance_minor: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(
        user_id: impl Into<String>,
        currency: impl Into<String>,
        balance_minor: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            user_id: user_id.into(),
            balance_minor,
            currency: currency.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// Countries
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Country {
    pub id: String,
    pub name: String,
    /// ISO 3166-1 alpha-2, upper case
    pub iso_code: String,
    /// Calling code without `+`
    pub dial_code: String,
    /// Per-message price in minor units
    pub message_price_minor: i64,
    pub created_at: DateTime<Utc>,
}

impl Country {
    pub fn new(
        name: impl Into<String>,
        iso_code: &str,
        dial_code: &str,
        message_price_minor: i64,
    ) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            iso_code: iso_code.trim().to_ascii_uppercase(),
            dial_code: dial_code.trim().trim_start_matches('+').to_string(),
            message_price_minor,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Broadcast Media
// ============================================================================

/// Media attached to a broadcast
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMedia {
    pub id: String,
    pub broadcast_id: String,
    pub media_type: MediaType,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl BroadcastMedia {
    pub fn new(
        broadcast_id: impl Into<String>,
        media_type: MediaType,
        url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            broadcast_id: broadcast_id.into(),
            media_type,
            url: url.into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}
