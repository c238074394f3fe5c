//! Request and response bodies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use wb_common::template::TemplateComponent;
use wb_common::{
    CarouselCardInput, MediaRef, MediaType, RecipientEntry, TemplateCategory, TemplateStatus,
};

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletRequest {
    pub user_id: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Opening balance in minor units
    #[serde(default)]
    pub initial_balance: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BalanceAdjustmentRequest {
    /// Positive amount in minor units
    pub amount: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateRequest {
    /// WhatsApp account id the template belongs to
    pub account_id: String,
    pub name: String,
    pub language: String,
    pub category: TemplateCategory,
    #[schema(value_type = Vec<Object>)]
    pub components: Vec<TemplateComponent>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTemplateStatusRequest {
    pub status: TemplateStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateListQuery {
    pub account_id: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub user_id: String,
    pub waba_id: String,
    pub phone_number_id: String,
    #[serde(default)]
    pub display_phone_number: Option<String>,
    pub access_token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCountryRequest {
    pub name: String,
    pub iso_code: String,
    pub dial_code: String,
    #[serde(default)]
    pub message_price_minor: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateBroadcastMediaRequest {
    pub broadcast_id: String,
    pub media_type: MediaType,
    pub url: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
    pub file_name: String,
    pub media_type: MediaType,
    pub size: usize,
}

/// Broadcast with explicit recipients
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequestBody {
    pub template_id: String,
    pub user_id: String,
    pub recipients: Vec<RecipientEntry>,
    #[serde(default)]
    pub media: Option<MediaRef>,
    #[serde(default)]
    pub carousel: Vec<CarouselCardInput>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvBroadcastQuery {
    pub template_id: String,
    pub user_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct SimpleHealthResponse {
    /// UP or DEGRADED
    pub status: String,
    pub version: String,
}

#[derive(Serialize, ToSchema)]
pub struct HealthCheckResponse {
    /// LIVE, READY or NOT_READY
    pub status: String,
}
