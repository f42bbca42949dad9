//! Shared types for the payment domain and the gateway wire format.
//!
//! Status enums are stored as SCREAMING_SNAKE text columns, so every enum
//! carries `as_str` / `from_db_status` helpers alongside its serde derives.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// Internal payment lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Approved => "APPROVED",
            PaymentStatus::Rejected => "REJECTED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "PENDING" => Some(PaymentStatus::Pending),
            "APPROVED" => Some(PaymentStatus::Approved),
            "REJECTED" => Some(PaymentStatus::Rejected),
            "REFUNDED" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    /// Terminal statuses are settled outcomes. Reconciliation never moves a
    /// payment out of a terminal status into a different one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Approved | PaymentStatus::Rejected | PaymentStatus::Refunded
        )
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order lifecycle state. `Shipped` and `Delivered` are written by
/// fulfilment tooling, not by reconciliation, but round-trip through here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "PENDING" => Some(OrderStatus::Pending),
            "CONFIRMED" => Some(OrderStatus::Confirmed),
            "SHIPPED" => Some(OrderStatus::Shipped),
            "DELIVERED" => Some(OrderStatus::Delivered),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            "REFUNDED" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Pix,
    CreditCard,
    DebitCard,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Pix => "PIX",
            PaymentMethod::CreditCard => "CREDIT_CARD",
            PaymentMethod::DebitCard => "DEBIT_CARD",
        }
    }

    pub fn from_db_status(method: &str) -> Option<Self> {
        match method {
            "PIX" => Some(PaymentMethod::Pix),
            "CREDIT_CARD" => Some(PaymentMethod::CreditCard),
            "DEBIT_CARD" => Some(PaymentMethod::DebitCard),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw gateway notification. The gateway posts
/// `{"type": "payment", "data": {"id": ...}}` where `id` may arrive as a
/// JSON number or a string depending on the event source.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookNotification {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: Option<NotificationData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationData {
    #[serde(default, deserialize_with = "de_opt_id_string")]
    pub id: Option<String>,
}

impl WebhookNotification {
    pub fn is_payment(&self) -> bool {
        self.kind.as_deref() == Some("payment")
    }

    /// Payment id when the notification carries a non-empty one.
    pub fn payment_id(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

/// Payment detail as returned by `GET /v1/payments/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPayment {
    #[serde(deserialize_with = "de_id_string")]
    pub id: String,
    pub status: Option<String>,
    pub status_detail: Option<String>,
    pub external_reference: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub transaction_amount: Option<BigDecimal>,
    pub payment_method_id: Option<String>,
    pub payment_type_id: Option<String>,
    pub installments: Option<i32>,
    pub date_approved: Option<DateTime<Utc>>,
    pub date_created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub point_of_interaction: Option<PointOfInteraction>,
}

impl GatewayPayment {
    /// The gateway omits `status` on some partial payloads; those count as
    /// pending.
    pub fn status_or_pending(&self) -> &str {
        self.status.as_deref().unwrap_or("pending")
    }

    pub fn pix_data(&self) -> Option<&PixTransactionData> {
        self.point_of_interaction
            .as_ref()
            .and_then(|poi| poi.transaction_data.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PointOfInteraction {
    #[serde(default)]
    pub transaction_data: Option<PixTransactionData>,
}

/// PIX payload attached to pending PIX payments: the copy-paste code and a
/// base64-encoded QR rendering.
#[derive(Debug, Clone, Deserialize)]
pub struct PixTransactionData {
    pub qr_code: Option<String>,
    pub qr_code_base64: Option<String>,
    pub ticket_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutItem {
    pub id: String,
    pub title: String,
    pub quantity: u32,
    /// The gateway wire format takes amounts as JSON numbers.
    pub unit_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutPayer {
    pub name: String,
    pub surname: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<PayerPhone>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identification: Option<PayerIdentification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<PayerAddress>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayerPhone {
    pub area_code: String,
    pub number: String,
}

impl PayerPhone {
    /// Splits a free-form Brazilian phone number into area code + number.
    /// Strips formatting and a leading country code; inputs too short to
    /// split fall back to area code 11.
    pub fn parse(raw: &str) -> Self {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        let national = digits.strip_prefix("55").unwrap_or(&digits);

        if national.len() >= 10 {
            PayerPhone {
                area_code: national[..2].to_string(),
                number: national[2..].to_string(),
            }
        } else {
            PayerPhone {
                area_code: "11".to_string(),
                number: national.to_string(),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PayerIdentification {
    #[serde(rename = "type")]
    pub kind: String,
    pub number: String,
}

impl PayerIdentification {
    pub fn cpf(raw: &str) -> Self {
        PayerIdentification {
            kind: "CPF".to_string(),
            number: raw.chars().filter(|c| c.is_ascii_digit()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PayerAddress {
    pub street_name: String,
    pub street_number: String,
    pub zip_code: String,
    pub city: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackUrls {
    pub success: String,
    pub failure: String,
    pub pending: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreferencePaymentMethods {
    pub installments: u32,
    pub excluded_payment_types: Vec<ExcludedEntry>,
    pub excluded_payment_methods: Vec<ExcludedEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExcludedEntry {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutPreferenceRequest {
    pub items: Vec<CheckoutItem>,
    pub payer: CheckoutPayer,
    pub external_reference: String,
    pub back_urls: BackUrls,
    pub auto_return: String,
    pub payment_methods: PreferencePaymentMethods,
    pub notification_url: String,
    pub statement_descriptor: String,
}

/// Created preference as returned by the gateway. `init_point` is the
/// hosted checkout URL handed to the storefront.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutPreference {
    pub id: String,
    pub init_point: Option<String>,
    pub sandbox_init_point: Option<String>,
}

fn id_from_value<E: DeError>(value: JsonValue) -> Result<String, E> {
    match value {
        JsonValue::String(s) => Ok(s),
        JsonValue::Number(n) => Ok(n.to_string()),
        other => Err(E::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

fn de_id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = JsonValue::deserialize(deserializer)?;
    id_from_value(value)
}

fn de_opt_id_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    match Option::<JsonValue>::deserialize(deserializer)? {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => id_from_value(value).map(Some),
    }
}

/// Parses JSON numbers through their textual form so `89.9` becomes the
/// decimal `89.9` rather than the nearest f64 expansion.
fn de_opt_decimal<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<BigDecimal>, D::Error> {
    match Option::<JsonValue>::deserialize(deserializer)? {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Number(n)) => BigDecimal::from_str(&n.to_string())
            .map(Some)
            .map_err(|e| D::Error::custom(format!("invalid decimal amount: {e}"))),
        Some(JsonValue::String(s)) => BigDecimal::from_str(&s)
            .map(Some)
            .map_err(|e| D::Error::custom(format!("invalid decimal amount: {e}"))),
        Some(other) => Err(D::Error::custom(format!(
            "expected numeric amount, got {other}"
        ))),
    }
}
