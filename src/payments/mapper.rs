//! Pure mapping from gateway vocabulary to internal statuses.
//!
//! Every function here is total: any input string yields a valid enum.
//! Unknown statuses map to pending.

use crate::payments::types::{OrderStatus, PaymentMethod, PaymentStatus};

/// Gateway `payment_type_id` values with an exact internal counterpart.
/// PIX settles through `bank_transfer` (and occasionally `account_money`
/// for wallet balances) on this gateway.
const METHOD_TYPE_MAPPINGS: &[(&str, PaymentMethod)] = &[
    ("credit_card", PaymentMethod::CreditCard),
    ("debit_card", PaymentMethod::DebitCard),
    ("bank_transfer", PaymentMethod::Pix),
    ("account_money", PaymentMethod::Pix),
];

/// Card brand tokens that show up inside `payment_method_id` values such as
/// `visa`, `master`, `debvisa` or `amex`.
const CARD_BRAND_TOKENS: &[&str] = &["visa", "master", "elo", "amex", "hipercard"];

pub fn map_payment_status(gateway_status: &str) -> PaymentStatus {
    match gateway_status {
        "approved" => PaymentStatus::Approved,
        "pending" => PaymentStatus::Pending,
        "rejected" | "cancelled" => PaymentStatus::Rejected,
        "refunded" => PaymentStatus::Refunded,
        _ => PaymentStatus::Pending,
    }
}

pub fn map_order_status(gateway_status: &str) -> OrderStatus {
    match gateway_status {
        "approved" => OrderStatus::Confirmed,
        "pending" => OrderStatus::Pending,
        "rejected" | "cancelled" => OrderStatus::Cancelled,
        "refunded" => OrderStatus::Refunded,
        _ => OrderStatus::Pending,
    }
}

/// Maps the gateway's method identifiers to an internal method.
///
/// `payment_method_id` equal to `pix` wins outright. Otherwise the
/// documented `payment_type_id` is consulted through the explicit table;
/// when it is absent or unrecognized, brand tokens in `payment_method_id`
/// are the fallback, and anything still unmatched counts as `CREDIT_CARD`.
pub fn map_payment_method(payment_method_id: &str, payment_type_id: Option<&str>) -> PaymentMethod {
    if payment_method_id == "pix" {
        return PaymentMethod::Pix;
    }

    if let Some(type_id) = payment_type_id {
        if let Some((_, method)) = METHOD_TYPE_MAPPINGS.iter().find(|(key, _)| *key == type_id) {
            return *method;
        }
    }

    if CARD_BRAND_TOKENS
        .iter()
        .any(|token| payment_method_id.contains(token))
    {
        return PaymentMethod::CreditCard;
    }

    PaymentMethod::CreditCard
}
