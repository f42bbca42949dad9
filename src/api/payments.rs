//! Payments API: hosted-checkout creation and local status lookup.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use bigdecimal::ToPrimitive;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::database::order_repository::{OrderDetails, OrderRepository};
use crate::database::payment_repository::PaymentRepository;
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::middleware::error::get_request_id_from_headers;
use crate::payments::gateway::PaymentGateway;
use crate::payments::types::{
    BackUrls, CheckoutItem, CheckoutPayer, CheckoutPreferenceRequest, ExcludedEntry,
    PayerAddress, PayerIdentification, PayerPhone, PaymentStatus, PreferencePaymentMethods,
};

#[derive(Clone)]
pub struct PaymentsState {
    pub orders: OrderRepository,
    pub payments: PaymentRepository,
    pub gateway: Arc<dyn PaymentGateway>,
    /// Externally reachable base URL, used for back URLs and the
    /// notification URL registered with the gateway.
    pub public_url: String,
    pub public_key: String,
    pub statement_descriptor: String,
}

pub fn routes(state: PaymentsState) -> Router {
    Router::new()
        .route("/api/payments/checkout", post(create_checkout))
        .route("/api/payments/status/{external_id}", get(payment_status))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub preference_id: String,
    pub init_point: Option<String>,
    pub sandbox_init_point: Option<String>,
    pub public_key: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub external_id: String,
    pub status: String,
    pub method: String,
    pub amount: String,
    pub installments: i32,
    pub pix_qr_code: Option<String>,
    pub pix_qr_code_base64: Option<String>,
    pub failure_reason: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub order: OrderSummary,
}

#[derive(Debug, Serialize)]
pub struct OrderSummary {
    pub id: Uuid,
    pub order_number: String,
    pub status: String,
    pub total: String,
    pub customer_name: String,
    pub customer_email: String,
}

/// Builds the gateway preference request from a stored order.
pub fn build_preference_request(
    details: &OrderDetails,
    public_url: &str,
    statement_descriptor: &str,
) -> CheckoutPreferenceRequest {
    let order = &details.order;
    let base = public_url.trim_end_matches('/');

    let items = details
        .items
        .iter()
        .map(|item| {
            let mut title = item.product_name.clone();
            if let Some(size) = &item.size {
                title.push_str(&format!(" - Tam. {}", size));
            }
            CheckoutItem {
                id: item.id.to_string(),
                title,
                quantity: item.quantity.max(0) as u32,
                unit_price: item.unit_price.to_f64().unwrap_or(0.0),
                picture_url: item.image_url.clone(),
                description: item.color.clone(),
            }
        })
        .collect();

    let mut names = order.customer_name.split_whitespace();
    let first = names.next().unwrap_or(&order.customer_name).to_string();
    let surname = {
        let rest = names.collect::<Vec<_>>().join(" ");
        if rest.is_empty() {
            first.clone()
        } else {
            rest
        }
    };

    CheckoutPreferenceRequest {
        items,
        payer: CheckoutPayer {
            name: first,
            surname,
            email: order.customer_email.clone(),
            phone: Some(PayerPhone::parse(&order.customer_phone)),
            identification: order
                .customer_cpf
                .as_deref()
                .map(PayerIdentification::cpf),
            address: Some(PayerAddress {
                street_name: details.address.street.clone(),
                street_number: details.address.number.clone(),
                zip_code: details.address.zip_code.clone(),
                city: details.address.city.clone(),
                state: details.address.state.clone(),
            }),
        },
        external_reference: order.id.to_string(),
        back_urls: BackUrls {
            success: format!("{}/checkout/success?order={}", base, order.id),
            failure: format!("{}/checkout/failure?order={}", base, order.id),
            pending: format!("{}/checkout/pending?order={}", base, order.id),
        },
        auto_return: "approved".to_string(),
        payment_methods: PreferencePaymentMethods {
            installments: 12,
            excluded_payment_types: Vec::<ExcludedEntry>::new(),
            excluded_payment_methods: Vec::<ExcludedEntry>::new(),
        },
        notification_url: format!("{}/api/webhooks/mercadopago", base),
        statement_descriptor: statement_descriptor.to_string(),
    }
}

/// POST /api/payments/checkout
pub async fn create_checkout(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Json(payload): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    let with_request_id = |e: AppError| match &request_id {
        Some(req_id) => e.with_request_id(req_id.clone()),
        None => e,
    };

    let details = state
        .orders
        .load_details(payload.order_id)
        .await
        .map_err(AppError::from)
        .map_err(&with_request_id)?
        .ok_or_else(|| {
            with_request_id(AppError::new(AppErrorKind::Domain(
                DomainError::OrderNotFound {
                    order_id: payload.order_id.to_string(),
                },
            )))
        })?;

    // Paid orders must not get a second checkout.
    if PaymentStatus::from_db_status(&details.order.payment_status)
        == Some(PaymentStatus::Approved)
    {
        return Err(with_request_id(AppError::new(AppErrorKind::Domain(
            DomainError::OrderNotPayable {
                order_id: payload.order_id.to_string(),
                status: details.order.payment_status.clone(),
            },
        ))));
    }

    let request =
        build_preference_request(&details, &state.public_url, &state.statement_descriptor);
    let preference = state
        .gateway
        .create_preference(&request)
        .await
        .map_err(AppError::from)
        .map_err(&with_request_id)?;

    info!(
        order_id = %payload.order_id,
        preference_id = %preference.id,
        "checkout preference issued"
    );

    Ok(Json(CheckoutResponse {
        preference_id: preference.id,
        init_point: preference.init_point,
        sandbox_init_point: preference.sandbox_init_point,
        public_key: state.public_key.clone(),
    }))
}

/// GET /api/payments/status/{external_id}
///
/// Local read only; the stored row is the source of truth and the gateway is
/// never consulted here.
pub async fn payment_status(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Path(external_id): Path<String>,
) -> Result<Json<PaymentStatusResponse>, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    let with_request_id = |e: AppError| match &request_id {
        Some(req_id) => e.with_request_id(req_id.clone()),
        None => e,
    };

    let payment = state
        .payments
        .find_by_external_id(&external_id)
        .await
        .map_err(AppError::from)
        .map_err(&with_request_id)?
        .ok_or_else(|| {
            with_request_id(AppError::new(AppErrorKind::Domain(
                DomainError::PaymentNotFound {
                    external_id: external_id.clone(),
                },
            )))
        })?;

    let order = state
        .orders
        .find_by_id(payment.order_id)
        .await
        .map_err(AppError::from)
        .map_err(&with_request_id)?
        .ok_or_else(|| {
            with_request_id(AppError::new(AppErrorKind::Domain(
                DomainError::OrderNotFound {
                    order_id: payment.order_id.to_string(),
                },
            )))
        })?;

    Ok(Json(PaymentStatusResponse {
        external_id: payment.external_id,
        status: payment.status,
        method: payment.method,
        amount: payment.amount.to_string(),
        installments: payment.installments,
        pix_qr_code: payment.pix_qr_code,
        pix_qr_code_base64: payment.pix_qr_code_base64,
        failure_reason: payment.failure_reason,
        approved_at: payment.approved_at,
        failed_at: payment.failed_at,
        order: OrderSummary {
            id: order.id,
            order_number: order.order_number,
            status: order.status,
            total: order.total.to_string(),
            customer_name: order.customer_name,
            customer_email: order.customer_email,
        },
    }))
}
