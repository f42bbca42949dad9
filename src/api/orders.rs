//! Storefront orders API: creation, listing, detail.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::database::order_repository::{
    NewOrder, NewOrderItem, NewShippingAddress, OrderDetails, OrderListFilter, OrderRepository,
};
use crate::database::payment_repository::{Payment, PaymentRepository};
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::middleware::error::get_request_id_from_headers;
use crate::payments::types::OrderStatus;

#[derive(Clone)]
pub struct OrdersState {
    pub orders: OrderRepository,
    pub payments: PaymentRepository,
}

pub fn routes(state: OrdersState) -> Router {
    Router::new()
        .route("/api/orders", get(list_orders).post(create_order))
        .route("/api/orders/{id}", get(get_order))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub customer: CustomerInput,
    pub address: AddressInput,
    pub items: Vec<ItemInput>,
    #[serde(default)]
    pub shipping_cost: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerInput {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub cpf: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddressInput {
    pub street: String,
    pub number: String,
    pub complement: Option<String>,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

#[derive(Debug, Deserialize)]
pub struct ItemInput {
    pub product_name: String,
    pub unit_price: String,
    pub quantity: i32,
    pub size: Option<String>,
    pub color: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<String>,
    pub customer_email: Option<String>,
}

/// Order as presented to API clients. Money travels as strings.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub customer_cpf: Option<String>,
    pub subtotal: String,
    pub shipping_cost: String,
    pub total: String,
    pub status: String,
    pub payment_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub address: AddressResponse,
    pub items: Vec<ItemResponse>,
    pub payments: Vec<PaymentResponse>,
}

#[derive(Debug, Serialize)]
pub struct AddressResponse {
    pub street: String,
    pub number: String,
    pub complement: Option<String>,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub product_name: String,
    pub unit_price: String,
    pub quantity: i32,
    pub size: Option<String>,
    pub color: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub external_id: String,
    pub status: String,
    pub method: String,
    pub amount: String,
    pub installments: i32,
    pub approved_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl OrderResponse {
    pub fn from_details(details: OrderDetails, payments: Vec<Payment>) -> Self {
        let OrderDetails {
            order,
            address,
            items,
        } = details;
        Self {
            id: order.id,
            order_number: order.order_number,
            customer_name: order.customer_name,
            customer_email: order.customer_email,
            customer_phone: order.customer_phone,
            customer_cpf: order.customer_cpf,
            subtotal: order.subtotal.to_string(),
            shipping_cost: order.shipping_cost.to_string(),
            total: order.total.to_string(),
            status: order.status,
            payment_status: order.payment_status,
            created_at: order.created_at,
            updated_at: order.updated_at,
            address: AddressResponse {
                street: address.street,
                number: address.number,
                complement: address.complement,
                neighborhood: address.neighborhood,
                city: address.city,
                state: address.state,
                zip_code: address.zip_code,
            },
            items: items
                .into_iter()
                .map(|item| ItemResponse {
                    product_name: item.product_name,
                    unit_price: item.unit_price.to_string(),
                    quantity: item.quantity,
                    size: item.size,
                    color: item.color,
                    image_url: item.image_url,
                })
                .collect(),
            payments: payments
                .into_iter()
                .map(|p| PaymentResponse {
                    external_id: p.external_id,
                    status: p.status,
                    method: p.method,
                    amount: p.amount.to_string(),
                    installments: p.installments,
                    approved_at: p.approved_at,
                    failed_at: p.failed_at,
                    failure_reason: p.failure_reason,
                    created_at: p.created_at,
                })
                .collect(),
        }
    }
}

fn invalid_field(field: &str, reason: &str) -> AppError {
    AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    }))
}

fn missing_field(field: &str) -> AppError {
    AppError::new(AppErrorKind::Validation(ValidationError::MissingField {
        field: field.to_string(),
    }))
}

fn parse_amount(field: &str, raw: &str) -> Result<BigDecimal, AppError> {
    let value = BigDecimal::from_str(raw.trim()).map_err(|_| {
        AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: raw.to_string(),
            reason: format!("'{}' is not a valid decimal", field),
        }))
    })?;
    if value < BigDecimal::from(0) {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidAmount {
                amount: raw.to_string(),
                reason: format!("'{}' must not be negative", field),
            },
        )));
    }
    Ok(value)
}

fn require(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(missing_field(field));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), AppError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    };
    if !valid {
        return Err(invalid_field(
            "customer.email",
            "must be a valid email address",
        ));
    }
    Ok(())
}

/// Human-facing order number: MK plus the last 8 digits of unix millis.
pub fn generate_order_number() -> String {
    format!("MK{:08}", Utc::now().timestamp_millis() % 100_000_000)
}

#[derive(Debug)]
struct ValidatedOrder {
    order: NewOrder,
    address: NewShippingAddress,
    items: Vec<NewOrderItem>,
}

fn validate_request(payload: CreateOrderRequest) -> Result<ValidatedOrder, AppError> {
    require("customer.name", &payload.customer.name)?;
    require("customer.email", &payload.customer.email)?;
    validate_email(&payload.customer.email)?;
    require("customer.phone", &payload.customer.phone)?;

    require("address.street", &payload.address.street)?;
    require("address.number", &payload.address.number)?;
    require("address.neighborhood", &payload.address.neighborhood)?;
    require("address.city", &payload.address.city)?;
    require("address.state", &payload.address.state)?;
    require("address.zip_code", &payload.address.zip_code)?;

    if payload.items.is_empty() {
        return Err(invalid_field("items", "order must contain at least one item"));
    }

    let mut items = Vec::with_capacity(payload.items.len());
    let mut subtotal = BigDecimal::from(0);
    for (index, item) in payload.items.into_iter().enumerate() {
        if item.product_name.trim().is_empty() {
            return Err(missing_field(&format!("items[{}].product_name", index)));
        }
        if item.quantity <= 0 {
            return Err(invalid_field(
                &format!("items[{}].quantity", index),
                "quantity must be positive",
            ));
        }
        let unit_price = parse_amount(
            &format!("items[{}].unit_price", index),
            &item.unit_price,
        )?;
        subtotal += &unit_price * BigDecimal::from(item.quantity);
        items.push(NewOrderItem {
            product_name: item.product_name.trim().to_string(),
            unit_price,
            quantity: item.quantity,
            size: item.size,
            color: item.color,
            image_url: item.image_url,
        });
    }

    let shipping_cost = parse_amount(
        "shipping_cost",
        payload.shipping_cost.as_deref().unwrap_or("0"),
    )?;
    // Totals are always computed server side.
    let total = &subtotal + &shipping_cost;

    let customer_cpf = payload
        .customer
        .cpf
        .map(|cpf| cpf.chars().filter(|c| c.is_ascii_digit()).collect::<String>())
        .filter(|cpf| !cpf.is_empty());

    Ok(ValidatedOrder {
        order: NewOrder {
            order_number: generate_order_number(),
            customer_name: payload.customer.name.trim().to_string(),
            customer_email: payload.customer.email.trim().to_string(),
            customer_phone: payload.customer.phone.trim().to_string(),
            customer_cpf,
            subtotal,
            shipping_cost,
            total,
        },
        address: NewShippingAddress {
            street: payload.address.street.trim().to_string(),
            number: payload.address.number.trim().to_string(),
            complement: payload.address.complement,
            neighborhood: payload.address.neighborhood.trim().to_string(),
            city: payload.address.city.trim().to_string(),
            state: payload.address.state.trim().to_string(),
            zip_code: payload.address.zip_code.trim().to_string(),
        },
        items,
    })
}

/// POST /api/orders
pub async fn create_order(
    State(state): State<OrdersState>,
    headers: HeaderMap,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), AppError> {
    let request_id = get_request_id_from_headers(&headers);
    let with_request_id = |e: AppError| match &request_id {
        Some(req_id) => e.with_request_id(req_id.clone()),
        None => e,
    };

    let validated = validate_request(payload).map_err(&with_request_id)?;

    let details = state
        .orders
        .create(validated.order, validated.address, validated.items)
        .await
        .map_err(AppError::from)
        .map_err(&with_request_id)?;

    info!(
        order_id = %details.order.id,
        order_number = %details.order.order_number,
        total = %details.order.total,
        items = details.items.len(),
        "order created"
    );

    Ok((
        StatusCode::CREATED,
        Json(OrderResponse::from_details(details, Vec::new())),
    ))
}

/// GET /api/orders
pub async fn list_orders(
    State(state): State<OrdersState>,
    headers: HeaderMap,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<OrderListResponse>, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    let with_request_id = |e: AppError| match &request_id {
        Some(req_id) => e.with_request_id(req_id.clone()),
        None => e,
    };

    let status = match query.status.as_deref() {
        Some(raw) => Some(OrderStatus::from_db_status(raw).ok_or_else(|| {
            with_request_id(invalid_field(
                "status",
                "must be one of PENDING, CONFIRMED, SHIPPED, DELIVERED, CANCELLED, REFUNDED",
            ))
        })?),
        None => None,
    };

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(10).clamp(1, 100);
    let filter = OrderListFilter {
        status,
        customer_email: query.customer_email,
        page,
        limit,
    };

    let page_result = state
        .orders
        .list(&filter)
        .await
        .map_err(AppError::from)
        .map_err(&with_request_id)?;

    let order_ids: Vec<Uuid> = page_result.orders.iter().map(|d| d.order.id).collect();
    let mut payments = state
        .payments
        .find_by_order_ids(&order_ids)
        .await
        .map_err(AppError::from)
        .map_err(&with_request_id)?;

    let total = page_result.total;
    let orders = page_result
        .orders
        .into_iter()
        .map(|details| {
            let (own, rest): (Vec<_>, Vec<_>) = payments
                .drain(..)
                .partition(|p| p.order_id == details.order.id);
            payments = rest;
            OrderResponse::from_details(details, own)
        })
        .collect();

    let total_pages = (total + i64::from(limit) - 1) / i64::from(limit);
    Ok(Json(OrderListResponse {
        orders,
        pagination: Pagination {
            page,
            limit,
            total,
            total_pages,
            has_next_page: i64::from(page) < total_pages,
            has_prev_page: page > 1,
        },
    }))
}

/// GET /api/orders/{id}
pub async fn get_order(
    State(state): State<OrdersState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, AppError> {
    let request_id = get_request_id_from_headers(&headers);
    let with_request_id = |e: AppError| match &request_id {
        Some(req_id) => e.with_request_id(req_id.clone()),
        None => e,
    };

    let order_id = Uuid::parse_str(&id).map_err(|_| {
        with_request_id(AppError::new(AppErrorKind::Domain(
            DomainError::OrderNotFound {
                order_id: id.clone(),
            },
        )))
    })?;

    let details = state
        .orders
        .load_details(order_id)
        .await
        .map_err(AppError::from)
        .map_err(&with_request_id)?
        .ok_or_else(|| {
            with_request_id(AppError::new(AppErrorKind::Domain(
                DomainError::OrderNotFound {
                    order_id: id.clone(),
                },
            )))
        })?;

    let payments = state
        .payments
        .find_by_order_id(order_id)
        .await
        .map_err(AppError::from)
        .map_err(&with_request_id)?;

    Ok(Json(OrderResponse::from_details(details, payments)))
}
