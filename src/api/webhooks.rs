//! Gateway webhook intake.
//!
//! The response code is the contract with the gateway: 200 means "never send
//! this again", 5xx means "redeliver later". Permanent conditions (garbage
//! JSON, uncorrelatable payments) are therefore acknowledged with 200.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::middleware::error::{get_request_id_from_headers, ErrorResponse};
use crate::payments::types::WebhookNotification;
use crate::services::reconciliation::{ReconcileOutcome, ReconciliationEngine};

#[derive(Clone)]
pub struct WebhookState {
    pub engine: Arc<ReconciliationEngine>,
}

pub fn routes(state: WebhookState) -> Router {
    Router::new()
        .route(
            "/api/webhooks/mercadopago",
            post(handle_notification).get(probe),
        )
        .with_state(state)
}

fn ack() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(serde_json::json!({"received": true})))
}

/// POST /api/webhooks/mercadopago
pub async fn handle_notification(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let request_id = get_request_id_from_headers(&headers);

    let notification: WebhookNotification = match serde_json::from_str(&body) {
        Ok(n) => n,
        Err(e) => {
            // Retrying cannot make the body parseable, so acknowledge it.
            warn!(error = %e, "unparseable webhook body, acknowledging");
            return ack().into_response();
        }
    };

    match state.engine.reconcile(&notification).await {
        Ok(ReconcileOutcome::Ignored { reason }) => {
            info!(reason = reason.as_str(), "webhook ignored");
            ack().into_response()
        }
        Ok(ReconcileOutcome::Applied {
            order_id,
            external_id,
            payment_status,
            order_status,
            status_changed,
            regression_blocked,
            ..
        }) => {
            info!(
                order_id = %order_id,
                external_id = %external_id,
                payment_status = %payment_status,
                order_status = %order_status,
                status_changed,
                regression_blocked,
                "webhook reconciled"
            );
            ack().into_response()
        }
        Err(e) => {
            error!(error = %e, retryable = e.is_retryable(), "webhook reconciliation failed");
            let status = StatusCode::from_u16(e.http_status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let app_error = match request_id {
                Some(req_id) => crate::error::AppError::from(e).with_request_id(req_id),
                None => crate::error::AppError::from(e),
            };
            (status, Json(ErrorResponse::from_app_error(&app_error))).into_response()
        }
    }
}

/// GET /api/webhooks/mercadopago — reachability probe used when registering
/// the URL at the gateway.
pub async fn probe() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "MercadoPago webhook endpoint is active",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
