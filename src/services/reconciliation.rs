//! Order/payment reconciliation engine.
//!
//! Gateway notifications are at-least-once: the same payment event may be
//! delivered twice, concurrently, or out of order. The engine turns each
//! delivery into one idempotent write keyed on the gateway payment id, and
//! dispatches customer emails only on fresh transitions, after commit.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::order_repository::{Order, OrderDetails};
use crate::database::payment_repository::Payment;
use crate::payments::error::GatewayError;
use crate::payments::gateway::PaymentGateway;
use crate::payments::mapper::{map_order_status, map_payment_method, map_payment_status};
use crate::payments::types::{
    GatewayPayment, OrderStatus, PaymentMethod, PaymentStatus, WebhookNotification,
};
use crate::services::mailer::OrderMailer;

/// Mapped gateway state to be written for one payment.
#[derive(Debug, Clone)]
pub struct ReconciliationUpdate {
    pub external_id: String,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub method: PaymentMethod,
    pub amount: BigDecimal,
    pub installments: i32,
    pub failure_reason: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub pix_qr_code: Option<String>,
    pub pix_qr_code_base64: Option<String>,
}

/// Result of the transactional write. `previous_status` is the stored status
/// before this call, which is what email freshness is judged against.
#[derive(Debug, Clone)]
pub struct ReconciliationWrite {
    pub payment: Payment,
    pub previous_status: Option<PaymentStatus>,
    pub status_changed: bool,
    pub regression_blocked: bool,
}

/// Persistence seam for the engine. Production wires the Postgres
/// repositories; tests substitute an in-memory store.
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    /// Resolves the gateway's `external_reference` to an order. References
    /// issued by this service are order UUIDs.
    async fn find_order_by_reference(&self, reference: &str)
        -> Result<Option<Order>, DatabaseError>;

    /// Applies the payment upsert and the order status mirror as one
    /// transaction. See `PaymentRepository::apply_reconciliation`.
    async fn apply_reconciliation(
        &self,
        order_id: Uuid,
        update: &ReconciliationUpdate,
    ) -> Result<ReconciliationWrite, DatabaseError>;

    /// Order with items and address, loaded for email rendering.
    async fn load_order_details(
        &self,
        order_id: Uuid,
    ) -> Result<Option<OrderDetails>, DatabaseError>;
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

impl ReconcileError {
    /// Whether the webhook endpoint should answer 5xx so the gateway
    /// redelivers the notification.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Gateway(e) => e.is_retryable(),
            ReconcileError::Database(e) => e.is_retryable(),
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            ReconcileError::Gateway(GatewayError::Timeout { .. }) => 504,
            ReconcileError::Gateway(_) => 502,
            ReconcileError::Database(_) => 500,
        }
    }
}

impl From<ReconcileError> for crate::error::AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Gateway(e) => e.into(),
            ReconcileError::Database(e) => e.into(),
        }
    }
}

/// Why a notification was intentionally not applied. None of these are
/// errors; all are acknowledged to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnsupportedType,
    MissingPaymentId,
    PaymentNotFound,
    MissingReference,
    OrderNotFound,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::UnsupportedType => "unsupported_type",
            IgnoreReason::MissingPaymentId => "missing_payment_id",
            IgnoreReason::PaymentNotFound => "payment_not_found",
            IgnoreReason::MissingReference => "missing_reference",
            IgnoreReason::OrderNotFound => "order_not_found",
        }
    }
}

/// Outcome report for one notification.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    Ignored {
        reason: IgnoreReason,
    },
    Applied {
        order_id: Uuid,
        external_id: String,
        payment_status: PaymentStatus,
        order_status: OrderStatus,
        status_changed: bool,
        regression_blocked: bool,
        confirmation_sent: Option<bool>,
        pix_instructions_sent: Option<bool>,
    },
}

pub struct ReconciliationEngine {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn ReconciliationStore>,
    mailer: Arc<dyn OrderMailer>,
}

impl ReconciliationEngine {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn ReconciliationStore>,
        mailer: Arc<dyn OrderMailer>,
    ) -> Self {
        Self {
            gateway,
            store,
            mailer,
        }
    }

    /// Processes one gateway notification end to end.
    ///
    /// `Ok(Ignored)` and `Ok(Applied)` are both acknowledged with 200 by the
    /// webhook endpoint; `Err` means a transient failure that the gateway
    /// should redeliver.
    pub async fn reconcile(
        &self,
        notification: &WebhookNotification,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if !notification.is_payment() {
            info!(
                kind = notification.kind.as_deref().unwrap_or("<none>"),
                "ignoring non-payment notification"
            );
            return Ok(ReconcileOutcome::Ignored {
                reason: IgnoreReason::UnsupportedType,
            });
        }

        let Some(payment_id) = notification.payment_id() else {
            warn!("payment notification without a payment id");
            return Ok(ReconcileOutcome::Ignored {
                reason: IgnoreReason::MissingPaymentId,
            });
        };

        let Some(detail) = self.gateway.get_payment(payment_id).await? else {
            warn!(payment_id, "gateway has no record of this payment");
            return Ok(ReconcileOutcome::Ignored {
                reason: IgnoreReason::PaymentNotFound,
            });
        };

        let Some(reference) = detail.external_reference.as_deref().filter(|r| !r.is_empty())
        else {
            // Without a reference this payment cannot be correlated to any
            // order, now or on a later retry.
            warn!(payment_id, "gateway payment carries no external reference");
            return Ok(ReconcileOutcome::Ignored {
                reason: IgnoreReason::MissingReference,
            });
        };

        let Some(order) = self.store.find_order_by_reference(reference).await? else {
            warn!(payment_id, reference, "no order matches external reference");
            return Ok(ReconcileOutcome::Ignored {
                reason: IgnoreReason::OrderNotFound,
            });
        };

        let update = build_update(&detail);
        info!(
            payment_id,
            order_id = %order.id,
            gateway_status = detail.status_or_pending(),
            payment_status = %update.payment_status,
            method = %update.method,
            "applying reconciliation"
        );

        let write = self.store.apply_reconciliation(order.id, &update).await?;

        if write.regression_blocked {
            warn!(
                payment_id,
                order_id = %order.id,
                stored = %write.payment.status,
                incoming = %update.payment_status,
                "blocked status regression on terminal payment"
            );
        }

        // Stored row wins: on a blocked regression this is the old status,
        // not the incoming one.
        let final_status = PaymentStatus::from_db_status(&write.payment.status)
            .unwrap_or(update.payment_status);
        let final_order_status = if write.regression_blocked {
            OrderStatus::from_db_status(&order.status).unwrap_or(update.order_status)
        } else {
            update.order_status
        };

        // Emails run strictly after the commit above; a failure here is
        // logged and reported, never propagated.
        let fresh_approval = final_status == PaymentStatus::Approved
            && write.previous_status != Some(PaymentStatus::Approved);
        let first_pix_pending = write.previous_status.is_none()
            && final_status == PaymentStatus::Pending
            && update.method == PaymentMethod::Pix
            && write.payment.pix_qr_code.is_some();

        let mut confirmation_sent = None;
        let mut pix_instructions_sent = None;

        if fresh_approval || first_pix_pending {
            match self.store.load_order_details(order.id).await {
                Ok(Some(details)) => {
                    if fresh_approval {
                        confirmation_sent =
                            Some(self.send_confirmation(&details, &write.payment).await);
                    }
                    if first_pix_pending {
                        pix_instructions_sent =
                            Some(self.send_pix_instructions(&details, &write.payment).await);
                    }
                }
                Ok(None) => {
                    error!(order_id = %order.id, "order vanished before email dispatch");
                    if fresh_approval {
                        confirmation_sent = Some(false);
                    }
                    if first_pix_pending {
                        pix_instructions_sent = Some(false);
                    }
                }
                Err(e) => {
                    error!(order_id = %order.id, error = %e, "failed to load order for email");
                    if fresh_approval {
                        confirmation_sent = Some(false);
                    }
                    if first_pix_pending {
                        pix_instructions_sent = Some(false);
                    }
                }
            }
        }

        Ok(ReconcileOutcome::Applied {
            order_id: order.id,
            external_id: update.external_id,
            payment_status: final_status,
            order_status: final_order_status,
            status_changed: write.status_changed,
            regression_blocked: write.regression_blocked,
            confirmation_sent,
            pix_instructions_sent,
        })
    }

    async fn send_confirmation(&self, details: &OrderDetails, payment: &Payment) -> bool {
        match self.mailer.send_order_confirmation(details, payment).await {
            Ok(()) => {
                info!(
                    order_id = %details.order.id,
                    order_number = %details.order.order_number,
                    "order confirmation email dispatched"
                );
                true
            }
            Err(e) => {
                error!(
                    order_id = %details.order.id,
                    order_number = %details.order.order_number,
                    external_id = %payment.external_id,
                    error = %e,
                    "order confirmation email failed; manual resend required"
                );
                false
            }
        }
    }

    async fn send_pix_instructions(&self, details: &OrderDetails, payment: &Payment) -> bool {
        match self.mailer.send_pix_instructions(details, payment).await {
            Ok(()) => {
                info!(
                    order_id = %details.order.id,
                    order_number = %details.order.order_number,
                    "PIX instructions email dispatched"
                );
                true
            }
            Err(e) => {
                error!(
                    order_id = %details.order.id,
                    external_id = %payment.external_id,
                    error = %e,
                    "PIX instructions email failed"
                );
                false
            }
        }
    }
}

/// Maps one gateway payment detail onto the internal write.
fn build_update(detail: &GatewayPayment) -> ReconciliationUpdate {
    let gateway_status = detail.status_or_pending();
    let payment_status = map_payment_status(gateway_status);
    let order_status = map_order_status(gateway_status);
    let method = map_payment_method(
        detail.payment_method_id.as_deref().unwrap_or(""),
        detail.payment_type_id.as_deref(),
    );

    let (pix_qr_code, pix_qr_code_base64) = if method == PaymentMethod::Pix {
        match detail.pix_data() {
            Some(pix) => (pix.qr_code.clone(), pix.qr_code_base64.clone()),
            None => (None, None),
        }
    } else {
        (None, None)
    };

    ReconciliationUpdate {
        external_id: detail.id.clone(),
        payment_status,
        order_status,
        method,
        amount: detail
            .transaction_amount
            .clone()
            .unwrap_or_else(|| BigDecimal::from(0)),
        installments: detail.installments.unwrap_or(1),
        failure_reason: if payment_status == PaymentStatus::Rejected {
            detail.status_detail.clone()
        } else {
            None
        },
        approved_at: detail.date_approved,
        pix_qr_code,
        pix_qr_code_base64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::DatabaseErrorKind;
    use crate::payments::error::GatewayResult;
    use crate::payments::types::{CheckoutPreference, CheckoutPreferenceRequest};
    use crate::services::mailer::MailerError;
    use serde_json::json;
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const ORDER_ID: &str = "11111111-1111-1111-1111-111111111111";

    struct FakeGateway {
        payment: Option<serde_json::Value>,
        error: Option<GatewayError>,
    }

    impl FakeGateway {
        fn returning(payment: serde_json::Value) -> Self {
            Self {
                payment: Some(payment),
                error: None,
            }
        }

        fn not_found() -> Self {
            Self {
                payment: None,
                error: None,
            }
        }

        fn failing(error: GatewayError) -> Self {
            Self {
                payment: None,
                error: Some(error),
            }
        }
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn get_payment(&self, _id: &str) -> GatewayResult<Option<GatewayPayment>> {
            if let Some(e) = &self.error {
                return Err(e.clone());
            }
            Ok(self
                .payment
                .clone()
                .map(|v| serde_json::from_value(v).expect("payment fixture")))
        }

        async fn create_preference(
            &self,
            _request: &CheckoutPreferenceRequest,
        ) -> GatewayResult<CheckoutPreference> {
            unimplemented!("not used by reconciliation")
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    /// In-memory store mirroring the semantics of the Postgres
    /// `apply_reconciliation`: upsert by external id, terminal statuses
    /// never regress.
    struct MemoryStore {
        order: Order,
        payments: Mutex<HashMap<String, Payment>>,
        order_statuses: Mutex<(String, String)>,
    }

    impl MemoryStore {
        fn with_order() -> Self {
            Self {
                order: sample_order(),
                payments: Mutex::new(HashMap::new()),
                order_statuses: Mutex::new(("PENDING".to_string(), "PENDING".to_string())),
            }
        }

        fn stored_payment(&self, external_id: &str) -> Option<Payment> {
            self.payments.lock().unwrap().get(external_id).cloned()
        }

        fn order_status(&self) -> (String, String) {
            self.order_statuses.lock().unwrap().clone()
        }
    }

    fn sample_order() -> Order {
        Order {
            id: Uuid::parse_str(ORDER_ID).unwrap(),
            order_number: "MK00000042".to_string(),
            customer_name: "Ana Souza".to_string(),
            customer_email: "ana@example.com".to_string(),
            customer_phone: "11987654321".to_string(),
            customer_cpf: None,
            subtotal: BigDecimal::from_str("89.90").unwrap(),
            shipping_cost: BigDecimal::from(0),
            total: BigDecimal::from_str("89.90").unwrap(),
            status: "PENDING".to_string(),
            payment_status: "PENDING".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_details(order: Order) -> OrderDetails {
        use crate::database::order_repository::{OrderItem, ShippingAddress};
        let order_id = order.id;
        OrderDetails {
            order,
            address: ShippingAddress {
                id: Uuid::new_v4(),
                order_id,
                street: "Rua das Flores".to_string(),
                number: "123".to_string(),
                complement: None,
                neighborhood: "Centro".to_string(),
                city: "São Paulo".to_string(),
                state: "SP".to_string(),
                zip_code: "01001-000".to_string(),
            },
            items: vec![OrderItem {
                id: Uuid::new_v4(),
                order_id,
                product_name: "Vestido Festa Azul".to_string(),
                unit_price: BigDecimal::from_str("89.90").unwrap(),
                quantity: 1,
                size: Some("4".to_string()),
                color: None,
                image_url: None,
            }],
        }
    }

    #[async_trait]
    impl ReconciliationStore for MemoryStore {
        async fn find_order_by_reference(
            &self,
            reference: &str,
        ) -> Result<Option<Order>, DatabaseError> {
            if reference == self.order.id.to_string() {
                Ok(Some(self.order.clone()))
            } else {
                Ok(None)
            }
        }

        async fn apply_reconciliation(
            &self,
            order_id: Uuid,
            update: &ReconciliationUpdate,
        ) -> Result<ReconciliationWrite, DatabaseError> {
            let mut payments = self.payments.lock().unwrap();

            if let Some(stored) = payments.get(&update.external_id).cloned() {
                let previous = PaymentStatus::from_db_status(&stored.status);
                if previous == Some(update.payment_status) {
                    return Ok(ReconciliationWrite {
                        payment: stored,
                        previous_status: previous,
                        status_changed: false,
                        regression_blocked: false,
                    });
                }
                if previous.map(|p| p.is_terminal()).unwrap_or(false) {
                    return Ok(ReconciliationWrite {
                        payment: stored,
                        previous_status: previous,
                        status_changed: false,
                        regression_blocked: true,
                    });
                }
                let mut updated = stored;
                updated.status = update.payment_status.as_str().to_string();
                if update.payment_status == PaymentStatus::Approved {
                    updated.approved_at = Some(update.approved_at.unwrap_or_else(Utc::now));
                }
                payments.insert(update.external_id.clone(), updated.clone());
                *self.order_statuses.lock().unwrap() = (
                    update.order_status.as_str().to_string(),
                    update.payment_status.as_str().to_string(),
                );
                return Ok(ReconciliationWrite {
                    payment: updated,
                    previous_status: previous,
                    status_changed: true,
                    regression_blocked: false,
                });
            }

            let payment = Payment {
                id: Uuid::new_v4(),
                order_id,
                external_id: update.external_id.clone(),
                status: update.payment_status.as_str().to_string(),
                method: update.method.as_str().to_string(),
                amount: update.amount.clone(),
                installments: update.installments,
                pix_qr_code: update.pix_qr_code.clone(),
                pix_qr_code_base64: update.pix_qr_code_base64.clone(),
                failure_reason: update.failure_reason.clone(),
                approved_at: if update.payment_status == PaymentStatus::Approved {
                    Some(update.approved_at.unwrap_or_else(Utc::now))
                } else {
                    None
                },
                failed_at: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            payments.insert(update.external_id.clone(), payment.clone());
            *self.order_statuses.lock().unwrap() = (
                update.order_status.as_str().to_string(),
                update.payment_status.as_str().to_string(),
            );
            Ok(ReconciliationWrite {
                payment,
                previous_status: None,
                status_changed: true,
                regression_blocked: false,
            })
        }

        async fn load_order_details(
            &self,
            _order_id: Uuid,
        ) -> Result<Option<OrderDetails>, DatabaseError> {
            Ok(Some(sample_details(self.order.clone())))
        }
    }

    struct CountingMailer {
        confirmations: AtomicUsize,
        pix_emails: AtomicUsize,
        fail: bool,
    }

    impl CountingMailer {
        fn new() -> Self {
            Self {
                confirmations: AtomicUsize::new(0),
                pix_emails: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl OrderMailer for CountingMailer {
        async fn send_order_confirmation(
            &self,
            _order: &OrderDetails,
            _payment: &Payment,
        ) -> Result<(), MailerError> {
            self.confirmations.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(MailerError::Api {
                    status: 500,
                    message: "simulated".to_string(),
                });
            }
            Ok(())
        }

        async fn send_pix_instructions(
            &self,
            _order: &OrderDetails,
            _payment: &Payment,
        ) -> Result<(), MailerError> {
            self.pix_emails.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(MailerError::Api {
                    status: 500,
                    message: "simulated".to_string(),
                });
            }
            Ok(())
        }
    }

    fn engine(
        gateway: FakeGateway,
    ) -> (ReconciliationEngine, Arc<MemoryStore>, Arc<CountingMailer>) {
        let store = Arc::new(MemoryStore::with_order());
        let mailer = Arc::new(CountingMailer::new());
        let engine =
            ReconciliationEngine::new(Arc::new(gateway), store.clone(), mailer.clone());
        (engine, store, mailer)
    }

    fn payment_notification(id: &str) -> WebhookNotification {
        serde_json::from_value(json!({"type": "payment", "data": {"id": id}})).unwrap()
    }

    fn approved_pix_payment() -> serde_json::Value {
        json!({
            "id": "pay_1",
            "status": "approved",
            "status_detail": "accredited",
            "external_reference": ORDER_ID,
            "transaction_amount": 89.90,
            "payment_method_id": "pix",
            "payment_type_id": "bank_transfer",
            "installments": 1,
            "date_approved": "2024-03-01T13:01:30Z",
            "point_of_interaction": {
                "transaction_data": {
                    "qr_code": "00020126580014br.gov.bcb.pix",
                    "qr_code_base64": "iVBORw0KGgo="
                }
            }
        })
    }

    #[tokio::test]
    async fn approved_payment_creates_row_updates_order_and_emails_once() {
        let (engine, store, mailer) = engine(FakeGateway::returning(approved_pix_payment()));

        let outcome = engine
            .reconcile(&payment_notification("pay_1"))
            .await
            .expect("reconcile");

        match outcome {
            ReconcileOutcome::Applied {
                payment_status,
                order_status,
                status_changed,
                confirmation_sent,
                ..
            } => {
                assert_eq!(payment_status, PaymentStatus::Approved);
                assert_eq!(order_status, OrderStatus::Confirmed);
                assert!(status_changed);
                assert_eq!(confirmation_sent, Some(true));
            }
            other => panic!("expected Applied, got {:?}", other),
        }

        let stored = store.stored_payment("pay_1").expect("payment row");
        assert_eq!(stored.status, "APPROVED");
        assert_eq!(stored.method, "PIX");
        assert_eq!(stored.amount, BigDecimal::from_str("89.9").unwrap());
        assert!(stored.approved_at.is_some());
        assert_eq!(
            store.order_status(),
            ("CONFIRMED".to_string(), "APPROVED".to_string())
        );
        assert_eq!(mailer.confirmations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn replayed_approval_is_idempotent_and_sends_no_second_email() {
        let (engine, store, mailer) = engine(FakeGateway::returning(approved_pix_payment()));
        let notification = payment_notification("pay_1");

        engine.reconcile(&notification).await.expect("first");
        let second = engine.reconcile(&notification).await.expect("second");

        match second {
            ReconcileOutcome::Applied {
                status_changed,
                confirmation_sent,
                ..
            } => {
                assert!(!status_changed);
                assert_eq!(confirmation_sent, None);
            }
            other => panic!("expected Applied, got {:?}", other),
        }
        assert_eq!(store.stored_payment("pay_1").unwrap().status, "APPROVED");
        assert_eq!(mailer.confirmations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_pending_never_regresses_a_terminal_status() {
        let store = Arc::new(MemoryStore::with_order());
        let mailer = Arc::new(CountingMailer::new());

        let approve = ReconciliationEngine::new(
            Arc::new(FakeGateway::returning(approved_pix_payment())),
            store.clone(),
            mailer.clone(),
        );
        approve
            .reconcile(&payment_notification("pay_1"))
            .await
            .expect("approve");

        let mut stale = approved_pix_payment();
        stale["status"] = json!("pending");
        stale["date_approved"] = json!(null);
        let replay = ReconciliationEngine::new(
            Arc::new(FakeGateway::returning(stale)),
            store.clone(),
            mailer.clone(),
        );
        let outcome = replay
            .reconcile(&payment_notification("pay_1"))
            .await
            .expect("stale replay");

        match outcome {
            ReconcileOutcome::Applied {
                payment_status,
                regression_blocked,
                status_changed,
                ..
            } => {
                assert_eq!(payment_status, PaymentStatus::Approved);
                assert!(regression_blocked);
                assert!(!status_changed);
            }
            other => panic!("expected Applied, got {:?}", other),
        }
        assert_eq!(store.stored_payment("pay_1").unwrap().status, "APPROVED");
        assert_eq!(mailer.confirmations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn first_pending_pix_sends_instructions_once() {
        let mut pending = approved_pix_payment();
        pending["status"] = json!("pending");
        pending["date_approved"] = json!(null);
        let (engine, _store, mailer) = engine(FakeGateway::returning(pending));
        let notification = payment_notification("pay_1");

        let first = engine.reconcile(&notification).await.expect("first");
        match first {
            ReconcileOutcome::Applied {
                pix_instructions_sent,
                confirmation_sent,
                ..
            } => {
                assert_eq!(pix_instructions_sent, Some(true));
                assert_eq!(confirmation_sent, None);
            }
            other => panic!("expected Applied, got {:?}", other),
        }

        engine.reconcile(&notification).await.expect("replay");
        assert_eq!(mailer.pix_emails.load(Ordering::SeqCst), 1);
        assert_eq!(mailer.confirmations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_payment_and_malformed_notifications_are_ignored() {
        let (engine, _, _) = engine(FakeGateway::not_found());

        let seller: WebhookNotification =
            serde_json::from_value(json!({"type": "merchant_order", "data": {"id": "mo_1"}}))
                .unwrap();
        assert!(matches!(
            engine.reconcile(&seller).await.unwrap(),
            ReconcileOutcome::Ignored {
                reason: IgnoreReason::UnsupportedType
            }
        ));

        let missing_id: WebhookNotification =
            serde_json::from_value(json!({"type": "payment"})).unwrap();
        assert!(matches!(
            engine.reconcile(&missing_id).await.unwrap(),
            ReconcileOutcome::Ignored {
                reason: IgnoreReason::MissingPaymentId
            }
        ));
    }

    #[tokio::test]
    async fn gateway_not_found_and_unknown_order_are_ignored() {
        let (engine, _, _) = engine(FakeGateway::not_found());
        assert!(matches!(
            engine
                .reconcile(&payment_notification("pay_404"))
                .await
                .unwrap(),
            ReconcileOutcome::Ignored {
                reason: IgnoreReason::PaymentNotFound
            }
        ));

        let mut foreign = approved_pix_payment();
        foreign["external_reference"] = json!("22222222-2222-2222-2222-222222222222");
        let (engine, _, mailer) = self::engine(FakeGateway::returning(foreign));
        assert!(matches!(
            engine
                .reconcile(&payment_notification("pay_1"))
                .await
                .unwrap(),
            ReconcileOutcome::Ignored {
                reason: IgnoreReason::OrderNotFound
            }
        ));
        assert_eq!(mailer.confirmations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_external_reference_is_ignored() {
        let mut orphan = approved_pix_payment();
        orphan["external_reference"] = json!(null);
        let (engine, store, _) = engine(FakeGateway::returning(orphan));

        assert!(matches!(
            engine
                .reconcile(&payment_notification("pay_1"))
                .await
                .unwrap(),
            ReconcileOutcome::Ignored {
                reason: IgnoreReason::MissingReference
            }
        ));
        assert!(store.stored_payment("pay_1").is_none());
    }

    #[tokio::test]
    async fn gateway_timeout_surfaces_as_retryable_error() {
        let (engine, store, _) = engine(FakeGateway::failing(GatewayError::Timeout {
            message: "deadline exceeded".to_string(),
        }));

        let err = engine
            .reconcile(&payment_notification("pay_2"))
            .await
            .expect_err("timeout must fail");
        assert!(err.is_retryable());
        assert_eq!(err.http_status_code(), 504);
        assert!(store.stored_payment("pay_2").is_none());
    }

    #[tokio::test]
    async fn mailer_failure_does_not_fail_reconciliation() {
        let store = Arc::new(MemoryStore::with_order());
        let mailer = Arc::new(CountingMailer::failing());
        let engine = ReconciliationEngine::new(
            Arc::new(FakeGateway::returning(approved_pix_payment())),
            store.clone(),
            mailer,
        );

        let outcome = engine
            .reconcile(&payment_notification("pay_1"))
            .await
            .expect("email failure must not fail reconcile");
        match outcome {
            ReconcileOutcome::Applied {
                confirmation_sent, ..
            } => assert_eq!(confirmation_sent, Some(false)),
            other => panic!("expected Applied, got {:?}", other),
        }
        assert_eq!(store.stored_payment("pay_1").unwrap().status, "APPROVED");
    }

    #[tokio::test]
    async fn rejected_payment_records_failure_reason() {
        let rejected = json!({
            "id": "pay_3",
            "status": "rejected",
            "status_detail": "cc_rejected_insufficient_amount",
            "external_reference": ORDER_ID,
            "transaction_amount": 129.50,
            "payment_method_id": "visa",
            "payment_type_id": "credit_card",
            "installments": 3
        });
        let (engine, store, mailer) = engine(FakeGateway::returning(rejected));

        let outcome = engine
            .reconcile(&payment_notification("pay_3"))
            .await
            .expect("reconcile");
        match outcome {
            ReconcileOutcome::Applied {
                payment_status,
                order_status,
                ..
            } => {
                assert_eq!(payment_status, PaymentStatus::Rejected);
                assert_eq!(order_status, OrderStatus::Cancelled);
            }
            other => panic!("expected Applied, got {:?}", other),
        }

        let stored = store.stored_payment("pay_3").unwrap();
        assert_eq!(stored.method, "CREDIT_CARD");
        assert_eq!(
            stored.failure_reason.as_deref(),
            Some("cc_rejected_insufficient_amount")
        );
        assert_eq!(stored.installments, 3);
        assert_eq!(mailer.confirmations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn store_failure_propagates_as_retryable() {
        struct BrokenStore;

        #[async_trait]
        impl ReconciliationStore for BrokenStore {
            async fn find_order_by_reference(
                &self,
                _reference: &str,
            ) -> Result<Option<Order>, DatabaseError> {
                Err(DatabaseError::new(DatabaseErrorKind::Connection {
                    message: "connection refused".to_string(),
                }))
            }

            async fn apply_reconciliation(
                &self,
                _order_id: Uuid,
                _update: &ReconciliationUpdate,
            ) -> Result<ReconciliationWrite, DatabaseError> {
                unreachable!()
            }

            async fn load_order_details(
                &self,
                _order_id: Uuid,
            ) -> Result<Option<OrderDetails>, DatabaseError> {
                unreachable!()
            }
        }

        let engine = ReconciliationEngine::new(
            Arc::new(FakeGateway::returning(approved_pix_payment())),
            Arc::new(BrokenStore),
            Arc::new(CountingMailer::new()),
        );

        let err = engine
            .reconcile(&payment_notification("pay_1"))
            .await
            .expect_err("db outage must fail");
        assert!(err.is_retryable());
        assert_eq!(err.http_status_code(), 500);
    }
}
