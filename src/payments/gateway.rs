use crate::payments::error::GatewayResult;
use crate::payments::types::{CheckoutPreference, CheckoutPreferenceRequest, GatewayPayment};
use async_trait::async_trait;

/// Interface to the external payment gateway.
///
/// Implementations own their credentials, base URL and retry policy; callers
/// hold an `Arc<dyn PaymentGateway>` so reconciliation and checkout can be
/// exercised against a mock.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Fetches the full payment detail for a gateway payment id.
    ///
    /// Returns `Ok(None)` when the gateway states the payment does not
    /// exist. Transport failures and gateway outages surface as retryable
    /// errors; credential rejections as fatal ones.
    async fn get_payment(&self, payment_id: &str) -> GatewayResult<Option<GatewayPayment>>;

    /// Creates a hosted-checkout preference for an order.
    async fn create_preference(
        &self,
        request: &CheckoutPreferenceRequest,
    ) -> GatewayResult<CheckoutPreference>;

    fn name(&self) -> &'static str;
}
