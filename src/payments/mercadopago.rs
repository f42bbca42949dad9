//! MercadoPago REST integration.
//!
//! Two calls matter to this service: payment detail lookups during webhook
//! reconciliation (`GET /v1/payments/{id}`) and hosted-checkout preference
//! creation (`POST /checkout/preferences`).

use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::types::{CheckoutPreference, CheckoutPreferenceRequest, GatewayPayment};
use crate::payments::utils::GatewayHttpClient;
use async_trait::async_trait;
use reqwest::Method;
use std::env;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct MercadoPagoConfig {
    pub access_token: String,
    /// Echoed to checkout clients so the storefront can render card forms.
    pub public_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Shows up on the buyer's card statement.
    pub statement_descriptor: String,
}

impl Default for MercadoPagoConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            public_key: String::new(),
            base_url: "https://api.mercadopago.com".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            statement_descriptor: "MIMO KIDS".to_string(),
        }
    }
}

impl MercadoPagoConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let access_token =
            env::var("MERCADOPAGO_ACCESS_TOKEN").map_err(|_| GatewayError::ValidationError {
                message: "MERCADOPAGO_ACCESS_TOKEN is required".to_string(),
                field: Some("access_token".to_string()),
            })?;

        let defaults = Self::default();
        Ok(Self {
            access_token,
            public_key: env::var("MERCADOPAGO_PUBLIC_KEY").unwrap_or_default(),
            base_url: env::var("MERCADOPAGO_BASE_URL").unwrap_or(defaults.base_url),
            timeout_secs: env::var("MERCADOPAGO_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: env::var("MERCADOPAGO_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            statement_descriptor: env::var("MERCADOPAGO_STATEMENT_DESCRIPTOR")
                .unwrap_or(defaults.statement_descriptor),
        })
    }
}

pub struct MercadoPagoGateway {
    config: MercadoPagoConfig,
    http: GatewayHttpClient,
}

impl MercadoPagoGateway {
    pub fn new(config: MercadoPagoConfig) -> GatewayResult<Self> {
        if config.access_token.trim().is_empty() {
            return Err(GatewayError::ValidationError {
                message: "MercadoPago access token must not be empty".to_string(),
                field: Some("access_token".to_string()),
            });
        }

        let http = GatewayHttpClient::new(
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;

        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(MercadoPagoConfig::from_env()?)
    }

    pub fn config(&self) -> &MercadoPagoConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    async fn get_payment(&self, payment_id: &str) -> GatewayResult<Option<GatewayPayment>> {
        let url = self.endpoint(&format!("v1/payments/{}", payment_id));

        let result = self
            .http
            .request_json::<GatewayPayment>(
                Method::GET,
                &url,
                Some(&self.config.access_token),
                None,
                &[],
            )
            .await;

        match result {
            Ok(payment) => {
                info!(
                    payment_id = %payment.id,
                    status = %payment.status_or_pending(),
                    "gateway payment fetched"
                );
                Ok(Some(payment))
            }
            Err(GatewayError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_preference(
        &self,
        request: &CheckoutPreferenceRequest,
    ) -> GatewayResult<CheckoutPreference> {
        let url = self.endpoint("checkout/preferences");
        let body = serde_json::to_value(request).map_err(|e| GatewayError::ValidationError {
            message: format!("failed to encode preference request: {}", e),
            field: None,
        })?;

        let preference = self
            .http
            .request_json::<CheckoutPreference>(
                Method::POST,
                &url,
                Some(&self.config.access_token),
                Some(&body),
                // Preference creation is idempotent per order.
                &[("X-Idempotency-Key", request.external_reference.as_str())],
            )
            .await?;

        info!(
            preference_id = %preference.id,
            external_reference = %request.external_reference,
            "checkout preference created"
        );

        Ok(preference)
    }

    fn name(&self) -> &'static str {
        "mercadopago"
    }
}
