//! Transactional email via the Resend REST API.
//!
//! Two messages exist: the order confirmation sent on a fresh approval, and
//! PIX payment instructions sent when a PIX attempt is first seen pending.
//! Both are best-effort; the reconciliation engine logs failures and moves on.

use async_trait::async_trait;
use bigdecimal::{BigDecimal, RoundingMode};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::database::order_repository::OrderDetails;
use crate::database::payment_repository::Payment;
use crate::logging::mask_email;
use crate::payments::error::GatewayError;
use crate::payments::utils::GatewayHttpClient;

#[derive(Debug, Clone, Error)]
pub enum MailerError {
    #[error("Mailer configuration error: {message}")]
    Configuration { message: String },

    #[error("Email delivery failed: {message}")]
    Network { message: String },

    #[error("Email API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },
}

impl From<GatewayError> for MailerError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout { message } | GatewayError::NetworkError { message } => {
                MailerError::Network { message }
            }
            GatewayError::AuthenticationError { message } => MailerError::Api {
                status: 401,
                message,
            },
            GatewayError::RateLimitError { message, .. } => MailerError::Api {
                status: 429,
                message,
            },
            GatewayError::ApiError {
                status, message, ..
            } => MailerError::Api { status, message },
            other => MailerError::Network {
                message: other.to_string(),
            },
        }
    }
}

/// Customer email seam. Reconciliation depends on this trait so tests can
/// observe dispatches without a delivery provider.
#[async_trait]
pub trait OrderMailer: Send + Sync {
    async fn send_order_confirmation(
        &self,
        order: &OrderDetails,
        payment: &Payment,
    ) -> Result<(), MailerError>;

    async fn send_pix_instructions(
        &self,
        order: &OrderDetails,
        payment: &Payment,
    ) -> Result<(), MailerError>;
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_key: String,
    pub base_url: String,
    pub from: String,
    pub reply_to: String,
    pub support_email: String,
    pub timeout_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.resend.com".to_string(),
            from: "Mimo Kids <pedidos@mimokids.com.br>".to_string(),
            reply_to: "contato@mimokids.com.br".to_string(),
            support_email: "suporte@mimokids.com.br".to_string(),
            timeout_secs: 10,
        }
    }
}

impl EmailConfig {
    pub fn from_env() -> Result<Self, MailerError> {
        let api_key = env::var("RESEND_API_KEY").map_err(|_| MailerError::Configuration {
            message: "RESEND_API_KEY is required".to_string(),
        })?;

        let defaults = Self::default();
        Ok(Self {
            api_key,
            base_url: env::var("RESEND_BASE_URL").unwrap_or(defaults.base_url),
            from: env::var("EMAIL_FROM").unwrap_or(defaults.from),
            reply_to: env::var("EMAIL_REPLY_TO").unwrap_or(defaults.reply_to),
            support_email: env::var("EMAIL_SUPPORT").unwrap_or(defaults.support_email),
            timeout_secs: env::var("EMAIL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: String,
}

pub struct ResendMailer {
    config: EmailConfig,
    http: GatewayHttpClient,
}

impl ResendMailer {
    pub fn new(config: EmailConfig) -> Result<Self, MailerError> {
        if config.api_key.trim().is_empty() {
            return Err(MailerError::Configuration {
                message: "Resend API key must not be empty".to_string(),
            });
        }

        let http = GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), 2)
            .map_err(MailerError::from)?;

        Ok(Self { config, http })
    }

    pub fn from_env() -> Result<Self, MailerError> {
        Self::new(EmailConfig::from_env()?)
    }

    async fn deliver(&self, to: &str, subject: &str, html: String) -> Result<(), MailerError> {
        let url = format!("{}/emails", self.config.base_url.trim_end_matches('/'));
        let body = json!({
            "from": self.config.from,
            "to": [to],
            "reply_to": self.config.reply_to,
            "subject": subject,
            "html": html,
        });

        let response: ResendResponse = self
            .http
            .request_json(
                Method::POST,
                &url,
                Some(&self.config.api_key),
                Some(&body),
                &[],
            )
            .await?;

        info!(
            email_id = %response.id,
            to = %mask_email(to),
            subject,
            "email accepted for delivery"
        );
        Ok(())
    }
}

#[async_trait]
impl OrderMailer for ResendMailer {
    async fn send_order_confirmation(
        &self,
        order: &OrderDetails,
        payment: &Payment,
    ) -> Result<(), MailerError> {
        let subject = format!("Pedido Confirmado #{} - Mimo Kids", order.order.order_number);
        let html = render_confirmation(order, payment, &self.config.support_email);
        self.deliver(&order.order.customer_email, &subject, html)
            .await
    }

    async fn send_pix_instructions(
        &self,
        order: &OrderDetails,
        payment: &Payment,
    ) -> Result<(), MailerError> {
        let subject = format!("PIX Pendente - Pedido #{} - Mimo Kids", order.order.order_number);
        let html = render_pix_instructions(order, payment, &self.config.support_email);
        self.deliver(&order.order.customer_email, &subject, html)
            .await
    }
}

/// Renders an amount as Brazilian currency text, e.g. `R$ 89,90`.
pub fn format_brl(amount: &BigDecimal) -> String {
    let rounded = amount.with_scale_round(2, RoundingMode::HalfUp);
    format!("R$ {}", rounded.to_string().replace('.', ","))
}

fn first_name(full_name: &str) -> &str {
    full_name.split_whitespace().next().unwrap_or(full_name)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn items_table(order: &OrderDetails) -> String {
    let mut rows = String::new();
    for item in &order.items {
        let mut description = escape_html(&item.product_name);
        if let Some(size) = &item.size {
            description.push_str(&format!(" - Tam. {}", escape_html(size)));
        }
        if let Some(color) = &item.color {
            description.push_str(&format!(" - {}", escape_html(color)));
        }
        let line_total = &item.unit_price * BigDecimal::from(item.quantity);
        rows.push_str(&format!(
            "<tr>\
             <td style=\"padding:8px;border-bottom:1px solid #eee;\">{}</td>\
             <td style=\"padding:8px;border-bottom:1px solid #eee;text-align:center;\">{}</td>\
             <td style=\"padding:8px;border-bottom:1px solid #eee;text-align:right;\">{}</td>\
             </tr>",
            description,
            item.quantity,
            format_brl(&line_total)
        ));
    }

    format!(
        "<table style=\"width:100%;border-collapse:collapse;\">\
         <tr>\
         <th style=\"padding:8px;text-align:left;border-bottom:2px solid #333;\">Produto</th>\
         <th style=\"padding:8px;text-align:center;border-bottom:2px solid #333;\">Qtd.</th>\
         <th style=\"padding:8px;text-align:right;border-bottom:2px solid #333;\">Valor</th>\
         </tr>{}</table>",
        rows
    )
}

fn address_block(order: &OrderDetails) -> String {
    let a = &order.address;
    let complement = a
        .complement
        .as_deref()
        .map(|c| format!(" - {}", escape_html(c)))
        .unwrap_or_default();
    format!(
        "<p style=\"margin:4px 0;\">{}, {}{}<br>{} - {} / {}<br>CEP: {}</p>",
        escape_html(&a.street),
        escape_html(&a.number),
        complement,
        escape_html(&a.neighborhood),
        escape_html(&a.city),
        escape_html(&a.state),
        escape_html(&a.zip_code)
    )
}

fn render_confirmation(order: &OrderDetails, payment: &Payment, support_email: &str) -> String {
    let payment_line = match payment.method.as_str() {
        "PIX" => "PIX".to_string(),
        "CREDIT_CARD" if payment.installments > 1 => {
            format!("Cartão de crédito em {}x", payment.installments)
        }
        "CREDIT_CARD" => "Cartão de crédito".to_string(),
        "DEBIT_CARD" => "Cartão de débito".to_string(),
        other => other.to_string(),
    };

    format!(
        "<div style=\"font-family:Arial,sans-serif;max-width:600px;margin:0 auto;color:#333;\">\
         <h1 style=\"color:#e91e8c;\">Pedido Confirmado!</h1>\
         <p>Olá, {name}!</p>\
         <p>Recebemos o pagamento do seu pedido <strong>#{number}</strong>. \
         Já estamos preparando tudo com muito carinho.</p>\
         <h2>Resumo do pedido</h2>\
         {items}\
         <p style=\"text-align:right;font-size:18px;\"><strong>Total: {total}</strong></p>\
         <p><strong>Forma de pagamento:</strong> {payment}</p>\
         <h2>Endereço de entrega</h2>\
         {address}\
         <h2>Próximos passos</h2>\
         <p>Seu pedido será enviado em até 2 dias úteis. Você receberá o código \
         de rastreio por email assim que ele for postado.</p>\
         <p style=\"margin-top:24px;color:#888;font-size:12px;\">Dúvidas? Fale com a gente: \
         <a href=\"mailto:{support}\">{support}</a></p>\
         </div>",
        name = escape_html(first_name(&order.order.customer_name)),
        number = escape_html(&order.order.order_number),
        items = items_table(order),
        total = format_brl(&order.order.total),
        payment = payment_line,
        address = address_block(order),
        support = escape_html(support_email),
    )
}

fn render_pix_instructions(order: &OrderDetails, payment: &Payment, support_email: &str) -> String {
    let qr_image = payment
        .pix_qr_code_base64
        .as_deref()
        .map(|b64| {
            format!(
                "<p style=\"text-align:center;\">\
                 <img src=\"data:image/png;base64,{}\" alt=\"QR Code PIX\" \
                 style=\"max-width:240px;\"></p>",
                b64
            )
        })
        .unwrap_or_default();

    let copy_paste = payment
        .pix_qr_code
        .as_deref()
        .map(|code| {
            format!(
                "<p>Ou copie o código abaixo e cole no app do seu banco:</p>\
                 <p style=\"background:#f5f5f5;padding:12px;border-radius:4px;\
                 word-break:break-all;font-family:monospace;font-size:12px;\">{}</p>",
                escape_html(code)
            )
        })
        .unwrap_or_default();

    format!(
        "<div style=\"font-family:Arial,sans-serif;max-width:600px;margin:0 auto;color:#333;\">\
         <h1 style=\"color:#e91e8c;\">Falta pouco!</h1>\
         <p>Olá, {name}!</p>\
         <p>Seu pedido <strong>#{number}</strong> foi reservado e aguarda o pagamento \
         via PIX no valor de <strong>{total}</strong>.</p>\
         {qr_image}\
         {copy_paste}\
         <p>O pagamento por PIX é confirmado em poucos minutos. Assim que for \
         aprovado, enviaremos a confirmação do pedido por email.</p>\
         <p style=\"margin-top:24px;color:#888;font-size:12px;\">Dúvidas? Fale com a gente: \
         <a href=\"mailto:{support}\">{support}</a></p>\
         </div>",
        name = escape_html(first_name(&order.order.customer_name)),
        number = escape_html(&order.order.order_number),
        total = format_brl(&payment.amount),
        qr_image = qr_image,
        copy_paste = copy_paste,
        support = escape_html(support_email),
    )
}
