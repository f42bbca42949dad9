use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Gateway authentication failed: {message}")]
    AuthenticationError { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Gateway timeout: {message}")]
    Timeout { message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Gateway error: status={status}, message={message}")]
    ApiError {
        status: u16,
        message: String,
        retryable: bool,
    },
}

impl GatewayError {
    /// Transient failures the caller may retry. Authentication rejections
    /// are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::ValidationError { .. } => false,
            GatewayError::AuthenticationError { .. } => false,
            GatewayError::NotFound { .. } => false,
            GatewayError::Timeout { .. } => true,
            GatewayError::NetworkError { .. } => true,
            GatewayError::RateLimitError { .. } => true,
            GatewayError::ApiError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            GatewayError::ValidationError { .. } => 400,
            GatewayError::AuthenticationError { .. } => 502,
            GatewayError::NotFound { .. } => 404,
            GatewayError::Timeout { .. } => 504,
            GatewayError::NetworkError { .. } => 502,
            GatewayError::RateLimitError { .. } => 429,
            GatewayError::ApiError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            GatewayError::ValidationError { message, .. } => message.clone(),
            GatewayError::AuthenticationError { .. } => {
                "Payment gateway rejected the service credentials".to_string()
            }
            GatewayError::NotFound { .. } => {
                "Requested gateway resource was not found".to_string()
            }
            GatewayError::Timeout { .. } => {
                "Payment gateway did not respond in time".to_string()
            }
            GatewayError::NetworkError { .. } => {
                "Payment gateway is temporarily unavailable".to_string()
            }
            GatewayError::RateLimitError { .. } => {
                "Too many requests to the payment gateway. Please retry shortly".to_string()
            }
            GatewayError::ApiError { .. } => "Payment gateway returned an error".to_string(),
        }
    }
}

impl From<GatewayError> for crate::error::AppError {
    fn from(err: GatewayError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError};

        let kind = match &err {
            GatewayError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppErrorKind::External(ExternalError::RateLimit {
                service: "MercadoPago".to_string(),
                retry_after: *retry_after_seconds,
            }),
            GatewayError::Timeout { .. } => AppErrorKind::External(ExternalError::Timeout {
                service: "MercadoPago".to_string(),
            }),
            _ => AppErrorKind::External(ExternalError::PaymentGateway {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };

        AppError::new(kind)
    }
}
