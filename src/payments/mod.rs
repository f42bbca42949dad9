//! Payment gateway integration: domain enums, wire types, status mapping
//! and the MercadoPago client.

pub mod error;
pub mod gateway;
pub mod mapper;
pub mod mercadopago;
pub mod types;
pub mod utils;

pub use error::{GatewayError, GatewayResult};
pub use gateway::PaymentGateway;
pub use mercadopago::{MercadoPagoConfig, MercadoPagoGateway};
pub use types::{OrderStatus, PaymentMethod, PaymentStatus};
