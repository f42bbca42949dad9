//! Mimo Kids backend library.
//!
//! Order/payment reconciliation service for the Mimo Kids storefront:
//! MercadoPago webhook intake, orders and checkout APIs, and transactional
//! email dispatch.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
