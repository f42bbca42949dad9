//! Services module for business logic and integrations

pub mod mailer;
pub mod reconciliation;

pub use mailer::{EmailConfig, MailerError, OrderMailer, ResendMailer};
pub use reconciliation::{
    IgnoreReason, ReconcileError, ReconcileOutcome, ReconciliationEngine, ReconciliationStore,
    ReconciliationUpdate, ReconciliationWrite,
};
