use thiserror::Error;

/// Classified database failure. Repositories convert raw `sqlx` errors
/// through [`DatabaseError::from_sqlx`] so callers can branch on the class
/// instead of string-matching driver messages.
#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

#[derive(Debug, Clone, Error)]
pub enum DatabaseErrorKind {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Connection pool timed out")]
    PoolTimeout,

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Database error: {message}")]
    Unknown { message: String },
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::PoolTimedOut => DatabaseErrorKind::PoolTimeout,
            sqlx::Error::Io(e) => DatabaseErrorKind::Connection {
                message: e.to_string(),
            },
            sqlx::Error::Tls(e) => DatabaseErrorKind::Connection {
                message: e.to_string(),
            },
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DatabaseErrorKind::UniqueViolation {
                    constraint: db.constraint().unwrap_or("unknown").to_string(),
                }
            }
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self { kind }
    }

    /// Connection-level failures may succeed on retry; constraint and
    /// lookup failures will not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::Connection { .. } | DatabaseErrorKind::PoolTimeout
        )
    }
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for DatabaseError {}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};

        let kind = match &err.kind {
            DatabaseErrorKind::NotFound { entity, id } => match entity.as_str() {
                "payment" => AppErrorKind::Domain(DomainError::PaymentNotFound {
                    external_id: id.clone(),
                }),
                _ => AppErrorKind::Domain(DomainError::OrderNotFound {
                    order_id: id.clone(),
                }),
            },
            _ => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };

        AppError::new(kind)
    }
}
