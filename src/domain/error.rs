//! Error taxonomy for the credit engine.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Database layer errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database query error: {0}")]
    Query(String),

    #[error("Database migration error: {0}")]
    Migration(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Duplicate resource: {0}")]
    Duplicate(String),

    /// A versioned balance write was rejected because the stored version
    /// no longer matches the one the caller read.
    #[error("Version conflict on balance for partner {partner_id} (expected version {expected})")]
    VersionConflict { partner_id: Uuid, expected: i64 },
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound(err.to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Duplicate(err.to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Connection(err.to_string())
            }
            _ => Self::Query(err.to_string()),
        }
    }
}

/// Validation errors for incoming requests
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Validation failed: {0}")]
    Multiple(String),
}

/// Notification publish errors
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Publish transport error: {0}")]
    Transport(String),

    #[error("Publisher rejected message: {0}")]
    Rejected(String),

    #[error("Failed to serialize notification payload: {0}")]
    Serialization(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration '{name}': {message}")]
    Invalid { name: String, message: String },
}

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Business outcome of a debit against a too-small balance. Resolved by
    /// the processor into a FAILED transaction; never crosses the HTTP API
    /// on the transaction path.
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    /// Every attempt of a versioned balance write was rejected. Surfaced as
    /// a server-side fault, distinct from InsufficientBalance.
    #[error("Balance update for partner {partner_id} abandoned after {attempts} conflicting attempts")]
    ConflictExhausted { partner_id: Uuid, attempts: u32 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Shorthand for a not-found failure on a named resource.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::Database(DatabaseError::NotFound(what.into()))
    }

    #[must_use]
    pub fn is_version_conflict(&self) -> bool {
        matches!(
            self,
            Self::Database(DatabaseError::VersionConflict { .. })
        )
    }

    #[must_use]
    pub fn is_insufficient_balance(&self) -> bool {
        matches!(self, Self::InsufficientBalance { .. })
    }
}
