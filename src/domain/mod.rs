//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{AppError, ConfigError, DatabaseError, PublishError, ValidationError};
pub use traits::{
    BalanceCache, BalanceStore, NotificationPublisher, PartnerStore, TransactionStore,
};
pub use types::{
    BalanceResponse, CreatePartnerRequest, ErrorDetail, ErrorResponse, HealthResponse,
    HealthStatus, PaginatedResponse, PaginationParams, Partner, PartnerBalance, Transaction,
    TransactionKind, TransactionNotification, TransactionRequest, TransactionStatus,
};
