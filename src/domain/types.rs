//! Domain types with validation support.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Direction of a ledger transaction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Adds credits to the partner's balance
    Credit,
    /// Consumes credits from the partner's balance
    Debit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(Self::Credit),
            "debit" => Ok(Self::Debit),
            _ => Err(format!("Invalid transaction kind: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Processing status of a transaction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Admitted, balance effect not yet applied
    #[default]
    Pending,
    /// Balance effect applied
    Completed,
    /// Rejected (insufficient balance) or abandoned by reconciliation
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal statuses permit no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid transaction status: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Partner identity record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Partner {
    /// Unique identifier
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    /// Display name
    #[schema(example = "Acme Logistics")]
    pub name: String,
    /// Contact email, unique per partner
    #[schema(example = "billing@acme.example")]
    pub email: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Partner {
    #[must_use]
    pub fn new(name: String, email: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            email,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-partner credit balance with an optimistic version counter.
///
/// `version == 0` means the row has never been persisted: reads of unknown
/// partners yield a zero balance without creating a row, and the first
/// successful write inserts it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct PartnerBalance {
    pub partner_id: Uuid,
    /// Current balance, never negative
    #[schema(value_type = String, example = "125.50")]
    pub balance: Decimal,
    /// Incremented on every successful write
    pub version: i64,
    pub last_updated_at: DateTime<Utc>,
}

impl PartnerBalance {
    /// Unpersisted zero balance for a partner with no balance row yet.
    #[must_use]
    pub fn zero(partner_id: Uuid) -> Self {
        Self {
            partner_id,
            balance: Decimal::ZERO,
            version: 0,
            last_updated_at: Utc::now(),
        }
    }
}

/// Ledger transaction. Immutable once the status is terminal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Transaction {
    /// Unique identifier, generated at creation
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    pub partner_id: Uuid,
    pub kind: TransactionKind,
    /// Transaction amount, strictly positive
    #[schema(value_type = String, example = "100.00")]
    pub amount: Decimal,
    pub description: String,
    pub status: TransactionStatus,
    /// Caller-supplied deduplication token, unique per partner
    #[schema(example = "invoice-2024-0042")]
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    #[must_use]
    pub fn new(
        partner_id: Uuid,
        kind: TransactionKind,
        amount: Decimal,
        description: String,
        idempotency_key: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            partner_id,
            kind,
            amount,
            description,
            status: TransactionStatus::Pending,
            idempotency_key,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

fn validate_positive_amount(amount: &Decimal) -> Result<(), validator::ValidationError> {
    if *amount <= Decimal::ZERO {
        let mut err = validator::ValidationError::new("amount_not_positive");
        err.message = Some("Amount must be greater than zero".into());
        return Err(err);
    }
    Ok(())
}

/// Request to create a partner
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePartnerRequest {
    #[validate(length(min = 1, max = 255, message = "Name is required"))]
    #[schema(example = "Acme Logistics")]
    pub name: String,
    #[validate(email(message = "A valid email is required"))]
    #[schema(example = "billing@acme.example")]
    pub email: String,
}

/// Request body for credit and debit operations
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct TransactionRequest {
    /// Amount of credits, must be greater than zero
    #[validate(custom(function = validate_positive_amount))]
    #[schema(value_type = String, example = "100.00")]
    pub amount: Decimal,
    /// Human-readable reason for the transaction
    #[validate(length(min = 1, message = "Description is required"))]
    #[schema(example = "Monthly top-up")]
    pub description: String,
    /// Deduplication token; repeated requests with the same key return the
    /// original transaction
    #[validate(length(min = 1, message = "Idempotency key is required"))]
    #[schema(example = "invoice-2024-0042")]
    pub idempotency_key: String,
}

/// Balance read response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub partner_id: Uuid,
    #[schema(value_type = String, example = "125.50")]
    pub balance: Decimal,
    pub last_updated_at: DateTime<Utc>,
}

impl From<PartnerBalance> for BalanceResponse {
    fn from(balance: PartnerBalance) -> Self {
        Self {
            partner_id: balance.partner_id,
            balance: balance.balance,
            last_updated_at: balance.last_updated_at,
        }
    }
}

/// Event payload published after a transaction reaches a terminal state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionNotification {
    pub transaction_id: Uuid,
    pub partner_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
}

impl From<&Transaction> for TransactionNotification {
    fn from(transaction: &Transaction) -> Self {
        Self {
            transaction_id: transaction.id,
            partner_id: transaction.partner_id,
            kind: transaction.kind,
            amount: transaction.amount,
            status: transaction.status,
            timestamp: transaction.updated_at,
        }
    }
}

/// Pagination parameters for list requests
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PaginationParams {
    /// Maximum number of items to return (1-100, default: 20)
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    #[serde(default = "default_limit")]
    #[schema(example = 20)]
    pub limit: i64,
    /// Cursor for pagination (transaction ID to start after)
    pub cursor: Option<Uuid>,
}

fn default_limit() -> i64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            cursor: None,
        }
    }
}

/// Paginated response wrapper
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T: ToSchema> {
    /// List of items
    pub items: Vec<T>,
    /// Cursor for next page (null if no more items)
    pub next_cursor: Option<Uuid>,
    /// Whether more items exist
    pub has_more: bool,
}

impl<T: ToSchema> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<Uuid>, has_more: bool) -> Self {
        Self {
            items,
            next_cursor,
            has_more,
        }
    }

    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Overall system status
    pub status: HealthStatus,
    /// Durable store health status
    pub database: HealthStatus,
    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
    /// Application version
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(database: HealthStatus) -> Self {
        Self {
            status: database,
            database,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Error type identifier
    #[schema(example = "not_found")]
    pub r#type: String,
    /// Human-readable error message
    #[schema(example = "Partner not found")]
    pub message: String,
}
