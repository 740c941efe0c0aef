//! Domain traits defining contracts for external systems.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;
use uuid::Uuid;

use super::error::AppError;
use super::types::{
    PaginatedResponse, Partner, PartnerBalance, Transaction, TransactionStatus,
};

/// Partner identity store. Partner profiles are a pass-through concern; the
/// engine only depends on the existence check as a precondition.
#[async_trait]
pub trait PartnerStore: Send + Sync {
    async fn create_partner(&self, partner: Partner) -> Result<Partner, AppError>;

    async fn get_partner(&self, partner_id: Uuid) -> Result<Option<Partner>, AppError>;

    /// Existence precondition for every balance/transaction operation.
    async fn partner_exists(&self, partner_id: Uuid) -> Result<bool, AppError>;
}

/// Durable transaction ledger keyed by id, unique on
/// (partner_id, idempotency_key).
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Check store connectivity.
    async fn health_check(&self) -> Result<(), AppError>;

    /// Admit a candidate transaction. If a row with the candidate's
    /// (partner_id, idempotency_key) already exists it is returned unchanged
    /// with `false`; otherwise the candidate is persisted as PENDING and
    /// returned with `true`. Atomic with respect to concurrent admissions of
    /// the same key: a loser of the insert race observes the winner's row.
    async fn admit(&self, candidate: Transaction) -> Result<(Transaction, bool), AppError>;

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, AppError>;

    /// List a partner's transactions with cursor-based pagination, newest
    /// first.
    async fn list_transactions(
        &self,
        partner_id: Uuid,
        limit: i64,
        cursor: Option<Uuid>,
    ) -> Result<PaginatedResponse<Transaction>, AppError>;

    /// Move a PENDING transaction to a terminal status. Single-writer-wins:
    /// only rows still PENDING are updated; if the row already reached a
    /// terminal state the stored row is returned untouched.
    async fn mark_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
    ) -> Result<Transaction, AppError>;

    /// One page of transactions still PENDING that were created before
    /// `cutoff`, ordered by id so pagination is stable within a sweep run.
    /// `page` is the zero-based page index.
    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        page_size: i64,
        page: i64,
    ) -> Result<Vec<Transaction>, AppError>;
}

/// Durable per-partner balance store with optimistic versioning.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Current balance row, `None` if the partner has never been written.
    async fn find_balance(&self, partner_id: Uuid) -> Result<Option<PartnerBalance>, AppError>;

    /// Versioned conditional write. `expected_version == 0` inserts the
    /// first row for the partner; otherwise the update succeeds only if the
    /// stored version still equals `expected_version`. A mismatch (or a lost
    /// insert race) fails with `DatabaseError::VersionConflict` and applies
    /// nothing.
    async fn compare_and_swap(
        &self,
        partner_id: Uuid,
        expected_version: i64,
        new_balance: Decimal,
    ) -> Result<PartnerBalance, AppError>;
}

/// Read-through cache in front of the balance store. An optimization only,
/// never a source of truth: stale reads inside the TTL window are acceptable,
/// writes always invalidate.
pub trait BalanceCache: Send + Sync {
    fn get(&self, partner_id: Uuid) -> Option<PartnerBalance>;

    fn put(&self, balance: PartnerBalance);

    fn invalidate(&self, partner_id: Uuid);

    fn capacity(&self) -> usize;

    fn ttl(&self) -> Duration;
}

/// Outbound event transport for processed-transaction notifications.
/// Delivery is best-effort, at most once.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<(), AppError>;
}
