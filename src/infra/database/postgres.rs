//! PostgreSQL store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::{
    AppError, BalanceStore, DatabaseError, PaginatedResponse, Partner, PartnerBalance,
    PartnerStore, Transaction, TransactionKind, TransactionStatus, TransactionStore,
};

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL client with connection pooling. Implements all three store
/// ports; the uniqueness and versioning invariants live in the schema.
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_partner(row: &sqlx::postgres::PgRow) -> Partner {
        Partner {
            id: row.get("id"),
            name: row.get("name"),
            email: row.get("email"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn row_to_balance(row: &sqlx::postgres::PgRow) -> PartnerBalance {
        PartnerBalance {
            partner_id: row.get("partner_id"),
            balance: row.get("balance"),
            version: row.get("version"),
            last_updated_at: row.get("last_updated_at"),
        }
    }

    fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<Transaction, AppError> {
        let kind_str: String = row.get("kind");
        let status_str: String = row.get("status");

        Ok(Transaction {
            id: row.get("id"),
            partner_id: row.get("partner_id"),
            kind: kind_str
                .parse()
                .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))?,
            amount: row.get("amount"),
            description: row.get("description"),
            status: status_str
                .parse()
                .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))?,
            idempotency_key: row.get("idempotency_key"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn find_by_idempotency_key(
        &self,
        partner_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Transaction>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, partner_id, kind, amount, description, status,
                   idempotency_key, created_at, updated_at
            FROM transactions
            WHERE partner_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(partner_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        row.as_ref().map(Self::row_to_transaction).transpose()
    }
}

#[async_trait]
impl PartnerStore for PostgresClient {
    #[instrument(skip(self, partner), fields(partner_id = %partner.id))]
    async fn create_partner(&self, partner: Partner) -> Result<Partner, AppError> {
        sqlx::query(
            r#"
            INSERT INTO partners (id, name, email, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(partner.id)
        .bind(&partner.name)
        .bind(&partner.email)
        .bind(partner.created_at)
        .bind(partner.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Ok(partner)
    }

    #[instrument(skip(self))]
    async fn get_partner(&self, partner_id: Uuid) -> Result<Option<Partner>, AppError> {
        let row = sqlx::query(
            "SELECT id, name, email, created_at, updated_at FROM partners WHERE id = $1",
        )
        .bind(partner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(row.as_ref().map(Self::row_to_partner))
    }

    #[instrument(skip(self))]
    async fn partner_exists(&self, partner_id: Uuid) -> Result<bool, AppError> {
        let row = sqlx::query("SELECT 1 AS one FROM partners WHERE id = $1")
            .bind(partner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl TransactionStore for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, candidate), fields(partner_id = %candidate.partner_id, key = %candidate.idempotency_key))]
    async fn admit(&self, candidate: Transaction) -> Result<(Transaction, bool), AppError> {
        if let Some(existing) = self
            .find_by_idempotency_key(candidate.partner_id, &candidate.idempotency_key)
            .await?
        {
            return Ok((existing, false));
        }

        let insert = sqlx::query(
            r#"
            INSERT INTO transactions (
                id, partner_id, kind, amount, description, status,
                idempotency_key, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(candidate.id)
        .bind(candidate.partner_id)
        .bind(candidate.kind.as_str())
        .bind(candidate.amount)
        .bind(&candidate.description)
        .bind(candidate.status.as_str())
        .bind(&candidate.idempotency_key)
        .bind(candidate.created_at)
        .bind(candidate.updated_at)
        .execute(&self.pool)
        .await;

        match insert {
            Ok(_) => Ok((candidate, true)),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                // Lost the insert race: a concurrent admission with the same
                // key won. Return the winner's row.
                let existing = self
                    .find_by_idempotency_key(candidate.partner_id, &candidate.idempotency_key)
                    .await?
                    .ok_or_else(|| {
                        AppError::Database(DatabaseError::Query(
                            "Admitted transaction vanished after unique violation".to_string(),
                        ))
                    })?;
                Ok((existing, false))
            }
            Err(e) => Err(AppError::Database(DatabaseError::from(e))),
        }
    }

    #[instrument(skip(self))]
    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, partner_id, kind, amount, description, status,
                   idempotency_key, created_at, updated_at
            FROM transactions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    #[instrument(skip(self))]
    async fn list_transactions(
        &self,
        partner_id: Uuid,
        limit: i64,
        cursor: Option<Uuid>,
    ) -> Result<PaginatedResponse<Transaction>, AppError> {
        let limit = limit.clamp(1, 100);
        // Fetch one extra to determine if there are more items
        let fetch_limit = limit + 1;

        let rows = match cursor {
            Some(cursor_id) => {
                let cursor_row = sqlx::query(
                    "SELECT created_at FROM transactions WHERE id = $1 AND partner_id = $2",
                )
                .bind(cursor_id)
                .bind(partner_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

                let cursor_created_at: DateTime<Utc> = match cursor_row {
                    Some(row) => row.get("created_at"),
                    None => {
                        return Err(AppError::Validation(
                            crate::domain::ValidationError::InvalidField {
                                field: "cursor".to_string(),
                                message: "Invalid cursor".to_string(),
                            },
                        ));
                    }
                };

                sqlx::query(
                    r#"
                    SELECT id, partner_id, kind, amount, description, status,
                           idempotency_key, created_at, updated_at
                    FROM transactions
                    WHERE partner_id = $1 AND (created_at, id) < ($2, $3)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $4
                    "#,
                )
                .bind(partner_id)
                .bind(cursor_created_at)
                .bind(cursor_id)
                .bind(fetch_limit)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?
            }
            None => sqlx::query(
                r#"
                SELECT id, partner_id, kind, amount, description, status,
                       idempotency_key, created_at, updated_at
                FROM transactions
                WHERE partner_id = $1
                ORDER BY created_at DESC, id DESC
                LIMIT $2
                "#,
            )
            .bind(partner_id)
            .bind(fetch_limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?,
        };

        let has_more = rows.len() > limit as usize;
        let transactions: Vec<Transaction> = rows
            .iter()
            .take(limit as usize)
            .map(Self::row_to_transaction)
            .collect::<Result<Vec<_>, _>>()?;

        let next_cursor = if has_more {
            transactions.last().map(|t| t.id)
        } else {
            None
        };

        Ok(PaginatedResponse::new(transactions, next_cursor, has_more))
    }

    #[instrument(skip(self))]
    async fn mark_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
    ) -> Result<Transaction, AppError> {
        // Only PENDING rows transition; a concurrent writer that already
        // finalized the row wins and its status is returned unchanged.
        let updated = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $1, updated_at = $2
            WHERE id = $3 AND status = 'pending'
            RETURNING id, partner_id, kind, amount, description, status,
                      idempotency_key, created_at, updated_at
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        match updated {
            Some(row) => Self::row_to_transaction(&row),
            None => self
                .get_transaction(id)
                .await?
                .ok_or_else(|| {
                    AppError::Database(DatabaseError::NotFound(format!(
                        "Transaction not found with id: {}",
                        id
                    )))
                }),
        }
    }

    #[instrument(skip(self))]
    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        page_size: i64,
        page: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT id, partner_id, kind, amount, description, status,
                   idempotency_key, created_at, updated_at
            FROM transactions
            WHERE status = 'pending' AND created_at < $1
            ORDER BY id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(cutoff)
        .bind(page_size)
        .bind(page * page_size)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        rows.iter().map(Self::row_to_transaction).collect()
    }
}

#[async_trait]
impl BalanceStore for PostgresClient {
    #[instrument(skip(self))]
    async fn find_balance(&self, partner_id: Uuid) -> Result<Option<PartnerBalance>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT partner_id, balance, version, last_updated_at
            FROM partner_balances
            WHERE partner_id = $1
            "#,
        )
        .bind(partner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(row.as_ref().map(Self::row_to_balance))
    }

    #[instrument(skip(self))]
    async fn compare_and_swap(
        &self,
        partner_id: Uuid,
        expected_version: i64,
        new_balance: Decimal,
    ) -> Result<PartnerBalance, AppError> {
        if expected_version == 0 {
            // First write for this partner: the row is created here, not on
            // read. Losing an insert race to a concurrent first write is a
            // version conflict like any other.
            let inserted = sqlx::query(
                r#"
                INSERT INTO partner_balances (partner_id, balance, version, last_updated_at)
                VALUES ($1, $2, 1, $3)
                RETURNING partner_id, balance, version, last_updated_at
                "#,
            )
            .bind(partner_id)
            .bind(new_balance)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await;

            return match inserted {
                Ok(row) => Ok(Self::row_to_balance(&row)),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    Err(AppError::Database(DatabaseError::VersionConflict {
                        partner_id,
                        expected: expected_version,
                    }))
                }
                Err(e) => Err(AppError::Database(DatabaseError::from(e))),
            };
        }

        let updated = sqlx::query(
            r#"
            UPDATE partner_balances
            SET balance = $1, version = version + 1, last_updated_at = $2
            WHERE partner_id = $3 AND version = $4
            RETURNING partner_id, balance, version, last_updated_at
            "#,
        )
        .bind(new_balance)
        .bind(Utc::now())
        .bind(partner_id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        match updated {
            Some(row) => Ok(Self::row_to_balance(&row)),
            None => Err(AppError::Database(DatabaseError::VersionConflict {
                partner_id,
                expected: expected_version,
            })),
        }
    }
}
