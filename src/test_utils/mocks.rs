//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    AppError, BalanceCache, BalanceStore, DatabaseError, NotificationPublisher,
    PaginatedResponse, Partner, PartnerBalance, PartnerStore, Transaction, TransactionStatus,
    TransactionStore,
};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }
}

fn mock_error(config: &MockConfig) -> AppError {
    let msg = config
        .error_message
        .clone()
        .unwrap_or_else(|| "Mock error".to_string());
    AppError::Database(DatabaseError::Query(msg))
}

/// Mock partner store for testing
pub struct MockPartnerStore {
    partners: Mutex<HashMap<Uuid, Partner>>,
    config: MockConfig,
}

impl MockPartnerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            partners: Mutex::new(HashMap::new()),
            config,
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    /// Insert a partner directly and return its id.
    pub fn seed_partner(&self, name: &str, email: &str) -> Uuid {
        let partner = Partner::new(name.to_string(), email.to_string());
        let id = partner.id;
        self.partners.lock().unwrap().insert(id, partner);
        id
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(mock_error(&self.config));
        }
        Ok(())
    }
}

impl Default for MockPartnerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PartnerStore for MockPartnerStore {
    async fn create_partner(&self, partner: Partner) -> Result<Partner, AppError> {
        self.check_should_fail()?;
        let mut partners = self.partners.lock().unwrap();
        if partners.values().any(|p| p.email == partner.email) {
            return Err(AppError::Database(DatabaseError::Duplicate(format!(
                "Partner with email {} already exists",
                partner.email
            ))));
        }
        partners.insert(partner.id, partner.clone());
        Ok(partner)
    }

    async fn get_partner(&self, partner_id: Uuid) -> Result<Option<Partner>, AppError> {
        self.check_should_fail()?;
        Ok(self.partners.lock().unwrap().get(&partner_id).cloned())
    }

    async fn partner_exists(&self, partner_id: Uuid) -> Result<bool, AppError> {
        self.check_should_fail()?;
        Ok(self.partners.lock().unwrap().contains_key(&partner_id))
    }
}

/// Mock transaction store for testing
pub struct MockTransactionStore {
    storage: Mutex<HashMap<Uuid, Transaction>>,
    config: MockConfig,
    is_healthy: AtomicBool,
}

impl MockTransactionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            storage: Mutex::new(HashMap::new()),
            config,
            is_healthy: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Insert a transaction directly, bypassing admission.
    pub fn insert(&self, transaction: Transaction) {
        self.storage
            .lock()
            .unwrap()
            .insert(transaction.id, transaction);
    }

    /// Get all stored transactions (for assertions)
    pub fn all(&self) -> Vec<Transaction> {
        self.storage.lock().unwrap().values().cloned().collect()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(mock_error(&self.config));
        }
        Ok(())
    }
}

impl Default for MockTransactionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionStore for MockTransactionStore {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn admit(&self, candidate: Transaction) -> Result<(Transaction, bool), AppError> {
        self.check_should_fail()?;
        let mut storage = self.storage.lock().unwrap();
        if let Some(existing) = storage.values().find(|t| {
            t.partner_id == candidate.partner_id && t.idempotency_key == candidate.idempotency_key
        }) {
            return Ok((existing.clone(), false));
        }
        storage.insert(candidate.id, candidate.clone());
        Ok((candidate, true))
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, AppError> {
        self.check_should_fail()?;
        Ok(self.storage.lock().unwrap().get(&id).cloned())
    }

    async fn list_transactions(
        &self,
        partner_id: Uuid,
        limit: i64,
        cursor: Option<Uuid>,
    ) -> Result<PaginatedResponse<Transaction>, AppError> {
        self.check_should_fail()?;
        let storage = self.storage.lock().unwrap();
        let mut items: Vec<Transaction> = storage
            .values()
            .filter(|t| t.partner_id == partner_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let items = if let Some(cursor_id) = cursor {
            match items.iter().position(|t| t.id == cursor_id) {
                Some(pos) => items.into_iter().skip(pos + 1).collect(),
                None => {
                    return Err(AppError::Validation(
                        crate::domain::ValidationError::InvalidField {
                            field: "cursor".to_string(),
                            message: "Invalid cursor".to_string(),
                        },
                    ));
                }
            }
        } else {
            items
        };

        let limit = limit.clamp(1, 100) as usize;
        let has_more = items.len() > limit;
        let items: Vec<Transaction> = items.into_iter().take(limit).collect();
        let next_cursor = if has_more {
            items.last().map(|t| t.id)
        } else {
            None
        };

        Ok(PaginatedResponse::new(items, next_cursor, has_more))
    }

    async fn mark_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
    ) -> Result<Transaction, AppError> {
        self.check_should_fail()?;
        let mut storage = self.storage.lock().unwrap();
        let transaction = storage.get_mut(&id).ok_or_else(|| {
            AppError::Database(DatabaseError::NotFound(format!(
                "Transaction not found with id: {}",
                id
            )))
        })?;
        // Single-writer-wins: terminal rows are returned untouched
        if transaction.status == TransactionStatus::Pending {
            transaction.status = status;
            transaction.updated_at = Utc::now();
        }
        Ok(transaction.clone())
    }

    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        page_size: i64,
        page: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        self.check_should_fail()?;
        let storage = self.storage.lock().unwrap();
        let mut items: Vec<Transaction> = storage
            .values()
            .filter(|t| t.status == TransactionStatus::Pending && t.created_at < cutoff)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items
            .into_iter()
            .skip((page * page_size) as usize)
            .take(page_size as usize)
            .collect())
    }
}

/// Mock balance store with real optimistic-versioning semantics
pub struct MockBalanceStore {
    balances: Mutex<HashMap<Uuid, PartnerBalance>>,
    config: MockConfig,
    cas_attempts: AtomicU32,
    injected_conflicts: AtomicU32,
    fail_cas: AtomicBool,
}

impl MockBalanceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            config,
            cas_attempts: AtomicU32::new(0),
            injected_conflicts: AtomicU32::new(0),
            fail_cas: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    /// Insert a balance row directly at version 1.
    pub fn seed(&self, partner_id: Uuid, balance: Decimal) {
        self.balances.lock().unwrap().insert(
            partner_id,
            PartnerBalance {
                partner_id,
                balance,
                version: 1,
                last_updated_at: Utc::now(),
            },
        );
    }

    /// Current row, if any (for assertions)
    pub fn find(&self, partner_id: Uuid) -> Option<PartnerBalance> {
        self.balances.lock().unwrap().get(&partner_id).cloned()
    }

    /// Force the next `count` compare_and_swap calls to report a version
    /// conflict regardless of the stored version.
    pub fn inject_conflicts(&self, count: u32) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Make every compare_and_swap fail with a query error (infrastructure
    /// failure simulation).
    pub fn fail_cas_with_query_error(&self, fail: bool) {
        self.fail_cas.store(fail, Ordering::SeqCst);
    }

    /// Number of compare_and_swap calls observed.
    pub fn cas_attempts(&self) -> u32 {
        self.cas_attempts.load(Ordering::SeqCst)
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(mock_error(&self.config));
        }
        Ok(())
    }
}

impl Default for MockBalanceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BalanceStore for MockBalanceStore {
    async fn find_balance(&self, partner_id: Uuid) -> Result<Option<PartnerBalance>, AppError> {
        self.check_should_fail()?;
        Ok(self.balances.lock().unwrap().get(&partner_id).cloned())
    }

    async fn compare_and_swap(
        &self,
        partner_id: Uuid,
        expected_version: i64,
        new_balance: Decimal,
    ) -> Result<PartnerBalance, AppError> {
        self.check_should_fail()?;
        self.cas_attempts.fetch_add(1, Ordering::SeqCst);

        if self.fail_cas.load(Ordering::SeqCst) {
            return Err(AppError::Database(DatabaseError::Query(
                "Injected storage failure".to_string(),
            )));
        }

        if self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::Database(DatabaseError::VersionConflict {
                partner_id,
                expected: expected_version,
            }));
        }

        let mut balances = self.balances.lock().unwrap();
        match balances.get_mut(&partner_id) {
            Some(stored) => {
                if stored.version != expected_version {
                    return Err(AppError::Database(DatabaseError::VersionConflict {
                        partner_id,
                        expected: expected_version,
                    }));
                }
                stored.balance = new_balance;
                stored.version += 1;
                stored.last_updated_at = Utc::now();
                Ok(stored.clone())
            }
            None => {
                if expected_version != 0 {
                    return Err(AppError::Database(DatabaseError::VersionConflict {
                        partner_id,
                        expected: expected_version,
                    }));
                }
                let inserted = PartnerBalance {
                    partner_id,
                    balance: new_balance,
                    version: 1,
                    last_updated_at: Utc::now(),
                };
                balances.insert(partner_id, inserted.clone());
                Ok(inserted)
            }
        }
    }
}

/// Cache that stores nothing; disables caching without affecting engine
/// behavior.
pub struct NoopBalanceCache;

impl BalanceCache for NoopBalanceCache {
    fn get(&self, _partner_id: Uuid) -> Option<PartnerBalance> {
        None
    }

    fn put(&self, _balance: PartnerBalance) {}

    fn invalidate(&self, _partner_id: Uuid) {}

    fn capacity(&self) -> usize {
        0
    }

    fn ttl(&self) -> Duration {
        Duration::ZERO
    }
}

/// Mock publisher recording every publish
pub struct MockPublisher {
    published: Mutex<Vec<(String, String, serde_json::Value)>>,
    config: MockConfig,
    gate: tokio::sync::watch::Receiver<bool>,
    release: tokio::sync::watch::Sender<bool>,
}

impl MockPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        let (release, gate) = tokio::sync::watch::channel(true);
        Self {
            published: Mutex::new(Vec::new()),
            config,
            gate,
            release,
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    /// Publisher whose publish calls stall until `release` is called. Used to
    /// exercise the dispatcher's bounded-queue overflow behavior.
    #[must_use]
    pub fn blocking() -> Self {
        let publisher = Self::new();
        publisher.release.send_replace(false);
        publisher
    }

    /// Unblock a `blocking()` publisher.
    pub fn release(&self) {
        self.release.send_replace(true);
    }

    /// Recorded (topic, key, payload) triples.
    pub fn published(&self) -> Vec<(String, String, serde_json::Value)> {
        self.published.lock().unwrap().clone()
    }
}

impl Default for MockPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationPublisher for MockPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<(), AppError> {
        let mut gate = self.gate.clone();
        while !*gate.borrow() {
            if gate.changed().await.is_err() {
                break;
            }
        }

        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string());
            return Err(AppError::Publish(crate::domain::PublishError::Transport(
                msg,
            )));
        }

        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), key.to_string(), payload.clone()));
        Ok(())
    }
}
