//! Bounded retry loop around versioned balance writes.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{AppError, BalanceCache, BalanceStore, PartnerBalance};

/// Attempts per mutation before giving up on version conflicts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// The only writer path to the balance store. Wraps a pure mutation function
/// in a read-compute-write cycle that re-runs on version conflict, up to a
/// fixed bound.
pub struct ConcurrencyRetryExecutor {
    balances: Arc<dyn BalanceStore>,
    cache: Arc<dyn BalanceCache>,
    max_attempts: u32,
}

impl ConcurrencyRetryExecutor {
    #[must_use]
    pub fn new(balances: Arc<dyn BalanceStore>, cache: Arc<dyn BalanceCache>) -> Self {
        Self::with_max_attempts(balances, cache, DEFAULT_MAX_ATTEMPTS)
    }

    #[must_use]
    pub fn with_max_attempts(
        balances: Arc<dyn BalanceStore>,
        cache: Arc<dyn BalanceCache>,
        max_attempts: u32,
    ) -> Self {
        Self {
            balances,
            cache,
            max_attempts,
        }
    }

    /// Apply `mutate` to the partner's current balance and persist the result
    /// with a versioned write.
    ///
    /// The balance is always re-read from the durable store (never the cache)
    /// so the version is authoritative; a partner without a balance row reads
    /// as zero at version 0 and the first write inserts the row. `mutate`
    /// failures (InsufficientBalance) propagate immediately without a write.
    /// Version conflicts re-run the whole cycle; exhausting the bound is a
    /// distinct fatal outcome.
    pub async fn apply<F>(&self, partner_id: Uuid, mutate: F) -> Result<PartnerBalance, AppError>
    where
        F: Fn(Decimal) -> Result<Decimal, AppError> + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let current = self
                .balances
                .find_balance(partner_id)
                .await?
                .unwrap_or_else(|| PartnerBalance::zero(partner_id));

            let next = mutate(current.balance)?;

            match self
                .balances
                .compare_and_swap(partner_id, current.version, next)
                .await
            {
                Ok(updated) => {
                    self.cache.invalidate(partner_id);
                    return Ok(updated);
                }
                Err(err) if err.is_version_conflict() => {
                    if attempt >= self.max_attempts {
                        warn!(
                            partner_id = %partner_id,
                            attempts = attempt,
                            "Balance write abandoned after repeated version conflicts"
                        );
                        return Err(AppError::ConflictExhausted {
                            partner_id,
                            attempts: attempt,
                        });
                    }
                    debug!(
                        partner_id = %partner_id,
                        attempt = attempt,
                        "Version conflict on balance write, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockBalanceStore, NoopBalanceCache};

    fn executor(store: Arc<MockBalanceStore>) -> ConcurrencyRetryExecutor {
        ConcurrencyRetryExecutor::new(store, Arc::new(NoopBalanceCache))
    }

    #[tokio::test]
    async fn test_apply_inserts_first_balance() {
        let store = Arc::new(MockBalanceStore::new());
        let partner_id = Uuid::new_v4();

        let updated = executor(Arc::clone(&store))
            .apply(partner_id, |balance| Ok(balance + Decimal::new(10000, 2)))
            .await
            .unwrap();

        assert_eq!(updated.balance, Decimal::new(10000, 2));
        assert_eq!(updated.version, 1);
    }

    #[tokio::test]
    async fn test_apply_retries_on_conflict() {
        let store = Arc::new(MockBalanceStore::new());
        let partner_id = Uuid::new_v4();
        store.seed(partner_id, Decimal::new(5000, 2));
        store.inject_conflicts(2);

        let updated = executor(Arc::clone(&store))
            .apply(partner_id, |balance| Ok(balance + Decimal::new(100, 2)))
            .await
            .unwrap();

        assert_eq!(updated.balance, Decimal::new(5100, 2));
        assert_eq!(store.cas_attempts(), 3);
    }

    #[tokio::test]
    async fn test_apply_surfaces_conflict_exhaustion() {
        let store = Arc::new(MockBalanceStore::new());
        let partner_id = Uuid::new_v4();
        store.seed(partner_id, Decimal::new(5000, 2));
        store.inject_conflicts(10);

        let err = executor(Arc::clone(&store))
            .apply(partner_id, |balance| Ok(balance + Decimal::ONE))
            .await
            .unwrap_err();

        match err {
            AppError::ConflictExhausted { attempts, .. } => {
                assert_eq!(attempts, DEFAULT_MAX_ATTEMPTS);
            }
            other => panic!("Expected ConflictExhausted, got {:?}", other),
        }
        // Balance untouched
        let balance = store.find(partner_id).unwrap();
        assert_eq!(balance.balance, Decimal::new(5000, 2));
        assert_eq!(balance.version, 1);
    }

    #[tokio::test]
    async fn test_mutation_failure_writes_nothing() {
        let store = Arc::new(MockBalanceStore::new());
        let partner_id = Uuid::new_v4();
        store.seed(partner_id, Decimal::new(1000, 2));

        let err = executor(Arc::clone(&store))
            .apply(partner_id, |balance| {
                Err(AppError::InsufficientBalance {
                    available: balance,
                    requested: Decimal::new(5000, 2),
                })
            })
            .await
            .unwrap_err();

        assert!(err.is_insufficient_balance());
        assert_eq!(store.cas_attempts(), 0);
        assert_eq!(store.find(partner_id).unwrap().balance, Decimal::new(1000, 2));
    }
}
