//! Application service orchestrating admission, balance effects, and
//! finalization of partner credit transactions.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    AppError, BalanceCache, BalanceStore, HealthResponse, HealthStatus, PaginatedResponse,
    Partner, PartnerBalance, PartnerStore, Transaction, TransactionKind, TransactionStatus,
    TransactionStore, ValidationError,
};

use super::notifier::NotificationDispatcher;
use super::retry::ConcurrencyRetryExecutor;

/// Core engine: idempotent transaction admission, optimistic balance
/// mutation, status finalization, and notification hand-off.
pub struct CreditService {
    partners: Arc<dyn PartnerStore>,
    transactions: Arc<dyn TransactionStore>,
    cache: Arc<dyn BalanceCache>,
    balances: Arc<dyn BalanceStore>,
    executor: ConcurrencyRetryExecutor,
    notifier: Option<Arc<NotificationDispatcher>>,
}

impl CreditService {
    #[must_use]
    pub fn new(
        partners: Arc<dyn PartnerStore>,
        transactions: Arc<dyn TransactionStore>,
        balances: Arc<dyn BalanceStore>,
        cache: Arc<dyn BalanceCache>,
    ) -> Self {
        let executor = ConcurrencyRetryExecutor::new(Arc::clone(&balances), Arc::clone(&cache));
        Self {
            partners,
            transactions,
            cache,
            balances,
            executor,
            notifier: None,
        }
    }

    /// Attach a notification dispatcher (builder pattern).
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<NotificationDispatcher>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    async fn ensure_partner(&self, partner_id: Uuid) -> Result<(), AppError> {
        if self.partners.partner_exists(partner_id).await? {
            Ok(())
        } else {
            Err(AppError::not_found(format!(
                "Partner not found with id: {}",
                partner_id
            )))
        }
    }

    /// Create a partner profile (pass-through).
    #[instrument(skip(self, name, email), fields(name = %name))]
    pub async fn create_partner(&self, name: String, email: String) -> Result<Partner, AppError> {
        self.partners.create_partner(Partner::new(name, email)).await
    }

    /// Get a partner profile by id.
    #[instrument(skip(self))]
    pub async fn get_partner(&self, partner_id: Uuid) -> Result<Partner, AppError> {
        self.partners
            .get_partner(partner_id)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!("Partner not found with id: {}", partner_id))
            })
    }

    /// Read a partner's balance through the cache. Partners that have never
    /// been written read as zero; the zero row is cached but not persisted.
    #[instrument(skip(self))]
    pub async fn get_balance(&self, partner_id: Uuid) -> Result<PartnerBalance, AppError> {
        self.ensure_partner(partner_id).await?;

        if let Some(cached) = self.cache.get(partner_id) {
            return Ok(cached);
        }

        let balance = self
            .balances
            .find_balance(partner_id)
            .await?
            .unwrap_or_else(|| PartnerBalance::zero(partner_id));
        self.cache.put(balance.clone());
        Ok(balance)
    }

    /// Admit and process a credit/debit request.
    ///
    /// Admission is idempotent on (partner_id, idempotency_key): a repeated
    /// key returns the originally admitted transaction unchanged, with no
    /// further side effects. A duplicate still PENDING (an earlier attempt
    /// that never finished) is left for the reconciliation sweeper rather
    /// than re-driven here, so a key's balance effect is applied at most
    /// once no matter how many times the request is repeated.
    #[instrument(skip(self, description, idempotency_key), fields(key = %idempotency_key))]
    pub async fn create_and_process_transaction(
        &self,
        partner_id: Uuid,
        kind: TransactionKind,
        amount: Decimal,
        description: String,
        idempotency_key: String,
    ) -> Result<Transaction, AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::Validation(ValidationError::InvalidField {
                field: "amount".to_string(),
                message: "Amount must be greater than zero".to_string(),
            }));
        }
        self.ensure_partner(partner_id).await?;

        let candidate = Transaction::new(partner_id, kind, amount, description, idempotency_key);
        let (transaction, newly_admitted) = self.transactions.admit(candidate).await?;

        if !newly_admitted {
            info!(
                transaction_id = %transaction.id,
                partner_id = %partner_id,
                "Duplicate admission, returning existing transaction"
            );
            return Ok(transaction);
        }

        self.process(transaction).await
    }

    /// Drive a transaction from PENDING to a terminal status.
    ///
    /// Safe to invoke more than once: terminal transactions are returned
    /// unchanged, and the PENDING → terminal transition itself is
    /// single-writer-wins in the store. Called from both the request path and
    /// the reconciliation sweeper.
    #[instrument(skip(self, transaction), fields(transaction_id = %transaction.id, partner_id = %transaction.partner_id))]
    pub async fn process(&self, transaction: Transaction) -> Result<Transaction, AppError> {
        if transaction.is_terminal() {
            return Ok(transaction);
        }

        let partner_id = transaction.partner_id;
        let amount = transaction.amount;

        let status = match transaction.kind {
            TransactionKind::Credit => {
                self.apply_effect(&transaction, move |balance| Ok(balance + amount))
                    .await?;
                TransactionStatus::Completed
            }
            TransactionKind::Debit => {
                let applied = self
                    .apply_effect(&transaction, move |balance| {
                        if balance >= amount {
                            Ok(balance - amount)
                        } else {
                            Err(AppError::InsufficientBalance {
                                available: balance,
                                requested: amount,
                            })
                        }
                    })
                    .await;
                match applied {
                    Ok(_) => TransactionStatus::Completed,
                    Err(AppError::InsufficientBalance {
                        available,
                        requested,
                    }) => {
                        info!(
                            transaction_id = %transaction.id,
                            partner_id = %partner_id,
                            available = %available,
                            requested = %requested,
                            "Debit rejected for insufficient balance"
                        );
                        TransactionStatus::Failed
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let finalized = self.transactions.mark_status(transaction.id, status).await?;
        // Drop any cached read taken between the balance write and now.
        self.cache.invalidate(partner_id);

        if finalized.status != status {
            warn!(
                transaction_id = %finalized.id,
                expected = %status,
                stored = %finalized.status,
                "Transaction was finalized concurrently by another worker"
            );
            return Ok(finalized);
        }

        if let Some(notifier) = &self.notifier {
            notifier.notify(&finalized);
        }

        Ok(finalized)
    }

    async fn apply_effect<F>(
        &self,
        transaction: &Transaction,
        mutate: F,
    ) -> Result<PartnerBalance, AppError>
    where
        F: Fn(Decimal) -> Result<Decimal, AppError> + Send + Sync,
    {
        let result = self.executor.apply(transaction.partner_id, mutate).await;
        if let Err(e) = &result {
            if !e.is_insufficient_balance() {
                error!(
                    transaction_id = %transaction.id,
                    partner_id = %transaction.partner_id,
                    error = %e,
                    "Balance effect failed"
                );
            }
        }
        result
    }

    /// Get a single transaction by id.
    #[instrument(skip(self))]
    pub async fn get_transaction(&self, id: Uuid) -> Result<Transaction, AppError> {
        self.transactions
            .get_transaction(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Transaction not found with id: {}", id)))
    }

    /// List a partner's transactions with pagination.
    #[instrument(skip(self))]
    pub async fn list_transactions(
        &self,
        partner_id: Uuid,
        limit: i64,
        cursor: Option<Uuid>,
    ) -> Result<PaginatedResponse<Transaction>, AppError> {
        self.ensure_partner(partner_id).await?;
        self.transactions
            .list_transactions(partner_id, limit, cursor)
            .await
    }

    /// One page of stale PENDING transactions for the sweeper.
    pub async fn stale_pending_page(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
        page_size: i64,
        page: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        self.transactions
            .find_stale_pending(cutoff, page_size, page)
            .await
    }

    /// Force a transaction out of the PENDING backlog after a failed
    /// reconciliation attempt. Single-writer-wins like any other transition.
    pub async fn force_fail(&self, id: Uuid) -> Result<Transaction, AppError> {
        let failed = self
            .transactions
            .mark_status(id, TransactionStatus::Failed)
            .await?;
        if let Some(notifier) = &self.notifier {
            if failed.status == TransactionStatus::Failed {
                notifier.notify(&failed);
            }
        }
        Ok(failed)
    }

    /// Perform health check on the durable store.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let database = match self.transactions.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        HealthResponse::new(database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::notifier::DispatcherConfig;
    use crate::test_utils::{
        MockBalanceStore, MockPartnerStore, MockPublisher, MockTransactionStore, NoopBalanceCache,
    };

    fn service() -> (CreditService, Uuid, Arc<MockBalanceStore>, Arc<MockTransactionStore>) {
        let partners = Arc::new(MockPartnerStore::new());
        let partner_id = partners.seed_partner("Acme", "acme@example.com");
        let transactions = Arc::new(MockTransactionStore::new());
        let balances = Arc::new(MockBalanceStore::new());
        let svc = CreditService::new(
            Arc::clone(&partners) as _,
            Arc::clone(&transactions) as _,
            Arc::clone(&balances) as _,
            Arc::new(NoopBalanceCache),
        );
        (svc, partner_id, balances, transactions)
    }

    #[tokio::test]
    async fn test_credit_completes_and_updates_balance() {
        let (svc, partner_id, balances, _) = service();

        let tx = svc
            .create_and_process_transaction(
                partner_id,
                TransactionKind::Credit,
                Decimal::new(10000, 2),
                "Top-up".to_string(),
                "k1".to_string(),
            )
            .await
            .unwrap();

        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(balances.find(partner_id).unwrap().balance, Decimal::new(10000, 2));
    }

    #[tokio::test]
    async fn test_debit_with_insufficient_balance_fails_without_error() {
        let (svc, partner_id, balances, _) = service();
        balances.seed(partner_id, Decimal::new(1000, 2));

        let tx = svc
            .create_and_process_transaction(
                partner_id,
                TransactionKind::Debit,
                Decimal::new(5000, 2),
                "Usage".to_string(),
                "k3".to_string(),
            )
            .await
            .unwrap();

        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(balances.find(partner_id).unwrap().balance, Decimal::new(1000, 2));
    }

    #[tokio::test]
    async fn test_idempotent_admission_returns_original() {
        let (svc, partner_id, balances, _) = service();

        let first = svc
            .create_and_process_transaction(
                partner_id,
                TransactionKind::Credit,
                Decimal::new(10000, 2),
                "Top-up".to_string(),
                "k1".to_string(),
            )
            .await
            .unwrap();

        let repeat = svc
            .create_and_process_transaction(
                partner_id,
                TransactionKind::Credit,
                Decimal::new(10000, 2),
                "Top-up".to_string(),
                "k1".to_string(),
            )
            .await
            .unwrap();

        assert_eq!(first.id, repeat.id);
        // Balance mutated exactly once for the key
        assert_eq!(balances.find(partner_id).unwrap().balance, Decimal::new(10000, 2));
    }

    #[tokio::test]
    async fn test_pending_duplicate_is_returned_without_reprocessing() {
        let (svc, partner_id, balances, transactions) = service();

        // An earlier attempt that was admitted but never finished
        let stuck = Transaction::new(
            partner_id,
            TransactionKind::Credit,
            Decimal::new(10000, 2),
            "Top-up".to_string(),
            "k1".to_string(),
        );
        transactions.insert(stuck.clone());

        let repeat = svc
            .create_and_process_transaction(
                partner_id,
                TransactionKind::Credit,
                Decimal::new(10000, 2),
                "Top-up".to_string(),
                "k1".to_string(),
            )
            .await
            .unwrap();

        // Returned unchanged; recovery belongs to the sweeper
        assert_eq!(repeat.id, stuck.id);
        assert_eq!(repeat.status, TransactionStatus::Pending);
        assert!(balances.find(partner_id).is_none());
    }

    #[tokio::test]
    async fn test_unknown_partner_is_rejected_before_any_mutation() {
        let (svc, _, balances, transactions) = service();
        let unknown = Uuid::new_v4();

        let err = svc
            .create_and_process_transaction(
                unknown,
                TransactionKind::Credit,
                Decimal::ONE,
                "Top-up".to_string(),
                "k1".to_string(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Database(crate::domain::DatabaseError::NotFound(_))
        ));
        assert!(balances.find(unknown).is_none());
        assert!(transactions.all().is_empty());
    }

    #[tokio::test]
    async fn test_process_is_a_noop_on_terminal_transactions() {
        let (svc, partner_id, balances, _) = service();

        let mut tx = Transaction::new(
            partner_id,
            TransactionKind::Credit,
            Decimal::new(10000, 2),
            "Top-up".to_string(),
            "k9".to_string(),
        );
        tx.status = TransactionStatus::Completed;

        let result = svc.process(tx.clone()).await.unwrap();
        assert_eq!(result, tx);
        assert!(balances.find(partner_id).is_none());
    }

    #[tokio::test]
    async fn test_notification_fires_after_processing() {
        let partners = Arc::new(MockPartnerStore::new());
        let partner_id = partners.seed_partner("Acme", "acme@example.com");
        let transactions = Arc::new(MockTransactionStore::new());
        let balances = Arc::new(MockBalanceStore::new());
        let publisher = Arc::new(MockPublisher::new());
        let (dispatcher, handle) =
            NotificationDispatcher::spawn(Arc::clone(&publisher) as _, DispatcherConfig::default());

        let svc = CreditService::new(
            partners as _,
            transactions as _,
            balances as _,
            Arc::new(NoopBalanceCache),
        )
        .with_notifier(Arc::new(dispatcher));

        let tx = svc
            .create_and_process_transaction(
                partner_id,
                TransactionKind::Credit,
                Decimal::new(10000, 2),
                "Top-up".to_string(),
                "k1".to_string(),
            )
            .await
            .unwrap();

        // Drop the service (and its dispatcher) so the sender task drains.
        drop(svc);
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1, tx.id.to_string());
        assert_eq!(published[0].2["status"], "completed");
    }

    #[tokio::test]
    async fn test_infrastructure_failure_leaves_transaction_pending() {
        let partners = Arc::new(MockPartnerStore::new());
        let partner_id = partners.seed_partner("Acme", "acme@example.com");
        let transactions = Arc::new(MockTransactionStore::new());
        let balances = Arc::new(MockBalanceStore::new());
        balances.fail_cas_with_query_error(true);

        let svc = CreditService::new(
            partners as _,
            Arc::clone(&transactions) as _,
            balances as _,
            Arc::new(NoopBalanceCache),
        );

        let err = svc
            .create_and_process_transaction(
                partner_id,
                TransactionKind::Credit,
                Decimal::new(10000, 2),
                "Top-up".to_string(),
                "k1".to_string(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(_)));

        // Admitted but never finalized: the sweeper will pick it up.
        let stored = transactions.all();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, TransactionStatus::Pending);
    }
}
