//! Periodic reconciliation of transactions stuck in PENDING.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use super::service::CreditService;

/// Sweeper configuration
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub enabled: bool,
    /// Time between sweep runs
    pub interval: Duration,
    /// A PENDING transaction older than this is considered stuck
    pub stale_after: Duration,
    /// Transactions fetched per page
    pub page_size: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            stale_after: Duration::from_secs(300),
            page_size: 100,
        }
    }
}

/// Outcome counters for one sweep run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Stale PENDING transactions examined
    pub scanned: usize,
    /// Re-driven to a terminal status by normal processing
    pub reprocessed: usize,
    /// Forced to FAILED after an unexpected processing error
    pub forced_failed: usize,
}

/// Re-drives transactions that never reached a terminal state.
///
/// Runs on a fixed period, concurrently with request-path workers. Relies on
/// the single-writer-wins status transition for safety when both paths pick
/// up the same transaction.
pub struct ReconciliationSweeper {
    service: Arc<CreditService>,
    config: SweeperConfig,
}

impl ReconciliationSweeper {
    #[must_use]
    pub fn new(service: Arc<CreditService>, config: SweeperConfig) -> Self {
        Self { service, config }
    }

    /// Run the periodic loop until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            "Reconciliation sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = self.sweep(&shutdown).await;
                    if stats.scanned > 0 {
                        info!(
                            scanned = stats.scanned,
                            reprocessed = stats.reprocessed,
                            forced_failed = stats.forced_failed,
                            "Sweep run completed"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconciliation sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One sweep over all stale PENDING transactions, in pages.
    ///
    /// Pagination is best-effort: rows leave the PENDING set as they are
    /// processed, so the pending population may shift between pages. Anything
    /// missed is picked up by the next run. The shutdown signal is checked
    /// between pages so a large backlog cannot pin a terminating process.
    #[instrument(skip(self, shutdown))]
    pub async fn sweep(&self, shutdown: &watch::Receiver<bool>) -> SweepStats {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let mut stats = SweepStats::default();
        let mut page = 0;

        loop {
            if *shutdown.borrow() {
                warn!(page = page, "Sweep interrupted by shutdown");
                break;
            }

            let batch = match self
                .service
                .stale_pending_page(cutoff, self.config.page_size, page)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, page = page, "Failed to fetch stale transactions, aborting run");
                    break;
                }
            };
            let batch_len = batch.len();

            for transaction in batch {
                let id = transaction.id;
                stats.scanned += 1;
                info!(transaction_id = %id, "Reconciling stuck transaction");

                match self.service.process(transaction).await {
                    Ok(_) => stats.reprocessed += 1,
                    Err(e) => {
                        // One attempt per sweep cycle: anything that still
                        // errors here is forced out of the backlog.
                        error!(
                            transaction_id = %id,
                            error = %e,
                            "Reconciliation failed, forcing transaction to failed"
                        );
                        match self.service.force_fail(id).await {
                            Ok(_) => stats.forced_failed += 1,
                            Err(force_err) => {
                                error!(
                                    transaction_id = %id,
                                    error = %force_err,
                                    "Could not force-fail transaction, leaving for next sweep"
                                );
                            }
                        }
                    }
                }
            }

            if (batch_len as i64) < self.config.page_size {
                break;
            }
            page += 1;
        }

        stats
    }
}

/// Spawn the sweeper on the runtime and return a shutdown sender.
pub fn spawn_sweeper(
    service: Arc<CreditService>,
    config: SweeperConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = ReconciliationSweeper::new(service, config);
    let handle = tokio::spawn(async move {
        sweeper.run(shutdown_rx).await;
    });
    (handle, shutdown_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Transaction, TransactionKind, TransactionStatus};
    use crate::test_utils::{
        MockBalanceStore, MockPartnerStore, MockTransactionStore, NoopBalanceCache,
    };
    use rust_decimal::Decimal;

    fn stale_pending(partner_id: uuid::Uuid, key: &str, amount: Decimal) -> Transaction {
        let mut tx = Transaction::new(
            partner_id,
            TransactionKind::Credit,
            amount,
            "Stuck".to_string(),
            key.to_string(),
        );
        tx.created_at = Utc::now() - chrono::Duration::minutes(30);
        tx
    }

    fn sweeper_with(
        config: SweeperConfig,
    ) -> (
        ReconciliationSweeper,
        uuid::Uuid,
        Arc<MockTransactionStore>,
        Arc<MockBalanceStore>,
    ) {
        let partners = Arc::new(MockPartnerStore::new());
        let partner_id = partners.seed_partner("Acme", "acme@example.com");
        let transactions = Arc::new(MockTransactionStore::new());
        let balances = Arc::new(MockBalanceStore::new());
        let service = Arc::new(CreditService::new(
            partners as _,
            Arc::clone(&transactions) as _,
            Arc::clone(&balances) as _,
            Arc::new(NoopBalanceCache),
        ));
        (
            ReconciliationSweeper::new(service, config),
            partner_id,
            transactions,
            balances,
        )
    }

    #[tokio::test]
    async fn test_sweep_reprocesses_stale_pending_transactions() {
        let (sweeper, partner_id, transactions, balances) =
            sweeper_with(SweeperConfig::default());
        transactions.insert(stale_pending(partner_id, "k1", Decimal::new(10000, 2)));
        transactions.insert(stale_pending(partner_id, "k2", Decimal::new(500, 2)));

        let (_tx, rx) = watch::channel(false);
        let stats = sweeper.sweep(&rx).await;

        assert_eq!(stats.scanned, 2);
        assert_eq!(stats.reprocessed, 2);
        assert_eq!(stats.forced_failed, 0);
        assert_eq!(balances.find(partner_id).unwrap().balance, Decimal::new(10500, 2));
        assert!(transactions.all().iter().all(Transaction::is_terminal));
    }

    #[tokio::test]
    async fn test_sweep_skips_recent_and_terminal_transactions() {
        let (sweeper, partner_id, transactions, _) = sweeper_with(SweeperConfig::default());

        // Fresh PENDING transaction, inside the staleness window
        transactions.insert(Transaction::new(
            partner_id,
            TransactionKind::Credit,
            Decimal::ONE,
            "Fresh".to_string(),
            "fresh".to_string(),
        ));
        // Already terminal
        let mut done = stale_pending(partner_id, "done", Decimal::ONE);
        done.status = TransactionStatus::Completed;
        transactions.insert(done);

        let (_tx, rx) = watch::channel(false);
        let stats = sweeper.sweep(&rx).await;

        assert_eq!(stats, SweepStats::default());
    }

    #[tokio::test]
    async fn test_sweep_forces_failed_on_unexpected_error() {
        let (sweeper, partner_id, transactions, balances) =
            sweeper_with(SweeperConfig::default());
        transactions.insert(stale_pending(partner_id, "k1", Decimal::new(10000, 2)));
        balances.fail_cas_with_query_error(true);

        let (_tx, rx) = watch::channel(false);
        let stats = sweeper.sweep(&rx).await;

        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.forced_failed, 1);
        let stored = transactions.all();
        assert_eq!(stored[0].status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_sweep_pages_through_large_backlogs() {
        let config = SweeperConfig {
            page_size: 2,
            ..SweeperConfig::default()
        };
        let (sweeper, partner_id, transactions, _) = sweeper_with(config);
        for i in 0..5 {
            transactions.insert(stale_pending(
                partner_id,
                &format!("k{}", i),
                Decimal::new(100, 2),
            ));
        }

        let (_tx, rx) = watch::channel(false);
        let stats = sweeper.sweep(&rx).await;

        // Every stale transaction eventually leaves PENDING, across runs if
        // rows shift between pages within one run.
        let mut total = stats.reprocessed;
        while transactions
            .all()
            .iter()
            .any(|t| t.status == TransactionStatus::Pending)
        {
            total += sweeper.sweep(&rx).await.reprocessed;
        }
        assert_eq!(total, 5);
        assert!(transactions.all().iter().all(Transaction::is_terminal));
    }

    #[tokio::test]
    async fn test_rerunning_sweep_on_terminal_backlog_is_a_noop() {
        let (sweeper, partner_id, transactions, balances) =
            sweeper_with(SweeperConfig::default());
        transactions.insert(stale_pending(partner_id, "k1", Decimal::new(10000, 2)));

        let (_tx, rx) = watch::channel(false);
        sweeper.sweep(&rx).await;
        let balance_after_first = balances.find(partner_id).unwrap();

        let stats = sweeper.sweep(&rx).await;
        assert_eq!(stats, SweepStats::default());
        assert_eq!(balances.find(partner_id).unwrap(), balance_after_first);
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_paging() {
        let config = SweeperConfig {
            page_size: 1,
            ..SweeperConfig::default()
        };
        let (sweeper, partner_id, transactions, _) = sweeper_with(config);
        for i in 0..3 {
            transactions.insert(stale_pending(
                partner_id,
                &format!("k{}", i),
                Decimal::new(100, 2),
            ));
        }

        let (tx, rx) = watch::channel(true);
        let stats = sweeper.sweep(&rx).await;
        drop(tx);

        assert_eq!(stats.scanned, 0);
    }
}
