//! Application state management.

use std::sync::Arc;

use crate::domain::{BalanceCache, BalanceStore, PartnerStore, TransactionStore};

use super::notifier::NotificationDispatcher;
use super::service::CreditService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CreditService>,
    pub partners: Arc<dyn PartnerStore>,
    pub transactions: Arc<dyn TransactionStore>,
    pub balances: Arc<dyn BalanceStore>,
    pub cache: Arc<dyn BalanceCache>,
}

impl AppState {
    /// Create a new application state
    #[must_use]
    pub fn new(
        partners: Arc<dyn PartnerStore>,
        transactions: Arc<dyn TransactionStore>,
        balances: Arc<dyn BalanceStore>,
        cache: Arc<dyn BalanceCache>,
    ) -> Self {
        let service = Arc::new(CreditService::new(
            Arc::clone(&partners),
            Arc::clone(&transactions),
            Arc::clone(&balances),
            Arc::clone(&cache),
        ));
        Self {
            service,
            partners,
            transactions,
            balances,
            cache,
        }
    }

    /// Attach a notification dispatcher (builder pattern).
    /// Rebuilds the service so processed transactions are handed off.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<NotificationDispatcher>) -> Self {
        self.service = Arc::new(
            CreditService::new(
                Arc::clone(&self.partners),
                Arc::clone(&self.transactions),
                Arc::clone(&self.balances),
                Arc::clone(&self.cache),
            )
            .with_notifier(notifier),
        );
        self
    }
}
