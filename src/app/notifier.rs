//! Fire-and-forget notification hand-off after transaction processing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::domain::{NotificationPublisher, Transaction, TransactionNotification};

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Destination topic for processed-transaction events
    pub topic: String,
    /// Bounded in-memory queue between the request path and the sender task
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            topic: "partner-credit.transactions".to_string(),
            queue_capacity: 256,
        }
    }
}

/// Hands terminal transactions to a publisher without blocking the caller.
///
/// `notify` enqueues and returns immediately; a spawned sender task drains
/// the queue and performs the actual publish. A full queue drops the event.
/// Publish failures are logged and counted, never retried or propagated.
pub struct NotificationDispatcher {
    sender: mpsc::Sender<Transaction>,
    dropped: Arc<AtomicU64>,
    publish_failures: Arc<AtomicU64>,
}

impl NotificationDispatcher {
    /// Spawn the sender task and return the dispatcher handle.
    pub fn spawn(
        publisher: Arc<dyn NotificationPublisher>,
        config: DispatcherConfig,
    ) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<Transaction>(config.queue_capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let publish_failures = Arc::new(AtomicU64::new(0));

        let failures = Arc::clone(&publish_failures);
        let topic = config.topic.clone();
        let handle = tokio::spawn(async move {
            while let Some(transaction) = receiver.recv().await {
                let event = TransactionNotification::from(&transaction);
                let payload = match serde_json::to_value(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        failures.fetch_add(1, Ordering::Relaxed);
                        error!(
                            transaction_id = %transaction.id,
                            error = %e,
                            "Failed to serialize notification payload"
                        );
                        continue;
                    }
                };

                match publisher
                    .publish(&topic, &transaction.id.to_string(), &payload)
                    .await
                {
                    Ok(()) => {
                        info!(
                            transaction_id = %transaction.id,
                            "Notification sent for transaction"
                        );
                    }
                    Err(e) => {
                        failures.fetch_add(1, Ordering::Relaxed);
                        error!(
                            transaction_id = %transaction.id,
                            error = %e,
                            "Failed to send notification for transaction"
                        );
                    }
                }
            }
        });

        (
            Self {
                sender,
                dropped,
                publish_failures,
            },
            handle,
        )
    }

    /// Enqueue a processed transaction for publication. Never blocks.
    pub fn notify(&self, transaction: &Transaction) {
        match self.sender.try_send(transaction.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    transaction_id = %transaction.id,
                    "Notification queue full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    transaction_id = %transaction.id,
                    "Notification sender task stopped, dropping event"
                );
            }
        }
    }

    /// Events discarded because the queue was full or closed.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Publishes that failed at the transport.
    #[must_use]
    pub fn publish_failure_count(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TransactionKind, TransactionStatus};
    use crate::test_utils::MockPublisher;
    use rust_decimal::Decimal;
    use std::time::Duration;
    use uuid::Uuid;

    fn completed_transaction() -> Transaction {
        let mut tx = Transaction::new(
            Uuid::new_v4(),
            TransactionKind::Credit,
            Decimal::new(10000, 2),
            "Top-up".to_string(),
            "key-1".to_string(),
        );
        tx.status = TransactionStatus::Completed;
        tx
    }

    async fn drain(handle: JoinHandle<()>, dispatcher: NotificationDispatcher) {
        drop(dispatcher);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sender task did not drain")
            .unwrap();
    }

    #[tokio::test]
    async fn test_notify_publishes_terminal_transaction() {
        let publisher = Arc::new(MockPublisher::new());
        let (dispatcher, handle) =
            NotificationDispatcher::spawn(Arc::clone(&publisher) as _, DispatcherConfig::default());

        let tx = completed_transaction();
        dispatcher.notify(&tx);
        drain(handle, dispatcher).await;

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        let (topic, key, payload) = &published[0];
        assert_eq!(topic, "partner-credit.transactions");
        assert_eq!(key, &tx.id.to_string());
        assert_eq!(payload["status"], "completed");
        assert_eq!(payload["transaction_id"], tx.id.to_string());
    }

    #[tokio::test]
    async fn test_publish_failures_are_counted_not_propagated() {
        let publisher = Arc::new(MockPublisher::failing("broker down"));
        let (dispatcher, handle) =
            NotificationDispatcher::spawn(Arc::clone(&publisher) as _, DispatcherConfig::default());

        dispatcher.notify(&completed_transaction());
        dispatcher.notify(&completed_transaction());

        // Give the sender task a chance to process both before we drain.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.publish_failure_count(), 2);
        drain(handle, dispatcher).await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let publisher = Arc::new(MockPublisher::blocking());
        let config = DispatcherConfig {
            queue_capacity: 1,
            ..DispatcherConfig::default()
        };
        let (dispatcher, handle) =
            NotificationDispatcher::spawn(Arc::clone(&publisher) as _, config);

        // First notify may be picked up by the sender task; flood enough
        // events that the single-slot queue must overflow.
        for _ in 0..8 {
            dispatcher.notify(&completed_transaction());
        }
        assert!(dispatcher.dropped_count() > 0);

        publisher.release();
        drain(handle, dispatcher).await;
    }
}
