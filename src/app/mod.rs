//! Application layer containing the credit engine and shared state.

pub mod notifier;
pub mod retry;
pub mod service;
pub mod state;
pub mod sweeper;

pub use notifier::{DispatcherConfig, NotificationDispatcher};
pub use retry::{ConcurrencyRetryExecutor, DEFAULT_MAX_ATTEMPTS};
pub use service::CreditService;
pub use state::AppState;
pub use sweeper::{ReconciliationSweeper, SweepStats, SweeperConfig, spawn_sweeper};
