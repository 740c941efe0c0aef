//! Infrastructure layer implementations.

pub mod cache;
pub mod database;
pub mod notify;

pub use cache::{CacheConfig, InMemoryBalanceCache};
pub use database::{PostgresClient, PostgresConfig};
pub use notify::{WebhookConfig, WebhookPublisher};
