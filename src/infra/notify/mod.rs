//! Outbound notification transport.

pub mod webhook;

pub use webhook::{WebhookConfig, WebhookPublisher};
