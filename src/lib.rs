//! Partner credit engine.
//!
//! Maintains per-partner credit balances and a transaction ledger:
//! transactions are admitted idempotently on a caller-supplied key, balance
//! effects go through a bounded optimistic-concurrency retry loop, a periodic
//! sweeper recovers transactions stuck mid-flight, and terminal transactions
//! are handed to a best-effort notification dispatcher.

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
