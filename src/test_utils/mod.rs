//! Test support: in-memory implementations of the store and publisher ports.

pub mod mocks;

pub use mocks::{
    MockBalanceStore, MockConfig, MockPartnerStore, MockPublisher, MockTransactionStore,
    NoopBalanceCache,
};
