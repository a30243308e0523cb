//! Execution ledger: durable record of instances, executions and contexts.
//!
//! [`LedgerStore`] is the storage contract; [`InMemoryLedgerStore`] is the
//! reference implementation. [`ExecutionLedger`] layers identity, restart and
//! stop semantics on top of any store.

mod repository;
mod store;

pub use repository::{ExecutionLedger, RestartRules};
pub use store::{InMemoryLedgerStore, LedgerStore};

#[cfg(test)]
pub use store::MockLedgerStore;

use std::sync::Arc;

/// Creates a ledger backed by a fresh in-memory store.
#[must_use]
pub fn in_memory_ledger() -> ExecutionLedger {
    ExecutionLedger::new(Arc::new(InMemoryLedgerStore::new()))
}
