//! Transaction boundaries around chunk writes.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::ItemError;

/// Handle of an open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transaction {
    id: u64,
}

impl Transaction {
    /// Creates a handle.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self { id }
    }

    /// The transaction id.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.id
    }
}

/// Begins, commits and rolls back the transaction wrapping each chunk.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Opens a transaction.
    async fn begin(&self) -> Result<Transaction, ItemError>;

    /// Commits a transaction.
    async fn commit(&self, transaction: Transaction) -> Result<(), ItemError>;

    /// Rolls a transaction back.
    async fn rollback(&self, transaction: Transaction) -> Result<(), ItemError>;
}

/// Transaction manager for writers without transactional resources.
///
/// Only counts boundaries.
#[derive(Debug, Default)]
pub struct ResourcelessTransactionManager {
    next_id: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl ResourcelessTransactionManager {
    /// Creates the manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Commits so far.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Rollbacks so far.
    #[must_use]
    pub fn rollback_count(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionManager for ResourcelessTransactionManager {
    async fn begin(&self) -> Result<Transaction, ItemError> {
        Ok(Transaction::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn commit(&self, _transaction: Transaction) -> Result<(), ItemError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self, _transaction: Transaction) -> Result<(), ItemError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resourceless_counts() {
        let tm = ResourcelessTransactionManager::new();
        let a = tm.begin().await.unwrap();
        let b = tm.begin().await.unwrap();
        assert_ne!(a.id(), b.id());
        tm.commit(a).await.unwrap();
        tm.rollback(b).await.unwrap();
        assert_eq!(tm.commit_count(), 1);
        assert_eq!(tm.rollback_count(), 1);
    }
}
