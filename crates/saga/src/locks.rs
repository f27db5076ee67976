//! Per-transaction mutual exclusion.
//!
//! Tokio dispatches bus fan-outs concurrently, so two handlers (or a
//! handler and a manual compensation) could otherwise interleave their
//! read-modify-write cycles on the same saga. Every choreography handler
//! and the manual compensation path take the transaction's lock before
//! touching the repository.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use common::TransactionId;

/// A mutex per transaction ID, created lazily on first use.
#[derive(Debug, Default)]
pub struct TransactionLocks {
    locks: Mutex<HashMap<TransactionId, Arc<Mutex<()>>>>,
}

impl TransactionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for one transaction, waiting if another task
    /// holds it. The guard must be dropped before publishing an event
    /// that a handler for the same transaction subscribes to.
    pub async fn acquire(&self, id: TransactionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }

    /// Drops the lock entry for a transaction that reached a terminal
    /// state. A later acquire simply recreates it.
    pub async fn release(&self, id: TransactionId) {
        self.locks.lock().await.remove(&id);
    }

    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }

    /// Drops every lock entry. Only sound while no saga is running.
    pub async fn clear(&self) {
        self.locks.lock().await.clear();
    }
}
