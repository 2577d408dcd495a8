//! Concurrent result table written by block workers.
//!
//! Workers finish in arbitrary order and record their result under the
//! transaction's [`TxKey`]. The store gives no ordering guarantee; the
//! reconciler restores block order afterwards.

use crate::types::{TxKey, TxResult};
use dashmap::DashMap;

/// Key → result table shared by the workers of one block.
///
/// Backed by a sharded map, so writers for different transactions rarely
/// contend. An insert replaces the whole entry under the shard lock, which
/// means a reader never observes a half-written result.
#[derive(Debug, Default)]
pub struct ResultStore {
    results: DashMap<TxKey, TxResult>,
}

impl ResultStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self { results: DashMap::new() }
    }

    /// Creates an empty store sized for a block of `capacity` transactions.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { results: DashMap::with_capacity(capacity) }
    }

    /// Inserts or overwrites the result for `key`.
    ///
    /// Overwrites are only expected from a retry of the same transaction.
    pub fn set(&self, key: TxKey, result: TxResult) {
        if self.results.insert(key, result).is_some() {
            tracing::trace!(target: "block_reconciler::store", %key, "overwrote result");
        }
    }

    /// Returns a copy of the result recorded for `key`.
    pub fn get(&self, key: &TxKey) -> Option<TxResult> {
        self.results.get(key).map(|entry| entry.value().clone())
    }

    /// Returns true if a result was recorded for `key`.
    pub fn contains(&self, key: &TxKey) -> bool {
        self.results.contains_key(key)
    }

    /// Number of recorded results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Drops every result, readying the store for the next block.
    pub fn clear(&self) {
        self.results.clear();
    }
}
