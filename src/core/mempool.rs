//! Transaction pool (mempool) for pending transactions
//!
//! Entries are keyed by an opaque string id, normally the hex transaction id.
//! Inserting under an existing id overwrites the previous entry.

use crate::core::transaction::{Transaction, TransactionError};
use crate::storage::StorageError;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Mempool errors
#[derive(Error, Debug)]
pub enum MempoolError {
    #[error("Transaction validation error: {0}")]
    ValidationError(#[from] TransactionError),
    #[error("Coinbase transactions cannot be submitted")]
    CoinbaseRejected,
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Pending transactions awaiting inclusion in a block
#[derive(Debug, Clone, Default)]
pub struct Mempool {
    entries: HashMap<String, Transaction>,
}

impl Mempool {
    /// Create an empty mempool
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing snapshot
    pub fn from_entries(entries: HashMap<String, Transaction>) -> Self {
        Self { entries }
    }

    /// Insert under `id`, returning any entry it replaced
    pub fn insert(&mut self, id: String, tx: Transaction) -> Option<Transaction> {
        self.entries.insert(id, tx)
    }

    pub fn remove(&mut self, id: &str) -> Option<Transaction> {
        self.entries.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Transaction> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Replace every entry with `entries`
    pub fn replace(&mut self, entries: HashMap<String, Transaction>) {
        self.entries = entries;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop entries included in `transactions`.
    ///
    /// An entry goes when its own computed id matches an included
    /// transaction's id, or when its key is that id in hex. Returns how many
    /// entries were removed.
    pub fn prune(&mut self, transactions: &[Transaction]) -> usize {
        let included: HashSet<String> = transactions.iter().map(Transaction::id_hex).collect();
        let before = self.entries.len();
        self.entries
            .retain(|key, tx| !included.contains(key) && !included.contains(&tx.id_hex()));
        before - self.entries.len()
    }

    /// Copy of all entries
    pub fn snapshot(&self) -> HashMap<String, Transaction> {
        self.entries.clone()
    }

    /// Borrow all entries
    pub fn entries(&self) -> &HashMap<String, Transaction> {
        &self.entries
    }

    /// Transactions in a stable order (sorted by key)
    pub fn transactions(&self) -> Vec<Transaction> {
        let mut keyed: Vec<(&String, &Transaction)> = self.entries.iter().collect();
        keyed.sort_by(|a, b| a.0.cmp(b.0));
        keyed.into_iter().map(|(_, tx)| tx.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
