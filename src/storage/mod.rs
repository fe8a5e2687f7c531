//! Storage module for chain persistence
//!
//! The ledger core only depends on the [`BlockStore`] contract; the file and
//! in-memory implementations are interchangeable.

pub mod memory;
pub mod persistence;

pub use memory::MemoryStore;
pub use persistence::{read_json, write_json_atomic, FileStore, StorageError};

use crate::core::{Block, Transaction};
use std::collections::HashMap;

/// Block and mempool persistence keyed by height
pub trait BlockStore: Send + Sync {
    /// Write a block under its height, replacing any previous file
    fn save_block(&mut self, block: &Block) -> Result<(), StorageError>;

    /// Read the block at `height`, if stored
    fn load_block(&self, height: u64) -> Result<Option<Block>, StorageError>;

    /// Every stored height, ascending
    fn list_heights(&self) -> Result<Vec<u64>, StorageError>;

    /// Delete every stored block
    fn clear_blocks(&mut self) -> Result<(), StorageError>;

    fn save_mempool(&mut self, entries: &HashMap<String, Transaction>) -> Result<(), StorageError>;

    /// Stored mempool snapshot; empty when none was saved
    fn load_mempool(&self) -> Result<HashMap<String, Transaction>, StorageError>;

    /// All stored blocks in height order
    fn load_blocks(&self) -> Result<Vec<Block>, StorageError> {
        let mut blocks = Vec::new();
        for height in self.list_heights()? {
            let block = self.load_block(height)?.ok_or_else(|| {
                StorageError::InvalidData(format!("block {} listed but missing", height))
            })?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    /// The block at the highest stored height
    fn tip(&self) -> Result<Option<Block>, StorageError> {
        match self.list_heights()?.last() {
            Some(&height) => self.load_block(height),
            None => Ok(None),
        }
    }
}
