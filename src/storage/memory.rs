//! In-memory block store

use crate::core::{Block, Transaction};
use crate::storage::{BlockStore, StorageError};
use std::collections::{BTreeMap, HashMap};

/// Block store that keeps everything in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blocks: BTreeMap<u64, Block>,
    mempool: HashMap<String, Transaction>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for MemoryStore {
    fn save_block(&mut self, block: &Block) -> Result<(), StorageError> {
        self.blocks.insert(block.height(), block.clone());
        Ok(())
    }

    fn load_block(&self, height: u64) -> Result<Option<Block>, StorageError> {
        Ok(self.blocks.get(&height).cloned())
    }

    fn list_heights(&self) -> Result<Vec<u64>, StorageError> {
        Ok(self.blocks.keys().copied().collect())
    }

    fn clear_blocks(&mut self) -> Result<(), StorageError> {
        self.blocks.clear();
        Ok(())
    }

    fn save_mempool(&mut self, entries: &HashMap<String, Transaction>) -> Result<(), StorageError> {
        self.mempool = entries.clone();
        Ok(())
    }

    fn load_mempool(&self) -> Result<HashMap<String, Transaction>, StorageError> {
        Ok(self.mempool.clone())
    }
}
