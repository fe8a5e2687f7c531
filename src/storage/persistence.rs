//! JSON file persistence for blocks and the mempool
//!
//! Layout under the data directory, one subtree per node:
//!
//! ```text
//! <data_dir>/<node_id>/blocks/<height>.json
//! <data_dir>/<node_id>/txpool/pool.json
//! ```
//!
//! Every write goes to a temporary file first and is renamed into place, so
//! a reader never sees a partially written block.

use crate::core::{Block, Transaction};
use crate::storage::BlockStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const BLOCKS_DIR: &str = "blocks";
const TXPOOL_DIR: &str = "txpool";
const TXPOOL_FILE: &str = "pool.json";

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// On-disk shape of the mempool snapshot
#[derive(Debug, Default, Serialize, Deserialize)]
struct PoolFile {
    #[serde(default)]
    entries: HashMap<String, Transaction>,
}

/// Block store backed by one JSON file per height
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    blocks_dir: PathBuf,
    pool_dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) the subtree of `node_id` under `data_dir`
    pub fn new(data_dir: impl AsRef<Path>, node_id: &str) -> Result<Self, StorageError> {
        if node_id.is_empty() {
            return Err(StorageError::InvalidData("node id is required".to_string()));
        }

        let root = data_dir.as_ref().join(node_id);
        let blocks_dir = root.join(BLOCKS_DIR);
        let pool_dir = root.join(TXPOOL_DIR);
        fs::create_dir_all(&blocks_dir)?;
        fs::create_dir_all(&pool_dir)?;

        Ok(Self {
            root,
            blocks_dir,
            pool_dir,
        })
    }

    /// Directory holding this node's files
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn block_path(&self, height: u64) -> PathBuf {
        self.blocks_dir.join(format!("{}.json", height))
    }

    fn pool_path(&self) -> PathBuf {
        self.pool_dir.join(TXPOOL_FILE)
    }
}

impl BlockStore for FileStore {
    fn save_block(&mut self, block: &Block) -> Result<(), StorageError> {
        write_json_atomic(&self.block_path(block.height()), block)
    }

    fn load_block(&self, height: u64) -> Result<Option<Block>, StorageError> {
        read_json(&self.block_path(height))
    }

    fn list_heights(&self) -> Result<Vec<u64>, StorageError> {
        let mut heights = Vec::new();
        for entry in fs::read_dir(&self.blocks_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(height) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                heights.push(height);
            }
        }
        heights.sort_unstable();
        Ok(heights)
    }

    fn clear_blocks(&mut self) -> Result<(), StorageError> {
        for height in self.list_heights()? {
            fs::remove_file(self.block_path(height))?;
        }
        Ok(())
    }

    fn save_mempool(&mut self, entries: &HashMap<String, Transaction>) -> Result<(), StorageError> {
        let file = PoolFile {
            entries: entries.clone(),
        };
        write_json_atomic(&self.pool_path(), &file)
    }

    fn load_mempool(&self) -> Result<HashMap<String, Transaction>, StorageError> {
        let file: Option<PoolFile> = read_json(&self.pool_path())?;
        Ok(file.map(|f| f.entries).unwrap_or_default())
    }
}

/// Serialize to `<path>.tmp`, then rename over `path`
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let file = fs::File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    drop(writer);

    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Read a JSON file, `None` when it does not exist
pub fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, StorageError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let value = serde_json::from_reader(BufReader::new(file))?;
    Ok(Some(value))
}
