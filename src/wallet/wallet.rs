//! Wallet implementation
//!
//! A wallet is a single key pair persisted as `{"private_hex": ...}`. Its
//! address is the hex of the 64-byte public key, which is also the locking
//! script of every output it owns.

use crate::core::{Transaction, TransactionError, TxInput, TxOutput, Utxo, UtxoSet};
use crate::crypto::{KeyError, KeyPair};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Wallet file name inside a node's data directory
pub const WALLET_FILE: &str = "wallet.json";

/// Wallet-related errors
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Value must be positive, got {0}")]
    InvalidValue(i64),
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: i128, need: i64 },
    #[error("Wallet file {0} has no private key")]
    MissingKey(PathBuf),
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] KeyError),
}

/// On-disk wallet format
#[derive(Debug, Default, Serialize, Deserialize)]
struct WalletData {
    #[serde(default)]
    private_hex: String,
}

/// A single-key wallet
pub struct Wallet {
    key_pair: KeyPair,
}

impl Wallet {
    /// Create a new wallet with a fresh key pair
    pub fn new() -> Self {
        Self {
            key_pair: KeyPair::generate(),
        }
    }

    /// Import a wallet from a private key
    pub fn from_private_key(private_key_hex: &str) -> Result<Self, WalletError> {
        let key_pair = KeyPair::from_private_key_hex(private_key_hex)?;
        Ok(Self { key_pair })
    }

    /// Default wallet location for a node
    pub fn default_path(data_dir: &Path, node_id: &str) -> PathBuf {
        data_dir.join(node_id).join(WALLET_FILE)
    }

    pub fn address(&self) -> String {
        self.key_pair.address()
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.key_pair.public_key_bytes()
    }

    /// Get the wallet's private key (hex)
    /// WARNING: Keep this secret!
    pub fn private_key(&self) -> String {
        self.key_pair.private_key_hex()
    }

    /// Save wallet to file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = WalletData {
            private_hex: self.private_key(),
        };
        fs::write(path, serde_json::to_string_pretty(&data)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Load wallet from file
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let json = fs::read_to_string(path)?;
        let data: WalletData = serde_json::from_str(&json)?;
        if data.private_hex.is_empty() {
            return Err(WalletError::MissingKey(path.to_path_buf()));
        }
        Self::from_private_key(&data.private_hex)
    }

    /// Load the wallet at `path`, or create and save a new one if absent
    pub fn load_or_create(path: &Path) -> Result<Self, WalletError> {
        match Self::load(path) {
            Err(WalletError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let wallet = Self::new();
                wallet.save(path)?;
                log::info!("Created wallet {} at {}", wallet.address(), path.display());
                Ok(wallet)
            }
            other => other,
        }
    }

    /// Build a signed transfer of `value` to `to`.
    ///
    /// Owned outputs are taken in (id, index) order until they cover
    /// `value`; any surplus comes back to this wallet as a second output.
    pub fn build_transfer(
        &self,
        utxos: &UtxoSet,
        to: &str,
        value: i64,
    ) -> Result<Transaction, WalletError> {
        if value <= 0 {
            return Err(WalletError::InvalidValue(value));
        }

        let address = self.address();
        let mut owned: Vec<Utxo> = utxos.utxos_for(&address);
        owned.sort_by(|a, b| a.tx_id.cmp(&b.tx_id).then(a.index.cmp(&b.index)));

        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        let mut total: i128 = 0;
        for utxo in owned {
            if total >= i128::from(value) {
                break;
            }
            // identical transactions share an outpoint
            if !seen.insert((utxo.tx_id.clone(), utxo.index)) {
                continue;
            }
            total += i128::from(utxo.output.value);
            selected.push(utxo);
        }

        if total < i128::from(value) {
            return Err(WalletError::InsufficientFunds {
                have: total,
                need: value,
            });
        }

        let inputs = selected
            .into_iter()
            .map(|u| TxInput::new(u.tx_id, u.index, self.public_key()))
            .collect();
        let mut outputs = vec![TxOutput::new(value, to)];
        let change = total - i128::from(value);
        if change > 0 {
            let change = i64::try_from(change).map_err(|_| WalletError::InvalidValue(value))?;
            outputs.push(TxOutput::new(change, &address));
        }

        let mut tx = Transaction::new(inputs, outputs);
        tx.sign(&self.key_pair)?;
        Ok(tx)
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}
