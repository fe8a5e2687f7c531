//! Transaction handling for the ledger
//!
//! Implements a UTXO-based transaction model with digital signatures.
//! A transaction has two digests over the same canonical encoding:
//! - the id, which covers the signatures
//! - the signing hash, which omits them and is what each input signs

use crate::crypto::hash::write_var_bytes;
use crate::crypto::{double_sha256, KeyError, KeyPair};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Non-coinbase transaction has no inputs")]
    NoInputs,
    #[error("Input {0} spends an output already spent by this transaction")]
    DuplicateInput(usize),
    #[error("Referenced output {tx_id}:{index} not found or already spent")]
    MissingUtxo { tx_id: String, index: u64 },
    #[error("Input {0}: public key does not match locking script")]
    ScriptMismatch(usize),
    #[error("Input {0}: signature invalid")]
    InvalidSignature(usize),
    #[error("Input {index}: {source}")]
    MalformedKey {
        index: usize,
        #[source]
        source: KeyError,
    },
    #[error("Output {0} has negative value")]
    NegativeOutput(usize),
    #[error("Inputs not enough: inputs {inputs}, outputs {outputs}")]
    InsufficientInputs { inputs: i128, outputs: i128 },
    #[error("Crypto error: {0}")]
    CryptoError(#[from] KeyError),
}

// =============================================================================
// Transaction Input
// =============================================================================

/// Transaction input (reference to a previous output)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxInput {
    /// Id of the transaction holding the spent output
    #[serde(with = "hex")]
    pub tx_id: Vec<u8>,
    /// Index of the output in that transaction
    pub output_index: u64,
    /// DER signature over the signing hash
    #[serde(with = "hex", default)]
    pub signature: Vec<u8>,
    /// 64-byte X‖Y public key of the spender
    #[serde(with = "hex", default)]
    pub public_key: Vec<u8>,
}

impl TxInput {
    /// Unsigned input spending `tx_id:output_index` with `public_key`
    pub fn new(tx_id: Vec<u8>, output_index: u64, public_key: Vec<u8>) -> Self {
        Self {
            tx_id,
            output_index,
            signature: Vec::new(),
            public_key,
        }
    }
}

// =============================================================================
// Transaction Output
// =============================================================================

/// Transaction output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxOutput {
    /// Amount; only non-negative values are spendable
    pub value: i64,
    /// Locking script: the hex-encoded public key of the recipient
    pub script_pubkey: String,
}

impl TxOutput {
    pub fn new(value: i64, script_pubkey: &str) -> Self {
        Self {
            value,
            script_pubkey: script_pubkey.to_string(),
        }
    }

    /// Check if this output is locked to the given address
    pub fn is_owned_by(&self, address: &str) -> bool {
        self.script_pubkey == address
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A ledger transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    /// Cached id; empty until computed
    #[serde(with = "hex", default)]
    pub id: Vec<u8>,
    #[serde(default)]
    pub inputs: Vec<TxInput>,
    #[serde(default)]
    pub outputs: Vec<TxOutput>,
    #[serde(default)]
    pub is_coinbase: bool,
}

impl Transaction {
    /// Create a regular transaction and compute its id
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            id: Vec::new(),
            inputs,
            outputs,
            is_coinbase: false,
        };
        tx.id = tx.compute_id();
        tx
    }

    /// Create a coinbase transaction minting `reward` to `recipient`
    pub fn coinbase(recipient: &str, reward: i64) -> Self {
        let mut tx = Self {
            id: Vec::new(),
            inputs: Vec::new(),
            outputs: vec![TxOutput::new(reward, recipient)],
            is_coinbase: true,
        };
        tx.id = tx.compute_id();
        tx
    }

    /// Canonical byte encoding.
    ///
    /// Layout: coinbase flag (1 byte); per input the length-prefixed
    /// referenced id, the 8-byte index, the length-prefixed signature when
    /// `include_signatures` is set and the length-prefixed public key; per
    /// output the 8-byte value followed by the raw script bytes. Integers are
    /// little-endian.
    pub fn encode(&self, include_signatures: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(u8::from(self.is_coinbase));

        for input in &self.inputs {
            write_var_bytes(&mut buf, &input.tx_id);
            buf.extend_from_slice(&input.output_index.to_le_bytes());
            if include_signatures {
                write_var_bytes(&mut buf, &input.signature);
            }
            write_var_bytes(&mut buf, &input.public_key);
        }

        for output in &self.outputs {
            buf.extend_from_slice(&output.value.to_le_bytes());
            buf.extend_from_slice(output.script_pubkey.as_bytes());
        }

        buf
    }

    /// Freshly computed id (ignores the cached field)
    pub fn compute_id(&self) -> Vec<u8> {
        double_sha256(&self.encode(true))
    }

    /// Hex form of the freshly computed id
    pub fn id_hex(&self) -> String {
        hex::encode(self.compute_id())
    }

    /// Digest over the encoding without signatures
    pub fn signing_hash(&self) -> Vec<u8> {
        double_sha256(&self.encode(false))
    }

    /// The cached id when present, otherwise a freshly computed one
    pub fn digest(&self) -> Vec<u8> {
        if self.id.is_empty() {
            self.compute_id()
        } else {
            self.id.clone()
        }
    }

    /// Fill the cached id if it is missing
    pub fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = self.compute_id();
        }
    }

    /// Sign every input with `key_pair` and refresh the id
    pub fn sign(&mut self, key_pair: &KeyPair) -> Result<(), TransactionError> {
        let signing_hash = self.signing_hash();
        let signature = key_pair.sign(&signing_hash)?;
        for input in &mut self.inputs {
            input.signature = signature.clone();
        }
        self.id = self.compute_id();
        Ok(())
    }

    /// Coinbase transactions have no inputs; everything else needs one
    pub fn check_structure(&self) -> Result<(), TransactionError> {
        if !self.is_coinbase && self.inputs.is_empty() {
            return Err(TransactionError::NoInputs);
        }
        Ok(())
    }

    /// Sum of output values
    pub fn total_output(&self) -> i128 {
        self.outputs.iter().map(|o| o.value as i128).sum()
    }
}
