//! Unspent transaction output set
//!
//! The set is derived state: it is rebuilt from stored blocks whenever it is
//! needed and never persisted on its own.

use crate::core::block::Block;
use crate::core::transaction::{Transaction, TransactionError, TxOutput};
use crate::crypto::verify_signature;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// An unspent output, addressable by (transaction id, output index)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Utxo {
    #[serde(with = "hex")]
    pub tx_id: Vec<u8>,
    pub index: u64,
    pub output: TxOutput,
}

/// Unspent outputs grouped by the hex id of the transaction that created them.
///
/// A group is a list rather than a map because identical transactions (for
/// instance two coinbases paying the same reward to the same script) share
/// an id; spending removes exactly one matching entry.
#[derive(Debug, Clone, Default)]
pub struct UtxoSet {
    entries: HashMap<String, Vec<Utxo>>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan blocks in order and apply every transaction
    pub fn build<'a>(blocks: impl IntoIterator<Item = &'a Block>) -> Self {
        let mut set = Self::new();
        for block in blocks {
            set.apply_block(block);
        }
        set
    }

    /// Apply a block's transactions in stored order
    pub fn apply_block(&mut self, block: &Block) {
        for tx in &block.transactions {
            self.apply_transaction(tx);
        }
    }

    /// Remove the outputs a transaction spends, then add the ones it creates
    pub fn apply_transaction(&mut self, tx: &Transaction) {
        if !tx.is_coinbase {
            for input in &tx.inputs {
                self.spend(&input.tx_id, input.output_index);
            }
        }

        let tx_id = tx.compute_id();
        for (index, output) in tx.outputs.iter().enumerate() {
            self.insert(Utxo {
                tx_id: tx_id.clone(),
                index: index as u64,
                output: output.clone(),
            });
        }
    }

    pub fn insert(&mut self, utxo: Utxo) {
        self.entries
            .entry(hex::encode(&utxo.tx_id))
            .or_default()
            .push(utxo);
    }

    /// Remove one entry matching `tx_id:index`, returning it
    pub fn spend(&mut self, tx_id: &[u8], index: u64) -> Option<Utxo> {
        let key = hex::encode(tx_id);
        let list = self.entries.get_mut(&key)?;
        let position = list
            .iter()
            .position(|u| u.tx_id == tx_id && u.index == index)?;
        let removed = list.remove(position);
        if list.is_empty() {
            self.entries.remove(&key);
        }
        Some(removed)
    }

    /// Find an unspent output by exact (id, index) match
    pub fn find(&self, tx_id: &[u8], index: u64) -> Option<&Utxo> {
        self.entries
            .get(&hex::encode(tx_id))?
            .iter()
            .find(|u| u.tx_id == tx_id && u.index == index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utxo> {
        self.entries.values().flatten()
    }

    /// Outputs locked to `address`
    pub fn utxos_for(&self, address: &str) -> Vec<Utxo> {
        self.iter()
            .filter(|u| u.output.is_owned_by(address))
            .cloned()
            .collect()
    }

    /// Sum of the values locked to `address`
    pub fn balance(&self, address: &str) -> i64 {
        self.iter()
            .filter(|u| u.output.is_owned_by(address))
            .fold(0i64, |acc, u| acc.saturating_add(u.output.value))
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Validate a transaction against an unspent set.
///
/// Coinbase transactions are always valid. Otherwise every input must
/// resolve to an unspent output locked to the input's public key and carry
/// a valid signature over the signing hash, and the inputs must cover the
/// outputs. A surplus is allowed and not credited anywhere.
pub fn validate_transaction(tx: &Transaction, utxos: &UtxoSet) -> Result<(), TransactionError> {
    if tx.is_coinbase {
        return Ok(());
    }
    tx.check_structure()?;

    let signing_hash = tx.signing_hash();
    let mut seen = HashSet::new();
    let mut input_sum: i128 = 0;

    for (index, input) in tx.inputs.iter().enumerate() {
        if !seen.insert((input.tx_id.as_slice(), input.output_index)) {
            return Err(TransactionError::DuplicateInput(index));
        }

        let utxo = utxos
            .find(&input.tx_id, input.output_index)
            .ok_or_else(|| TransactionError::MissingUtxo {
                tx_id: hex::encode(&input.tx_id),
                index: input.output_index,
            })?;

        if utxo.output.script_pubkey != hex::encode(&input.public_key) {
            return Err(TransactionError::ScriptMismatch(index));
        }

        match verify_signature(&input.public_key, &signing_hash, &input.signature) {
            Ok(true) => {}
            Ok(false) => return Err(TransactionError::InvalidSignature(index)),
            Err(source) => return Err(TransactionError::MalformedKey { index, source }),
        }

        input_sum += utxo.output.value as i128;
    }

    if let Some(index) = tx.outputs.iter().position(|o| o.value < 0) {
        return Err(TransactionError::NegativeOutput(index));
    }

    let output_sum = tx.total_output();
    if input_sum < output_sum {
        return Err(TransactionError::InsufficientInputs {
            inputs: input_sum,
            outputs: output_sum,
        });
    }

    Ok(())
}
