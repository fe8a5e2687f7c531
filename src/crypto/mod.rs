//! Cryptographic utilities for the ledger
//!
//! This module provides:
//! - SHA-256 and double SHA-256 hashing
//! - ECDSA key management (secp256k1)
//! - Merkle root calculation

pub mod hash;
pub mod keys;
pub mod merkle;

pub use hash::{double_sha256, double_sha256_hex, sha256};
pub use keys::{
    encode_public_key, public_key_from_bytes, sign_message, verify_signature, KeyError, KeyPair,
    PUBLIC_KEY_LEN,
};
pub use merkle::calculate_merkle_root;
