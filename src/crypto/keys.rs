//! ECDSA key management for the ledger
//!
//! Provides key pair generation, signing, and verification using the
//! secp256k1 elliptic curve. Public keys travel as the raw 64-byte point
//! (X‖Y, no SEC1 prefix) and signatures as DER.

use rand::rngs::OsRng;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

use super::hash::sha256;

/// Length of an encoded public key (X‖Y)
pub const PUBLIC_KEY_LEN: usize = 64;

/// SEC1 tag for an uncompressed point
const UNCOMPRESSED_TAG: u8 = 0x04;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature encoding")]
    InvalidSignature,
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key = SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// The 64-byte X‖Y encoding of the public key
    pub fn public_key_bytes(&self) -> Vec<u8> {
        encode_public_key(&self.public_key)
    }

    /// Address used in locking scripts: hex of the 64-byte public key
    pub fn address(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Sign a transaction signing hash (hashed once more before ECDSA)
    pub fn sign(&self, signing_hash: &[u8]) -> Result<Vec<u8>, KeyError> {
        sign_message(&self.secret_key, signing_hash)
    }

    /// Verify a signature against this key pair's public key
    pub fn verify(&self, signing_hash: &[u8], signature: &[u8]) -> Result<bool, KeyError> {
        verify_signature(&self.public_key_bytes(), signing_hash, signature)
    }
}

/// Strip the SEC1 tag from an uncompressed point
pub fn encode_public_key(public_key: &PublicKey) -> Vec<u8> {
    public_key.serialize_uncompressed()[1..].to_vec()
}

/// Parse a 64-byte X‖Y public key
pub fn public_key_from_bytes(bytes: &[u8]) -> Result<PublicKey, KeyError> {
    if bytes.len() != PUBLIC_KEY_LEN {
        return Err(KeyError::InvalidPublicKey);
    }
    let mut tagged = Vec::with_capacity(PUBLIC_KEY_LEN + 1);
    tagged.push(UNCOMPRESSED_TAG);
    tagged.extend_from_slice(bytes);
    PublicKey::from_slice(&tagged).map_err(|_| KeyError::InvalidPublicKey)
}

/// Sign `SHA-256(message)` with a secret key, returning a DER signature
pub fn sign_message(secret_key: &SecretKey, message: &[u8]) -> Result<Vec<u8>, KeyError> {
    let secp = Secp256k1::signing_only();
    let digest = Message::from_digest_slice(&sha256(message))?;
    let signature = secp.sign_ecdsa(&digest, secret_key);
    Ok(signature.serialize_der().to_vec())
}

/// Verify a DER signature over `SHA-256(message)`
///
/// Malformed keys or signatures are errors; a well-formed signature that
/// does not match yields `Ok(false)`.
pub fn verify_signature(
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<bool, KeyError> {
    let secp = Secp256k1::verification_only();
    let public_key = public_key_from_bytes(public_key)?;
    let sig = Signature::from_der(signature).map_err(|_| KeyError::InvalidSignature)?;
    let digest = Message::from_digest_slice(&sha256(message))?;

    Ok(secp.verify_ecdsa(&digest, &sig, &public_key).is_ok())
}
