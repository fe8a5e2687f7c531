//! Wallet module for key storage and transfer construction

pub mod wallet;

pub use wallet::{Wallet, WalletError, WALLET_FILE};
