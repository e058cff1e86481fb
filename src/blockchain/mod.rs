// Blockchain module
//
// This module contains the core ledger implementation including:
// - Byte codec and base58
// - Keys, addresses and wallets
// - Proof of work algorithm
// - Block and transaction structures
// - UTXO discovery
// - Persistent storage and the chain handle

pub mod block;
pub mod chain;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod pow;
pub mod storage;
pub mod transaction;
pub mod utxo;
pub mod wallet;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, BlockchainError};
pub use config::{Config, ConfigError};
pub use crypto::Address;
pub use transaction::Transaction;
pub use wallet::{Wallet, WalletError, Wallets};
