use std::path::{Path, PathBuf};

use thiserror::Error;

use super::pow::{DEFAULT_DIFFICULTY, MAX_DIFFICULTY};

/// Default coinbase subsidy
pub const DEFAULT_SUBSIDY: u64 = 50;

/// Default directory holding the chain store and wallet file
pub const DEFAULT_DATA_DIR: &str = "data";

const CHAIN_DB: &str = "chain.db";
const WALLET_FILE: &str = "wallet.dat";

/// Errors in user-supplied settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Difficulty must be between 1 and 255, got {0}")]
    InvalidDifficulty(u32),

    #[error("Subsidy must be positive")]
    ZeroSubsidy,

    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(i64),
}

/// Settings shared by the ledger and the wallet collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the chain store and the wallet file
    pub data_dir: PathBuf,

    /// Leading zero bits required of every block hash
    pub difficulty: u32,

    /// Value of each coinbase output
    pub subsidy: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            difficulty: DEFAULT_DIFFICULTY,
            subsidy: DEFAULT_SUBSIDY,
        }
    }
}

impl Config {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Config {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Config::default()
        }
    }

    pub fn with_difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_subsidy(mut self, subsidy: u64) -> Self {
        self.subsidy = subsidy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty == 0 || self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::InvalidDifficulty(self.difficulty));
        }
        if self.subsidy == 0 {
            return Err(ConfigError::ZeroSubsidy);
        }
        Ok(())
    }

    pub fn chain_path(&self) -> PathBuf {
        self.data_dir.join(CHAIN_DB)
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join(WALLET_FILE)
    }
}

/// Converts a user-supplied amount, rejecting zero and negatives
pub fn parse_amount(amount: i64) -> Result<u64, ConfigError> {
    if amount <= 0 {
        return Err(ConfigError::NonPositiveAmount(amount));
    }
    Ok(amount as u64)
}
