use log::{debug, info};
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::codec::{self, CodecError};
use super::crypto::{self, Address, CryptoError, PubKeyHash, RawPublicKey};

/// Errors that can occur while managing wallets
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("I/O error on wallet file: {0}")]
    Io(#[from] io::Error),

    #[error("Corrupt wallet file: {0}")]
    Corrupt(String),

    #[error("Encoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("No wallet for address {0}")]
    NotFound(String),
}

/// A key pair able to spend outputs locked to its address
#[derive(Debug, Clone)]
pub struct Wallet {
    secret_key: SecretKey,
    public_key: RawPublicKey,
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn new() -> Self {
        let (secret_key, public_key) = crypto::generate_key_pair();
        Wallet {
            secret_key,
            public_key,
        }
    }

    /// Rebuilds a wallet from its secret key bytes
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret_key = SecretKey::from_slice(secret_key_bytes)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        let public_key = crypto::public_key_of(&secret_key);

        Ok(Wallet {
            secret_key,
            public_key,
        })
    }

    /// The address is always derived, never stored
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key)
    }

    pub fn public_key(&self) -> &RawPublicKey {
        &self.public_key
    }

    pub fn pub_key_hash(&self) -> PubKeyHash {
        crypto::hash_pub_key(self.public_key.as_bytes())
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// On-disk form of a single wallet
#[derive(Serialize, Deserialize)]
struct StoredWallet {
    private_key: Vec<u8>,
    public_key: Vec<u8>,
}

/// The set of wallets owned by this node, keyed by address
#[derive(Debug)]
pub struct Wallets {
    path: PathBuf,
    wallets: BTreeMap<Address, Wallet>,
}

impl Wallets {
    /// Loads the wallet file at `path`
    ///
    /// A missing file yields an empty collection. A file that cannot be
    /// decoded, or whose entries do not match their address keys, is an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        let path = path.as_ref().to_path_buf();

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No wallet file at {}, starting empty", path.display());
                return Ok(Wallets {
                    path,
                    wallets: BTreeMap::new(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let stored: BTreeMap<String, StoredWallet> =
            codec::decode(&bytes).map_err(|e| WalletError::Corrupt(e.to_string()))?;

        let mut wallets = BTreeMap::new();
        for (key, entry) in stored {
            let wallet = Wallet::from_secret_key(&entry.private_key)
                .map_err(|e| WalletError::Corrupt(format!("{}: {}", key, e)))?;

            if wallet.public_key.as_bytes() != entry.public_key.as_slice() {
                return Err(WalletError::Corrupt(format!(
                    "{}: public key does not match private key",
                    key
                )));
            }

            let address = wallet.address();
            if address.as_str() != key {
                return Err(WalletError::Corrupt(format!(
                    "{}: key does not match derived address {}",
                    key, address
                )));
            }

            wallets.insert(address, wallet);
        }

        debug!("Loaded {} wallets from {}", wallets.len(), path.display());
        Ok(Wallets { path, wallets })
    }

    /// Generates a wallet, adds it to the collection and returns its address
    pub fn create_wallet(&mut self) -> Address {
        let wallet = Wallet::new();
        let address = wallet.address();
        self.wallets.insert(address.clone(), wallet);
        address
    }

    /// All known addresses in sorted order
    pub fn addresses(&self) -> Vec<&Address> {
        self.wallets.keys().collect()
    }

    pub fn get(&self, address: &Address) -> Result<&Wallet, WalletError> {
        self.wallets
            .get(address)
            .ok_or_else(|| WalletError::NotFound(address.to_string()))
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// Writes the collection to its file, replacing the previous contents
    pub fn save(&self) -> Result<(), WalletError> {
        let stored: BTreeMap<String, StoredWallet> = self
            .wallets
            .iter()
            .map(|(address, wallet)| {
                (
                    address.to_string(),
                    StoredWallet {
                        private_key: wallet.secret_key.secret_bytes().to_vec(),
                        public_key: wallet.public_key.as_bytes().to_vec(),
                    },
                )
            })
            .collect();
        let bytes = codec::encode(&stored)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write next to the target and rename so a crash never truncates it
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;

        info!("Saved {} wallets to {}", self.wallets.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_wallet_creation() {
        let wallet = Wallet::new();
        let address = wallet.address();

        assert_eq!(address.pub_key_hash(), &wallet.pub_key_hash());
        assert_eq!(wallet.address(), address);
    }

    #[test]
    fn test_from_secret_key() {
        let wallet = Wallet::new();
        let restored = Wallet::from_secret_key(&wallet.secret_key().secret_bytes()).unwrap();

        assert_eq!(restored.public_key(), wallet.public_key());
        assert_eq!(restored.address(), wallet.address());

        assert!(Wallet::from_secret_key(&[0u8; 32]).is_err());
        assert!(Wallet::from_secret_key(&[1u8; 31]).is_err());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let wallets = Wallets::load(dir.path().join("wallet.dat")).unwrap();
        assert!(wallets.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("wallet.dat");

        let mut wallets = Wallets::load(&path).unwrap();
        let first = wallets.create_wallet();
        let second = wallets.create_wallet();
        wallets.save().unwrap();

        let loaded = Wallets::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);

        let mut expected = vec![first.clone(), second.clone()];
        expected.sort();
        let addresses: Vec<Address> = loaded.addresses().into_iter().cloned().collect();
        assert_eq!(addresses, expected);

        let original = wallets.get(&first).unwrap();
        let restored = loaded.get(&first).unwrap();
        assert_eq!(
            original.secret_key().secret_bytes(),
            restored.secret_key().secret_bytes()
        );
    }

    #[test]
    fn test_unknown_address() {
        let dir = tempdir().unwrap();
        let wallets = Wallets::load(dir.path().join("wallet.dat")).unwrap();
        let stranger = Wallet::new().address();

        assert!(matches!(wallets.get(&stranger), Err(WalletError::NotFound(_))));
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.dat");
        fs::write(&path, b"definitely not a wallet file").unwrap();

        assert!(matches!(Wallets::load(&path), Err(WalletError::Corrupt(_))));
    }

    #[test]
    fn test_mismatched_address_key_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.dat");

        let wallet = Wallet::new();
        let mut stored = BTreeMap::new();
        stored.insert(
            Wallet::new().address().to_string(),
            StoredWallet {
                private_key: wallet.secret_key().secret_bytes().to_vec(),
                public_key: wallet.public_key().as_bytes().to_vec(),
            },
        );
        fs::write(&path, codec::encode(&stored).unwrap()).unwrap();

        assert!(matches!(Wallets::load(&path), Err(WalletError::Corrupt(_))));
    }
}
