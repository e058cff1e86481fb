use std::path::Path;

use log::{debug, info};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use sled::{Db, IVec, Tree};
use thiserror::Error;

use super::block::Block;
use super::codec::{CodecError, Hash};

/// Name of the tree holding every block and the tip pointer
pub const BLOCKS_TREE: &str = "blocks";

/// Key of the current tip hash inside [`BLOCKS_TREE`]
pub const TIP_KEY: &[u8] = b"l";

/// Key of the chain's proof-of-work difficulty, written once with genesis
pub const DIFFICULTY_KEY: &[u8] = b"difficulty";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] CodecError),

    #[error("Corrupt store: {0}")]
    Corrupt(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Tip moved from {expected} to {found} during the update")]
    TipMismatch { expected: String, found: String },
}

impl From<TransactionError<StorageError>> for StorageError {
    fn from(err: TransactionError<StorageError>) -> Self {
        match err {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => StorageError::DatabaseError(err),
        }
    }
}

fn describe_tip(tip: Option<&[u8]>) -> String {
    match tip {
        Some(bytes) => hex::encode(bytes),
        None => "<none>".to_string(),
    }
}

fn to_hash(bytes: &[u8], what: &str) -> Result<Hash, StorageError> {
    bytes
        .try_into()
        .map_err(|_| StorageError::Corrupt(format!("{} has {} bytes", what, bytes.len())))
}

/// Storage for blockchain data
///
/// Blocks live in one tree keyed by their hash, next to the tip pointer.
/// Both are only ever written together inside one sled transaction, so a
/// reader can never see a tip whose block is missing.
pub struct BlockchainStorage {
    /// The database instance
    db: Db,

    /// Tree for blocks and the tip pointer
    blocks: Tree,
}

impl std::fmt::Debug for BlockchainStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainStorage").finish()
    }
}

impl BlockchainStorage {
    /// Opens the store at `path`, creating it when absent
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        let blocks = db.open_tree(BLOCKS_TREE)?;

        debug!("Opened block store at {}", path.display());
        Ok(Self { db, blocks })
    }

    /// The hash of the most recent block, if a chain exists
    pub fn tip(&self) -> Result<Option<Hash>, StorageError> {
        match self.blocks.get(TIP_KEY)? {
            Some(value) => Ok(Some(to_hash(&value, "tip pointer")?)),
            None => Ok(None),
        }
    }

    /// The difficulty the chain was created with, if a chain exists
    pub fn difficulty(&self) -> Result<Option<u32>, StorageError> {
        match self.blocks.get(DIFFICULTY_KEY)? {
            Some(value) => {
                let bytes: [u8; 4] = value.as_ref().try_into().map_err(|_| {
                    StorageError::Corrupt(format!("difficulty has {} bytes", value.len()))
                })?;
                Ok(Some(u32::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    /// Gets a block by its hash
    ///
    /// A stored block whose own hash differs from its key is corrupt.
    pub fn get_block(&self, hash: &Hash) -> Result<Block, StorageError> {
        let value = self
            .blocks
            .get(hash)?
            .ok_or_else(|| StorageError::NotFound(format!("block {}", hex::encode(hash))))?;

        let block = Block::deserialize(&value)?;
        if &block.hash != hash {
            return Err(StorageError::Corrupt(format!(
                "block stored under {} has hash {}",
                hex::encode(hash),
                hex::encode(block.hash)
            )));
        }

        Ok(block)
    }

    /// Stores a genesis block, points the tip at it and records `difficulty`
    ///
    /// If another chain was created in the meantime nothing is written and
    /// the existing tip is returned instead.
    pub fn insert_genesis(&self, block: &Block, difficulty: u32) -> Result<Hash, StorageError> {
        let encoded = block.serialize()?;

        let existing = self.blocks.transaction(
            |tx| -> ConflictableTransactionResult<Option<IVec>, StorageError> {
                if let Some(tip) = tx.get(TIP_KEY)? {
                    return Ok(Some(tip));
                }
                tx.insert(&block.hash[..], encoded.as_slice())?;
                tx.insert(TIP_KEY, &block.hash[..])?;
                tx.insert(DIFFICULTY_KEY, &difficulty.to_be_bytes()[..])?;
                Ok(None)
            },
        )?;
        self.db.flush()?;

        match existing {
            Some(tip) => {
                info!("Chain already exists, keeping tip {}", hex::encode(&tip));
                to_hash(&tip, "tip pointer")
            }
            None => {
                info!(
                    "Stored genesis block {} at difficulty {}",
                    hex::encode(block.hash),
                    difficulty
                );
                Ok(block.hash)
            }
        }
    }

    /// Stores a block and advances the tip to it in one atomic update
    ///
    /// Fails without writing if the tip is no longer the block's parent.
    pub fn append_block(&self, block: &Block) -> Result<(), StorageError> {
        let encoded = block.serialize()?;
        let expected = block.prev_hash.as_ref().map(|hash| &hash[..]);

        self.blocks.transaction(|tx| -> ConflictableTransactionResult<(), StorageError> {
            let current = tx.get(TIP_KEY)?;
            if current.as_deref() != expected {
                return Err(ConflictableTransactionError::Abort(StorageError::TipMismatch {
                    expected: describe_tip(expected),
                    found: describe_tip(current.as_deref()),
                }));
            }

            tx.insert(&block.hash[..], encoded.as_slice())?;
            tx.insert(TIP_KEY, &block.hash[..])?;
            Ok(())
        })?;
        self.db.flush()?;

        debug!("Stored block {}", hex::encode(block.hash));
        Ok(())
    }
}
