use log::{debug, info, warn};
use secp256k1::SecretKey;
use thiserror::Error;

use std::collections::{BTreeMap, HashMap, HashSet};

use super::block::Block;
use super::codec::Hash;
use super::config::{Config, ConfigError};
use super::crypto::{Address, PubKeyHash};
use super::pow::{PowError, ProofOfWork, MAX_DIFFICULTY};
use super::storage::{BlockchainStorage, StorageError};
use super::transaction::{
    OutPoint, Transaction, TransactionError, TxId, TxOutput, GENESIS_COINBASE_DATA,
};
use super::utxo;
use super::wallet::Wallet;

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Proof of work error: {0}")]
    PowError(#[from] PowError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Invalid transaction {id}: {reason}")]
    InvalidTransaction { id: String, reason: String },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("No existing blockchain found at {0}, create one first")]
    NoChain(String),
}

/// Handle on a persisted chain
///
/// Holds the open store and the hash of the current tip. Every query walks the
/// chain through [`Blockchain::iter`]; nothing derived from it is cached.
#[derive(Debug)]
pub struct Blockchain {
    tip: Hash,
    storage: BlockchainStorage,
    difficulty: u32,
    subsidy: u64,
}

/// Walks blocks from the tip back to genesis
///
/// Yields each block once and ends after the block without a parent, or
/// after the first error.
pub struct BlockchainIterator<'a> {
    current: Option<Hash>,
    storage: &'a BlockchainStorage,
}

impl Iterator for BlockchainIterator<'_> {
    type Item = Result<Block, BlockchainError>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current.take()?;

        match self.storage.get_block(&hash) {
            Ok(block) => {
                self.current = block.prev_hash;
                Some(Ok(block))
            }
            Err(err) => Some(Err(err.into())),
        }
    }
}

impl Blockchain {
    /// Opens the chain described by `config`, creating it if needed
    ///
    /// A new chain starts with a genesis block paying the subsidy to
    /// `genesis_address`. When a chain already exists the address is ignored.
    pub fn open(config: &Config, genesis_address: &Address) -> Result<Self, BlockchainError> {
        config.validate()?;
        let storage = BlockchainStorage::open(config.chain_path())?;

        let tip = match storage.tip()? {
            Some(tip) => {
                info!("Loaded blockchain with tip {}", hex::encode(tip));
                tip
            }
            None => {
                info!(
                    "No existing blockchain found, creating genesis block for {}",
                    genesis_address
                );
                let coinbase = Transaction::new_coinbase(
                    genesis_address,
                    Some(GENESIS_COINBASE_DATA.as_bytes()),
                    config.subsidy,
                )?;
                let genesis = Block::genesis(coinbase, config.difficulty)?;
                storage.insert_genesis(&genesis, config.difficulty)?
            }
        };
        let difficulty = stored_difficulty(&storage, config)?;

        Ok(Blockchain {
            tip,
            storage,
            difficulty,
            subsidy: config.subsidy,
        })
    }

    /// Opens a chain that must already exist
    ///
    /// The chain keeps the difficulty it was created with, whatever `config` asks for.
    pub fn open_existing(config: &Config) -> Result<Self, BlockchainError> {
        config.validate()?;

        let path = config.chain_path();
        let no_chain = || BlockchainError::NoChain(path.display().to_string());
        if !path.exists() {
            return Err(no_chain());
        }

        let storage = BlockchainStorage::open(&path)?;
        let tip = storage.tip()?.ok_or_else(no_chain)?;
        debug!("Loaded blockchain with tip {}", hex::encode(tip));
        let difficulty = stored_difficulty(&storage, config)?;

        Ok(Blockchain {
            tip,
            storage,
            difficulty,
            subsidy: config.subsidy,
        })
    }

    pub fn tip(&self) -> Hash {
        self.tip
    }

    /// Difficulty recorded when the chain was created
    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn subsidy(&self) -> u64 {
        self.subsidy
    }

    /// A fresh walk from the current tip
    pub fn iter(&self) -> BlockchainIterator<'_> {
        BlockchainIterator {
            current: Some(self.tip),
            storage: &self.storage,
        }
    }

    /// Number of blocks, genesis included
    pub fn block_count(&self) -> Result<u64, BlockchainError> {
        self.iter().try_fold(0, |count, block| block.map(|_| count + 1))
    }

    /// Validates the transactions and seals them into a new block on the tip
    ///
    /// Nothing is written if any transaction is rejected.
    pub fn mine_block(&mut self, transactions: Vec<Transaction>) -> Result<Block, BlockchainError> {
        self.check_admission(&transactions)?;

        let tip = self
            .storage
            .tip()?
            .ok_or_else(|| BlockchainError::NoChain("<open store>".to_string()))?;

        let block = Block::mine(transactions, Some(tip), self.difficulty)?;
        self.storage.append_block(&block)?;
        self.tip = block.hash;

        info!(
            "Mined block {} with {} transactions",
            hex::encode(block.hash),
            block.transactions.len()
        );
        Ok(block)
    }

    /// Rejects a batch containing a transaction that is unsigned, spends
    /// something it does not own, spends an output twice or creates value
    fn check_admission(&self, transactions: &[Transaction]) -> Result<(), BlockchainError> {
        let spent = utxo::find_spent_outpoints(self.iter())?;
        let mut claimed: HashSet<OutPoint> = HashSet::new();

        for tx in transactions.iter().filter(|tx| !tx.is_coinbase()) {
            let previous = match self.previous_transactions(tx) {
                Ok(previous) => previous,
                Err(BlockchainError::TransactionNotFound(id)) => {
                    return Err(rejected(tx, format!("references unknown transaction {}", id)));
                }
                Err(err) => return Err(err),
            };

            if !tx.verify(&previous)? {
                return Err(rejected(tx, "signature verification failed".to_string()));
            }

            let mut input_value = 0u64;
            for outpoint in tx.inputs.iter().filter_map(|input| input.previous) {
                if spent.contains(&outpoint) || !claimed.insert(outpoint) {
                    return Err(rejected(
                        tx,
                        format!(
                            "output {} of {} is already spent",
                            outpoint.vout,
                            hex::encode(outpoint.txid)
                        ),
                    ));
                }

                let value = previous
                    .get(&outpoint.txid)
                    .and_then(|prev| prev.outputs.get(outpoint.vout as usize))
                    .map_or(0, |output| output.value);
                input_value = input_value.saturating_add(value);
            }

            if input_value < tx.output_value() {
                return Err(rejected(
                    tx,
                    format!(
                        "outputs total {} but inputs only {}",
                        tx.output_value(),
                        input_value
                    ),
                ));
            }
        }

        Ok(())
    }

    /// Transactions with unspent outputs locked to `pub_key_hash`
    pub fn find_unspent_transactions(
        &self,
        pub_key_hash: &PubKeyHash,
    ) -> Result<Vec<Transaction>, BlockchainError> {
        utxo::find_unspent_transactions(self.iter(), pub_key_hash)
    }

    /// Unspent outputs locked to `pub_key_hash`
    pub fn find_utxo(&self, pub_key_hash: &PubKeyHash) -> Result<Vec<TxOutput>, BlockchainError> {
        utxo::find_utxo(self.iter(), pub_key_hash)
    }

    /// Sum of every unspent output locked to `address`
    pub fn get_balance(&self, address: &Address) -> Result<u64, BlockchainError> {
        let outputs = self.find_utxo(address.pub_key_hash())?;
        Ok(outputs.iter().map(|output| output.value).sum())
    }

    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &PubKeyHash,
        amount: u64,
    ) -> Result<(u64, BTreeMap<TxId, Vec<u32>>), BlockchainError> {
        utxo::find_spendable_outputs(self.iter(), pub_key_hash, amount)
    }

    /// Linear scan for a transaction by id
    pub fn find_transaction(&self, id: &TxId) -> Result<Transaction, BlockchainError> {
        for block in self.iter() {
            if let Some(tx) = block?.transactions.into_iter().find(|tx| &tx.id == id) {
                return Ok(tx);
            }
        }

        Err(BlockchainError::TransactionNotFound(hex::encode(id)))
    }

    /// Resolves every transaction referenced by `tx`'s inputs
    fn previous_transactions(
        &self,
        tx: &Transaction,
    ) -> Result<HashMap<TxId, Transaction>, BlockchainError> {
        let mut previous = HashMap::new();

        for outpoint in tx.inputs.iter().filter_map(|input| input.previous) {
            if !previous.contains_key(&outpoint.txid) {
                let prev_tx = self.find_transaction(&outpoint.txid)?;
                previous.insert(prev_tx.id, prev_tx);
            }
        }

        Ok(previous)
    }

    pub fn sign_transaction(
        &self,
        tx: &mut Transaction,
        secret_key: &SecretKey,
    ) -> Result<(), BlockchainError> {
        if tx.is_coinbase() {
            return Ok(());
        }

        let previous = self.previous_transactions(tx)?;
        tx.sign(secret_key, &previous)?;
        Ok(())
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool, BlockchainError> {
        if tx.is_coinbase() {
            return Ok(true);
        }

        let previous = self.previous_transactions(tx)?;
        Ok(tx.verify(&previous)?)
    }

    /// Builds and signs a payment of `amount` from `from` to `to`
    pub fn new_spending_transaction(
        &self,
        from: &Wallet,
        to: &Address,
        amount: u64,
    ) -> Result<Transaction, BlockchainError> {
        let (accumulated, spendable) = self.find_spendable_outputs(&from.pub_key_hash(), amount)?;
        debug!(
            "Selected {} from {} transactions for a payment of {}",
            accumulated,
            spendable.len(),
            amount
        );

        let mut tx = Transaction::new_spending(from, to, amount, accumulated, &spendable)?;
        self.sign_transaction(&mut tx, from.secret_key())?;

        Ok(tx)
    }

    /// Pays `amount` from `from` to `to` in a newly mined block
    pub fn send(&mut self, from: &Wallet, to: &Address, amount: u64) -> Result<Block, BlockchainError> {
        let tx = self.new_spending_transaction(from, to, amount)?;
        self.mine_block(vec![tx])
    }

    /// Checks a block's proof of work at this chain's difficulty
    pub fn validate_block(&self, block: &Block) -> Result<bool, BlockchainError> {
        Ok(ProofOfWork::new(block, self.difficulty)?.validate())
    }

    /// Walks the whole chain checking every block's proof of work
    ///
    /// Blocks are fetched by the hash their child links to and the store
    /// rejects a block whose hash differs from its key, so the links are
    /// checked along the way.
    pub fn is_valid(&self) -> Result<bool, BlockchainError> {
        for block in self.iter() {
            let block = block?;
            if !self.validate_block(&block)? {
                warn!("Block {} fails proof of work", hex::encode(block.hash));
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// Difficulty recorded at genesis; a chain is mined and checked at one target only
fn stored_difficulty(storage: &BlockchainStorage, config: &Config) -> Result<u32, BlockchainError> {
    let difficulty = storage
        .difficulty()?
        .ok_or_else(|| StorageError::Corrupt("chain has no recorded difficulty".to_string()))?;
    if !(1..=MAX_DIFFICULTY).contains(&difficulty) {
        let reason = format!("recorded difficulty {} is out of range", difficulty);
        return Err(StorageError::Corrupt(reason).into());
    }

    if difficulty != config.difficulty {
        warn!(
            "Chain was created at difficulty {}, ignoring requested difficulty {}",
            difficulty, config.difficulty
        );
    }
    Ok(difficulty)
}

fn rejected(tx: &Transaction, reason: String) -> BlockchainError {
    warn!("Rejecting transaction {}: {}", hex::encode(tx.id), reason);
    BlockchainError::InvalidTransaction {
        id: hex::encode(tx.id),
        reason,
    }
}
