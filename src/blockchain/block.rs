use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::codec::{self, CodecError, Hash};
use super::pow::{PowError, ProofOfWork};
use super::transaction::Transaction;

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Seconds since the Unix epoch when the block was mined
    pub timestamp: i64,

    /// List of transactions included in this block
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block, `None` for the genesis block
    pub prev_hash: Option<Hash>,

    /// Proof-of-work digest of this block
    pub hash: Hash,

    /// Nonce that makes `hash` meet the target
    pub nonce: u64,
}

impl Block {
    /// Mines a new block on top of `prev_hash`
    ///
    /// # Arguments
    ///
    /// * `transactions` - The transactions to include in the block
    /// * `prev_hash` - The hash of the current tip, or `None` for a genesis block
    /// * `difficulty` - Number of leading zero bits the hash must have
    pub fn mine(
        transactions: Vec<Transaction>,
        prev_hash: Option<Hash>,
        difficulty: u32,
    ) -> Result<Self, PowError> {
        let mut block = Block {
            timestamp: Utc::now().timestamp(),
            transactions,
            prev_hash,
            hash: Hash::default(),
            nonce: 0,
        };

        let (nonce, hash) = ProofOfWork::new(&block, difficulty)?.run()?;
        block.nonce = nonce;
        block.hash = hash;

        Ok(block)
    }

    /// Mines the root block of a chain holding a single coinbase
    pub fn genesis(coinbase: Transaction, difficulty: u32) -> Result<Self, PowError> {
        Self::mine(vec![coinbase], None, difficulty)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_none()
    }

    /// Hash over the concatenated transaction ids
    pub fn hash_transactions(&self) -> Hash {
        let ids: Vec<u8> = self
            .transactions
            .iter()
            .flat_map(|tx| tx.id.iter().copied())
            .collect();
        codec::sha256(&ids)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::wallet::Wallet;

    const DIFFICULTY: u32 = 8;

    fn coinbase() -> Transaction {
        Transaction::new_coinbase(&Wallet::new().address(), None, 50).unwrap()
    }

    #[test]
    fn test_genesis_block() {
        let block = Block::genesis(coinbase(), DIFFICULTY).unwrap();

        assert!(block.is_genesis());
        assert_eq!(block.transactions.len(), 1);
        assert!(ProofOfWork::new(&block, DIFFICULTY).unwrap().validate());
    }

    #[test]
    fn test_block_links_to_previous() {
        let genesis = Block::genesis(coinbase(), DIFFICULTY).unwrap();
        let next = Block::mine(vec![coinbase()], Some(genesis.hash), DIFFICULTY).unwrap();

        assert!(!next.is_genesis());
        assert_eq!(next.prev_hash, Some(genesis.hash));
        assert_ne!(next.hash, genesis.hash);
    }

    #[test]
    fn test_hash_transactions() {
        let block = Block::genesis(coinbase(), DIFFICULTY).unwrap();
        let expected = codec::sha256(&block.transactions[0].id);
        assert_eq!(block.hash_transactions(), expected);

        let mut reordered = block.clone();
        reordered.transactions.push(coinbase());
        assert_ne!(reordered.hash_transactions(), block.hash_transactions());
    }

    #[test]
    fn test_serialize_round_trip() {
        let genesis = Block::genesis(coinbase(), DIFFICULTY).unwrap();
        let next = Block::mine(vec![coinbase(), coinbase()], Some(genesis.hash), DIFFICULTY)
            .unwrap();

        for block in [genesis, next] {
            let bytes = block.serialize().unwrap();
            let decoded = Block::deserialize(&bytes).unwrap();
            assert_eq!(decoded, block);
        }
    }

    #[test]
    fn test_deserialize_corrupt_bytes() {
        let block = Block::genesis(coinbase(), DIFFICULTY).unwrap();
        let bytes = block.serialize().unwrap();

        assert!(Block::deserialize(&bytes[..bytes.len() / 2]).is_err());
        assert!(Block::deserialize(&[]).is_err());
    }
}
