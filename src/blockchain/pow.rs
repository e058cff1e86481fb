use log::{debug, info};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::block::Block;
use super::codec::Hash;

/// Default number of leading zero bits a block hash must have
pub const DEFAULT_DIFFICULTY: u32 = 24;

/// Largest difficulty that still leaves a non-zero target
pub const MAX_DIFFICULTY: u32 = 255;

#[derive(Debug, Error)]
pub enum PowError {
    #[error("Difficulty must be between 1 and 255, got {0}")]
    InvalidDifficulty(u32),

    #[error("No nonce satisfies the target")]
    Exhausted,
}

/// Returns `2^(256 - difficulty)` as a big-endian byte array
pub fn target_for(difficulty: u32) -> Result<Hash, PowError> {
    if difficulty == 0 || difficulty > MAX_DIFFICULTY {
        return Err(PowError::InvalidDifficulty(difficulty));
    }

    let bit = (256 - difficulty) as usize;
    let mut target = Hash::default();
    target[31 - bit / 8] = 1 << (bit % 8);
    Ok(target)
}

/// Nonce search over one block candidate
///
/// The header is `prev_hash || transactions digest || timestamp || difficulty || nonce`
/// with integers in big-endian order. Everything but the nonce is hashed once
/// up front and the hasher state is cloned per attempt.
pub struct ProofOfWork<'a> {
    block: &'a Block,
    prefix: Sha256,
    target: Hash,
    difficulty: u32,
}

impl<'a> ProofOfWork<'a> {
    pub fn new(block: &'a Block, difficulty: u32) -> Result<Self, PowError> {
        let target = target_for(difficulty)?;

        let mut prefix = Sha256::new();
        if let Some(prev_hash) = &block.prev_hash {
            prefix.update(prev_hash);
        }
        prefix.update(block.hash_transactions());
        prefix.update(block.timestamp.to_be_bytes());
        prefix.update(u64::from(difficulty).to_be_bytes());

        Ok(ProofOfWork {
            block,
            prefix,
            target,
            difficulty,
        })
    }

    /// Header digest for a given nonce
    pub fn digest(&self, nonce: u64) -> Hash {
        let mut hasher = self.prefix.clone();
        hasher.update(nonce.to_be_bytes());
        hasher.finalize().into()
    }

    /// Big-endian comparison of the digest against the target
    pub fn meets_target(&self, digest: &Hash) -> bool {
        digest < &self.target
    }

    /// Searches the whole nonce space from zero
    pub fn run(&self) -> Result<(u64, Hash), PowError> {
        debug!("Searching for a nonce at difficulty {}", self.difficulty);

        let (nonce, hash) = self.search(0..=u64::MAX)?;
        info!("Sealed block {} with nonce {}", hex::encode(hash), nonce);

        Ok((nonce, hash))
    }

    /// Returns the first nonce in `nonces` whose digest meets the target
    pub fn search<I>(&self, nonces: I) -> Result<(u64, Hash), PowError>
    where
        I: IntoIterator<Item = u64>,
    {
        nonces
            .into_iter()
            .map(|nonce| (nonce, self.digest(nonce)))
            .find(|(_, digest)| self.meets_target(digest))
            .ok_or(PowError::Exhausted)
    }

    /// Recomputes the digest from the block's stored nonce and checks both
    /// that it matches the stored hash and that it meets the target
    pub fn validate(&self) -> bool {
        let digest = self.digest(self.block.nonce);
        digest == self.block.hash && self.meets_target(&digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::transaction::Transaction;
    use crate::blockchain::wallet::Wallet;

    fn candidate() -> Block {
        let coinbase = Transaction::new_coinbase(&Wallet::new().address(), None, 50).unwrap();
        Block {
            timestamp: 1_700_000_000,
            transactions: vec![coinbase],
            prev_hash: Some([7u8; 32]),
            hash: Hash::default(),
            nonce: 0,
        }
    }

    #[test]
    fn test_target_for() {
        let target = target_for(24).unwrap();
        assert_eq!(&target[..4], &[0, 0, 1, 0]);
        assert!(target[4..].iter().all(|b| *b == 0));

        let target = target_for(1).unwrap();
        assert_eq!(target[0], 0x80);

        let target = target_for(MAX_DIFFICULTY).unwrap();
        assert_eq!(target[31], 0x02);

        assert!(matches!(target_for(0), Err(PowError::InvalidDifficulty(0))));
        assert!(matches!(target_for(256), Err(PowError::InvalidDifficulty(256))));
    }

    #[test]
    fn test_mined_block_validates() {
        let mut block = candidate();
        let (nonce, hash) = ProofOfWork::new(&block, 12).unwrap().run().unwrap();
        block.nonce = nonce;
        block.hash = hash;

        let pow = ProofOfWork::new(&block, 12).unwrap();
        assert!(pow.validate());
        assert!(hash < target_for(12).unwrap());
        // First 12 bits are zero
        assert_eq!(hash[0], 0);
        assert_eq!(hash[1] & 0xf0, 0);
    }

    #[test]
    fn test_first_satisfying_nonce_is_chosen() {
        let block = candidate();
        let pow = ProofOfWork::new(&block, 8).unwrap();
        let (nonce, _) = pow.run().unwrap();

        for earlier in 0..nonce {
            assert!(!pow.meets_target(&pow.digest(earlier)));
        }
    }

    #[test]
    fn test_tampered_block_fails_validation() {
        let mut block = candidate();
        let (nonce, hash) = ProofOfWork::new(&block, 8).unwrap().run().unwrap();
        block.nonce = nonce;
        block.hash = hash;

        let mut wrong_nonce = block.clone();
        wrong_nonce.nonce = nonce.wrapping_add(1);
        assert!(!ProofOfWork::new(&wrong_nonce, 8).unwrap().validate());

        let mut wrong_time = block.clone();
        wrong_time.timestamp += 1;
        assert!(!ProofOfWork::new(&wrong_time, 8).unwrap().validate());

        let mut wrong_parent = block.clone();
        wrong_parent.prev_hash = None;
        assert!(!ProofOfWork::new(&wrong_parent, 8).unwrap().validate());

        let mut extra_tx = block.clone();
        extra_tx.transactions.push(extra_tx.transactions[0].clone());
        assert!(!ProofOfWork::new(&extra_tx, 8).unwrap().validate());

        // Difficulty is part of the header
        assert!(!ProofOfWork::new(&block, 9).unwrap().validate());
    }

    #[test]
    fn test_exhausted_search() {
        let block = candidate();
        let pow = ProofOfWork::new(&block, MAX_DIFFICULTY).unwrap();
        assert!(matches!(pow.search(0..1_000), Err(PowError::Exhausted)));
    }
}
