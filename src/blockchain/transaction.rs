use rand::RngCore;
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::codec::{self, CodecError, Hash};
use super::crypto::{self, Address, PubKeyHash};
use super::wallet::Wallet;

/// Identifier of a transaction: the digest of its content
pub type TxId = Hash;

/// Payload carried by the coinbase of the genesis block
pub const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

/// Number of random bytes placed in a coinbase when no data is given
const COINBASE_NONCE_LEN: usize = 20;

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Input {0} has no output reference")]
    UnreferencedInput(usize),

    #[error("Previous transaction {0} is not available")]
    MissingPreviousTransaction(String),

    #[error("Input references missing output {vout} of {txid}")]
    InvalidOutputReference { txid: String, vout: u32 },

    #[error("Encoding error: {0}")]
    Codec(#[from] CodecError),
}

/// Reference to one output of an earlier transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub vout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// The output being spent; `None` only for a coinbase input
    pub previous: Option<OutPoint>,

    pub signature: Vec<u8>,

    /// The spender's raw public key, or arbitrary data in a coinbase
    pub pub_key: Vec<u8>,
}

impl TxInput {
    /// Whether this input was signed by the owner of `pub_key_hash`
    pub fn uses_key(&self, pub_key_hash: &PubKeyHash) -> bool {
        &crypto::hash_pub_key(&self.pub_key) == pub_key_hash
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub pub_key_hash: PubKeyHash,
}

impl TxOutput {
    /// Creates an output locked to `address`
    pub fn new(value: u64, address: &Address) -> Self {
        TxOutput {
            value,
            pub_key_hash: *address.pub_key_hash(),
        }
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &PubKeyHash) -> bool {
        &self.pub_key_hash == pub_key_hash
    }
}

/// Represents a transaction in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Creates a coinbase transaction paying `subsidy` to `to`
    ///
    /// Without `data` the input carries random bytes, so two coinbases to the
    /// same address never share an id.
    pub fn new_coinbase(
        to: &Address,
        data: Option<&[u8]>,
        subsidy: u64,
    ) -> Result<Self, TransactionError> {
        let data = match data {
            Some(data) => data.to_vec(),
            None => {
                let mut nonce = vec![0u8; COINBASE_NONCE_LEN];
                rand::thread_rng().fill_bytes(&mut nonce);
                nonce
            }
        };

        let mut transaction = Transaction {
            id: TxId::default(),
            inputs: vec![TxInput {
                previous: None,
                signature: Vec::new(),
                pub_key: data,
            }],
            outputs: vec![TxOutput::new(subsidy, to)],
        };
        transaction.id = transaction.hash()?;

        Ok(transaction)
    }

    /// Builds an unsigned transaction moving `amount` from `from` to `to`
    ///
    /// `accumulated` and `spendable` come from a spendable-output search for
    /// the sender. Any excess over `amount` is returned to `from` as change.
    pub fn new_spending(
        from: &Wallet,
        to: &Address,
        amount: u64,
        accumulated: u64,
        spendable: &BTreeMap<TxId, Vec<u32>>,
    ) -> Result<Self, TransactionError> {
        if amount == 0 {
            return Err(TransactionError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }

        if accumulated < amount {
            return Err(TransactionError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let inputs = spendable
            .iter()
            .flat_map(|(txid, vouts)| {
                vouts.iter().map(move |vout| TxInput {
                    previous: Some(OutPoint {
                        txid: *txid,
                        vout: *vout,
                    }),
                    signature: Vec::new(),
                    pub_key: from.public_key().as_bytes().to_vec(),
                })
            })
            .collect();

        let mut outputs = vec![TxOutput::new(amount, to)];
        if accumulated > amount {
            outputs.push(TxOutput::new(accumulated - amount, &from.address()));
        }

        let mut transaction = Transaction {
            id: TxId::default(),
            inputs,
            outputs,
        };
        transaction.id = transaction.hash()?;

        Ok(transaction)
    }

    /// Digest of the transaction with its id field blanked
    pub fn hash(&self) -> Result<TxId, CodecError> {
        let mut copy = self.clone();
        copy.id = TxId::default();
        Ok(codec::sha256(&codec::encode(&copy)?))
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous.is_none()
    }

    /// Copy with every signature and public key cleared
    fn trimmed_copy(&self) -> Transaction {
        Transaction {
            id: self.id,
            inputs: self
                .inputs
                .iter()
                .map(|input| TxInput {
                    previous: input.previous,
                    signature: Vec::new(),
                    pub_key: Vec::new(),
                })
                .collect(),
            outputs: self.outputs.clone(),
        }
    }

    /// The per-input signing digest
    ///
    /// Only the input at `index` carries a public key, set to the locking
    /// hash of the output it spends.
    fn signing_digest(
        trimmed: &mut Transaction,
        index: usize,
        locking_hash: &PubKeyHash,
    ) -> Result<Hash, CodecError> {
        trimmed.inputs[index].pub_key = locking_hash.to_vec();
        let digest = trimmed.hash();
        trimmed.inputs[index].pub_key = Vec::new();
        digest
    }

    /// Looks up the output an input spends among `previous`
    fn referenced_output<'a>(
        outpoint: &OutPoint,
        previous: &'a HashMap<TxId, Transaction>,
    ) -> Result<Option<&'a TxOutput>, TransactionError> {
        let prev_tx = previous.get(&outpoint.txid).ok_or_else(|| {
            TransactionError::MissingPreviousTransaction(hex::encode(outpoint.txid))
        })?;
        Ok(prev_tx.outputs.get(outpoint.vout as usize))
    }

    /// Signs every input with `secret_key`
    ///
    /// `previous` must contain every transaction referenced by an input.
    pub fn sign(
        &mut self,
        secret_key: &SecretKey,
        previous: &HashMap<TxId, Transaction>,
    ) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            return Ok(());
        }

        let public_key = crypto::public_key_of(secret_key);
        let mut trimmed = self.trimmed_copy();

        for index in 0..self.inputs.len() {
            let outpoint = self.inputs[index]
                .previous
                .ok_or(TransactionError::UnreferencedInput(index))?;
            let output = Self::referenced_output(&outpoint, previous)?.ok_or_else(|| {
                TransactionError::InvalidOutputReference {
                    txid: hex::encode(outpoint.txid),
                    vout: outpoint.vout,
                }
            })?;

            let digest = Self::signing_digest(&mut trimmed, index, &output.pub_key_hash)?;

            let input = &mut self.inputs[index];
            input.signature = crypto::sign_digest(secret_key, &digest);
            input.pub_key = public_key.as_bytes().to_vec();
        }

        Ok(())
    }

    /// Checks every input's signature and ownership of the spent output
    ///
    /// Returns `Ok(false)` on the first input that fails. An input whose
    /// previous transaction is missing from `previous` is an error.
    pub fn verify(&self, previous: &HashMap<TxId, Transaction>) -> Result<bool, TransactionError> {
        if self.is_coinbase() {
            return Ok(true);
        }

        let mut trimmed = self.trimmed_copy();

        for (index, input) in self.inputs.iter().enumerate() {
            let outpoint = match input.previous {
                Some(outpoint) => outpoint,
                None => return Ok(false),
            };
            let output = match Self::referenced_output(&outpoint, previous)? {
                Some(output) => output,
                None => return Ok(false),
            };

            if !input.uses_key(&output.pub_key_hash) {
                return Ok(false);
            }

            let digest = Self::signing_digest(&mut trimmed, index, &output.pub_key_hash)?;
            if !crypto::verify_digest(&input.pub_key, &digest, &input.signature) {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Total value of all outputs, saturating instead of overflowing
    pub fn output_value(&self) -> u64 {
        self.outputs
            .iter()
            .fold(0u64, |total, output| total.saturating_add(output.value))
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", hex::encode(self.id))?;
        for (index, input) in self.inputs.iter().enumerate() {
            writeln!(f, "     Input {}:", index)?;
            match &input.previous {
                Some(outpoint) => {
                    writeln!(f, "       TXID:      {}", hex::encode(outpoint.txid))?;
                    writeln!(f, "       Out:       {}", outpoint.vout)?;
                }
                None => writeln!(f, "       Coinbase")?,
            }
            writeln!(f, "       Signature: {}", hex::encode(&input.signature))?;
            writeln!(f, "       PubKey:    {}", hex::encode(&input.pub_key))?;
        }

        for (index, output) in self.outputs.iter().enumerate() {
            writeln!(f, "     Output {}:", index)?;
            writeln!(f, "       Value:  {}", output.value)?;
            writeln!(
                f,
                "       Script: {}",
                Address::from_pub_key_hash(output.pub_key_hash)
            )?;
        }

        Ok(())
    }
}
