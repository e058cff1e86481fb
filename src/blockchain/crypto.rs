use ripemd::Ripemd160;
use rand::rngs::OsRng;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use std::fmt;
use std::str::FromStr;

use super::codec::{self, CodecError, Hash};

/// Version byte prepended to every address payload
pub const ADDRESS_VERSION: u8 = 0x00;

/// Length of a public-key hash (RIPEMD-160 output)
pub const PUB_KEY_HASH_LEN: usize = 20;

/// Length of the address checksum
pub const CHECKSUM_LEN: usize = 4;

/// Length of a raw public key: the X and Y coordinates without a prefix byte
pub const PUBLIC_KEY_LEN: usize = 64;

const VERSIONED_LEN: usize = 1 + PUB_KEY_HASH_LEN;
const ADDRESS_PAYLOAD_LEN: usize = VERSIONED_LEN + CHECKSUM_LEN;
const UNCOMPRESSED_TAG: u8 = 0x04;

pub type PubKeyHash = [u8; PUB_KEY_HASH_LEN];

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Address checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
}

/// Raw public key bytes, `X || Y`
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RawPublicKey([u8; PUBLIC_KEY_LEN]);

impl RawPublicKey {
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let uncompressed = public_key.serialize_uncompressed();
        let mut raw = [0u8; PUBLIC_KEY_LEN];
        raw.copy_from_slice(&uncompressed[1..]);
        RawPublicKey(raw)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let raw: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidPublicKey(format!(
                "expected {} bytes, got {}",
                PUBLIC_KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(RawPublicKey(raw))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Parses the raw coordinates back into a curve point
    pub fn to_public_key(&self) -> Result<PublicKey, CryptoError> {
        let mut uncompressed = [0u8; PUBLIC_KEY_LEN + 1];
        uncompressed[0] = UNCOMPRESSED_TAG;
        uncompressed[1..].copy_from_slice(&self.0);
        PublicKey::from_slice(&uncompressed).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }
}

impl fmt::Debug for RawPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawPublicKey({})", hex::encode(self.0))
    }
}

/// Generates a new ECDSA key pair
pub fn generate_key_pair() -> (SecretKey, RawPublicKey) {
    let secp = Secp256k1::new();
    let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
    (secret_key, RawPublicKey::from_public_key(&public_key))
}

/// Derives the raw public key belonging to a secret key
pub fn public_key_of(secret_key: &SecretKey) -> RawPublicKey {
    let secp = Secp256k1::signing_only();
    RawPublicKey::from_public_key(&PublicKey::from_secret_key(&secp, secret_key))
}

/// SHA-256 followed by RIPEMD-160
pub fn hash_pub_key(public_key: &[u8]) -> PubKeyHash {
    let sha = Sha256::digest(public_key);
    Ripemd160::digest(sha).into()
}

/// First four bytes of a double SHA-256
pub fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let second = codec::sha256(&codec::sha256(payload));
    let mut check = [0u8; CHECKSUM_LEN];
    check.copy_from_slice(&second[..CHECKSUM_LEN]);
    check
}

/// Signs a 32-byte digest, returning the compact 64-byte signature
pub fn sign_digest(secret_key: &SecretKey, digest: &Hash) -> Vec<u8> {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest(*digest);
    secp.sign_ecdsa(&message, secret_key).serialize_compact().to_vec()
}

/// Checks a compact signature over `digest` against a raw public key
pub fn verify_digest(public_key: &[u8], digest: &Hash, signature: &[u8]) -> bool {
    let public_key = match RawPublicKey::from_slice(public_key).and_then(|k| k.to_public_key()) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let signature = match Signature::from_compact(signature) {
        Ok(sig) => sig,
        Err(_) => return false,
    };

    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(&Message::from_digest(*digest), &signature, &public_key)
        .is_ok()
}

/// A validated base58check address
///
/// The only ways to build one are from a public key (or its hash) or by
/// parsing a string whose version byte and checksum have been checked, so
/// holding an `Address` means its public-key hash is known to be intact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    encoded: String,
    pub_key_hash: PubKeyHash,
}

impl Address {
    pub fn from_pub_key_hash(pub_key_hash: PubKeyHash) -> Self {
        let mut payload = [0u8; ADDRESS_PAYLOAD_LEN];
        payload[0] = ADDRESS_VERSION;
        payload[1..VERSIONED_LEN].copy_from_slice(&pub_key_hash);
        let check = checksum(&payload[..VERSIONED_LEN]);
        payload[VERSIONED_LEN..].copy_from_slice(&check);

        Address {
            encoded: codec::base58_encode(&payload),
            pub_key_hash,
        }
    }

    pub fn from_public_key(public_key: &RawPublicKey) -> Self {
        Self::from_pub_key_hash(hash_pub_key(public_key.as_bytes()))
    }

    pub fn pub_key_hash(&self) -> &PubKeyHash {
        &self.pub_key_hash
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = codec::base58_decode(s).map_err(|e: CodecError| {
            CryptoError::InvalidAddress(format!("{}: {}", s, e))
        })?;

        let payload: [u8; ADDRESS_PAYLOAD_LEN] = decoded.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidAddress(format!(
                "{}: expected {} bytes, got {}",
                s,
                ADDRESS_PAYLOAD_LEN,
                decoded.len()
            ))
        })?;

        if payload[0] != ADDRESS_VERSION {
            return Err(CryptoError::InvalidAddress(format!(
                "{}: unknown version {:#04x}",
                s, payload[0]
            )));
        }

        let (versioned, check) = payload.split_at(VERSIONED_LEN);
        if checksum(versioned) != check {
            return Err(CryptoError::ChecksumMismatch(s.to_string()));
        }

        let mut pub_key_hash = [0u8; PUB_KEY_HASH_LEN];
        pub_key_hash.copy_from_slice(&versioned[1..]);

        Ok(Address {
            encoded: s.to_string(),
            pub_key_hash,
        })
    }
}
