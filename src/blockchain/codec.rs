use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// A 32-byte SHA-256 digest
pub type Hash = [u8; 32];

/// Errors that can occur while encoding or decoding bytes
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Corrupt data: {0}")]
    Deserialize(String),

    #[error("Invalid base58 string: {0}")]
    Base58(String),
}

/// Fixed-width little-endian integers, no size limit, no trailing bytes
fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encodes a value into its canonical byte form
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    options()
        .serialize(value)
        .map_err(|e| CodecError::Serialize(e.to_string()))
}

/// Decodes a value previously produced by [`encode`]
///
/// Truncated input and trailing bytes are both treated as corruption.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    options()
        .deserialize(bytes)
        .map_err(|e| CodecError::Deserialize(e.to_string()))
}

/// Single SHA-256 over `data`
pub fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

/// Encodes bytes with the Bitcoin base58 alphabet
pub fn base58_encode(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}

/// Decodes a base58 string, rejecting characters outside the alphabet
pub fn base58_decode(input: &str) -> Result<Vec<u8>, CodecError> {
    bs58::decode(input)
        .into_vec()
        .map_err(|e| CodecError::Base58(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base58_known_vectors() {
        assert_eq!(base58_encode(b"hello world"), "StV1DL6CwTryKyV");
        assert_eq!(base58_encode(&[0, 0, 1]), "112");
        assert_eq!(base58_decode("112").unwrap(), vec![0, 0, 1]);
    }

    #[test]
    fn test_base58_rejects_ambiguous_characters() {
        for bad in ["0abc", "Oabc", "Iabc", "labc"] {
            assert!(matches!(base58_decode(bad), Err(CodecError::Base58(_))), "{}", bad);
        }
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = encode(&(7u64, vec![1u8, 2, 3])).unwrap();
        bytes.push(0xff);

        let result = decode::<(u64, Vec<u8>)>(&bytes);
        assert!(matches!(result, Err(CodecError::Deserialize(_))));
    }

    #[test]
    fn test_decode_rejects_truncated_input() {
        let bytes = encode(&(7u64, vec![1u8, 2, 3])).unwrap();
        let result = decode::<(u64, Vec<u8>)>(&bytes[..bytes.len() - 1]);
        assert!(result.is_err());
    }
}
