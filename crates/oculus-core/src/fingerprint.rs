//! Content fingerprints used as cache keys.
//!
//! A fingerprint is the SHA-256 digest of the raw uploaded bytes. The filename
//! never contributes, so identical content under different names shares a key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const DIGEST_LEN: usize = 32;

#[derive(Error, Debug, PartialEq)]
pub enum FingerprintError {
    #[error("fingerprint must be {expected} hex characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("fingerprint is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// SHA-256 digest of uploaded content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fingerprint([u8; DIGEST_LEN]);

impl Fingerprint {
    /// Fingerprint of `content`. Defined for every input, including empty.
    pub fn of(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hasher.finalize().into())
    }

    /// Lowercase hex form (64 characters), the representation used as a store key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != DIGEST_LEN * 2 {
            return Err(FingerprintError::InvalidLength {
                expected: DIGEST_LEN * 2,
                actual: s.len(),
            });
        }
        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_hex()
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = FingerprintError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let a = Fingerprint::of(b"the same bytes");
        let b = Fingerprint::of(b"the same bytes");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            Fingerprint::of(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_fingerprint_empty_input() {
        let empty = Fingerprint::of(&[]);
        assert_eq!(
            empty.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(empty, Fingerprint::of(&[0]));
    }

    #[test]
    fn test_fingerprint_distinct_inputs_differ() {
        assert_ne!(Fingerprint::of(b"a"), Fingerprint::of(b"b"));
        assert_ne!(Fingerprint::of(b"ab"), Fingerprint::of(b"ba"));
    }

    #[test]
    fn test_fingerprint_hex_roundtrip() {
        let fp = Fingerprint::of(b"roundtrip");
        let parsed: Fingerprint = fp.to_hex().parse().unwrap();
        assert_eq!(parsed, fp);
        assert_eq!(fp.to_hex().len(), 64);
    }

    #[test]
    fn test_fingerprint_errors_compare_by_value() {
        assert_eq!(
            "00".parse::<Fingerprint>().unwrap_err(),
            FingerprintError::InvalidLength { expected: 64, actual: 2 }
        );
        assert_eq!(
            "g".repeat(64).parse::<Fingerprint>().unwrap_err(),
            FingerprintError::InvalidHex(hex::FromHexError::InvalidHexCharacter { c: 'g', index: 0 })
        );
    }

    #[test]
    fn test_fingerprint_rejects_bad_hex() {
        assert!(matches!(
            "abc".parse::<Fingerprint>(),
            Err(FingerprintError::InvalidLength { expected: 64, actual: 3 })
        ));
        let not_hex = "z".repeat(64);
        assert!(matches!(
            not_hex.parse::<Fingerprint>(),
            Err(FingerprintError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_fingerprint_serializes_as_hex_string() {
        let fp = Fingerprint::of(b"json");
        let json = serde_json::to_value(fp).unwrap();
        assert_eq!(json, serde_json::Value::String(fp.to_hex()));
    }
}
