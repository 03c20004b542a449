use std::fmt;
use std::fmt::Formatter;
use std::str::FromStr;

use blake2::Blake2b512;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::LedgerError;

/// Number of payloads committed together in one block.
pub const CHUNK_SIZE: usize = 10;

/// Lowercase hex digest of a payload or of a block's canonical form
pub type HashString = String;

/// The content-hash algorithms a block or a payload can be hashed with.
///
/// On the wire they are spelled `sha256` and `blake2`; `blake2` is BLAKE2b
/// with a 512-bit output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HashAlgorithm {
    Sha256,
    Blake2b,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 2] = [HashAlgorithm::Sha256, HashAlgorithm::Blake2b];

    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Blake2b => "blake2",
        }
    }

    /// name used in human readable reports
    pub fn label(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Blake2b => "Blake2",
        }
    }

    /// hex digest of `data` under this algorithm
    pub fn digest_hex(&self, data: &[u8]) -> HashString {
        match self {
            HashAlgorithm::Sha256 => sha256_hex(data),
            HashAlgorithm::Blake2b => blake2b_hex(data),
        }
    }
}

pub fn sha256_hex(data: &[u8]) -> HashString {
    hex::encode(Sha256::digest(data))
}

pub fn blake2b_hex(data: &[u8]) -> HashString {
    hex::encode(Blake2b512::digest(data))
}

impl FromStr for HashAlgorithm {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "blake2" => Ok(HashAlgorithm::Blake2b),
            _ => Err(LedgerError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl TryFrom<String> for HashAlgorithm {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HashAlgorithm> for String {
    fn from(value: HashAlgorithm) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
