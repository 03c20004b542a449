use crate::types::{blake2b_hex, sha256_hex, HashAlgorithm, HashString};
use chrono::{Local, NaiveDateTime, SubsecRound, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::ser::{Formatter, Serializer};
use std::fmt::Display;
use std::io::{self, Write};

/// Version of the canonical byte form hashed into `block_hash`.
///
/// Version 1 is a JSON object with sorted keys, `", "` and `": "` separators,
/// integers as JSON numbers and every other value as an ASCII-escaped JSON
/// string. Any change here invalidates every stored `block_hash`.
pub const CANONICAL_FORMAT_VERSION: u8 = 1;

/// `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// seed proof of the genesis block
pub const GENESIS_PROOF: u64 = 1;

/// The fields a block is built from: everything except its own hash.
///
/// # Fields
///
/// * `index` - 1-based position of the block in the chain.
/// * `timestamp` - local wall-clock time the block was built, microsecond precision.
/// * `proof` - nonce found by the proof of work, `1` for the genesis block.
/// * `previous_hash` - `block_hash` of the preceding block, `"0"` for the genesis block.
/// * `picture_hash` - content hashes of every payload committed in this block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFields {
    pub index: u64,
    pub timestamp: NaiveDateTime,
    pub proof: u64,
    pub previous_hash: HashString,
    pub picture_hash: Vec<HashString>,
}

impl BlockFields {
    /// fields of the genesis block, stamped now
    pub fn genesis() -> Self {
        Self {
            index: 1,
            timestamp: now(),
            proof: GENESIS_PROOF,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            picture_hash: Vec::new(),
        }
    }

    /// seal the fields into a block whose hash is computed with `algorithm`
    pub fn seal(self, algorithm: HashAlgorithm) -> Block {
        Block::new(self, algorithm)
    }
}

/// current local time truncated to the precision kept by the canonical form
pub fn now() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(6)
}

/// One ledger entry. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Block {
    pub(crate) index: u64,
    pub(crate) timestamp: NaiveDateTime,
    pub(crate) proof: u64,
    pub(crate) previous_hash: HashString,
    pub(crate) picture_hash: Vec<HashString>,
    pub(crate) block_hash: HashString,
}

impl Block {
    /// build a block and compute its `block_hash` with `algorithm`
    pub fn new(fields: BlockFields, algorithm: HashAlgorithm) -> Self {
        let mut block = Self::with_hash(fields, String::new());
        block.block_hash = block.digest(algorithm);
        block
    }

    /// rebuild a block whose hash is already known, e.g. when loading from the store
    pub fn with_hash(fields: BlockFields, block_hash: HashString) -> Self {
        Self {
            index: fields.index,
            timestamp: fields.timestamp.trunc_subsecs(6),
            proof: fields.proof,
            previous_hash: fields.previous_hash,
            picture_hash: fields.picture_hash,
            block_hash,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn proof(&self) -> u64 {
        self.proof
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn picture_hash(&self) -> &[HashString] {
        &self.picture_hash
    }

    pub fn block_hash(&self) -> &str {
        &self.block_hash
    }

    pub fn fields(&self) -> BlockFields {
        BlockFields {
            index: self.index,
            timestamp: self.timestamp,
            proof: self.proof,
            previous_hash: self.previous_hash.clone(),
            picture_hash: self.picture_hash.clone(),
        }
    }

    /// The canonical byte form of every field except `block_hash`.
    ///
    /// `{"index": 2, "picture_hash": ["aa", "bb"], "previous_hash": "..", "proof": 632238, "timestamp": "2025-01-30 15:00:41.000001"}`
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let canonical = Canonical {
            index: self.index,
            picture_hash: &self.picture_hash,
            previous_hash: &self.previous_hash,
            proof: self.proof,
            timestamp: canonical_timestamp(&self.timestamp),
        };
        let mut out = Vec::with_capacity(128 + self.picture_hash.len() * 132);
        let mut serializer = Serializer::with_formatter(&mut out, CanonicalFormatter);
        canonical
            .serialize(&mut serializer)
            .expect("integers and strings always serialize into a Vec");
        out
    }

    /// SHA-256 of the canonical form, lowercase hex
    pub fn sha256(&self) -> HashString {
        sha256_hex(&self.canonical_bytes())
    }

    /// BLAKE2b-512 of the canonical form, lowercase hex
    pub fn blake2b(&self) -> HashString {
        blake2b_hex(&self.canonical_bytes())
    }

    pub fn digest(&self, algorithm: HashAlgorithm) -> HashString {
        match algorithm {
            HashAlgorithm::Sha256 => self.sha256(),
            HashAlgorithm::Blake2b => self.blake2b(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 1 && self.previous_hash == GENESIS_PREVIOUS_HASH
    }
}

/// `YYYY-MM-DD HH:MM:SS[.ffffff]`, the fraction is omitted when it is zero
fn canonical_timestamp(timestamp: &NaiveDateTime) -> String {
    if timestamp.nanosecond() == 0 {
        timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        timestamp.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }
}

/// Hashed view of a block, fields in key order.
#[derive(Serialize)]
struct Canonical<'a> {
    index: u64,
    picture_hash: &'a [HashString],
    previous_hash: &'a str,
    proof: u64,
    timestamp: String,
}

/// `", "` and `": "` separators, every character outside printable ASCII
/// written as `\uXXXX` UTF-16 escapes.
struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        for c in fragment.chars() {
            if matches!(c, ' '..='~') {
                writer.write_all(&[c as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Block[{}]:", self.index)?;
        writeln!(f, "\ttimestamp: {}", canonical_timestamp(&self.timestamp))?;
        writeln!(f, "\tproof: {}", self.proof)?;
        writeln!(f, "\tprevious_hash: {}", self.previous_hash)?;
        writeln!(f, "\tblock_hash: {}", self.block_hash)?;
        writeln!(f, "\tpicture_hash: [")?;
        for hash in self.picture_hash.iter() {
            writeln!(f, "\t\t{}", hash)?;
        }
        writeln!(f, "\t]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(micros: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 30)
            .unwrap()
            .and_hms_micro_opt(15, 0, 40, micros)
            .unwrap()
    }

    fn genesis_fields() -> BlockFields {
        BlockFields {
            index: 1,
            timestamp: at(123456),
            proof: 1,
            previous_hash: "0".to_string(),
            picture_hash: vec![],
        }
    }

    #[test]
    fn test_canonical_bytes() {
        let block = genesis_fields().seal(HashAlgorithm::Sha256);
        assert_eq!(
            String::from_utf8(block.canonical_bytes()).unwrap(),
            r#"{"index": 1, "picture_hash": [], "previous_hash": "0", "proof": 1, "timestamp": "2025-01-30 15:00:40.123456"}"#
        );
    }

    #[test]
    fn test_block_sha256() {
        let block = genesis_fields().seal(HashAlgorithm::Sha256);
        assert_eq!(
            block.block_hash(),
            "8d424782d6ebc16ed897e7dd3c13fca2033232d694fadcf436f0c913e609846b"
        );
        assert_eq!(block.sha256(), block.sha256());
    }

    #[test]
    fn test_block_blake2b() {
        let block = genesis_fields().seal(HashAlgorithm::Blake2b);
        assert_eq!(
            block.block_hash(),
            "8318830104328dfc464c54921db3c9292bbb57c3c17ff12e39e2c52496bd9a24\
             9565e22358fa3c06d643ea5cade6f5c4be4ebfa5a430f09403643304279ddcb8"
        );
        assert_eq!(block.block_hash().len(), 128);
    }

    #[test]
    fn test_block_with_pictures() {
        let block = BlockFields {
            index: 2,
            timestamp: NaiveDate::from_ymd_opt(2025, 1, 30)
                .unwrap()
                .and_hms_micro_opt(15, 0, 41, 1)
                .unwrap(),
            proof: 632238,
            previous_hash: "abc".to_string(),
            picture_hash: vec!["aa".to_string(), "bb".to_string()],
        }
        .seal(HashAlgorithm::Sha256);
        assert_eq!(
            block.block_hash(),
            "fb54e20d251b601fd3fd46e9d08a435c4ad7991cdf82b7a71e8f50fa6e602f80"
        );
    }

    #[test]
    fn test_whole_second_timestamp_drops_fraction() {
        let block = BlockFields {
            timestamp: at(0),
            ..genesis_fields()
        }
        .seal(HashAlgorithm::Sha256);
        let canonical = String::from_utf8(block.canonical_bytes()).unwrap();
        assert!(canonical.ends_with(r#""timestamp": "2025-01-30 15:00:40"}"#));
    }

    #[test]
    fn test_every_field_changes_digest() {
        let base = genesis_fields();
        let original = base.clone().seal(HashAlgorithm::Sha256);
        let edits = vec![
            BlockFields { index: 2, ..base.clone() },
            BlockFields { timestamp: at(123457), ..base.clone() },
            BlockFields { proof: 2, ..base.clone() },
            BlockFields { previous_hash: "1".to_string(), ..base.clone() },
            BlockFields { picture_hash: vec!["aa".to_string()], ..base.clone() },
        ];
        for edited in edits {
            assert_ne!(edited.seal(HashAlgorithm::Sha256).block_hash(), original.block_hash());
        }
    }

    #[test]
    fn test_strings_are_ascii_escaped() {
        let block = BlockFields {
            previous_hash: "a\"b\\c\nd\t\u{1f}\u{7f}é😀".to_string(),
            ..genesis_fields()
        }
        .seal(HashAlgorithm::Sha256);
        let canonical = String::from_utf8(block.canonical_bytes()).unwrap();
        assert!(canonical.is_ascii());
        assert!(canonical.contains(
            r#""previous_hash": "a\"b\\c\nd\t\u001f\u007f\u00e9\ud83d\ude00", "proof""#
        ));
    }

    #[test]
    fn test_with_hash_keeps_given_hash() {
        let block = Block::with_hash(genesis_fields(), "deadbeef".to_string());
        assert_eq!(block.block_hash(), "deadbeef");
        assert!(block.is_genesis());
        assert_eq!(block.fields(), genesis_fields());
    }

    #[test]
    fn test_block_record_rejects_unknown_fields() {
        let block = genesis_fields().seal(HashAlgorithm::Sha256);
        let mut value = serde_json::to_value(&block).unwrap();
        let restored: Block = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(restored, block);

        value["nonce"] = serde_json::json!(5);
        assert!(serde_json::from_value::<Block>(value).is_err());
    }
}
