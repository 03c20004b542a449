//! Durable storage for the chain and for block timing metadata.
//!
//! # Database Structure
//!
//! [`SledStorage`] keeps two trees:
//! - `blocks`: block index (u64, big-endian) -> JSON block record
//! - `block_metadata`: block index (u64, big-endian) ++ sequence id (u64,
//!   big-endian) -> JSON [`BlockMetadata`] record
//!
//! Big-endian keys make sled's ordered iteration ascend by block index.
use crate::block::Block;
use crate::errors::StorageError;
use crate::types::HashAlgorithm;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const BLOCKS_TREE: &str = "blocks";
const METADATA_TREE: &str = "block_metadata";

/// Timing record written after each mined block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub block_index: u64,
    /// seconds spent hashing the payloads and mining the block
    pub elapsed_time: f64,
    pub algorithm: HashAlgorithm,
}

/// The calls the ledger makes on its durable store.
///
/// Writes must either be durable when they return `Ok` or fail with an error;
/// nothing is ever dropped silently.
pub trait Storage {
    /// every stored block, ascending by index
    fn load_all_blocks(&self) -> Result<Vec<Block>, StorageError>;

    fn append_block(&mut self, block: &Block) -> Result<(), StorageError>;

    fn append_metadata(&mut self, record: &BlockMetadata) -> Result<(), StorageError>;

    /// every timing record, ascending by block index
    fn load_metadata(&self) -> Result<Vec<BlockMetadata>, StorageError>;

    fn flush(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// sled-backed store
pub struct SledStorage {
    db: sled::Db,
    blocks: sled::Tree,
    metadata: sled::Tree,
}

impl SledStorage {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        debug!("opening ledger database at {}", path.as_ref().display());
        Self::from_db(sled::open(path)?)
    }

    /// database removed when the store is dropped
    pub fn temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        let blocks = db.open_tree(BLOCKS_TREE)?;
        let metadata = db.open_tree(METADATA_TREE)?;
        Ok(Self { db, blocks, metadata })
    }
}

fn index_from_key(key: &[u8], tree: &'static str) -> Result<u64, StorageError> {
    let bytes: [u8; 8] = key
        .get(..8)
        .and_then(|prefix| prefix.try_into().ok())
        .ok_or(StorageError::CorruptedKey { tree })?;
    Ok(u64::from_be_bytes(bytes))
}

impl Storage for SledStorage {
    fn load_all_blocks(&self) -> Result<Vec<Block>, StorageError> {
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for entry in self.blocks.iter() {
            let (key, value) = entry?;
            let block: Block = serde_json::from_slice(&value)?;
            if index_from_key(&key, BLOCKS_TREE)? != block.index() {
                return Err(StorageError::CorruptedKey { tree: BLOCKS_TREE });
            }
            blocks.push(block);
        }
        debug!("loaded {} block(s) from the database", blocks.len());
        Ok(blocks)
    }

    fn append_block(&mut self, block: &Block) -> Result<(), StorageError> {
        trace!("storing block {}", block.index());
        let value = serde_json::to_vec(block)?;
        let key = block.index().to_be_bytes();
        if self
            .blocks
            .compare_and_swap(key, None as Option<&[u8]>, Some(value))?
            .is_err()
        {
            return Err(StorageError::DuplicateBlock(block.index()));
        }
        self.db.flush()?;
        Ok(())
    }

    fn append_metadata(&mut self, record: &BlockMetadata) -> Result<(), StorageError> {
        trace!("storing metadata of block {}", record.block_index);
        let mut key = Vec::with_capacity(16);
        key.extend_from_slice(&record.block_index.to_be_bytes());
        key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());
        self.metadata.insert(key, serde_json::to_vec(record)?)?;
        self.db.flush()?;
        Ok(())
    }

    fn load_metadata(&self) -> Result<Vec<BlockMetadata>, StorageError> {
        self.metadata
            .iter()
            .values()
            .map(|value| -> Result<BlockMetadata, StorageError> {
                Ok(serde_json::from_slice(&value?)?)
            })
            .collect()
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    blocks: Vec<Block>,
    metadata: Vec<BlockMetadata>,
    fail_writes: bool,
}

/// Vector-backed store. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// store pre-populated with `blocks`, which are kept as given
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        let storage = Self::default();
        storage.state().blocks = blocks;
        storage
    }

    /// make every following write fail, or succeed again
    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStorage {
    fn load_all_blocks(&self) -> Result<Vec<Block>, StorageError> {
        let mut blocks = self.state().blocks.clone();
        blocks.sort_by_key(|block| block.index());
        Ok(blocks)
    }

    fn append_block(&mut self, block: &Block) -> Result<(), StorageError> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(StorageError::Rejected(format!("block {}", block.index())));
        }
        if state.blocks.iter().any(|stored| stored.index() == block.index()) {
            return Err(StorageError::DuplicateBlock(block.index()));
        }
        state.blocks.push(block.clone());
        Ok(())
    }

    fn append_metadata(&mut self, record: &BlockMetadata) -> Result<(), StorageError> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(StorageError::Rejected(format!(
                "metadata of block {}",
                record.block_index
            )));
        }
        state.metadata.push(record.clone());
        Ok(())
    }

    fn load_metadata(&self) -> Result<Vec<BlockMetadata>, StorageError> {
        let mut metadata = self.state().metadata.clone();
        metadata.sort_by_key(|record| record.block_index);
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockFields, GENESIS_PREVIOUS_HASH};

    fn block(index: u64) -> Block {
        BlockFields {
            index,
            timestamp: crate::block::now(),
            proof: index,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            picture_hash: vec![format!("{:064x}", index)],
        }
        .seal(HashAlgorithm::Sha256)
    }

    #[test]
    fn test_sled_blocks_load_in_index_order() {
        let mut storage = SledStorage::temporary().unwrap();
        for index in [3, 1, 2, 256] {
            storage.append_block(&block(index)).unwrap();
        }
        let indices: Vec<u64> = storage
            .load_all_blocks()
            .unwrap()
            .iter()
            .map(Block::index)
            .collect();
        assert_eq!(indices, vec![1, 2, 3, 256]);
    }

    #[test]
    fn test_sled_round_trips_block_record() {
        let mut storage = SledStorage::temporary().unwrap();
        let stored = block(1);
        storage.append_block(&stored).unwrap();
        assert_eq!(storage.load_all_blocks().unwrap(), vec![stored]);
    }

    #[test]
    fn test_sled_refuses_duplicate_index() {
        let mut storage = SledStorage::temporary().unwrap();
        storage.append_block(&block(1)).unwrap();
        assert!(matches!(
            storage.append_block(&block(1)),
            Err(StorageError::DuplicateBlock(1))
        ));
    }

    #[test]
    fn test_sled_metadata_ascends_by_block_index() {
        let mut storage = SledStorage::temporary().unwrap();
        for (index, elapsed) in [(3, 0.3), (2, 0.2), (2, 0.25)] {
            storage
                .append_metadata(&BlockMetadata {
                    block_index: index,
                    elapsed_time: elapsed,
                    algorithm: HashAlgorithm::Blake2b,
                })
                .unwrap();
        }
        let loaded: Vec<(u64, f64)> = storage
            .load_metadata()
            .unwrap()
            .into_iter()
            .map(|record| (record.block_index, record.elapsed_time))
            .collect();
        assert_eq!(loaded, vec![(2, 0.2), (2, 0.25), (3, 0.3)]);
    }

    #[test]
    fn test_memory_clones_share_contents() {
        let mut storage = MemoryStorage::new();
        let view = storage.clone();
        storage.append_block(&block(1)).unwrap();
        assert_eq!(view.load_all_blocks().unwrap().len(), 1);
    }

    #[test]
    fn test_memory_failing_writes() {
        let mut storage = MemoryStorage::new();
        storage.set_fail_writes(true);
        assert!(matches!(
            storage.append_block(&block(1)),
            Err(StorageError::Rejected(_))
        ));
        assert!(storage.load_all_blocks().unwrap().is_empty());
    }
}
