//! The core part of the picture ledger
//! The rules of the chain:
//!     - blocks are numbered from 1 and only ever appended
//!     - every block links to its predecessor through `previous_hash`
//!     - every mined block carries a proof found from its predecessor's proof
//!     - a block is kept in memory only once the store has accepted it
use crate::block::{Block, BlockFields};
use crate::errors::{LedgerError, StorageError};
use crate::pow::{find_proof_cancellable, find_proof_parallel};
use crate::storage::{BlockMetadata, Storage};
use crate::types::{HashAlgorithm, HashString};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of [`Blockchain::validate_chain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainValidation {
    pub valid: bool,
    pub message: String,
    /// first block whose `previous_hash` does not match its predecessor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_block: Option<u64>,
}

/// Outcome of a content hash search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Found {
        block_index: u64,
        algorithm: HashAlgorithm,
    },
    NotFound,
}

impl SearchOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, SearchOutcome::Found { .. })
    }

    pub fn block_index(&self) -> Option<u64> {
        match self {
            SearchOutcome::Found { block_index, .. } => Some(*block_index),
            SearchOutcome::NotFound => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            SearchOutcome::Found { algorithm, .. } => {
                format!("Picture hash found using {} in block", algorithm.label())
            }
            SearchOutcome::NotFound => "Picture hash not found in the blockchain".to_string(),
        }
    }
}

/// The append-only chain, mirrored to a [`Storage`].
///
/// Mutating operations take `&mut self`, so a shared ledger has to sit behind a
/// lock and block creation is serialized.
pub struct Blockchain<S: Storage> {
    blockchain: Vec<Block>, // ascending by index, index == position + 1
    storage: S,
    mining_pool: Option<Arc<rayon::ThreadPool>>,
    cancel: Arc<AtomicBool>,
}

impl<S: Storage> Blockchain<S> {
    /// Load the chain from `storage`, creating and storing the genesis block
    /// if the store is empty.
    ///
    /// Stored blocks must be numbered `1..=n` without gaps.
    pub fn open(storage: S) -> Result<Self, LedgerError> {
        let blockchain = storage.load_all_blocks()?;
        for (position, block) in blockchain.iter().enumerate() {
            let expected = position as u64 + 1;
            if block.index() != expected {
                error!("stored block at position {} has index {}", expected, block.index());
                return Err(StorageError::IndexGap {
                    expected,
                    found: block.index(),
                }
                .into());
            }
        }

        let mut chain = Self {
            blockchain,
            storage,
            mining_pool: None,
            cancel: Arc::new(AtomicBool::new(false)),
        };
        if chain.blockchain.is_empty() {
            let genesis = BlockFields::genesis().seal(HashAlgorithm::Sha256);
            chain.append(genesis)?;
            info!("created genesis block");
        } else {
            info!("loaded {} block(s)", chain.blockchain.len());
        }
        Ok(chain)
    }

    /// Mine with a partitioned search on `pool` instead of a single thread.
    /// The proofs found are the same.
    pub fn with_mining_pool(mut self, pool: Arc<rayon::ThreadPool>) -> Self {
        self.mining_pool = Some(pool);
        self
    }

    /// Flag that aborts a running proof of work search once set.
    ///
    /// An aborted [`Blockchain::create_block`] returns
    /// [`LedgerError::MiningCancelled`] and leaves the chain untouched. The flag
    /// is never cleared, so every later search is aborted too.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Mine and append a block carrying `picture_hash`, its `block_hash`
    /// computed with `algorithm`.
    pub fn create_block(
        &mut self,
        picture_hash: Vec<HashString>,
        algorithm: HashAlgorithm,
    ) -> Result<&Block, LedgerError> {
        let previous_block = self
            .get_last_block()
            .ok_or(LedgerError::ChainNotBootstrapped { index: 0 })?;
        if previous_block.proof() == 0 {
            return Err(LedgerError::ChainNotBootstrapped {
                index: previous_block.index(),
            });
        }
        let previous_proof = previous_block.proof();
        let previous_hash = previous_block.block_hash().to_string();

        let proof = match &self.mining_pool {
            Some(pool) => find_proof_parallel(previous_proof, pool, &self.cancel),
            None => find_proof_cancellable(previous_proof, &self.cancel),
        }
        .ok_or(LedgerError::MiningCancelled)?;
        let block = BlockFields {
            index: self.blockchain.len() as u64 + 1,
            timestamp: crate::block::now(),
            proof,
            previous_hash,
            picture_hash,
        }
        .seal(algorithm);
        debug!("mined block {} with proof {} ({})", block.index(), proof, algorithm);
        self.append(block)
    }

    /// durable write first, the in-memory chain only grows once it succeeded
    fn append(&mut self, block: Block) -> Result<&Block, LedgerError> {
        self.storage.append_block(&block)?;
        self.blockchain.push(block);
        Ok(&self.blockchain[self.blockchain.len() - 1])
    }

    /// store how long it took to produce block `block_index`
    pub fn record_block_metadata(
        &mut self,
        block_index: u64,
        elapsed: Duration,
        algorithm: HashAlgorithm,
    ) -> Result<BlockMetadata, LedgerError> {
        let record = BlockMetadata {
            block_index,
            elapsed_time: elapsed.as_secs_f64(),
            algorithm,
        };
        self.storage.append_metadata(&record)?;
        Ok(record)
    }

    pub fn block_metadata(&self) -> Result<Vec<BlockMetadata>, LedgerError> {
        Ok(self.storage.load_metadata()?)
    }

    /// Check that every block links to its predecessor's `block_hash`.
    ///
    /// Block hashes are not recomputed, see [`Blockchain::audit_block_hashes`].
    pub fn validate_chain(&self) -> ChainValidation {
        if self.blockchain.len() < 2 {
            return ChainValidation {
                valid: true,
                message: "Blockchain is valid (only genesis block exists).".to_string(),
                invalid_block: None,
            };
        }

        for pair in self.blockchain.windows(2) {
            let (previous_block, current_block) = (&pair[0], &pair[1]);
            if current_block.previous_hash() != previous_block.block_hash() {
                warn!("block {} has mismatched previous_hash", current_block.index());
                return ChainValidation {
                    valid: false,
                    message: format!(
                        "Blockchain is invalid: Block {} has mismatched previous_hash.",
                        current_block.index()
                    ),
                    invalid_block: Some(current_block.index()),
                };
            }
        }

        ChainValidation {
            valid: true,
            message: "Blockchain is valid.".to_string(),
            invalid_block: None,
        }
    }

    /// Find the most recent block holding either content hash.
    ///
    /// Within a block `sha256_hash` is looked for first; a newer block always
    /// wins over an older one.
    pub fn search_picture_hash(&self, sha256_hash: &str, blake2_hash: &str) -> SearchOutcome {
        let targets = [
            (HashAlgorithm::Sha256, sha256_hash),
            (HashAlgorithm::Blake2b, blake2_hash),
        ];
        for block in self.blockchain.iter().rev() {
            for (algorithm, target) in targets {
                if block.picture_hash().iter().any(|hash| hash == target) {
                    return SearchOutcome::Found {
                        block_index: block.index(),
                        algorithm,
                    };
                }
            }
        }
        SearchOutcome::NotFound
    }

    /// hash `payload` with every supported algorithm and search for it
    pub fn search_payload(&self, payload: &[u8]) -> SearchOutcome {
        self.search_picture_hash(
            &HashAlgorithm::Sha256.digest_hex(payload),
            &HashAlgorithm::Blake2b.digest_hex(payload),
        )
    }

    /// Indices of the blocks whose `block_hash` is not the digest of their
    /// own fields under any supported algorithm.
    pub fn audit_block_hashes(&self) -> Vec<u64> {
        self.blockchain
            .iter()
            .filter(|block| {
                !HashAlgorithm::ALL
                    .iter()
                    .any(|algorithm| block.digest(*algorithm) == block.block_hash())
            })
            .map(Block::index)
            .collect()
    }

    /// get the block by its 1-based index
    pub fn get_block(&self, index: u64) -> Option<&Block> {
        let position = usize::try_from(index.checked_sub(1)?).ok()?;
        self.blockchain.get(position)
    }

    /// get the latest block of the blockchain
    pub fn get_last_block(&self) -> Option<&Block> {
        self.blockchain.last()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blockchain
    }

    pub fn len(&self) -> usize {
        self.blockchain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blockchain.is_empty()
    }

    /// flush and release the store
    pub fn close(mut self) -> Result<(), LedgerError> {
        self.storage.flush()?;
        Ok(())
    }
}
