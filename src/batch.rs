//! Hash batches of payloads and commit them to the chain, [`CHUNK_SIZE`]
//! payloads per block.
use crate::blockchain::Blockchain;
use crate::errors::LedgerError;
use crate::storage::{BlockMetadata, Storage};
use crate::types::{HashAlgorithm, HashString, CHUNK_SIZE};
use log::{debug, info};
use rayon::prelude::*;
use std::time::Instant;

/// Computes content hashes, either one payload after the other or on a
/// bounded rayon pool. Both produce the same hashes in the same order.
pub struct BatchHasher {
    pool: Option<rayon::ThreadPool>,
}

impl BatchHasher {
    pub fn sequential() -> Self {
        Self { pool: None }
    }

    /// Hash on a pool of `workers` threads, or one per CPU when `None`.
    pub fn pooled(workers: Option<usize>) -> Result<Self, rayon::ThreadPoolBuildError> {
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("payload-hasher-{}", i));
        if let Some(workers) = workers {
            builder = builder.num_threads(workers);
        }
        let pool = builder.build()?;
        debug!("payload hashing pool with {} threads", pool.current_num_threads());
        Ok(Self { pool: Some(pool) })
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    /// One content hash per payload, in payload order.
    pub fn hash_chunk<P>(&self, chunk: &[P], algorithm: HashAlgorithm) -> Vec<HashString>
    where
        P: AsRef<[u8]> + Sync,
    {
        match &self.pool {
            Some(pool) => pool.install(|| {
                chunk
                    .par_iter()
                    .map(|payload| algorithm.digest_hex(payload.as_ref()))
                    .collect()
            }),
            None => chunk
                .iter()
                .map(|payload| algorithm.digest_hex(payload.as_ref()))
                .collect(),
        }
    }

    /// Commit `payloads` as consecutive blocks of at most [`CHUNK_SIZE`]
    /// content hashes, recording how long each block took.
    ///
    /// Chunks are committed strictly one after the other since each block
    /// links to the one before it. An empty batch commits nothing.
    pub fn commit<S, P>(
        &self,
        blockchain: &mut Blockchain<S>,
        payloads: &[P],
        algorithm: HashAlgorithm,
    ) -> Result<Vec<BlockMetadata>, LedgerError>
    where
        S: Storage,
        P: AsRef<[u8]> + Sync,
    {
        let mut timings = Vec::with_capacity(payloads.len().div_ceil(CHUNK_SIZE));
        for chunk in payloads.chunks(CHUNK_SIZE) {
            timings.push(self.commit_chunk(blockchain, chunk, algorithm)?);
        }
        info!(
            "committed {} payload(s) in {} block(s) with {}",
            payloads.len(),
            timings.len(),
            algorithm
        );
        Ok(timings)
    }

    /// Commit every payload in a single block, however many there are.
    pub fn commit_single<S, P>(
        &self,
        blockchain: &mut Blockchain<S>,
        payloads: &[P],
        algorithm: HashAlgorithm,
    ) -> Result<BlockMetadata, LedgerError>
    where
        S: Storage,
        P: AsRef<[u8]> + Sync,
    {
        if payloads.is_empty() {
            return Err(LedgerError::MalformedInput("no payloads to commit".to_string()));
        }
        self.commit_chunk(blockchain, payloads, algorithm)
    }

    fn commit_chunk<S, P>(
        &self,
        blockchain: &mut Blockchain<S>,
        chunk: &[P],
        algorithm: HashAlgorithm,
    ) -> Result<BlockMetadata, LedgerError>
    where
        S: Storage,
        P: AsRef<[u8]> + Sync,
    {
        let start = Instant::now();
        let picture_hash = self.hash_chunk(chunk, algorithm);
        let block_index = blockchain.create_block(picture_hash, algorithm)?.index();
        let elapsed = start.elapsed();
        info!(
            "block {} mined with {} content hash(es) in {:.3}s",
            block_index,
            chunk.len(),
            elapsed.as_secs_f64()
        );
        blockchain.record_block_metadata(block_index, elapsed, algorithm)
    }
}
