//! Implementation of a picture ledger: an append-only, proof-of-work hash
//! chain anchoring content hashes of pictures.
//!
//! - [`block`]: the block entity and its canonical hash
//! - [`pow`]: the proof of work search
//! - [`blockchain`]: the chain, block creation, validation and search
//! - [`batch`]: chunked (optionally parallel) hashing of payload batches
//! - [`storage`]: durable store for blocks and timing metadata
//! - [`server`]: HTTP routes over the chain

pub mod batch;
pub mod block;
pub mod blockchain;
pub mod config;
pub mod errors;
pub mod pow;
pub mod server;
pub mod storage;
pub mod types;

pub use block::{Block, BlockFields};
pub use blockchain::{Blockchain, ChainValidation, SearchOutcome};
pub use errors::{LedgerError, StorageError};
pub use types::HashAlgorithm;
