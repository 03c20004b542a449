use thiserror::Error;

/// Failures reported by the ledger to its immediate caller.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Unsupported hash algorithm: {0}. Use \"sha256\" or \"blake2\"")]
    UnsupportedAlgorithm(String),

    #[error("Mine a block first to establish proof of work (block {index} has no proof)")]
    ChainNotBootstrapped { index: u64 },

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StorageError),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Proof of work search was cancelled, no block was added")]
    MiningCancelled,
}

/// Failures of the durable store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("block {0} is already stored")]
    DuplicateBlock(u64),

    #[error("corrupted record key in tree {tree}")]
    CorruptedKey { tree: &'static str },

    #[error("stored blocks are not contiguous: expected block {expected}, found block {found}")]
    IndexGap { expected: u64, found: u64 },

    #[error("store rejected the write: {0}")]
    Rejected(String),
}
