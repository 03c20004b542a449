//! Proof of work: find the smallest nonce `n >= 1` such that
//! `sha256(str(n² - p²))` starts with [`DIFFICULTY_PREFIX`], where `p` is the
//! proof of the previous block.
//!
//! The digest is always SHA-256, whatever algorithm the block itself is hashed with.
use crate::types::sha256_hex;
use log::trace;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// leading hex characters a proof digest must start with
pub const DIFFICULTY_PREFIX: &str = "00000";

/// how many nonces a cancellable search tries between two flag checks
pub const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// nonces scanned by one worker per round of the parallel search
const PARALLEL_WINDOW: u64 = 1 << 14;

/// Digest checked against the difficulty prefix.
///
/// Both squares fit in `u128` for any `u64` proof; the difference is written
/// in decimal with a leading `-` when it is negative.
pub fn proof_digest(previous_proof: u64, proof: u64) -> String {
    let square = (proof as u128).pow(2);
    let previous_square = (previous_proof as u128).pow(2);
    let operation = if square >= previous_square {
        (square - previous_square).to_string()
    } else {
        format!("-{}", previous_square - square)
    };
    sha256_hex(operation.as_bytes())
}

pub fn is_valid_proof(previous_proof: u64, proof: u64) -> bool {
    proof_digest(previous_proof, proof).starts_with(DIFFICULTY_PREFIX)
}

/// Search nonces upward from 1 until one satisfies the difficulty predicate.
///
/// No upper bound: the expected cost is about 16^5 digests.
pub fn find_proof(previous_proof: u64) -> u64 {
    let mut nonce = 1u64;
    while !is_valid_proof(previous_proof, nonce) {
        nonce += 1;
    }
    trace!("found proof {} after previous proof {}", nonce, previous_proof);
    nonce
}

/// Same search as [`find_proof`], giving up with `None` once `cancel` is set.
///
/// The flag is read every [`CANCEL_CHECK_INTERVAL`] nonces, so a search that is
/// never cancelled returns exactly what [`find_proof`] returns.
pub fn find_proof_cancellable(previous_proof: u64, cancel: &AtomicBool) -> Option<u64> {
    let mut nonce = 1u64;
    loop {
        if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            trace!("proof search cancelled at nonce {}", nonce);
            return None;
        }
        if is_valid_proof(previous_proof, nonce) {
            return Some(nonce);
        }
        nonce += 1;
    }
}

/// Partitioned search on `pool`.
///
/// Every round hands each worker its own window of consecutive nonces and
/// keeps the smallest winner, so the result equals [`find_proof`]. `cancel` is
/// read before every round.
pub fn find_proof_parallel(
    previous_proof: u64,
    pool: &rayon::ThreadPool,
    cancel: &AtomicBool,
) -> Option<u64> {
    let workers = pool.current_num_threads().max(1) as u64;
    let mut round_start = 1u64;
    loop {
        if cancel.load(Ordering::Relaxed) {
            trace!("parallel proof search cancelled at nonce {}", round_start);
            return None;
        }
        let winner = pool.install(|| {
            (0..workers)
                .into_par_iter()
                .filter_map(|worker| {
                    let start = round_start + worker * PARALLEL_WINDOW;
                    (start..start + PARALLEL_WINDOW)
                        .find(|nonce| is_valid_proof(previous_proof, *nonce))
                })
                .min()
        });
        if let Some(nonce) = winner {
            trace!("found proof {} after previous proof {} with {} workers", nonce, previous_proof, workers);
            return Some(nonce);
        }
        round_start += workers * PARALLEL_WINDOW;
    }
}
