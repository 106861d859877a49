//! Pinned state anchors.
//!
//! A checkpoint ties a height to the digest the local chain must produce
//! there. Checkpoints catch silent local corruption: a node whose state
//! drifted (bad disk, interrupted write, faulty migration) would
//! otherwise gossip its wrong hashes as confidently as correct ones.
//! The first contradiction latches the whole set and state processing
//! stops rather than spreading the damage.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info};

use agora_core::{StateDigest, StateHash};

use crate::error::{MonitorError, Result};

/// One pinned height/digest pair.
#[derive(Debug)]
pub struct Checkpoint {
    height: u64,
    digest: StateDigest,
    passed: AtomicBool,
}

impl Checkpoint {
    /// Pin a digest at a height.
    pub const fn new(height: u64, digest: StateDigest) -> Self {
        Self {
            height,
            digest,
            passed: AtomicBool::new(false),
        }
    }

    /// The pinned height.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// The pinned digest.
    pub fn digest(&self) -> StateDigest {
        self.digest
    }

    /// Whether the local chain has reproduced this checkpoint.
    ///
    /// Flips to true at most once and never back.
    pub fn passed(&self) -> bool {
        self.passed.load(Ordering::SeqCst)
    }
}

/// The checkpoints for one chain, with a failure latch.
#[derive(Debug, Default)]
pub struct CheckpointSet {
    checkpoints: Vec<Checkpoint>,
    failed: AtomicBool,
}

impl CheckpointSet {
    /// Create from pinned anchors.
    pub fn new(checkpoints: Vec<Checkpoint>) -> Self {
        Self {
            checkpoints,
            failed: AtomicBool::new(false),
        }
    }

    /// An empty set that passes everything.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Check a locally produced hash against the anchors.
    ///
    /// The first mismatch latches the set and returns an integrity
    /// fault; every later call fails fast with [`MonitorError::Halted`]
    /// without looking at the hash.
    pub fn verify(&self, hash: &StateHash) -> Result<()> {
        if self.failed.load(Ordering::SeqCst) {
            return Err(MonitorError::Halted);
        }

        for checkpoint in &self.checkpoints {
            if checkpoint.height != hash.height {
                continue;
            }
            if checkpoint.digest == hash.digest {
                if !checkpoint.passed.swap(true, Ordering::SeqCst) {
                    info!(height = checkpoint.height, "checkpoint passed");
                }
            } else {
                self.failed.store(true, Ordering::SeqCst);
                error!(
                    height = checkpoint.height,
                    expected = %checkpoint.digest,
                    got = %hash.digest,
                    "checkpoint contradicted, halting state processing"
                );
                return Err(MonitorError::IntegrityFault {
                    height: hash.height,
                });
            }
        }
        Ok(())
    }

    /// Whether an integrity fault has latched this set.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Whether every anchor has been reproduced.
    pub fn all_passed(&self) -> bool {
        self.checkpoints.iter().all(Checkpoint::passed)
    }

    /// The pinned anchors.
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }
}
