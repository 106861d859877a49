//! Derived-state identification primitives.
//!
//! Nodes that maintain a deterministic derived state (a ledger, a vote
//! tally) publish a digest of that state per height. These types tag
//! which state machine a digest belongs to and pair the digest with its
//! height; the comparison and conflict tracking live elsewhere.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::StateDigest;

/// Identifies one derived-state machine on the wire.
///
/// Tags are assigned by the application; two nodes must agree on the
/// numbering for their digests to be comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainTag(pub u16);

impl ChainTag {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn to_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ChainTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain#{}", self.0)
    }
}

/// A digest of one chain's derived state at one height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateHash {
    pub height: u64,
    pub digest: StateDigest,
}

impl StateHash {
    pub fn new(height: u64, digest: StateDigest) -> Self {
        Self { height, digest }
    }

    /// Whether another hash covers the same height with the same digest.
    pub fn matches(&self, other: &StateHash) -> bool {
        self.height == other.height && self.digest == other.digest
    }
}

impl fmt::Display for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}:{}", self.height, self.digest)
    }
}
