//! Chain descriptors.
//!
//! The monitor is generic over any number of deterministic state chains.
//! An application registers one descriptor per chain it derives hashes
//! for; the service keys its windows, peer maps, and checkpoints by the
//! descriptor's tag.

use agora_core::ChainTag;

/// Identifies one deterministic state chain.
pub trait StateChain: Send + Sync {
    /// Wire tag for this chain. Must be unique per service.
    fn tag(&self) -> ChainTag;

    /// Human-readable name for logs.
    fn name(&self) -> &'static str;
}

/// A descriptor built from plain values, for chains that need no
/// behavior of their own.
#[derive(Debug, Clone)]
pub struct ChainDescriptor {
    tag: ChainTag,
    name: &'static str,
}

impl ChainDescriptor {
    /// Create a descriptor.
    pub const fn new(tag: ChainTag, name: &'static str) -> Self {
        Self { tag, name }
    }
}

impl StateChain for ChainDescriptor {
    fn tag(&self) -> ChainTag {
        self.tag
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
