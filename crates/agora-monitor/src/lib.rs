//! # Agora Monitor
//!
//! Cross-node agreement checking for deterministic derived state.
//!
//! ## Overview
//!
//! Nodes that process the same replicated records should derive the
//! same state. Each node hashes its derived state per height and
//! gossips the result; this crate collects those hashes, compares them
//! against every peer's, and raises a flag the moment the local node
//! diverges from the network. Divergence from a seed node and from an
//! ordinary peer are tracked separately, since only the former suggests
//! the local node is the one that is wrong.
//!
//! Hard-coded checkpoint anchors give each chain a tripwire: when the
//! locally derived hash at an anchor height does not match, the chain
//! is halted rather than allowed to keep building on a corrupt base.
//!
//! ## Key Types
//!
//! - [`StateHashService`]: per-chain gossip, conflict flags, pulls
//! - [`StateChain`] / [`ChainDescriptor`]: names a monitored chain
//! - [`CheckpointSet`]: anchor verification with a one-way failure latch
//! - [`PullHandler`]: one nonce-guarded state-hash pull from one peer

pub mod chain;
pub mod checkpoint;
pub mod error;
pub mod handler;
pub mod service;

pub use chain::{ChainDescriptor, StateChain};
pub use checkpoint::{Checkpoint, CheckpointSet};
pub use error::{MonitorError, Result};
pub use handler::PullHandler;
pub use service::{MonitorConfig, MonitorListener, StateHashService};
