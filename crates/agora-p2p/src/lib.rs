//! # Agora P2P
//!
//! The assembled data layer for the Agora trading network: a replicated
//! store of signed entries and content-addressed payloads, a bootstrap
//! handshake for joining nodes, state-hash gossip with checkpoint
//! anchors, and sealed direct messages over the public store.
//!
//! ## Overview
//!
//! A [`Node`] wires the component services over a store, a transport,
//! and a peer manager:
//!
//! - **Entries**: Owner-signed, sequence-numbered mutable records
//! - **Payloads**: Immutable records addressed by content hash
//! - **Bootstrap**: One-round-trip catch-up, hash list or delta sketch
//! - **Monitoring**: Per-chain state-hash gossip and divergence flags
//! - **Mailbox**: Sign-then-encrypt messages replicated as entries
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agora_p2p::{Node, NodeConfig};
//! use agora_p2p::chains::{LedgerChain, LEDGER_TAG};
//! use agora_p2p::core::{CapabilitySet, Keypair};
//! use agora_p2p::monitor::CheckpointSet;
//! use agora_p2p::store::MemoryStore;
//! use agora_p2p::sync::{MemoryHub, NodeAddress, StaticPeers};
//!
//! async fn example() -> agora_p2p::Result<()> {
//!     let hub = MemoryHub::new();
//!     let address = NodeAddress::new("alice", 9000);
//!     let transport = Arc::new(hub.attach(address, CapabilitySet::full()));
//!
//!     let node = Node::new(
//!         Keypair::generate(),
//!         Arc::new(MemoryStore::new()),
//!         transport,
//!         Arc::new(StaticPeers::new(vec![NodeAddress::new("seed", 9000)])),
//!         NodeConfig::default(),
//!     );
//!     node.register_chain(Arc::new(LedgerChain), CheckpointSet::empty());
//!     node.start()?;
//!
//!     let outcome = node.bootstrap_from_seeds().await?;
//!     println!("synced {} entries", outcome.summary.entries_applied);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `agora_p2p::core` - Primitives (SignedEntry, StorePayload, DeltaSet)
//! - `agora_p2p::store` - Storage abstraction, memory and SQLite backends
//! - `agora_p2p::sync` - Replication, bootstrap, and transports
//! - `agora_p2p::monitor` - State-hash gossip and checkpoints
//! - `agora_p2p::seal` - Sealed direct messages

pub mod chains;
pub mod error;
pub mod node;

// Re-export component crates
pub use agora_core as core;
pub use agora_monitor as monitor;
pub use agora_seal as seal;
pub use agora_store as store;
pub use agora_sync as sync;

// Re-export main types for convenience
pub use error::{NodeError, Result};
pub use node::{Node, NodeConfig};

// Re-export commonly used component types
pub use agora_core::{
    CapabilitySet, ContentHash, EntryBuilder, EntryKey, EntryKind, Keypair, PublicKey,
    SignedEntry, StorePayload,
};
pub use agora_monitor::{CheckpointSet, MonitorConfig, StateHashService};
pub use agora_seal::{MailboxSecret, SealedEnvelope, X25519PublicKey};
pub use agora_sync::{BootstrapConfig, BootstrapOutcome, NodeAddress, ResponderConfig};
