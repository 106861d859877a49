//! # Agora Core
//!
//! Pure primitives for the Agora data layer: signed entries, append-only
//! payloads, set-reconciliation sketches, and canonicalization.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`SignedEntry`] - An owner-signed, sequence-numbered mutable record
//! - [`StorePayload`] - An immutable record addressed by content hash
//! - [`EntryKey`] / [`ContentHash`] - 32-byte Blake3 identifiers
//! - [`DeltaSet`] - Invertible sketch for exchanging set differences
//! - [`CapabilitySet`] - What a peer is willing to receive
//!
//! ## Canonicalization
//!
//! All signed material is encoded using deterministic CBOR before signing
//! or hashing. See [`canonical`] module.

pub mod canonical;
pub mod capability;
pub mod crypto;
pub mod delta;
pub mod entry;
pub mod error;
pub mod payload;
pub mod state;
pub mod types;
pub mod validation;

pub use capability::{Capability, CapabilitySet};
pub use crypto::{Keypair, PublicKey, Signature};
pub use delta::{DeltaDecode, DeltaProfile, DeltaSet, HeightRange};
pub use entry::{EntryBuilder, EntryKind, EntryRefresh, EntryRemoval, SignedEntry};
pub use error::{CoreError, ValidationError};
pub use payload::{PayloadKind, StorePayload};
pub use state::{ChainTag, StateHash};
pub use types::{ContentHash, EntryKey, StateDigest};
pub use validation::{
    validate_entry, validate_entry_structure, validate_payload, validate_refresh_structure,
    validate_removal,
};
