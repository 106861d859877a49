//! Content-addressed append-only payloads.
//!
//! Unlike entries, payloads are never versioned or removed: their identity
//! is the hash of their content, and the store only ever accumulates them.
//! Some kinds are processed at most once per node lifetime; duplicates of
//! those are stored silently and never re-dispatched.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::payload_id_bytes;
use crate::capability::Capability;
use crate::types::ContentHash;

/// Maximum payload body size in bytes.
pub const MAX_PAYLOAD_BODY: usize = 256 * 1024;

/// The kind of append-only payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum PayloadKind {
    /// A completed-trade report used for aggregate statistics.
    TradeReport = 0x0001,
    /// A third-party attestation of account age.
    AccountWitness = 0x0002,
    /// A signed attestation countersigned by a known witness key.
    SignedWitness = 0x0003,
}

impl PayloadKind {
    /// Convert to u16 for canonical encoding and storage.
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse from u16.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(PayloadKind::TradeReport),
            0x0002 => Some(PayloadKind::AccountWitness),
            0x0003 => Some(PayloadKind::SignedWitness),
            _ => None,
        }
    }

    /// The capability a peer must declare to receive payloads of this kind.
    pub fn required_capability(self) -> Option<Capability> {
        match self {
            PayloadKind::TradeReport => Some(Capability::TradeReports),
            PayloadKind::SignedWitness => Some(Capability::SignedWitness),
            PayloadKind::AccountWitness => None,
        }
    }

    /// Whether payloads of this kind are dispatched to handlers at most
    /// once per node lifetime, and only when they arrive in the initial
    /// bootstrap response rather than by later gossip.
    pub fn process_once(self) -> bool {
        matches!(self, PayloadKind::TradeReport)
    }
}

/// An immutable payload identified by the hash of its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorePayload {
    pub kind: PayloadKind,
    pub body: Bytes,
}

impl StorePayload {
    pub fn new(kind: PayloadKind, body: impl Into<Bytes>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    /// Content hash identifying this payload. Two payloads with the same
    /// kind and body are the same payload.
    pub fn payload_id(&self) -> ContentHash {
        ContentHash::hash(&payload_id_bytes(self.kind.to_u16(), &self.body))
    }

    /// The capability a peer must declare to receive this payload.
    pub fn required_capability(&self) -> Option<Capability> {
        self.kind.required_capability()
    }

    /// Whether this payload is subject to process-once dispatch.
    pub fn process_once(&self) -> bool {
        self.kind.process_once()
    }
}
