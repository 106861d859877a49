//! Store trait: the authoritative merge point for replicated data.
//!
//! The store decides what to accept, so every rule that needs the stored
//! state lives here: owner pinning, sequence ordering, TTL bookkeeping.
//! Callers validate structure before handing records in; the store
//! re-checks everything that depends on what it already holds.

use std::collections::HashSet;

use async_trait::async_trait;

use agora_core::{
    ContentHash, EntryKey, EntryRefresh, EntryRemoval, PublicKey, SignedEntry, StorePayload,
};

use crate::error::Result;

/// Outcome of merging an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// First entry ever accepted for this key; its owner is now pinned.
    AcceptedNew,
    /// Replaced (or revived after removal) with a higher sequence number.
    AcceptedUpdate,
    /// Exact duplicate of the stored version; nothing changed.
    AcceptedNoOp,
    /// Owner signature did not verify.
    RejectedBadSignature,
    /// Sequence number not newer than what this key has already seen.
    RejectedStaleSequence,
    /// Signed by a key other than the one pinned to this entry key.
    RejectedOwnerMismatch,
}

impl EntryOutcome {
    /// Whether the store changed and the entry should propagate to peers.
    pub fn is_accepted_change(self) -> bool {
        matches!(self, EntryOutcome::AcceptedNew | EntryOutcome::AcceptedUpdate)
    }

    pub fn is_rejected(self) -> bool {
        matches!(
            self,
            EntryOutcome::RejectedBadSignature
                | EntryOutcome::RejectedStaleSequence
                | EntryOutcome::RejectedOwnerMismatch
        )
    }
}

/// Outcome of applying a removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// Entry deleted; the sequence record stays behind.
    Removed,
    /// Authorized, but the entry was already gone; only the sequence
    /// record advanced. Not worth propagating.
    AlreadyAbsent,
    /// Signature did not verify against the carried owner key.
    RejectedBadSignature,
    /// Carried owner is not the one pinned to this key.
    RejectedOwnerMismatch,
    /// Sequence number lower than the stored one.
    RejectedStaleSequence,
    /// No sequence record for this key; nothing to authorize against.
    RejectedUnknownKey,
}

impl RemoveOutcome {
    pub fn is_removed(self) -> bool {
        matches!(self, RemoveOutcome::Removed)
    }
}

/// Outcome of applying a TTL refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// TTL clock restarted and sequence record advanced.
    Refreshed,
    /// Signature did not verify against the pinned owner.
    RejectedBadSignature,
    /// Sequence number not strictly greater than the stored one.
    RejectedStaleSequence,
    /// No live entry under this key to refresh.
    RejectedUnknownKey,
}

impl RefreshOutcome {
    pub fn is_refreshed(self) -> bool {
        matches!(self, RefreshOutcome::Refreshed)
    }
}

/// Outcome of storing an append-only payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadOutcome {
    /// First time this content was seen.
    AcceptedNew,
    /// Identical content already stored.
    AcceptedDuplicate,
}

impl PayloadOutcome {
    pub fn is_new(self) -> bool {
        matches!(self, PayloadOutcome::AcceptedNew)
    }
}

/// What a key has already seen: the pinned owner and the highest
/// sequence number any accepted mutation carried.
///
/// Retained after removal and expiry so stale re-adds and foreign
/// owners keep getting rejected for as long as the record lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqRecord {
    pub owner: PublicKey,
    pub sequence: u64,
    /// When the record last advanced (Unix ms).
    pub updated_at: i64,
}

/// Async interface for replicated-data persistence.
///
/// All methods are async to support both sync (SQLite) and async
/// backends. For SQLite, `spawn_blocking` is used internally to avoid
/// blocking the runtime.
///
/// # Design Notes
///
/// - **Owner pinning**: the owner of the first accepted entry for a key
///   is authoritative for that key from then on, across removals.
/// - **Sequence ordering**: adds need a strictly greater sequence number;
///   removals accept an equal one; an equal-sequence add that is
///   byte-identical to the stored entry is a no-op, not a rejection.
/// - **Payloads are append-only**: identified by content hash, never
///   versioned or removed.
/// - **`known_hashes`** is the set reconciliation feeds on: entry content
///   hashes plus payload ids.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Entry Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Merge an entry. `now_ms` starts its TTL clock.
    async fn insert_entry(&self, entry: &SignedEntry, now_ms: i64) -> Result<EntryOutcome>;

    /// Apply an authorized removal.
    async fn remove_entry(&self, removal: &EntryRemoval) -> Result<RemoveOutcome>;

    /// Re-arm an entry's TTL without resending its payload.
    async fn refresh_entry(&self, refresh: &EntryRefresh, now_ms: i64) -> Result<RefreshOutcome>;

    /// Get the live entry under a key, if any.
    async fn get_entry(&self, key: &EntryKey) -> Result<Option<SignedEntry>>;

    /// All live entries.
    async fn entries(&self) -> Result<Vec<SignedEntry>>;

    /// Number of live entries.
    async fn entry_count(&self) -> Result<usize>;

    /// The sequence record for a key, live entry or not.
    async fn sequence_record(&self, key: &EntryKey) -> Result<Option<SeqRecord>>;

    /// Drop entries whose TTL has elapsed and return their keys.
    ///
    /// Sequence records survive the purge.
    async fn purge_expired(&self, now_ms: i64) -> Result<Vec<EntryKey>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Payload Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Store an append-only payload.
    async fn insert_payload(&self, payload: &StorePayload, now_ms: i64) -> Result<PayloadOutcome>;

    /// Get a payload by content hash.
    async fn get_payload(&self, id: &ContentHash) -> Result<Option<StorePayload>>;

    /// All stored payloads.
    async fn payloads(&self) -> Result<Vec<StorePayload>>;

    /// Number of stored payloads.
    async fn payload_count(&self) -> Result<usize>;

    // ─────────────────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────────────────

    /// Every hash this store can serve: content hashes of live entries
    /// and ids of all payloads.
    async fn known_hashes(&self) -> Result<HashSet<ContentHash>>;
}
