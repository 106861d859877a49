//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing and for nodes that do not need their
//! replicated state to survive a restart. Same merge semantics as the
//! SQLite backend, no persistence.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use agora_core::{
    ContentHash, EntryKey, EntryRefresh, EntryRemoval, SignedEntry, StorePayload,
};

use crate::error::Result;
use crate::traits::{
    EntryOutcome, PayloadOutcome, RefreshOutcome, RemoveOutcome, SeqRecord, Store,
};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

struct MemoryStoreInner {
    /// Live entries by key.
    entries: HashMap<EntryKey, StoredEntry>,

    /// Owner and sequence bookkeeping, kept past removal and expiry.
    seq_records: HashMap<EntryKey, SeqRecord>,

    /// Append-only payloads by content hash.
    payloads: HashMap<ContentHash, StorePayload>,
}

struct StoredEntry {
    entry: SignedEntry,
    /// Cached so reconciliation does not rehash on every request.
    content_hash: ContentHash,
    /// When the TTL clock (re)started (Unix ms).
    stored_at: i64,
}

impl StoredEntry {
    fn expired(&self, now_ms: i64) -> bool {
        self.stored_at.saturating_add(self.entry.ttl_ms) <= now_ms
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner {
                entries: HashMap::new(),
                seq_records: HashMap::new(),
                payloads: HashMap::new(),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_entry(&self, entry: &SignedEntry, now_ms: i64) -> Result<EntryOutcome> {
        if entry.verify_signature().is_err() {
            return Ok(EntryOutcome::RejectedBadSignature);
        }

        let mut inner = self.inner.write().unwrap();

        let outcome = match inner.seq_records.get(&entry.key) {
            None => EntryOutcome::AcceptedNew,
            Some(record) => {
                if record.owner != entry.owner {
                    return Ok(EntryOutcome::RejectedOwnerMismatch);
                }
                match entry.sequence.cmp(&record.sequence) {
                    Ordering::Greater => EntryOutcome::AcceptedUpdate,
                    Ordering::Equal => {
                        // Re-receiving the exact stored version is normal
                        // gossip traffic, not a violation.
                        let identical = inner
                            .entries
                            .get(&entry.key)
                            .is_some_and(|stored| stored.content_hash == entry.content_hash());
                        if identical {
                            return Ok(EntryOutcome::AcceptedNoOp);
                        }
                        return Ok(EntryOutcome::RejectedStaleSequence);
                    }
                    Ordering::Less => return Ok(EntryOutcome::RejectedStaleSequence),
                }
            }
        };

        inner.seq_records.insert(
            entry.key,
            SeqRecord {
                owner: entry.owner,
                sequence: entry.sequence,
                updated_at: now_ms,
            },
        );
        inner.entries.insert(
            entry.key,
            StoredEntry {
                entry: entry.clone(),
                content_hash: entry.content_hash(),
                stored_at: now_ms,
            },
        );

        Ok(outcome)
    }

    async fn remove_entry(&self, removal: &EntryRemoval) -> Result<RemoveOutcome> {
        if removal.verify_signature().is_err() {
            return Ok(RemoveOutcome::RejectedBadSignature);
        }

        let mut inner = self.inner.write().unwrap();

        let Some(record) = inner.seq_records.get(&removal.key) else {
            return Ok(RemoveOutcome::RejectedUnknownKey);
        };
        if record.owner != removal.owner {
            return Ok(RemoveOutcome::RejectedOwnerMismatch);
        }
        if removal.sequence < record.sequence {
            return Ok(RemoveOutcome::RejectedStaleSequence);
        }

        inner.seq_records.insert(
            removal.key,
            SeqRecord {
                owner: removal.owner,
                sequence: removal.sequence,
                updated_at: now_millis(),
            },
        );

        if inner.entries.remove(&removal.key).is_some() {
            Ok(RemoveOutcome::Removed)
        } else {
            Ok(RemoveOutcome::AlreadyAbsent)
        }
    }

    async fn refresh_entry(&self, refresh: &EntryRefresh, now_ms: i64) -> Result<RefreshOutcome> {
        let mut inner = self.inner.write().unwrap();

        let Some(stored) = inner.entries.get(&refresh.key) else {
            return Ok(RefreshOutcome::RejectedUnknownKey);
        };
        if refresh.verify_signature(&stored.entry.owner).is_err() {
            return Ok(RefreshOutcome::RejectedBadSignature);
        }

        let record = inner
            .seq_records
            .get(&refresh.key)
            .copied()
            .expect("live entry always has a sequence record");
        if refresh.sequence <= record.sequence {
            return Ok(RefreshOutcome::RejectedStaleSequence);
        }

        inner.seq_records.insert(
            refresh.key,
            SeqRecord {
                owner: record.owner,
                sequence: refresh.sequence,
                updated_at: now_ms,
            },
        );
        if let Some(stored) = inner.entries.get_mut(&refresh.key) {
            stored.stored_at = now_ms;
        }

        Ok(RefreshOutcome::Refreshed)
    }

    async fn get_entry(&self, key: &EntryKey) -> Result<Option<SignedEntry>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.entries.get(key).map(|stored| stored.entry.clone()))
    }

    async fn entries(&self) -> Result<Vec<SignedEntry>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .entries
            .values()
            .map(|stored| stored.entry.clone())
            .collect())
    }

    async fn entry_count(&self) -> Result<usize> {
        let inner = self.inner.read().unwrap();
        Ok(inner.entries.len())
    }

    async fn sequence_record(&self, key: &EntryKey) -> Result<Option<SeqRecord>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.seq_records.get(key).copied())
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<Vec<EntryKey>> {
        let mut inner = self.inner.write().unwrap();

        let expired: Vec<EntryKey> = inner
            .entries
            .iter()
            .filter(|(_, stored)| stored.expired(now_ms))
            .map(|(key, _)| *key)
            .collect();

        for key in &expired {
            inner.entries.remove(key);
        }

        Ok(expired)
    }

    async fn insert_payload(&self, payload: &StorePayload, _now_ms: i64) -> Result<PayloadOutcome> {
        let mut inner = self.inner.write().unwrap();

        let id = payload.payload_id();
        if inner.payloads.contains_key(&id) {
            return Ok(PayloadOutcome::AcceptedDuplicate);
        }

        inner.payloads.insert(id, payload.clone());
        Ok(PayloadOutcome::AcceptedNew)
    }

    async fn get_payload(&self, id: &ContentHash) -> Result<Option<StorePayload>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.payloads.get(id).cloned())
    }

    async fn payloads(&self) -> Result<Vec<StorePayload>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.payloads.values().cloned().collect())
    }

    async fn payload_count(&self) -> Result<usize> {
        let inner = self.inner.read().unwrap();
        Ok(inner.payloads.len())
    }

    async fn known_hashes(&self) -> Result<HashSet<ContentHash>> {
        let inner = self.inner.read().unwrap();

        let mut hashes: HashSet<ContentHash> =
            inner.entries.values().map(|s| s.content_hash).collect();
        hashes.extend(inner.payloads.keys().copied());

        Ok(hashes)
    }
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}
