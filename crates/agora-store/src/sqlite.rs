//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for the Agora data layer. It uses
//! rusqlite with bundled SQLite, wrapped in async via tokio::spawn_blocking.
//! Every multi-statement merge runs in a transaction so the entry table
//! and the sequence records can never disagree.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use agora_core::{
    ContentHash, EntryKey, EntryKind, EntryRefresh, EntryRemoval, PayloadKind, PublicKey,
    SignedEntry, Signature, StorePayload,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    EntryOutcome, PayloadOutcome, RefreshOutcome, RemoveOutcome, SeqRecord, Store,
};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| poisoned(&e))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

fn poisoned<T>(e: &std::sync::PoisonError<T>) -> StoreError {
    StoreError::Database(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
        Some(format!("mutex poisoned: {}", e)),
    ))
}

fn blob32(bytes: Vec<u8>, idx: usize, name: &str) -> rusqlite::Result<[u8; 32]> {
    bytes.try_into().map_err(|_| {
        rusqlite::Error::InvalidColumnType(idx, name.into(), rusqlite::types::Type::Blob)
    })
}

fn blob64(bytes: Vec<u8>, idx: usize, name: &str) -> rusqlite::Result<[u8; 64]> {
    bytes.try_into().map_err(|_| {
        rusqlite::Error::InvalidColumnType(idx, name.into(), rusqlite::types::Type::Blob)
    })
}

// Helper to convert a row to SignedEntry
fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<SignedEntry> {
    let key_bytes: Vec<u8> = row.get("entry_key")?;
    let kind_raw: u16 = row.get("kind")?;
    let payload: Vec<u8> = row.get("payload")?;
    let owner_bytes: Vec<u8> = row.get("owner")?;
    let sequence: i64 = row.get("sequence")?;
    let ttl_ms: i64 = row.get("ttl_ms")?;
    let signature_bytes: Vec<u8> = row.get("signature")?;

    let kind = EntryKind::from_u16(kind_raw).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(1, "kind".into(), rusqlite::types::Type::Integer)
    })?;

    Ok(SignedEntry {
        key: EntryKey::from_bytes(blob32(key_bytes, 0, "entry_key")?),
        kind,
        payload: Bytes::from(payload),
        owner: PublicKey(blob32(owner_bytes, 3, "owner")?),
        sequence: sequence as u64,
        ttl_ms,
        signature: Signature(blob64(signature_bytes, 6, "signature")?),
    })
}

// Helper to convert a row to StorePayload
fn row_to_payload(row: &rusqlite::Row<'_>) -> rusqlite::Result<StorePayload> {
    let kind_raw: u16 = row.get("kind")?;
    let body: Vec<u8> = row.get("body")?;

    let kind = PayloadKind::from_u16(kind_raw).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(0, "kind".into(), rusqlite::types::Type::Integer)
    })?;

    Ok(StorePayload {
        kind,
        body: Bytes::from(body),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_entry(&self, entry: &SignedEntry, now_ms: i64) -> Result<EntryOutcome> {
        let entry = entry.clone();

        self.with_conn(move |conn| {
            if entry.verify_signature().is_err() {
                return Ok(EntryOutcome::RejectedBadSignature);
            }

            let tx = conn.transaction()?;

            let record: Option<(Vec<u8>, i64)> = tx
                .query_row(
                    "SELECT owner, sequence FROM seq_records WHERE entry_key = ?1",
                    params![entry.key.0.as_slice()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let outcome = match record {
                None => EntryOutcome::AcceptedNew,
                Some((owner_bytes, stored_seq)) => {
                    if owner_bytes != entry.owner.0.as_slice() {
                        return Ok(EntryOutcome::RejectedOwnerMismatch);
                    }
                    match entry.sequence.cmp(&(stored_seq as u64)) {
                        Ordering::Greater => EntryOutcome::AcceptedUpdate,
                        Ordering::Equal => {
                            // Re-receiving the exact stored version is
                            // normal gossip traffic.
                            let stored_hash: Option<Vec<u8>> = tx
                                .query_row(
                                    "SELECT content_hash FROM entries WHERE entry_key = ?1",
                                    params![entry.key.0.as_slice()],
                                    |row| row.get(0),
                                )
                                .optional()?;
                            let identical = stored_hash
                                .is_some_and(|h| h == entry.content_hash().0.as_slice());
                            if identical {
                                return Ok(EntryOutcome::AcceptedNoOp);
                            }
                            return Ok(EntryOutcome::RejectedStaleSequence);
                        }
                        Ordering::Less => return Ok(EntryOutcome::RejectedStaleSequence),
                    }
                }
            };

            let content_hash = entry.content_hash();

            tx.execute(
                "INSERT INTO seq_records (entry_key, owner, sequence, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(entry_key) DO UPDATE SET
                    sequence = excluded.sequence,
                    updated_at = excluded.updated_at",
                params![
                    entry.key.0.as_slice(),
                    entry.owner.0.as_slice(),
                    entry.sequence as i64,
                    now_ms,
                ],
            )?;

            tx.execute(
                "INSERT INTO entries (
                    entry_key, kind, payload, owner, sequence, ttl_ms,
                    signature, content_hash, stored_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(entry_key) DO UPDATE SET
                    kind = excluded.kind,
                    payload = excluded.payload,
                    sequence = excluded.sequence,
                    ttl_ms = excluded.ttl_ms,
                    signature = excluded.signature,
                    content_hash = excluded.content_hash,
                    stored_at = excluded.stored_at",
                params![
                    entry.key.0.as_slice(),
                    entry.kind.to_u16() as i64,
                    entry.payload.as_ref(),
                    entry.owner.0.as_slice(),
                    entry.sequence as i64,
                    entry.ttl_ms,
                    entry.signature.0.as_slice(),
                    content_hash.0.as_slice(),
                    now_ms,
                ],
            )?;

            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn remove_entry(&self, removal: &EntryRemoval) -> Result<RemoveOutcome> {
        let removal = removal.clone();

        self.with_conn(move |conn| {
            if removal.verify_signature().is_err() {
                return Ok(RemoveOutcome::RejectedBadSignature);
            }

            let tx = conn.transaction()?;

            let record: Option<(Vec<u8>, i64)> = tx
                .query_row(
                    "SELECT owner, sequence FROM seq_records WHERE entry_key = ?1",
                    params![removal.key.0.as_slice()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((owner_bytes, stored_seq)) = record else {
                return Ok(RemoveOutcome::RejectedUnknownKey);
            };
            if owner_bytes != removal.owner.0.as_slice() {
                return Ok(RemoveOutcome::RejectedOwnerMismatch);
            }
            if removal.sequence < stored_seq as u64 {
                return Ok(RemoveOutcome::RejectedStaleSequence);
            }

            tx.execute(
                "UPDATE seq_records SET sequence = ?2, updated_at = ?3 WHERE entry_key = ?1",
                params![
                    removal.key.0.as_slice(),
                    removal.sequence as i64,
                    now_millis(),
                ],
            )?;
            let deleted = tx.execute(
                "DELETE FROM entries WHERE entry_key = ?1",
                params![removal.key.0.as_slice()],
            )?;

            tx.commit()?;
            Ok(if deleted > 0 {
                RemoveOutcome::Removed
            } else {
                RemoveOutcome::AlreadyAbsent
            })
        })
        .await
    }

    async fn refresh_entry(&self, refresh: &EntryRefresh, now_ms: i64) -> Result<RefreshOutcome> {
        let refresh = refresh.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let row: Option<(Vec<u8>, i64)> = tx
                .query_row(
                    "SELECT e.owner, r.sequence
                     FROM entries e JOIN seq_records r ON e.entry_key = r.entry_key
                     WHERE e.entry_key = ?1",
                    params![refresh.key.0.as_slice()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((owner_bytes, stored_seq)) = row else {
                return Ok(RefreshOutcome::RejectedUnknownKey);
            };

            let owner = PublicKey(blob32(owner_bytes, 0, "owner")?);
            if refresh.verify_signature(&owner).is_err() {
                return Ok(RefreshOutcome::RejectedBadSignature);
            }
            if refresh.sequence <= stored_seq as u64 {
                return Ok(RefreshOutcome::RejectedStaleSequence);
            }

            tx.execute(
                "UPDATE seq_records SET sequence = ?2, updated_at = ?3 WHERE entry_key = ?1",
                params![refresh.key.0.as_slice(), refresh.sequence as i64, now_ms],
            )?;
            tx.execute(
                "UPDATE entries SET stored_at = ?2 WHERE entry_key = ?1",
                params![refresh.key.0.as_slice(), now_ms],
            )?;

            tx.commit()?;
            Ok(RefreshOutcome::Refreshed)
        })
        .await
    }

    async fn get_entry(&self, key: &EntryKey) -> Result<Option<SignedEntry>> {
        let key = *key;

        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT entry_key, kind, payload, owner, sequence, ttl_ms, signature
                 FROM entries WHERE entry_key = ?1",
                params![key.0.as_slice()],
                row_to_entry,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn entries(&self) -> Result<Vec<SignedEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT entry_key, kind, payload, owner, sequence, ttl_ms, signature
                 FROM entries",
            )?;

            let entries = stmt
                .query_map([], row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(entries)
        })
        .await
    }

    async fn entry_count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    async fn sequence_record(&self, key: &EntryKey) -> Result<Option<SeqRecord>> {
        let key = *key;

        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT owner, sequence, updated_at FROM seq_records WHERE entry_key = ?1",
                params![key.0.as_slice()],
                |row| {
                    let owner_bytes: Vec<u8> = row.get(0)?;
                    let sequence: i64 = row.get(1)?;
                    let updated_at: i64 = row.get(2)?;

                    Ok(SeqRecord {
                        owner: PublicKey(blob32(owner_bytes, 0, "owner")?),
                        sequence: sequence as u64,
                        updated_at,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<Vec<EntryKey>> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let keys: Vec<EntryKey> = {
                let mut stmt =
                    tx.prepare("SELECT entry_key FROM entries WHERE stored_at + ttl_ms <= ?1")?;
                let keys = stmt
                    .query_map(params![now_ms], |row| {
                        let bytes: Vec<u8> = row.get(0)?;
                        Ok(EntryKey::from_bytes(blob32(bytes, 0, "entry_key")?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                keys
            };

            if !keys.is_empty() {
                tx.execute(
                    "DELETE FROM entries WHERE stored_at + ttl_ms <= ?1",
                    params![now_ms],
                )?;
            }

            tx.commit()?;

            if !keys.is_empty() {
                debug!(purged = keys.len(), "expired entries purged");
            }
            Ok(keys)
        })
        .await
    }

    async fn insert_payload(&self, payload: &StorePayload, now_ms: i64) -> Result<PayloadOutcome> {
        let payload = payload.clone();

        self.with_conn(move |conn| {
            let id = payload.payload_id();

            let changed = conn.execute(
                "INSERT OR IGNORE INTO payloads (payload_id, kind, body, stored_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.0.as_slice(),
                    payload.kind.to_u16() as i64,
                    payload.body.as_ref(),
                    now_ms,
                ],
            )?;

            Ok(if changed > 0 {
                PayloadOutcome::AcceptedNew
            } else {
                PayloadOutcome::AcceptedDuplicate
            })
        })
        .await
    }

    async fn get_payload(&self, id: &ContentHash) -> Result<Option<StorePayload>> {
        let id = *id;

        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT kind, body FROM payloads WHERE payload_id = ?1",
                params![id.0.as_slice()],
                row_to_payload,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn payloads(&self) -> Result<Vec<StorePayload>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT kind, body FROM payloads")?;

            let payloads = stmt
                .query_map([], row_to_payload)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(payloads)
        })
        .await
    }

    async fn payload_count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM payloads", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    async fn known_hashes(&self) -> Result<HashSet<ContentHash>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT content_hash FROM entries UNION SELECT payload_id FROM payloads",
            )?;

            let hashes = stmt
                .query_map([], |row| {
                    let bytes: Vec<u8> = row.get(0)?;
                    Ok(ContentHash::from_bytes(blob32(bytes, 0, "hash")?))
                })?
                .collect::<rusqlite::Result<HashSet<_>>>()?;

            Ok(hashes)
        })
        .await
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

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{EntryBuilder, Keypair};

    fn offer_key(keypair: &Keypair) -> EntryKey {
        EntryKey::derive(keypair.public_key().as_bytes(), "offer")
    }

    fn make_entry(keypair: &Keypair, sequence: u64) -> SignedEntry {
        EntryBuilder::new(offer_key(keypair), EntryKind::Offer, sequence)
            .payload(format!("offer v{}", sequence).into_bytes())
            .sign(keypair)
    }

    #[tokio::test]
    async fn test_insert_and_get_entry() {
        let store = SqliteStore::open_memory().unwrap();
        let keypair = Keypair::generate();
        let entry = make_entry(&keypair, 1);

        let outcome = store.insert_entry(&entry, 1_000).await.unwrap();
        assert_eq!(outcome, EntryOutcome::AcceptedNew);

        let retrieved = store.get_entry(&entry.key).await.unwrap().unwrap();
        assert_eq!(retrieved, entry);
        assert_eq!(store.entry_count().await.unwrap(), 1);

        // The reloaded entry still verifies.
        retrieved.verify_signature().unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_is_noop() {
        let store = SqliteStore::open_memory().unwrap();
        let keypair = Keypair::generate();
        let entry = make_entry(&keypair, 1);

        let r1 = store.insert_entry(&entry, 1_000).await.unwrap();
        assert_eq!(r1, EntryOutcome::AcceptedNew);

        let r2 = store.insert_entry(&entry, 2_000).await.unwrap();
        assert_eq!(r2, EntryOutcome::AcceptedNoOp);
        assert_eq!(store.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_and_stale_rejection() {
        let store = SqliteStore::open_memory().unwrap();
        let keypair = Keypair::generate();

        store
            .insert_entry(&make_entry(&keypair, 2), 1_000)
            .await
            .unwrap();

        let updated = store
            .insert_entry(&make_entry(&keypair, 3), 1_100)
            .await
            .unwrap();
        assert_eq!(updated, EntryOutcome::AcceptedUpdate);

        let stale = store
            .insert_entry(&make_entry(&keypair, 2), 1_200)
            .await
            .unwrap();
        assert_eq!(stale, EntryOutcome::RejectedStaleSequence);

        let current = store
            .get_entry(&offer_key(&keypair))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.sequence, 3);
    }

    #[tokio::test]
    async fn test_owner_pinned_across_removal() {
        let store = SqliteStore::open_memory().unwrap();
        let owner = Keypair::generate();
        let intruder = Keypair::generate();
        let key = offer_key(&owner);

        store
            .insert_entry(&make_entry(&owner, 1), 1_000)
            .await
            .unwrap();

        let removal = EntryRemoval::sign(key, 2, &owner);
        assert_eq!(
            store.remove_entry(&removal).await.unwrap(),
            RemoveOutcome::Removed
        );

        let foreign = EntryBuilder::new(key, EntryKind::Offer, 10)
            .payload(b"hijack".as_slice())
            .sign(&intruder);
        assert_eq!(
            store.insert_entry(&foreign, 2_000).await.unwrap(),
            EntryOutcome::RejectedOwnerMismatch
        );

        assert_eq!(
            store.insert_entry(&make_entry(&owner, 3), 2_000).await.unwrap(),
            EntryOutcome::AcceptedUpdate
        );
    }

    #[tokio::test]
    async fn test_refresh_restarts_ttl() {
        let store = SqliteStore::open_memory().unwrap();
        let keypair = Keypair::generate();
        let key = offer_key(&keypair);

        let entry = EntryBuilder::new(key, EntryKind::Offer, 1)
            .payload(b"short lived".as_slice())
            .ttl_ms(1_000)
            .sign(&keypair);
        store.insert_entry(&entry, 1_000).await.unwrap();

        let refresh = EntryRefresh::sign(key, 2, &keypair);
        assert_eq!(
            store.refresh_entry(&refresh, 1_500).await.unwrap(),
            RefreshOutcome::Refreshed
        );

        assert!(store.purge_expired(2_200).await.unwrap().is_empty());
        assert_eq!(store.purge_expired(2_600).await.unwrap(), vec![key]);

        // No live entry left to refresh.
        let late = EntryRefresh::sign(key, 3, &keypair);
        assert_eq!(
            store.refresh_entry(&late, 2_700).await.unwrap(),
            RefreshOutcome::RejectedUnknownKey
        );
    }

    #[tokio::test]
    async fn test_purge_keeps_sequence_record() {
        let store = SqliteStore::open_memory().unwrap();
        let keypair = Keypair::generate();
        let key = offer_key(&keypair);

        let entry = EntryBuilder::new(key, EntryKind::Offer, 7)
            .payload(b"ephemeral".as_slice())
            .ttl_ms(100)
            .sign(&keypair);
        store.insert_entry(&entry, 0).await.unwrap();
        store.purge_expired(200).await.unwrap();

        assert!(store.get_entry(&key).await.unwrap().is_none());
        let record = store.sequence_record(&key).await.unwrap().unwrap();
        assert_eq!(record.sequence, 7);
        assert_eq!(record.owner, keypair.public_key());

        assert_eq!(
            store.insert_entry(&entry, 300).await.unwrap(),
            EntryOutcome::RejectedStaleSequence
        );
    }

    #[tokio::test]
    async fn test_payloads_and_known_hashes() {
        let store = SqliteStore::open_memory().unwrap();
        let keypair = Keypair::generate();

        let payload = StorePayload::new(PayloadKind::AccountWitness, b"witness".as_slice());
        assert_eq!(
            store.insert_payload(&payload, 1_000).await.unwrap(),
            PayloadOutcome::AcceptedNew
        );
        assert_eq!(
            store.insert_payload(&payload, 1_001).await.unwrap(),
            PayloadOutcome::AcceptedDuplicate
        );

        let fetched = store
            .get_payload(&payload.payload_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, payload);

        let entry = make_entry(&keypair, 1);
        store.insert_entry(&entry, 1_000).await.unwrap();

        let hashes = store.known_hashes().await.unwrap();
        assert_eq!(hashes.len(), 2);
        assert!(hashes.contains(&payload.payload_id()));
        assert!(hashes.contains(&entry.content_hash()));
    }

    #[tokio::test]
    async fn test_reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agora.db");

        let keypair = Keypair::generate();
        let entry = make_entry(&keypair, 4);
        let payload = StorePayload::new(PayloadKind::TradeReport, b"trade".as_slice());

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_entry(&entry, 1_000).await.unwrap();
            store.insert_payload(&payload, 1_000).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let retrieved = store.get_entry(&entry.key).await.unwrap().unwrap();
        assert_eq!(retrieved, entry);
        assert_eq!(store.payload_count().await.unwrap(), 1);

        let record = store.sequence_record(&entry.key).await.unwrap().unwrap();
        assert_eq!(record.sequence, 4);
    }
}
