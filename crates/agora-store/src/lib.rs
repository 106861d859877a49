//! # Agora Store
//!
//! Persistence layer for the Agora data network: the replicated entry
//! map (signed, owner-bound, sequence-numbered records) and the
//! append-only payload set (content-addressed blobs).
//!
//! ## Overview
//!
//! The [`Store`] trait is the seam between replication logic and
//! persistence. Two implementations are provided:
//!
//! - [`MemoryStore`] — in-memory, for tests and ephemeral nodes
//! - [`SqliteStore`] — durable storage via SQLite
//!
//! Both apply identical merge rules. The store is authoritative for
//! sequence and ownership checks: once a key has been claimed, only the
//! claiming key holder can ever replace, refresh, or remove it, and the
//! sequence number for the key never moves backwards, even across
//! removal and expiry.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`EntryOutcome`] - Result of merging a signed entry
//! - [`SeqRecord`] - Owner and high-water sequence retained per key
//!
//! ## Usage
//!
//! ```rust,no_run
//! use agora_store::{SqliteStore, Store};
//!
//! async fn example() {
//!     // Open a SQLite database
//!     let store = SqliteStore::open("agora.db").unwrap();
//!
//!     // Or use an in-memory database for testing
//!     let store = SqliteStore::open_memory().unwrap();
//!
//!     let live = store.entry_count().await.unwrap();
//!     println!("{live} live entries");
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Owner pinning**: the first accepted entry for a key binds the key
//!   to its owner forever, including after removal or expiry
//! - **Monotonic sequences**: stale or replayed mutations are rejected
//!   without touching state
//! - **TTL expiry**: entries lapse `ttl_ms` after their last store or
//!   refresh; purging never forgets the sequence record
//! - **Payload dedup**: payloads are keyed by content hash, so re-adding
//!   an existing blob is a no-op

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{EntryOutcome, PayloadOutcome, RefreshOutcome, RemoveOutcome, SeqRecord, Store};
