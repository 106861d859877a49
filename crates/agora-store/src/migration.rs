//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    // Create migrations table if it doesn't exist
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Get current version
    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    // Apply migrations
    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            info!(version, "applying schema migration");
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Live entries: one row per key, replaced on accepted updates
        CREATE TABLE entries (
            entry_key BLOB PRIMARY KEY,       -- 32 bytes
            kind INTEGER NOT NULL,            -- EntryKind as u16
            payload BLOB NOT NULL,            -- opaque application payload
            owner BLOB NOT NULL,              -- 32 bytes, Ed25519 public key
            sequence INTEGER NOT NULL,        -- as signed by the owner
            ttl_ms INTEGER NOT NULL,
            signature BLOB NOT NULL,          -- 64 bytes, Ed25519 signature
            content_hash BLOB NOT NULL,       -- 32 bytes, cached for reconciliation
            stored_at INTEGER NOT NULL        -- TTL clock start (Unix ms)
        );

        -- Owner and sequence bookkeeping, retained past removal/expiry
        CREATE TABLE seq_records (
            entry_key BLOB PRIMARY KEY,
            owner BLOB NOT NULL,
            sequence INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Append-only payloads, keyed by content
        CREATE TABLE payloads (
            payload_id BLOB PRIMARY KEY,      -- 32 bytes, hash of kind+body
            kind INTEGER NOT NULL,            -- PayloadKind as u16
            body BLOB NOT NULL,
            stored_at INTEGER NOT NULL
        );

        -- Indexes for common queries
        CREATE INDEX idx_entries_kind ON entries(kind);
        CREATE INDEX idx_entries_stored ON entries(stored_at);
        CREATE INDEX idx_payloads_kind ON payloads(kind);
        "#,
    )?;

    Ok(())
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}
