//! Error types for the node facade.

use thiserror::Error;

use agora_core::{EntryKind, ValidationError};
use agora_monitor::MonitorError;
use agora_seal::SealError;
use agora_store::StoreError;
use agora_sync::SyncError;

/// Errors that can occur during node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A record failed structural or signature validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Replication or bootstrap error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// State-hash monitoring error.
    #[error("monitor error: {0}")]
    Monitor(#[from] MonitorError),

    /// Sealing or opening a direct message failed.
    #[error("seal error: {0}")]
    Seal(#[from] SealError),

    /// An entry of the wrong kind was handed to a mailbox operation.
    #[error("expected a mailbox entry, got {0:?}")]
    NotAMailboxEntry(EntryKind),

    /// The node is already running.
    #[error("node already started")]
    AlreadyStarted,

    /// The operation needs a running node.
    #[error("node not started")]
    NotStarted,
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
