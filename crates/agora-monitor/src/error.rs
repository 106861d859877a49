//! Error types for state monitoring.

use thiserror::Error;

use agora_core::ChainTag;

/// Errors raised while tracking and verifying chain state hashes.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A locally produced hash contradicted a pinned checkpoint.
    #[error("integrity fault: local state at height {height} contradicts checkpoint")]
    IntegrityFault { height: u64 },

    /// An earlier integrity fault latched this chain; no further state
    /// is accepted until the operator intervenes.
    #[error("state processing halted by earlier integrity fault")]
    Halted,

    /// The chain tag is not registered with this service.
    #[error("unknown chain: {0}")]
    UnknownChain(ChainTag),

    /// The underlying replication layer failed.
    #[error("sync error: {0}")]
    Sync(#[from] agora_sync::SyncError),
}

/// Result type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
