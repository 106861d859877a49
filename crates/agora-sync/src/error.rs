//! Error types for the replication layer.

use std::time::Duration;

use thiserror::Error;

use crate::messages::NodeAddress;

/// Errors raised by replication, bootstrap, and transport operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A record failed local validation. The sender is never told why.
    #[error("validation failed: {0}")]
    Validation(#[from] agora_core::ValidationError),

    /// The peer broke the protocol contract.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The connection to a peer failed.
    #[error("transport fault: {0}")]
    Transport(String),

    /// Encoding or decoding a wire frame failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] agora_store::StoreError),

    /// A bootstrap request to this peer is already in flight.
    #[error("request already pending for {0}")]
    RequestPending(NodeAddress),

    /// No answer arrived before the deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
