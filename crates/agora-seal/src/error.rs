//! Error types for sealed messaging.

use thiserror::Error;

/// Errors from sealing or opening an envelope.
#[derive(Debug, Error)]
pub enum SealError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encrypt(String),

    /// Decryption failed. The AEAD cannot tell a wrong recipient key
    /// from a tampered ciphertext.
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// The inner signature does not verify against the named sender.
    #[error("sender signature invalid")]
    SenderSignature,

    /// The envelope or its plaintext does not parse.
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Result type for sealing operations.
pub type Result<T> = std::result::Result<T, SealError>;
