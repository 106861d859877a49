//! Error types for the Agora core primitives.

use thiserror::Error;

/// Core errors that can occur while handling keys, hashes, and encodings.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("unknown entry kind: {0}")]
    UnknownEntryKind(u16),

    #[error("unknown payload kind: {0}")]
    UnknownPayloadKind(u16),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Validation errors raised at the merge boundary.
///
/// These are never surfaced over the network; a record that fails
/// validation is rejected locally and the peer is not told why.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("signature verification failed")]
    SignatureFailed,

    #[error("payload exceeds maximum size: {len} > {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("empty payload")]
    EmptyPayload,

    #[error("ttl out of range: {0} ms")]
    TtlOutOfRange(i64),

    #[error("sequence number must be positive")]
    ZeroSequence,

    #[error("entry kind {0} is invalid")]
    InvalidKind(u16),

    #[error("structural error: {0}")]
    StructuralError(String),
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidSignature | CoreError::InvalidPublicKey => {
                ValidationError::SignatureFailed
            }
            CoreError::UnknownEntryKind(k) | CoreError::UnknownPayloadKind(k) => {
                ValidationError::InvalidKind(k)
            }
            CoreError::EncodingError(msg) | CoreError::DecodingError(msg) => {
                ValidationError::StructuralError(msg)
            }
        }
    }
}
