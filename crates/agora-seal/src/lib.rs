//! # Agora Seal
//!
//! Sealed direct messages for the Agora data network.
//!
//! ## Overview
//!
//! The replicated store is public: every node holds every entry. When
//! two parties need a private channel over it — dispute mediation, a
//! trade counterparty message — the payload is sealed: signed by the
//! sender's Ed25519 key, then encrypted to the recipient's X25519
//! mailbox key with a fresh ephemeral key per message. The store and
//! every relaying node see only opaque bytes.
//!
//! ## Key Types
//!
//! - [`SealedEnvelope`]: seal/open, plus the opaque wire form
//! - [`MailboxSecret`] / [`X25519PublicKey`]: the recipient's key pair
//! - [`OpenedMessage`]: verified sender + body after opening
//!
//! Sender identities are the same Ed25519 [`agora_core::Keypair`]s that
//! sign store entries; mailbox keys are separate X25519 keys that only
//! do key agreement.

pub mod crypto;
pub mod error;
pub mod sealed;

pub use crypto::{EphemeralKeyPair, MailboxSecret, SealKey, SealNonce, SharedKey, X25519PublicKey};
pub use error::{Result, SealError};
pub use sealed::{OpenedMessage, SealedEnvelope, SEAL_SIGN_DOMAIN};
