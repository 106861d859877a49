//! Signed mutable entries and their companion removal/refresh records.
//!
//! An entry is the unit of mutable replicated data: a keyed payload signed
//! by its owner, versioned by a sequence number, and aged out by a TTL.
//! The first owner accepted for a key stays pinned to it; later writes
//! under a different key pair are rejected at the merge boundary.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::{
    entry_content_bytes, entry_signing_bytes, refresh_signing_bytes, removal_signing_bytes,
};
use crate::capability::Capability;
use crate::crypto::{Keypair, PublicKey, Signature};
use crate::error::CoreError;
use crate::types::{ContentHash, EntryKey};

/// Maximum entry payload size in bytes.
pub const MAX_ENTRY_PAYLOAD: usize = 64 * 1024;

/// The kind of entry, determining how the payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum EntryKind {
    /// A tradable offer published to the network.
    Offer = 0x0001,
    /// A sealed message addressed to one recipient (ciphertext payload).
    Mailbox = 0x0002,
    /// A network-wide operator notice.
    Alert = 0x0003,
    /// A mediator's service profile.
    Mediator = 0x0004,
}

impl EntryKind {
    /// Convert to u16 for canonical encoding and storage.
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse from u16.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(EntryKind::Offer),
            0x0002 => Some(EntryKind::Mailbox),
            0x0003 => Some(EntryKind::Alert),
            0x0004 => Some(EntryKind::Mediator),
            _ => None,
        }
    }

    /// The capability a peer must declare to receive entries of this kind.
    pub fn required_capability(self) -> Option<Capability> {
        match self {
            EntryKind::Mediator => Some(Capability::Mediation),
            _ => None,
        }
    }

    /// The default TTL for entries of this kind.
    pub fn default_ttl_ms(self) -> i64 {
        match self {
            // Offers go stale fast; owners keep them alive with refreshes.
            EntryKind::Offer => 9 * 60 * 1_000,
            EntryKind::Mailbox => 15 * 24 * 60 * 60 * 1_000,
            EntryKind::Alert => 30 * 24 * 60 * 60 * 1_000,
            EntryKind::Mediator => 10 * 24 * 60 * 60 * 1_000,
        }
    }
}

/// A signed, versioned, owner-pinned mutable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEntry {
    /// Logical key; stable across sequence bumps.
    pub key: EntryKey,
    /// How the payload is interpreted.
    pub kind: EntryKind,
    /// Opaque application payload.
    pub payload: Bytes,
    /// The owner whose signature authorizes this entry.
    pub owner: PublicKey,
    /// Strictly increasing per key.
    pub sequence: u64,
    /// Lifetime in milliseconds from local acceptance.
    pub ttl_ms: i64,
    /// Owner signature over the canonical signing bytes.
    pub signature: Signature,
}

impl SignedEntry {
    /// The canonical message the owner signed.
    pub fn signing_bytes(&self) -> Vec<u8> {
        entry_signing_bytes(
            &self.key,
            self.kind.to_u16(),
            &self.payload,
            &self.owner,
            self.sequence,
            self.ttl_ms,
        )
    }

    /// Content hash of the full signed form.
    ///
    /// Covers the sequence number, so each accepted version of a key has a
    /// distinct hash. Exclusion sets are built from these.
    pub fn content_hash(&self) -> ContentHash {
        let bytes = entry_content_bytes(
            &self.key,
            self.kind.to_u16(),
            &self.payload,
            &self.owner,
            self.sequence,
            self.ttl_ms,
            &self.signature,
        );
        ContentHash::hash(&bytes)
    }

    /// Verify the owner signature.
    pub fn verify_signature(&self) -> Result<(), CoreError> {
        self.owner.verify(&self.signing_bytes(), &self.signature)
    }

    /// The capability a peer must declare to receive this entry.
    pub fn required_capability(&self) -> Option<Capability> {
        self.kind.required_capability()
    }
}

/// Builder for signed entries.
#[derive(Debug, Clone)]
pub struct EntryBuilder {
    key: EntryKey,
    kind: EntryKind,
    sequence: u64,
    payload: Bytes,
    ttl_ms: Option<i64>,
}

impl EntryBuilder {
    /// Start building an entry at the given key and sequence number.
    pub fn new(key: EntryKey, kind: EntryKind, sequence: u64) -> Self {
        Self {
            key,
            kind,
            sequence,
            payload: Bytes::new(),
            ttl_ms: None,
        }
    }

    /// Set the payload.
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Override the kind's default TTL.
    pub fn ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    /// Sign and produce the entry. The signer becomes the owner.
    pub fn sign(self, keypair: &Keypair) -> SignedEntry {
        let owner = keypair.public_key();
        let ttl_ms = self.ttl_ms.unwrap_or_else(|| self.kind.default_ttl_ms());
        let message = entry_signing_bytes(
            &self.key,
            self.kind.to_u16(),
            &self.payload,
            &owner,
            self.sequence,
            ttl_ms,
        );
        let signature = keypair.sign(&message);

        SignedEntry {
            key: self.key,
            kind: self.kind,
            payload: self.payload,
            owner,
            sequence: self.sequence,
            ttl_ms,
            signature,
        }
    }
}

/// A signed request to remove an entry.
///
/// Carries the claimed owner so the signature can be checked before the
/// store compares it against the pinned owner for the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRemoval {
    pub key: EntryKey,
    pub owner: PublicKey,
    /// Must be at least as high as the stored sequence number.
    pub sequence: u64,
    pub signature: Signature,
}

impl EntryRemoval {
    /// Sign a removal for the given key and sequence number.
    pub fn sign(key: EntryKey, sequence: u64, keypair: &Keypair) -> Self {
        let owner = keypair.public_key();
        let message = removal_signing_bytes(&key, &owner, sequence);
        Self {
            key,
            owner,
            sequence,
            signature: keypair.sign(&message),
        }
    }

    /// Verify the signature against the carried owner key.
    pub fn verify_signature(&self) -> Result<(), CoreError> {
        let message = removal_signing_bytes(&self.key, &self.owner, self.sequence);
        self.owner.verify(&message, &self.signature)
    }
}

/// A signed TTL refresh.
///
/// Re-arms an entry's lifetime without resending its payload; verified
/// against the owner key already pinned to the stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRefresh {
    pub key: EntryKey,
    /// Must be strictly greater than the stored sequence number.
    pub sequence: u64,
    pub signature: Signature,
}

impl EntryRefresh {
    /// Sign a refresh for the given key and sequence number.
    pub fn sign(key: EntryKey, sequence: u64, keypair: &Keypair) -> Self {
        let message = refresh_signing_bytes(&key, sequence);
        Self {
            key,
            sequence,
            signature: keypair.sign(&message),
        }
    }

    /// Verify the signature against the stored owner key.
    pub fn verify_signature(&self, owner: &PublicKey) -> Result<(), CoreError> {
        let message = refresh_signing_bytes(&self.key, self.sequence);
        owner.verify(&message, &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(seed: u8, sequence: u64) -> (Keypair, SignedEntry) {
        let keypair = Keypair::from_seed(&[seed; 32]);
        let key = EntryKey::derive(keypair.public_key().as_bytes(), "offer/test");
        let entry = EntryBuilder::new(key, EntryKind::Offer, sequence)
            .payload(b"0.25 btc @ 59000 eur".as_slice())
            .sign(&keypair);
        (keypair, entry)
    }

    #[test]
    fn test_build_and_verify() {
        let (_, entry) = make_entry(0x11, 1);
        entry.verify_signature().expect("freshly signed entry verifies");
        assert_eq!(entry.ttl_ms, EntryKind::Offer.default_ttl_ms());
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let (_, mut entry) = make_entry(0x11, 1);
        entry.payload = Bytes::from_static(b"0.25 btc @ 1 eur");
        assert!(entry.verify_signature().is_err());
    }

    #[test]
    fn test_tampered_sequence_fails_verification() {
        let (_, mut entry) = make_entry(0x11, 1);
        entry.sequence = 99;
        assert!(entry.verify_signature().is_err());
    }

    #[test]
    fn test_content_hash_distinct_per_sequence() {
        let (_, v1) = make_entry(0x11, 1);
        let (_, v2) = make_entry(0x11, 2);
        assert_eq!(v1.key, v2.key);
        assert_ne!(v1.content_hash(), v2.content_hash());
    }

    #[test]
    fn test_removal_sign_verify() {
        let (keypair, entry) = make_entry(0x22, 3);
        let removal = EntryRemoval::sign(entry.key, 3, &keypair);
        removal.verify_signature().expect("removal verifies");

        let other = Keypair::from_seed(&[0x33; 32]);
        let forged = EntryRemoval {
            owner: other.public_key(),
            ..removal.clone()
        };
        assert!(forged.verify_signature().is_err());
    }

    #[test]
    fn test_refresh_bound_to_owner() {
        let (keypair, entry) = make_entry(0x22, 3);
        let refresh = EntryRefresh::sign(entry.key, 4, &keypair);
        refresh
            .verify_signature(&keypair.public_key())
            .expect("refresh verifies under its signer");

        let other = Keypair::from_seed(&[0x44; 32]).public_key();
        assert!(refresh.verify_signature(&other).is_err());
    }

    #[test]
    fn test_kind_ids_are_stable() {
        for kind in [
            EntryKind::Offer,
            EntryKind::Mailbox,
            EntryKind::Alert,
            EntryKind::Mediator,
        ] {
            assert_eq!(EntryKind::from_u16(kind.to_u16()), Some(kind));
        }
        assert_eq!(EntryKind::from_u16(0xffff), None);
    }

    #[test]
    fn test_mediator_entries_are_capability_gated() {
        let keypair = Keypair::from_seed(&[0x55; 32]);
        let key = EntryKey::derive(keypair.public_key().as_bytes(), "mediator/profile");
        let entry = EntryBuilder::new(key, EntryKind::Mediator, 1)
            .payload(b"languages: en, de".as_slice())
            .sign(&keypair);
        assert_eq!(entry.required_capability(), Some(Capability::Mediation));
    }
}
