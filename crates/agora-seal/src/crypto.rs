//! Key agreement and symmetric encryption for sealed messages.
//!
//! X25519 supplies the per-message shared secret, blake3 turns it into
//! a ChaCha20-Poly1305 key. Ed25519 identities stay in `agora-core`;
//! the X25519 keys here exist only for sealing and cannot sign.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::error::{Result, SealError};

/// Key-derivation context for sealed-message keys.
const SEAL_KEY_CONTEXT: &str = "agora/seal/v1 message key";

/// An X25519 public key a node publishes to receive sealed messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct X25519PublicKey(pub [u8; 32]);

impl X25519PublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

/// A node's long-lived X25519 secret, the private half of its mailbox.
pub struct MailboxSecret(StaticSecret);

impl MailboxSecret {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(StaticSecret::from(bytes))
    }

    /// Create from seed bytes. Deterministic.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// The public key senders seal to.
    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(PublicKey::from(&self.0))
    }

    /// Key agreement against a sender's ephemeral public key.
    pub fn diffie_hellman(&self, peer_public: &X25519PublicKey) -> SharedKey {
        let shared = self.0.diffie_hellman(&peer_public.to_dalek());
        SharedKey(*shared.as_bytes())
    }
}

/// A shared secret from X25519 key agreement. Never used to encrypt
/// directly; always run through [`SharedKey::derive_seal_key`] first.
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Derive the message key, binding it to both public halves of the
    /// agreement so a ciphertext cannot be re-targeted.
    pub fn derive_seal_key(
        &self,
        ephemeral: &X25519PublicKey,
        recipient: &X25519PublicKey,
    ) -> SealKey {
        let mut hasher = blake3::Hasher::new_derive_key(SEAL_KEY_CONTEXT);
        hasher.update(&self.0);
        hasher.update(ephemeral.as_bytes());
        hasher.update(recipient.as_bytes());
        SealKey(*hasher.finalize().as_bytes())
    }
}

/// A 256-bit ChaCha20-Poly1305 key for one sealed message.
pub struct SealKey([u8; 32]);

impl SealKey {
    /// Encrypt and authenticate a plaintext.
    pub fn encrypt(&self, plaintext: &[u8], nonce: &SealNonce) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| SealError::Encrypt(e.to_string()))?;
        cipher
            .encrypt(Nonce::from_slice(&nonce.0), plaintext)
            .map_err(|e| SealError::Encrypt(e.to_string()))
    }

    /// Decrypt and verify a ciphertext.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &SealNonce) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| SealError::Decrypt(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(&nonce.0), ciphertext)
            .map_err(|e| SealError::Decrypt(e.to_string()))
    }
}

/// A 96-bit ChaCha20-Poly1305 nonce, fresh per envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealNonce(pub [u8; 12]);

impl SealNonce {
    /// Generate a random nonce.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }
}

/// One-shot X25519 key pair, a fresh one per sealed message.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a key pair.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = X25519PublicKey::from(PublicKey::from(&secret));
        Self { secret, public }
    }

    /// The ephemeral public key, shipped inside the envelope.
    pub fn public_key(&self) -> X25519PublicKey {
        self.public
    }

    /// Key agreement with the recipient. Consumes the secret; an
    /// ephemeral key never agrees twice.
    pub fn diffie_hellman(self, peer_public: &X25519PublicKey) -> SharedKey {
        let shared = self.secret.diffie_hellman(&peer_public.to_dalek());
        SharedKey(*shared.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_key_agreement_is_symmetric() {
        let a = MailboxSecret::generate();
        let b = MailboxSecret::generate();

        let ab = a.diffie_hellman(&b.public_key());
        let ba = b.diffie_hellman(&a.public_key());

        assert_eq!(ab.0, ba.0);
    }

    #[test]
    fn test_ephemeral_agreement_matches_static_side() {
        let mailbox = MailboxSecret::generate();

        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();

        let sender_side = ephemeral.diffie_hellman(&mailbox.public_key());
        let recipient_side = mailbox.diffie_hellman(&ephemeral_public);

        assert_eq!(sender_side.0, recipient_side.0);
    }

    #[test]
    fn test_derived_key_binds_both_public_halves() {
        let shared = SharedKey([0x42; 32]);
        let eph = X25519PublicKey::from_bytes([1; 32]);
        let alice = X25519PublicKey::from_bytes([2; 32]);
        let bob = X25519PublicKey::from_bytes([3; 32]);

        let for_alice = shared.derive_seal_key(&eph, &alice);
        let for_bob = shared.derive_seal_key(&eph, &bob);

        assert_ne!(for_alice.0, for_bob.0);
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = SealKey([0x07; 32]);
        let nonce = SealNonce::generate();

        let ciphertext = key.encrypt(b"dispute opened on trade 9912", &nonce).unwrap();
        assert_ne!(&ciphertext, b"dispute opened on trade 9912");

        let plaintext = key.decrypt(&ciphertext, &nonce).unwrap();
        assert_eq!(plaintext, b"dispute opened on trade 9912");
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let nonce = SealNonce::generate();
        let ciphertext = SealKey([0x07; 32]).encrypt(b"secret", &nonce).unwrap();

        assert!(SealKey([0x08; 32]).decrypt(&ciphertext, &nonce).is_err());
    }

    #[test]
    fn test_deterministic_secret_from_seed() {
        let a = MailboxSecret::from_bytes([0x17; 32]);
        let b = MailboxSecret::from_bytes([0x17; 32]);
        assert_eq!(a.public_key(), b.public_key());
    }
}
