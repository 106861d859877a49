//! The sealed envelope: sign, then encrypt to one recipient.
//!
//! ## Overview
//!
//! A sealed message travels the network as an ordinary opaque entry
//! payload. Everything identifying — the sender's Ed25519 key, their
//! signature, the message body — sits inside the ciphertext; outside
//! there is only a never-reused ephemeral X25519 key and a random
//! nonce. A relaying node learns nothing beyond the envelope's size,
//! and only the recipient's mailbox secret can open it.
//!
//! ## Usage
//!
//! ```
//! use agora_core::Keypair;
//! use agora_seal::{MailboxSecret, SealedEnvelope};
//!
//! let sender = Keypair::generate();
//! let mailbox = MailboxSecret::generate();
//!
//! let envelope =
//!     SealedEnvelope::seal(b"arbitration accepted", &sender, &mailbox.public_key()).unwrap();
//! let opened = envelope.open(&mailbox).unwrap();
//!
//! assert_eq!(opened.sender, sender.public_key());
//! assert_eq!(opened.body, b"arbitration accepted");
//! ```

use serde::{Deserialize, Serialize};

use agora_core::{Keypair, PublicKey, Signature};

use crate::crypto::{EphemeralKeyPair, MailboxSecret, SealNonce, X25519PublicKey};
use crate::error::{Result, SealError};

/// Domain prefix for the sender signature inside a sealed envelope.
pub const SEAL_SIGN_DOMAIN: &[u8] = b"agora/seal-sig/v1";

/// What travels inside the ciphertext.
#[derive(Serialize, Deserialize)]
struct SignedPlaintext {
    sender: PublicKey,
    signature: Signature,
    body: Vec<u8>,
}

/// A successfully opened envelope: the body plus its verified sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedMessage {
    /// Ed25519 identity whose signature over the body verified.
    pub sender: PublicKey,
    /// The message body.
    pub body: Vec<u8>,
}

/// A message encrypted to exactly one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedEnvelope {
    /// Sender's one-shot X25519 public key.
    pub ephemeral: X25519PublicKey,
    /// Cipher nonce, fresh per envelope.
    pub nonce: SealNonce,
    /// ChaCha20-Poly1305 ciphertext of the signed plaintext.
    pub ciphertext: Vec<u8>,
}

impl SealedEnvelope {
    /// Sign `body` with the sender's key and seal it to the recipient's
    /// mailbox key.
    pub fn seal(body: &[u8], sender: &Keypair, recipient: &X25519PublicKey) -> Result<Self> {
        let signature = sender.sign(&signing_bytes(body));
        let inner = SignedPlaintext {
            sender: sender.public_key(),
            signature,
            body: body.to_vec(),
        };
        let mut plaintext = Vec::new();
        ciborium::into_writer(&inner, &mut plaintext)
            .map_err(|e| SealError::Malformed(e.to_string()))?;

        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();
        let key = ephemeral
            .diffie_hellman(recipient)
            .derive_seal_key(&ephemeral_public, recipient);

        let nonce = SealNonce::generate();
        let ciphertext = key.encrypt(&plaintext, &nonce)?;

        Ok(Self {
            ephemeral: ephemeral_public,
            nonce,
            ciphertext,
        })
    }

    /// Open with the recipient's mailbox secret.
    ///
    /// Decrypts, parses the signed plaintext, and verifies the sender
    /// signature. An envelope sealed to a different mailbox fails at
    /// the decryption step.
    pub fn open(&self, recipient: &MailboxSecret) -> Result<OpenedMessage> {
        let key = recipient
            .diffie_hellman(&self.ephemeral)
            .derive_seal_key(&self.ephemeral, &recipient.public_key());
        let plaintext = key.decrypt(&self.ciphertext, &self.nonce)?;

        let inner: SignedPlaintext = ciborium::from_reader(plaintext.as_slice())
            .map_err(|e| SealError::Malformed(e.to_string()))?;

        inner
            .sender
            .verify(&signing_bytes(&inner.body), &inner.signature)
            .map_err(|_| SealError::SenderSignature)?;

        Ok(OpenedMessage {
            sender: inner.sender,
            body: inner.body,
        })
    }

    /// Serialize for use as an opaque entry payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| SealError::Malformed(e.to_string()))?;
        Ok(buf)
    }

    /// Parse an envelope back out of entry payload bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| SealError::Malformed(e.to_string()))
    }
}

fn signing_bytes(body: &[u8]) -> Vec<u8> {
    let mut buf = SEAL_SIGN_DOMAIN.to_vec();
    buf.extend_from_slice(body);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_seal_open_identifies_sender() {
        let sender = Keypair::generate();
        let mailbox = MailboxSecret::generate();

        let envelope =
            SealedEnvelope::seal(b"please mediate trade 4471", &sender, &mailbox.public_key())
                .unwrap();
        let opened = envelope.open(&mailbox).unwrap();

        assert_eq!(opened.sender, sender.public_key());
        assert_eq!(opened.body, b"please mediate trade 4471");
    }

    #[test]
    fn test_wrong_mailbox_cannot_open() {
        let sender = Keypair::generate();
        let mailbox = MailboxSecret::generate();
        let other = MailboxSecret::generate();

        let envelope =
            SealedEnvelope::seal(b"for your eyes only", &sender, &mailbox.public_key()).unwrap();

        assert!(matches!(
            envelope.open(&other).unwrap_err(),
            SealError::Decrypt(_)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let sender = Keypair::generate();
        let mailbox = MailboxSecret::generate();

        let mut envelope =
            SealedEnvelope::seal(b"original", &sender, &mailbox.public_key()).unwrap();
        envelope.ciphertext[0] ^= 0x01;

        assert!(matches!(
            envelope.open(&mailbox).unwrap_err(),
            SealError::Decrypt(_)
        ));
    }

    #[test]
    fn test_forged_inner_signature_rejected() {
        let sender = Keypair::generate();
        let imposter = Keypair::generate();
        let mailbox = MailboxSecret::generate();

        // Build the inner plaintext by hand with a signature from the
        // wrong key, then seal it exactly as `seal` would.
        let body = b"transfer everything to me".to_vec();
        let inner = SignedPlaintext {
            sender: sender.public_key(),
            signature: imposter.sign(&signing_bytes(&body)),
            body,
        };
        let mut plaintext = Vec::new();
        ciborium::into_writer(&inner, &mut plaintext).unwrap();

        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();
        let key = ephemeral
            .diffie_hellman(&mailbox.public_key())
            .derive_seal_key(&ephemeral_public, &mailbox.public_key());
        let nonce = SealNonce::generate();
        let envelope = SealedEnvelope {
            ephemeral: ephemeral_public,
            nonce,
            ciphertext: key.encrypt(&plaintext, &nonce).unwrap(),
        };

        assert!(matches!(
            envelope.open(&mailbox).unwrap_err(),
            SealError::SenderSignature
        ));
    }

    #[test]
    fn test_envelope_survives_payload_encoding() {
        let sender = Keypair::generate();
        let mailbox = MailboxSecret::generate();

        let envelope = SealedEnvelope::seal(b"ride-along", &sender, &mailbox.public_key()).unwrap();
        let bytes = envelope.to_bytes().unwrap();
        let restored = SealedEnvelope::from_bytes(&bytes).unwrap();

        assert_eq!(restored, envelope);
        assert_eq!(restored.open(&mailbox).unwrap().body, b"ride-along");
    }

    #[test]
    fn test_garbage_bytes_are_malformed() {
        assert!(matches!(
            SealedEnvelope::from_bytes(b"not an envelope").unwrap_err(),
            SealError::Malformed(_)
        ));
    }

    #[test]
    fn test_each_seal_is_unique() {
        let sender = Keypair::generate();
        let mailbox = MailboxSecret::generate();

        let a = SealedEnvelope::seal(b"same body", &sender, &mailbox.public_key()).unwrap();
        let b = SealedEnvelope::seal(b"same body", &sender, &mailbox.public_key()).unwrap();

        // Fresh ephemeral key and nonce every time; identical bodies
        // must not produce recognizably identical envelopes.
        assert_ne!(a.ephemeral, b.ephemeral);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    proptest! {
        #[test]
        fn prop_any_body_seals_and_opens(body in proptest::collection::vec(any::<u8>(), 0..512)) {
            let sender = Keypair::generate();
            let mailbox = MailboxSecret::generate();

            let envelope = SealedEnvelope::seal(&body, &sender, &mailbox.public_key()).unwrap();
            let opened = envelope.open(&mailbox).unwrap();

            prop_assert_eq!(opened.body, body);
            prop_assert_eq!(opened.sender, sender.public_key());
        }
    }
}
