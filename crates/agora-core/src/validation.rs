//! Entry and payload validation: structural checks and signature verification.

use crate::entry::{EntryRefresh, EntryRemoval, SignedEntry, MAX_ENTRY_PAYLOAD};
use crate::error::ValidationError;
use crate::payload::{StorePayload, MAX_PAYLOAD_BODY};

/// Longest TTL any entry may request: 30 days.
pub const MAX_TTL_MS: i64 = 30 * 24 * 60 * 60 * 1_000;

/// Validate an entry's structure and owner signature.
///
/// Structural checks run first so malformed input is rejected before the
/// signature verification cost is paid.
pub fn validate_entry(entry: &SignedEntry) -> Result<(), ValidationError> {
    validate_entry_structure(entry)?;

    entry
        .verify_signature()
        .map_err(|_| ValidationError::SignatureFailed)?;

    Ok(())
}

/// Validate entry structure without signature verification.
///
/// Useful when the entry is known to be valid, e.g. reloaded from local
/// storage that only ever held verified entries.
pub fn validate_entry_structure(entry: &SignedEntry) -> Result<(), ValidationError> {
    // 1. Payload must be present
    if entry.payload.is_empty() {
        return Err(ValidationError::EmptyPayload);
    }

    // 2. Payload size bound
    if entry.payload.len() > MAX_ENTRY_PAYLOAD {
        return Err(ValidationError::PayloadTooLarge {
            len: entry.payload.len(),
            max: MAX_ENTRY_PAYLOAD,
        });
    }

    // 3. TTL must be positive and bounded
    if entry.ttl_ms <= 0 || entry.ttl_ms > MAX_TTL_MS {
        return Err(ValidationError::TtlOutOfRange(entry.ttl_ms));
    }

    // 4. Sequence numbers start at 1
    if entry.sequence == 0 {
        return Err(ValidationError::ZeroSequence);
    }

    Ok(())
}

/// Validate an append-only payload.
pub fn validate_payload(payload: &StorePayload) -> Result<(), ValidationError> {
    if payload.body.is_empty() {
        return Err(ValidationError::EmptyPayload);
    }

    if payload.body.len() > MAX_PAYLOAD_BODY {
        return Err(ValidationError::PayloadTooLarge {
            len: payload.body.len(),
            max: MAX_PAYLOAD_BODY,
        });
    }

    Ok(())
}

/// Validate a removal record's structure and signature.
///
/// The signature proves control of the key the removal carries; whether
/// that key matches the pinned owner is the store's decision.
pub fn validate_removal(removal: &EntryRemoval) -> Result<(), ValidationError> {
    if removal.sequence == 0 {
        return Err(ValidationError::ZeroSequence);
    }

    removal
        .verify_signature()
        .map_err(|_| ValidationError::SignatureFailed)?;

    Ok(())
}

/// Validate a refresh record's structure.
///
/// The signature can only be checked against the stored owner key, so the
/// store verifies it after lookup.
pub fn validate_refresh_structure(refresh: &EntryRefresh) -> Result<(), ValidationError> {
    if refresh.sequence == 0 {
        return Err(ValidationError::ZeroSequence);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Keypair, Signature};
    use crate::entry::{EntryBuilder, EntryKind};
    use crate::payload::PayloadKind;
    use crate::types::EntryKey;
    use bytes::Bytes;

    fn make_test_keypair() -> Keypair {
        Keypair::from_seed(&[0x42; 32])
    }

    fn signed_offer(sequence: u64) -> SignedEntry {
        let keypair = make_test_keypair();
        let key = EntryKey::derive(keypair.public_key().as_bytes(), "offer");
        EntryBuilder::new(key, EntryKind::Offer, sequence)
            .payload(b"sell 0.5 btc".as_slice())
            .sign(&keypair)
    }

    #[test]
    fn test_valid_entry() {
        assert!(validate_entry(&signed_offer(1)).is_ok());
    }

    #[test]
    fn test_empty_payload_rejected() {
        let keypair = make_test_keypair();
        let key = EntryKey::derive(keypair.public_key().as_bytes(), "offer");
        let entry = EntryBuilder::new(key, EntryKind::Offer, 1).sign(&keypair);

        let result = validate_entry(&entry);
        assert!(matches!(result, Err(ValidationError::EmptyPayload)));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let keypair = make_test_keypair();
        let key = EntryKey::derive(keypair.public_key().as_bytes(), "offer");
        let entry = EntryBuilder::new(key, EntryKind::Offer, 1)
            .payload(vec![0u8; MAX_ENTRY_PAYLOAD + 1])
            .sign(&keypair);

        let result = validate_entry(&entry);
        assert!(matches!(
            result,
            Err(ValidationError::PayloadTooLarge { max: MAX_ENTRY_PAYLOAD, .. })
        ));
    }

    #[test]
    fn test_ttl_bounds() {
        let keypair = make_test_keypair();
        let key = EntryKey::derive(keypair.public_key().as_bytes(), "offer");

        for bad_ttl in [0, -5, MAX_TTL_MS + 1] {
            let entry = EntryBuilder::new(key, EntryKind::Offer, 1)
                .payload(b"x".as_slice())
                .ttl_ms(bad_ttl)
                .sign(&keypair);
            let result = validate_entry(&entry);
            assert!(matches!(result, Err(ValidationError::TtlOutOfRange(t)) if t == bad_ttl));
        }
    }

    #[test]
    fn test_zero_sequence_rejected() {
        let result = validate_entry(&signed_offer(0));
        assert!(matches!(result, Err(ValidationError::ZeroSequence)));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let mut entry = signed_offer(1);
        entry.signature = Signature::from_bytes([0xff; 64]);

        let result = validate_entry(&entry);
        assert!(matches!(result, Err(ValidationError::SignatureFailed)));

        // Structure alone still passes.
        assert!(validate_entry_structure(&entry).is_ok());
    }

    #[test]
    fn test_payload_validation() {
        let ok = StorePayload::new(PayloadKind::TradeReport, b"report".as_slice());
        assert!(validate_payload(&ok).is_ok());

        let empty = StorePayload::new(PayloadKind::TradeReport, Bytes::new());
        assert!(matches!(
            validate_payload(&empty),
            Err(ValidationError::EmptyPayload)
        ));

        let huge = StorePayload::new(PayloadKind::TradeReport, vec![0u8; MAX_PAYLOAD_BODY + 1]);
        assert!(matches!(
            validate_payload(&huge),
            Err(ValidationError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_removal_validation() {
        let keypair = make_test_keypair();
        let key = EntryKey::derive(keypair.public_key().as_bytes(), "offer");

        let removal = EntryRemoval::sign(key, 2, &keypair);
        assert!(validate_removal(&removal).is_ok());

        let zero = EntryRemoval::sign(key, 0, &keypair);
        assert!(matches!(
            validate_removal(&zero),
            Err(ValidationError::ZeroSequence)
        ));

        let mut forged = EntryRemoval::sign(key, 2, &keypair);
        forged.signature = Signature::from_bytes([0xaa; 64]);
        assert!(matches!(
            validate_removal(&forged),
            Err(ValidationError::SignatureFailed)
        ));
    }
}
