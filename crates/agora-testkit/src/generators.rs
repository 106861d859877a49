//! Proptest generators for property-based testing.

use proptest::prelude::*;

use agora_core::{
    Capability, CapabilitySet, ContentHash, EntryBuilder, EntryKey, EntryKind, Keypair,
    PayloadKind, PublicKey, SignedEntry, StateDigest, StateHash, StorePayload,
};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random entry key.
pub fn entry_key() -> impl Strategy<Value = EntryKey> {
    any::<[u8; 32]>().prop_map(EntryKey::from_bytes)
}

/// Generate a random content hash.
pub fn content_hash() -> impl Strategy<Value = ContentHash> {
    any::<[u8; 32]>().prop_map(ContentHash::from_bytes)
}

/// Generate a random state digest.
pub fn state_digest() -> impl Strategy<Value = StateDigest> {
    any::<[u8; 32]>().prop_map(StateDigest::from_bytes)
}

/// Generate a state hash with a plausible height.
pub fn state_hash() -> impl Strategy<Value = StateHash> {
    (0u64..=10_000_000u64, state_digest())
        .prop_map(|(height, digest)| StateHash::new(height, digest))
}

/// Generate a random public key (with a real private half behind it).
pub fn public_key() -> impl Strategy<Value = PublicKey> {
    keypair().prop_map(|kp| kp.public_key())
}

/// Generate a valid sequence number (1-indexed).
pub fn sequence() -> impl Strategy<Value = u64> {
    1u64..=u64::MAX
}

/// Generate an entry kind.
pub fn entry_kind() -> impl Strategy<Value = EntryKind> {
    prop_oneof![
        Just(EntryKind::Offer),
        Just(EntryKind::Mailbox),
        Just(EntryKind::Alert),
        Just(EntryKind::Mediator),
    ]
}

/// Generate a payload kind.
pub fn payload_kind() -> impl Strategy<Value = PayloadKind> {
    prop_oneof![
        Just(PayloadKind::TradeReport),
        Just(PayloadKind::AccountWitness),
        Just(PayloadKind::SignedWitness),
    ]
}

/// Generate an arbitrary capability set.
pub fn capability_set() -> impl Strategy<Value = CapabilitySet> {
    proptest::collection::btree_set(
        prop_oneof![
            Just(Capability::TradeReports),
            Just(Capability::Mediation),
            Just(Capability::SignedWitness),
            Just(Capability::DeltaSync),
        ],
        0..=4,
    )
    .prop_map(|set| set.into_iter().collect())
}

/// Generate payload bytes up to a max length. Never empty, since empty
/// payloads fail structural validation.
pub fn payload_bytes(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..=max_len.max(1))
}

/// Generate an application label for key derivation.
pub fn label() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9/-]{0,31}".prop_map(String::from)
}

/// Everything needed to build one signed entry deterministically.
#[derive(Debug, Clone)]
pub struct EntryParams {
    pub keypair: Keypair,
    pub label: String,
    pub kind: EntryKind,
    pub sequence: u64,
    pub ttl_ms: Option<i64>,
    pub payload: Vec<u8>,
}

impl Arbitrary for EntryParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            any::<[u8; 32]>(),
            label(),
            entry_kind(),
            1u64..=1_000u64,
            proptest::option::of(1i64..=30 * 24 * 60 * 60 * 1_000i64),
            payload_bytes(1_000),
        )
            .prop_map(|(seed, label, kind, sequence, ttl_ms, payload)| EntryParams {
                keypair: Keypair::from_seed(&seed),
                label,
                kind,
                sequence,
                ttl_ms,
                payload,
            })
            .boxed()
    }
}

/// Build a signed entry from parameters.
pub fn entry_from_params(params: &EntryParams) -> SignedEntry {
    let key = EntryKey::derive(params.keypair.public_key().as_bytes(), &params.label);
    let mut builder =
        EntryBuilder::new(key, params.kind, params.sequence).payload(params.payload.clone());
    if let Some(ttl_ms) = params.ttl_ms {
        builder = builder.ttl_ms(ttl_ms);
    }
    builder.sign(&params.keypair)
}

/// Generate a fully signed, structurally valid entry.
pub fn signed_entry() -> impl Strategy<Value = SignedEntry> {
    any::<EntryParams>().prop_map(|params| entry_from_params(&params))
}

/// Generate a store payload.
pub fn store_payload() -> impl Strategy<Value = StorePayload> {
    (payload_kind(), payload_bytes(1_000))
        .prop_map(|(kind, body)| StorePayload::new(kind, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::validate_entry;

    proptest! {
        #[test]
        fn test_generated_entries_validate(entry in signed_entry()) {
            prop_assert!(validate_entry(&entry).is_ok());
        }

        #[test]
        fn test_content_hash_is_deterministic(params: EntryParams) {
            let a = entry_from_params(&params);
            let b = entry_from_params(&params);
            prop_assert_eq!(a.content_hash(), b.content_hash());
        }

        #[test]
        fn test_content_hash_covers_sequence(params: EntryParams) {
            prop_assume!(params.sequence < u64::MAX);
            let bumped = EntryParams {
                sequence: params.sequence + 1,
                ..params.clone()
            };
            let a = entry_from_params(&params);
            let b = entry_from_params(&bumped);
            prop_assert_ne!(a.content_hash(), b.content_hash());
        }

        #[test]
        fn test_distinct_payloads_hash_apart(
            seed in any::<[u8; 32]>(),
            p1 in payload_bytes(100),
            p2 in payload_bytes(100),
        ) {
            prop_assume!(p1 != p2);
            let keypair = Keypair::from_seed(&seed);
            let key = EntryKey::derive(keypair.public_key().as_bytes(), "offer");

            let a = EntryBuilder::new(key, EntryKind::Offer, 1)
                .payload(p1)
                .sign(&keypair);
            let b = EntryBuilder::new(key, EntryKind::Offer, 1)
                .payload(p2)
                .sign(&keypair);

            prop_assert_ne!(a.content_hash(), b.content_hash());
        }

        #[test]
        fn test_payload_id_ignores_nothing(payload in store_payload()) {
            let same = StorePayload::new(payload.kind, payload.body.clone());
            prop_assert_eq!(payload.payload_id(), same.payload_id());
        }

        #[test]
        fn test_capability_sets_roundtrip_permits(caps in capability_set()) {
            for capability in caps.iter() {
                prop_assert!(caps.permits(Some(capability)));
            }
            prop_assert!(caps.permits(None));
        }
    }
}
