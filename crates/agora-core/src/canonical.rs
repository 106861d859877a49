//! Canonical CBOR encoding for signing and content addressing.
//!
//! Wire transfer and storage use serde/ciborium; signatures and content
//! hashes do not. They are computed over a hand-rolled RFC 8949 Core
//! Deterministic Encoding so that the signed bytes can never drift with a
//! serde or ciborium upgrade:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats
//!
//! Each record type gets its own domain-separation prefix, so a signature
//! over a removal can never be replayed as a signature over an add.

use ciborium::value::Value;

use crate::crypto::{PublicKey, Signature};
use crate::types::EntryKey;

/// Domain prefix for entry signatures.
pub const ENTRY_SIGN_DOMAIN: &[u8] = b"agora/entry-sig/v1";

/// Domain prefix for removal signatures.
pub const REMOVE_SIGN_DOMAIN: &[u8] = b"agora/remove-sig/v1";

/// Domain prefix for TTL-refresh signatures.
pub const REFRESH_SIGN_DOMAIN: &[u8] = b"agora/refresh-sig/v1";

/// Domain prefix for entry content hashes.
pub const ENTRY_ID_DOMAIN: &[u8] = b"agora/entry-id/v1";

/// Domain prefix for append-only payload content hashes.
pub const PAYLOAD_ID_DOMAIN: &[u8] = b"agora/payload-id/v1";

/// Field keys (integer keys 0-23 encode as single bytes in CBOR).
mod keys {
    pub const KEY: u64 = 0;
    pub const KIND: u64 = 1;
    pub const PAYLOAD: u64 = 2;
    pub const OWNER: u64 = 3;
    pub const SEQUENCE: u64 = 4;
    pub const TTL: u64 = 5;
}

/// The message an owner signs to add or update an entry.
pub fn entry_signing_bytes(
    key: &EntryKey,
    kind: u16,
    payload: &[u8],
    owner: &PublicKey,
    sequence: u64,
    ttl_ms: i64,
) -> Vec<u8> {
    let value = Value::Map(vec![
        (int_key(keys::KEY), Value::Bytes(key.0.to_vec())),
        (int_key(keys::KIND), Value::Integer(kind.into())),
        (int_key(keys::PAYLOAD), Value::Bytes(payload.to_vec())),
        (int_key(keys::OWNER), Value::Bytes(owner.0.to_vec())),
        (int_key(keys::SEQUENCE), Value::Integer(sequence.into())),
        (int_key(keys::TTL), Value::Integer(ttl_ms.into())),
    ]);

    let mut buf = ENTRY_SIGN_DOMAIN.to_vec();
    encode_value_to(&mut buf, &value);
    buf
}

/// The message an owner signs to remove an entry.
pub fn removal_signing_bytes(key: &EntryKey, owner: &PublicKey, sequence: u64) -> Vec<u8> {
    let value = Value::Map(vec![
        (int_key(keys::KEY), Value::Bytes(key.0.to_vec())),
        (int_key(keys::OWNER), Value::Bytes(owner.0.to_vec())),
        (int_key(keys::SEQUENCE), Value::Integer(sequence.into())),
    ]);

    let mut buf = REMOVE_SIGN_DOMAIN.to_vec();
    encode_value_to(&mut buf, &value);
    buf
}

/// The message an owner signs to re-arm an entry's TTL.
///
/// Deliberately payload-free: a refresh retransmits nothing but the key and
/// the bumped sequence number.
pub fn refresh_signing_bytes(key: &EntryKey, sequence: u64) -> Vec<u8> {
    let value = Value::Map(vec![
        (int_key(keys::KEY), Value::Bytes(key.0.to_vec())),
        (int_key(keys::SEQUENCE), Value::Integer(sequence.into())),
    ]);

    let mut buf = REFRESH_SIGN_DOMAIN.to_vec();
    encode_value_to(&mut buf, &value);
    buf
}

/// The preimage of an entry's content hash: the signed message plus the
/// signature itself.
///
/// Because the sequence number is part of the signed message, a bumped
/// entry hashes differently from its predecessor, which is what lets the
/// bootstrap responder spot updated entries a requester only knows an old
/// version of.
pub fn entry_content_bytes(
    key: &EntryKey,
    kind: u16,
    payload: &[u8],
    owner: &PublicKey,
    sequence: u64,
    ttl_ms: i64,
    signature: &Signature,
) -> Vec<u8> {
    let mut buf = ENTRY_ID_DOMAIN.to_vec();
    buf.extend_from_slice(&entry_signing_bytes(key, kind, payload, owner, sequence, ttl_ms));
    buf.extend_from_slice(&signature.0);
    buf
}

/// The preimage of an append-only payload's content hash.
pub fn payload_id_bytes(kind: u16, body: &[u8]) -> Vec<u8> {
    let value = Value::Map(vec![
        (int_key(keys::KIND), Value::Integer(kind.into())),
        (int_key(keys::PAYLOAD), Value::Bytes(body.to_vec())),
    ]);

    let mut buf = PAYLOAD_ID_DOMAIN.to_vec();
    encode_value_to(&mut buf, &value);
    buf
}

fn int_key(key: u64) -> Value {
    Value::Integer(key.into())
}

/// Recursively encode a CBOR value in deterministic form.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => {
            let n: i128 = (*i).into();
            if n >= 0 {
                encode_uint(buf, 0, n as u64);
            } else {
                // CBOR encodes -1 as 0, -2 as 1, etc.
                encode_uint(buf, 1, (-1 - n) as u64);
            }
        }
        Value::Bytes(b) => {
            encode_uint(buf, 2, b.len() as u64);
            buf.extend_from_slice(b);
        }
        Value::Text(s) => {
            encode_uint(buf, 3, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(arr) => {
            encode_uint(buf, 4, arr.len() as u64);
            for item in arr {
                encode_value_to(buf, item);
            }
        }
        Value::Map(entries) => {
            encode_map_canonical(buf, entries);
        }
        Value::Bool(b) => {
            buf.push(if *b { 0xf5 } else { 0xf4 });
        }
        Value::Null => {
            buf.push(0xf6);
        }
        _ => {
            panic!("unsupported CBOR value type in canonical encoding");
        }
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a map canonically (major type 5), keys sorted by encoded bytes.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut key_value_pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();

    key_value_pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, key_value_pairs.len() as u64);

    for (key_bytes, value) in key_value_pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}
