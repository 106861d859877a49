//! Protocol capability flags.
//!
//! A capability is a feature flag a peer declares in its requests; the
//! responder withholds any item whose kind requires a capability the
//! requester did not declare. Unknown capability ids from newer peers are
//! ignored on decode, so old nodes interoperate with new ones.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A single protocol capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum Capability {
    /// Peer accepts and stores trade report payloads.
    TradeReports = 1,
    /// Peer accepts mediator profile entries.
    Mediation = 2,
    /// Peer accepts signed witness payloads.
    SignedWitness = 3,
    /// Peer understands delta-encoded exclusion sets.
    DeltaSync = 4,
}

impl Capability {
    /// Parse from the wire id. Unknown ids return None.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Capability::TradeReports),
            2 => Some(Capability::Mediation),
            3 => Some(Capability::SignedWitness),
            4 => Some(Capability::DeltaSync),
            _ => None,
        }
    }

    /// The wire id.
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Every capability this build knows about.
    pub fn all() -> [Capability; 4] {
        [
            Capability::TradeReports,
            Capability::Mediation,
            Capability::SignedWitness,
            Capability::DeltaSync,
        ]
    }
}

/// The set of capabilities a peer declares.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// The empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every capability this build supports.
    pub fn full() -> Self {
        Self(Capability::all().into_iter().collect())
    }

    /// Builder-style insertion.
    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    /// Add a capability.
    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    /// Whether this set declares the given capability.
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Whether an item requiring `required` may be sent to this peer.
    ///
    /// Items with no requirement always pass.
    pub fn permits(&self, required: Option<Capability>) -> bool {
        match required {
            Some(capability) => self.contains(capability),
            None => true,
        }
    }

    /// Iterate in wire-id order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.iter()).finish()
    }
}

// Wire form is a sorted list of u16 ids; unknown ids are dropped on decode
// rather than failing the whole message.
impl Serialize for CapabilitySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let ids: Vec<u16> = self.0.iter().map(|c| c.to_u16()).collect();
        ids.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CapabilitySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ids = Vec::<u16>::deserialize(deserializer)?;
        Ok(Self(ids.into_iter().filter_map(Capability::from_u16).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_and_permits() {
        let caps = CapabilitySet::empty().with(Capability::TradeReports);
        assert!(caps.contains(Capability::TradeReports));
        assert!(!caps.contains(Capability::Mediation));
        assert!(caps.permits(None));
        assert!(caps.permits(Some(Capability::TradeReports)));
        assert!(!caps.permits(Some(Capability::Mediation)));
    }

    #[test]
    fn test_wire_roundtrip() {
        let caps = CapabilitySet::full();
        let mut buf = Vec::new();
        ciborium::into_writer(&caps, &mut buf).unwrap();
        let back: CapabilitySet = ciborium::from_reader(&buf[..]).unwrap();
        assert_eq!(caps, back);
    }

    #[test]
    fn test_unknown_ids_ignored() {
        // A newer peer may declare ids this build has never heard of.
        let ids: Vec<u16> = vec![1, 999, 4];
        let mut buf = Vec::new();
        ciborium::into_writer(&ids, &mut buf).unwrap();
        let caps: CapabilitySet = ciborium::from_reader(&buf[..]).unwrap();
        assert!(caps.contains(Capability::TradeReports));
        assert!(caps.contains(Capability::DeltaSync));
        assert_eq!(caps.len(), 2);
    }

    #[test]
    fn test_kind_ids_are_stable() {
        for cap in Capability::all() {
            assert_eq!(Capability::from_u16(cap.to_u16()), Some(cap));
        }
        assert_eq!(Capability::from_u16(0), None);
    }
}
