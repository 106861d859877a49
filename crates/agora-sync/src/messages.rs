//! Wire messages for replication and bootstrap.
//!
//! Broadcast messages carry one record each; bootstrap messages carry the
//! exclusion-set handshake a joining node uses to pull everything it is
//! missing in one round trip.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use agora_core::{
    Capability, CapabilitySet, ChainTag, ContentHash, DeltaProfile, DeltaSet, EntryRefresh,
    EntryRemoval, SignedEntry, StateHash, StorePayload,
};

use crate::error::SyncError;

/// Network address of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Hostname or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl NodeAddress {
    /// Create from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| SyncError::Protocol(format!("invalid address: {s}")))?;
        if host.is_empty() {
            return Err(SyncError::Protocol(format!("invalid address: {s}")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| SyncError::Protocol(format!("invalid port in address: {s}")))?;
        Ok(Self::new(host, port))
    }
}

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Message size limits.
pub mod limits {
    /// Max entries in a single bootstrap response.
    pub const MAX_RESPONSE_ENTRIES: usize = 3_000;
    /// Max payloads in a single bootstrap response.
    pub const MAX_RESPONSE_PAYLOADS: usize = 10_000;
    /// Max raw hashes in an exclusion set.
    pub const MAX_EXCLUSION_HASHES: usize = 20_000;
    /// Above this many known items a request carries a delta sketch
    /// instead of listing every hash.
    pub const RAW_EXCLUSION_THRESHOLD: usize = 1_500;
    /// Max hashes in a state-hash pull response.
    pub const MAX_STATE_HASHES: usize = 1_000;
    /// Hard cap on a single encoded frame.
    pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;
}

/// What the requester already holds, so the responder can skip it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExclusionSet {
    /// Explicit content hashes, sorted. Used while the known set is small.
    Hashes(Vec<ContentHash>),
    /// An invertible sketch of the known set. Constant size no matter how
    /// much the requester holds.
    Delta(DeltaSet),
}

impl ExclusionSet {
    /// Build from the local known set, choosing the cheaper encoding.
    pub fn build(known: &HashSet<ContentHash>, profile: DeltaProfile, salt: u64) -> Self {
        if known.len() <= limits::RAW_EXCLUSION_THRESHOLD {
            Self::raw(known)
        } else {
            ExclusionSet::Delta(DeltaSet::encode(profile, salt, known.iter()))
        }
    }

    /// Build a raw hash list no matter how large the known set is, for
    /// peers that have not declared delta support. Clipped at the wire
    /// limit; a responder resending a few known items is harmless since
    /// the requester deduplicates on merge.
    pub fn raw(known: &HashSet<ContentHash>) -> Self {
        let mut hashes: Vec<ContentHash> = known.iter().copied().collect();
        hashes.sort();
        hashes.truncate(limits::MAX_EXCLUSION_HASHES);
        ExclusionSet::Hashes(hashes)
    }
}

/// Bootstrap request: send me everything you have that I don't.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRequest {
    /// Echo token. The response must carry it back unchanged; anything
    /// else is discarded without comment.
    pub nonce: u64,
    /// Protocol version of the requester.
    pub version: u16,
    /// What the requester already holds.
    pub exclusion: ExclusionSet,
    /// Capabilities of the requester. Items whose kind needs a capability
    /// the requester did not declare are withheld.
    pub capabilities: CapabilitySet,
    /// The requester's own listening address. Present on refresh requests
    /// from an already-connected node, absent on a cold handshake.
    pub requester: Option<NodeAddress>,
}

impl DataRequest {
    /// Whether this is a refresh from a node that already synced once.
    pub fn is_refresh(&self) -> bool {
        self.requester.is_some()
    }
}

/// Bootstrap response carrying the records the requester was missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataResponse {
    /// Nonce copied from the request.
    pub request_nonce: u64,
    /// Protocol version of the responder.
    pub version: u16,
    /// Entries the requester was missing.
    pub entries: Vec<SignedEntry>,
    /// Payloads the requester was missing.
    pub payloads: Vec<StorePayload>,
    /// Capabilities of the responder.
    pub capabilities: CapabilitySet,
    /// Copied from the request: true when this answers a refresh.
    pub refresh: bool,
    /// True when size limits clipped the response. The requester should
    /// follow up with another round to drain the remainder.
    pub truncated: bool,
}

/// Broadcast announcement of one chain state hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateHashAnnounce {
    /// Which chain the hash belongs to.
    pub chain: ChainTag,
    /// The announced height and digest.
    pub hash: StateHash,
}

/// Pull request for a peer's recent state hashes on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateHashesRequest {
    /// Echo token, same contract as [`DataRequest::nonce`].
    pub nonce: u64,
    /// Which chain to report on.
    pub chain: ChainTag,
    /// Only hashes at or above this height are wanted.
    pub from_height: u64,
}

/// Pull response carrying recent state hashes for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateHashesResponse {
    /// Nonce copied from the request.
    pub request_nonce: u64,
    /// Which chain these hashes belong to.
    pub chain: ChainTag,
    /// Hashes in ascending height order.
    pub hashes: Vec<StateHash>,
}

/// Top-level wire messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Envelope {
    /// Broadcast: a new or updated entry.
    AddEntry(SignedEntry),
    /// Broadcast: signed removal of an entry.
    RemoveEntry(EntryRemoval),
    /// Broadcast: TTL extension for an entry.
    RefreshEntry(EntryRefresh),
    /// Broadcast: a new append-only payload.
    AddPayload(StorePayload),
    /// Bootstrap request.
    DataRequest(DataRequest),
    /// Bootstrap response.
    DataResponse(DataResponse),
    /// State-hash gossip.
    StateHashAnnounce(StateHashAnnounce),
    /// State-hash pull request.
    StateHashesRequest(StateHashesRequest),
    /// State-hash pull response.
    StateHashesResponse(StateHashesResponse),
}

impl Envelope {
    /// Check that this message respects size limits.
    pub fn validate_limits(&self) -> Result<(), &'static str> {
        match self {
            Envelope::DataRequest(request) => {
                if let ExclusionSet::Hashes(hashes) = &request.exclusion {
                    if hashes.len() > limits::MAX_EXCLUSION_HASHES {
                        return Err("too many exclusion hashes");
                    }
                }
            }
            Envelope::DataResponse(response) => {
                if response.entries.len() > limits::MAX_RESPONSE_ENTRIES {
                    return Err("too many entries");
                }
                if response.payloads.len() > limits::MAX_RESPONSE_PAYLOADS {
                    return Err("too many payloads");
                }
            }
            Envelope::StateHashesResponse(response) => {
                if response.hashes.len() > limits::MAX_STATE_HASHES {
                    return Err("too many state hashes");
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Capability a peer must declare before this message is sent to it.
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            Envelope::AddEntry(entry) => entry.required_capability(),
            Envelope::AddPayload(payload) => payload.required_capability(),
            _ => None,
        }
    }

    /// Short name for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Envelope::AddEntry(_) => "AddEntry",
            Envelope::RemoveEntry(_) => "RemoveEntry",
            Envelope::RefreshEntry(_) => "RefreshEntry",
            Envelope::AddPayload(_) => "AddPayload",
            Envelope::DataRequest(_) => "DataRequest",
            Envelope::DataResponse(_) => "DataResponse",
            Envelope::StateHashAnnounce(_) => "StateHashAnnounce",
            Envelope::StateHashesRequest(_) => "StateHashesRequest",
            Envelope::StateHashesResponse(_) => "StateHashesResponse",
        }
    }
}
