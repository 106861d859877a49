//! # Agora Sync
//!
//! Replication and bootstrap for the Agora data network: live broadcast
//! of signed mutations, plus the one-round-trip handshake a joining node
//! uses to pull everything it is missing.
//!
//! ## Overview
//!
//! Live traffic flows through the [`ReplicationService`]: every inbound
//! record is validated, merged by the store, and relayed onward only if
//! the merge changed state, so gossip dies out at converged nodes.
//!
//! A joining node runs the bootstrap handshake instead of replaying
//! history: it describes what it already holds (a hash list while small,
//! a constant-size delta sketch once large) and the responder ships back
//! exactly the rest.
//!
//! ## Key Properties
//!
//! - **Idempotent**: re-applying any record is a no-op
//! - **Order-free**: the store's merge rules make delivery order irrelevant
//! - **Silent rejection**: invalid records are dropped without telling the
//!   sender anything
//! - **Single-flight**: at most one bootstrap request per peer at a time
//!
//! ## Message Flow
//!
//! ```text
//! Requester                                Responder
//!   | register listener, arm timer           |
//!   |-------- DataRequest(nonce) ----------->|
//!   |                                        | filter: exclusion set,
//!   |                                        |   capabilities, limits
//!   |<------- DataResponse(nonce) -----------|
//!   | nonce match? apply : ignore            |
//!   | tear down timer + listener             |
//! ```

pub mod bootstrap;
pub mod error;
pub mod messages;
pub mod peers;
pub mod replication;
pub mod responder;
pub mod tracker;
pub mod transport;

pub use bootstrap::{BootstrapConfig, BootstrapHandler, BootstrapManager, BootstrapOutcome};
pub use error::{Result, SyncError};
pub use messages::{
    limits, DataRequest, DataResponse, Envelope, ExclusionSet, NodeAddress, StateHashAnnounce,
    StateHashesRequest, StateHashesResponse, PROTOCOL_VERSION,
};
pub use peers::{PeerManager, StaticPeers};
pub use replication::{ReplicationService, ResponseSummary, StoreListener};
pub use responder::{ResponderConfig, SyncResponder};
pub use tracker::RequestTracker;
pub use transport::{
    decode_frame, encode_frame,
    memory::{MemoryHub, MemoryTransport},
    Connection, ListenerId, MessageListener, Transport,
};
