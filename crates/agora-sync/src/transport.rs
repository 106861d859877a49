//! Transport abstraction for the replication network.
//!
//! The transport delivers whole envelopes between nodes and tells the
//! upper layers which connections are live. Inbound traffic is pushed to
//! registered listeners from the transport's dispatch task; listeners
//! must return quickly and hand real work to a spawned task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use agora_core::CapabilitySet;

use crate::error::{Result, SyncError};
use crate::messages::{limits, Envelope, NodeAddress};

/// Receives envelopes delivered by the transport.
pub trait MessageListener: Send + Sync {
    /// Called for every inbound envelope. Runs on the dispatch task.
    fn on_message(&self, from: &NodeAddress, message: &Envelope);
}

/// Handle returned by [`Transport::add_listener`], used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A live, handshake-confirmed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// The remote node.
    pub peer: NodeAddress,
    /// Capabilities the remote declared.
    pub capabilities: CapabilitySet,
}

/// Transport trait for exchanging envelopes with peers.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one envelope to a peer.
    async fn send(&self, peer: &NodeAddress, message: Envelope) -> Result<()>;

    /// Register a listener for inbound envelopes.
    fn add_listener(&self, listener: Arc<dyn MessageListener>) -> ListenerId;

    /// Deregister a listener. Unknown ids are ignored.
    fn remove_listener(&self, id: ListenerId);

    /// Peers with an established connection, with their capabilities.
    async fn confirmed_connections(&self) -> Vec<Connection>;

    /// The local node's own address.
    fn local_address(&self) -> NodeAddress;
}

/// Encode an envelope into a length-checked wire frame.
pub fn encode_frame(message: &Envelope) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(message, &mut buf).map_err(|e| SyncError::Codec(e.to_string()))?;
    if buf.len() > limits::MAX_FRAME_BYTES {
        return Err(SyncError::Codec(format!(
            "frame too large: {} bytes",
            buf.len()
        )));
    }
    Ok(buf)
}

/// Decode a wire frame, enforcing size and structural limits.
pub fn decode_frame(frame: &[u8]) -> Result<Envelope> {
    if frame.len() > limits::MAX_FRAME_BYTES {
        return Err(SyncError::Codec(format!(
            "frame too large: {} bytes",
            frame.len()
        )));
    }
    let message: Envelope =
        ciborium::from_reader(frame).map_err(|e| SyncError::Codec(e.to_string()))?;
    message
        .validate_limits()
        .map_err(|e| SyncError::Protocol(e.into()))?;
    Ok(message)
}

/// An in-memory transport for testing.
///
/// Nodes attach to a shared hub; every send is framed, routed, decoded,
/// and dispatched exactly like a real wire would do it.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::mpsc;
    use tracing::warn;

    struct Delivery {
        from: NodeAddress,
        frame: Vec<u8>,
    }

    struct HubEntry {
        sender: mpsc::Sender<Delivery>,
        capabilities: CapabilitySet,
    }

    /// Shared routing table for a simulated network.
    pub struct MemoryHub {
        nodes: Mutex<HashMap<NodeAddress, HubEntry>>,
    }

    impl MemoryHub {
        /// Create an empty hub.
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                nodes: Mutex::new(HashMap::new()),
            })
        }

        /// Attach a node and spawn its dispatch task.
        pub fn attach(
            self: &Arc<Self>,
            address: NodeAddress,
            capabilities: CapabilitySet,
        ) -> MemoryTransport {
            let (tx, mut rx) = mpsc::channel::<Delivery>(1024);
            self.nodes.lock().unwrap().insert(
                address.clone(),
                HubEntry {
                    sender: tx,
                    capabilities,
                },
            );

            let listeners: Arc<Mutex<HashMap<ListenerId, Arc<dyn MessageListener>>>> =
                Arc::new(Mutex::new(HashMap::new()));

            let dispatch = Arc::clone(&listeners);
            tokio::spawn(async move {
                while let Some(delivery) = rx.recv().await {
                    let message = match decode_frame(&delivery.frame) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(from = %delivery.from, error = %e, "dropping undecodable frame");
                            continue;
                        }
                    };
                    let targets: Vec<Arc<dyn MessageListener>> =
                        dispatch.lock().unwrap().values().cloned().collect();
                    for listener in targets {
                        listener.on_message(&delivery.from, &message);
                    }
                }
            });

            MemoryTransport {
                address,
                hub: Arc::clone(self),
                listeners,
                next_listener: AtomicU64::new(0),
            }
        }

        /// Drop a node. Later sends to it fail with a transport fault.
        pub fn detach(&self, address: &NodeAddress) {
            self.nodes.lock().unwrap().remove(address);
        }
    }

    /// One node's endpoint on a [`MemoryHub`].
    pub struct MemoryTransport {
        address: NodeAddress,
        hub: Arc<MemoryHub>,
        listeners: Arc<Mutex<HashMap<ListenerId, Arc<dyn MessageListener>>>>,
        next_listener: AtomicU64,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, peer: &NodeAddress, message: Envelope) -> Result<()> {
            let frame = encode_frame(&message)?;
            let sender = {
                let nodes = self.hub.nodes.lock().unwrap();
                nodes.get(peer).map(|entry| entry.sender.clone())
            };
            let Some(sender) = sender else {
                return Err(SyncError::Transport(format!("no route to {peer}")));
            };
            sender
                .send(Delivery {
                    from: self.address.clone(),
                    frame,
                })
                .await
                .map_err(|_| SyncError::Transport(format!("connection to {peer} closed")))
        }

        fn add_listener(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
            let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
            self.listeners.lock().unwrap().insert(id, listener);
            id
        }

        fn remove_listener(&self, id: ListenerId) {
            self.listeners.lock().unwrap().remove(&id);
        }

        async fn confirmed_connections(&self) -> Vec<Connection> {
            let nodes = self.hub.nodes.lock().unwrap();
            nodes
                .iter()
                .filter(|(address, _)| *address != &self.address)
                .map(|(address, entry)| Connection {
                    peer: address.clone(),
                    capabilities: entry.capabilities.clone(),
                })
                .collect()
        }

        fn local_address(&self) -> NodeAddress {
            self.address.clone()
        }
    }
}
