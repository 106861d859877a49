//! Requester side of the bootstrap handshake.
//!
//! One [`BootstrapHandler`] drives one request to one peer: register a
//! response listener, arm the timeout, send the request, and wait for
//! whichever finishes first. A response with the wrong nonce is ignored
//! outright and the request stays pending; only the armed timer can end
//! it then. The [`BootstrapManager`] enforces a single in-flight request
//! per peer and walks the seed list on cold start.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use agora_core::{Capability, DeltaProfile};
use agora_store::Store;

use crate::error::{Result, SyncError};
use crate::messages::{
    DataRequest, DataResponse, Envelope, ExclusionSet, NodeAddress, PROTOCOL_VERSION,
};
use crate::peers::PeerManager;
use crate::replication::{ReplicationService, ResponseSummary};
use crate::tracker::RequestTracker;
use crate::transport::{ListenerId, MessageListener, Transport};

/// Tunables for the bootstrap handshake.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// How long to wait for a response before giving up on the peer.
    pub response_timeout: Duration,
    /// Sketch profile used once the known set outgrows a raw hash list.
    pub delta_profile: DeltaProfile,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(90),
            delta_profile: DeltaProfile::Compact,
        }
    }
}

/// What one completed bootstrap round delivered.
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    /// The peer that answered.
    pub peer: NodeAddress,
    /// Merge counts from applying the response.
    pub summary: ResponseSummary,
    /// True when the responder clipped the response at its size limits.
    pub truncated: bool,
}

/// One in-flight data request to one peer.
pub struct BootstrapHandler<S, T> {
    peer: NodeAddress,
    refresh: bool,
    nonce: u64,
    config: BootstrapConfig,
    replication: Arc<ReplicationService<S, T>>,
    stopped: AtomicBool,
    listener_id: Mutex<Option<ListenerId>>,
    timeout_task: Mutex<Option<JoinHandle<()>>>,
    completion: Mutex<Option<oneshot::Sender<Result<BootstrapOutcome>>>>,
}

impl<S: Store + 'static, T: Transport + 'static> BootstrapHandler<S, T> {
    /// Create a handler for one request. `refresh` marks a repeat round
    /// from a node that has synced before.
    pub fn new(
        peer: NodeAddress,
        refresh: bool,
        config: BootstrapConfig,
        replication: Arc<ReplicationService<S, T>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            peer,
            refresh,
            nonce: rand::random(),
            config,
            replication,
            stopped: AtomicBool::new(false),
            listener_id: Mutex::new(None),
            timeout_task: Mutex::new(None),
            completion: Mutex::new(None),
        })
    }

    /// Run the request to completion.
    pub async fn run(self: Arc<Self>) -> Result<BootstrapOutcome> {
        let (tx, rx) = oneshot::channel();
        *self.completion.lock().unwrap() = Some(tx);

        let listener = Arc::new(ResponseListener {
            handler: Arc::clone(&self),
        });
        let id = self.replication.transport().add_listener(listener);
        *self.listener_id.lock().unwrap() = Some(id);

        // Armed before the request leaves, so a peer that answers
        // between send and arm can never leave the request hanging.
        let timed = Arc::clone(&self);
        let timeout = self.config.response_timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            timed.complete(Err(SyncError::Timeout(timeout)));
        });
        *self.timeout_task.lock().unwrap() = Some(handle);

        match self.build_request().await {
            Ok(request) => {
                debug!(peer = %self.peer, nonce = self.nonce, refresh = self.refresh, "sending data request");
                if let Err(e) = self
                    .replication
                    .transport()
                    .send(&self.peer, Envelope::DataRequest(request))
                    .await
                {
                    self.complete(Err(e));
                }
            }
            Err(e) => self.complete(Err(e)),
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Protocol("bootstrap handler dropped".into())),
        }
    }

    async fn build_request(&self) -> Result<DataRequest> {
        let known = self.replication.store().known_hashes().await?;
        // Sketches only go to peers that declared delta support; everyone
        // else gets a raw hash list however large the known set is.
        let exclusion = if self.peer_supports_delta().await {
            ExclusionSet::build(&known, self.config.delta_profile, rand::random())
        } else {
            ExclusionSet::raw(&known)
        };
        Ok(DataRequest {
            nonce: self.nonce,
            version: PROTOCOL_VERSION,
            exclusion,
            capabilities: self.replication.capabilities().clone(),
            requester: self
                .refresh
                .then(|| self.replication.transport().local_address()),
        })
    }

    async fn peer_supports_delta(&self) -> bool {
        self.replication
            .transport()
            .confirmed_connections()
            .await
            .iter()
            .find(|c| c.peer == self.peer)
            .is_some_and(|c| c.capabilities.contains(Capability::DeltaSync))
    }

    async fn process_response(self: Arc<Self>, response: DataResponse) {
        match self.replication.apply_response(&response).await {
            Ok(summary) => {
                info!(
                    peer = %self.peer,
                    entries = summary.entries_applied,
                    payloads = summary.payloads_applied,
                    truncated = response.truncated,
                    "bootstrap round complete"
                );
                self.complete(Ok(BootstrapOutcome {
                    peer: self.peer.clone(),
                    summary,
                    truncated: response.truncated,
                }));
            }
            Err(e) => self.complete(Err(e)),
        }
    }

    /// First completion wins; every path tears down the timer and the
    /// listener before delivering the result.
    fn complete(&self, result: Result<BootstrapOutcome>) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.timeout_task.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(id) = self.listener_id.lock().unwrap().take() {
            self.replication.transport().remove_listener(id);
        }
        if let Some(tx) = self.completion.lock().unwrap().take() {
            let _ = tx.send(result);
        }
    }
}

/// Listener bound to one handler's nonce.
struct ResponseListener<S, T> {
    handler: Arc<BootstrapHandler<S, T>>,
}

impl<S: Store + 'static, T: Transport + 'static> MessageListener for ResponseListener<S, T> {
    fn on_message(&self, from: &NodeAddress, message: &Envelope) {
        let Envelope::DataResponse(response) = message else {
            return;
        };
        if self.handler.stopped.load(Ordering::SeqCst) || from != &self.handler.peer {
            return;
        }
        if response.version != PROTOCOL_VERSION {
            warn!(peer = %from, version = response.version, "ignoring response with unsupported protocol version");
            return;
        }
        if response.request_nonce != self.handler.nonce {
            // Stale or forged. Say nothing and let the timer decide.
            debug!(
                peer = %from,
                got = response.request_nonce,
                expected = self.handler.nonce,
                "ignoring response with wrong nonce"
            );
            return;
        }

        let handler = Arc::clone(&self.handler);
        let response = response.clone();
        tokio::spawn(async move {
            handler.process_response(response).await;
        });
    }
}

/// Drives bootstrap rounds and enforces one request per peer.
pub struct BootstrapManager<S, T, P> {
    replication: Arc<ReplicationService<S, T>>,
    peers: Arc<P>,
    config: BootstrapConfig,
    tracker: RequestTracker<BootstrapHandler<S, T>>,
}

impl<S, T, P> BootstrapManager<S, T, P>
where
    S: Store + 'static,
    T: Transport + 'static,
    P: PeerManager + 'static,
{
    /// Create a manager.
    pub fn new(
        replication: Arc<ReplicationService<S, T>>,
        peers: Arc<P>,
        config: BootstrapConfig,
    ) -> Self {
        Self {
            replication,
            peers,
            config,
            tracker: RequestTracker::new(),
        }
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.tracker.active_count()
    }

    /// Request data from one peer. Fails fast if a request to the same
    /// peer is still pending.
    pub async fn request_from(&self, peer: NodeAddress, refresh: bool) -> Result<BootstrapOutcome> {
        let handler = BootstrapHandler::new(
            peer.clone(),
            refresh,
            self.config.clone(),
            Arc::clone(&self.replication),
        );
        if !self.tracker.try_insert(peer.clone(), Arc::clone(&handler)) {
            return Err(SyncError::RequestPending(peer));
        }

        let result = Arc::clone(&handler).run().await;
        self.tracker.remove_matching(&peer, &handler);

        if result.is_err() {
            self.peers.handle_connection_fault(&peer);
        }
        result
    }

    /// Cold-start sync: walk the seed list until one round succeeds.
    ///
    /// A truncated response is followed by a refresh round against the
    /// same seed to drain the remainder.
    pub async fn bootstrap_from_seeds(&self) -> Result<BootstrapOutcome> {
        let seeds = self.peers.seed_nodes();
        if seeds.is_empty() {
            return Err(SyncError::Protocol("no seed nodes configured".into()));
        }

        let mut last_err = None;
        for seed in seeds {
            match self.request_from(seed.clone(), false).await {
                Ok(outcome) if outcome.truncated => {
                    debug!(peer = %seed, "response truncated, draining remainder");
                    match self.request_from(seed, true).await {
                        Ok(more) => return Ok(more),
                        Err(_) => return Ok(outcome),
                    }
                }
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    warn!(peer = %seed, error = %e, "seed bootstrap failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("at least one seed was tried"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::limits;
    use crate::peers::StaticPeers;
    use crate::responder::{ResponderConfig, SyncResponder};
    use crate::transport::memory::{MemoryHub, MemoryTransport};
    use agora_core::{CapabilitySet, EntryBuilder, EntryKey, EntryKind, Keypair, PayloadKind, StorePayload};
    use agora_store::MemoryStore;

    struct Net {
        hub: Arc<MemoryHub>,
    }

    impl Net {
        fn new() -> Self {
            Self {
                hub: MemoryHub::new(),
            }
        }

        fn service(
            &self,
            name: &str,
        ) -> Arc<ReplicationService<MemoryStore, MemoryTransport>> {
            let transport = Arc::new(
                self.hub
                    .attach(NodeAddress::new(name, 9000), CapabilitySet::full()),
            );
            ReplicationService::new(Arc::new(MemoryStore::new()), transport, CapabilitySet::full())
        }
    }

    fn fast_config() -> BootstrapConfig {
        BootstrapConfig {
            response_timeout: Duration::from_millis(200),
            ..BootstrapConfig::default()
        }
    }

    async fn seed_with_data(
        service: &Arc<ReplicationService<MemoryStore, MemoryTransport>>,
        entries: u64,
        payloads: u64,
    ) {
        let keypair = Keypair::generate();
        for i in 0..entries {
            let key = EntryKey::derive(keypair.public_key().as_bytes(), &format!("offer/{i}"));
            let entry = EntryBuilder::new(key, EntryKind::Offer, 1)
                .payload(format!("offer {i}").into_bytes())
                .sign(&keypair);
            service.store().insert_entry(&entry, 1_000).await.unwrap();
        }
        for i in 0..payloads {
            let payload =
                StorePayload::new(PayloadKind::AccountWitness, format!("witness {i}").into_bytes());
            service.store().insert_payload(&payload, 1_000).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_cold_bootstrap_transfers_everything() {
        let net = Net::new();
        let seed = net.service("seed");
        let responder = SyncResponder::new(
            Arc::clone(seed.store()),
            Arc::clone(seed.transport()),
            CapabilitySet::full(),
            ResponderConfig::default(),
        );
        responder.attach();
        seed_with_data(&seed, 3, 2).await;

        let client = net.service("client");
        let peers = Arc::new(StaticPeers::new(vec![NodeAddress::new("seed", 9000)]));
        let manager = BootstrapManager::new(Arc::clone(&client), peers, fast_config());

        let outcome = manager.bootstrap_from_seeds().await.unwrap();
        assert_eq!(outcome.summary.entries_applied, 3);
        assert_eq!(outcome.summary.payloads_applied, 2);
        assert!(!outcome.truncated);
        assert_eq!(client.store().entry_count().await.unwrap(), 3);
        assert_eq!(client.store().payload_count().await.unwrap(), 2);
        assert!(client.initial_sync_applied());
    }

    #[tokio::test]
    async fn test_refresh_pulls_only_missing_records() {
        let net = Net::new();
        let seed = net.service("seed");
        let responder = SyncResponder::new(
            Arc::clone(seed.store()),
            Arc::clone(seed.transport()),
            CapabilitySet::full(),
            ResponderConfig::default(),
        );
        responder.attach();
        seed_with_data(&seed, 4, 0).await;

        let client = net.service("client");
        let peers = Arc::new(StaticPeers::new(vec![NodeAddress::new("seed", 9000)]));
        let manager = BootstrapManager::new(Arc::clone(&client), peers, fast_config());
        manager
            .request_from(NodeAddress::new("seed", 9000), false)
            .await
            .unwrap();
        assert_eq!(client.store().entry_count().await.unwrap(), 4);

        // One more record lands on the seed; a refresh fetches just it.
        seed_with_data(&seed, 0, 1).await;
        let outcome = manager
            .request_from(NodeAddress::new("seed", 9000), true)
            .await
            .unwrap();
        assert_eq!(outcome.summary.entries_applied, 0);
        assert_eq!(outcome.summary.payloads_applied, 1);
    }

    #[tokio::test]
    async fn test_silent_peer_times_out_and_faults() {
        let net = Net::new();
        let _mute_seed = net.service("seed"); // attached but no responder
        let client = net.service("client");

        let seed_addr = NodeAddress::new("seed", 9000);
        let peers = Arc::new(StaticPeers::new(vec![seed_addr.clone()]));
        let manager =
            BootstrapManager::new(Arc::clone(&client), Arc::clone(&peers), fast_config());

        let err = manager.request_from(seed_addr.clone(), false).await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));
        assert_eq!(peers.fault_count(&seed_addr), 1);
        assert_eq!(manager.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_second_request_to_same_peer_is_refused() {
        let net = Net::new();
        let _mute_seed = net.service("seed");
        let client = net.service("client");

        let seed_addr = NodeAddress::new("seed", 9000);
        let peers = Arc::new(StaticPeers::new(vec![seed_addr.clone()]));
        let manager = Arc::new(BootstrapManager::new(
            Arc::clone(&client),
            peers,
            BootstrapConfig {
                response_timeout: Duration::from_millis(500),
                ..BootstrapConfig::default()
            },
        ));

        let racing = Arc::clone(&manager);
        let first = tokio::spawn({
            let seed_addr = seed_addr.clone();
            async move { racing.request_from(seed_addr, false).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = manager
            .request_from(seed_addr.clone(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RequestPending(_)));

        // After the first settles, the peer is requestable again.
        assert!(first.await.unwrap().is_err());
        let err = manager.request_from(seed_addr, false).await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_wrong_nonce_response_is_ignored() {
        struct RogueResponder {
            transport: Arc<MemoryTransport>,
        }
        impl MessageListener for RogueResponder {
            fn on_message(&self, from: &NodeAddress, message: &Envelope) {
                let Envelope::DataRequest(request) = message else {
                    return;
                };
                let reply = DataResponse {
                    request_nonce: request.nonce.wrapping_add(1),
                    version: PROTOCOL_VERSION,
                    entries: Vec::new(),
                    payloads: vec![StorePayload::new(
                        PayloadKind::AccountWitness,
                        b"planted".as_slice(),
                    )],
                    capabilities: CapabilitySet::full(),
                    refresh: false,
                    truncated: false,
                };
                let transport = Arc::clone(&self.transport);
                let from = from.clone();
                tokio::spawn(async move {
                    let _ = transport.send(&from, Envelope::DataResponse(reply)).await;
                });
            }
        }

        let net = Net::new();
        let seed = net.service("seed");
        seed.transport().add_listener(Arc::new(RogueResponder {
            transport: Arc::clone(seed.transport()),
        }));

        let client = net.service("client");
        let peers = Arc::new(StaticPeers::new(vec![NodeAddress::new("seed", 9000)]));
        let manager = BootstrapManager::new(Arc::clone(&client), peers, fast_config());

        let err = manager
            .request_from(NodeAddress::new("seed", 9000), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));
        // The planted payload never made it in.
        assert_eq!(client.store().payload_count().await.unwrap(), 0);
        assert!(!client.initial_sync_applied());
    }

    #[tokio::test]
    async fn test_truncated_response_triggers_drain_round() {
        let net = Net::new();
        let seed = net.service("seed");
        let responder = SyncResponder::new(
            Arc::clone(seed.store()),
            Arc::clone(seed.transport()),
            CapabilitySet::full(),
            ResponderConfig {
                max_entries: 2,
                max_payloads: limits::MAX_RESPONSE_PAYLOADS,
            },
        );
        responder.attach();
        seed_with_data(&seed, 5, 0).await;

        let client = net.service("client");
        let peers = Arc::new(StaticPeers::new(vec![NodeAddress::new("seed", 9000)]));
        let manager = BootstrapManager::new(Arc::clone(&client), peers, fast_config());

        // First round is clipped at two entries; the follow-up refresh
        // continues from the updated exclusion set.
        let outcome = manager.bootstrap_from_seeds().await.unwrap();
        assert_eq!(client.store().entry_count().await.unwrap(), 4);
        assert!(outcome.truncated);
    }
}
