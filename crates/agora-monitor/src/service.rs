//! Multi-chain state-hash gossip.
//!
//! ## Overview
//!
//! One service instance watches any number of registered chains. For
//! each chain it keeps a bounded window of locally computed hashes,
//! remembers the latest hash heard from every peer, and derives two
//! flags from the comparison: divergence from a seed node and
//! divergence from an ordinary peer. Publishing a hash first runs it
//! through the chain's [`CheckpointSet`]; a failed anchor halts that
//! chain for good.
//!
//! ## Usage
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use agora_core::{CapabilitySet, ChainTag, StateDigest, StateHash};
//! # use agora_sync::{MemoryHub, NodeAddress, StaticPeers};
//! # use agora_monitor::{ChainDescriptor, CheckpointSet, MonitorConfig, StateHashService};
//! # async fn demo() -> agora_monitor::Result<()> {
//! let hub = MemoryHub::new();
//! let transport = Arc::new(hub.attach(NodeAddress::new("local", 4040), CapabilitySet::full()));
//! let peers = Arc::new(StaticPeers::new(vec![NodeAddress::new("seed", 4040)]));
//!
//! let monitor = StateHashService::new(transport, peers, MonitorConfig::default());
//! let ledger = ChainTag::new(1);
//! monitor.register(Arc::new(ChainDescriptor::new(ledger, "ledger")), CheckpointSet::empty());
//! monitor.attach();
//!
//! monitor.publish(ledger, StateHash::new(100, StateDigest::hash(b"state"))).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use agora_core::{ChainTag, StateHash};
use agora_sync::{
    limits, Envelope, ListenerId, MessageListener, NodeAddress, PeerManager, RequestTracker,
    StateHashAnnounce, StateHashesRequest, StateHashesResponse, SyncError, Transport,
};

use crate::chain::StateChain;
use crate::checkpoint::CheckpointSet;
use crate::error::{MonitorError, Result};
use crate::handler::PullHandler;

/// Tunables for the gossip service.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How long a state-hash pull may wait for its response.
    pub pull_timeout: Duration,
    /// How many local hashes to retain per chain.
    pub window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            pull_timeout: Duration::from_secs(30),
            window: limits::MAX_STATE_HASHES,
        }
    }
}

/// Observer for chain-level events.
pub trait MonitorListener: Send + Sync {
    /// Local or peer hashes for the chain changed.
    fn on_state_hashes_changed(&self, _chain: ChainTag) {}

    /// A checkpoint anchor failed; the chain is halted.
    fn on_checkpoint_failed(&self, _chain: ChainTag, _height: u64) {}
}

/// Everything the service tracks for one registered chain.
struct ChainState {
    chain: Arc<dyn StateChain>,
    checkpoints: CheckpointSet,
    window: Mutex<VecDeque<StateHash>>,
    peer_hashes: Mutex<HashMap<NodeAddress, StateHash>>,
    seed_conflict: AtomicBool,
    peer_conflict: AtomicBool,
}

impl ChainState {
    fn push(&self, hash: StateHash, bound: usize) {
        let mut window = self.window.lock().unwrap();
        window.push_back(hash);
        while window.len() > bound {
            window.pop_front();
        }
    }

    /// Re-derive both conflict flags from the full peer map.
    ///
    /// A peer conflicts when it reported a height we also computed and
    /// the digests differ. Heights only one side has seen are not
    /// comparable and never count.
    fn recompute_conflicts(&self, peers: &dyn PeerManager) {
        let mut seed = false;
        let mut peer = false;
        {
            let window = self.window.lock().unwrap();
            let peer_hashes = self.peer_hashes.lock().unwrap();
            for (address, theirs) in peer_hashes.iter() {
                let Some(ours) = window.iter().find(|h| h.height == theirs.height) else {
                    continue;
                };
                if ours.digest == theirs.digest {
                    continue;
                }
                debug!(
                    chain = %self.chain.tag(),
                    peer = %address,
                    height = theirs.height,
                    ours = %ours.digest,
                    theirs = %theirs.digest,
                    "state hash mismatch"
                );
                if peers.is_seed_node(address) {
                    seed = true;
                } else {
                    peer = true;
                }
            }
        }

        if self.seed_conflict.swap(seed, Ordering::SeqCst) != seed {
            if seed {
                warn!(
                    chain = %self.chain.tag(),
                    name = self.chain.name(),
                    "derived state diverges from a seed node"
                );
            } else {
                info!(
                    chain = %self.chain.tag(),
                    name = self.chain.name(),
                    "derived state back in agreement with seed nodes"
                );
            }
        }
        if self.peer_conflict.swap(peer, Ordering::SeqCst) != peer && peer {
            debug!(chain = %self.chain.tag(), "derived state diverges from a non-seed peer");
        }
    }
}

/// Gossips per-chain state hashes and tracks divergence.
pub struct StateHashService<T, P> {
    transport: Arc<T>,
    peers: Arc<P>,
    config: MonitorConfig,
    chains: Mutex<HashMap<ChainTag, Arc<ChainState>>>,
    listeners: Mutex<Vec<Arc<dyn MonitorListener>>>,
    pulls: RequestTracker<PullHandler<T>>,
}

impl<T, P> StateHashService<T, P>
where
    T: Transport + 'static,
    P: PeerManager + 'static,
{
    /// Create a service with no chains registered yet.
    pub fn new(transport: Arc<T>, peers: Arc<P>, config: MonitorConfig) -> Arc<Self> {
        Arc::new(Self {
            transport,
            peers,
            config,
            chains: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            pulls: RequestTracker::new(),
        })
    }

    /// Register a chain and its checkpoint anchors.
    ///
    /// Registering the same tag again replaces the previous state.
    pub fn register(&self, chain: Arc<dyn StateChain>, checkpoints: CheckpointSet) {
        let tag = chain.tag();
        info!(
            chain = %tag,
            name = chain.name(),
            anchors = checkpoints.checkpoints().len(),
            "registered chain"
        );
        self.chains.lock().unwrap().insert(
            tag,
            Arc::new(ChainState {
                chain,
                checkpoints,
                window: Mutex::new(VecDeque::new()),
                peer_hashes: Mutex::new(HashMap::new()),
                seed_conflict: AtomicBool::new(false),
                peer_conflict: AtomicBool::new(false),
            }),
        );
    }

    /// Start consuming announcements and answering pulls.
    pub fn attach(self: &Arc<Self>) -> ListenerId {
        self.transport.add_listener(Arc::new(ServiceListener {
            service: Arc::clone(self),
        }))
    }

    /// Subscribe to chain events.
    pub fn add_listener(&self, listener: Arc<dyn MonitorListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// Tags of every registered chain.
    pub fn registered_chains(&self) -> Vec<ChainTag> {
        self.chains.lock().unwrap().keys().copied().collect()
    }

    /// Record a locally computed hash and announce it to every peer.
    ///
    /// The hash is checked against the chain's checkpoints first. A
    /// mismatch neither stores nor announces anything, fires
    /// [`MonitorListener::on_checkpoint_failed`] once, and leaves the
    /// chain refusing all further hashes.
    pub async fn publish(&self, tag: ChainTag, hash: StateHash) -> Result<()> {
        let state = self.chain(tag)?;

        if let Err(e) = state.checkpoints.verify(&hash) {
            if let MonitorError::IntegrityFault { height } = e {
                self.notify(|l| l.on_checkpoint_failed(tag, height));
            }
            return Err(e);
        }

        state.push(hash, self.config.window);
        state.recompute_conflicts(self.peers.as_ref());

        let announce = Envelope::StateHashAnnounce(StateHashAnnounce { chain: tag, hash });
        for connection in self.transport.confirmed_connections().await {
            if let Err(e) = self.transport.send(&connection.peer, announce.clone()).await {
                debug!(peer = %connection.peer, error = %e, "state hash announce failed");
            }
        }

        self.notify(|l| l.on_state_hashes_changed(tag));
        Ok(())
    }

    /// Pull recent hashes for one chain from one peer.
    ///
    /// Single-flight per peer. On success the newest received hash is
    /// recorded as the peer's position; on failure the peer is reported
    /// to the peer manager.
    pub async fn pull_from(
        &self,
        peer: NodeAddress,
        tag: ChainTag,
        from_height: u64,
    ) -> Result<Vec<StateHash>> {
        let state = self.chain(tag)?;

        let handler = PullHandler::new(
            peer.clone(),
            tag,
            from_height,
            self.config.pull_timeout,
            Arc::clone(&self.transport),
        );
        if !self.pulls.try_insert(peer.clone(), Arc::clone(&handler)) {
            return Err(SyncError::RequestPending(peer).into());
        }

        let result = Arc::clone(&handler).run().await;
        self.pulls.remove_matching(&peer, &handler);

        match result {
            Ok(hashes) => {
                if let Some(latest) = hashes.last() {
                    state.peer_hashes.lock().unwrap().insert(peer, *latest);
                    state.recompute_conflicts(self.peers.as_ref());
                    self.notify(|l| l.on_state_hashes_changed(tag));
                }
                Ok(hashes)
            }
            Err(e) => {
                self.peers.handle_connection_fault(&peer);
                Err(e)
            }
        }
    }

    /// Pull one chain's hashes from every seed node, one independent
    /// pull per seed.
    ///
    /// Individual failures are logged and escalated to the peer manager
    /// inside [`StateHashService::pull_from`]; the call errs only when
    /// no seed answered at all. Returns the hash lists of the seeds
    /// that did.
    pub async fn request_from_seeds(
        &self,
        tag: ChainTag,
        from_height: u64,
    ) -> Result<HashMap<NodeAddress, Vec<StateHash>>> {
        let seeds = self.peers.seed_nodes();
        if seeds.is_empty() {
            return Err(SyncError::Protocol("no seed nodes configured".into()).into());
        }

        let mut results = HashMap::new();
        let mut last_err = None;
        for seed in seeds {
            match self.pull_from(seed.clone(), tag, from_height).await {
                Ok(hashes) => {
                    results.insert(seed, hashes);
                }
                Err(e) => {
                    warn!(peer = %seed, chain = %tag, error = %e, "seed state hash pull failed");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) if results.is_empty() => Err(e),
            _ => Ok(results),
        }
    }

    /// The newest locally computed hash for the chain.
    pub fn latest(&self, tag: ChainTag) -> Result<Option<StateHash>> {
        Ok(self.chain(tag)?.window.lock().unwrap().back().copied())
    }

    /// Local hashes at or above a height, ascending.
    pub fn hashes_from(&self, tag: ChainTag, from_height: u64) -> Result<Vec<StateHash>> {
        let state = self.chain(tag)?;
        let window = state.window.lock().unwrap();
        Ok(window
            .iter()
            .filter(|h| h.height >= from_height)
            .copied()
            .collect())
    }

    /// Latest hash reported by each peer for the chain.
    pub fn peer_hashes(&self, tag: ChainTag) -> Result<HashMap<NodeAddress, StateHash>> {
        Ok(self.chain(tag)?.peer_hashes.lock().unwrap().clone())
    }

    /// Whether any seed node disagrees with a local hash.
    pub fn in_conflict_with_seed(&self, tag: ChainTag) -> Result<bool> {
        Ok(self.chain(tag)?.seed_conflict.load(Ordering::SeqCst))
    }

    /// Whether any non-seed peer disagrees with a local hash.
    pub fn in_conflict_with_peer(&self, tag: ChainTag) -> Result<bool> {
        Ok(self.chain(tag)?.peer_conflict.load(Ordering::SeqCst))
    }

    /// Whether every checkpoint anchor for the chain has been crossed.
    pub fn checkpoints_passed(&self, tag: ChainTag) -> Result<bool> {
        Ok(self.chain(tag)?.checkpoints.all_passed())
    }

    /// Whether the chain is halted by a failed checkpoint.
    pub fn checkpoints_failed(&self, tag: ChainTag) -> Result<bool> {
        Ok(self.chain(tag)?.checkpoints.is_failed())
    }

    fn chain(&self, tag: ChainTag) -> Result<Arc<ChainState>> {
        self.chains
            .lock()
            .unwrap()
            .get(&tag)
            .cloned()
            .ok_or(MonitorError::UnknownChain(tag))
    }

    fn record_announce(&self, from: &NodeAddress, announce: &StateHashAnnounce) {
        let Ok(state) = self.chain(announce.chain) else {
            debug!(peer = %from, chain = %announce.chain, "announce for unregistered chain");
            return;
        };
        state
            .peer_hashes
            .lock()
            .unwrap()
            .insert(from.clone(), announce.hash);
        state.recompute_conflicts(self.peers.as_ref());
        self.notify(|l| l.on_state_hashes_changed(announce.chain));
    }

    async fn answer_pull(&self, from: &NodeAddress, request: StateHashesRequest) {
        let Ok(state) = self.chain(request.chain) else {
            debug!(peer = %from, chain = %request.chain, "pull for unregistered chain");
            return;
        };

        let hashes: Vec<StateHash> = {
            let window = state.window.lock().unwrap();
            window
                .iter()
                .filter(|h| h.height >= request.from_height)
                .take(limits::MAX_STATE_HASHES)
                .copied()
                .collect()
        };
        let reply = Envelope::StateHashesResponse(StateHashesResponse {
            request_nonce: request.nonce,
            chain: request.chain,
            hashes,
        });
        if let Err(e) = self.transport.send(from, reply).await {
            warn!(peer = %from, error = %e, "state hash reply failed");
        }
    }

    fn notify(&self, f: impl Fn(&dyn MonitorListener)) {
        let listeners: Vec<_> = self.listeners.lock().unwrap().clone();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }
}

/// Routes announcements and pull requests into the service.
struct ServiceListener<T, P> {
    service: Arc<StateHashService<T, P>>,
}

impl<T, P> MessageListener for ServiceListener<T, P>
where
    T: Transport + 'static,
    P: PeerManager + 'static,
{
    fn on_message(&self, from: &NodeAddress, message: &Envelope) {
        match message {
            Envelope::StateHashAnnounce(announce) => {
                self.service.record_announce(from, announce);
            }
            Envelope::StateHashesRequest(request) => {
                let service = Arc::clone(&self.service);
                let from = from.clone();
                let request = request.clone();
                tokio::spawn(async move {
                    service.answer_pull(&from, request).await;
                });
            }
            _ => {}
        }
    }
}
