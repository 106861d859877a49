//! Node wiring and lifecycle.
//!
//! A [`Node`] assembles the full data layer over a store, a transport,
//! and a peer manager: the replication service for live broadcasts, the
//! bootstrap requester and responder for catch-up, and the state-hash
//! monitor for cross-peer consistency. Construction wires everything;
//! [`Node::start`] registers the transport listeners and the TTL purge
//! task, and [`Node::stop`] tears them down again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use agora_core::{
    CapabilitySet, ContentHash, EntryBuilder, EntryKey, EntryKind, EntryRefresh, EntryRemoval,
    Keypair, PublicKey, SignedEntry, StateHash, StorePayload,
};
use agora_monitor::{
    CheckpointSet, MonitorConfig, MonitorListener, StateChain, StateHashService,
};
use agora_seal::{MailboxSecret, OpenedMessage, SealedEnvelope, X25519PublicKey};
use agora_store::{
    EntryOutcome, PayloadOutcome, RefreshOutcome, RemoveOutcome, Store,
};
use agora_sync::{
    BootstrapConfig, BootstrapManager, BootstrapOutcome, ListenerId, NodeAddress, PeerManager,
    ReplicationService, ResponderConfig, StoreListener, SyncResponder, Transport,
};

use agora_core::ChainTag;

use crate::error::{NodeError, Result};

/// Configuration for one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Capabilities this node declares to peers.
    pub capabilities: CapabilitySet,
    /// Bootstrap handshake tunables.
    pub bootstrap: BootstrapConfig,
    /// Response size caps when answering bootstrap requests.
    pub responder: ResponderConfig,
    /// State-hash gossip tunables.
    pub monitor: MonitorConfig,
    /// How often expired entries are purged.
    pub purge_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            capabilities: CapabilitySet::full(),
            bootstrap: BootstrapConfig::default(),
            responder: ResponderConfig::default(),
            monitor: MonitorConfig::default(),
            purge_interval: Duration::from_secs(60),
        }
    }
}

/// Listener registrations and tasks owned by a running node.
struct Running {
    replication_listener: ListenerId,
    responder_listener: ListenerId,
    monitor_listener: ListenerId,
    purge_task: JoinHandle<()>,
}

/// A fully wired node on the Agora data network.
pub struct Node<S, T, P> {
    keypair: Keypair,
    config: NodeConfig,
    replication: Arc<ReplicationService<S, T>>,
    responder: Arc<SyncResponder<S, T>>,
    bootstrap: BootstrapManager<S, T, P>,
    monitor: Arc<StateHashService<T, P>>,
    peers: Arc<P>,
    running: Mutex<Option<Running>>,
}

impl<S, T, P> Node<S, T, P>
where
    S: Store + 'static,
    T: Transport + 'static,
    P: PeerManager + 'static,
{
    /// Wire a node over its collaborators. Nothing listens or runs until
    /// [`Node::start`].
    pub fn new(
        keypair: Keypair,
        store: Arc<S>,
        transport: Arc<T>,
        peers: Arc<P>,
        config: NodeConfig,
    ) -> Arc<Self> {
        let replication = ReplicationService::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            config.capabilities.clone(),
        );
        let responder = SyncResponder::new(
            store,
            Arc::clone(&transport),
            config.capabilities.clone(),
            config.responder.clone(),
        );
        let bootstrap = BootstrapManager::new(
            Arc::clone(&replication),
            Arc::clone(&peers),
            config.bootstrap.clone(),
        );
        let monitor = StateHashService::new(transport, Arc::clone(&peers), config.monitor.clone());

        Arc::new(Self {
            keypair,
            config,
            replication,
            responder,
            bootstrap,
            monitor,
            peers,
            running: Mutex::new(None),
        })
    }

    /// This node's signing identity.
    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// The node's own transport address.
    pub fn local_address(&self) -> NodeAddress {
        self.replication.transport().local_address()
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        self.replication.store()
    }

    /// The peer manager.
    pub fn peers(&self) -> &Arc<P> {
        &self.peers
    }

    /// The state-hash monitor.
    pub fn monitor(&self) -> &Arc<StateHashService<T, P>> {
        &self.monitor
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Register the transport listeners and start the purge task.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock().unwrap();
        if running.is_some() {
            return Err(NodeError::AlreadyStarted);
        }

        let replication_listener = self.replication.attach();
        let responder_listener = self.responder.attach();
        let monitor_listener = self.monitor.attach();

        let store = Arc::clone(self.replication.store());
        let interval = self.config.purge_interval;
        let purge_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so a restarting
            // node finishes bootstrap before the first purge.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.purge_expired(now_millis()).await {
                    Ok(keys) if !keys.is_empty() => {
                        debug!(count = keys.len(), "purged expired entries");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "purge failed"),
                }
            }
        });

        *running = Some(Running {
            replication_listener,
            responder_listener,
            monitor_listener,
            purge_task,
        });
        info!(address = %self.local_address(), "node started");
        Ok(())
    }

    /// Deregister the listeners and stop the purge task.
    pub fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().unwrap().take() else {
            return Err(NodeError::NotStarted);
        };

        let transport = self.replication.transport();
        transport.remove_listener(running.replication_listener);
        transport.remove_listener(running.responder_listener);
        transport.remove_listener(running.monitor_listener);
        running.purge_task.abort();
        info!(address = %self.local_address(), "node stopped");
        Ok(())
    }

    /// Whether the node is currently started.
    pub fn is_running(&self) -> bool {
        self.running.lock().unwrap().is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Replicated writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Publish a signed entry to the network.
    pub async fn publish_entry(&self, entry: SignedEntry) -> Result<EntryOutcome> {
        Ok(self.replication.publish_entry(entry).await?)
    }

    /// Publish a signed removal.
    pub async fn publish_removal(&self, removal: EntryRemoval) -> Result<RemoveOutcome> {
        Ok(self.replication.publish_removal(removal).await?)
    }

    /// Publish a signed TTL refresh.
    pub async fn publish_refresh(&self, refresh: EntryRefresh) -> Result<RefreshOutcome> {
        Ok(self.replication.publish_refresh(refresh).await?)
    }

    /// Publish an append-only payload.
    pub async fn publish_payload(&self, payload: StorePayload) -> Result<PayloadOutcome> {
        Ok(self.replication.publish_payload(payload).await?)
    }

    /// Subscribe to accepted mutations.
    pub fn add_store_listener(&self, listener: Arc<dyn StoreListener>) {
        self.replication.add_store_listener(listener);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Bootstrap
    // ─────────────────────────────────────────────────────────────────────────

    /// Cold-start sync: walk the seed list until one round succeeds.
    pub async fn bootstrap_from_seeds(&self) -> Result<BootstrapOutcome> {
        Ok(self.bootstrap.bootstrap_from_seeds().await?)
    }

    /// One bootstrap round against one peer. `refresh` marks a repeat
    /// round from a node that has synced before.
    pub async fn sync_with(&self, peer: NodeAddress, refresh: bool) -> Result<BootstrapOutcome> {
        Ok(self.bootstrap.request_from(peer, refresh).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State-hash monitoring
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a chain and its checkpoint anchors with the monitor.
    pub fn register_chain(&self, chain: Arc<dyn StateChain>, checkpoints: CheckpointSet) {
        self.monitor.register(chain, checkpoints);
    }

    /// Record and announce a locally computed state hash.
    pub async fn publish_state_hash(&self, tag: ChainTag, hash: StateHash) -> Result<()> {
        Ok(self.monitor.publish(tag, hash).await?)
    }

    /// Pull one chain's recent hashes from every seed node.
    pub async fn pull_state_hashes(
        &self,
        tag: ChainTag,
        from_height: u64,
    ) -> Result<HashMap<NodeAddress, Vec<StateHash>>> {
        Ok(self.monitor.request_from_seeds(tag, from_height).await?)
    }

    /// Subscribe to chain conflict and checkpoint events.
    pub fn add_monitor_listener(&self, listener: Arc<dyn MonitorListener>) {
        self.monitor.add_listener(listener);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sealed direct messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Seal `body` to the recipient's mailbox key and publish it as a
    /// mailbox entry. Returns the entry key the recipient will find it
    /// under.
    ///
    /// The key is derived from the recipient's mailbox key and the
    /// ciphertext hash, so every sealed message lands under a fresh key
    /// and never competes with an earlier one for sequence numbers.
    pub async fn send_sealed(
        &self,
        recipient: &X25519PublicKey,
        body: &[u8],
    ) -> Result<EntryKey> {
        let envelope = SealedEnvelope::seal(body, &self.keypair, recipient)?;
        let bytes = envelope.to_bytes()?;
        let key = EntryKey::derive(
            recipient.as_bytes(),
            &ContentHash::hash(&bytes).to_hex(),
        );
        let entry = EntryBuilder::new(key, EntryKind::Mailbox, 1)
            .payload(bytes)
            .sign(&self.keypair);
        self.replication.publish_entry(entry).await?;
        Ok(key)
    }

    /// Open a mailbox entry with the recipient's mailbox secret.
    pub fn open_sealed(entry: &SignedEntry, mailbox: &MailboxSecret) -> Result<OpenedMessage> {
        if entry.kind != EntryKind::Mailbox {
            return Err(NodeError::NotAMailboxEntry(entry.kind));
        }
        let envelope = SealedEnvelope::from_bytes(&entry.payload)?;
        Ok(envelope.open(mailbox)?)
    }
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    use agora_store::MemoryStore;
    use agora_sync::{MemoryHub, MemoryTransport, StaticPeers};

    fn test_node(
        hub: &Arc<agora_sync::MemoryHub>,
        name: &str,
        config: NodeConfig,
    ) -> Arc<Node<MemoryStore, MemoryTransport, StaticPeers>> {
        let address = NodeAddress::new(name, 9000);
        let transport = Arc::new(hub.attach(address, config.capabilities.clone()));
        Node::new(
            Keypair::generate(),
            Arc::new(MemoryStore::new()),
            transport,
            Arc::new(StaticPeers::new(Vec::new())),
            config,
        )
    }

    #[tokio::test]
    async fn test_start_is_exclusive_and_stop_requires_start() {
        let hub = MemoryHub::new();
        let node = test_node(&hub, "a", NodeConfig::default());

        assert!(!node.is_running());
        node.start().unwrap();
        assert!(node.is_running());
        assert!(matches!(node.start(), Err(NodeError::AlreadyStarted)));

        node.stop().unwrap();
        assert!(!node.is_running());
        assert!(matches!(node.stop(), Err(NodeError::NotStarted)));

        // A stopped node can start again.
        node.start().unwrap();
        node.stop().unwrap();
    }

    #[tokio::test]
    async fn test_purge_task_expires_entries() {
        let hub = MemoryHub::new();
        let node = test_node(
            &hub,
            "a",
            NodeConfig {
                purge_interval: Duration::from_millis(20),
                ..NodeConfig::default()
            },
        );
        node.start().unwrap();

        let keypair = Keypair::generate();
        let key = EntryKey::derive(keypair.public_key().as_bytes(), "offer/doomed");
        let entry = EntryBuilder::new(key, EntryKind::Offer, 1)
            .payload(b"flash sale".as_slice())
            .ttl_ms(1)
            .sign(&keypair);
        node.publish_entry(entry).await.unwrap();

        for _ in 0..100 {
            if node.store().entry_count().await.unwrap() == 0 {
                node.stop().unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("entry was never purged");
    }

    #[tokio::test]
    async fn test_sealed_message_roundtrip() {
        let hub = MemoryHub::new();
        let node = test_node(&hub, "a", NodeConfig::default());
        let mailbox = MailboxSecret::generate();

        let key = node
            .send_sealed(&mailbox.public_key(), b"meet at height 4000")
            .await
            .unwrap();

        let entry = node.store().get_entry(&key).await.unwrap().unwrap();
        assert_eq!(entry.kind, EntryKind::Mailbox);

        let opened = Node::<MemoryStore, MemoryTransport, StaticPeers>::open_sealed(
            &entry, &mailbox,
        )
        .unwrap();
        assert_eq!(opened.body, b"meet at height 4000");
        assert_eq!(opened.sender, node.public_key());
    }

    #[tokio::test]
    async fn test_open_sealed_rejects_wrong_kind() {
        let keypair = Keypair::generate();
        let key = EntryKey::derive(keypair.public_key().as_bytes(), "offer/x");
        let entry = EntryBuilder::new(key, EntryKind::Offer, 1)
            .payload(b"not sealed".as_slice())
            .sign(&keypair);

        let err = Node::<MemoryStore, MemoryTransport, StaticPeers>::open_sealed(
            &entry,
            &MailboxSecret::generate(),
        )
        .unwrap_err();
        assert!(matches!(err, NodeError::NotAMailboxEntry(EntryKind::Offer)));
    }
}
