//! Replication service: merges records into the store and relays them.
//!
//! Every mutation, local or remote, flows through here. The service does
//! structural validation, lets the store arbitrate sequence and ownership,
//! and relays a record onward only when the merge actually changed state,
//! so gossip terminates at already-converged nodes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use agora_core::{
    validate_entry, validate_entry_structure, validate_payload, validate_refresh_structure,
    validate_removal, CapabilitySet, EntryKey, EntryRefresh, EntryRemoval, SignedEntry,
    StorePayload,
};
use agora_store::{EntryOutcome, PayloadOutcome, RefreshOutcome, RemoveOutcome, Store};

use crate::error::Result;
use crate::messages::{DataResponse, Envelope, NodeAddress};
use crate::transport::{ListenerId, MessageListener, Transport};

/// Application-side notifications for accepted mutations.
///
/// All methods default to no-ops; implementors override what they need.
/// Called synchronously on the applying task, so keep them cheap.
pub trait StoreListener: Send + Sync {
    fn on_entry_added(&self, _entry: &SignedEntry) {}
    fn on_entry_removed(&self, _key: &EntryKey) {}
    fn on_entry_refreshed(&self, _key: &EntryKey) {}
    fn on_payload_added(&self, _payload: &StorePayload) {}
}

/// Counts from applying one bootstrap response.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResponseSummary {
    /// Entries merged as new or updated.
    pub entries_applied: usize,
    /// Entries the store or validation refused.
    pub entries_rejected: usize,
    /// Payloads stored for the first time.
    pub payloads_applied: usize,
    /// Payloads skipped, including process-once kinds after the first sync.
    pub payloads_skipped: usize,
}

/// The replication service for one node.
pub struct ReplicationService<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    capabilities: CapabilitySet,
    listeners: Mutex<Vec<Arc<dyn StoreListener>>>,
    initial_sync_applied: AtomicBool,
}

impl<S: Store + 'static, T: Transport + 'static> ReplicationService<S, T> {
    /// Create a service over a store and transport.
    pub fn new(store: Arc<S>, transport: Arc<T>, capabilities: CapabilitySet) -> Arc<Self> {
        Arc::new(Self {
            store,
            transport,
            capabilities,
            listeners: Mutex::new(Vec::new()),
            initial_sync_applied: AtomicBool::new(false),
        })
    }

    /// Register on the transport and begin absorbing broadcasts.
    pub fn attach(self: &Arc<Self>) -> ListenerId {
        self.transport.add_listener(Arc::new(BroadcastListener {
            service: Arc::clone(self),
        }))
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The transport in use.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Capabilities this node declares in its requests.
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Whether a bootstrap response has been applied yet.
    pub fn initial_sync_applied(&self) -> bool {
        self.initial_sync_applied.load(Ordering::SeqCst)
    }

    /// Subscribe to accepted mutations.
    pub fn add_store_listener(&self, listener: Arc<dyn StoreListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    // ───── Local publication ─────

    /// Validate, store, and broadcast a locally authored entry.
    pub async fn publish_entry(&self, entry: SignedEntry) -> Result<EntryOutcome> {
        validate_entry(&entry)?;
        let outcome = self.store.insert_entry(&entry, now_millis()).await?;
        if outcome.is_accepted_change() {
            self.notify(|l| l.on_entry_added(&entry));
            self.relay(None, &Envelope::AddEntry(entry)).await;
        }
        Ok(outcome)
    }

    /// Validate, apply, and broadcast a locally authored removal.
    pub async fn publish_removal(&self, removal: EntryRemoval) -> Result<RemoveOutcome> {
        validate_removal(&removal)?;
        let outcome = self.store.remove_entry(&removal).await?;
        if outcome.is_removed() {
            self.notify(|l| l.on_entry_removed(&removal.key));
            self.relay(None, &Envelope::RemoveEntry(removal)).await;
        }
        Ok(outcome)
    }

    /// Validate, apply, and broadcast a locally authored refresh.
    pub async fn publish_refresh(&self, refresh: EntryRefresh) -> Result<RefreshOutcome> {
        validate_refresh_structure(&refresh)?;
        let outcome = self.store.refresh_entry(&refresh, now_millis()).await?;
        if outcome.is_refreshed() {
            self.notify(|l| l.on_entry_refreshed(&refresh.key));
            self.relay(None, &Envelope::RefreshEntry(refresh)).await;
        }
        Ok(outcome)
    }

    /// Validate, store, and broadcast a locally authored payload.
    pub async fn publish_payload(&self, payload: StorePayload) -> Result<PayloadOutcome> {
        validate_payload(&payload)?;
        let outcome = self.store.insert_payload(&payload, now_millis()).await?;
        if outcome.is_new() {
            self.notify(|l| l.on_payload_added(&payload));
            self.relay(None, &Envelope::AddPayload(payload)).await;
        }
        Ok(outcome)
    }

    // ───── Bootstrap ─────

    /// Merge a bootstrap response into the store.
    ///
    /// Process-once payload kinds are applied only while no earlier
    /// response has been absorbed; refresh rounds skip them.
    pub async fn apply_response(&self, response: &DataResponse) -> Result<ResponseSummary> {
        let first_sync = !self.initial_sync_applied.load(Ordering::SeqCst);
        let now = now_millis();
        let mut summary = ResponseSummary::default();

        for entry in &response.entries {
            if let Err(e) = validate_entry_structure(entry) {
                debug!(error = %e, "skipping malformed entry from response");
                summary.entries_rejected += 1;
                continue;
            }
            let outcome = self.store.insert_entry(entry, now).await?;
            if outcome.is_accepted_change() {
                summary.entries_applied += 1;
                self.notify(|l| l.on_entry_added(entry));
            } else if outcome.is_rejected() {
                summary.entries_rejected += 1;
            }
        }

        for payload in &response.payloads {
            if payload.kind.process_once() && !first_sync {
                summary.payloads_skipped += 1;
                continue;
            }
            if let Err(e) = validate_payload(payload) {
                debug!(error = %e, "skipping malformed payload from response");
                summary.payloads_skipped += 1;
                continue;
            }
            if self.store.insert_payload(payload, now).await?.is_new() {
                summary.payloads_applied += 1;
                self.notify(|l| l.on_payload_added(payload));
            }
        }

        self.initial_sync_applied.store(true, Ordering::SeqCst);
        info!(
            entries = summary.entries_applied,
            payloads = summary.payloads_applied,
            refresh = response.refresh,
            truncated = response.truncated,
            "applied bootstrap response"
        );
        Ok(summary)
    }

    // ───── Inbound broadcast ─────

    pub(crate) async fn apply_broadcast(
        &self,
        from: &NodeAddress,
        message: &Envelope,
    ) -> Result<()> {
        let now = now_millis();
        match message {
            Envelope::AddEntry(entry) => {
                validate_entry_structure(entry)?;
                if self.store.insert_entry(entry, now).await?.is_accepted_change() {
                    self.notify(|l| l.on_entry_added(entry));
                    self.relay(Some(from), message).await;
                }
            }
            Envelope::RemoveEntry(removal) => {
                validate_removal(removal)?;
                if self.store.remove_entry(removal).await?.is_removed() {
                    self.notify(|l| l.on_entry_removed(&removal.key));
                    self.relay(Some(from), message).await;
                }
            }
            Envelope::RefreshEntry(refresh) => {
                validate_refresh_structure(refresh)?;
                if self.store.refresh_entry(refresh, now).await?.is_refreshed() {
                    self.notify(|l| l.on_entry_refreshed(&refresh.key));
                    self.relay(Some(from), message).await;
                }
            }
            Envelope::AddPayload(payload) => {
                validate_payload(payload)?;
                if self.store.insert_payload(payload, now).await?.is_new() {
                    self.notify(|l| l.on_payload_added(payload));
                    self.relay(Some(from), message).await;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Send to every confirmed connection that may receive this message,
    /// skipping the node it came from.
    async fn relay(&self, skip: Option<&NodeAddress>, message: &Envelope) {
        let required = message.required_capability();
        for connection in self.transport.confirmed_connections().await {
            if skip == Some(&connection.peer) {
                continue;
            }
            if !connection.capabilities.permits(required) {
                continue;
            }
            if let Err(e) = self.transport.send(&connection.peer, message.clone()).await {
                debug!(peer = %connection.peer, error = %e, "relay send failed");
            }
        }
    }

    fn notify(&self, f: impl Fn(&dyn StoreListener)) {
        let listeners: Vec<Arc<dyn StoreListener>> = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            f(listener.as_ref());
        }
    }
}

/// Wire listener feeding inbound broadcasts into the service.
struct BroadcastListener<S, T> {
    service: Arc<ReplicationService<S, T>>,
}

impl<S: Store + 'static, T: Transport + 'static> MessageListener for BroadcastListener<S, T> {
    fn on_message(&self, from: &NodeAddress, message: &Envelope) {
        let relevant = matches!(
            message,
            Envelope::AddEntry(_)
                | Envelope::RemoveEntry(_)
                | Envelope::RefreshEntry(_)
                | Envelope::AddPayload(_)
        );
        if !relevant {
            return;
        }
        let service = Arc::clone(&self.service);
        let from = from.clone();
        let message = message.clone();
        tokio::spawn(async move {
            if let Err(e) = service.apply_broadcast(&from, &message).await {
                debug!(peer = %from, kind = message.kind_name(), error = %e, "dropped broadcast");
            }
        });
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
