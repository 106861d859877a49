//! Responder side of the bootstrap handshake.
//!
//! Answers a [`DataRequest`] with everything the requester is missing,
//! minus items its declared capabilities cannot accept, clipped at the
//! configured size limits. The request's nonce is echoed back verbatim;
//! a request from an unknown protocol version is ignored entirely.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use agora_core::{CapabilitySet, ContentHash, DeltaSet};
use agora_store::Store;

use crate::error::Result;
use crate::messages::{
    limits, DataRequest, DataResponse, Envelope, ExclusionSet, NodeAddress, PROTOCOL_VERSION,
};
use crate::transport::{ListenerId, MessageListener, Transport};

/// Size limits for built responses.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    /// Max entries per response.
    pub max_entries: usize,
    /// Max payloads per response.
    pub max_payloads: usize,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            max_entries: limits::MAX_RESPONSE_ENTRIES,
            max_payloads: limits::MAX_RESPONSE_PAYLOADS,
        }
    }
}

/// Serves bootstrap requests from the local store.
pub struct SyncResponder<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    capabilities: CapabilitySet,
    config: ResponderConfig,
}

impl<S: Store + 'static, T: Transport + 'static> SyncResponder<S, T> {
    /// Create a responder over a store and transport.
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        capabilities: CapabilitySet,
        config: ResponderConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            transport,
            capabilities,
            config,
        })
    }

    /// Register on the transport and begin answering requests.
    pub fn attach(self: &Arc<Self>) -> ListenerId {
        self.transport.add_listener(Arc::new(RequestListener {
            responder: Arc::clone(self),
        }))
    }

    /// Build the response for one request.
    ///
    /// Returns `None` when the request must be ignored rather than
    /// answered, such as a protocol version this build does not speak.
    pub async fn respond_to(
        &self,
        from: &NodeAddress,
        request: &DataRequest,
    ) -> Result<Option<DataResponse>> {
        if request.version != PROTOCOL_VERSION {
            warn!(
                peer = %from,
                version = request.version,
                "ignoring request with unsupported protocol version"
            );
            return Ok(None);
        }
        if let Some(advertised) = &request.requester {
            debug!(peer = %from, advertised = %advertised, "refresh request");
        }

        let known = self.store.known_hashes().await?;
        let filter = SendFilter::from_exclusion(&request.exclusion, &known);

        let mut truncated = false;

        let mut entries = Vec::new();
        for entry in self.store.entries().await? {
            if !filter.should_send(&entry.content_hash()) {
                continue;
            }
            if !request.capabilities.permits(entry.required_capability()) {
                continue;
            }
            if entries.len() >= self.config.max_entries {
                truncated = true;
                break;
            }
            entries.push(entry);
        }

        let mut payloads = Vec::new();
        for payload in self.store.payloads().await? {
            if !filter.should_send(&payload.payload_id()) {
                continue;
            }
            if !request.capabilities.permits(payload.required_capability()) {
                continue;
            }
            if payloads.len() >= self.config.max_payloads {
                truncated = true;
                break;
            }
            payloads.push(payload);
        }

        debug!(
            peer = %from,
            entries = entries.len(),
            payloads = payloads.len(),
            truncated,
            refresh = request.is_refresh(),
            "built data response"
        );

        Ok(Some(DataResponse {
            request_nonce: request.nonce,
            version: PROTOCOL_VERSION,
            entries,
            payloads,
            capabilities: self.capabilities.clone(),
            refresh: request.is_refresh(),
            truncated,
        }))
    }

    async fn handle_request(self: Arc<Self>, from: NodeAddress, request: DataRequest) {
        match self.respond_to(&from, &request).await {
            Ok(Some(response)) => {
                if let Err(e) = self
                    .transport
                    .send(&from, Envelope::DataResponse(response))
                    .await
                {
                    warn!(peer = %from, error = %e, "failed to send data response");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(peer = %from, error = %e, "failed to build data response"),
        }
    }
}

/// Wire listener feeding inbound requests into the responder.
struct RequestListener<S, T> {
    responder: Arc<SyncResponder<S, T>>,
}

impl<S: Store + 'static, T: Transport + 'static> MessageListener for RequestListener<S, T> {
    fn on_message(&self, from: &NodeAddress, message: &Envelope) {
        let Envelope::DataRequest(request) = message else {
            return;
        };
        let responder = Arc::clone(&self.responder);
        let from = from.clone();
        let request = request.clone();
        tokio::spawn(async move {
            responder.handle_request(from, request).await;
        });
    }
}

/// Decision function for which local items the requester still needs.
enum SendFilter {
    /// Requester listed what it has; send everything else.
    Exclude(HashSet<ContentHash>),
    /// The sketch decoded; send exactly the local-only side.
    Include(HashSet<ContentHash>),
    /// The sketch was unusable; send the full set and let the requester
    /// deduplicate.
    Everything,
}

impl SendFilter {
    fn from_exclusion(exclusion: &ExclusionSet, known: &HashSet<ContentHash>) -> Self {
        match exclusion {
            ExclusionSet::Hashes(hashes) => SendFilter::Exclude(hashes.iter().copied().collect()),
            ExclusionSet::Delta(theirs) => {
                let mine = DeltaSet::encode(theirs.profile(), theirs.salt(), known.iter());
                match mine.subtract(theirs).and_then(|diff| diff.decode()) {
                    Some(decoded) => {
                        SendFilter::Include(decoded.local_only.into_iter().collect())
                    }
                    None => {
                        warn!("exclusion sketch undecodable, sending full set");
                        SendFilter::Everything
                    }
                }
            }
        }
    }

    fn should_send(&self, hash: &ContentHash) -> bool {
        match self {
            SendFilter::Exclude(excluded) => !excluded.contains(hash),
            SendFilter::Include(wanted) => wanted.contains(hash),
            SendFilter::Everything => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryHub, MemoryTransport};
    use agora_core::{
        Capability, DeltaProfile, EntryBuilder, EntryKey, EntryKind, Keypair, PayloadKind,
        SignedEntry, StorePayload,
    };
    use agora_store::MemoryStore;

    async fn responder_with_store() -> (
        Arc<SyncResponder<MemoryStore, MemoryTransport>>,
        Arc<MemoryStore>,
    ) {
        let hub = MemoryHub::new();
        let transport = Arc::new(hub.attach(NodeAddress::new("responder", 1), CapabilitySet::full()));
        let store = Arc::new(MemoryStore::new());
        let responder = SyncResponder::new(
            Arc::clone(&store),
            transport,
            CapabilitySet::full(),
            ResponderConfig::default(),
        );
        (responder, store)
    }

    fn offer(keypair: &Keypair, label: &str) -> SignedEntry {
        let key = EntryKey::derive(keypair.public_key().as_bytes(), label);
        EntryBuilder::new(key, EntryKind::Offer, 1)
            .payload(format!("offer {label}").into_bytes())
            .sign(keypair)
    }

    fn request(exclusion: ExclusionSet, capabilities: CapabilitySet) -> DataRequest {
        DataRequest {
            nonce: 77,
            version: PROTOCOL_VERSION,
            exclusion,
            capabilities,
            requester: None,
        }
    }

    #[tokio::test]
    async fn test_raw_exclusion_is_honored() {
        let (responder, store) = responder_with_store().await;
        let keypair = Keypair::generate();

        let known = offer(&keypair, "a");
        store.insert_entry(&known, 1_000).await.unwrap();
        store.insert_entry(&offer(&keypair, "b"), 1_000).await.unwrap();
        store.insert_entry(&offer(&keypair, "c"), 1_000).await.unwrap();

        let req = request(
            ExclusionSet::Hashes(vec![known.content_hash()]),
            CapabilitySet::full(),
        );
        let response = responder
            .respond_to(&NodeAddress::new("peer", 2), &req)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(response.request_nonce, 77);
        assert_eq!(response.entries.len(), 2);
        assert!(response.entries.iter().all(|e| e.key != known.key));
        assert!(!response.truncated);
        assert!(!response.refresh);
    }

    #[tokio::test]
    async fn test_sketch_exclusion_sends_exact_difference() {
        let (responder, store) = responder_with_store().await;

        let mut requester_known = HashSet::new();
        for i in 0u64..40 {
            let payload =
                StorePayload::new(PayloadKind::AccountWitness, format!("w{i}").into_bytes());
            store.insert_payload(&payload, 1_000).await.unwrap();
            if i < 25 {
                requester_known.insert(payload.payload_id());
            }
        }

        let sketch = DeltaSet::encode(DeltaProfile::Compact, 99, requester_known.iter());
        let req = request(ExclusionSet::Delta(sketch), CapabilitySet::full());
        let response = responder
            .respond_to(&NodeAddress::new("peer", 2), &req)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(response.payloads.len(), 15);
        assert!(response
            .payloads
            .iter()
            .all(|p| !requester_known.contains(&p.payload_id())));
    }

    #[tokio::test]
    async fn test_unusable_sketch_downgrades_to_full_send() {
        let (responder, store) = responder_with_store().await;
        let keypair = Keypair::generate();
        for i in 0..10 {
            store
                .insert_entry(&offer(&keypair, &format!("o{i}")), 1_000)
                .await
                .unwrap();
        }

        // A difference wider than the sketch's cell count cannot decode.
        let noise: Vec<ContentHash> = (0u64..600)
            .map(|i| ContentHash::hash(&i.to_be_bytes()))
            .collect();
        let sketch = DeltaSet::encode(DeltaProfile::Compact, 5, noise.iter());
        let req = request(ExclusionSet::Delta(sketch), CapabilitySet::full());

        let response = responder
            .respond_to(&NodeAddress::new("peer", 2), &req)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.entries.len(), 10);
    }

    #[tokio::test]
    async fn test_capability_withholding_is_not_truncation() {
        let (responder, store) = responder_with_store().await;
        let keypair = Keypair::generate();

        let key = EntryKey::derive(keypair.public_key().as_bytes(), "mediator");
        let mediator = EntryBuilder::new(key, EntryKind::Mediator, 1)
            .payload(b"profile".as_slice())
            .sign(&keypair);
        store.insert_entry(&mediator, 1_000).await.unwrap();
        store.insert_entry(&offer(&keypair, "plain"), 1_000).await.unwrap();

        let without = request(ExclusionSet::Hashes(Vec::new()), CapabilitySet::empty());
        let response = responder
            .respond_to(&NodeAddress::new("peer", 2), &without)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.entries.len(), 1);
        assert!(!response.truncated);

        let with = request(
            ExclusionSet::Hashes(Vec::new()),
            CapabilitySet::empty().with(Capability::Mediation),
        );
        let response = responder
            .respond_to(&NodeAddress::new("peer", 2), &with)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_limit_clips_and_flags_truncation() {
        let hub = MemoryHub::new();
        let transport = Arc::new(hub.attach(NodeAddress::new("responder", 1), CapabilitySet::full()));
        let store = Arc::new(MemoryStore::new());
        let responder = SyncResponder::new(
            Arc::clone(&store),
            transport,
            CapabilitySet::full(),
            ResponderConfig {
                max_entries: 1,
                max_payloads: 1,
            },
        );

        let keypair = Keypair::generate();
        for i in 0..3 {
            store
                .insert_entry(&offer(&keypair, &format!("o{i}")), 1_000)
                .await
                .unwrap();
        }

        let req = request(ExclusionSet::Hashes(Vec::new()), CapabilitySet::full());
        let response = responder
            .respond_to(&NodeAddress::new("peer", 2), &req)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.entries.len(), 1);
        assert!(response.truncated);
    }

    #[tokio::test]
    async fn test_unknown_protocol_version_is_ignored() {
        let (responder, _store) = responder_with_store().await;

        let mut req = request(ExclusionSet::Hashes(Vec::new()), CapabilitySet::full());
        req.version = 99;

        let response = responder
            .respond_to(&NodeAddress::new("peer", 2), &req)
            .await
            .unwrap();
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_refresh_flag_is_copied() {
        let (responder, _store) = responder_with_store().await;

        let mut req = request(ExclusionSet::Hashes(Vec::new()), CapabilitySet::full());
        req.requester = Some(NodeAddress::new("peer", 2));

        let response = responder
            .respond_to(&NodeAddress::new("peer", 2), &req)
            .await
            .unwrap()
            .unwrap();
        assert!(response.refresh);
    }
}
