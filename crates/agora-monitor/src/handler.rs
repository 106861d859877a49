//! Per-peer state-hash pull.
//!
//! Same request discipline as the bootstrap handshake: listener first,
//! timer armed before the request leaves, nonce echo verified, wrong
//! nonces dropped in silence, and exactly one completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use agora_core::{ChainTag, StateHash};
use agora_sync::{
    Envelope, ListenerId, MessageListener, NodeAddress, StateHashesRequest, SyncError, Transport,
};

use crate::error::Result;

/// One in-flight state-hash pull from one peer.
pub struct PullHandler<T> {
    peer: NodeAddress,
    chain: ChainTag,
    from_height: u64,
    nonce: u64,
    timeout: Duration,
    transport: Arc<T>,
    stopped: AtomicBool,
    listener_id: Mutex<Option<ListenerId>>,
    timeout_task: Mutex<Option<JoinHandle<()>>>,
    completion: Mutex<Option<oneshot::Sender<Result<Vec<StateHash>>>>>,
}

impl<T: Transport + 'static> PullHandler<T> {
    /// Create a handler for one pull.
    pub fn new(
        peer: NodeAddress,
        chain: ChainTag,
        from_height: u64,
        timeout: Duration,
        transport: Arc<T>,
    ) -> Arc<Self> {
        Arc::new(Self {
            peer,
            chain,
            from_height,
            nonce: rand::random(),
            timeout,
            transport,
            stopped: AtomicBool::new(false),
            listener_id: Mutex::new(None),
            timeout_task: Mutex::new(None),
            completion: Mutex::new(None),
        })
    }

    /// Run the pull to completion.
    pub async fn run(self: Arc<Self>) -> Result<Vec<StateHash>> {
        let (tx, rx) = oneshot::channel();
        *self.completion.lock().unwrap() = Some(tx);

        let listener = Arc::new(PullListener {
            handler: Arc::clone(&self),
        });
        let id = self.transport.add_listener(listener);
        *self.listener_id.lock().unwrap() = Some(id);

        let timed = Arc::clone(&self);
        let timeout = self.timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            timed.complete(Err(SyncError::Timeout(timeout).into()));
        });
        *self.timeout_task.lock().unwrap() = Some(handle);

        let request = StateHashesRequest {
            nonce: self.nonce,
            chain: self.chain,
            from_height: self.from_height,
        };
        if let Err(e) = self
            .transport
            .send(&self.peer, Envelope::StateHashesRequest(request))
            .await
        {
            self.complete(Err(e.into()));
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Protocol("pull handler dropped".into()).into()),
        }
    }

    fn complete(&self, result: Result<Vec<StateHash>>) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.timeout_task.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(id) = self.listener_id.lock().unwrap().take() {
            self.transport.remove_listener(id);
        }
        if let Some(tx) = self.completion.lock().unwrap().take() {
            let _ = tx.send(result);
        }
    }
}

struct PullListener<T> {
    handler: Arc<PullHandler<T>>,
}

impl<T: Transport + 'static> MessageListener for PullListener<T> {
    fn on_message(&self, from: &NodeAddress, message: &Envelope) {
        let Envelope::StateHashesResponse(response) = message else {
            return;
        };
        let handler = &self.handler;
        if handler.stopped.load(Ordering::SeqCst)
            || from != &handler.peer
            || response.chain != handler.chain
        {
            return;
        }
        if response.request_nonce != handler.nonce {
            debug!(
                peer = %from,
                got = response.request_nonce,
                expected = handler.nonce,
                "ignoring state hashes with wrong nonce"
            );
            return;
        }
        handler.complete(Ok(response.hashes.clone()));
    }
}
