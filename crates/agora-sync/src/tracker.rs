//! In-flight request bookkeeping.
//!
//! At most one outstanding request per peer. Removal names the handler
//! it owns, so a late cleanup from a finished request can never cancel
//! a newer request to the same peer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::messages::NodeAddress;

/// Tracks the active request handler per peer.
pub struct RequestTracker<H> {
    active: Mutex<HashMap<NodeAddress, Arc<H>>>,
}

impl<H> RequestTracker<H> {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handler for the peer, unless one is already active.
    ///
    /// Returns false without replacing anything when the peer is busy.
    pub fn try_insert(&self, peer: NodeAddress, handler: Arc<H>) -> bool {
        let mut active = self.active.lock().unwrap();
        if active.contains_key(&peer) {
            return false;
        }
        active.insert(peer, handler);
        true
    }

    /// The handler currently registered for the peer, if any.
    pub fn get(&self, peer: &NodeAddress) -> Option<Arc<H>> {
        self.active.lock().unwrap().get(peer).cloned()
    }

    /// Remove the registration only if it still belongs to `handler`.
    pub fn remove_matching(&self, peer: &NodeAddress, handler: &Arc<H>) -> bool {
        let mut active = self.active.lock().unwrap();
        match active.get(peer) {
            Some(current) if Arc::ptr_eq(current, handler) => {
                active.remove(peer);
                true
            }
            _ => false,
        }
    }

    /// Number of requests currently in flight.
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }
}

impl<H> Default for RequestTracker<H> {
    fn default() -> Self {
        Self::new()
    }
}
