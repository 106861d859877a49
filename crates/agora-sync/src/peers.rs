//! Peer bookkeeping for bootstrap.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::messages::NodeAddress;

/// Classifies peers and absorbs connection faults.
pub trait PeerManager: Send + Sync {
    /// Whether this address is one of the configured seed nodes.
    fn is_seed_node(&self, address: &NodeAddress) -> bool;

    /// Seed addresses in preference order.
    fn seed_nodes(&self) -> Vec<NodeAddress>;

    /// Called when a request to a peer fails or times out.
    fn handle_connection_fault(&self, address: &NodeAddress);
}

/// A fixed seed list with per-peer fault counting.
///
/// Faults are recorded but never change the list; callers that want
/// backoff or eviction read the counts.
pub struct StaticPeers {
    seeds: Vec<NodeAddress>,
    faults: Mutex<HashMap<NodeAddress, u32>>,
}

impl StaticPeers {
    /// Create from a seed list.
    pub fn new(seeds: Vec<NodeAddress>) -> Self {
        Self {
            seeds,
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// How many faults have been recorded against this peer.
    pub fn fault_count(&self, address: &NodeAddress) -> u32 {
        self.faults
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(0)
    }
}

impl PeerManager for StaticPeers {
    fn is_seed_node(&self, address: &NodeAddress) -> bool {
        self.seeds.contains(address)
    }

    fn seed_nodes(&self) -> Vec<NodeAddress> {
        self.seeds.clone()
    }

    fn handle_connection_fault(&self, address: &NodeAddress) {
        let mut faults = self.faults.lock().unwrap();
        *faults.entry(address.clone()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_classification_and_faults() {
        let seed = NodeAddress::new("seed", 1000);
        let other = NodeAddress::new("other", 2000);
        let peers = StaticPeers::new(vec![seed.clone()]);

        assert!(peers.is_seed_node(&seed));
        assert!(!peers.is_seed_node(&other));
        assert_eq!(peers.seed_nodes(), vec![seed.clone()]);

        assert_eq!(peers.fault_count(&seed), 0);
        peers.handle_connection_fault(&seed);
        peers.handle_connection_fault(&seed);
        assert_eq!(peers.fault_count(&seed), 2);
        assert_eq!(peers.fault_count(&other), 0);
    }
}
