//! Coordinator connection pool (component H).
//!
//! Holds at most one connection per distinct coordinator a pending session
//! actually wants, not a general peer list — discovery is driven entirely by
//! `pending` (§4.H).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::coinjoin::interfaces::{CoordinatorRegistry, Network};
use crate::coinjoin::message::CoinJoinMessage;
use crate::error::CoinJoinError;

pub struct ConnectionPool {
    network: Arc<dyn Network>,
    registry: Arc<dyn CoordinatorRegistry>,
    sessions_limit: usize,
    pending: Mutex<HashMap<u64, String>>,
}

impl ConnectionPool {
    pub fn new(network: Arc<dyn Network>, registry: Arc<dyn CoordinatorRegistry>, sessions_limit: usize) -> Self {
        Self {
            network,
            registry,
            sessions_limit,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `session_id`'s intended coordinator and triggers discovery.
    /// Refuses if `coordinator_address` isn't a known coordinator.
    pub async fn add_pending(&self, session_id: u64, coordinator_address: &str) -> Result<(), CoinJoinError> {
        if self.registry.lookup_by_address(coordinator_address).await.is_none() {
            return Err(CoinJoinError::NoCoordinators);
        }

        self.pending.lock().insert(session_id, coordinator_address.to_string());
        self.discover().await;
        Ok(())
    }

    pub fn remove_pending(&self, session_id: u64) {
        self.pending.lock().remove(&session_id);
    }

    pub fn max_connections(&self) -> usize {
        let pending = self.pending.lock();
        let distinct: HashSet<&String> = pending.values().collect();
        distinct.len().min(self.sessions_limit.max(1))
    }

    /// Connects to every distinct coordinator a pending session wants,
    /// de-duplicating: a second pending session to an already-connected
    /// coordinator reuses the existing connection.
    async fn discover(&self) {
        let addresses: Vec<String> = {
            let pending = self.pending.lock();
            pending.values().cloned().collect::<HashSet<_>>().into_iter().collect()
        };

        for address in addresses.into_iter().take(self.sessions_limit.max(1)) {
            if !self.network.is_connected(&address).await {
                debug!(coordinator = %address, "connecting to coordinator");
                if self.network.connect(&address).await.is_err() {
                    continue;
                }
            }
        }
    }

    /// Runs `send` against the connected peer at `address`. Returns `false`
    /// if no connection exists (§4.H `for_peer`).
    pub async fn send_to(&self, address: &str, message: CoinJoinMessage) -> bool {
        if !self.network.is_connected(address).await {
            return false;
        }
        self.network.send(address, message).await.is_ok()
    }

    pub async fn disconnect(&self, coordinator: &str) {
        info!(coordinator = %coordinator, "disconnecting coordinator");
        self.network.disconnect(coordinator).await;
    }

    /// Call when the network layer reports `address` as dead. Removes every
    /// pending session that was waiting on it and re-evaluates capacity,
    /// returning the orphaned session ids for the caller to reset.
    pub fn on_peer_dead(&self, address: &str) -> Vec<u64> {
        let mut pending = self.pending.lock();
        let dead: Vec<u64> = pending
            .iter()
            .filter(|(_, a)| a.as_str() == address)
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            pending.remove(id);
        }
        dead
    }
}
