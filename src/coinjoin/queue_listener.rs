//! Queue listener (component I).
//!
//! Consumes public `Queue` broadcasts, verifies the coordinator's signature
//! over the advertised fields, drops anything outside the validity window,
//! and tracks which queues this wallet has already tried so it never
//! attempts the same one twice (§4.I).

use std::collections::HashSet;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::coinjoin::interfaces::CoordinatorRegistry;
use crate::coinjoin::message::Queue;
use crate::constants::coinjoin::COINJOIN_QUEUE_TIMEOUT;
use crate::types::OutPoint;

pub(crate) fn signed_bytes(denomination: u32, outpoint: &OutPoint, time: i64, ready: bool) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(b"COINJOIN_QUEUE:");
    hasher.update(denomination.to_le_bytes());
    hasher.update(outpoint.txid);
    hasher.update(outpoint.vout.to_le_bytes());
    hasher.update(time.to_le_bytes());
    hasher.update([ready as u8]);
    hasher.finalize().to_vec()
}

fn verify_signature(public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let Ok(signature_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    verifying_key.verify(message, &Signature::from_bytes(&signature_bytes)).is_ok()
}

pub struct QueueListener {
    tried: HashSet<(u32, OutPoint)>,
    ready_queue: Vec<Queue>,
}

impl QueueListener {
    pub fn new() -> Self {
        Self { tried: HashSet::new(), ready_queue: Vec::new() }
    }

    /// Verifies and stores an incoming `Queue` broadcast if it's ready,
    /// unexpired, properly signed, and not already tried.
    pub async fn on_queue_message(&mut self, queue: Queue, registry: &dyn CoordinatorRegistry, now: i64) {
        let key = (queue.denomination, queue.coord_outpoint.clone());
        if self.tried.contains(&key) {
            debug!(outpoint = ?queue.coord_outpoint, "queue already tried, dropping");
            return;
        }

        if !queue.ready {
            return;
        }

        if (now - queue.time).unsigned_abs() > COINJOIN_QUEUE_TIMEOUT {
            debug!(outpoint = ?queue.coord_outpoint, "queue broadcast outside the validity window");
            return;
        }

        let Some(coordinator) = registry.lookup_by_outpoint(&queue.coord_outpoint).await else {
            warn!(outpoint = ?queue.coord_outpoint, "queue broadcast from unknown coordinator");
            return;
        };

        let message = signed_bytes(queue.denomination, &queue.coord_outpoint, queue.time, queue.ready);
        if !verify_signature(&coordinator.operator_public_key, &message, &queue.signature) {
            warn!(coordinator = %coordinator.address, "queue broadcast signature mismatch, rejecting");
            return;
        }

        self.ready_queue.push(queue);
    }

    /// Yields the next not-yet-tried ready queue, marking it tried so it's
    /// never handed out twice.
    pub fn next_untried(&mut self) -> Option<Queue> {
        let queue = self.ready_queue.pop()?;
        self.tried.insert((queue.denomination, queue.coord_outpoint.clone()));
        Some(queue)
    }

    pub fn pending_count(&self) -> usize {
        self.ready_queue.len()
    }
}

impl Default for QueueListener {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coinjoin::interfaces::test_doubles::FakeRegistry;
    use crate::coinjoin::interfaces::CoordinatorInfo;
    use ed25519_dalek::{Signer, SigningKey};

    fn signed_queue(signing_key: &SigningKey, outpoint: OutPoint, time: i64) -> Queue {
        let message = signed_bytes(1, &outpoint, time, true);
        let signature = signing_key.sign(&message);
        Queue {
            denomination: 1,
            coord_outpoint: outpoint,
            time,
            ready: true,
            signature: signature.to_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn accepts_a_correctly_signed_queue_and_yields_it_once() {
        let signing_key = SigningKey::from_bytes(&[7; 32]);
        let outpoint = OutPoint { txid: [1; 32], vout: 0 };
        let registry = FakeRegistry::new();
        registry.add(CoordinatorInfo {
            address: "coord1".to_string(),
            outpoint: outpoint.clone(),
            operator_public_key: signing_key.verifying_key().to_bytes(),
        });

        let queue = signed_queue(&signing_key, outpoint, 1_000);
        let mut listener = QueueListener::new();
        listener.on_queue_message(queue, &registry, 1_000).await;

        assert_eq!(listener.pending_count(), 1);
        assert!(listener.next_untried().is_some());
        assert!(listener.next_untried().is_none());
    }

    #[tokio::test]
    async fn rejects_a_queue_with_a_bad_signature() {
        let signing_key = SigningKey::from_bytes(&[7; 32]);
        let other_key = SigningKey::from_bytes(&[9; 32]);
        let outpoint = OutPoint { txid: [2; 32], vout: 0 };
        let registry = FakeRegistry::new();
        registry.add(CoordinatorInfo {
            address: "coord1".to_string(),
            outpoint: outpoint.clone(),
            operator_public_key: signing_key.verifying_key().to_bytes(),
        });

        // Signed with the wrong key.
        let queue = signed_queue(&other_key, outpoint, 1_000);
        let mut listener = QueueListener::new();
        listener.on_queue_message(queue, &registry, 1_000).await;

        assert_eq!(listener.pending_count(), 0);
    }

    #[tokio::test]
    async fn rejects_a_queue_outside_the_time_window() {
        let signing_key = SigningKey::from_bytes(&[7; 32]);
        let outpoint = OutPoint { txid: [3; 32], vout: 0 };
        let registry = FakeRegistry::new();
        registry.add(CoordinatorInfo {
            address: "coord1".to_string(),
            outpoint: outpoint.clone(),
            operator_public_key: signing_key.verifying_key().to_bytes(),
        });

        let queue = signed_queue(&signing_key, outpoint, 1_000);
        let mut listener = QueueListener::new();
        listener.on_queue_message(queue, &registry, 1_000 + COINJOIN_QUEUE_TIMEOUT as i64 + 50).await;

        assert_eq!(listener.pending_count(), 0);
    }
}
