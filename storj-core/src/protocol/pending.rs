//! Pending offers awaiting a farmer
//!
//! When a renter publishes a contract it parks the shard bytes, the audit
//! records, and a completion channel here, keyed by shard hash. The first
//! valid OFFER takes the entry; a sweeper purges entries whose deadline
//! passed, which fails the waiting store operation.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::audit::{PrivateAuditRecord, PublicAuditRecord};
use crate::contract::Contract;
use crate::error::{NodeError, Result};
use crate::types::ShardHash;

/// Continuation for one published contract.
pub struct PendingOffer {
    /// Renter-signed draft the offer must match.
    pub contract: Contract,
    /// Shard bytes to consign once a farmer accepts.
    pub data: Vec<u8>,
    pub public_record: PublicAuditRecord,
    pub private_record: PrivateAuditRecord,
    /// Resolves the waiting `store` call.
    pub responder: oneshot::Sender<Result<ShardHash>>,
    pub deadline: Instant,
}

impl std::fmt::Debug for PendingOffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PendingOffer({}, {} bytes)",
            self.contract.data_hash(),
            self.data.len()
        )
    }
}

/// Map of shard hash to its single pending continuation.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<ShardHash, PendingOffer>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a continuation. At most one may exist per shard; an
    /// expired leftover is replaced.
    pub fn insert(&self, hash: ShardHash, offer: PendingOffer) -> Result<()> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&hash) {
            if existing.deadline > Instant::now() {
                return Err(NodeError::OfferPending);
            }
        }
        entries.insert(hash, offer);
        Ok(())
    }

    /// Remove and return the continuation for a shard.
    pub fn take(&self, hash: &ShardHash) -> Option<PendingOffer> {
        self.entries.lock().remove(hash)
    }

    /// Drop entries whose deadline passed. Their responders are dropped
    /// with them, failing the waiting store calls.
    pub fn expire(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, offer| offer.deadline > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditTree;
    use crate::keys::KeyPair;
    use std::time::Duration;

    fn offer(deadline: Instant) -> (PendingOffer, oneshot::Receiver<Result<ShardHash>>) {
        let data = b"pending shard".to_vec();
        let hash = ShardHash::of(&data);
        let keys = KeyPair::generate();
        let contract = Contract::new(keys.node_id(), hash, data.len() as u64, 0, 1, 12);
        let tree = AuditTree::generate(&data, 12);
        let (tx, rx) = oneshot::channel();
        (
            PendingOffer {
                contract,
                data,
                public_record: tree.public_record(),
                private_record: tree.private_record(),
                responder: tx,
                deadline,
            },
            rx,
        )
    }

    #[test]
    fn test_insert_take() {
        let table = PendingTable::new();
        let (entry, _rx) = offer(Instant::now() + Duration::from_secs(60));
        let hash = entry.contract.data_hash();
        table.insert(hash, entry).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.take(&hash).is_some());
        assert!(table.take(&hash).is_none());
    }

    #[test]
    fn test_second_insert_rejected_while_pending() {
        let table = PendingTable::new();
        let (first, _rx1) = offer(Instant::now() + Duration::from_secs(60));
        let (second, _rx2) = offer(Instant::now() + Duration::from_secs(60));
        let hash = first.contract.data_hash();
        table.insert(hash, first).unwrap();
        assert_eq!(table.insert(hash, second).unwrap_err(), NodeError::OfferPending);
    }

    #[test]
    fn test_expired_entry_is_replaced() {
        let table = PendingTable::new();
        let (stale, _rx1) = offer(Instant::now() - Duration::from_secs(1));
        let (fresh, _rx2) = offer(Instant::now() + Duration::from_secs(60));
        let hash = stale.contract.data_hash();
        table.insert(hash, stale).unwrap();
        table.insert(hash, fresh).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_expire_fails_the_waiting_store() {
        let table = PendingTable::new();
        let (entry, rx) = offer(Instant::now() - Duration::from_secs(1));
        let hash = entry.contract.data_hash();
        table.insert(hash, entry).unwrap();

        assert_eq!(table.expire(Instant::now()), 1);
        assert!(table.is_empty());
        // The dropped responder surfaces as a receive error.
        assert!(rx.await.is_err());
    }
}
