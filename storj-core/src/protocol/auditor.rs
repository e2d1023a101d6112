//! Renter-side audit coordination
//!
//! Each audit spends one pre-committed challenge. The consumed challenge
//! is persisted out of the storage item before the AUDIT RPC goes out, so
//! a crash between sending and verdict can cost a challenge but can never
//! reveal one twice.

use std::sync::Arc;

use tracing::{debug, info};

use crate::audit::Verifier;
use crate::error::{NodeError, Result};
use crate::metrics::NodeMetrics;
use crate::net::Overlay;
use crate::protocol::select_farmer;
use crate::rpc::{AuditParams, AuditResult, Method};
use crate::shards::ItemStore;
use crate::types::ShardHash;

pub struct AuditCoordinator {
    overlay: Arc<Overlay>,
    items: Arc<ItemStore>,
    metrics: Arc<NodeMetrics>,
}

impl AuditCoordinator {
    pub fn new(overlay: Arc<Overlay>, items: Arc<ItemStore>, metrics: Arc<NodeMetrics>) -> Self {
        Self {
            overlay,
            items,
            metrics,
        }
    }

    /// Challenge a holder of `hash` and verify its proof against the
    /// committed Merkle root. `Ok(false)` means the farmer answered but
    /// could not prove possession.
    pub async fn audit(&self, hash: &ShardHash) -> Result<bool> {
        let mut item = self
            .items
            .get(hash)
            .await?
            .ok_or_else(|| NodeError::Storage(format!("no storage item for {}", hash)))?;
        let farmer = select_farmer(&item.contracts)
            .ok_or_else(|| NodeError::Storage(format!("storage item {} has no holders", hash)))?;
        let contact = self.overlay.find_node(&farmer).await?;

        let (challenge, verifier) = {
            let record = item
                .challenges
                .get_mut(&farmer)
                .ok_or(NodeError::ChallengesExhausted)?;
            if record.challenges.is_empty() {
                return Err(NodeError::ChallengesExhausted);
            }
            (record.challenges.remove(0), Verifier::new(record))
        };
        // Commit the consumed challenge before it leaves the node.
        self.items.put(hash, &item).await?;

        let params = AuditParams {
            data_hash: *hash,
            challenge,
            contact: self.overlay.local_contact(),
        };
        match self
            .overlay
            .call::<_, AuditResult>(&contact, Method::Audit, &params)
            .await
        {
            Ok(result) => {
                let passed = verifier.verify(&result.proof);
                self.record_verdict(hash, &farmer, passed);
                Ok(passed)
            }
            Err(NodeError::ContractRejected(reason)) => {
                // The farmer answered but could not produce a proof.
                debug!(shard = %hash, farmer = %farmer, reason = %reason, "audit refused");
                self.record_verdict(hash, &farmer, false);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn record_verdict(&self, hash: &ShardHash, farmer: &crate::types::NodeId, passed: bool) {
        if passed {
            NodeMetrics::incr(&self.metrics.audits_passed);
            info!(shard = %hash, farmer = %farmer, "audit passed");
        } else {
            NodeMetrics::incr(&self.metrics.audits_failed);
            info!(shard = %hash, farmer = %farmer, "audit failed");
        }
    }
}

impl std::fmt::Debug for AuditCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuditCoordinator({})", self.overlay.local_contact())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditTree;
    use crate::contract::{Contract, Role};
    use crate::keys::KeyPair;
    use crate::rpc::MessageAuth;
    use crate::shards::StorageItem;
    use crate::types::{now_millis, Contact};
    use serde_json::Value;
    use std::time::Duration;

    fn coordinator(keys: Arc<KeyPair>, items: Arc<ItemStore>) -> AuditCoordinator {
        let metrics = Arc::new(NodeMetrics::new());
        let auth = Arc::new(MessageAuth::new(keys.clone(), 15_000, metrics.clone()));
        let contact = Contact::new("127.0.0.1", 0, keys.node_id());
        let overlay = Arc::new(Overlay::new(contact, auth, Duration::from_millis(200)));
        AuditCoordinator::new(overlay, items, metrics)
    }

    #[tokio::test]
    async fn test_audit_of_unknown_item_fails_with_storage_error() {
        let keys = Arc::new(KeyPair::generate());
        let items = Arc::new(ItemStore::new(None).unwrap());
        let coordinator = coordinator(keys, items);
        let err = coordinator
            .audit(&ShardHash::of(b"never stored"))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Storage(_)));
    }

    #[tokio::test]
    async fn test_exhausted_challenges_reported() {
        let renter = Arc::new(KeyPair::generate());
        let farmer = KeyPair::generate();
        let data = b"shard";
        let hash = ShardHash::of(data);

        let begin = now_millis();
        let mut contract = Contract::new(
            renter.node_id(),
            hash,
            data.len() as u64,
            begin,
            begin + 1000,
            12,
        );
        contract.sign(Role::Renter, &renter).unwrap();

        let tree = AuditTree::generate(data, 12);
        let mut private = tree.private_record();
        private.challenges.clear();

        let mut item = StorageItem::new();
        item.record_holder(
            farmer.node_id(),
            contract,
            tree.public_record(),
            private,
            Value::Null,
        );
        let items = Arc::new(ItemStore::new(None).unwrap());
        items.put(&hash, &item).await.unwrap();

        let coordinator = coordinator(renter, items);
        // The farmer is in the item but not in the routing table, so the
        // lookup fails first unless we add it; add it to reach the
        // challenge check.
        coordinator
            .overlay
            .table()
            .add(Contact::new("127.0.0.1", 1, farmer.node_id()));
        let err = coordinator.audit(&hash).await.unwrap_err();
        assert_eq!(err, NodeError::ChallengesExhausted);
    }
}
