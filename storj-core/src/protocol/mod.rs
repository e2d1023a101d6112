//! Contract negotiation protocol
//!
//! Renter half: publish a signed contract draft, wait for the first valid
//! OFFER, consign the shard bytes and audit record to the accepting
//! farmer, persist the storage item. Farmer half: pick published drafts
//! off the contract topic, countersign and OFFER them to the renter, then
//! accept the CONSIGN and serve RETRIEVE and AUDIT for shards held.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::{self, AuditTree};
use crate::contract::{Contract, Role};
use crate::error::{NodeError, Result};
use crate::keys::KeyPair;
use crate::metrics::NodeMetrics;
use crate::net::{Overlay, Topics};
use crate::rpc::{
    AuditParams, AuditResult, ConsignParams, ConsignResult, Method, OfferParams, OfferResult,
    RetrieveParams, RetrieveResult,
};
use crate::shards::{ItemStore, ShardStore};
use crate::types::{now_millis, Contact, NodeId, ShardHash};

pub mod auditor;
pub mod pending;

pub use auditor::AuditCoordinator;
pub use pending::{PendingOffer, PendingTable};

/// v1 holder selection: the first contract key in storage order. Both
/// retrieve and audit route through this so a smarter policy replaces one
/// function.
pub fn select_farmer(contracts: &BTreeMap<NodeId, Contract>) -> Option<NodeId> {
    contracts.keys().next().copied()
}

/// Contract a farmer has offered and may still receive a CONSIGN for.
#[derive(Debug, Clone)]
struct OfferedContract {
    contract: Contract,
    at: Instant,
}

pub struct ContractProtocol {
    keys: Arc<KeyPair>,
    overlay: Arc<Overlay>,
    topics: Arc<Topics>,
    pending: Arc<PendingTable>,
    items: Arc<ItemStore>,
    shards: Arc<dyn ShardStore>,
    metrics: Arc<NodeMetrics>,
    audit_count: u32,
    offer_timeout: Duration,
    /// Offers sent but not yet consigned, keyed by (renter, shard).
    offered: Mutex<HashMap<(NodeId, ShardHash), OfferedContract>>,
}

impl ContractProtocol {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        keys: Arc<KeyPair>,
        overlay: Arc<Overlay>,
        topics: Arc<Topics>,
        pending: Arc<PendingTable>,
        items: Arc<ItemStore>,
        shards: Arc<dyn ShardStore>,
        metrics: Arc<NodeMetrics>,
        audit_count: u32,
        offer_timeout: Duration,
    ) -> Self {
        Self {
            keys,
            overlay,
            topics,
            pending,
            items,
            shards,
            metrics,
            audit_count,
            offer_timeout,
            offered: Mutex::new(HashMap::new()),
        }
    }

    // Renter half.

    /// Store a shard on the network for `duration`. Resolves once a farmer
    /// has accepted and the bytes are consigned, or fails when no valid
    /// offer arrives inside the offer window.
    pub async fn store(&self, data: Vec<u8>, duration: Duration) -> Result<ShardHash> {
        let hash = ShardHash::of(&data);
        let begin = now_millis();
        let end = begin.saturating_add(duration.as_millis() as u64);
        let mut contract = Contract::new(
            self.keys.node_id(),
            hash,
            data.len() as u64,
            begin,
            end,
            self.audit_count,
        );
        contract.sign(Role::Renter, &self.keys)?;
        let tree = AuditTree::generate(&data, self.audit_count);

        let (responder, resolved) = oneshot::channel();
        let topic = contract.topic();
        self.pending.insert(
            hash,
            PendingOffer {
                contract: contract.clone(),
                data,
                public_record: tree.public_record(),
                private_record: tree.private_record(),
                responder,
                deadline: Instant::now() + self.offer_timeout,
            },
        )?;

        let delivered = self
            .topics
            .publish(&topic, serde_json::to_value(&contract)?)
            .await?;
        if delivered == 0 {
            self.pending.take(&hash);
            return Err(NodeError::ContractRejected(
                "contract publication reached no peers".into(),
            ));
        }
        info!(shard = %hash, peers = delivered, "contract published, awaiting offers");

        match tokio::time::timeout(self.offer_timeout, resolved).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(NodeError::ContractRejected(
                "pending offer was dropped".into(),
            )),
            Err(_) => {
                self.pending.take(&hash);
                Err(NodeError::ContractRejected(
                    "no offer received before timeout".into(),
                ))
            }
        }
    }

    /// Inbound OFFER: the continuation registered by `store`. Consumes the
    /// pending entry on success; an invalid offer puts it back so a later
    /// farmer can still win the contract.
    pub async fn handle_offer(&self, params: OfferParams, sender: &Contact) -> Result<OfferResult> {
        NodeMetrics::incr(&self.metrics.offers_received);
        let hash = params.contract.data_hash();
        let entry = self.pending.take(&hash).ok_or_else(|| {
            NodeError::ContractRejected("no contract pending for this shard".into())
        })?;

        if let Err(e) = validate_offer(&entry.contract, &params.contract, sender) {
            debug!(shard = %hash, farmer = %sender.node_id, error = %e, "rejecting offer");
            let _ = self.pending.insert(hash, entry);
            return Err(e);
        }

        // Accept: countersign the completed contract.
        let mut contract = params.contract.clone();
        contract.sign(Role::Renter, &self.keys)?;

        let PendingOffer {
            data,
            public_record,
            private_record,
            responder,
            ..
        } = entry;

        let consign = ConsignParams {
            data_hash: hash,
            data_shard: hex::encode(&data),
            audit_tree: public_record.clone(),
            contact: self.overlay.local_contact(),
        };
        match self
            .overlay
            .call::<_, ConsignResult>(sender, Method::Consign, &consign)
            .await
        {
            Ok(receipt) => {
                let mut item = self.items.get(&hash).await?.unwrap_or_default();
                item.record_holder(
                    sender.node_id,
                    contract.clone(),
                    public_record,
                    private_record,
                    json!({
                        "consign_token": receipt.token,
                        "farmer": sender.to_uri(),
                    }),
                );
                self.items.put(&hash, &item).await?;
                NodeMetrics::incr(&self.metrics.contracts_stored);
                info!(shard = %hash, farmer = %sender.node_id, "shard consigned");
                let _ = responder.send(Ok(hash));
                Ok(OfferResult { contract })
            }
            Err(e) => {
                let _ = responder.send(Err(e.clone()));
                Err(e)
            }
        }
    }

    /// Fetch a shard back from one of its holders.
    pub async fn retrieve(&self, hash: &ShardHash) -> Result<Vec<u8>> {
        let item = self
            .items
            .get(hash)
            .await?
            .ok_or_else(|| NodeError::Storage(format!("no storage item for {}", hash)))?;
        let farmer = select_farmer(&item.contracts)
            .ok_or_else(|| NodeError::Storage(format!("storage item {} has no holders", hash)))?;
        let contact = self.overlay.find_node(&farmer).await?;

        let params = RetrieveParams {
            data_hash: *hash,
            contact: self.overlay.local_contact(),
        };
        let result: RetrieveResult = self
            .overlay
            .call(&contact, Method::Retrieve, &params)
            .await?;
        let data = hex::decode(&result.data_shard)
            .map_err(|_| NodeError::BadResponse("shard payload is not hex".into()))?;
        if ShardHash::of(&data) != *hash {
            return Err(NodeError::BadResponse(
                "returned shard fails integrity check".into(),
            ));
        }
        Ok(data)
    }

    // Farmer half.

    /// Topic subscription entry point for published contract drafts.
    /// Failures are logged and swallowed; a draft we cannot serve is
    /// simply not offered on.
    pub async fn on_contract_published(&self, contents: Value) {
        if let Err(e) = self.negotiate(contents).await {
            debug!(error = %e, "not offering on published contract");
        }
    }

    async fn negotiate(&self, contents: Value) -> Result<()> {
        let mut contract: Contract = serde_json::from_value(contents)?;
        let renter_id = contract
            .renter_id()
            .ok_or_else(|| NodeError::BadResponse("contract missing renter id".into()))?;
        if renter_id == self.keys.node_id() {
            return Ok(());
        }
        contract.verify(Role::Renter, &renter_id)?;

        contract.set_farmer_id(self.keys.node_id())?;
        contract.set_payment_destination(self.keys.address())?;
        contract.sign(Role::Farmer, &self.keys)?;

        let renter = self.overlay.find_node(&renter_id).await?;
        let hash = contract.data_hash();
        let key = (renter_id, hash);
        self.offered.lock().insert(
            key,
            OfferedContract {
                contract: contract.clone(),
                at: Instant::now(),
            },
        );

        let offer = OfferParams {
            contract,
            contact: self.overlay.local_contact(),
        };
        let accepted: OfferResult = match self.overlay.call(&renter, Method::Offer, &offer).await {
            Ok(accepted) => accepted,
            Err(e) => {
                self.offered.lock().remove(&key);
                return Err(e);
            }
        };

        let complete = accepted.contract;
        let valid = complete.farmer_id() == Some(self.keys.node_id())
            && complete.data_hash() == hash
            && complete.verify(Role::Renter, &renter_id).is_ok();
        if !valid {
            self.offered.lock().remove(&key);
            return Err(NodeError::ContractRejected(
                "renter returned an invalid countersigned contract".into(),
            ));
        }

        let mut item = self.items.get(&hash).await?.unwrap_or_default();
        item.contracts.insert(renter_id, complete.clone());
        item.meta.entry(renter_id).or_insert(Value::Null);
        self.items.put(&hash, &item).await?;

        if let Some(offered) = self.offered.lock().get_mut(&key) {
            offered.contract = complete;
        }
        info!(shard = %hash, renter = %renter_id, "offer accepted, awaiting consignment");
        Ok(())
    }

    /// Inbound CONSIGN: store the shard bytes and the public audit record
    /// for a contract this node offered on. Idempotent per (renter, shard).
    pub async fn handle_consign(
        &self,
        params: ConsignParams,
        sender: &Contact,
    ) -> Result<ConsignResult> {
        let hash = params.data_hash;
        let renter = sender.node_id;
        let contract = match self.items.get(&hash).await? {
            Some(item) => item.contracts.get(&renter).cloned(),
            None => None,
        }
        .or_else(|| {
            self.offered
                .lock()
                .get(&(renter, hash))
                .map(|o| o.contract.clone())
        })
        .ok_or_else(|| NodeError::ContractRejected("no contract for this consignment".into()))?;

        let data = hex::decode(&params.data_shard)
            .map_err(|_| NodeError::ContractRejected("shard payload is not hex".into()))?;
        if ShardHash::of(&data) != hash {
            return Err(NodeError::ContractRejected(
                "shard bytes do not match the contract hash".into(),
            ));
        }
        if data.len() as u64 != contract.data_size() {
            return Err(NodeError::ContractRejected(
                "shard size does not match the contract".into(),
            ));
        }

        self.shards.put(&hash, &data).await?;
        let token = Uuid::new_v4().to_string();
        let mut item = self.items.get(&hash).await?.unwrap_or_default();
        item.contracts.insert(renter, contract);
        item.trees.insert(renter, params.audit_tree);
        item.meta.insert(renter, json!({ "consign_token": token }));
        self.items.put(&hash, &item).await?;
        self.offered.lock().remove(&(renter, hash));

        info!(shard = %hash, renter = %renter, "consignment stored");
        Ok(ConsignResult { token })
    }

    /// Inbound RETRIEVE: serve shard bytes we hold.
    pub async fn handle_retrieve(
        &self,
        params: RetrieveParams,
        _sender: &Contact,
    ) -> Result<RetrieveResult> {
        let data = self.shards.get(&params.data_hash).await?;
        Ok(RetrieveResult {
            data_shard: hex::encode(data),
        })
    }

    /// Inbound AUDIT: prove possession against the renter's committed tree.
    pub async fn handle_audit(&self, params: AuditParams, sender: &Contact) -> Result<AuditResult> {
        let item = self
            .items
            .get(&params.data_hash)
            .await?
            .ok_or_else(|| NodeError::ContractRejected("no contract for this shard".into()))?;
        let record = item
            .trees
            .get(&sender.node_id)
            .ok_or_else(|| NodeError::ContractRejected("no audit record for this peer".into()))?;
        let shard = self.shards.get(&params.data_hash).await?;
        let proof = audit::prove(&shard, &params.challenge, record)?;
        Ok(AuditResult { proof })
    }

    /// Drop offered contracts that never received their CONSIGN.
    pub fn expire_offers(&self, max_age: Duration) {
        let now = Instant::now();
        self.offered
            .lock()
            .retain(|_, offered| now.duration_since(offered.at) < max_age);
    }
}

impl std::fmt::Debug for ContractProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContractProtocol({})", self.keys.node_id())
    }
}

/// Checks an inbound offer against the renter's published draft.
fn validate_offer(draft: &Contract, offer: &Contract, sender: &Contact) -> Result<()> {
    if offer.renter_id() != draft.renter_id()
        || offer.data_size() != draft.data_size()
        || offer.store_begin() != draft.store_begin()
        || offer.store_end() != draft.store_end()
        || offer.audit_count() != draft.audit_count()
    {
        return Err(NodeError::ContractRejected(
            "offer altered the contract terms".into(),
        ));
    }
    if offer.farmer_id() != Some(sender.node_id) {
        return Err(NodeError::ContractRejected(
            "offer farmer id does not match the sender".into(),
        ));
    }
    if offer.payment_destination().is_none() {
        return Err(NodeError::ContractRejected(
            "offer is missing a payment destination".into(),
        ));
    }
    offer.verify(Role::Farmer, &sender.node_id)?;
    Ok(())
}
