//! Overlay routing and lookups
//!
//! A bucketed XOR-metric routing table in the Kademlia style, plus the
//! iterative FIND_NODE lookup and the signed request/response exchange
//! every component sends RPCs through.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{NodeError, Result};
use crate::net::transport::HttpTransport;
use crate::rpc::{
    Ack, FindNodeParams, FindNodeResult, Method, MessageAuth, PingParams, RpcRequest,
};
use crate::types::{Contact, NodeId};

/// Contacts kept per bucket.
const BUCKET_CAPACITY: usize = 20;
/// Parallel queries per lookup round.
const LOOKUP_ALPHA: usize = 3;
/// Lookup rounds before giving up.
const LOOKUP_ROUNDS: usize = 4;

/// Bucketed contact table ordered by XOR distance from the local id.
#[derive(Debug)]
pub struct RoutingTable {
    local_id: NodeId,
    buckets: Mutex<Vec<Vec<Contact>>>,
}

impl RoutingTable {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            buckets: Mutex::new(vec![Vec::new(); 160]),
        }
    }

    fn bucket_index(&self, id: &NodeId) -> usize {
        let distance = self.local_id.distance(id);
        for (byte_idx, byte) in distance.iter().enumerate() {
            if *byte != 0 {
                let bit = byte.leading_zeros() as usize;
                return 159 - (byte_idx * 8 + bit);
            }
        }
        0
    }

    /// Insert or refresh a contact. Most-recently-seen sits at the front;
    /// a full bucket drops its stalest entry.
    pub fn add(&self, contact: Contact) {
        if contact.node_id == self.local_id {
            return;
        }
        let index = self.bucket_index(&contact.node_id);
        let mut buckets = self.buckets.lock();
        let bucket = &mut buckets[index];
        bucket.retain(|c| c.node_id != contact.node_id);
        bucket.insert(0, contact);
        bucket.truncate(BUCKET_CAPACITY);
    }

    pub fn remove(&self, id: &NodeId) {
        let index = self.bucket_index(id);
        self.buckets.lock()[index].retain(|c| c.node_id != *id);
    }

    pub fn get(&self, id: &NodeId) -> Option<Contact> {
        let index = self.bucket_index(id);
        self.buckets.lock()[index]
            .iter()
            .find(|c| c.node_id == *id)
            .cloned()
    }

    /// Up to `count` known contacts closest to `target`.
    pub fn closest(&self, target: &NodeId, count: usize) -> Vec<Contact> {
        let mut all: Vec<Contact> = self
            .buckets
            .lock()
            .iter()
            .flat_map(|b| b.iter().cloned())
            .collect();
        all.sort_by_key(|c| c.node_id.distance(target));
        all.truncate(count);
        all
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// DHT overlay: the routing table plus signed RPC plumbing.
pub struct Overlay {
    local_contact: RwLock<Contact>,
    table: RoutingTable,
    transport: HttpTransport,
    auth: Arc<MessageAuth>,
}

impl Overlay {
    pub fn new(local_contact: Contact, auth: Arc<MessageAuth>, request_timeout: Duration) -> Self {
        let table = RoutingTable::new(local_contact.node_id);
        Self {
            local_contact: RwLock::new(local_contact),
            table,
            transport: HttpTransport::new(request_timeout),
            auth,
        }
    }

    pub fn local_contact(&self) -> Contact {
        self.local_contact.read().clone()
    }

    /// Record the actually-bound port once the listener is up.
    pub fn set_local_port(&self, port: u16) {
        self.local_contact.write().port = port;
    }

    pub fn local_id(&self) -> NodeId {
        self.local_contact.read().node_id
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Sign, send, verify, and decode one RPC exchange with a peer. An
    /// error object in the reply surfaces as `ContractRejected`.
    pub async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        target: &Contact,
        method: Method,
        params: &P,
    ) -> Result<R> {
        let mut request = RpcRequest::new(method, params)?;
        self.auth.sign_request(&mut request)?;
        let mut response = self.transport.send(target, &request).await?;
        self.auth.verify_response(&mut response, target)?;
        if let Some(error) = &response.error {
            return Err(NodeError::ContractRejected(error.message.clone()));
        }
        response.typed_result()
    }

    /// Handshake with a peer and admit it to the routing table.
    pub async fn connect(&self, contact: &Contact) -> Result<()> {
        self.ping(contact).await?;
        self.table.add(contact.clone());
        Ok(())
    }

    /// Signed PING round trip.
    pub async fn ping(&self, contact: &Contact) -> Result<()> {
        let params = PingParams {
            contact: self.local_contact(),
        };
        let _: Ack = self.call(contact, Method::Ping, &params).await?;
        Ok(())
    }

    /// Resolve a node id to a contact, first locally and then through an
    /// iterative FIND_NODE lookup over the closest known peers.
    pub async fn find_node(&self, target: &NodeId) -> Result<Contact> {
        if let Some(contact) = self.table.get(target) {
            return Ok(contact);
        }

        let mut shortlist = self.table.closest(target, BUCKET_CAPACITY);
        let mut queried: HashSet<NodeId> = HashSet::new();
        queried.insert(self.local_id());

        for _ in 0..LOOKUP_ROUNDS {
            let wave: Vec<Contact> = shortlist
                .iter()
                .filter(|c| !queried.contains(&c.node_id))
                .take(LOOKUP_ALPHA)
                .cloned()
                .collect();
            if wave.is_empty() {
                break;
            }

            for peer in wave {
                queried.insert(peer.node_id);
                let params = FindNodeParams {
                    key: *target,
                    contact: self.local_contact(),
                };
                let found: FindNodeResult = match self.call(&peer, Method::FindNode, &params).await
                {
                    Ok(found) => found,
                    Err(e) => {
                        debug!(peer = %peer.node_id, error = %e, "lookup query failed");
                        continue;
                    }
                };
                for contact in found.nodes {
                    if contact.node_id == *target {
                        self.table.add(contact.clone());
                        return Ok(contact);
                    }
                    if !queried.contains(&contact.node_id)
                        && !shortlist.iter().any(|c| c.node_id == contact.node_id)
                    {
                        shortlist.push(contact);
                    }
                }
                shortlist.sort_by_key(|c| c.node_id.distance(target));
            }
        }

        Err(NodeError::PeerNotFound(target.to_hex()))
    }
}

impl std::fmt::Debug for Overlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Overlay({})", self.local_contact())
    }
}
