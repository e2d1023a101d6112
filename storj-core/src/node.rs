//! Node façade
//!
//! Composes the overlay, transport, topics, and protocol into the public
//! surface: `join`, `leave`, `store`, `retrieve`, `audit`. A node opens at
//! most once; `join` binds the RPC listener, connects the seed list, and
//! registers the contract-topic subscription when farming is enabled.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::contract::Contract;
use crate::error::{NodeError, Result};
use crate::keys::KeyPair;
use crate::liveness::SeedLiveness;
use crate::metrics::{MetricsSnapshot, NodeMetrics};
use crate::net::{Overlay, RpcEndpoint, RpcServer, Topics};
use crate::protocol::{AuditCoordinator, ContractProtocol, PendingTable};
use crate::rpc::{
    Ack, FindNodeParams, FindNodeResult, MessageAuth, Method, PingParams, RpcRequest, RpcResponse,
    ERROR_CODE_APP, ERROR_CODE_PARAMS,
};
use crate::shards::{FileShardStore, ItemStore, MemoryShardStore, ShardStore, StorageItem};
use crate::types::{Contact, NodeId, ShardHash};

/// Contacts returned per FIND_NODE query.
const FIND_NODE_RESULTS: usize = 20;
/// Housekeeping sweep interval.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

enum NodeState {
    Closed,
    Opening,
    Open {
        server: RpcServer,
        housekeeping: JoinHandle<()>,
    },
}

/// A peer in the shard storage network.
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    config: NodeConfig,
    keys: Arc<KeyPair>,
    metrics: Arc<NodeMetrics>,
    auth: Arc<MessageAuth>,
    overlay: Arc<Overlay>,
    topics: Arc<Topics>,
    pending: Arc<PendingTable>,
    items: Arc<ItemStore>,
    shards: Arc<dyn ShardStore>,
    protocol: Arc<ContractProtocol>,
    auditor: AuditCoordinator,
    liveness: SeedLiveness,
    state: Mutex<NodeState>,
}

impl Node {
    /// Build a node from configuration. Nothing touches the network until
    /// `join`.
    pub fn new(config: NodeConfig) -> Result<Self> {
        let keys = Arc::new(match &config.secret_key {
            Some(hex_secret) => KeyPair::from_secret_hex(hex_secret)?,
            None => KeyPair::generate(),
        });
        let metrics = Arc::new(NodeMetrics::new());
        let auth = Arc::new(MessageAuth::new(
            keys.clone(),
            config.nonce_expire_ms,
            metrics.clone(),
        ));

        let (shards, items): (Arc<dyn ShardStore>, Arc<ItemStore>) = match &config.datadir {
            Some(dir) => (
                Arc::new(FileShardStore::new(dir.join("shards"))?),
                Arc::new(ItemStore::new(Some(dir.join("items")))?),
            ),
            None => (
                Arc::new(MemoryShardStore::new()),
                Arc::new(ItemStore::new(None)?),
            ),
        };

        let contact = Contact::new(
            config.bind.ip().to_string(),
            config.bind.port(),
            keys.node_id(),
        );
        let overlay = Arc::new(Overlay::new(
            contact,
            auth.clone(),
            Duration::from_millis(config.request_timeout_ms),
        ));
        let topics = Arc::new(Topics::new(
            overlay.clone(),
            config.publish_ttl,
            config.publish_fanout,
        ));
        let pending = Arc::new(PendingTable::new());
        let protocol = Arc::new(ContractProtocol::new(
            keys.clone(),
            overlay.clone(),
            topics.clone(),
            pending.clone(),
            items.clone(),
            shards.clone(),
            metrics.clone(),
            config.audit_count,
            Duration::from_millis(config.offer_timeout_ms),
        ));
        let auditor = AuditCoordinator::new(overlay.clone(), items.clone(), metrics.clone());

        Ok(Self {
            inner: Arc::new(NodeInner {
                config,
                keys,
                metrics,
                auth,
                overlay,
                topics,
                pending,
                items,
                shards,
                protocol,
                auditor,
                liveness: SeedLiveness::new(),
                state: Mutex::new(NodeState::Closed),
            }),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.keys.node_id()
    }

    /// This node's contact, with the actually-bound port once open.
    pub fn contact(&self) -> Contact {
        self.inner.overlay.local_contact()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Join the network: bind the listener, connect seeds, start liveness
    /// pings, and subscribe to the contract topic when farming.
    pub async fn join(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                NodeState::Closed => *state = NodeState::Opening,
                _ => return Err(NodeError::AlreadyOpen),
            }
        }
        match self.open().await {
            Ok(()) => Ok(()),
            Err(e) => {
                *self.inner.state.lock() = NodeState::Closed;
                Err(e)
            }
        }
    }

    async fn open(&self) -> Result<()> {
        let inner = &self.inner;

        if inner.config.farm {
            let protocol = inner.protocol.clone();
            inner.topics.subscribe(
                Contract::topic_for_version(Contract::VERSION),
                Arc::new(move |contents| -> BoxFuture<'static, ()> {
                    let protocol = protocol.clone();
                    Box::pin(async move { protocol.on_contract_published(contents).await })
                }),
            );
        }

        let endpoint = Arc::new(NodeEndpoint {
            auth: inner.auth.clone(),
            overlay: inner.overlay.clone(),
            topics: inner.topics.clone(),
            protocol: inner.protocol.clone(),
            metrics: inner.metrics.clone(),
        });
        let server = RpcServer::serve(inner.config.bind, endpoint).await?;
        inner.overlay.set_local_port(server.local_addr().port());

        let ping_interval = Duration::from_millis(inner.config.ping_interval_ms);
        for uri in &inner.config.seeds {
            let seed = match Contact::from_uri(uri) {
                Ok(seed) => seed,
                Err(e) => {
                    warn!(uri = %uri, error = %e, "skipping unparsable seed");
                    continue;
                }
            };
            if let Err(e) = inner.overlay.connect(&seed).await {
                warn!(seed = %seed, error = %e, "seed unreachable, will keep retrying");
            }
            inner.liveness.watch(inner.overlay.clone(), seed, ping_interval);
        }

        let housekeeping = {
            let pending = inner.pending.clone();
            let protocol = inner.protocol.clone();
            let offer_window = Duration::from_millis(inner.config.offer_timeout_ms * 2);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
                loop {
                    ticker.tick().await;
                    let expired = pending.expire(Instant::now());
                    if expired > 0 {
                        debug!(expired, "purged pending offers");
                    }
                    protocol.expire_offers(offer_window);
                }
            })
        };

        info!(contact = %inner.overlay.local_contact(), farm = inner.config.farm, "node joined");
        *inner.state.lock() = NodeState::Open {
            server,
            housekeeping,
        };
        Ok(())
    }

    /// Leave the network: cancel timers, stop the listener, and wait for
    /// in-flight requests to drain.
    pub async fn leave(&self) -> Result<()> {
        let taken = {
            let mut state = self.inner.state.lock();
            if !matches!(*state, NodeState::Open { .. }) {
                return Err(NodeError::NotOpen);
            }
            std::mem::replace(&mut *state, NodeState::Closed)
        };
        let NodeState::Open {
            server,
            housekeeping,
        } = taken
        else {
            return Err(NodeError::NotOpen);
        };

        self.inner.liveness.stop();
        housekeeping.abort();
        server.shutdown().await;
        info!(node = %self.node_id(), "node left");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        match *self.inner.state.lock() {
            NodeState::Open { .. } => Ok(()),
            _ => Err(NodeError::NotOpen),
        }
    }

    /// Store `data` on the network for `duration`; resolves to the shard
    /// hash once a farmer holds the bytes.
    pub async fn store(&self, data: Vec<u8>, duration: Duration) -> Result<ShardHash> {
        self.ensure_open()?;
        self.inner.protocol.store(data, duration).await
    }

    /// Fetch a previously stored shard back from its holder.
    pub async fn retrieve(&self, hash: &ShardHash) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.inner.protocol.retrieve(hash).await
    }

    /// Challenge a holder of `hash`; true when the proof verifies.
    pub async fn audit(&self, hash: &ShardHash) -> Result<bool> {
        self.ensure_open()?;
        self.inner.auditor.audit(hash).await
    }

    /// Storage bookkeeping for a shard, if any.
    pub async fn storage_item(&self, hash: &ShardHash) -> Result<Option<StorageItem>> {
        self.inner.items.get(hash).await
    }

    /// Drop a held shard's bytes from the backend. Contracts and audit
    /// records are kept; subsequent audits against this node will fail.
    pub async fn delete_shard(&self, hash: &ShardHash) -> Result<()> {
        self.inner.shards.delete(hash).await
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node({})", self.inner.keys.node_id())
    }
}

/// Request dispatcher behind the RPC listener.
struct NodeEndpoint {
    auth: Arc<MessageAuth>,
    overlay: Arc<Overlay>,
    topics: Arc<Topics>,
    protocol: Arc<ContractProtocol>,
    metrics: Arc<NodeMetrics>,
}

#[async_trait]
impl RpcEndpoint for NodeEndpoint {
    async fn handle(&self, mut request: RpcRequest, peer: SocketAddr) -> Option<RpcResponse> {
        NodeMetrics::incr(&self.metrics.messages_received);

        let sender = match request.sender_contact() {
            Ok(sender) => sender,
            Err(e) => {
                // No claimed identity to verify against; drop silently.
                debug!(peer = %peer, error = %e, "request without sender contact");
                NodeMetrics::incr(&self.metrics.auth_failures);
                return None;
            }
        };
        if self.auth.verify_request(&mut request, &sender).is_err() {
            return None;
        }
        // The sender proved its identity; remember it for routing.
        self.overlay.table().add(sender.clone());

        let mut response = match request.method() {
            None => RpcResponse::failure(&request.id, ERROR_CODE_PARAMS, "unknown method"),
            Some(method) => match self.dispatch(method, &request, &sender).await {
                Ok(result) => RpcResponse::success(&request.id, &result)
                    .unwrap_or_else(|e| failure_for(&request.id, &e)),
                Err(e) => {
                    debug!(method = %request.method, peer = %sender.node_id, error = %e, "handler failed");
                    failure_for(&request.id, &e)
                }
            },
        };

        if let Err(e) = self.auth.sign_response(&mut response) {
            warn!(error = %e, "failed to sign response");
            return None;
        }
        NodeMetrics::incr(&self.metrics.messages_sent);
        Some(response)
    }
}

impl NodeEndpoint {
    async fn dispatch(
        &self,
        method: Method,
        request: &RpcRequest,
        sender: &Contact,
    ) -> Result<Value> {
        match method {
            Method::Ping => {
                let _params: PingParams = request.typed_params()?;
                to_value(Ack {})
            }
            Method::FindNode => {
                let params: FindNodeParams = request.typed_params()?;
                let mut nodes = self.overlay.table().closest(&params.key, FIND_NODE_RESULTS);
                if self.overlay.local_id() == params.key {
                    nodes.insert(0, self.overlay.local_contact());
                }
                to_value(FindNodeResult { nodes })
            }
            Method::Publish => {
                let params = request.typed_params()?;
                to_value(self.topics.handle_publish(params, sender).await?)
            }
            Method::Offer => {
                let params = request.typed_params()?;
                to_value(self.protocol.handle_offer(params, sender).await?)
            }
            Method::Consign => {
                let params = request.typed_params()?;
                to_value(self.protocol.handle_consign(params, sender).await?)
            }
            Method::Retrieve => {
                let params = request.typed_params()?;
                to_value(self.protocol.handle_retrieve(params, sender).await?)
            }
            Method::Audit => {
                let params = request.typed_params()?;
                to_value(self.protocol.handle_audit(params, sender).await?)
            }
        }
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn failure_for(id: &str, error: &NodeError) -> RpcResponse {
    let code = match error {
        NodeError::BadResponse(_) => ERROR_CODE_PARAMS,
        _ => ERROR_CODE_APP,
    };
    RpcResponse::failure(id, code, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_twice_fails_with_already_open() {
        let node = Node::new(NodeConfig::ephemeral()).unwrap();
        node.join().await.unwrap();
        assert_eq!(node.join().await.unwrap_err(), NodeError::AlreadyOpen);
        node.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_leave_without_join_fails_with_not_open() {
        let node = Node::new(NodeConfig::ephemeral()).unwrap();
        assert_eq!(node.leave().await.unwrap_err(), NodeError::NotOpen);
    }

    #[tokio::test]
    async fn test_operations_require_open_node() {
        let node = Node::new(NodeConfig::ephemeral()).unwrap();
        let hash = ShardHash::of(b"data");
        assert_eq!(
            node.store(b"data".to_vec(), Duration::from_secs(60))
                .await
                .unwrap_err(),
            NodeError::NotOpen
        );
        assert_eq!(node.retrieve(&hash).await.unwrap_err(), NodeError::NotOpen);
        assert_eq!(node.audit(&hash).await.unwrap_err(), NodeError::NotOpen);
    }

    #[tokio::test]
    async fn test_rejoin_after_leave() {
        let node = Node::new(NodeConfig::ephemeral()).unwrap();
        node.join().await.unwrap();
        node.leave().await.unwrap();
        node.join().await.unwrap();
        node.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_contact_reflects_bound_port() {
        let node = Node::new(NodeConfig::ephemeral()).unwrap();
        node.join().await.unwrap();
        assert_ne!(node.contact().port, 0);
        node.leave().await.unwrap();
    }
}
