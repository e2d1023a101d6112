//! Peer node for a content-addressed shard storage network
//!
//! Peers discover each other over a Kademlia-style overlay, negotiate
//! storage contracts on a pub/sub topic, transfer shard bytes point to
//! point, and prove continued possession through Merkle audits. Every
//! message on the wire is authenticated with a secp256k1 signature bound
//! to the sender's node id, the hash of its public key.
//!
//! The [`node::Node`] façade composes the pieces:
//!
//! ```no_run
//! use std::time::Duration;
//! use storj_core::{Node, NodeConfig};
//!
//! # async fn run() -> storj_core::Result<()> {
//! let node = Node::new(NodeConfig::default())?;
//! node.join().await?;
//! let hash = node.store(b"hello".to_vec(), Duration::from_secs(3600)).await?;
//! assert_eq!(node.retrieve(&hash).await?, b"hello");
//! assert!(node.audit(&hash).await?);
//! node.leave().await?;
//! # Ok(())
//! # }
//! ```

// Core type definitions
pub mod types;

// Error kinds
pub mod error;

// Node identity and signatures
pub mod keys;

// Contract object model
pub mod contract;

// Merkle audit trees and verification
pub mod audit;

// Shard and storage-item backends
pub mod shards;

// Signed RPC message schema and auth hooks
pub mod rpc;

// Transport, overlay routing, pub/sub
pub mod net;

// Contract negotiation and audit coordination
pub mod protocol;

// Seed liveness pings
pub mod liveness;

// Node counters
pub mod metrics;

// Configuration
pub mod config;

// Node façade
pub mod node;

pub use config::NodeConfig;
pub use contract::{Contract, Role};
pub use error::{NodeError, Result};
pub use keys::KeyPair;
pub use metrics::MetricsSnapshot;
pub use node::Node;
pub use shards::StorageItem;
pub use types::{Contact, NodeId, ShardHash};
