//! Node configuration and protocol constants

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Window inside which a message nonce is accepted.
pub const NONCE_EXPIRE_MS: u64 = 15_000;

/// How long a published contract waits for a farmer offer before the
/// store operation fails.
pub const OFFER_TIMEOUT_MS: u64 = 60_000;

/// Interval between liveness pings to seed contacts.
pub const PING_INTERVAL_MS: u64 = 60_000;

/// Pre-committed audit challenges per contract.
pub const DEFAULT_AUDIT_COUNT: u32 = 12;

/// Default RPC bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1:4000";

fn default_bind() -> SocketAddr {
    DEFAULT_BIND.parse().expect("default bind address parses")
}

fn default_datadir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".storjnode"))
}

fn default_true() -> bool {
    true
}

fn default_audit_count() -> u32 {
    DEFAULT_AUDIT_COUNT
}

fn default_nonce_expire_ms() -> u64 {
    NONCE_EXPIRE_MS
}

fn default_offer_timeout_ms() -> u64 {
    OFFER_TIMEOUT_MS
}

fn default_ping_interval_ms() -> u64 {
    PING_INTERVAL_MS
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_publish_ttl() -> u32 {
    3
}

fn default_publish_fanout() -> usize {
    6
}

/// Runtime configuration for a [`crate::node::Node`].
///
/// Every field has a serde default so a partial TOML file works.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the RPC listener binds to. Port 0 picks an ephemeral port.
    pub bind: SocketAddr,
    /// Data directory for shards and storage items. `None` keeps
    /// everything in memory.
    pub datadir: Option<PathBuf>,
    /// Seed contact URIs joined on startup.
    pub seeds: Vec<String>,
    /// Whether this node offers storage for published contracts.
    pub farm: bool,
    /// Hex-encoded secp256k1 secret key. Generated when absent.
    pub secret_key: Option<String>,
    /// Audit challenges generated per stored shard.
    pub audit_count: u32,
    pub nonce_expire_ms: u64,
    pub offer_timeout_ms: u64,
    pub ping_interval_ms: u64,
    pub request_timeout_ms: u64,
    /// Relay hops for published contracts.
    pub publish_ttl: u32,
    /// Contacts a publication is relayed to per hop.
    pub publish_fanout: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            datadir: default_datadir(),
            seeds: Vec::new(),
            farm: default_true(),
            secret_key: None,
            audit_count: default_audit_count(),
            nonce_expire_ms: default_nonce_expire_ms(),
            offer_timeout_ms: default_offer_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            publish_ttl: default_publish_ttl(),
            publish_fanout: default_publish_fanout(),
        }
    }
}

impl NodeConfig {
    /// In-memory configuration on an ephemeral port, used by tests and
    /// short-lived nodes.
    pub fn ephemeral() -> Self {
        Self {
            bind: "127.0.0.1:0".parse().expect("loopback address parses"),
            datadir: None,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.bind.to_string(), DEFAULT_BIND);
        assert!(config.farm);
        assert_eq!(config.audit_count, 12);
        assert_eq!(config.nonce_expire_ms, 15_000);
        assert_eq!(config.offer_timeout_ms, 60_000);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: NodeConfig =
            serde_json::from_str(r#"{"bind": "0.0.0.0:5000", "farm": false}"#).unwrap();
        assert_eq!(config.bind.to_string(), "0.0.0.0:5000");
        assert!(!config.farm);
        assert_eq!(config.audit_count, DEFAULT_AUDIT_COUNT);
    }

    #[test]
    fn test_ephemeral_is_memory_only() {
        let config = NodeConfig::ephemeral();
        assert!(config.datadir.is_none());
        assert_eq!(config.bind.port(), 0);
    }
}
