//! Storage items: per-shard bookkeeping for both sides of a contract
//!
//! A renter's item records, per holding farmer, the completed contract,
//! the public audit record it consigned, the unused private challenges,
//! and opaque metadata. A farmer's item records the mirror image keyed by
//! renter. Items are persisted as one JSON file per shard hash under
//! `datadir/items/`; without a datadir the store is memory only.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::{PrivateAuditRecord, PublicAuditRecord};
use crate::contract::Contract;
use crate::error::{NodeError, Result};
use crate::types::{NodeId, ShardHash};

/// Bookkeeping for one shard, keyed per counterparty node.
///
/// The four maps always share the same key set for entries written
/// through [`StorageItem::record_holder`]; farmer-side code fills the
/// maps piecemeal as the negotiation progresses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageItem {
    /// Completed contract per counterparty.
    pub contracts: BTreeMap<NodeId, Contract>,
    /// Public audit record per counterparty.
    pub trees: BTreeMap<NodeId, PublicAuditRecord>,
    /// Remaining private challenges per counterparty.
    pub challenges: BTreeMap<NodeId, PrivateAuditRecord>,
    /// Opaque per-counterparty metadata.
    pub meta: BTreeMap<NodeId, Value>,
}

impl StorageItem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a counterparty across all four maps at once.
    pub fn record_holder(
        &mut self,
        peer: NodeId,
        contract: Contract,
        tree: PublicAuditRecord,
        challenges: PrivateAuditRecord,
        meta: Value,
    ) {
        self.contracts.insert(peer, contract);
        self.trees.insert(peer, tree);
        self.challenges.insert(peer, challenges);
        self.meta.insert(peer, meta);
    }
}

/// Persistent map of shard hash to [`StorageItem`].
///
/// Always caches in memory; mirrors every write to disk when a directory
/// is configured.
#[derive(Debug)]
pub struct ItemStore {
    dir: Option<PathBuf>,
    cache: RwLock<HashMap<ShardHash, StorageItem>>,
}

impl ItemStore {
    pub fn new(dir: Option<PathBuf>) -> Result<Self> {
        if let Some(dir) = &dir {
            std::fs::create_dir_all(dir)
                .map_err(|e| NodeError::Storage(format!("creating {}: {}", dir.display(), e)))?;
        }
        Ok(Self {
            dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn path_for(&self, hash: &ShardHash) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(hash.to_hex()))
    }

    /// Load an item from cache, falling back to disk.
    pub async fn get(&self, hash: &ShardHash) -> Result<Option<StorageItem>> {
        if let Some(item) = self.cache.read().get(hash) {
            return Ok(Some(item.clone()));
        }
        let Some(path) = self.path_for(hash) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let item: StorageItem = serde_json::from_slice(&bytes)
                    .map_err(|e| NodeError::Storage(format!("corrupt item {}: {}", hash, e)))?;
                self.cache.write().insert(*hash, item.clone());
                Ok(Some(item))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(NodeError::Storage(format!("reading item {}: {}", hash, e))),
        }
    }

    /// Write an item to the cache and, when configured, to disk. The disk
    /// write completes before this returns, so callers can rely on the
    /// updated item surviving a restart.
    pub async fn put(&self, hash: &ShardHash, item: &StorageItem) -> Result<()> {
        self.cache.write().insert(*hash, item.clone());
        if let Some(path) = self.path_for(hash) {
            let bytes = serde_json::to_vec_pretty(item)
                .map_err(|e| NodeError::Storage(format!("encoding item {}: {}", hash, e)))?;
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|e| NodeError::Storage(format!("writing item {}: {}", hash, e)))?;
        }
        Ok(())
    }
}
