//! Shard byte storage backends
//!
//! Farmers persist shard bytes under their content address. The file
//! backend keeps one file per shard in `datadir/shards`; the memory
//! backend serves tests and ephemeral nodes.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{NodeError, Result};
use crate::types::ShardHash;

pub mod items;

pub use items::{ItemStore, StorageItem};

/// Backend holding raw shard bytes, keyed by content address.
#[async_trait]
pub trait ShardStore: Send + Sync {
    async fn put(&self, hash: &ShardHash, data: &[u8]) -> Result<()>;

    /// Load a shard; `Storage` error when absent.
    async fn get(&self, hash: &ShardHash) -> Result<Vec<u8>>;

    async fn delete(&self, hash: &ShardHash) -> Result<()>;

    async fn contains(&self, hash: &ShardHash) -> bool;
}

/// In-memory shard storage.
#[derive(Debug, Default)]
pub struct MemoryShardStore {
    shards: RwLock<HashMap<ShardHash, Vec<u8>>>,
}

impl MemoryShardStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShardStore for MemoryShardStore {
    async fn put(&self, hash: &ShardHash, data: &[u8]) -> Result<()> {
        self.shards.write().insert(*hash, data.to_vec());
        Ok(())
    }

    async fn get(&self, hash: &ShardHash) -> Result<Vec<u8>> {
        self.shards
            .read()
            .get(hash)
            .cloned()
            .ok_or_else(|| NodeError::Storage(format!("shard {} not found", hash)))
    }

    async fn delete(&self, hash: &ShardHash) -> Result<()> {
        self.shards.write().remove(hash);
        Ok(())
    }

    async fn contains(&self, hash: &ShardHash) -> bool {
        self.shards.read().contains_key(hash)
    }
}

/// One file per shard under `dir`, named by the hex content address.
#[derive(Debug)]
pub struct FileShardStore {
    dir: PathBuf,
}

impl FileShardStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .map_err(|e| NodeError::Storage(format!("creating {}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    fn path_for(&self, hash: &ShardHash) -> PathBuf {
        self.dir.join(hash.to_hex())
    }
}

#[async_trait]
impl ShardStore for FileShardStore {
    async fn put(&self, hash: &ShardHash, data: &[u8]) -> Result<()> {
        tokio::fs::write(self.path_for(hash), data)
            .await
            .map_err(|e| NodeError::Storage(format!("writing shard {}: {}", hash, e)))
    }

    async fn get(&self, hash: &ShardHash) -> Result<Vec<u8>> {
        tokio::fs::read(self.path_for(hash))
            .await
            .map_err(|e| NodeError::Storage(format!("shard {} not found: {}", hash, e)))
    }

    async fn delete(&self, hash: &ShardHash) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(hash)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(NodeError::Storage(format!("deleting shard {}: {}", hash, e))),
        }
    }

    async fn contains(&self, hash: &ShardHash) -> bool {
        self.path_for(hash).exists()
    }
}
