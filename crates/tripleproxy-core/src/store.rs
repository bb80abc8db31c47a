//! Durable cluster state
//!
//! Two records survive restarts of the proxy: the last discovered
//! [`NodeSet`] and the [`VerifiedSet`]. Both are always written whole.

use crate::error::{Error, Result};
use crate::node::{NodeSet, VerifiedSet};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::{Path, PathBuf};

const NODE_SET_FILE: &str = "node_set.json";
const VERIFIED_SET_FILE: &str = "verified_set.json";

/// Key-value persistence for cluster state
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Last stored node set; `None` if discovery never ran
    async fn load_node_set(&self) -> Result<Option<NodeSet>>;

    async fn save_node_set(&self, node_set: &NodeSet) -> Result<()>;

    /// Stored verified set; empty if never written
    async fn load_verified(&self) -> Result<VerifiedSet>;

    async fn save_verified(&self, verified: &VerifiedSet) -> Result<()>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    node_set: RwLock<Option<NodeSet>>,
    verified: RwLock<VerifiedSet>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_node_set(&self) -> Result<Option<NodeSet>> {
        Ok(self.node_set.read().clone())
    }

    async fn save_node_set(&self, node_set: &NodeSet) -> Result<()> {
        *self.node_set.write() = Some(node_set.clone());
        Ok(())
    }

    async fn load_verified(&self) -> Result<VerifiedSet> {
        Ok(self.verified.read().clone())
    }

    async fn save_verified(&self, verified: &VerifiedSet) -> Result<()> {
        *self.verified.write() = verified.clone();
        Ok(())
    }
}

/// JSON files in a directory, replaced atomically on every save
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Open (and create if needed) the state directory
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        tracing::info!("Using state directory {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let dir = self.dir.clone();
        let target = self.dir.join(name);

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut file = tempfile::NamedTempFile::new_in(&dir)?;
            file.write_all(&bytes)?;
            file.as_file().sync_all()?;
            file.persist(&target).map_err(|e| Error::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| Error::store(format!("state write task failed: {}", e)))?
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load_node_set(&self) -> Result<Option<NodeSet>> {
        self.read_json(NODE_SET_FILE).await
    }

    async fn save_node_set(&self, node_set: &NodeSet) -> Result<()> {
        self.write_json(NODE_SET_FILE, node_set).await
    }

    async fn load_verified(&self) -> Result<VerifiedSet> {
        Ok(self
            .read_json(VERIFIED_SET_FILE)
            .await?
            .unwrap_or_default())
    }

    async fn save_verified(&self, verified: &VerifiedSet) -> Result<()> {
        self.write_json(VERIFIED_SET_FILE, verified).await
    }
}
