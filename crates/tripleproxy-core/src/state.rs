//! Cluster state with an in-process read cache over the [`StateStore`]

use crate::node::{NodeSet, VerifiedSet};
use crate::store::StateStore;
use std::sync::Arc;
use tokio::sync::Mutex;

enum Memo<T> {
    Empty,
    Loaded(T),
}

/// NodeSet and VerifiedSet as seen by this process
///
/// Reads hit the store once and are memoized afterwards. Writes always go
/// to the store; a failed write is logged and the memo is still updated.
/// Read-modify-write of the verified set is serialized by its mutex, which
/// is held across the store write.
pub struct ClusterState {
    store: Arc<dyn StateStore>,
    node_set: Mutex<Memo<Option<NodeSet>>>,
    verified: Mutex<Memo<VerifiedSet>>,
}

impl ClusterState {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            node_set: Mutex::new(Memo::Empty),
            verified: Mutex::new(Memo::Empty),
        }
    }

    /// Cached node set, stale or not
    pub async fn node_set(&self) -> Option<NodeSet> {
        let mut memo = self.node_set.lock().await;
        self.load_node_set(&mut memo).await
    }

    pub async fn set_node_set(&self, node_set: NodeSet) {
        let mut memo = self.node_set.lock().await;
        self.store_node_set(&mut memo, node_set).await;
    }

    /// Mark the cached node set stale; a no-op if nothing is cached or it
    /// is already stale
    pub async fn invalidate(&self) {
        let mut memo = self.node_set.lock().await;
        let Some(current) = self.load_node_set(&mut memo).await else {
            return;
        };
        if current.stale {
            tracing::debug!("Node cache already invalidated");
            return;
        }

        self.store_node_set(&mut memo, current.invalidated()).await;
        tracing::info!("Invalidated node cache");
    }

    async fn load_node_set(&self, memo: &mut Memo<Option<NodeSet>>) -> Option<NodeSet> {
        if let Memo::Loaded(set) = memo {
            return set.clone();
        }

        match self.store.load_node_set().await {
            Ok(set) => {
                *memo = Memo::Loaded(set.clone());
                set
            }
            Err(e) => {
                tracing::warn!("Failed to load node set, treating as not cached: {}", e);
                None
            }
        }
    }

    async fn store_node_set(&self, memo: &mut Memo<Option<NodeSet>>, node_set: NodeSet) {
        if let Err(e) = self.store.save_node_set(&node_set).await {
            tracing::error!("Failed to persist node set: {}", e);
        }
        *memo = Memo::Loaded(Some(node_set));
    }

    pub async fn verified(&self) -> VerifiedSet {
        let mut memo = self.verified.lock().await;
        self.load_verified(&mut memo).await
    }

    pub async fn add_verified(&self, node: &str) {
        self.update_verified(|set| set.insert(node)).await;
    }

    pub async fn remove_verified(&self, node: &str) {
        self.update_verified(|set| set.remove(node)).await;
    }

    pub async fn clear_verified(&self) {
        let mut memo = self.verified.lock().await;
        let cleared = VerifiedSet::new();
        if let Err(e) = self.store.save_verified(&cleared).await {
            tracing::error!("Failed to persist verified set: {}", e);
        }
        *memo = Memo::Loaded(cleared);
    }

    async fn load_verified(&self, memo: &mut Memo<VerifiedSet>) -> VerifiedSet {
        if let Memo::Loaded(set) = memo {
            return set.clone();
        }

        match self.store.load_verified().await {
            Ok(set) => {
                *memo = Memo::Loaded(set.clone());
                set
            }
            Err(e) => {
                tracing::warn!("Failed to load verified set, treating as empty: {}", e);
                VerifiedSet::new()
            }
        }
    }

    async fn update_verified(&self, change: impl FnOnce(&mut VerifiedSet) -> bool) {
        let mut memo = self.verified.lock().await;
        let mut set = self.load_verified(&mut memo).await;
        if !change(&mut set) {
            return;
        }

        if let Err(e) = self.store.save_verified(&set).await {
            tracing::error!("Failed to persist verified set: {}", e);
        }
        *memo = Memo::Loaded(set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::node::DiscoveredNodes;
    use crate::store::MemoryStateStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample() -> NodeSet {
        NodeSet::discovered(DiscoveredNodes {
            primary: "http://p:8080".to_string(),
            replicas: vec!["http://a:8080".to_string()],
        })
    }

    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStateStore,
        node_set_loads: AtomicUsize,
    }

    #[async_trait]
    impl StateStore for CountingStore {
        async fn load_node_set(&self) -> Result<Option<NodeSet>> {
            self.node_set_loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load_node_set().await
        }
        async fn save_node_set(&self, node_set: &NodeSet) -> Result<()> {
            self.inner.save_node_set(node_set).await
        }
        async fn load_verified(&self) -> Result<VerifiedSet> {
            self.inner.load_verified().await
        }
        async fn save_verified(&self, verified: &VerifiedSet) -> Result<()> {
            self.inner.save_verified(verified).await
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl StateStore for BrokenStore {
        async fn load_node_set(&self) -> Result<Option<NodeSet>> {
            Err(Error::store("unavailable"))
        }
        async fn save_node_set(&self, _: &NodeSet) -> Result<()> {
            Err(Error::store("unavailable"))
        }
        async fn load_verified(&self) -> Result<VerifiedSet> {
            Err(Error::store("unavailable"))
        }
        async fn save_verified(&self, _: &VerifiedSet) -> Result<()> {
            Err(Error::store("unavailable"))
        }
    }

    #[tokio::test]
    async fn test_reads_are_memoized() {
        let store = Arc::new(CountingStore::default());
        store.inner.save_node_set(&sample()).await.unwrap();
        let state = ClusterState::new(store.clone());

        assert!(state.node_set().await.is_some());
        assert!(state.node_set().await.is_some());
        assert_eq!(store.node_set_loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_writes_reach_store() {
        let store = Arc::new(MemoryStateStore::new());
        let state = ClusterState::new(store.clone());

        let set = sample();
        state.set_node_set(set.clone()).await;
        state.add_verified("http://a:8080").await;

        assert_eq!(store.load_node_set().await.unwrap(), Some(set));
        assert!(store.load_verified().await.unwrap().contains("http://a:8080"));
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let state = ClusterState::new(Arc::new(MemoryStateStore::new()));
        state.invalidate().await;
        assert!(state.node_set().await.is_none());

        state.set_node_set(sample()).await;
        state.invalidate().await;
        let first = state.node_set().await.unwrap();
        state.invalidate().await;
        let second = state.node_set().await.unwrap();

        assert!(first.stale);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_invalidate_keeps_verified() {
        let state = ClusterState::new(Arc::new(MemoryStateStore::new()));
        state.set_node_set(sample()).await;
        state.add_verified("http://a:8080").await;

        state.invalidate().await;
        assert!(state.verified().await.contains("http://a:8080"));
    }

    #[tokio::test]
    async fn test_verified_updates() {
        let state = ClusterState::new(Arc::new(MemoryStateStore::new()));
        state.add_verified("http://a:8080").await;
        state.add_verified("http://b:8080").await;
        state.remove_verified("http://a:8080").await;

        let verified = state.verified().await;
        assert!(!verified.contains("http://a:8080"));
        assert!(verified.contains("http://b:8080"));

        state.clear_verified().await;
        assert!(state.verified().await.is_empty());
    }

    #[tokio::test]
    async fn test_broken_store_degrades() {
        let state = ClusterState::new(Arc::new(BrokenStore));
        assert!(state.node_set().await.is_none());
        assert!(state.verified().await.is_empty());

        // Writes fail in the store but the process keeps its own view
        state.set_node_set(sample()).await;
        state.add_verified("http://a:8080").await;
        assert_eq!(state.node_set().await.map(|s| s.primary), Some("http://p:8080".to_string()));
        assert!(state.verified().await.contains("http://a:8080"));
    }
}
