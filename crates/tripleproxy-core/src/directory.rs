//! Cluster membership cache with verification

use crate::consistency::ConsistencyChecker;
use crate::discovery::Discovery;
use crate::error::Result;
use crate::healer::SelfHealer;
use crate::marker::{Marker, MarkerProtocol};
use crate::node::NodeSet;
use crate::state::ClusterState;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Wall time that advances with the tokio clock
///
/// Anchored to `Utc::now()` at construction; elapsed time comes from
/// `tokio::time::Instant`.
struct WallClock {
    origin: DateTime<Utc>,
    started: Instant,
}

impl WallClock {
    fn new() -> Self {
        Self {
            origin: Utc::now(),
            started: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.origin + elapsed
    }
}

/// Hands out the current node set, re-discovering and re-verifying the
/// cluster when the cached set is missing, stale or older than the TTL
pub struct NodeDirectory {
    discovery: Arc<dyn Discovery>,
    state: Arc<ClusterState>,
    checker: Arc<ConsistencyChecker>,
    healer: Arc<SelfHealer>,
    markers: Arc<MarkerProtocol>,
    ttl: Duration,
    clock: WallClock,
    refresh_lock: Mutex<()>,
}

impl NodeDirectory {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        state: Arc<ClusterState>,
        checker: Arc<ConsistencyChecker>,
        healer: Arc<SelfHealer>,
        markers: Arc<MarkerProtocol>,
        ttl: Duration,
    ) -> Self {
        Self {
            discovery,
            state,
            checker,
            healer,
            markers,
            ttl,
            clock: WallClock::new(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Current node set with replicas filtered to the verified set
    pub async fn node_set(&self) -> Result<NodeSet> {
        let node_set = match self.fresh_cached().await {
            Some(cached) => {
                tracing::debug!(
                    "Using cached nodes (age {:?})",
                    cached.age_at(self.clock.now())
                );
                cached
            }
            None => self.refresh().await?,
        };

        let verified = self.state.verified().await;
        Ok(node_set.retain_verified(&verified))
    }

    /// Mark the cached node set stale
    pub async fn invalidate(&self) {
        self.state.invalidate().await;
    }

    /// Run a discovery cycle unless another task just finished one
    pub async fn refresh(&self) -> Result<NodeSet> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(cached) = self.fresh_cached().await {
            tracing::debug!("Node set refreshed by another task");
            return Ok(cached);
        }

        tracing::info!("Discovering cluster nodes");
        let discovered = self.discovery.discover().await?;
        let node_set = NodeSet::discovered_at(discovered, self.clock.now());

        self.state.set_node_set(node_set.clone()).await;
        self.state.clear_verified().await;

        let primary_marker = self.markers.fetch(&node_set.primary).await;
        self.verify_replicas(&node_set.replicas, primary_marker.as_ref())
            .await;

        tracing::info!(
            "Discovered primary {} with {} replica(s)",
            node_set.primary,
            node_set.replicas.len()
        );
        Ok(node_set)
    }

    async fn fresh_cached(&self) -> Option<NodeSet> {
        self.state
            .node_set()
            .await
            .filter(|cached| cached.is_fresh_at(self.ttl, self.clock.now()))
    }

    async fn verify_replicas(&self, replicas: &[String], primary_marker: Option<&Marker>) {
        let checks = replicas
            .iter()
            .map(|replica| self.verify_replica(replica, primary_marker));
        join_all(checks).await;
    }

    async fn verify_replica(&self, replica: &str, primary_marker: Option<&Marker>) {
        if self.checker.is_consistent(replica, primary_marker).await {
            self.state.add_verified(replica).await;
            tracing::debug!("Replica {} verified", replica);
            return;
        }

        tracing::warn!("Replica {} is inconsistent, scheduling restart", replica);
        self.state.remove_verified(replica).await;
        if let Err(e) = self.healer.restart(replica).await {
            tracing::warn!("Replica {} stays out of rotation: {}", replica, e);
        }
    }
}
