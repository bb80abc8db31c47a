//! Restarts drifted or failing nodes

use crate::consistency::ConsistencyThrottle;
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::state::ClusterState;
use std::sync::Arc;

pub struct SelfHealer {
    orchestrator: Arc<dyn Orchestrator>,
    state: Arc<ClusterState>,
    throttle: Arc<ConsistencyThrottle>,
}

impl SelfHealer {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        state: Arc<ClusterState>,
        throttle: Arc<ConsistencyThrottle>,
    ) -> Self {
        Self {
            orchestrator,
            state,
            throttle,
        }
    }

    /// Restart `node` and drop it from the read path
    ///
    /// On success the node leaves the verified set, its throttle entry is
    /// forgotten and the node cache is invalidated. On failure nothing
    /// changes and the error is returned.
    pub async fn restart(&self, node: &str) -> Result<()> {
        tracing::info!("Restarting node {}", node);

        if let Err(e) = self.orchestrator.restart(node).await {
            tracing::error!("Failed to restart node {}: {}", node, e);
            return Err(e);
        }

        self.state.remove_verified(node).await;
        self.throttle.forget(node);
        self.state.invalidate().await;

        tracing::info!("Node {} restarted and removed from verified set", node);
        Ok(())
    }
}
