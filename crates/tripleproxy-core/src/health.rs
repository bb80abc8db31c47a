//! Liveness of the primary

use crate::context::ClusterContext;
use std::sync::Arc;
use tripleproxy_protocol::{Method, NodeRequest};

#[derive(Clone)]
pub struct HealthCheck {
    ctx: Arc<ClusterContext>,
}

impl HealthCheck {
    pub fn new(ctx: Arc<ClusterContext>) -> Self {
        Self { ctx }
    }

    /// True when the primary answers the health probe with a 2xx
    pub async fn check(&self) -> bool {
        let nodes = match self.ctx.directory().node_set().await {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::error!("Health check failed to resolve nodes: {}", e);
                return false;
            }
        };

        let request = NodeRequest::new(Method::GET, self.ctx.config().health_path.clone());
        match self.ctx.downstream().send(&nodes.primary, &request).await {
            Ok(response) if response.is_success() => true,
            Ok(response) => {
                tracing::warn!(
                    "Health check on primary {} returned status {}",
                    nodes.primary,
                    response.status
                );
                false
            }
            Err(e) => {
                tracing::error!("Health check failed: {}", e);
                false
            }
        }
    }
}
