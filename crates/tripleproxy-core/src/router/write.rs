//! Write path

use super::RequestRouter;
use super::outcome::{ReplicaResult, ReplicationOutcome};
use crate::error::{Error, Result};
use crate::marker::Marker;
use crate::request::ProxyRequest;
use futures::future::join_all;
use tripleproxy_protocol::{HeaderName, HeaderValue, NodeRequest, NodeResponse};

impl RequestRouter {
    pub(super) async fn handle_write(&self, request: &ProxyRequest) -> Result<NodeResponse> {
        let nodes = self.ctx.directory().node_set().await?;
        let node_request = request.to_node_request();

        let (response, before, after) = match self.write_primary(&nodes.primary, &node_request).await
        {
            Ok(written) => written,
            Err(e) => {
                tracing::error!("Error in write operation on primary {}: {}", nodes.primary, e);
                self.ctx.directory().invalidate().await;
                return Err(e);
            }
        };

        tracing::info!("Starting replication to {} replica(s)", nodes.replicas.len());
        let results = join_all(
            nodes
                .replicas
                .iter()
                .map(|replica| self.replicate(replica, &node_request, before.as_ref(), &after)),
        )
        .await;

        let outcome = ReplicationOutcome::from_results(&results);
        if outcome.needs_invalidation() {
            tracing::info!("Invalidating node cache due to failures or restarts");
            self.ctx.directory().invalidate().await;
        }

        tracing::info!(
            "Replication {}. Successful: {}, Failed: {}, Restarted: {}",
            outcome.status(),
            outcome.success_count,
            outcome.fail_count,
            outcome.restart_count
        );

        Ok(with_replication_headers(response, &outcome))
    }

    /// Apply the write to the primary and stamp a new marker on it
    ///
    /// Returns the primary's response with the markers from before and
    /// after the write.
    async fn write_primary(
        &self,
        primary: &str,
        request: &NodeRequest,
    ) -> Result<(NodeResponse, Option<Marker>, Marker)> {
        let before = self.ctx.markers().fetch(primary).await;

        let response = self.ctx.downstream().send(primary, request).await?;
        if !response.is_success() {
            return Err(Error::PrimaryWriteRejected {
                node: primary.to_string(),
                status: response.status.as_u16(),
                body: response.body_text(),
            });
        }
        tracing::debug!("Write applied on primary {}", primary);

        let after = Marker::now();
        self.ctx.markers().record(primary, &after).await?;

        Ok((response, before, after))
    }

    async fn replicate(
        &self,
        replica: &str,
        request: &NodeRequest,
        before: Option<&Marker>,
        after: &Marker,
    ) -> ReplicaResult {
        if !self.ctx.checker().is_consistent(replica, before).await {
            tracing::warn!("Replica {} drifted before the write", replica);
            return self.restart_replica(replica).await;
        }

        match self.apply_to_replica(replica, request, after).await {
            Ok(()) => {
                tracing::debug!("Successful replication to replica {}", replica);
                ReplicaResult::Replicated
            }
            Err(e) => {
                tracing::warn!("Error replicating to replica {}: {}", replica, e);
                self.restart_replica(replica).await
            }
        }
    }

    async fn apply_to_replica(
        &self,
        replica: &str,
        request: &NodeRequest,
        after: &Marker,
    ) -> Result<()> {
        let response = self.ctx.downstream().send(replica, request).await?;
        if !response.is_success() {
            return Err(Error::ReplicaWriteRejected {
                node: replica.to_string(),
                status: response.status.as_u16(),
            });
        }

        self.ctx.markers().record_strict(replica, after).await
    }

    async fn restart_replica(&self, replica: &str) -> ReplicaResult {
        match self.ctx.healer().restart(replica).await {
            Ok(()) => ReplicaResult::Restarted,
            Err(_) => ReplicaResult::Failed,
        }
    }
}

fn with_replication_headers(mut response: NodeResponse, outcome: &ReplicationOutcome) -> NodeResponse {
    for (name, value) in outcome.headers() {
        if let Ok(value) = HeaderValue::from_str(&value) {
            response
                .headers
                .insert(HeaderName::from_static(name), value);
        }
    }
    response
}
