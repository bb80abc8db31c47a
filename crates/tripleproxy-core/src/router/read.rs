//! Read path

use super::RequestRouter;
use crate::config::ReadBalancing;
use crate::error::{Error, Result};
use crate::node::NodeSet;
use crate::request::ProxyRequest;
use rand::seq::SliceRandom;
use tripleproxy_protocol::NodeResponse;

/// A node eligible to serve a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub primary: bool,
}

/// Read candidates in the order they should be tried
pub fn order_candidates(nodes: &NodeSet, policy: ReadBalancing) -> Vec<Candidate> {
    let primary = Candidate {
        url: nodes.primary.clone(),
        primary: true,
    };
    let replicas = nodes.replicas.iter().map(|url| Candidate {
        url: url.clone(),
        primary: false,
    });

    match policy {
        ReadBalancing::PrimaryFirst => std::iter::once(primary).chain(replicas).collect(),
        ReadBalancing::PrimaryLast => replicas.chain(std::iter::once(primary)).collect(),
        ReadBalancing::Random => {
            let mut candidates: Vec<Candidate> =
                std::iter::once(primary).chain(replicas).collect();
            candidates.shuffle(&mut rand::thread_rng());
            candidates
        }
    }
}

impl RequestRouter {
    pub(super) async fn handle_read(&self, request: &ProxyRequest) -> Result<NodeResponse> {
        let nodes = self.ctx.directory().node_set().await?;
        let candidates = order_candidates(&nodes, self.ctx.config().read_balancing);
        let node_request = request.to_node_request();

        for candidate in &candidates {
            let failure = match self.ctx.downstream().send(&candidate.url, &node_request).await {
                Ok(response) if !response.status.is_server_error() => {
                    tracing::debug!("Read request successful, using {}", candidate.url);
                    return Ok(response);
                }
                Ok(response) => format!("status {}", response.status),
                Err(e) => e.to_string(),
            };

            tracing::warn!("Error reading from node {}: {}", candidate.url, failure);

            if !candidate.primary {
                if let Err(e) = self.ctx.healer().restart(&candidate.url).await {
                    tracing::warn!(
                        "Replica {} failed a read and could not be restarted: {}",
                        candidate.url,
                        e
                    );
                }
            }
            self.ctx.directory().invalidate().await;
        }

        tracing::error!("All {} nodes failed to respond to read request", candidates.len());
        Err(Error::AllNodesFailed {
            attempts: candidates.len(),
        })
    }
}
