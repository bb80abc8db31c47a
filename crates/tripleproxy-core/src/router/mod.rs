//! Request routing
//!
//! Writes go to the primary and are then replicated; reads go to the first
//! node that answers.

mod outcome;
mod read;
mod write;

#[cfg(test)]
mod tests;

pub use outcome::{
    HEADER_FAIL_COUNT, HEADER_REPLICATION_STATUS, HEADER_RESTART_COUNT, HEADER_SUCCESS_COUNT,
    ReplicaResult, ReplicationOutcome, ReplicationStatus,
};
pub use read::{Candidate, order_candidates};

use crate::context::ClusterContext;
use crate::error::Result;
use crate::request::{ProxyRequest, RequestKind};
use std::sync::Arc;
use tripleproxy_protocol::NodeResponse;

/// Entry point for every proxied request
#[derive(Clone)]
pub struct RequestRouter {
    ctx: Arc<ClusterContext>,
}

impl RequestRouter {
    pub fn new(ctx: Arc<ClusterContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ClusterContext> {
        &self.ctx
    }

    pub async fn route(&self, request: &ProxyRequest) -> Result<NodeResponse> {
        tracing::debug!(
            "Routing {:?} {} {}",
            request.kind(),
            request.method(),
            request.path()
        );

        match request.kind() {
            RequestKind::Write => self.handle_write(request).await,
            RequestKind::Read => self.handle_read(request).await,
        }
    }
}
