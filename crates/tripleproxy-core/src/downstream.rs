//! Downstream node capability

use crate::error::{Error, Result};
use async_trait::async_trait;
use tripleproxy_protocol::{NodeRequest, NodeResponse, RestClient};

/// Sends one request to one cluster node
///
/// Any HTTP status is a successful exchange; only transport failures are
/// errors.
#[async_trait]
pub trait Downstream: Send + Sync {
    async fn send(&self, node: &str, request: &NodeRequest) -> Result<NodeResponse>;
}

#[async_trait]
impl Downstream for RestClient {
    async fn send(&self, node: &str, request: &NodeRequest) -> Result<NodeResponse> {
        self.execute(node, request)
            .await
            .map_err(|e| Error::downstream(node, e))
    }
}
