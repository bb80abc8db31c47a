//! Node restart capability

use crate::discovery::Discovery;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tripleproxy_protocol::{OrchestratorClient, RedeployRequest};

/// Restarts cluster nodes
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Force a fresh deployment of the service running `node`
    async fn restart(&self, node: &str) -> Result<()>;
}

/// Orchestrator reached through an HTTP webhook
pub struct WebhookOrchestrator {
    client: OrchestratorClient,
    cluster: String,
    discovery: Arc<dyn Discovery>,
}

impl WebhookOrchestrator {
    pub fn new(
        client: OrchestratorClient,
        cluster: impl Into<String>,
        discovery: Arc<dyn Discovery>,
    ) -> Self {
        Self {
            client,
            cluster: cluster.into(),
            discovery,
        }
    }
}

#[async_trait]
impl Orchestrator for WebhookOrchestrator {
    async fn restart(&self, node: &str) -> Result<()> {
        let service = self
            .discovery
            .owning_service(node)
            .await?
            .ok_or_else(|| Error::restart(node, "Could not find service for node"))?;

        let request = RedeployRequest {
            cluster: &self.cluster,
            service: &service,
            node,
            force_new_deployment: true,
        };

        self.client
            .force_redeploy(&request)
            .await
            .map_err(|e| Error::restart(node, e.to_string()))?;

        tracing::info!("Restarted service {} for node {}", service, node);
        Ok(())
    }
}

/// Used when no orchestrator endpoint is configured; every restart fails
#[derive(Debug, Default)]
pub struct DisabledOrchestrator;

#[async_trait]
impl Orchestrator for DisabledOrchestrator {
    async fn restart(&self, node: &str) -> Result<()> {
        Err(Error::restart(node, "no orchestrator configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{ServiceEndpoints, StaticDiscovery};
    use std::time::Duration;

    fn discovery() -> Arc<dyn Discovery> {
        Arc::new(StaticDiscovery::new(
            ServiceEndpoints::new("rdf4j-primary", vec!["http://p:8080".to_string()]),
            vec![ServiceEndpoints::new(
                "rdf4j-replica",
                vec!["http://a:8080".to_string()],
            )],
        ))
    }

    #[tokio::test]
    async fn test_webhook_restart_posts_owning_service() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/redeploy")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"cluster":"rdf4j","service":"rdf4j-replica","node":"http://a:8080","force_new_deployment":true}"#
                    .to_string(),
            ))
            .with_status(202)
            .create_async()
            .await;

        let client = OrchestratorClient::new(
            &format!("{}/redeploy", server.url()),
            Duration::from_secs(5),
        )
        .unwrap();
        let orchestrator = WebhookOrchestrator::new(client, "rdf4j", discovery());

        orchestrator.restart("http://a:8080").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_webhook_unknown_node() {
        let client =
            OrchestratorClient::new("http://127.0.0.1:9/redeploy", Duration::from_secs(1)).unwrap();
        let orchestrator = WebhookOrchestrator::new(client, "rdf4j", discovery());

        let result = orchestrator.restart("http://z:8080").await;
        assert!(matches!(result, Err(Error::Restart { .. })));
    }

    #[tokio::test]
    async fn test_webhook_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/redeploy")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = OrchestratorClient::new(
            &format!("{}/redeploy", server.url()),
            Duration::from_secs(5),
        )
        .unwrap();
        let orchestrator = WebhookOrchestrator::new(client, "rdf4j", discovery());

        let result = orchestrator.restart("http://a:8080").await;
        assert!(matches!(result, Err(Error::Restart { .. })));
    }

    #[tokio::test]
    async fn test_disabled_orchestrator() {
        let result = DisabledOrchestrator.restart("http://a:8080").await;
        assert!(matches!(result, Err(Error::Restart { .. })));
    }
}
