//! Orchestrator webhook client
//!
//! The orchestrator replaces the instances of a service when asked to force
//! a new deployment. Replicas re-sync from the primary while starting, so a
//! redeploy is how the proxy heals a drifted or unreachable replica.

use crate::error::OrchestratorClientError;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use url::Url;

/// Body of a redeploy request
#[derive(Debug, Clone, Serialize)]
pub struct RedeployRequest<'a> {
    /// Cluster hosting the service
    pub cluster: &'a str,
    /// Service owning the node
    pub service: &'a str,
    /// Node that triggered the redeploy
    pub node: &'a str,
    /// Replace running instances even if the task definition is unchanged
    pub force_new_deployment: bool,
}

/// Client for the orchestrator's redeploy endpoint
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl OrchestratorClient {
    /// Create a client posting to `endpoint`
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, OrchestratorClientError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| OrchestratorClientError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            token: None,
        })
    }

    /// Authenticate with a bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Endpoint URL
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Ask the orchestrator to force a new deployment
    pub async fn force_redeploy(
        &self,
        request: &RedeployRequest<'_>,
    ) -> Result<(), OrchestratorClientError> {
        let mut builder = self.client.post(self.endpoint.clone()).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(
            "Orchestrator accepted redeploy of service {} in cluster {}",
            request.service,
            request.cluster
        );
        Ok(())
    }
}
