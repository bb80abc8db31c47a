//! TripleProxy Server - HTTP entry point of the proxy
//!
//! - ANY /health - Liveness of the primary node
//! - ANY /* - Proxied to the cluster (writes replicated, reads balanced)

use axum::{Router, routing::any};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tripleproxy_core::discovery::{Discovery, DnsDiscovery, ServiceEndpoints, StaticDiscovery};
use tripleproxy_core::orchestrator::{DisabledOrchestrator, Orchestrator, WebhookOrchestrator};
use tripleproxy_core::store::{FileStateStore, MemoryStateStore, StateStore};
use tripleproxy_core::{ClusterContext, HealthCheck, RequestRouter};
use tripleproxy_protocol::{OrchestratorClient, RestClient, RestClientConfig};

pub mod api;
pub mod config;

use config::{Config, DiscoverySettings};

/// Proxy server state
#[derive(Clone)]
pub struct ProxyServer {
    /// Routes proxied requests
    pub router: RequestRouter,
    /// Probes the primary
    pub health: HealthCheck,
    /// Largest request body accepted
    pub max_body_bytes: usize,
}

impl ProxyServer {
    /// Create a server over an existing cluster context
    pub fn new(ctx: Arc<ClusterContext>, max_body_bytes: usize) -> Self {
        Self {
            router: RequestRouter::new(ctx.clone()),
            health: HealthCheck::new(ctx),
            max_body_bytes,
        }
    }

    /// Wire the production adapters described by `config`
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);

        let client = RestClient::new(RestClientConfig {
            username: config.credentials.username.clone(),
            password: config.credentials.password.clone(),
            timeout,
            ..RestClientConfig::default()
        })?;

        let discovery = build_discovery(&config.discovery);
        let orchestrator = build_orchestrator(config, discovery.clone())?;

        let store: Arc<dyn StateStore> = match &config.state.dir {
            Some(dir) => Arc::new(FileStateStore::open(dir)?),
            None => {
                tracing::info!("No state directory configured, keeping cluster state in memory");
                Arc::new(MemoryStateStore::new())
            }
        };

        let ctx = ClusterContext::new(
            config.proxy.to_proxy_config(),
            Arc::new(client),
            discovery,
            orchestrator,
            store,
        )?;

        Ok(Self::new(Arc::new(ctx), config.max_body_bytes))
    }
}

fn build_discovery(settings: &DiscoverySettings) -> Arc<dyn Discovery> {
    match settings {
        DiscoverySettings::Static { primary, replicas } => {
            tracing::info!(
                "Using static discovery ({} replica service(s))",
                replicas.len()
            );
            Arc::new(StaticDiscovery::new(
                ServiceEndpoints::new(primary.service.clone(), primary.nodes.clone()),
                replicas
                    .iter()
                    .map(|r| ServiceEndpoints::new(r.service.clone(), r.nodes.clone()))
                    .collect(),
            ))
        }
        DiscoverySettings::Dns {
            namespace,
            primary_service,
            replica_services,
            port,
            scheme,
        } => {
            tracing::info!(
                "Using DNS discovery for {} in namespace '{}'",
                primary_service,
                namespace
            );
            Arc::new(
                DnsDiscovery::new(
                    namespace.clone(),
                    primary_service.clone(),
                    replica_services.clone(),
                )
                .with_port(*port)
                .with_scheme(scheme.clone()),
            )
        }
    }
}

fn build_orchestrator(
    config: &Config,
    discovery: Arc<dyn Discovery>,
) -> anyhow::Result<Arc<dyn Orchestrator>> {
    let settings = &config.orchestrator;
    let Some(endpoint) = &settings.endpoint else {
        tracing::warn!("No orchestrator endpoint configured, node restarts are disabled");
        return Ok(Arc::new(DisabledOrchestrator));
    };

    let mut client = OrchestratorClient::new(endpoint, Duration::from_secs(settings.timeout_secs))?;
    if let Some(token) = &settings.token {
        client = client.with_token(token.clone());
    }

    tracing::info!("Restarts go to orchestrator at {}", endpoint);
    Ok(Arc::new(WebhookOrchestrator::new(
        client,
        settings.cluster.clone(),
        discovery,
    )))
}

/// HTTP application with all routes and layers
pub fn app(server: Arc<ProxyServer>) -> Router {
    Router::new()
        .route("/health", any(api::health::health))
        .fallback(api::proxy::proxy)
        .with_state(server)
        .layer(CatchPanicLayer::custom(api::panic_response))
        // CORS support
        .layer(CorsLayer::permissive())
        // Request/response tracing
        .layer(TraceLayer::new_for_http())
}
