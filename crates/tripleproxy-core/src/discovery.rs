//! Cluster membership discovery

use crate::error::{Error, Result};
use crate::node::DiscoveredNodes;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;

/// Source of cluster membership
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Current primary and replicas
    async fn discover(&self) -> Result<DiscoveredNodes>;

    /// Name of the service that runs `node`, if any
    async fn owning_service(&self, node: &str) -> Result<Option<String>>;
}

/// Fixed node URLs belonging to one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    pub service: String,
    pub nodes: Vec<String>,
}

impl ServiceEndpoints {
    pub fn new(service: impl Into<String>, nodes: Vec<String>) -> Self {
        Self {
            service: service.into(),
            nodes,
        }
    }
}

/// Membership taken from configuration
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    primary: ServiceEndpoints,
    replicas: Vec<ServiceEndpoints>,
}

impl StaticDiscovery {
    pub fn new(primary: ServiceEndpoints, replicas: Vec<ServiceEndpoints>) -> Self {
        Self { primary, replicas }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self) -> Result<DiscoveredNodes> {
        let primary = self.primary.nodes.first().cloned().ok_or_else(|| {
            Error::discovery(format!(
                "no instance configured for primary service {}",
                self.primary.service
            ))
        })?;

        let replicas = self
            .replicas
            .iter()
            .flat_map(|service| service.nodes.iter().cloned())
            .collect();

        Ok(DiscoveredNodes { primary, replicas })
    }

    async fn owning_service(&self, node: &str) -> Result<Option<String>> {
        Ok(std::iter::once(&self.primary)
            .chain(self.replicas.iter())
            .find(|service| service.nodes.iter().any(|n| n == node))
            .map(|service| service.service.clone()))
    }
}

/// Host name lookup used by [`DnsDiscovery`]
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>>;
}

/// The operating system resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}

/// Membership resolved from DNS service records
///
/// Each service resolves as `{service}.{namespace}`; every address becomes
/// one node URL.
#[derive(Clone)]
pub struct DnsDiscovery {
    namespace: String,
    primary_service: String,
    replica_services: Vec<String>,
    port: u16,
    scheme: String,
    resolver: Arc<dyn Resolver>,
}

impl DnsDiscovery {
    pub fn new(
        namespace: impl Into<String>,
        primary_service: impl Into<String>,
        replica_services: Vec<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            primary_service: primary_service.into(),
            replica_services,
            port: 8080,
            scheme: "http".to_string(),
            resolver: Arc::new(SystemResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    fn host_of(&self, service: &str) -> String {
        if self.namespace.is_empty() {
            service.to_string()
        } else {
            format!("{}.{}", service, self.namespace)
        }
    }

    fn node_url(&self, addr: &SocketAddr) -> String {
        // SocketAddr's Display brackets IPv6 hosts
        format!("{}://{}", self.scheme, addr)
    }

    async fn instances(&self, service: &str) -> Result<Vec<String>> {
        let host = self.host_of(service);
        let addrs = self
            .resolver
            .resolve(&host, self.port)
            .await
            .map_err(|e| Error::discovery(format!("failed to resolve {}: {}", host, e)))?;

        let mut nodes: Vec<String> = addrs.iter().map(|addr| self.node_url(addr)).collect();
        nodes.sort();
        nodes.dedup();

        tracing::debug!("Resolved {} to {} instance(s)", host, nodes.len());
        Ok(nodes)
    }
}

#[async_trait]
impl Discovery for DnsDiscovery {
    async fn discover(&self) -> Result<DiscoveredNodes> {
        let primary = self
            .instances(&self.primary_service)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::discovery(format!(
                    "No primary instance found for service {}",
                    self.primary_service
                ))
            })?;

        let mut replicas = Vec::new();
        for service in &self.replica_services {
            match self.instances(service).await {
                Ok(nodes) => replicas.extend(nodes),
                Err(e) => tracing::warn!("Skipping replica service {}: {}", service, e),
            }
        }

        tracing::info!(
            "Discovered primary {} and {} replica(s)",
            primary,
            replicas.len()
        );

        Ok(DiscoveredNodes { primary, replicas })
    }

    async fn owning_service(&self, node: &str) -> Result<Option<String>> {
        let services = std::iter::once(&self.primary_service).chain(self.replica_services.iter());
        for service in services {
            match self.instances(service).await {
                Ok(nodes) if nodes.iter().any(|n| n == node) => {
                    return Ok(Some(service.clone()));
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Could not resolve service {}: {}", service, e),
            }
        }
        Ok(None)
    }
}
