//! Server configuration

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tripleproxy_core::{MarkerConfig, ProxyConfig, ReadBalancing};

const CONFIG_FILE: &str = "proxy.toml";

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub addr: SocketAddr,
    /// Largest request body accepted, in bytes
    pub max_body_bytes: usize,
    /// Timeout for every downstream node request, in seconds
    pub request_timeout_secs: u64,
    /// Routing and verification settings
    pub proxy: ProxySettings,
    /// Credentials sent to the triple-store nodes
    pub credentials: CredentialsConfig,
    /// How cluster membership is found
    pub discovery: DiscoverySettings,
    /// Where restarts are sent
    pub orchestrator: OrchestratorSettings,
    /// Durable cluster state
    pub state: StateSettings,
}

/// Routing and verification settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub cache_ttl_secs: u64,
    pub consistency_window_secs: u64,
    pub read_balancing: ReadBalancing,
    pub server_path: String,
    pub repository_id: String,
    pub health_path: String,
}

impl Default for ProxySettings {
    fn default() -> Self {
        let defaults = ProxyConfig::default();
        Self {
            cache_ttl_secs: defaults.cache_ttl.as_secs(),
            consistency_window_secs: defaults.consistency_window.as_secs(),
            read_balancing: defaults.read_balancing,
            server_path: defaults.marker.server_path,
            repository_id: defaults.marker.repository_id,
            health_path: defaults.health_path,
        }
    }
}

impl ProxySettings {
    pub fn to_proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            consistency_window: Duration::from_secs(self.consistency_window_secs),
            read_balancing: self.read_balancing,
            marker: MarkerConfig {
                server_path: self.server_path.clone(),
                repository_id: self.repository_id.clone(),
            },
            health_path: self.health_path.clone(),
        }
    }
}

/// Basic-auth credentials for the triple-store
#[derive(Clone, Deserialize, Default)]
#[serde(default)]
pub struct CredentialsConfig {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Fixed node URLs of one service
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServiceSettings {
    pub service: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Discovery mode
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DiscoverySettings {
    /// Node URLs listed in the configuration
    Static {
        primary: ServiceSettings,
        #[serde(default)]
        replicas: Vec<ServiceSettings>,
    },
    /// Node addresses resolved from `{service}.{namespace}`
    Dns {
        #[serde(default)]
        namespace: String,
        primary_service: String,
        #[serde(default)]
        replica_services: Vec<String>,
        #[serde(default = "default_node_port")]
        port: u16,
        #[serde(default = "default_node_scheme")]
        scheme: String,
    },
}

fn default_node_port() -> u16 {
    8080
}

fn default_node_scheme() -> String {
    "http".to_string()
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self::Static {
            primary: ServiceSettings {
                service: "rdf4j-primary".to_string(),
                nodes: vec!["http://127.0.0.1:8080".to_string()],
            },
            replicas: Vec::new(),
        }
    }
}

/// Orchestrator webhook
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Redeploy endpoint; restarts are disabled when unset
    pub endpoint: Option<String>,
    /// Cluster name sent with every redeploy
    pub cluster: String,
    /// Bearer token for the endpoint
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            cluster: "rdf4j".to_string(),
            token: None,
            timeout_secs: 10,
        }
    }
}

/// Durable state location
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StateSettings {
    /// Directory for state files; kept in memory when unset
    pub dir: Option<PathBuf>,
}

/// `config/proxy.toml` file structure
#[derive(Debug, Deserialize)]
struct ConfigFile {
    addr: Option<SocketAddr>,
    max_body_bytes: Option<usize>,
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    proxy: ProxySettings,
    #[serde(default)]
    credentials: CredentialsConfig,
    #[serde(default)]
    discovery: Option<DiscoverySettings>,
    #[serde(default)]
    orchestrator: OrchestratorSettings,
    #[serde(default)]
    state: StateSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            max_body_bytes: 10 * 1024 * 1024,
            request_timeout_secs: 30,
            proxy: ProxySettings::default(),
            credentials: CredentialsConfig::default(),
            discovery: DiscoverySettings::default(),
            orchestrator: OrchestratorSettings::default(),
            state: StateSettings::default(),
        }
    }
}

impl Config {
    /// Load `proxy.toml` from `config_dir`
    /// Returns None if the file doesn't exist or can't be parsed
    fn from_file(config_dir: impl AsRef<Path>) -> Option<ConfigFile> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE);

        if !config_path.exists() {
            tracing::debug!("Config file not found: {:?}", config_path);
            return None;
        }

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match toml::from_str::<ConfigFile>(&content) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {:?}", config_path);
                    Some(config)
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config file {:?}: {}", config_path, e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {:?}: {}", config_path, e);
                None
            }
        }
    }

    /// Load configuration using `TRIPLEPROXY_CONFIG_DIR` (default `config`)
    pub fn from_env() -> anyhow::Result<Self> {
        let config_dir =
            std::env::var("TRIPLEPROXY_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
        Self::load(config_dir)
    }

    /// Load configuration from environment variables and `{config_dir}/proxy.toml`
    /// Priority: Environment variables > config file > defaults
    pub fn load(config_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(file) = Self::from_file(config_dir) {
            config.addr = file.addr.unwrap_or(config.addr);
            config.max_body_bytes = file.max_body_bytes.unwrap_or(config.max_body_bytes);
            config.request_timeout_secs = file
                .request_timeout_secs
                .unwrap_or(config.request_timeout_secs);
            config.proxy = file.proxy;
            config.credentials = file.credentials;
            config.discovery = file.discovery.unwrap_or(config.discovery);
            config.orchestrator = file.orchestrator;
            config.state = file.state;
        }

        config.apply_env()?;
        config
            .proxy
            .to_proxy_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid proxy configuration: {}", e))?;

        Ok(config)
    }

    fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Ok(addr) = std::env::var("TRIPLEPROXY_ADDR") {
            self.addr = addr
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid TRIPLEPROXY_ADDR '{}': {}", addr, e))?;
        }

        if let Ok(username) = std::env::var("TRIPLEPROXY_USERNAME") {
            self.credentials.username = username;
        }

        // Support Docker secrets: try TRIPLEPROXY_PASSWORD_FILE first, then TRIPLEPROXY_PASSWORD
        if let Ok(password_file) = std::env::var("TRIPLEPROXY_PASSWORD_FILE") {
            match std::fs::read_to_string(&password_file) {
                Ok(password) => self.credentials.password = password.trim().to_string(),
                Err(e) => tracing::warn!("Failed to read password file {}: {}", password_file, e),
            }
        } else if let Ok(password) = std::env::var("TRIPLEPROXY_PASSWORD") {
            self.credentials.password = password;
        }

        if let Ok(repository_id) = std::env::var("TRIPLEPROXY_REPOSITORY_ID") {
            self.proxy.repository_id = repository_id;
        }

        if let Ok(policy) = std::env::var("TRIPLEPROXY_READ_BALANCING") {
            self.proxy.read_balancing = policy
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid TRIPLEPROXY_READ_BALANCING: {}", e))?;
        }

        self.apply_discovery_env();

        if let Ok(endpoint) = std::env::var("TRIPLEPROXY_ORCHESTRATOR_URL") {
            self.orchestrator.endpoint = Some(endpoint).filter(|e| !e.is_empty());
        }

        if let Ok(cluster) = std::env::var("TRIPLEPROXY_CLUSTER_NAME") {
            self.orchestrator.cluster = cluster;
        }

        if let Ok(dir) = std::env::var("TRIPLEPROXY_STATE_DIR") {
            self.state.dir = Some(PathBuf::from(dir)).filter(|d| !d.as_os_str().is_empty());
        }

        Ok(())
    }

    /// Any of the DNS variables switches discovery to DNS mode
    fn apply_discovery_env(&mut self) {
        let namespace = std::env::var("TRIPLEPROXY_NAMESPACE").ok();
        let primary = std::env::var("TRIPLEPROXY_PRIMARY_SERVICE").ok();
        let replicas = std::env::var("TRIPLEPROXY_REPLICA_SERVICES").ok();

        if namespace.is_none() && primary.is_none() && replicas.is_none() {
            return;
        }

        let (mut ns, mut primary_service, mut replica_services, port, scheme) =
            match &self.discovery {
                DiscoverySettings::Dns {
                    namespace,
                    primary_service,
                    replica_services,
                    port,
                    scheme,
                } => (
                    namespace.clone(),
                    primary_service.clone(),
                    replica_services.clone(),
                    *port,
                    scheme.clone(),
                ),
                DiscoverySettings::Static { .. } => (
                    String::new(),
                    "rdf4j-primary".to_string(),
                    Vec::new(),
                    default_node_port(),
                    default_node_scheme(),
                ),
            };

        if let Some(namespace) = namespace {
            ns = namespace;
        }
        if let Some(primary) = primary {
            primary_service = primary;
        }
        if let Some(replicas) = replicas {
            replica_services = replicas
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        self.discovery = DiscoverySettings::Dns {
            namespace: ns,
            primary_service,
            replica_services,
            port,
            scheme,
        };
    }
}
