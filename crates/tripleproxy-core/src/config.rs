//! Proxy configuration

use crate::{DEFAULT_CACHE_TTL_SECS, DEFAULT_CONSISTENCY_WINDOW_SECS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Order in which read candidates are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadBalancing {
    /// Uniform shuffle of the primary and all verified replicas
    #[default]
    Random,
    /// Primary, then replicas in discovery order
    PrimaryFirst,
    /// Replicas in discovery order, then the primary
    PrimaryLast,
}

impl FromStr for ReadBalancing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "random" => Ok(Self::Random),
            "primary_first" => Ok(Self::PrimaryFirst),
            "primary_last" => Ok(Self::PrimaryLast),
            other => Err(format!("unknown read balancing policy '{}'", other)),
        }
    }
}

impl fmt::Display for ReadBalancing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Random => "random",
            Self::PrimaryFirst => "primary_first",
            Self::PrimaryLast => "primary_last",
        };
        f.write_str(name)
    }
}

/// Location of the last-write marker on every node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerConfig {
    /// Base path of the triple-store server
    pub server_path: String,
    /// Repository holding the marker
    pub repository_id: String,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            server_path: "/rdf4j-server".to_string(),
            repository_id: "default".to_string(),
        }
    }
}

impl MarkerConfig {
    /// Path of the repository query endpoint
    pub fn query_path(&self) -> String {
        format!(
            "{}/repositories/{}",
            self.server_path.trim_end_matches('/'),
            self.repository_id
        )
    }

    /// Path of the repository update endpoint
    pub fn update_path(&self) -> String {
        format!("{}/statements", self.query_path())
    }
}

/// Proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// How long a discovered node set is trusted
    pub cache_ttl: Duration,

    /// Minimum spacing between marker fetches for one node
    pub consistency_window: Duration,

    /// Read candidate ordering
    pub read_balancing: ReadBalancing,

    /// Last-write marker location
    pub marker: MarkerConfig,

    /// Path probed on the primary by the health check
    pub health_path: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            consistency_window: Duration::from_secs(DEFAULT_CONSISTENCY_WINDOW_SECS),
            read_balancing: ReadBalancing::Random,
            marker: MarkerConfig::default(),
            health_path: "/rdf4j-server/protocol".to_string(),
        }
    }
}

impl ProxyConfig {
    /// Set the node set TTL
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the consistency check window
    pub fn with_consistency_window(mut self, window: Duration) -> Self {
        self.consistency_window = window;
        self
    }

    /// Set the read balancing policy
    pub fn with_read_balancing(mut self, policy: ReadBalancing) -> Self {
        self.read_balancing = policy;
        self
    }

    /// Set the repository holding the marker
    pub fn with_repository(mut self, repository_id: impl Into<String>) -> Self {
        self.marker.repository_id = repository_id.into();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.marker.repository_id.trim().is_empty() {
            return Err("repository_id must not be empty".into());
        }

        if self.marker.repository_id.contains('/') {
            return Err("repository_id must not contain '/'".into());
        }

        if !self.marker.server_path.starts_with('/') {
            return Err("server_path must start with '/'".into());
        }

        if !self.health_path.starts_with('/') {
            return Err("health_path must start with '/'".into());
        }

        Ok(())
    }
}
