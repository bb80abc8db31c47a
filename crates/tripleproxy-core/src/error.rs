//! Error types for TripleProxy Core

use thiserror::Error;
use tripleproxy_protocol::RestClientError;

/// Result type alias using the core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the proxy
#[derive(Error, Debug)]
pub enum Error {
    /// Cluster membership could not be discovered
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Transport-level failure while talking to a node
    #[error("Downstream error from {node}: {source}")]
    Downstream {
        /// Node that failed
        node: String,
        /// Transport error
        #[source]
        source: RestClientError,
    },

    /// The primary answered a write with a non-success status
    #[error("Primary write to {node} failed with status code {status}")]
    PrimaryWriteRejected {
        /// Primary node URL
        node: String,
        /// Status returned by the primary
        status: u16,
        /// Body returned by the primary
        body: String,
    },

    /// A replica answered a replicated write with a non-success status
    #[error("Replica write to {node} failed with status code {status}")]
    ReplicaWriteRejected {
        /// Replica node URL
        node: String,
        /// Status returned by the replica
        status: u16,
    },

    /// Every read candidate failed
    #[error("All {attempts} nodes failed to respond to read request")]
    AllNodesFailed {
        /// Number of candidates tried
        attempts: usize,
    },

    /// The orchestrator could not restart a node
    #[error("Failed to restart node {node}: {reason}")]
    Restart {
        /// Node that should have been restarted
        node: String,
        /// Failure description
        reason: String,
    },

    /// Durable state store errors
    #[error("State store error: {0}")]
    Store(String),

    /// Last-write marker protocol errors
    #[error("Marker error: {0}")]
    Marker(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors from the file-backed state store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a discovery error
    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::Discovery(msg.into())
    }

    /// Create a downstream error
    pub fn downstream(node: impl Into<String>, source: RestClientError) -> Self {
        Self::Downstream {
            node: node.into(),
            source,
        }
    }

    /// Create a restart error
    pub fn restart(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Restart {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a marker error
    pub fn marker(msg: impl Into<String>) -> Self {
        Self::Marker(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
