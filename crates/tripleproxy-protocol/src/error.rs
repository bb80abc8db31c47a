//! Error types for the protocol clients

use thiserror::Error;

/// Errors returned by [`crate::RestClient`]
#[derive(Debug, Error)]
pub enum RestClientError {
    /// Node URL could not be parsed or joined with the request path
    #[error("Invalid node URL: {0}")]
    InvalidUrl(String),

    /// Header value rejected by the HTTP layer
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// The request exceeded the configured timeout
    #[error("Request to {node} timed out")]
    Timeout {
        /// Node the request was sent to
        node: String,
    },

    /// Connection or protocol failure
    #[error("HTTP error from {node}: {source}")]
    Http {
        /// Node the request was sent to
        node: String,
        /// Underlying transport error
        #[source]
        source: reqwest::Error,
    },

    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

impl RestClientError {
    /// Classify a transport error raised while talking to `node`
    pub fn from_transport(node: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                node: node.to_string(),
            }
        } else {
            Self::Http {
                node: node.to_string(),
                source,
            }
        }
    }
}

/// Errors returned by [`crate::OrchestratorClient`]
#[derive(Debug, Error)]
pub enum OrchestratorClientError {
    /// Endpoint URL could not be parsed
    #[error("Invalid orchestrator endpoint: {0}")]
    InvalidEndpoint(String),

    /// Transport failure
    #[error("Orchestrator HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The orchestrator answered with a non-success status
    #[error("Orchestrator rejected request (status: {status}): {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },
}
