//! TripleProxy Protocol - HTTP clients for external services
//!
//! Provides client abstractions for:
//! - Triple-store nodes (primary and replicas), with basic-auth injection
//! - The cluster orchestrator's redeploy webhook

#![warn(clippy::all)]

pub mod error;
pub mod orchestrator;
pub mod rest;

pub use error::{OrchestratorClientError, RestClientError};
pub use orchestrator::{OrchestratorClient, RedeployRequest};
pub use rest::{NodeRequest, NodeResponse, RestClient, RestClientConfig};

// The HTTP vocabulary shared by the proxy layers.
pub use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
pub use reqwest::{Method, StatusCode};
