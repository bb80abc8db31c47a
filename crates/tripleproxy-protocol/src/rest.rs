//! REST client for triple-store nodes
//!
//! Every request is addressed to a single node URL. The client joins the
//! node's own path with the request path, appends query parameters after
//! any the node URL already carries, replaces the caller's credentials with
//! the proxy's basic-auth credentials and decodes base64 request bodies.

use crate::error::RestClientError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, HOST, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use url::Url;

/// Headers that describe a single connection and must not be forwarded
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// REST client configuration
#[derive(Debug, Clone)]
pub struct RestClientConfig {
    /// Username injected as basic auth
    pub username: String,
    /// Password injected as basic auth
    pub password: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// User agent sent to the nodes
    pub user_agent: String,
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            timeout: Duration::from_secs(30),
            user_agent: concat!("tripleproxy/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// A request addressed to one node
#[derive(Debug, Clone)]
pub struct NodeRequest {
    /// HTTP method
    pub method: Method,
    /// Path relative to the node URL
    pub path: String,
    /// Query parameters, in order
    pub query: Vec<(String, String)>,
    /// Headers to forward
    pub headers: HeaderMap,
    /// Request body
    pub body: Option<Bytes>,
    /// Whether `body` holds base64 text that must be decoded before sending
    pub is_base64_encoded: bool,
}

impl NodeRequest {
    /// Create a request without query, headers or body
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            is_base64_encoded: false,
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a query parameter
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Mark the body as base64 encoded
    pub fn base64_encoded(mut self, encoded: bool) -> Self {
        self.is_base64_encoded = encoded;
        self
    }

    /// Body bytes as they go on the wire
    pub fn payload(&self) -> Option<Bytes> {
        let body = self.body.as_ref()?;
        if !self.is_base64_encoded {
            return Some(body.clone());
        }

        match STANDARD.decode(body) {
            Ok(decoded) => {
                tracing::debug!("Decoded base64 payload ({} bytes)", decoded.len());
                Some(Bytes::from(decoded))
            }
            Err(e) => {
                tracing::warn!("Failed to decode payload as base64, using raw payload: {}", e);
                Some(body.clone())
            }
        }
    }
}

/// A node's answer
#[derive(Debug, Clone)]
pub struct NodeResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

impl NodeResponse {
    /// Create a response
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body as UTF-8 text (lossy)
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// REST client for triple-store nodes
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    authorization: HeaderValue,
}

impl RestClient {
    /// Create a new REST client
    pub fn new(config: RestClientConfig) -> Result<Self, RestClientError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;

        let token = STANDARD.encode(format!("{}:{}", config.username, config.password));
        let mut authorization = HeaderValue::from_str(&format!("Basic {}", token))
            .map_err(|e| RestClientError::InvalidHeader(e.to_string()))?;
        authorization.set_sensitive(true);

        Ok(Self {
            client,
            authorization,
        })
    }

    /// Build the full URL for `path` on `node`
    pub fn build_url(
        node: &str,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Url, RestClientError> {
        let mut url =
            Url::parse(node).map_err(|e| RestClientError::InvalidUrl(format!("{}: {}", node, e)))?;
        if url.cannot_be_a_base() {
            return Err(RestClientError::InvalidUrl(node.to_string()));
        }

        let full_path = join_paths(url.path(), path);
        url.set_path(&full_path);

        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        Ok(url)
    }

    /// Send `request` to `node`
    ///
    /// Any status code is a successful exchange; only transport failures
    /// are errors.
    pub async fn execute(
        &self,
        node: &str,
        request: &NodeRequest,
    ) -> Result<NodeResponse, RestClientError> {
        let url = Self::build_url(node, &request.path, &request.query)?;

        let mut headers = forwardable_headers(&request.headers);
        headers.remove(AUTHORIZATION);
        headers.insert(AUTHORIZATION, self.authorization.clone());

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(headers);
        if let Some(payload) = request.payload() {
            builder = builder.body(payload);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RestClientError::from_transport(node, e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| RestClientError::from_transport(node, e))?;

        tracing::debug!("{} {} -> {}", request.method, node, status);

        Ok(NodeResponse {
            status,
            headers,
            body,
        })
    }
}

/// Whether `name` is connection-scoped and must not cross the proxy
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    *name == HOST || *name == CONTENT_LENGTH || HOP_BY_HOP.contains(&name.as_str())
}

/// Copy of `headers` without connection-scoped entries
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if !is_hop_by_hop(name) {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

/// Join a node base path with a request path, collapsing repeated slashes
fn join_paths(base: &str, path: &str) -> String {
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );

    let mut collapsed = String::with_capacity(joined.len());
    let mut previous_slash = false;
    for c in joined.chars() {
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        collapsed.push(c);
    }
    collapsed
}
