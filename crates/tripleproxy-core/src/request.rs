//! Inbound request model

use bytes::Bytes;
use tripleproxy_protocol::header::CONTENT_TYPE;
use tripleproxy_protocol::{HeaderMap, Method, NodeRequest};

/// Media type that always denotes a read, whatever the method
const SPARQL_QUERY: &str = "application/sparql-query";

/// Read or write, resolved once per request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Served by any one healthy node
    Read,
    /// Applied to the primary, then replicated
    Write,
}

impl RequestKind {
    /// Classify a request
    ///
    /// POST, PUT, DELETE and PATCH are writes, except that a SPARQL query
    /// body is always a read.
    pub fn classify(method: &Method, headers: &HeaderMap) -> Self {
        if is_sparql_query(headers) {
            return Self::Read;
        }

        if [Method::POST, Method::PUT, Method::DELETE, Method::PATCH].contains(method) {
            Self::Write
        } else {
            Self::Read
        }
    }
}

fn is_sparql_query(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|media_type| media_type.trim().eq_ignore_ascii_case(SPARQL_QUERY))
        .unwrap_or(false)
}

/// Request as handed over by the entry adapter
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub is_base64_encoded: bool,
}

impl InboundRequest {
    /// Bodyless request
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
}

/// Classified request routed by [`crate::RequestRouter`]
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    inner: InboundRequest,
    kind: RequestKind,
}

impl From<InboundRequest> for ProxyRequest {
    fn from(inner: InboundRequest) -> Self {
        let kind = RequestKind::classify(&inner.method, &inner.headers);
        Self { inner, kind }
    }
}

impl ProxyRequest {
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.inner.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.inner.body.as_ref()
    }

    /// The same request addressed to a node
    pub fn to_node_request(&self) -> NodeRequest {
        NodeRequest {
            method: self.inner.method.clone(),
            path: self.inner.path.clone(),
            query: self.inner.query.clone(),
            headers: self.inner.headers.clone(),
            body: self.inner.body.clone(),
            is_base64_encoded: self.inner.is_base64_encoded,
        }
    }
}
