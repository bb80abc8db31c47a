//! Last-write marker protocol
//!
//! Every node stores the timestamp of the last write it applied as a single
//! triple. A replica whose marker equals the primary's has seen the same
//! writes.

use crate::config::MarkerConfig;
use crate::downstream::Downstream;
use crate::error::{Error, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tripleproxy_protocol::header::{ACCEPT, CONTENT_TYPE};
use tripleproxy_protocol::{HeaderValue, Method, NodeRequest};

const SELECT_MARKER: &str = "\
PREFIX xsd: <http://www.w3.org/2001/XMLSchema#>
PREFIX rdf4j: <http://rdf4j.cluster/ontology/>
SELECT ?time
WHERE {
  rdf4j:lastUpdateTime rdf4j:hasTime ?time .
}
";

/// Opaque last-write marker, compared byte for byte
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Marker(String);

impl Marker {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Current time, RFC 3339 with millisecond precision
    pub fn now() -> Self {
        Self(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn upsert_marker(marker: &Marker) -> String {
    let literal = marker.as_str().replace('\\', "\\\\").replace('"', "\\\"");
    format!(
        "\
PREFIX xsd: <http://www.w3.org/2001/XMLSchema#>
PREFIX rdf4j: <http://rdf4j.cluster/ontology/>
DELETE {{
  rdf4j:lastUpdateTime rdf4j:hasTime ?oldTime .
}}
INSERT {{
  rdf4j:lastUpdateTime rdf4j:hasTime \"{}\"^^xsd:dateTime .
}}
WHERE {{
  OPTIONAL {{ rdf4j:lastUpdateTime rdf4j:hasTime ?oldTime . }}
}}
",
        literal
    )
}

#[derive(Deserialize)]
struct SelectResults {
    results: Bindings,
}

#[derive(Deserialize)]
struct Bindings {
    bindings: Vec<Binding>,
}

#[derive(Deserialize)]
struct Binding {
    time: Option<Term>,
}

#[derive(Deserialize)]
struct Term {
    value: String,
}

/// Extract the marker from a SPARQL JSON result document
pub fn parse_marker(body: &[u8]) -> Result<Option<Marker>> {
    let parsed: SelectResults = serde_json::from_slice(body)?;
    Ok(parsed
        .results
        .bindings
        .into_iter()
        .next()
        .and_then(|binding| binding.time)
        .map(|term| term.value)
        .filter(|value| !value.is_empty())
        .map(Marker))
}

/// Reads and writes markers on cluster nodes
pub struct MarkerProtocol {
    client: Arc<dyn Downstream>,
    query_path: String,
    update_path: String,
}

impl MarkerProtocol {
    pub fn new(client: Arc<dyn Downstream>, config: &MarkerConfig) -> Self {
        Self {
            client,
            query_path: config.query_path(),
            update_path: config.update_path(),
        }
    }

    /// Current marker of `node`
    ///
    /// Any failure (transport, non-2xx, unparseable body, no binding) is
    /// logged and reported as `None`.
    pub async fn fetch(&self, node: &str) -> Option<Marker> {
        let request = NodeRequest::new(Method::POST, self.query_path.clone())
            .with_header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/sparql-query"),
            )
            .with_header(
                ACCEPT,
                HeaderValue::from_static("application/sparql-results+json"),
            )
            .with_body(SELECT_MARKER);

        let response = match self.client.send(node, &request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Error getting last update time for node {}: {}", node, e);
                return None;
            }
        };

        if !response.is_success() {
            tracing::warn!(
                "Unexpected status code {} from {} while reading marker: {}",
                response.status,
                node,
                response.body_text()
            );
            return None;
        }

        match parse_marker(&response.body) {
            Ok(marker) => {
                if marker.is_none() {
                    tracing::debug!("No marker stored on {}", node);
                }
                marker
            }
            Err(e) => {
                tracing::warn!("Error parsing marker response from {}: {}", node, e);
                None
            }
        }
    }

    fn update_request(&self, marker: &Marker) -> NodeRequest {
        NodeRequest::new(Method::POST, self.update_path.clone())
            .with_header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/sparql-update"),
            )
            .with_body(upsert_marker(marker))
    }

    /// Store `marker` on `node`
    ///
    /// Transport failures are returned; a non-2xx reply is only logged.
    pub async fn record(&self, node: &str, marker: &Marker) -> Result<()> {
        let response = self
            .client
            .send(node, &self.update_request(marker))
            .await
            .map_err(|e| {
                tracing::error!("Error updating last update time for node {}: {}", node, e);
                e
            })?;

        if response.is_success() {
            tracing::debug!("Updated marker on {} to {}", node, marker);
        } else {
            tracing::warn!(
                "Marker update on {} returned status {}: {}",
                node,
                response.status,
                response.body_text()
            );
        }

        Ok(())
    }

    /// Store `marker` on `node`, treating a non-2xx reply as an error
    pub async fn record_strict(&self, node: &str, marker: &Marker) -> Result<()> {
        let response = self.client.send(node, &self.update_request(marker)).await?;
        if !response.is_success() {
            return Err(Error::marker(format!(
                "{} rejected marker update with status {}",
                node, response.status
            )));
        }

        tracing::debug!("Updated marker on {} to {}", node, marker);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDownstream;

    #[test]
    fn test_marker_now_format() {
        let marker = Marker::now();
        let value = marker.as_str();
        assert!(value.ends_with('Z'));
        // 2024-05-01T12:00:00.000Z
        assert_eq!(value.len(), 24);
        assert!(chrono::DateTime::parse_from_rfc3339(value).is_ok());
    }

    #[test]
    fn test_parse_marker() {
        let body = br#"{
            "head": {"vars": ["time"]},
            "results": {"bindings": [
                {"time": {"type": "literal", "value": "2024-05-01T12:00:00.000Z",
                          "datatype": "http://www.w3.org/2001/XMLSchema#dateTime"}}
            ]}
        }"#;
        let marker = parse_marker(body).unwrap();
        assert_eq!(marker, Some(Marker::new("2024-05-01T12:00:00.000Z")));
    }

    #[test]
    fn test_parse_marker_no_bindings() {
        let body = br#"{"head": {"vars": ["time"]}, "results": {"bindings": []}}"#;
        assert_eq!(parse_marker(body).unwrap(), None);
    }

    #[test]
    fn test_parse_marker_unbound_time() {
        let body = br#"{"results": {"bindings": [{}]}}"#;
        assert_eq!(parse_marker(body).unwrap(), None);
    }

    #[test]
    fn test_parse_marker_invalid_json() {
        assert!(parse_marker(b"<html>oops</html>").is_err());
    }

    #[test]
    fn test_upsert_escapes_quotes() {
        let update = upsert_marker(&Marker::new("a\"b"));
        assert!(update.contains(r#""a\"b"^^xsd:dateTime"#));
        assert!(update.contains("OPTIONAL"));
    }

    #[tokio::test]
    async fn test_record_then_fetch() {
        let downstream = Arc::new(FakeDownstream::new());
        downstream.add_node("http://p:8080");
        let protocol = MarkerProtocol::new(downstream.clone(), &MarkerConfig::default());

        assert_eq!(protocol.fetch("http://p:8080").await, None);

        let marker = Marker::new("2024-05-01T12:00:00.000Z");
        protocol.record("http://p:8080", &marker).await.unwrap();

        assert_eq!(protocol.fetch("http://p:8080").await, Some(marker.clone()));
        assert_eq!(downstream.marker_of("http://p:8080"), Some(marker));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_is_none() {
        let downstream = Arc::new(FakeDownstream::new());
        downstream.add_node("http://p:8080");
        downstream.set_unreachable("http://p:8080", true);
        let protocol = MarkerProtocol::new(downstream.clone(), &MarkerConfig::default());

        assert_eq!(protocol.fetch("http://p:8080").await, None);
        assert_eq!(downstream.marker_reads("http://p:8080"), 1);
    }

    #[tokio::test]
    async fn test_record_transport_error_propagates() {
        let downstream = Arc::new(FakeDownstream::new());
        downstream.add_node("http://p:8080");
        downstream.set_unreachable("http://p:8080", true);
        let protocol = MarkerProtocol::new(downstream, &MarkerConfig::default());

        let result = protocol.record("http://p:8080", &Marker::now()).await;
        assert!(matches!(result, Err(Error::Downstream { .. })));
    }

    #[tokio::test]
    async fn test_record_rejected_is_logged_only() {
        let downstream = Arc::new(FakeDownstream::new());
        downstream.add_node("http://p:8080");
        downstream.reject_marker_writes("http://p:8080", true);
        let protocol = MarkerProtocol::new(downstream.clone(), &MarkerConfig::default());

        let marker = Marker::now();
        assert!(protocol.record("http://p:8080", &marker).await.is_ok());
        assert!(protocol.record_strict("http://p:8080", &marker).await.is_err());
        assert_eq!(downstream.marker_of("http://p:8080"), None);
    }
}
