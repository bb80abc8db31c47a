//! Scripted fakes for the capability traits

use crate::config::{ProxyConfig, ReadBalancing};
use crate::context::ClusterContext;
use crate::discovery::Discovery;
use crate::downstream::Downstream;
use crate::error::{Error, Result};
use crate::marker::Marker;
use crate::node::DiscoveredNodes;
use crate::orchestrator::Orchestrator;
use crate::router::RequestRouter;
use crate::store::MemoryStateStore;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tripleproxy_protocol::header::CONTENT_TYPE;
use tripleproxy_protocol::{Method, NodeRequest, NodeResponse, RestClientError, StatusCode};

/// One request seen by [`FakeDownstream`], excluding marker traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub node: String,
    pub method: Method,
    pub path: String,
}

#[derive(Debug)]
struct FakeNode {
    marker: Option<Marker>,
    status: StatusCode,
    body: Bytes,
    unreachable: bool,
    data_unreachable: bool,
    marker_writes_unreachable: bool,
    reject_marker_writes: bool,
    data_calls: usize,
    marker_reads: usize,
}

impl Default for FakeNode {
    fn default() -> Self {
        Self {
            marker: None,
            status: StatusCode::OK,
            body: Bytes::from_static(b"ok"),
            unreachable: false,
            data_unreachable: false,
            marker_writes_unreachable: false,
            reject_marker_writes: false,
            data_calls: 0,
            marker_reads: 0,
        }
    }
}

/// In-memory cluster nodes that understand the marker protocol
#[derive(Debug, Default)]
pub struct FakeDownstream {
    nodes: Mutex<HashMap<String, FakeNode>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeDownstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node: &str) {
        self.nodes.lock().entry(node.to_string()).or_default();
    }

    pub fn set_marker(&self, node: &str, marker: &str) {
        self.with_node(node, |n| n.marker = Some(Marker::new(marker)));
    }

    /// Every request to `node` fails at the transport level
    pub fn set_unreachable(&self, node: &str, unreachable: bool) {
        self.with_node(node, |n| n.unreachable = unreachable);
    }

    /// Data requests to `node` fail at the transport level; marker traffic
    /// still works
    pub fn fail_data(&self, node: &str, failing: bool) {
        self.with_node(node, |n| n.data_unreachable = failing);
    }

    /// Marker updates on `node` fail at the transport level; reads and data
    /// requests still work
    pub fn fail_marker_writes(&self, node: &str, failing: bool) {
        self.with_node(node, |n| n.marker_writes_unreachable = failing);
    }

    /// Marker updates on `node` get a 500 and are not applied
    pub fn reject_marker_writes(&self, node: &str, reject: bool) {
        self.with_node(node, |n| n.reject_marker_writes = reject);
    }

    /// Status and body returned for data requests to `node`
    pub fn respond_with(&self, node: &str, status: StatusCode, body: &'static str) {
        self.with_node(node, |n| {
            n.status = status;
            n.body = Bytes::from_static(body.as_bytes());
        });
    }

    pub fn marker_of(&self, node: &str) -> Option<Marker> {
        self.nodes.lock().get(node).and_then(|n| n.marker.clone())
    }

    pub fn marker_reads(&self, node: &str) -> usize {
        self.nodes.lock().get(node).map_or(0, |n| n.marker_reads)
    }

    pub fn data_calls(&self, node: &str) -> usize {
        self.nodes.lock().get(node).map_or(0, |n| n.data_calls)
    }

    /// Data requests in the order they were sent
    pub fn call_log(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn reset_counters(&self) {
        self.calls.lock().clear();
        for node in self.nodes.lock().values_mut() {
            node.data_calls = 0;
            node.marker_reads = 0;
        }
    }

    fn with_node(&self, node: &str, change: impl FnOnce(&mut FakeNode)) {
        change(self.nodes.lock().entry(node.to_string()).or_default());
    }

    fn unreachable(node: &str) -> Error {
        Error::downstream(
            node,
            RestClientError::Timeout {
                node: node.to_string(),
            },
        )
    }
}

fn is_marker_request(request: &NodeRequest) -> bool {
    request
        .body
        .as_ref()
        .is_some_and(|body| String::from_utf8_lossy(body).contains("lastUpdateTime"))
}

fn is_marker_update(request: &NodeRequest) -> bool {
    request
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/sparql-update"))
}

fn written_marker(request: &NodeRequest) -> Option<Marker> {
    let body = String::from_utf8_lossy(request.body.as_ref()?).into_owned();
    let start = body.find("hasTime \"")? + "hasTime \"".len();
    let end = body[start..].find("\"^^")? + start;
    Some(Marker::new(&body[start..end]))
}

fn select_results(marker: Option<&Marker>) -> Bytes {
    let bindings = match marker {
        Some(marker) => serde_json::json!([{ "time": { "type": "literal", "value": marker.as_str() } }]),
        None => serde_json::json!([]),
    };
    let document = serde_json::json!({
        "head": { "vars": ["time"] },
        "results": { "bindings": bindings },
    });
    Bytes::from(document.to_string())
}

#[async_trait]
impl Downstream for FakeDownstream {
    async fn send(&self, node: &str, request: &NodeRequest) -> Result<NodeResponse> {
        let mut nodes = self.nodes.lock();
        let fake = nodes.entry(node.to_string()).or_default();

        if is_marker_request(request) {
            if is_marker_update(request) {
                if fake.unreachable || fake.marker_writes_unreachable {
                    return Err(Self::unreachable(node));
                }
                if fake.reject_marker_writes {
                    return Ok(NodeResponse::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "update rejected",
                    ));
                }
                fake.marker = written_marker(request);
                return Ok(NodeResponse::new(StatusCode::NO_CONTENT, Bytes::new()));
            }

            fake.marker_reads += 1;
            if fake.unreachable {
                return Err(Self::unreachable(node));
            }
            return Ok(NodeResponse::new(
                StatusCode::OK,
                select_results(fake.marker.as_ref()),
            ));
        }

        fake.data_calls += 1;
        self.calls.lock().push(Call {
            node: node.to_string(),
            method: request.method.clone(),
            path: request.path.clone(),
        });

        if fake.unreachable || fake.data_unreachable {
            return Err(Self::unreachable(node));
        }
        Ok(NodeResponse::new(fake.status, fake.body.clone()))
    }
}

/// Discovery with scripted answers
#[derive(Debug)]
pub struct FakeDiscovery {
    nodes: Mutex<DiscoveredNodes>,
    failure: Mutex<Option<String>>,
    calls: Mutex<usize>,
}

impl FakeDiscovery {
    pub fn new(primary: &str, replicas: &[&str]) -> Self {
        Self {
            nodes: Mutex::new(discovered(primary, replicas)),
            failure: Mutex::new(None),
            calls: Mutex::new(0),
        }
    }

    pub fn set_nodes(&self, primary: &str, replicas: &[&str]) {
        *self.nodes.lock() = discovered(primary, replicas);
    }

    /// Make every following discovery fail; `None` restores it
    pub fn fail_with(&self, message: Option<&str>) {
        *self.failure.lock() = message.map(str::to_string);
    }

    /// Number of discovery cycles run
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

fn discovered(primary: &str, replicas: &[&str]) -> DiscoveredNodes {
    DiscoveredNodes {
        primary: primary.to_string(),
        replicas: replicas.iter().map(|r| r.to_string()).collect(),
    }
}

#[async_trait]
impl Discovery for FakeDiscovery {
    async fn discover(&self) -> Result<DiscoveredNodes> {
        *self.calls.lock() += 1;
        if let Some(message) = self.failure.lock().clone() {
            return Err(Error::discovery(message));
        }
        Ok(self.nodes.lock().clone())
    }

    async fn owning_service(&self, node: &str) -> Result<Option<String>> {
        let nodes = self.nodes.lock();
        if nodes.primary == node {
            Ok(Some("primary".to_string()))
        } else if nodes.replicas.iter().any(|r| r == node) {
            Ok(Some("replica".to_string()))
        } else {
            Ok(None)
        }
    }
}

/// Orchestrator that records restarts
#[derive(Debug, Default)]
pub struct FakeOrchestrator {
    restarts: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes restarted so far, in order (failed attempts excluded)
    pub fn restarts(&self) -> Vec<String> {
        self.restarts.lock().clone()
    }

    /// Restarts of `node` fail from now on
    pub fn fail_for(&self, node: &str) {
        self.failing.lock().insert(node.to_string());
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn restart(&self, node: &str) -> Result<()> {
        if self.failing.lock().contains(node) {
            return Err(Error::restart(node, "scripted failure"));
        }
        self.restarts.lock().push(node.to_string());
        Ok(())
    }
}

/// A proxy wired to fakes
pub struct TestCluster {
    pub downstream: Arc<FakeDownstream>,
    pub discovery: Arc<FakeDiscovery>,
    pub orchestrator: Arc<FakeOrchestrator>,
    pub store: Arc<MemoryStateStore>,
    pub context: Arc<ClusterContext>,
}

impl TestCluster {
    /// Cluster with all markers in sync and deterministic read order
    /// (replicas first, primary last)
    pub fn new(primary: &str, replicas: &[&str]) -> Self {
        let config = ProxyConfig::default().with_read_balancing(ReadBalancing::PrimaryLast);
        Self::with_config(config, primary, replicas)
    }

    pub fn with_config(config: ProxyConfig, primary: &str, replicas: &[&str]) -> Self {
        let downstream = Arc::new(FakeDownstream::new());
        for node in std::iter::once(&primary).chain(replicas.iter()) {
            downstream.add_node(node);
            downstream.set_marker(node, "2024-05-01T12:00:00.000Z");
        }

        let discovery = Arc::new(FakeDiscovery::new(primary, replicas));
        let orchestrator = Arc::new(FakeOrchestrator::new());
        let store = Arc::new(MemoryStateStore::new());

        let context = ClusterContext::new(
            config,
            downstream.clone(),
            discovery.clone(),
            orchestrator.clone(),
            store.clone(),
        )
        .expect("valid test configuration");

        Self {
            downstream,
            discovery,
            orchestrator,
            store,
            context: Arc::new(context),
        }
    }

    pub fn router(&self) -> RequestRouter {
        RequestRouter::new(self.context.clone())
    }
}
