use super::*;
use crate::config::ProxyConfig;
use crate::error::Error;
use crate::request::InboundRequest;
use crate::testing::TestCluster;
use bytes::Bytes;
use std::time::Duration;
use tripleproxy_protocol::header::CONTENT_TYPE;
use tripleproxy_protocol::{HeaderValue, Method, StatusCode};

const P: &str = "http://p:8080";
const A: &str = "http://a:8080";
const B: &str = "http://b:8080";

fn write_request() -> ProxyRequest {
    let mut inbound = InboundRequest::new(Method::POST, "/rdf4j-server/repositories/kms/statements");
    inbound.headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/sparql-update"),
    );
    inbound.body = Some(Bytes::from_static(
        b"INSERT DATA { <urn:s> <urn:p> <urn:o> . }",
    ));
    ProxyRequest::from(inbound)
}

fn read_request() -> ProxyRequest {
    let mut inbound = InboundRequest::new(Method::GET, "/rdf4j-server/repositories/kms");
    inbound
        .query
        .push(("query".to_string(), "SELECT * WHERE { ?s ?p ?o }".to_string()));
    ProxyRequest::from(inbound)
}

fn header<'a>(response: &'a NodeResponse, name: &str) -> &'a str {
    response
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_read_short_circuits_on_first_success() {
    let cluster = TestCluster::new(P, &[A, B]);
    cluster.downstream.respond_with(A, StatusCode::OK, "from-a");

    let response = cluster.router().route(&read_request()).await.unwrap();

    assert_eq!(response.body, Bytes::from_static(b"from-a"));
    assert_eq!(cluster.downstream.data_calls(A), 1);
    assert_eq!(cluster.downstream.data_calls(B), 0);
    assert_eq!(cluster.downstream.data_calls(P), 0);
    assert!(cluster.orchestrator.restarts().is_empty());
}

#[tokio::test]
async fn test_read_failover_restarts_failed_replica() {
    let cluster = TestCluster::new(P, &[A, B]);
    let router = cluster.router();
    cluster.downstream.respond_with(B, StatusCode::OK, "from-b");
    // Verify the cluster first so that A is an eligible candidate
    router.context().directory().node_set().await.unwrap();
    cluster.downstream.fail_data(A, true);

    let response = router.route(&read_request()).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, Bytes::from_static(b"from-b"));
    assert_eq!(cluster.orchestrator.restarts(), vec![A.to_string()]);
    assert_eq!(cluster.downstream.data_calls(P), 0);
    assert!(cluster.context.state().node_set().await.unwrap().stale);
    assert!(!cluster.context.state().verified().await.contains(A));
}

#[tokio::test]
async fn test_read_server_error_is_a_failure() {
    let cluster = TestCluster::new(P, &[A]);
    cluster
        .downstream
        .respond_with(A, StatusCode::SERVICE_UNAVAILABLE, "busy");
    cluster.downstream.respond_with(P, StatusCode::OK, "from-p");

    let response = cluster.router().route(&read_request()).await.unwrap();

    assert_eq!(response.body, Bytes::from_static(b"from-p"));
    assert_eq!(cluster.orchestrator.restarts(), vec![A.to_string()]);
}

#[tokio::test]
async fn test_read_client_error_is_an_answer() {
    let cluster = TestCluster::new(P, &[A]);
    cluster
        .downstream
        .respond_with(A, StatusCode::NOT_FOUND, "no such repository");

    let response = cluster.router().route(&read_request()).await.unwrap();

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(cluster.downstream.data_calls(P), 0);
    assert!(cluster.orchestrator.restarts().is_empty());
}

#[tokio::test]
async fn test_read_all_nodes_fail() {
    let cluster = TestCluster::new(P, &[A, B]);
    let router = cluster.router();
    router.context().directory().node_set().await.unwrap();
    for node in [P, A, B] {
        cluster.downstream.fail_data(node, true);
    }

    let result = router.route(&read_request()).await;

    assert!(matches!(result, Err(Error::AllNodesFailed { attempts: 3 })));
    // The primary is never restarted
    assert_eq!(
        cluster.orchestrator.restarts(),
        vec![A.to_string(), B.to_string()]
    );
}

#[tokio::test]
async fn test_primary_read_failure_is_not_restarted() {
    let config = ProxyConfig::default().with_read_balancing(crate::ReadBalancing::PrimaryFirst);
    let cluster = TestCluster::with_config(config, P, &[A]);
    let router = cluster.router();
    router.context().directory().node_set().await.unwrap();
    cluster.downstream.fail_data(P, true);
    cluster.downstream.respond_with(A, StatusCode::OK, "from-a");

    let response = router.route(&read_request()).await.unwrap();

    assert_eq!(response.body, Bytes::from_static(b"from-a"));
    assert!(cluster.orchestrator.restarts().is_empty());
    assert!(cluster.context.state().node_set().await.unwrap().stale);
}

#[tokio::test]
async fn test_write_replicates_to_all_replicas() {
    let cluster = TestCluster::new(P, &[A, B]);
    cluster
        .downstream
        .respond_with(P, StatusCode::NO_CONTENT, "");

    let response = cluster.router().route(&write_request()).await.unwrap();

    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert_eq!(header(&response, HEADER_REPLICATION_STATUS), "complete");
    assert_eq!(header(&response, HEADER_SUCCESS_COUNT), "2");
    assert_eq!(header(&response, HEADER_FAIL_COUNT), "0");
    assert_eq!(header(&response, HEADER_RESTART_COUNT), "0");

    // Every node carries the new marker
    let marker = cluster.downstream.marker_of(P).unwrap();
    assert_ne!(marker.as_str(), "2024-05-01T12:00:00.000Z");
    assert_eq!(cluster.downstream.marker_of(A), Some(marker.clone()));
    assert_eq!(cluster.downstream.marker_of(B), Some(marker));
    assert!(!cluster.context.state().node_set().await.unwrap().stale);
}

#[tokio::test]
async fn test_write_hits_primary_before_replicas() {
    let cluster = TestCluster::new(P, &[A, B]);

    cluster.router().route(&write_request()).await.unwrap();

    let log = cluster.downstream.call_log();
    assert_eq!(log.len(), 3);
    assert_eq!(log[0].node, P);
    assert!(log.iter().all(|call| call.method == Method::POST));
}

#[tokio::test]
async fn test_write_with_failing_replica_is_partial() {
    let cluster = TestCluster::new(P, &[A, B]);
    cluster.downstream.fail_data(B, true);

    let response = cluster.router().route(&write_request()).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(header(&response, HEADER_REPLICATION_STATUS), "partial");
    assert_eq!(header(&response, HEADER_SUCCESS_COUNT), "1");
    assert_eq!(header(&response, HEADER_FAIL_COUNT), "0");
    assert_eq!(header(&response, HEADER_RESTART_COUNT), "1");
    assert_eq!(cluster.orchestrator.restarts(), vec![B.to_string()]);
    assert!(cluster.context.state().node_set().await.unwrap().stale);
}

#[tokio::test]
async fn test_write_with_unrestartable_replica_counts_failure() {
    let cluster = TestCluster::new(P, &[A, B]);
    cluster.downstream.fail_data(A, true);
    cluster.downstream.fail_data(B, true);
    cluster.orchestrator.fail_for(B);

    let response = cluster.router().route(&write_request()).await.unwrap();

    assert_eq!(header(&response, HEADER_REPLICATION_STATUS), "failed");
    assert_eq!(header(&response, HEADER_SUCCESS_COUNT), "0");
    assert_eq!(header(&response, HEADER_FAIL_COUNT), "1");
    assert_eq!(header(&response, HEADER_RESTART_COUNT), "1");
}

#[tokio::test]
async fn test_write_replica_rejection_restarts_replica() {
    let cluster = TestCluster::new(P, &[A]);
    cluster
        .downstream
        .respond_with(A, StatusCode::BAD_REQUEST, "malformed");

    let response = cluster.router().route(&write_request()).await.unwrap();

    assert_eq!(header(&response, HEADER_REPLICATION_STATUS), "failed");
    assert_eq!(header(&response, HEADER_RESTART_COUNT), "1");
    assert_eq!(
        cluster.downstream.marker_of(A).map(|m| m.to_string()),
        Some("2024-05-01T12:00:00.000Z".to_string())
    );
}

#[tokio::test]
async fn test_write_without_replicas_is_failed() {
    let cluster = TestCluster::new(P, &[]);

    let response = cluster.router().route(&write_request()).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(header(&response, HEADER_REPLICATION_STATUS), "failed");
    assert_eq!(header(&response, HEADER_SUCCESS_COUNT), "0");
    assert!(!cluster.context.state().node_set().await.unwrap().stale);
}

#[tokio::test]
async fn test_primary_write_rejected() {
    let cluster = TestCluster::new(P, &[A, B]);
    cluster
        .downstream
        .respond_with(P, StatusCode::BAD_REQUEST, "parse error");

    let result = cluster.router().route(&write_request()).await;

    match result {
        Err(Error::PrimaryWriteRejected { node, status, body }) => {
            assert_eq!(node, P);
            assert_eq!(status, 400);
            assert_eq!(body, "parse error");
        }
        other => panic!("expected primary rejection, got {:?}", other.map(|r| r.status)),
    }
    assert_eq!(cluster.downstream.data_calls(A), 0);
    assert_eq!(cluster.downstream.data_calls(B), 0);
    assert!(cluster.context.state().node_set().await.unwrap().stale);
}

#[tokio::test]
async fn test_primary_write_unreachable() {
    let cluster = TestCluster::new(P, &[A]);
    cluster.downstream.fail_data(P, true);

    let result = cluster.router().route(&write_request()).await;

    assert!(matches!(result, Err(Error::Downstream { .. })));
    assert_eq!(cluster.downstream.data_calls(A), 0);
    assert!(cluster.context.state().node_set().await.unwrap().stale);
}

#[tokio::test]
async fn test_primary_marker_failure_fails_the_write() {
    let cluster = TestCluster::new(P, &[A, B]);
    let router = cluster.router();
    router.context().directory().node_set().await.unwrap();
    cluster.downstream.fail_marker_writes(P, true);

    let result = router.route(&write_request()).await;

    assert!(matches!(result, Err(Error::Downstream { ref node, .. }) if node == P));
    // The data write reached the primary, nothing was replicated
    assert_eq!(cluster.downstream.data_calls(P), 1);
    assert_eq!(cluster.downstream.data_calls(A), 0);
    assert_eq!(cluster.downstream.data_calls(B), 0);
    assert!(cluster.orchestrator.restarts().is_empty());
    assert!(cluster.context.state().node_set().await.unwrap().stale);
}

#[tokio::test(start_paused = true)]
async fn test_write_restarts_replica_that_drifted_since_verification() {
    let config = ProxyConfig::default()
        .with_consistency_window(Duration::from_secs(10))
        .with_read_balancing(crate::ReadBalancing::PrimaryLast);
    let cluster = TestCluster::with_config(config, P, &[A, B]);
    let router = cluster.router();
    router.context().directory().node_set().await.unwrap();

    // A falls behind after it was verified; the next check is due once the
    // window has passed
    cluster.downstream.set_marker(A, "2024-04-30T08:00:00.000Z");
    tokio::time::advance(Duration::from_secs(11)).await;

    let response = router.route(&write_request()).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(header(&response, HEADER_REPLICATION_STATUS), "partial");
    assert_eq!(header(&response, HEADER_SUCCESS_COUNT), "1");
    assert_eq!(header(&response, HEADER_FAIL_COUNT), "0");
    assert_eq!(header(&response, HEADER_RESTART_COUNT), "1");
    assert_eq!(cluster.downstream.data_calls(A), 0);
    assert_eq!(cluster.downstream.data_calls(B), 1);
    assert_eq!(cluster.orchestrator.restarts(), vec![A.to_string()]);
    assert!(cluster.context.state().node_set().await.unwrap().stale);
}

#[tokio::test]
async fn test_drifted_replica_is_restarted_on_discovery() {
    let cluster = TestCluster::new(P, &[A, B]);
    cluster.downstream.set_marker(B, "2024-04-30T08:00:00.000Z");

    let nodes = cluster.context.directory().node_set().await.unwrap();

    assert_eq!(nodes.replicas, vec![A.to_string()]);
    assert_eq!(cluster.orchestrator.restarts(), vec![B.to_string()]);
}

#[tokio::test]
async fn test_replica_with_failed_restart_stays_out_of_rotation() {
    let cluster = TestCluster::new(P, &[A, B]);
    cluster.downstream.set_marker(A, "2024-04-30T08:00:00.000Z");
    cluster.orchestrator.fail_for(A);

    let nodes = cluster.context.directory().node_set().await.unwrap();

    assert_eq!(nodes.replicas, vec![B.to_string()]);
    assert!(cluster.orchestrator.restarts().is_empty());
    // No successful restart, so the fresh set is still cached
    assert!(!cluster.context.state().node_set().await.unwrap().stale);
}

#[tokio::test]
async fn test_fresh_cache_skips_discovery() {
    let cluster = TestCluster::new(P, &[A]);
    let router = cluster.router();

    router.route(&read_request()).await.unwrap();
    router.route(&read_request()).await.unwrap();

    assert_eq!(cluster.discovery.calls(), 1);
}

#[tokio::test]
async fn test_invalidation_triggers_rediscovery() {
    let cluster = TestCluster::new(P, &[A]);
    let directory = cluster.context.directory();

    directory.node_set().await.unwrap();
    directory.invalidate().await;
    directory.invalidate().await;
    directory.node_set().await.unwrap();

    assert_eq!(cluster.discovery.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_expired_cache_triggers_rediscovery() {
    let config = ProxyConfig::default()
        .with_cache_ttl(Duration::from_secs(5))
        .with_read_balancing(crate::ReadBalancing::PrimaryLast);
    let cluster = TestCluster::with_config(config, P, &[A]);
    let directory = cluster.context.directory();

    directory.node_set().await.unwrap();
    tokio::time::advance(Duration::from_secs(4)).await;
    directory.node_set().await.unwrap();
    assert_eq!(cluster.discovery.calls(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    directory.node_set().await.unwrap();
    assert_eq!(cluster.discovery.calls(), 2);
}

#[tokio::test]
async fn test_rediscovery_picks_up_membership_changes() {
    let cluster = TestCluster::new(P, &[A]);
    let directory = cluster.context.directory();
    directory.node_set().await.unwrap();

    cluster.downstream.add_node(B);
    cluster.downstream.set_marker(B, "2024-05-01T12:00:00.000Z");
    cluster.discovery.set_nodes(P, &[A, B]);
    directory.invalidate().await;

    let nodes = directory.node_set().await.unwrap();
    assert_eq!(nodes.replicas, vec![A.to_string(), B.to_string()]);
}

#[tokio::test]
async fn test_discovery_failure_propagates() {
    let cluster = TestCluster::new(P, &[A]);
    cluster.discovery.fail_with(Some("api unavailable"));

    let result = cluster.router().route(&read_request()).await;

    assert!(matches!(result, Err(Error::Discovery(_))));
    assert_eq!(cluster.downstream.data_calls(P), 0);
}

#[tokio::test]
async fn test_concurrent_requests_discover_once() {
    let cluster = TestCluster::new(P, &[A, B]);
    let router = cluster.router();
    let request = read_request();

    let reads = (0..10).map(|_| router.route(&request));
    let results = futures::future::join_all(reads).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(cluster.discovery.calls(), 1);
}

#[tokio::test]
async fn test_sparql_query_post_is_routed_as_read() {
    let cluster = TestCluster::new(P, &[A]);
    let mut inbound = InboundRequest::new(Method::POST, "/rdf4j-server/repositories/kms");
    inbound.headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/sparql-query"),
    );
    inbound.body = Some(Bytes::from_static(b"SELECT * WHERE { ?s ?p ?o }"));

    let response = cluster.router().route(&ProxyRequest::from(inbound)).await.unwrap();

    assert!(response.headers.get(HEADER_REPLICATION_STATUS).is_none());
    assert_eq!(cluster.downstream.data_calls(A), 1);
    assert_eq!(cluster.downstream.data_calls(P), 0);
}
