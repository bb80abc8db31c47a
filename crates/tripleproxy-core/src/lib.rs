//! TripleProxy Core - routing in front of a replicated triple store
//!
//! The cluster is one writable primary and any number of read-only
//! replicas. This crate decides where each request goes:
//!
//! - **Writes** go to the primary first, then fan out to every verified
//!   replica concurrently. The caller gets the primary's answer plus
//!   replication diagnostics.
//! - **Reads** try the primary and verified replicas one at a time, in
//!   load-balanced order, until one answers.
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────────┐
//!   ProxyRequest ────► │  RequestRouter   │ ──── Downstream ────► nodes
//!                      └────────┬─────────┘
//!                               │ node_set()
//!                      ┌────────▼─────────┐      ┌───────────────┐
//!                      │  NodeDirectory   │ ───► │   Discovery   │
//!                      └───┬──────────┬───┘      └───────────────┘
//!              verify      │          │ heal
//!        ┌─────────────────▼──┐    ┌──▼─────────────┐  ┌──────────────┐
//!        │ ConsistencyChecker │    │   SelfHealer   │─►│ Orchestrator │
//!        └────────────────────┘    └────────────────┘  └──────────────┘
//!                 ClusterState (NodeSet + VerifiedSet) ──► StateStore
//! ```
//!
//! Consistency is advisory: every node carries a last-write marker and a
//! replica is trusted for reads only while its marker matches the
//! primary's. Drifted or failing replicas are redeployed through the
//! orchestrator and re-verified on the next discovery cycle.

pub mod config;
pub mod consistency;
pub mod context;
pub mod directory;
pub mod discovery;
pub mod downstream;
pub mod error;
pub mod healer;
pub mod health;
pub mod marker;
pub mod node;
pub mod orchestrator;
pub mod request;
pub mod router;
pub mod state;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{MarkerConfig, ProxyConfig, ReadBalancing};
pub use context::ClusterContext;
pub use error::{Error, Result};
pub use health::HealthCheck;
pub use node::{DiscoveredNodes, NodeSet, VerifiedSet};
pub use request::{InboundRequest, ProxyRequest, RequestKind};
pub use router::{ReplicationOutcome, ReplicationStatus, RequestRouter};

/// Node set cache lifetime in seconds
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;

/// Minimum spacing between two marker fetches for the same node, in seconds
pub const DEFAULT_CONSISTENCY_WINDOW_SECS: u64 = 60;
