//! Cluster membership records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Membership as reported by the discovery capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredNodes {
    /// Writable node
    pub primary: String,
    /// Read-only nodes
    pub replicas: Vec<String>,
}

/// Last-known cluster membership
///
/// Always replaced wholesale. Invalidation writes a stale copy instead of
/// deleting the record so the primary stays known while re-discovery runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSet {
    /// Writable node
    pub primary: String,
    /// Read-only nodes, in discovery order
    pub replicas: Vec<String>,
    /// When the discovery cycle that produced this set ran
    pub discovered_at: DateTime<Utc>,
    /// Set by invalidation; forces the next lookup to re-discover
    #[serde(default)]
    pub stale: bool,
}

impl NodeSet {
    /// A fresh set from a discovery result
    pub fn discovered(nodes: DiscoveredNodes) -> Self {
        Self::discovered_at(nodes, Utc::now())
    }

    pub fn discovered_at(nodes: DiscoveredNodes, at: DateTime<Utc>) -> Self {
        Self {
            primary: nodes.primary,
            replicas: nodes.replicas,
            discovered_at: at,
            stale: false,
        }
    }

    /// Time since discovery (zero if the clock went backwards)
    pub fn age(&self) -> Duration {
        self.age_at(Utc::now())
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.discovered_at).to_std().unwrap_or_default()
    }

    /// Usable without re-discovery
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.is_fresh_at(ttl, Utc::now())
    }

    pub fn is_fresh_at(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        !self.stale && self.age_at(now) < ttl
    }

    /// Stale copy of this set
    pub fn invalidated(&self) -> Self {
        Self {
            stale: true,
            ..self.clone()
        }
    }

    /// Drop replicas that are not in `verified`
    pub fn retain_verified(mut self, verified: &VerifiedSet) -> Self {
        self.replicas.retain(|node| verified.contains(node));
        self
    }
}

/// Replicas currently trusted to match the primary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerifiedSet(BTreeSet<String>);

impl VerifiedSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Membership test
    pub fn contains(&self, node: &str) -> bool {
        self.0.contains(node)
    }

    /// Add a node; returns false if it was already present
    pub fn insert(&mut self, node: impl Into<String>) -> bool {
        self.0.insert(node.into())
    }

    /// Remove a node; returns false if it was absent
    pub fn remove(&mut self, node: &str) -> bool {
        self.0.remove(node)
    }

    /// Number of verified replicas
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// No verified replicas
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl<S: Into<String>> FromIterator<S> for VerifiedSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
