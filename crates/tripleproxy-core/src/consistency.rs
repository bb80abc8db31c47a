//! Replica consistency verification

use crate::marker::{Marker, MarkerProtocol};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Per-node spacing of marker fetches
///
/// Only real fetches are recorded, so a node is fetched at most once per
/// window no matter how often it is checked.
pub struct ConsistencyThrottle {
    window: Duration,
    checked: Mutex<HashMap<String, Instant>>,
}

impl ConsistencyThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            checked: Mutex::new(HashMap::new()),
        }
    }

    /// Record a fetch of `node` unless one happened within the window
    ///
    /// Returns true if the caller should fetch.
    pub fn try_acquire(&self, node: &str) -> bool {
        let now = Instant::now();
        let mut checked = self.checked.lock();
        match checked.get(node) {
            Some(last) if now.duration_since(*last) < self.window => false,
            _ => {
                checked.insert(node.to_string(), now);
                true
            }
        }
    }

    /// Drop the entry for `node` so its next check fetches
    pub fn forget(&self, node: &str) {
        self.checked.lock().remove(node);
    }

    pub fn clear(&self) {
        self.checked.lock().clear();
    }
}

/// Compares replica markers against the primary's
pub struct ConsistencyChecker {
    markers: Arc<MarkerProtocol>,
    throttle: Arc<ConsistencyThrottle>,
}

impl ConsistencyChecker {
    pub fn new(markers: Arc<MarkerProtocol>, throttle: Arc<ConsistencyThrottle>) -> Self {
        Self { markers, throttle }
    }

    /// Whether `node` holds the same marker as the primary
    ///
    /// A node checked within the window is assumed consistent. Otherwise
    /// both markers must be present and equal.
    pub async fn is_consistent(&self, node: &str, primary_marker: Option<&Marker>) -> bool {
        if !self.throttle.try_acquire(node) {
            tracing::debug!("Skipping consistency check for {} (checked recently)", node);
            return true;
        }

        let node_marker = self.markers.fetch(node).await;

        let Some(primary_marker) = primary_marker else {
            tracing::warn!(
                "Unable to get last update time for primary while checking {}",
                node
            );
            return false;
        };

        let Some(node_marker) = node_marker else {
            tracing::warn!("Unable to get last update time for node {}", node);
            return false;
        };

        if node_marker != *primary_marker {
            tracing::warn!(
                "Node {} is inconsistent: marker {} differs from primary marker {}",
                node,
                node_marker,
                primary_marker
            );
            return false;
        }

        true
    }
}
