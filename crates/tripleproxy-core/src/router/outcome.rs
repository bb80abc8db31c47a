//! Replication accounting

use std::fmt;

pub const HEADER_REPLICATION_STATUS: &str = "x-replication-status";
pub const HEADER_SUCCESS_COUNT: &str = "x-replication-success-count";
pub const HEADER_FAIL_COUNT: &str = "x-replication-fail-count";
pub const HEADER_RESTART_COUNT: &str = "x-replication-restart-count";

/// What happened to one replica during a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaResult {
    /// Write and marker applied
    Replicated,
    /// Write not applied; the replica was sent for restart
    Restarted,
    /// Write not applied and the restart failed too
    Failed,
}

/// Aggregate status of a write's replication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationStatus {
    Complete,
    Partial,
    Failed,
}

impl ReplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ReplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replica counts for one write
///
/// `success_count + fail_count + restart_count` is the number of replicas
/// the write was fanned out to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationOutcome {
    pub success_count: usize,
    pub fail_count: usize,
    pub restart_count: usize,
}

impl ReplicationOutcome {
    pub fn from_results(results: &[ReplicaResult]) -> Self {
        results
            .iter()
            .fold(Self::default(), |mut outcome, result| {
                match result {
                    ReplicaResult::Replicated => outcome.success_count += 1,
                    ReplicaResult::Restarted => outcome.restart_count += 1,
                    ReplicaResult::Failed => outcome.fail_count += 1,
                }
                outcome
            })
    }

    pub fn replica_count(&self) -> usize {
        self.success_count + self.fail_count + self.restart_count
    }

    /// `complete` only when every replica (at least one) took the write,
    /// `failed` when none did
    pub fn status(&self) -> ReplicationStatus {
        if self.success_count == 0 {
            ReplicationStatus::Failed
        } else if self.success_count == self.replica_count() {
            ReplicationStatus::Complete
        } else {
            ReplicationStatus::Partial
        }
    }

    /// Any replica missed the write
    pub fn needs_invalidation(&self) -> bool {
        self.fail_count > 0 || self.restart_count > 0
    }

    /// Response headers describing this outcome
    pub fn headers(&self) -> [(&'static str, String); 4] {
        [
            (HEADER_REPLICATION_STATUS, self.status().to_string()),
            (HEADER_SUCCESS_COUNT, self.success_count.to_string()),
            (HEADER_FAIL_COUNT, self.fail_count.to_string()),
            (HEADER_RESTART_COUNT, self.restart_count.to_string()),
        ]
    }
}
