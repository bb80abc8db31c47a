//! Per-process wiring of the proxy components

use crate::config::ProxyConfig;
use crate::consistency::{ConsistencyChecker, ConsistencyThrottle};
use crate::directory::NodeDirectory;
use crate::discovery::Discovery;
use crate::downstream::Downstream;
use crate::error::{Error, Result};
use crate::healer::SelfHealer;
use crate::marker::MarkerProtocol;
use crate::orchestrator::Orchestrator;
use crate::state::ClusterState;
use crate::store::StateStore;
use std::sync::Arc;

/// Everything a request needs, built once per process and shared
pub struct ClusterContext {
    config: ProxyConfig,
    downstream: Arc<dyn Downstream>,
    state: Arc<ClusterState>,
    markers: Arc<MarkerProtocol>,
    checker: Arc<ConsistencyChecker>,
    healer: Arc<SelfHealer>,
    directory: NodeDirectory,
}

impl ClusterContext {
    pub fn new(
        config: ProxyConfig,
        downstream: Arc<dyn Downstream>,
        discovery: Arc<dyn Discovery>,
        orchestrator: Arc<dyn Orchestrator>,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        config.validate().map_err(Error::config)?;

        let state = Arc::new(ClusterState::new(store));
        let throttle = Arc::new(ConsistencyThrottle::new(config.consistency_window));
        let markers = Arc::new(MarkerProtocol::new(downstream.clone(), &config.marker));
        let checker = Arc::new(ConsistencyChecker::new(markers.clone(), throttle.clone()));
        let healer = Arc::new(SelfHealer::new(orchestrator, state.clone(), throttle));
        let directory = NodeDirectory::new(
            discovery,
            state.clone(),
            checker.clone(),
            healer.clone(),
            markers.clone(),
            config.cache_ttl,
        );

        tracing::info!(
            "Cluster context ready (cache TTL {:?}, consistency window {:?}, read balancing {})",
            config.cache_ttl,
            config.consistency_window,
            config.read_balancing
        );

        Ok(Self {
            config,
            downstream,
            state,
            markers,
            checker,
            healer,
            directory,
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn downstream(&self) -> &Arc<dyn Downstream> {
        &self.downstream
    }

    pub fn state(&self) -> &Arc<ClusterState> {
        &self.state
    }

    pub fn markers(&self) -> &MarkerProtocol {
        &self.markers
    }

    pub fn checker(&self) -> &ConsistencyChecker {
        &self.checker
    }

    pub fn healer(&self) -> &SelfHealer {
        &self.healer
    }

    pub fn directory(&self) -> &NodeDirectory {
        &self.directory
    }
}
