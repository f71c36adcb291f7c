//! In-memory catalogue store for the Windlass platform
//!
//! This crate provides in-memory implementations of the repository traits
//! defined in windlass-core. It is primarily useful for development,
//! testing, and single-process deployments where persistence is not
//! required.
//!
//! All three repositories share one store behind a single `RwLock`, so a
//! claim can verify the run's state, its pool's status, and the pool's
//! spare capacity inside one write-lock critical section. That makes
//! claims linearizable across every worker in the process, which is the
//! contract `FlowRunRepository::claim_scheduled` demands.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod repositories;
pub use repositories::{
    InMemoryDeploymentRepository, InMemoryFlowRunRepository, InMemoryWorkPoolRepository,
};

pub mod resolver;
pub use resolver::InMemoryConfigResolver;

use windlass_core::{
    Deployment, DeploymentRepository, FlowRun, FlowRunRepository, WorkPool, WorkPoolRepository,
};

/// Shared catalogue state: pools, deployment version lists, and runs,
/// keyed by their string names/ids
#[derive(Default)]
pub(crate) struct CatalogueState {
    pub(crate) pools: HashMap<String, WorkPool>,
    /// Deployment versions in ascending order; last is the latest
    pub(crate) deployments: HashMap<String, Vec<Deployment>>,
    pub(crate) runs: HashMap<String, FlowRun>,
}

/// Provider for in-memory catalogue repositories
///
/// Hands out repository handles that all share the same underlying store.
#[derive(Clone, Default)]
pub struct InMemoryStateStoreProvider {
    state: Arc<RwLock<CatalogueState>>,
}

impl InMemoryStateStoreProvider {
    /// Create a new provider with an empty catalogue
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(CatalogueState::default())),
        }
    }

    /// Work pool repository handle
    pub fn work_pools(&self) -> Arc<dyn WorkPoolRepository> {
        Arc::new(InMemoryWorkPoolRepository::new(self.state.clone()))
    }

    /// Deployment repository handle
    pub fn deployments(&self) -> Arc<dyn DeploymentRepository> {
        Arc::new(InMemoryDeploymentRepository::new(self.state.clone()))
    }

    /// Flow run repository handle
    pub fn flow_runs(&self) -> Arc<dyn FlowRunRepository> {
        Arc::new(InMemoryFlowRunRepository::new(self.state.clone()))
    }
}
