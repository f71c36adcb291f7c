//! In-memory repository implementations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use windlass_core::{
    CoreError, Deployment, DeploymentName, DeploymentRepository, FlowRun, FlowRunRepository,
    PoolName, RunId, RunState, WorkPool, WorkPoolRepository, WorkerIdentity,
};

use crate::CatalogueState;

/// In-memory implementation of the work pool repository
pub struct InMemoryWorkPoolRepository {
    state: Arc<RwLock<CatalogueState>>,
}

impl InMemoryWorkPoolRepository {
    pub(crate) fn new(state: Arc<RwLock<CatalogueState>>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl WorkPoolRepository for InMemoryWorkPoolRepository {
    async fn find_by_name(&self, name: &PoolName) -> Result<Option<WorkPool>, CoreError> {
        let state = self.state.read().await;
        Ok(state.pools.get(&name.0).cloned())
    }

    async fn save(&self, pool: &WorkPool) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        state.pools.insert(pool.name.0.clone(), pool.clone());
        Ok(())
    }

    async fn list_pools(&self) -> Result<Vec<WorkPool>, CoreError> {
        let state = self.state.read().await;
        Ok(state.pools.values().cloned().collect())
    }
}

/// In-memory implementation of the deployment repository
pub struct InMemoryDeploymentRepository {
    state: Arc<RwLock<CatalogueState>>,
}

impl InMemoryDeploymentRepository {
    pub(crate) fn new(state: Arc<RwLock<CatalogueState>>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl DeploymentRepository for InMemoryDeploymentRepository {
    async fn find_latest(&self, name: &DeploymentName) -> Result<Option<Deployment>, CoreError> {
        let state = self.state.read().await;
        Ok(state
            .deployments
            .get(&name.0)
            .and_then(|versions| versions.last().cloned()))
    }

    async fn find_version(
        &self,
        name: &DeploymentName,
        version: u32,
    ) -> Result<Option<Deployment>, CoreError> {
        let state = self.state.read().await;
        Ok(state.deployments.get(&name.0).and_then(|versions| {
            versions.iter().find(|d| d.version == version).cloned()
        }))
    }

    async fn save(&self, deployment: &Deployment) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        let versions = state
            .deployments
            .entry(deployment.name.0.clone())
            .or_default();

        if versions.iter().any(|d| d.version == deployment.version) {
            return Err(CoreError::StateStoreError(format!(
                "deployment {} version {} already written",
                deployment.name, deployment.version
            )));
        }

        versions.push(deployment.clone());
        Ok(())
    }

    async fn list_deployments(&self) -> Result<Vec<Deployment>, CoreError> {
        let state = self.state.read().await;
        Ok(state
            .deployments
            .values()
            .filter_map(|versions| versions.last().cloned())
            .collect())
    }
}

/// In-memory implementation of the flow run repository
///
/// Every mutation takes the store's single write lock, so claims and
/// compare-and-set updates are linearizable across all workers sharing the
/// provider.
pub struct InMemoryFlowRunRepository {
    state: Arc<RwLock<CatalogueState>>,
}

impl InMemoryFlowRunRepository {
    pub(crate) fn new(state: Arc<RwLock<CatalogueState>>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl FlowRunRepository for InMemoryFlowRunRepository {
    async fn find_by_id(&self, id: &RunId) -> Result<Option<FlowRun>, CoreError> {
        let state = self.state.read().await;
        Ok(state.runs.get(&id.0).cloned())
    }

    async fn insert(&self, run: &FlowRun) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        if state.runs.contains_key(&run.id.0) {
            return Err(CoreError::AlreadyExists(run.id.0.clone()));
        }
        state.runs.insert(run.id.0.clone(), run.clone());
        Ok(())
    }

    async fn list_runs(
        &self,
        pool: Option<&PoolName>,
        state_filter: Option<RunState>,
    ) -> Result<Vec<FlowRun>, CoreError> {
        let state = self.state.read().await;
        Ok(state
            .runs
            .values()
            .filter(|run| pool.map_or(true, |p| &run.work_pool_name == p))
            .filter(|run| state_filter.map_or(true, |s| run.state == s))
            .cloned()
            .collect())
    }

    async fn claim_scheduled(
        &self,
        id: &RunId,
        worker: &WorkerIdentity,
    ) -> Result<FlowRun, CoreError> {
        let mut state = self.state.write().await;

        let run = state
            .runs
            .get(&id.0)
            .ok_or_else(|| CoreError::RunNotFound(id.0.clone()))?;

        if run.state != RunState::Scheduled {
            // Lost the claim race (or the run was cancelled); the caller
            // moves on to the next candidate.
            return Err(CoreError::InvalidTransition(format!(
                "run {}: expected Scheduled, found {}",
                id, run.state
            )));
        }

        let pool = state
            .pools
            .get(&run.work_pool_name.0)
            .ok_or_else(|| CoreError::PoolNotFound(run.work_pool_name.0.clone()))?;

        if !pool.is_active() {
            return Err(CoreError::PoolPaused(pool.name.0.clone()));
        }

        let occupied = state
            .runs
            .values()
            .filter(|r| r.work_pool_name == run.work_pool_name)
            .filter(|r| matches!(r.state, RunState::Pending | RunState::Running))
            .count();
        if !pool.admits(occupied) {
            return Err(CoreError::PoolAtCapacity(pool.name.0.clone()));
        }

        let mut claimed = run.clone();
        claimed.claim(worker)?;
        state.runs.insert(id.0.clone(), claimed.clone());

        debug!(run_id = %id, worker = %worker, "claimed run");
        Ok(claimed)
    }

    async fn update_if_state(&self, expected: RunState, run: &FlowRun) -> Result<(), CoreError> {
        let mut state = self.state.write().await;

        let stored = state
            .runs
            .get(&run.id.0)
            .ok_or_else(|| CoreError::RunNotFound(run.id.0.clone()))?;

        if stored.state != expected {
            return Err(CoreError::InvalidTransition(format!(
                "run {}: expected {}, found {}",
                run.id, expected, stored.state
            )));
        }

        // Preserve a cancel flag raised while the caller held its copy.
        let mut updated = run.clone();
        updated.cancel_requested |= stored.cancel_requested;
        state.runs.insert(run.id.0.clone(), updated);
        Ok(())
    }

    async fn record_heartbeat(
        &self,
        id: &RunId,
        worker: &WorkerIdentity,
        at: DateTime<Utc>,
    ) -> Result<FlowRun, CoreError> {
        let mut state = self.state.write().await;

        let run = state
            .runs
            .get_mut(&id.0)
            .ok_or_else(|| CoreError::RunNotFound(id.0.clone()))?;

        if run.state == RunState::Running && run.worker.as_ref() == Some(worker) {
            run.record_heartbeat(at);
        }

        Ok(run.clone())
    }

    async fn request_cancel(&self, id: &RunId) -> Result<FlowRun, CoreError> {
        let mut state = self.state.write().await;

        let run = state
            .runs
            .get_mut(&id.0)
            .ok_or_else(|| CoreError::RunNotFound(id.0.clone()))?;

        run.request_cancel()?;
        Ok(run.clone())
    }
}
