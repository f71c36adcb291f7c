use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::deployment::DeploymentName;
use crate::domain::flow_run::{CancelOutcome, FlowRun, RunId, RunState};
use crate::domain::repository::{DeploymentRepository, FlowRunRepository, WorkPoolRepository};
use crate::domain::work_pool::PoolName;
use crate::types::Parameters;
use crate::CoreError;

/// Flow run scheduler: accepts run requests and enqueues them on the
/// deployment's work pool
#[derive(Clone)]
pub struct FlowRunScheduler {
    deployments: Arc<dyn DeploymentRepository>,
    pools: Arc<dyn WorkPoolRepository>,
    runs: Arc<dyn FlowRunRepository>,
}

impl FlowRunScheduler {
    /// Create a new scheduler backed by the given repositories
    pub fn new(
        deployments: Arc<dyn DeploymentRepository>,
        pools: Arc<dyn WorkPoolRepository>,
        runs: Arc<dyn FlowRunRepository>,
    ) -> Self {
        Self {
            deployments,
            pools,
            runs,
        }
    }

    /// Create a flow run against a deployment
    ///
    /// Merges `parameter_overrides` over the deployment's defaults
    /// (override wins), persists the run in state `Scheduled`, and makes
    /// it visible to workers polling the deployment's pool. A paused pool
    /// does not reject the request: pausing is transient, so the run is
    /// created and left `Scheduled` until the pool resumes.
    pub async fn create_run(
        &self,
        deployment_name: &DeploymentName,
        parameter_overrides: Parameters,
        parent_run_id: Option<RunId>,
    ) -> Result<FlowRun, CoreError> {
        let deployment = self
            .deployments
            .find_latest(deployment_name)
            .await?
            .ok_or_else(|| CoreError::DeploymentNotFound(deployment_name.0.clone()))?;

        let pool = self
            .pools
            .find_by_name(&deployment.work_pool_name)
            .await?
            .ok_or_else(|| CoreError::PoolNotFound(deployment.work_pool_name.0.clone()))?;

        let run = FlowRun::new(&deployment, parameter_overrides, parent_run_id);
        self.runs.insert(&run).await?;

        if pool.is_active() {
            info!(
                run_id = %run.id,
                deployment = %deployment.name,
                pool = %pool.name,
                parent = ?run.parent_run_id,
                "scheduled flow run"
            );
        } else {
            info!(
                run_id = %run.id,
                deployment = %deployment.name,
                pool = %pool.name,
                "scheduled flow run on paused pool; execution deferred until resume"
            );
        }

        Ok(run)
    }

    /// Get a run by id; fails with `RunNotFound` if absent
    pub async fn get_run(&self, id: &RunId) -> Result<FlowRun, CoreError> {
        self.runs
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::RunNotFound(id.0.clone()))
    }

    /// Request cancellation of a run
    ///
    /// `Scheduled`/`Pending` runs move to `Cancelled` immediately;
    /// `Running` runs get a cooperative cancel flag that their worker
    /// observes at the next heartbeat; terminal runs fail with
    /// `InvalidTransition`.
    pub async fn cancel_run(&self, id: &RunId) -> Result<CancelOutcome, CoreError> {
        let run = self.runs.request_cancel(id).await?;

        let outcome = if run.state == RunState::Cancelled {
            CancelOutcome::Cancelled
        } else {
            CancelOutcome::Flagged
        };
        info!(run_id = %id, outcome = ?outcome, "cancellation requested");
        Ok(outcome)
    }

    /// Look up the exact deployment version a run was created against,
    /// preserving historical linkage across upserts
    pub async fn deployment_version(
        &self,
        name: &DeploymentName,
        version: u32,
    ) -> Result<crate::domain::deployment::Deployment, CoreError> {
        self.deployments
            .find_version(name, version)
            .await?
            .ok_or_else(|| {
                CoreError::DeploymentNotFound(format!("{} (version {})", name, version))
            })
    }

    /// List runs, optionally filtered by pool and/or state
    pub async fn list_runs(
        &self,
        pool: Option<&PoolName>,
        state: Option<RunState>,
    ) -> Result<Vec<FlowRun>, CoreError> {
        debug!(pool = ?pool, state = ?state, "listing runs");
        self.runs.list_runs(pool, state).await
    }
}
