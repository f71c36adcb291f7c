use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::application::deployment_service::DeploymentService;
use crate::application::pool_service::WorkPoolService;
use crate::application::scheduler::FlowRunScheduler;
use crate::domain::deployment::{Deployment, DeploymentName, FlowRef, RetryPolicy};
use crate::domain::flow_run::{CancelOutcome, FlowRun, RunId, RunState};
use crate::domain::repository::{DeploymentRepository, FlowRunRepository, WorkPoolRepository};
use crate::domain::work_pool::{ExecutorKind, PoolName, WorkPool};
use crate::types::{Parameters, Payload};
use crate::CoreError;

/// Summary information about a flow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRunSummary {
    /// Run id
    pub id: String,

    /// Deployment name
    pub deployment: String,

    /// Work pool name
    pub pool: String,

    /// Current state
    pub state: RunState,

    /// Attempts made so far
    pub attempt_count: u32,

    /// Creation timestamp (RFC 3339)
    pub created_at: String,

    /// Terminal timestamp (RFC 3339), if reached
    pub ended_at: Option<String>,
}

impl From<&FlowRun> for FlowRunSummary {
    fn from(run: &FlowRun) -> Self {
        Self {
            id: run.id.0.clone(),
            deployment: run.deployment_name.0.clone(),
            pool: run.work_pool_name.0.clone(),
            state: run.state,
            attempt_count: run.attempt_count,
            created_at: run.created_at.to_rfc3339(),
            ended_at: run.ended_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// The main API provided by the Windlass core to operators and external
/// systems: every entry point returns either a resource/state or one of
/// the named error kinds - no silent no-ops.
#[derive(Clone)]
pub struct RuntimeInterface {
    pool_service: WorkPoolService,
    deployment_service: DeploymentService,
    scheduler: Arc<FlowRunScheduler>,
}

impl RuntimeInterface {
    /// Create a runtime interface from already-constructed services
    pub fn new(
        pool_service: WorkPoolService,
        deployment_service: DeploymentService,
        scheduler: Arc<FlowRunScheduler>,
    ) -> Self {
        Self {
            pool_service,
            deployment_service,
            scheduler,
        }
    }

    /// Create a runtime interface with externally-provided repositories
    ///
    /// This is the preferred constructor: it keeps the core decoupled from
    /// any specific persistence mechanism.
    pub fn create_with_repositories(
        pools: Arc<dyn WorkPoolRepository>,
        deployments: Arc<dyn DeploymentRepository>,
        runs: Arc<dyn FlowRunRepository>,
    ) -> Self {
        let scheduler = Arc::new(FlowRunScheduler::new(
            deployments.clone(),
            pools.clone(),
            runs,
        ));
        Self {
            pool_service: WorkPoolService::new(pools.clone()),
            deployment_service: DeploymentService::new(deployments, pools),
            scheduler,
        }
    }

    /// Create a work pool
    pub async fn create_pool(
        &self,
        name: PoolName,
        executor_type: ExecutorKind,
        concurrency_limit: Option<u32>,
    ) -> Result<WorkPool, CoreError> {
        self.pool_service
            .create_pool(name, executor_type, concurrency_limit)
            .await
    }

    /// Get a work pool by name
    pub async fn get_pool(&self, name: &PoolName) -> Result<WorkPool, CoreError> {
        self.pool_service.get_pool(name).await
    }

    /// Set a pool's concurrency limit (future claims only)
    pub async fn set_concurrency_limit(
        &self,
        name: &PoolName,
        limit: Option<u32>,
    ) -> Result<WorkPool, CoreError> {
        self.pool_service.set_concurrency_limit(name, limit).await
    }

    /// Pause a pool (stops new claims)
    pub async fn pause_pool(&self, name: &PoolName) -> Result<WorkPool, CoreError> {
        self.pool_service.pause_pool(name).await
    }

    /// Resume a paused pool
    pub async fn resume_pool(&self, name: &PoolName) -> Result<WorkPool, CoreError> {
        self.pool_service.resume_pool(name).await
    }

    /// Register a deployment binding a flow to a work pool
    #[allow(clippy::too_many_arguments)]
    pub async fn register_deployment(
        &self,
        name: DeploymentName,
        flow_ref: FlowRef,
        work_pool_name: PoolName,
        default_parameters: Parameters,
        retry_policy: RetryPolicy,
        upsert: bool,
    ) -> Result<Deployment, CoreError> {
        self.deployment_service
            .register_deployment(
                name,
                flow_ref,
                work_pool_name,
                default_parameters,
                retry_policy,
                upsert,
            )
            .await
    }

    /// Resolve a deployment name to its latest version
    pub async fn resolve_deployment(
        &self,
        name: &DeploymentName,
    ) -> Result<Deployment, CoreError> {
        self.deployment_service.resolve_deployment(name).await
    }

    /// Create a run against a deployment, returning its id
    pub async fn run_deployment(
        &self,
        name: &DeploymentName,
        parameter_overrides: Parameters,
    ) -> Result<RunId, CoreError> {
        let run = self
            .scheduler
            .create_run(name, parameter_overrides, None)
            .await?;
        Ok(run.id)
    }

    /// Get a run's current state and, when completed, its result
    pub async fn get_run_state(
        &self,
        id: &RunId,
    ) -> Result<(RunState, Option<Payload>), CoreError> {
        let run = self.scheduler.get_run(id).await?;
        Ok((run.state, run.result))
    }

    /// Get the full record of a run
    pub async fn get_run(&self, id: &RunId) -> Result<FlowRun, CoreError> {
        self.scheduler.get_run(id).await
    }

    /// Request cancellation of a run
    pub async fn cancel_run(&self, id: &RunId) -> Result<CancelOutcome, CoreError> {
        self.scheduler.cancel_run(id).await
    }

    /// List run summaries, optionally filtered by pool and/or state
    pub async fn list_runs(
        &self,
        pool: Option<&PoolName>,
        state: Option<RunState>,
    ) -> Result<Vec<FlowRunSummary>, CoreError> {
        let runs = self.scheduler.list_runs(pool, state).await?;
        Ok(runs.iter().map(FlowRunSummary::from).collect())
    }

    /// The underlying scheduler, for wiring workers and trigger clients
    pub fn scheduler(&self) -> Arc<FlowRunScheduler> {
        self.scheduler.clone()
    }
}
