//! Repository traits for the Windlass core
//!
//! These traits define the catalogue persistence interface consumed by the
//! registries, the scheduler, and workers. External crates implement them
//! to provide different persistence mechanisms; the in-memory
//! implementation lives in the `windlass-state-inmemory` crate.
//!
//! The one hard requirement on implementations is that `claim_scheduled`
//! and `update_if_state` are linearizable across all workers: claims are
//! the lock, so the store is the single source of truth that prevents
//! double-execution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::deployment::{Deployment, DeploymentName};
use super::flow_run::{FlowRun, RunId, RunState, WorkerIdentity};
use super::work_pool::{PoolName, WorkPool};
use crate::CoreError;

/// Repository for work pools
#[async_trait]
pub trait WorkPoolRepository: Send + Sync {
    /// Find a pool by name
    async fn find_by_name(&self, name: &PoolName) -> Result<Option<WorkPool>, CoreError>;

    /// Save a pool, replacing any existing record with the same name
    async fn save(&self, pool: &WorkPool) -> Result<(), CoreError>;

    /// List all pools
    async fn list_pools(&self) -> Result<Vec<WorkPool>, CoreError>;
}

/// Repository for deployments
///
/// Deployments are versioned: `save` appends a version, `find_latest`
/// resolves a name to its newest version, and historical versions stay
/// addressable for runs that recorded them.
#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    /// Find the latest version of a deployment by name
    async fn find_latest(&self, name: &DeploymentName) -> Result<Option<Deployment>, CoreError>;

    /// Find a specific version of a deployment
    async fn find_version(
        &self,
        name: &DeploymentName,
        version: u32,
    ) -> Result<Option<Deployment>, CoreError>;

    /// Append a deployment version
    async fn save(&self, deployment: &Deployment) -> Result<(), CoreError>;

    /// List the latest version of every deployment
    async fn list_deployments(&self) -> Result<Vec<Deployment>, CoreError>;
}

/// Repository for flow runs
#[async_trait]
pub trait FlowRunRepository: Send + Sync {
    /// Find a run by id
    async fn find_by_id(&self, id: &RunId) -> Result<Option<FlowRun>, CoreError>;

    /// Insert a newly created run; fails with `AlreadyExists` on id collision
    async fn insert(&self, run: &FlowRun) -> Result<(), CoreError>;

    /// List runs, optionally filtered by pool and/or state
    async fn list_runs(
        &self,
        pool: Option<&PoolName>,
        state: Option<RunState>,
    ) -> Result<Vec<FlowRun>, CoreError>;

    /// Atomically claim a `Scheduled` run for a worker
    ///
    /// In one linearizable step: verifies the run is still `Scheduled`
    /// (`InvalidTransition` otherwise - the losing side of a claim race),
    /// that its pool is active (`PoolPaused`) and has spare capacity
    /// counting runs in `Pending` or `Running` (`PoolAtCapacity`), then
    /// transitions the run to `Pending` owned by `worker`.
    async fn claim_scheduled(
        &self,
        id: &RunId,
        worker: &WorkerIdentity,
    ) -> Result<FlowRun, CoreError>;

    /// Atomically replace a run's record if its stored state equals
    /// `expected`; fails with `InvalidTransition` otherwise
    ///
    /// Used for every post-claim transition: `Pending -> Running`, the
    /// terminal edges, and the `Failed -> Scheduled` retry edge.
    async fn update_if_state(&self, expected: RunState, run: &FlowRun) -> Result<(), CoreError>;

    /// Record a liveness signal for a run held by `worker`, returning the
    /// current record so the worker observes the cancel flag and any
    /// externally applied transition
    async fn record_heartbeat(
        &self,
        id: &RunId,
        worker: &WorkerIdentity,
        at: DateTime<Utc>,
    ) -> Result<FlowRun, CoreError>;

    /// Apply a cancellation request (see `FlowRun::request_cancel`),
    /// returning the updated record
    async fn request_cancel(&self, id: &RunId) -> Result<FlowRun, CoreError>;
}
