use std::sync::Arc;
use tracing::info;

use crate::domain::deployment::{Deployment, DeploymentName, FlowRef, RetryPolicy};
use crate::domain::repository::{DeploymentRepository, WorkPoolRepository};
use crate::domain::work_pool::PoolName;
use crate::types::Parameters;
use crate::CoreError;

/// Deployment registry: maps deployment names to runnable flow bindings
#[derive(Clone)]
pub struct DeploymentService {
    deployments: Arc<dyn DeploymentRepository>,
    pools: Arc<dyn WorkPoolRepository>,
}

impl DeploymentService {
    /// Create a new deployment service backed by the given repositories
    pub fn new(
        deployments: Arc<dyn DeploymentRepository>,
        pools: Arc<dyn WorkPoolRepository>,
    ) -> Self {
        Self { deployments, pools }
    }

    /// Register a deployment
    ///
    /// Fails with `PoolNotFound` if the work pool is unknown. On a name
    /// collision the call fails with `AlreadyExists` unless `upsert` is
    /// set, in which case the next version is written and future lookups
    /// by name resolve to it; existing flow runs keep their recorded
    /// version.
    pub async fn register_deployment(
        &self,
        name: DeploymentName,
        flow_ref: FlowRef,
        work_pool_name: PoolName,
        default_parameters: Parameters,
        retry_policy: RetryPolicy,
        upsert: bool,
    ) -> Result<Deployment, CoreError> {
        if self.pools.find_by_name(&work_pool_name).await?.is_none() {
            return Err(CoreError::PoolNotFound(work_pool_name.0));
        }

        let deployment = match self.deployments.find_latest(&name).await? {
            Some(existing) if !upsert => {
                return Err(CoreError::AlreadyExists(existing.name.0));
            }
            Some(existing) => existing.next_version(
                flow_ref,
                work_pool_name,
                default_parameters,
                retry_policy,
            ),
            None => Deployment::new(
                name,
                flow_ref,
                work_pool_name,
                default_parameters,
                retry_policy,
            ),
        };

        self.deployments.save(&deployment).await?;

        info!(
            deployment = %deployment.name,
            version = deployment.version,
            pool = %deployment.work_pool_name,
            "registered deployment"
        );
        Ok(deployment)
    }

    /// Resolve a deployment name to its latest version; fails with
    /// `DeploymentNotFound` if absent
    pub async fn resolve_deployment(
        &self,
        name: &DeploymentName,
    ) -> Result<Deployment, CoreError> {
        self.deployments
            .find_latest(name)
            .await?
            .ok_or_else(|| CoreError::DeploymentNotFound(name.0.clone()))
    }

    /// List the latest version of every registered deployment
    pub async fn list_deployments(&self) -> Result<Vec<Deployment>, CoreError> {
        self.deployments.list_deployments().await
    }
}
