use std::sync::Arc;
use tracing::info;

use crate::domain::repository::WorkPoolRepository;
use crate::domain::work_pool::{ExecutorKind, PoolName, PoolStatus, WorkPool};
use crate::CoreError;

/// Work pool registry: the durable catalogue of named queues
#[derive(Clone)]
pub struct WorkPoolService {
    pools: Arc<dyn WorkPoolRepository>,
}

impl WorkPoolService {
    /// Create a new work pool service backed by the given repository
    pub fn new(pools: Arc<dyn WorkPoolRepository>) -> Self {
        Self { pools }
    }

    /// Create a pool; fails with `AlreadyExists` if the name is taken
    pub async fn create_pool(
        &self,
        name: PoolName,
        executor_type: ExecutorKind,
        concurrency_limit: Option<u32>,
    ) -> Result<WorkPool, CoreError> {
        if self.pools.find_by_name(&name).await?.is_some() {
            return Err(CoreError::AlreadyExists(name.0));
        }

        let pool = WorkPool::new(name, executor_type, concurrency_limit);
        self.pools.save(&pool).await?;

        info!(pool = %pool.name, limit = ?pool.concurrency_limit, "created work pool");
        Ok(pool)
    }

    /// Get a pool by name; fails with `PoolNotFound` if absent
    pub async fn get_pool(&self, name: &PoolName) -> Result<WorkPool, CoreError> {
        self.pools
            .find_by_name(name)
            .await?
            .ok_or_else(|| CoreError::PoolNotFound(name.0.clone()))
    }

    /// Set a pool's concurrency limit. Takes effect for future claims;
    /// runs already executing beyond the new limit are not preempted.
    pub async fn set_concurrency_limit(
        &self,
        name: &PoolName,
        limit: Option<u32>,
    ) -> Result<WorkPool, CoreError> {
        let mut pool = self.get_pool(name).await?;
        pool.concurrency_limit = limit;
        self.pools.save(&pool).await?;

        info!(pool = %pool.name, limit = ?limit, "updated concurrency limit");
        Ok(pool)
    }

    /// Pause a pool: stops new claims, existing running runs continue
    pub async fn pause_pool(&self, name: &PoolName) -> Result<WorkPool, CoreError> {
        self.set_status(name, PoolStatus::Paused).await
    }

    /// Resume a paused pool
    pub async fn resume_pool(&self, name: &PoolName) -> Result<WorkPool, CoreError> {
        self.set_status(name, PoolStatus::Active).await
    }

    async fn set_status(&self, name: &PoolName, status: PoolStatus) -> Result<WorkPool, CoreError> {
        let mut pool = self.get_pool(name).await?;
        pool.status = status;
        self.pools.save(&pool).await?;

        info!(pool = %pool.name, status = ?status, "updated pool status");
        Ok(pool)
    }

    /// List all pools
    pub async fn list_pools(&self) -> Result<Vec<WorkPool>, CoreError> {
        self.pools.list_pools().await
    }
}
