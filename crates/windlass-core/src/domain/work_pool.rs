use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value object: work pool name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolName(pub String);

impl std::fmt::Display for PoolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PoolName {
    fn from(s: &str) -> Self {
        PoolName(s.to_string())
    }
}

/// Kind of execution context a pool's workers launch runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorKind {
    /// Runs execute in a local process context
    Process,

    /// Runs execute in a container
    Container,
}

/// Work pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolStatus {
    /// Pool accepts new claims
    Active,

    /// Pool stops new claims; already-running runs continue
    Paused,
}

/// A named, capacity-bounded queue of runnable work
///
/// The concurrency limit, if set, bounds the count of flow runs in
/// `Running` state that belong to this pool. Lowering the limit below the
/// current running count does not preempt running work; it only gates
/// future claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkPool {
    /// Unique pool name
    pub name: PoolName,

    /// Declared executor type for runs claimed from this pool
    pub executor_type: ExecutorKind,

    /// Maximum concurrent running claims; `None` is unbounded
    pub concurrency_limit: Option<u32>,

    /// Current status
    pub status: PoolStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl WorkPool {
    /// Create a new active work pool
    pub fn new(
        name: PoolName,
        executor_type: ExecutorKind,
        concurrency_limit: Option<u32>,
    ) -> Self {
        Self {
            name,
            executor_type,
            concurrency_limit,
            status: PoolStatus::Active,
            created_at: Utc::now(),
        }
    }

    /// Whether the pool currently accepts new claims
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == PoolStatus::Active
    }

    /// Whether the pool admits another claim given the count of slots
    /// already occupied (runs in `Pending` or `Running`)
    #[inline]
    pub fn admits(&self, occupied: usize) -> bool {
        match self.concurrency_limit {
            Some(limit) => occupied < limit as usize,
            None => true,
        }
    }
}
