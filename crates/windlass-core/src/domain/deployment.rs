use super::work_pool::PoolName;
use crate::types::Parameters;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Value object: deployment name, conventionally `<flow-name>/<deployment-name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentName(pub String);

impl std::fmt::Display for DeploymentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeploymentName {
    fn from(s: &str) -> Self {
        DeploymentName(s.to_string())
    }
}

/// Value object: identifier of the runnable flow code behind a deployment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowRef(pub String);

impl std::fmt::Display for FlowRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FlowRef {
    fn from(s: &str) -> Self {
        FlowRef(s.to_string())
    }
}

/// Shape of the delay between retry attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,

    /// Multiplier applied for each subsequent retry
    pub factor: f64,

    /// Upper bound on any single delay, in milliseconds
    pub max_delay_ms: u64,

    /// Whether workers should randomize the computed delay
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            factor: 2.0,
            max_delay_ms: 60_000,
            jitter: true,
        }
    }
}

/// Retry policy applied by workers when a run fails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first. Must be at least 1.
    pub max_attempts: u32,

    /// Delay shape between attempts
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Policy that never retries: a single attempt only
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::default(),
        }
    }

    /// Policy with the given attempt budget and default exponential backoff
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::default(),
        }
    }

    /// Base delay before re-scheduling after the given failed attempt
    /// (1-based). Workers apply jitter on top when `backoff.jitter` is set.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = self.backoff.initial_delay_ms as f64 * self.backoff.factor.powi(exponent as i32);
        let capped = delay.min(self.backoff.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Whether another attempt is allowed after `attempt_count` attempts
    #[inline]
    pub fn allows_retry(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retries()
    }
}

/// A named, versioned binding of a runnable flow to a work pool with
/// default parameters
///
/// A deployment version is immutable once written; re-registering with the
/// upsert flag creates the next version and redirects name lookups to it,
/// while existing flow runs keep their recorded version for reproducible
/// history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment name
    pub name: DeploymentName,

    /// Version number, starting at 1
    pub version: u32,

    /// Identifier of the runnable flow code
    pub flow_ref: FlowRef,

    /// Work pool runs of this deployment are enqueued on
    pub work_pool_name: PoolName,

    /// Default parameters merged under per-run overrides
    pub default_parameters: Parameters,

    /// Retry policy applied to failed runs
    pub retry_policy: RetryPolicy,

    /// Creation timestamp of this version
    pub created_at: DateTime<Utc>,
}

impl Deployment {
    /// Create the first version of a deployment
    pub fn new(
        name: DeploymentName,
        flow_ref: FlowRef,
        work_pool_name: PoolName,
        default_parameters: Parameters,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            name,
            version: 1,
            flow_ref,
            work_pool_name,
            default_parameters,
            retry_policy,
            created_at: Utc::now(),
        }
    }

    /// Build the successor version of this deployment with new contents
    pub fn next_version(
        &self,
        flow_ref: FlowRef,
        work_pool_name: PoolName,
        default_parameters: Parameters,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            name: self.name.clone(),
            version: self.version + 1,
            flow_ref,
            work_pool_name,
            default_parameters,
            retry_policy,
            created_at: Utc::now(),
        }
    }
}
