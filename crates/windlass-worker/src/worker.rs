//! Polling worker
//!
//! A worker serves exactly one work pool: it polls the catalogue for
//! `Scheduled` runs, claims them, launches their flow code through a
//! `RunExecutor`, and drives each run's state machine to a terminal
//! state. While an execution is in flight the worker heartbeats the run
//! and observes cooperative cancellation through the heartbeat response.

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use windlass_core::{
    CoreError, Deployment, DeploymentRepository, ExecutionStatus, FlowRun, FlowRunRepository,
    PoolName, RetryPolicy, RunExecutor, RunHandle, RunState, WorkerIdentity,
};

/// Worker timing knobs
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between catalogue polls for claimable runs
    pub poll_interval: Duration,

    /// Interval between liveness heartbeats while executing a run
    pub heartbeat_interval: Duration,

    /// Interval between completion polls on a launched execution
    pub execution_poll_interval: Duration,

    /// Wall-clock budget per run; exceeding it terminates the execution
    /// and marks the run `Crashed`. `None` means unbounded.
    pub run_timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(1),
            execution_poll_interval: Duration::from_millis(50),
            run_timeout: None,
        }
    }
}

/// A worker bound to one work pool
pub struct Worker {
    pool_name: PoolName,
    identity: WorkerIdentity,
    deployments: Arc<dyn DeploymentRepository>,
    runs: Arc<dyn FlowRunRepository>,
    executor: Arc<dyn RunExecutor>,
    config: WorkerConfig,
}

impl Worker {
    /// Create a worker for the given pool with a generated identity
    pub fn new(
        pool_name: PoolName,
        deployments: Arc<dyn DeploymentRepository>,
        runs: Arc<dyn FlowRunRepository>,
        executor: Arc<dyn RunExecutor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            pool_name,
            identity: WorkerIdentity::generate(),
            deployments,
            runs,
            executor,
            config,
        }
    }

    /// The worker's identity, as recorded on claimed runs
    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// Run the worker's poll loop until `shutdown` flips to true, then
    /// wait for in-flight executions to finish
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(pool = %self.pool_name, worker = %self.identity, "worker started");
        let mut executions = JoinSet::new();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.clone().poll_once(&mut executions).await {
                        warn!(pool = %self.pool_name, error = %e, "poll cycle failed");
                    }
                    // Reap finished execution tasks so the set stays small.
                    while executions.try_join_next().is_some() {}
                }
            }
        }

        info!(pool = %self.pool_name, worker = %self.identity, "worker draining");
        while executions.join_next().await.is_some() {}
        info!(pool = %self.pool_name, worker = %self.identity, "worker stopped");
    }

    /// One poll cycle: claim as many `Scheduled` runs as the pool admits
    /// and spawn an execution task per claim
    pub async fn poll_once(
        self: Arc<Self>,
        executions: &mut JoinSet<()>,
    ) -> Result<(), CoreError> {
        let candidates = self
            .runs
            .list_runs(Some(&self.pool_name), Some(RunState::Scheduled))
            .await?;

        for candidate in candidates {
            match self.runs.claim_scheduled(&candidate.id, &self.identity).await {
                Ok(claimed) => {
                    let worker = self.clone();
                    executions.spawn(async move {
                        worker.execute_run(claimed).await;
                    });
                }
                // Another worker got there first; try the next candidate.
                Err(CoreError::InvalidTransition(_)) => continue,
                // No point trying further candidates this cycle.
                Err(CoreError::PoolAtCapacity(_)) | Err(CoreError::PoolPaused(_)) => break,
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Drive one claimed run to a terminal state
    async fn execute_run(&self, run: FlowRun) {
        let run_id = run.id.clone();
        if let Err(e) = self.try_execute_run(run).await {
            error!(run_id = %run_id, error = %e, "run execution aborted");
        }
    }

    async fn try_execute_run(&self, mut run: FlowRun) -> Result<(), CoreError> {
        let deployment = self
            .deployments
            .find_version(&run.deployment_name, run.deployment_version)
            .await?
            .ok_or_else(|| {
                CoreError::DeploymentNotFound(format!(
                    "{} (version {})",
                    run.deployment_name, run.deployment_version
                ))
            })?;

        run.start()?;
        if let Err(e) = self.runs.update_if_state(RunState::Pending, &run).await {
            // The run was cancelled (or otherwise moved) between claim and
            // start; drop the claim.
            debug!(run_id = %run.id, error = %e, "claimed run moved before start");
            return Ok(());
        }

        info!(
            run_id = %run.id,
            flow = %deployment.flow_ref,
            attempt = run.attempt_count,
            "starting flow run"
        );

        let mut handle = match self
            .executor
            .launch(&deployment.flow_ref, &run.id, &run.parameters)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "failed to launch execution");
                run.crash(format!("launch failed: {}", e))?;
                self.runs.update_if_state(RunState::Running, &run).await?;
                return Ok(());
            }
        };

        self.supervise(&mut run, handle.as_mut(), &deployment).await
    }

    /// Supervise a launched execution: drain logs, heartbeat, enforce the
    /// time budget, observe cancellation, and record the terminal state
    async fn supervise(
        &self,
        run: &mut FlowRun,
        handle: &mut dyn RunHandle,
        deployment: &Deployment,
    ) -> Result<(), CoreError> {
        let started = Instant::now();
        let deadline = self.config.run_timeout.map(|budget| started + budget);
        let mut next_heartbeat = Instant::now() + self.config.heartbeat_interval;

        loop {
            while let Some(line) = handle.try_next_log() {
                info!(run_id = %run.id, "{}", line);
            }

            match handle.poll().await? {
                ExecutionStatus::Completed(result) => {
                    run.complete(result)?;
                    self.runs.update_if_state(RunState::Running, run).await?;
                    info!(run_id = %run.id, attempt = run.attempt_count, "flow run completed");
                    return Ok(());
                }
                ExecutionStatus::Failed(message) => {
                    return self.record_failure(run, message, &deployment.retry_policy).await;
                }
                ExecutionStatus::Running => {}
            }

            if deadline.map_or(false, |d| Instant::now() >= d) {
                warn!(run_id = %run.id, "run exceeded its time budget, terminating");
                handle.terminate().await?;
                run.crash("run exceeded its time budget")?;
                self.runs.update_if_state(RunState::Running, run).await?;
                return Ok(());
            }

            if Instant::now() >= next_heartbeat {
                let stored = self
                    .runs
                    .record_heartbeat(&run.id, &self.identity, Utc::now())
                    .await?;

                if stored.cancel_requested {
                    info!(run_id = %run.id, "cancellation observed, terminating");
                    handle.terminate().await?;
                    run.cancel_requested = true;
                    run.cancel()?;
                    self.runs.update_if_state(RunState::Running, run).await?;
                    return Ok(());
                }

                if stored.state != RunState::Running {
                    // Something external (a reaper, an operator) already
                    // moved the run; stop driving it.
                    warn!(run_id = %run.id, state = %stored.state, "run moved externally, terminating");
                    handle.terminate().await?;
                    return Ok(());
                }

                run.heartbeat_at = stored.heartbeat_at;
                next_heartbeat = Instant::now() + self.config.heartbeat_interval;
            }

            tokio::time::sleep(self.config.execution_poll_interval).await;
        }
    }

    /// Record a code-level failure and, while the retry budget allows,
    /// drive the retry edge after a backoff delay
    ///
    /// The retry deadline is persisted on the run before the `Failed`
    /// write, so a reaper can re-enqueue the run if this worker dies
    /// before the delay elapses. The wait happens inside the execution
    /// task, which the worker drains on shutdown.
    async fn record_failure(
        &self,
        run: &mut FlowRun,
        message: String,
        policy: &RetryPolicy,
    ) -> Result<(), CoreError> {
        warn!(
            run_id = %run.id,
            attempt = run.attempt_count,
            error = %message,
            "flow run failed"
        );
        run.fail(message)?;

        if !policy.allows_retry(run.attempt_count) {
            self.runs.update_if_state(RunState::Running, run).await?;
            info!(run_id = %run.id, attempts = run.attempt_count, "retry budget exhausted");
            return Ok(());
        }

        let delay = retry_delay(policy, run.attempt_count);
        run.schedule_retry(Utc::now() + delay);
        self.runs.update_if_state(RunState::Running, run).await?;
        info!(
            run_id = %run.id,
            attempt = run.attempt_count,
            delay_ms = delay.as_millis() as u64,
            "scheduling retry"
        );

        tokio::time::sleep(delay).await;
        run.begin_retry()?;
        if let Err(e) = self.runs.update_if_state(RunState::Failed, run).await {
            // The run moved while we slept (a reaper re-enqueued it, or
            // an operator intervened); nothing left to do.
            debug!(run_id = %run.id, error = %e, "retry superseded");
        }

        Ok(())
    }
}

/// Backoff delay before re-scheduling the given failed attempt, with
/// jitter applied when the policy asks for it
fn retry_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy.base_delay_for_attempt(attempt);
    if policy.backoff.jitter {
        base.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use windlass_core::Backoff;

    fn jitterless(initial_delay_ms: u64, factor: f64, max_delay_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            backoff: Backoff {
                initial_delay_ms,
                factor,
                max_delay_ms,
                jitter: false,
            },
        }
    }

    #[test]
    fn test_retry_delay_without_jitter_is_exact() {
        let policy = jitterless(100, 2.0, 10_000);
        assert_eq!(retry_delay(&policy, 1), Duration::from_millis(100));
        assert_eq!(retry_delay(&policy, 3), Duration::from_millis(400));
    }

    #[test]
    fn test_retry_delay_jitter_stays_bounded() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: Backoff {
                initial_delay_ms: 100,
                factor: 2.0,
                max_delay_ms: 10_000,
                jitter: true,
            },
        };

        for _ in 0..50 {
            let delay = retry_delay(&policy, 1);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay < Duration::from_millis(150));
        }
    }
}
