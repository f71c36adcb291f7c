//! Crash detection
//!
//! A worker that dies mid-run leaves its run stuck in a non-terminal
//! state with nobody driving it. The reaper scans for three flavors of
//! abandonment and converges each one:
//!
//! - `Running` with a stale heartbeat: the execution context is gone,
//!   the run is moved to `Crashed`.
//! - `Pending` with a stale heartbeat: the worker died between claim and
//!   start, so nothing ever ran; the claim is released back to
//!   `Scheduled` and the pool slot it held is freed.
//! - `Failed` with a retry deadline that passed unclaimed: the worker
//!   that scheduled the retry died before firing it; the run is
//!   re-enqueued so awaiting trigger clients are never stranded.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use windlass_core::{CoreError, FlowRunRepository, RunState};

/// Reaper timing knobs
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Interval between scans
    pub scan_interval: Duration,

    /// A claim whose last liveness signal is older than this is
    /// considered abandoned; also the grace period an overdue retry gets
    /// before being re-enqueued
    pub liveness_threshold: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(5),
            liveness_threshold: Duration::from_secs(30),
        }
    }
}

/// Scans for abandoned runs and converges them
pub struct Reaper {
    runs: Arc<dyn FlowRunRepository>,
    config: ReaperConfig,
}

impl Reaper {
    /// Create a reaper over the given run repository
    pub fn new(runs: Arc<dyn FlowRunRepository>, config: ReaperConfig) -> Self {
        Self { runs, config }
    }

    /// Run the scan loop until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(threshold_ms = self.config.liveness_threshold.as_millis() as u64, "reaper started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.scan_interval) => {
                    if let Err(e) = self.scan_once().await {
                        warn!(error = %e, "reaper scan failed");
                    }
                }
            }
        }
        info!("reaper stopped");
    }

    /// One scan over all abandonment flavors. Returns the number of runs
    /// acted on.
    pub async fn scan_once(&self) -> Result<usize, CoreError> {
        let threshold = chrono::Duration::from_std(self.config.liveness_threshold)
            .map_err(|e| CoreError::Other(format!("invalid liveness threshold: {}", e)))?;
        let cutoff = Utc::now() - threshold;

        let mut acted = 0;

        // Running with a stale heartbeat: the execution context is gone.
        for run in self.runs.list_runs(None, Some(RunState::Running)).await? {
            // A Running run always has a heartbeat from its claim; fall
            // back to started_at for robustness against foreign writers.
            let last_alive = run.heartbeat_at.or(run.started_at);
            if last_alive.map_or(false, |at| at >= cutoff) {
                continue;
            }

            let mut abandoned = run.clone();
            abandoned.crash("worker heartbeat lost")?;
            // The CAS compares state, not the heartbeat, so a heartbeat
            // landing between the scan and this write does not save the
            // run. That is fine: the resurfaced worker observes the
            // external transition at its next heartbeat and terminates.
            match self.runs.update_if_state(RunState::Running, &abandoned).await {
                Ok(()) => {
                    warn!(
                        run_id = %abandoned.id,
                        worker = ?abandoned.worker,
                        "crashed abandoned run"
                    );
                    acted += 1;
                }
                Err(CoreError::InvalidTransition(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        // Pending with a stale heartbeat: the worker died between claim
        // and start. Nothing ran, so release the claim instead of
        // crashing it; the held pool slot frees up with it.
        for run in self.runs.list_runs(None, Some(RunState::Pending)).await? {
            let last_alive = run.heartbeat_at.or(Some(run.created_at));
            if last_alive.map_or(false, |at| at >= cutoff) {
                continue;
            }

            let mut released = run.clone();
            released.release_claim("worker liveness lost before start")?;
            match self.runs.update_if_state(RunState::Pending, &released).await {
                Ok(()) => {
                    warn!(
                        run_id = %released.id,
                        worker = ?run.worker,
                        "released abandoned claim"
                    );
                    acted += 1;
                }
                Err(CoreError::InvalidTransition(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        // Failed with a retry deadline nobody fired: the worker that
        // recorded the failure died during the backoff wait. Deadline
        // plus grace keeps the reaper from racing a live worker's timer.
        for run in self.runs.list_runs(None, Some(RunState::Failed)).await? {
            let overdue = run.retry_at.map_or(false, |at| at < cutoff);
            if !overdue {
                continue;
            }

            let mut retried = run.clone();
            retried.begin_retry()?;
            match self.runs.update_if_state(RunState::Failed, &retried).await {
                Ok(()) => {
                    warn!(
                        run_id = %retried.id,
                        attempt = retried.attempt_count,
                        "re-enqueued overdue retry"
                    );
                    acted += 1;
                }
                Err(CoreError::InvalidTransition(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(acted)
    }
}
