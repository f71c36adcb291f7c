use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::application::scheduler::FlowRunScheduler;
use crate::domain::deployment::DeploymentName;
use crate::domain::flow_run::{FlowRun, RunId, RunState};
use crate::types::{Parameters, Payload};
use crate::CoreError;

/// Default interval between state polls while awaiting a child run
pub const DEFAULT_AWAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cross-flow trigger client
///
/// Used from inside a running flow's code to submit a new flow run against
/// another deployment and optionally block until it reaches a terminal
/// state. The calling run stays `Running` for the whole wait; the child's
/// `parent_run_id` is a traceability back-reference, not ownership -
/// cancelling or deleting the parent does not touch the child.
#[derive(Clone)]
pub struct TriggerClient {
    scheduler: Arc<FlowRunScheduler>,
    poll_interval: Duration,
}

impl TriggerClient {
    /// Create a trigger client with the default await poll interval
    pub fn new(scheduler: Arc<FlowRunScheduler>) -> Self {
        Self {
            scheduler,
            poll_interval: DEFAULT_AWAIT_POLL_INTERVAL,
        }
    }

    /// Override the interval between state polls while awaiting
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Fire-and-forget trigger: create a run against `deployment_name`
    /// and return its id without waiting
    pub async fn trigger(
        &self,
        deployment_name: &DeploymentName,
        parameters: Parameters,
        parent_run_id: Option<RunId>,
    ) -> Result<RunId, CoreError> {
        let run = self
            .scheduler
            .create_run(deployment_name, parameters, parent_run_id)
            .await?;
        Ok(run.id)
    }

    /// Trigger a run and block until it reaches a terminal state
    ///
    /// Returns the child's result on `Completed`; fails with
    /// `ChildRunFailed{child_id, state}` on any other terminal state. The
    /// wait is a non-busy poll at a bounded interval.
    pub async fn trigger_and_await(
        &self,
        deployment_name: &DeploymentName,
        parameters: Parameters,
        parent_run_id: Option<RunId>,
    ) -> Result<Payload, CoreError> {
        let child_id = self
            .trigger(deployment_name, parameters, parent_run_id.clone())
            .await?;

        info!(
            child_id = %child_id,
            deployment = %deployment_name,
            parent = ?parent_run_id,
            "awaiting triggered run"
        );
        self.await_terminal(&child_id).await
    }

    /// Block until an existing run reaches a terminal state, returning its
    /// result on `Completed`
    pub async fn await_terminal(&self, run_id: &RunId) -> Result<Payload, CoreError> {
        loop {
            let run = self.scheduler.get_run(run_id).await?;

            if run.state.is_terminal() {
                // A Failed run with attempts left is about to be
                // re-scheduled by its worker; keep waiting.
                if run.state == RunState::Failed && self.retry_pending(&run).await? {
                    debug!(run_id = %run_id, attempt = run.attempt_count, "child awaiting retry");
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }

                return match run.state {
                    RunState::Completed => Ok(run.result.unwrap_or_else(Payload::null)),
                    state => Err(CoreError::ChildRunFailed {
                        child_id: run_id.0.clone(),
                        state,
                    }),
                };
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn retry_pending(&self, run: &FlowRun) -> Result<bool, CoreError> {
        let deployment = self
            .scheduler
            .deployment_version(&run.deployment_name, run.deployment_version)
            .await?;
        Ok(deployment.retry_policy.allows_retry(run.attempt_count))
    }
}
