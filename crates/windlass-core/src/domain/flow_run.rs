use super::deployment::{Deployment, DeploymentName};
use super::work_pool::PoolName;
use crate::{CoreError, Parameters, Payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Value object: flow run identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a fresh run identifier
    pub fn generate() -> Self {
        RunId(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value object: identity of a worker process instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerIdentity(pub String);

impl WorkerIdentity {
    /// Generate a fresh worker identity
    pub fn generate() -> Self {
        WorkerIdentity(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkerIdentity {
    fn from(s: &str) -> Self {
        WorkerIdentity(s.to_string())
    }
}

/// Flow run state
///
/// Transitions are monotonic and single-direction except the two edges
/// that re-enqueue a run:
///
/// ```text
/// Scheduled -> Pending | Cancelled
/// Pending   -> Running | Scheduled | Cancelled
/// Running   -> Completed | Failed | Crashed | Cancelled
/// Failed    -> Scheduled        (retry, while attempts remain)
/// ```
///
/// `Pending -> Scheduled` releases a claim whose worker died before the
/// execution started; nothing has run yet, so the run goes back on the
/// pool rather than crashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    /// Waiting on its work pool to be claimed by a worker
    Scheduled,

    /// Claimed by a worker, execution not yet started
    Pending,

    /// Executing inside a worker's execution context
    Running,

    /// Terminal: finished successfully with a result
    Completed,

    /// Failed; terminal once the retry budget is exhausted
    Failed,

    /// Terminal: the execution context died or exceeded its time budget,
    /// with no code-level failure
    Crashed,

    /// Terminal: explicitly cancelled
    Cancelled,
}

impl RunState {
    /// Whether no further transitions are permitted from this state.
    /// `Failed` is handled separately: it permits only the retry edge.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Crashed | RunState::Cancelled
        )
    }

    /// Whether the state machine permits moving from this state to `next`
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Scheduled, Pending)
                | (Scheduled, Cancelled)
                | (Pending, Running)
                | (Pending, Scheduled)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Crashed)
                | (Running, Cancelled)
                | (Failed, Scheduled)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One entry in a flow run's append-only state history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    /// State entered
    pub state: RunState,

    /// When the state was entered
    pub timestamp: DateTime<Utc>,

    /// Optional diagnostic message (failure detail, crash reason)
    pub message: Option<String>,
}

/// Outcome of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The run moved directly to `Cancelled`
    Cancelled,

    /// The run is `Running`; the cancel flag was set for the worker to
    /// observe cooperatively
    Flagged,
}

/// One concrete, stateful execution instance of a deployment's flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRun {
    /// Unique identifier, generated at creation
    pub id: RunId,

    /// Deployment this run was created against
    pub deployment_name: DeploymentName,

    /// Deployment version recorded for reproducible history
    pub deployment_version: u32,

    /// Work pool the run is enqueued on (denormalized from the deployment
    /// at creation time so claims can check capacity in one lookup)
    pub work_pool_name: PoolName,

    /// Merged parameters: explicit overrides over deployment defaults
    pub parameters: Parameters,

    /// Current state
    pub state: RunState,

    /// Append-only state history
    pub state_history: Vec<StateTransition>,

    /// Back-reference to the run whose trigger client created this run.
    /// Traceability only, never an ownership relation.
    pub parent_run_id: Option<RunId>,

    /// Attempts made so far, starting at 1
    pub attempt_count: u32,

    /// Result payload, set only on terminal success
    pub result: Option<Payload>,

    /// Diagnostic detail from the most recent failure or crash
    pub error: Option<String>,

    /// When a `Failed` run with attempts remaining is due back on its
    /// pool. Persisted so the retry edge survives the death of the
    /// worker that scheduled it.
    pub retry_at: Option<DateTime<Utc>>,

    /// Cooperative cancellation flag checked by the executing worker
    pub cancel_requested: bool,

    /// Identity of the worker currently holding the claim
    pub worker: Option<WorkerIdentity>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// When execution first entered `Running`
    pub started_at: Option<DateTime<Utc>>,

    /// When the run reached a terminal state
    pub ended_at: Option<DateTime<Utc>>,

    /// Last liveness signal from the executing worker
    pub heartbeat_at: Option<DateTime<Utc>>,
}

impl FlowRun {
    /// Create a new run against a deployment, in state `Scheduled`
    pub fn new(
        deployment: &Deployment,
        parameter_overrides: Parameters,
        parent_run_id: Option<RunId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::generate(),
            deployment_name: deployment.name.clone(),
            deployment_version: deployment.version,
            work_pool_name: deployment.work_pool_name.clone(),
            parameters: parameter_overrides.merged_over(&deployment.default_parameters),
            state: RunState::Scheduled,
            state_history: vec![StateTransition {
                state: RunState::Scheduled,
                timestamp: now,
                message: None,
            }],
            parent_run_id,
            attempt_count: 1,
            result: None,
            error: None,
            retry_at: None,
            cancel_requested: false,
            worker: None,
            created_at: now,
            started_at: None,
            ended_at: None,
            heartbeat_at: None,
        }
    }

    /// Transition to `next`, appending to the state history
    ///
    /// Fails with `InvalidTransition` if the state machine does not permit
    /// the edge, including any transition out of a terminal state.
    pub fn transition_to(
        &mut self,
        next: RunState,
        message: Option<String>,
    ) -> Result<(), CoreError> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidTransition(format!(
                "run {}: {} -> {}",
                self.id, self.state, next
            )));
        }

        let now = Utc::now();
        self.state = next;
        self.state_history.push(StateTransition {
            state: next,
            timestamp: now,
            message,
        });

        if next == RunState::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
        }

        Ok(())
    }

    /// Claim the run for a worker: `Scheduled -> Pending`
    pub fn claim(&mut self, worker: &WorkerIdentity) -> Result<(), CoreError> {
        self.transition_to(RunState::Pending, None)?;
        self.worker = Some(worker.clone());
        self.heartbeat_at = Some(Utc::now());
        Ok(())
    }

    /// Begin execution: `Pending -> Running`
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.transition_to(RunState::Running, None)
    }

    /// Finish successfully with a result: `Running -> Completed`
    pub fn complete(&mut self, result: Payload) -> Result<(), CoreError> {
        self.transition_to(RunState::Completed, None)?;
        self.result = Some(result);
        Ok(())
    }

    /// Record a code-level failure: `Running -> Failed`
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        let error = error.into();
        self.transition_to(RunState::Failed, Some(error.clone()))?;
        self.error = Some(error);
        Ok(())
    }

    /// Record an environment-level crash: `Running -> Crashed`
    pub fn crash(&mut self, reason: impl Into<String>) -> Result<(), CoreError> {
        let reason = reason.into();
        self.transition_to(RunState::Crashed, Some(reason.clone()))?;
        self.error = Some(reason);
        Ok(())
    }

    /// Cancel the run: `Scheduled | Pending | Running -> Cancelled`
    pub fn cancel(&mut self) -> Result<(), CoreError> {
        self.transition_to(RunState::Cancelled, None)
    }

    /// Record when a failed run is due back on its pool
    pub fn schedule_retry(&mut self, at: DateTime<Utc>) {
        self.retry_at = Some(at);
    }

    /// Re-enqueue after a failure: `Failed -> Scheduled` with
    /// `attempt_count` incremented. The caller is responsible for checking
    /// the retry policy's attempt budget first.
    pub fn begin_retry(&mut self) -> Result<(), CoreError> {
        self.transition_to(RunState::Scheduled, None)?;
        self.attempt_count += 1;
        self.error = None;
        self.retry_at = None;
        self.worker = None;
        self.heartbeat_at = None;
        self.ended_at = None;
        Ok(())
    }

    /// Release a claim whose execution never started: `Pending ->
    /// Scheduled` with the worker cleared. The attempt count does not
    /// change because no attempt ran.
    pub fn release_claim(&mut self, reason: impl Into<String>) -> Result<(), CoreError> {
        self.transition_to(RunState::Scheduled, Some(reason.into()))?;
        self.worker = None;
        self.heartbeat_at = None;
        Ok(())
    }

    /// Record a liveness signal from the executing worker
    pub fn record_heartbeat(&mut self, at: DateTime<Utc>) {
        self.heartbeat_at = Some(at);
    }

    /// Apply a cancellation request: `Scheduled`/`Pending` runs move to
    /// `Cancelled` directly; `Running` runs get the cooperative flag set;
    /// terminal runs fail with `InvalidTransition`.
    pub fn request_cancel(&mut self) -> Result<CancelOutcome, CoreError> {
        match self.state {
            RunState::Scheduled | RunState::Pending => {
                self.cancel()?;
                Ok(CancelOutcome::Cancelled)
            }
            RunState::Running => {
                self.cancel_requested = true;
                Ok(CancelOutcome::Flagged)
            }
            state => Err(CoreError::InvalidTransition(format!(
                "run {}: cannot cancel terminal state {}",
                self.id, state
            ))),
        }
    }

    /// States recorded in the history, in order
    pub fn history_states(&self) -> Vec<RunState> {
        self.state_history.iter().map(|t| t.state).collect()
    }
}
