use crate::domain::flow_run::RunState;
use thiserror::Error;

/// Core error type for the Windlass runtime
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Referenced work pool does not exist
    #[error("Work pool not found: {0}")]
    PoolNotFound(String),

    /// Referenced deployment does not exist
    #[error("Deployment not found: {0}")]
    DeploymentNotFound(String),

    /// Referenced flow run does not exist
    #[error("Flow run not found: {0}")]
    RunNotFound(String),

    /// Creation collided with an existing resource of the same name
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// State-machine violation: the requested transition is not permitted
    /// from the record's current state. A worker losing a claim race
    /// observes this variant and moves on.
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    /// The target work pool is paused; new claims are deferred
    #[error("Work pool is paused: {0}")]
    PoolPaused(String),

    /// The target work pool has no spare concurrency capacity. Internal
    /// scheduling signal, never surfaced to operators.
    #[error("Work pool at capacity: {0}")]
    PoolAtCapacity(String),

    /// The flow's own code raised a failure
    #[error("Execution failure: {0}")]
    ExecutionFailure(String),

    /// A run triggered through the trigger client reached a terminal
    /// state other than Completed
    #[error("Child run {child_id} ended in state {state:?}")]
    ChildRunFailed {
        /// Identifier of the failed child run
        child_id: String,
        /// Terminal state the child ended in
        state: RunState,
    },

    /// State store error
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}
