//! Execution launch interface consumed by workers
//!
//! The concrete mechanism that runs a flow's code (container, subprocess,
//! in-process call) is an external collaborator. Workers depend only on
//! this contract: launch, poll for completion, force-terminate, and stream
//! logs.

use async_trait::async_trait;

use crate::domain::deployment::FlowRef;
use crate::domain::flow_run::RunId;
use crate::{CoreError, Parameters, Payload};

/// Observed status of a launched execution context
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionStatus {
    /// Still executing
    Running,

    /// Finished successfully with the flow code's return value
    Completed(Payload),

    /// The flow code raised a failure with the given diagnostic detail
    Failed(String),
}

/// Handle to one launched execution context
#[async_trait]
pub trait RunHandle: Send {
    /// Poll the context for completion without blocking on it
    async fn poll(&mut self) -> Result<ExecutionStatus, CoreError>;

    /// Forcibly terminate the context. Safe to call on an already-finished
    /// context.
    async fn terminate(&mut self) -> Result<(), CoreError>;

    /// Drain the next buffered log line emitted by the flow code, if any
    fn try_next_log(&mut self) -> Option<String>;
}

/// Launches isolated execution contexts for flow runs
#[async_trait]
pub trait RunExecutor: Send + Sync {
    /// Start an isolated execution context for the given flow reference
    /// with the run's merged parameters injected
    async fn launch(
        &self,
        flow_ref: &FlowRef,
        run_id: &RunId,
        parameters: &Parameters,
    ) -> Result<Box<dyn RunHandle>, CoreError>;
}
