//!
//! Windlass Core - orchestration runtime for the Windlass platform
//!
//! This crate defines the domain records (work pools, deployments, flow
//! runs), the run state machine, the repository traits persistence
//! collaborators implement, and the application services (registries,
//! scheduler, trigger client) built on top of them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - core orchestration records and rules
pub mod domain;

/// Application services - orchestration logic
pub mod application;

/// Payload and parameter types
pub mod types;

/// Error types
pub mod error;

/// Execution launch interface consumed by workers
pub mod execution;

/// Named configuration resolution
pub mod config;

// Re-export key types
pub use error::CoreError;
pub use types::{Parameters, Payload};

// Application interfaces
pub use application::deployment_service::DeploymentService;
pub use application::pool_service::WorkPoolService;
pub use application::runtime_interface::{FlowRunSummary, RuntimeInterface};
pub use application::scheduler::FlowRunScheduler;
pub use application::trigger::TriggerClient;

// Re-export main domain types for easy use
pub use domain::deployment::{Backoff, Deployment, DeploymentName, FlowRef, RetryPolicy};
pub use domain::flow_run::{
    CancelOutcome, FlowRun, RunId, RunState, StateTransition, WorkerIdentity,
};
pub use domain::repository::{DeploymentRepository, FlowRunRepository, WorkPoolRepository};
pub use domain::work_pool::{ExecutorKind, PoolName, PoolStatus, WorkPool};

// External interfaces
pub use config::{resolve_as, ConfigResolver};
pub use execution::{ExecutionStatus, RunExecutor, RunHandle};
