//! Domain layer - core orchestration records and rules

/// Work pool records
pub mod work_pool;

/// Deployment records and retry policies
pub mod deployment;

/// Flow run records and the run state machine
pub mod flow_run;

/// Repository traits implemented by catalogue persistence collaborators
pub mod repository;
