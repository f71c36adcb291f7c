//! Application services - orchestration logic over the domain layer

/// Work pool registry operations
pub mod pool_service;

/// Deployment registry operations
pub mod deployment_service;

/// Flow run creation and cancellation
pub mod scheduler;

/// In-flow triggering of other deployments
pub mod trigger;

/// Operator-facing facade over the services
pub mod runtime_interface;
