//!
//! Windlass Worker - pool-bound execution runtime for the Windlass platform
//!
//! Workers poll a work pool's catalogue for `Scheduled` flow runs, claim
//! them, launch their flow code through a `RunExecutor`, and drive each
//! run to a terminal state: heartbeating, enforcing time budgets,
//! observing cooperative cancellation, and scheduling retries with
//! backoff. The reaper backstops the whole arrangement by converging
//! runs abandoned by a dead worker: stale `Running` runs crash, stale
//! `Pending` claims release, and overdue retries re-enqueue.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Polling worker bound to one work pool
pub mod worker;

/// In-process flow execution
pub mod executor;

/// Crash detection for abandoned runs
pub mod reaper;

pub use executor::{FlowContext, FlowResult, InProcessExecutor};
pub use reaper::{Reaper, ReaperConfig};
pub use worker::{Worker, WorkerConfig};
