//! In-process flow execution
//!
//! Runs flow code as spawned tokio tasks inside the worker's own process.
//! This is the executor behind `ExecutorKind::Process` pools and the one
//! every test and local deployment uses; container-backed execution plugs
//! in through the same `RunExecutor` contract.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use windlass_core::{
    CoreError, ExecutionStatus, FlowRef, Parameters, Payload, RunExecutor, RunHandle, RunId,
};

/// Outcome of one flow invocation: a result payload, or a code-level
/// failure with diagnostic detail
pub type FlowResult = Result<Payload, String>;

type FlowFn = dyn Fn(FlowContext) -> BoxFuture<'static, FlowResult> + Send + Sync;

/// Context handed to flow code at launch
///
/// Carries the run's identity and merged parameters, plus a log channel
/// the worker drains into its own structured log stream.
pub struct FlowContext {
    /// Identifier of the run being executed
    pub run_id: RunId,

    /// Merged parameters (per-run overrides over deployment defaults)
    pub parameters: Parameters,

    logs: mpsc::UnboundedSender<String>,
}

impl FlowContext {
    /// Emit a log line from flow code
    pub fn log(&self, line: impl Into<String>) {
        // The receiver only disappears when the handle is dropped, at
        // which point the line has nowhere to go anyway.
        let _ = self.logs.send(line.into());
    }

    /// Look up a parameter and deserialize it into a concrete type
    pub fn param<T>(&self, key: &str) -> Result<T, String>
    where
        T: serde::de::DeserializeOwned,
    {
        let value = self
            .parameters
            .get(key)
            .ok_or_else(|| format!("missing parameter: {}", key))?;
        serde_json::from_value(value.clone())
            .map_err(|e| format!("parameter '{}' has unexpected shape: {}", key, e))
    }
}

/// Executor that runs registered flows as in-process tokio tasks
///
/// Flow code is registered by flow reference before workers start; a
/// launch for an unregistered reference fails with `ExecutionFailure`.
#[derive(Default)]
pub struct InProcessExecutor {
    flows: RwLock<HashMap<String, Arc<FlowFn>>>,
}

impl InProcessExecutor {
    /// Create an executor with no registered flows
    pub fn new() -> Self {
        Self::default()
    }

    /// Register flow code under a flow reference, replacing any previous
    /// registration
    pub async fn register<F, Fut>(&self, flow_ref: impl Into<String>, flow: F)
    where
        F: Fn(FlowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult> + Send + 'static,
    {
        let flow_ref = flow_ref.into();
        let wrapped: Arc<FlowFn> = Arc::new(move |ctx| Box::pin(flow(ctx)));
        let mut flows = self.flows.write().await;
        flows.insert(flow_ref, wrapped);
    }
}

#[async_trait]
impl RunExecutor for InProcessExecutor {
    async fn launch(
        &self,
        flow_ref: &FlowRef,
        run_id: &RunId,
        parameters: &Parameters,
    ) -> Result<Box<dyn RunHandle>, CoreError> {
        let flow = {
            let flows = self.flows.read().await;
            flows.get(&flow_ref.0).cloned().ok_or_else(|| {
                CoreError::ExecutionFailure(format!("no flow registered for {}", flow_ref))
            })?
        };

        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let context = FlowContext {
            run_id: run_id.clone(),
            parameters: parameters.clone(),
            logs: log_tx,
        };

        debug!(run_id = %run_id, flow = %flow_ref, "launching in-process execution");
        let task = tokio::spawn(flow(context));

        Ok(Box::new(InProcessHandle {
            task: Some(task),
            logs: log_rx,
            outcome: None,
        }))
    }
}

/// Handle to one spawned flow task
struct InProcessHandle {
    task: Option<JoinHandle<FlowResult>>,
    logs: mpsc::UnboundedReceiver<String>,
    outcome: Option<ExecutionStatus>,
}

#[async_trait]
impl RunHandle for InProcessHandle {
    async fn poll(&mut self) -> Result<ExecutionStatus, CoreError> {
        if let Some(outcome) = &self.outcome {
            return Ok(outcome.clone());
        }

        let finished = self.task.as_ref().map_or(false, |t| t.is_finished());
        if !finished {
            return Ok(ExecutionStatus::Running);
        }

        let task = self.task.take().ok_or_else(|| {
            CoreError::ExecutionFailure("execution task already consumed".to_string())
        })?;

        let outcome = match task.await {
            Ok(Ok(payload)) => ExecutionStatus::Completed(payload),
            Ok(Err(message)) => ExecutionStatus::Failed(message),
            Err(join_error) if join_error.is_cancelled() => {
                ExecutionStatus::Failed("execution terminated".to_string())
            }
            Err(join_error) => ExecutionStatus::Failed(format!("flow panicked: {}", join_error)),
        };

        self.outcome = Some(outcome.clone());
        Ok(outcome)
    }

    async fn terminate(&mut self) -> Result<(), CoreError> {
        if let Some(task) = self.task.take() {
            task.abort();
            self.outcome = Some(ExecutionStatus::Failed("execution terminated".to_string()));
        }
        Ok(())
    }

    fn try_next_log(&mut self) -> Option<String> {
        self.logs.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn test_parameters() -> Parameters {
        Parameters::from_pairs([("source_url", json!("https://example.com/v"))])
    }

    #[tokio::test]
    async fn test_launch_unregistered_flow_fails() {
        let executor = InProcessExecutor::new();
        let result = executor
            .launch(
                &FlowRef::from("flows.missing"),
                &RunId::generate(),
                &Parameters::new(),
            )
            .await;
        assert!(matches!(result, Err(CoreError::ExecutionFailure(_))));
    }

    #[tokio::test]
    async fn test_flow_completes_with_result() {
        let executor = InProcessExecutor::new();
        executor
            .register("flows.echo", |ctx: FlowContext| async move {
                let url: String = ctx.param("source_url")?;
                Ok(Payload::from_string(&url))
            })
            .await;

        let mut handle = executor
            .launch(
                &FlowRef::from("flows.echo"),
                &RunId::generate(),
                &test_parameters(),
            )
            .await
            .unwrap();

        let status = loop {
            match handle.poll().await.unwrap() {
                ExecutionStatus::Running => tokio::time::sleep(Duration::from_millis(5)).await,
                status => break status,
            }
        };
        assert_eq!(
            status,
            ExecutionStatus::Completed(Payload::from_string("https://example.com/v"))
        );
    }

    #[tokio::test]
    async fn test_flow_failure_is_reported() {
        let executor = InProcessExecutor::new();
        executor
            .register("flows.broken", |_ctx: FlowContext| async move {
                Err("connection reset".to_string())
            })
            .await;

        let mut handle = executor
            .launch(
                &FlowRef::from("flows.broken"),
                &RunId::generate(),
                &Parameters::new(),
            )
            .await
            .unwrap();

        let status = loop {
            match handle.poll().await.unwrap() {
                ExecutionStatus::Running => tokio::time::sleep(Duration::from_millis(5)).await,
                status => break status,
            }
        };
        assert_eq!(
            status,
            ExecutionStatus::Failed("connection reset".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_parameter_fails_flow() {
        let executor = InProcessExecutor::new();
        executor
            .register("flows.echo", |ctx: FlowContext| async move {
                let url: String = ctx.param("source_url")?;
                Ok(Payload::from_string(&url))
            })
            .await;

        let mut handle = executor
            .launch(
                &FlowRef::from("flows.echo"),
                &RunId::generate(),
                &Parameters::new(),
            )
            .await
            .unwrap();

        let status = loop {
            match handle.poll().await.unwrap() {
                ExecutionStatus::Running => tokio::time::sleep(Duration::from_millis(5)).await,
                status => break status,
            }
        };
        assert!(matches!(status, ExecutionStatus::Failed(_)));
    }

    #[tokio::test]
    async fn test_terminate_aborts_task() {
        let executor = InProcessExecutor::new();
        executor
            .register("flows.stuck", |_ctx: FlowContext| async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Payload::null())
            })
            .await;

        let mut handle = executor
            .launch(
                &FlowRef::from("flows.stuck"),
                &RunId::generate(),
                &Parameters::new(),
            )
            .await
            .unwrap();

        assert_eq!(handle.poll().await.unwrap(), ExecutionStatus::Running);
        handle.terminate().await.unwrap();
        assert!(matches!(
            handle.poll().await.unwrap(),
            ExecutionStatus::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_log_lines_are_drained() {
        let executor = InProcessExecutor::new();
        executor
            .register("flows.chatty", |ctx: FlowContext| async move {
                ctx.log("downloading");
                ctx.log("uploading");
                Ok(Payload::null())
            })
            .await;

        let mut handle = executor
            .launch(
                &FlowRef::from("flows.chatty"),
                &RunId::generate(),
                &Parameters::new(),
            )
            .await
            .unwrap();

        loop {
            match handle.poll().await.unwrap() {
                ExecutionStatus::Running => tokio::time::sleep(Duration::from_millis(5)).await,
                _ => break,
            }
        }

        assert_eq!(handle.try_next_log().as_deref(), Some("downloading"));
        assert_eq!(handle.try_next_log().as_deref(), Some("uploading"));
        assert_eq!(handle.try_next_log(), None);
    }
}
