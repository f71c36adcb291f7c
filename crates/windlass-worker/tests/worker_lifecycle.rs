//! End-to-end lifecycle tests: runtime, workers, executor, and reaper
//! wired over the in-memory catalogue.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::watch;

use windlass_core::{
    Backoff, CancelOutcome, CoreError, DeploymentName, ExecutorKind, FlowRef, FlowRun, Parameters,
    Payload, PoolName, RetryPolicy, RunId, RunState, RuntimeInterface, TriggerClient,
    WorkerIdentity,
};
use windlass_state_inmemory::InMemoryStateStoreProvider;
use windlass_worker::{FlowContext, InProcessExecutor, Reaper, ReaperConfig, Worker, WorkerConfig};

const WAIT_BUDGET: Duration = Duration::from_secs(10);

fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(10),
        heartbeat_interval: Duration::from_millis(20),
        execution_poll_interval: Duration::from_millis(5),
        run_timeout: None,
    }
}

/// Retry policy with a deterministic, near-immediate backoff
fn fast_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff: Backoff {
            initial_delay_ms: 10,
            factor: 1.0,
            max_delay_ms: 50,
            jitter: false,
        },
    }
}

struct Harness {
    provider: InMemoryStateStoreProvider,
    runtime: RuntimeInterface,
    executor: Arc<InProcessExecutor>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Harness {
    fn new() -> Self {
        let provider = InMemoryStateStoreProvider::new();
        let runtime = RuntimeInterface::create_with_repositories(
            provider.work_pools(),
            provider.deployments(),
            provider.flow_runs(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            provider,
            runtime,
            executor: Arc::new(InProcessExecutor::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    async fn create_pool(&self, name: &str, limit: Option<u32>) {
        self.runtime
            .create_pool(PoolName::from(name), ExecutorKind::Process, limit)
            .await
            .unwrap();
    }

    async fn register(&self, deployment: &str, flow: &str, pool: &str, policy: RetryPolicy) {
        self.runtime
            .register_deployment(
                DeploymentName::from(deployment),
                FlowRef::from(flow),
                PoolName::from(pool),
                Parameters::new(),
                policy,
                false,
            )
            .await
            .unwrap();
    }

    fn spawn_worker(&self, pool: &str, config: WorkerConfig) {
        let worker = Arc::new(Worker::new(
            PoolName::from(pool),
            self.provider.deployments(),
            self.provider.flow_runs(),
            self.executor.clone(),
            config,
        ));
        tokio::spawn(worker.run(self.shutdown_rx.clone()));
    }

    async fn run_deployment(&self, deployment: &str, overrides: Parameters) -> RunId {
        self.runtime
            .run_deployment(&DeploymentName::from(deployment), overrides)
            .await
            .unwrap()
    }

    async fn wait_until(&self, id: &RunId, state: RunState) -> FlowRun {
        let deadline = tokio::time::Instant::now() + WAIT_BUDGET;
        loop {
            let run = self.runtime.get_run(id).await.unwrap();
            if run.state == state {
                return run;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "run {} stuck in {} waiting for {}",
                id,
                run.state,
                state
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[tokio::test]
async fn test_run_completes_with_result() {
    let h = Harness::new();
    h.create_pool("downloads", None).await;
    h.register(
        "video-download/local",
        "flows.download_video",
        "downloads",
        RetryPolicy::no_retries(),
    )
    .await;
    h.executor
        .register("flows.download_video", |ctx: FlowContext| async move {
            let url: String = ctx.param("source_url")?;
            ctx.log(format!("downloading {}", url));
            Ok(Payload::from_string("media/abc/video.mp4"))
        })
        .await;
    h.spawn_worker("downloads", fast_worker_config());

    let id = h
        .run_deployment(
            "video-download/local",
            Parameters::from_pairs([("source_url", json!("https://example.com/v"))]),
        )
        .await;

    let run = h.wait_until(&id, RunState::Completed).await;
    assert_eq!(
        run.result,
        Some(Payload::from_string("media/abc/video.mp4"))
    );
    assert_eq!(run.attempt_count, 1);
    assert_eq!(
        run.history_states(),
        vec![
            RunState::Scheduled,
            RunState::Pending,
            RunState::Running,
            RunState::Completed
        ]
    );
    assert!(run.started_at.is_some());
    assert!(run.ended_at.is_some());
    assert!(run.worker.is_some());

    h.shutdown();
}

#[tokio::test]
async fn test_pool_limit_serializes_execution() {
    let h = Harness::new();
    h.create_pool("downloads", Some(1)).await;
    h.register(
        "video-download/local",
        "flows.download_video",
        "downloads",
        RetryPolicy::no_retries(),
    )
    .await;

    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    {
        let active = active.clone();
        let max_active = max_active.clone();
        h.executor
            .register("flows.download_video", move |_ctx: FlowContext| {
                let active = active.clone();
                let max_active = max_active.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(Payload::null())
                }
            })
            .await;
    }

    // Two workers racing over the same pool must still respect the limit.
    h.spawn_worker("downloads", fast_worker_config());
    h.spawn_worker("downloads", fast_worker_config());

    let first = h.run_deployment("video-download/local", Parameters::new()).await;
    let second = h.run_deployment("video-download/local", Parameters::new()).await;

    h.wait_until(&first, RunState::Completed).await;
    h.wait_until(&second, RunState::Completed).await;

    assert_eq!(max_active.load(Ordering::SeqCst), 1);

    h.shutdown();
}

#[tokio::test]
async fn test_failed_run_retries_until_success() {
    let h = Harness::new();
    h.create_pool("downloads", None).await;
    h.register(
        "video-download/local",
        "flows.download_video",
        "downloads",
        fast_retries(3),
    )
    .await;

    let failures = Arc::new(AtomicU32::new(0));
    {
        let failures = failures.clone();
        h.executor
            .register("flows.download_video", move |_ctx: FlowContext| {
                let failures = failures.clone();
                async move {
                    if failures.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("connection reset".to_string())
                    } else {
                        Ok(Payload::from_string("media/abc/video.mp4"))
                    }
                }
            })
            .await;
    }
    h.spawn_worker("downloads", fast_worker_config());

    let id = h.run_deployment("video-download/local", Parameters::new()).await;
    let run = h.wait_until(&id, RunState::Completed).await;

    assert_eq!(run.attempt_count, 3);
    assert!(run.error.is_none());

    let states = run.history_states();
    let retry_edges = states
        .windows(2)
        .filter(|w| w[0] == RunState::Failed && w[1] == RunState::Scheduled)
        .count();
    assert_eq!(retry_edges, 2);

    h.shutdown();
}

#[tokio::test]
async fn test_retry_budget_exhaustion_leaves_run_failed() {
    let h = Harness::new();
    h.create_pool("downloads", None).await;
    h.register(
        "video-download/local",
        "flows.download_video",
        "downloads",
        fast_retries(2),
    )
    .await;
    h.executor
        .register("flows.download_video", |_ctx: FlowContext| async move {
            Err("host unreachable".to_string())
        })
        .await;
    h.spawn_worker("downloads", fast_worker_config());

    let id = h.run_deployment("video-download/local", Parameters::new()).await;

    // Wait past the retry cycle: Failed with attempts exhausted is final.
    let deadline = tokio::time::Instant::now() + WAIT_BUDGET;
    let run = loop {
        let run = h.runtime.get_run(&id).await.unwrap();
        if run.state == RunState::Failed && run.attempt_count == 2 {
            break run;
        }
        assert!(tokio::time::Instant::now() < deadline, "retries never exhausted");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    // Give any stray retry task time to (wrongly) re-schedule, then
    // confirm the run stayed Failed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = h.runtime.get_run(&id).await.unwrap();
    assert_eq!(settled.state, RunState::Failed);
    assert_eq!(settled.error.as_deref(), Some("host unreachable"));
    assert_eq!(settled.attempt_count, run.attempt_count);

    h.shutdown();
}

#[tokio::test]
async fn test_run_exceeding_time_budget_crashes() {
    let h = Harness::new();
    h.create_pool("downloads", None).await;
    h.register(
        "video-download/local",
        "flows.download_video",
        "downloads",
        RetryPolicy::no_retries(),
    )
    .await;
    h.executor
        .register("flows.download_video", |_ctx: FlowContext| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Payload::null())
        })
        .await;

    let mut config = fast_worker_config();
    config.run_timeout = Some(Duration::from_millis(100));
    h.spawn_worker("downloads", config);

    let id = h.run_deployment("video-download/local", Parameters::new()).await;
    let run = h.wait_until(&id, RunState::Crashed).await;
    assert_eq!(run.error.as_deref(), Some("run exceeded its time budget"));

    h.shutdown();
}

#[tokio::test]
async fn test_cancel_running_run_lands_cancelled() {
    let h = Harness::new();
    h.create_pool("downloads", None).await;
    h.register(
        "video-download/local",
        "flows.download_video",
        "downloads",
        RetryPolicy::no_retries(),
    )
    .await;
    h.executor
        .register("flows.download_video", |_ctx: FlowContext| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Payload::null())
        })
        .await;
    h.spawn_worker("downloads", fast_worker_config());

    let id = h.run_deployment("video-download/local", Parameters::new()).await;
    h.wait_until(&id, RunState::Running).await;

    let outcome = h.runtime.cancel_run(&id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Flagged);

    let run = h.wait_until(&id, RunState::Cancelled).await;
    assert!(run.cancel_requested);
    assert!(run.ended_at.is_some());

    h.shutdown();
}

#[tokio::test]
async fn test_cancel_scheduled_run_is_immediate() {
    let h = Harness::new();
    h.create_pool("downloads", None).await;
    h.register(
        "video-download/local",
        "flows.download_video",
        "downloads",
        RetryPolicy::no_retries(),
    )
    .await;
    // No worker: the run stays Scheduled.

    let id = h.run_deployment("video-download/local", Parameters::new()).await;
    let outcome = h.runtime.cancel_run(&id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled);

    let (state, _) = h.runtime.get_run_state(&id).await.unwrap();
    assert_eq!(state, RunState::Cancelled);
}

#[tokio::test]
async fn test_paused_pool_defers_execution_until_resume() {
    let h = Harness::new();
    h.create_pool("downloads", None).await;
    h.register(
        "video-download/local",
        "flows.download_video",
        "downloads",
        RetryPolicy::no_retries(),
    )
    .await;
    h.executor
        .register("flows.download_video", |_ctx: FlowContext| async move {
            Ok(Payload::null())
        })
        .await;
    h.spawn_worker("downloads", fast_worker_config());

    h.runtime
        .pause_pool(&PoolName::from("downloads"))
        .await
        .unwrap();

    let id = h.run_deployment("video-download/local", Parameters::new()).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    let (state, _) = h.runtime.get_run_state(&id).await.unwrap();
    assert_eq!(state, RunState::Scheduled);

    h.runtime
        .resume_pool(&PoolName::from("downloads"))
        .await
        .unwrap();
    h.wait_until(&id, RunState::Completed).await;

    h.shutdown();
}

#[tokio::test]
async fn test_trigger_and_await_child_failure_fails_parent() {
    let h = Harness::new();
    h.create_pool("downloads", None).await;
    h.create_pool("processing", None).await;
    h.register(
        "audio-extraction/local",
        "flows.extract_audio",
        "processing",
        RetryPolicy::no_retries(),
    )
    .await;
    h.register(
        "video-pipeline/local",
        "flows.video_pipeline",
        "downloads",
        RetryPolicy::no_retries(),
    )
    .await;

    h.executor
        .register("flows.extract_audio", |_ctx: FlowContext| async move {
            Err("codec not supported".to_string())
        })
        .await;

    let trigger = TriggerClient::new(h.runtime.scheduler())
        .with_poll_interval(Duration::from_millis(10));
    {
        let trigger = trigger.clone();
        h.executor
            .register("flows.video_pipeline", move |ctx: FlowContext| {
                let trigger = trigger.clone();
                async move {
                    let audio = trigger
                        .trigger_and_await(
                            &DeploymentName::from("audio-extraction/local"),
                            Parameters::new(),
                            Some(ctx.run_id.clone()),
                        )
                        .await
                        .map_err(|e| e.to_string())?;
                    Ok(audio)
                }
            })
            .await;
    }

    h.spawn_worker("downloads", fast_worker_config());
    h.spawn_worker("processing", fast_worker_config());

    let id = h.run_deployment("video-pipeline/local", Parameters::new()).await;
    let parent = h.wait_until(&id, RunState::Failed).await;

    let error = parent.error.expect("parent records the child failure");
    assert!(error.contains("ended in state Failed"), "got: {}", error);

    // The child is linked back to the parent and failed on its own terms.
    let children = h
        .runtime
        .list_runs(Some(&PoolName::from("processing")), None)
        .await
        .unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].state, RunState::Failed);
    let child = h
        .runtime
        .get_run(&RunId(children[0].id.clone()))
        .await
        .unwrap();
    assert_eq!(child.parent_run_id, Some(id));

    h.shutdown();
}

#[tokio::test]
async fn test_pipeline_parent_collects_child_results() {
    let h = Harness::new();
    h.create_pool("downloads", None).await;
    h.create_pool("processing", None).await;
    h.register(
        "video-download/local",
        "flows.download_video",
        "downloads",
        RetryPolicy::no_retries(),
    )
    .await;
    h.register(
        "audio-extraction/local",
        "flows.extract_audio",
        "processing",
        RetryPolicy::no_retries(),
    )
    .await;
    h.register(
        "video-pipeline/local",
        "flows.video_pipeline",
        "downloads",
        RetryPolicy::no_retries(),
    )
    .await;

    h.executor
        .register("flows.download_video", |_ctx: FlowContext| async move {
            Ok(Payload::from_string("media/abc/video.mp4"))
        })
        .await;
    h.executor
        .register("flows.extract_audio", |ctx: FlowContext| async move {
            let video: String = ctx.param("video_path")?;
            Ok(Payload::from_string(&video.replace("video.mp4", "audio.m4a")))
        })
        .await;

    let trigger = TriggerClient::new(h.runtime.scheduler())
        .with_poll_interval(Duration::from_millis(10));
    {
        let trigger = trigger.clone();
        h.executor
            .register("flows.video_pipeline", move |ctx: FlowContext| {
                let trigger = trigger.clone();
                async move {
                    let video = trigger
                        .trigger_and_await(
                            &DeploymentName::from("video-download/local"),
                            ctx.parameters.clone(),
                            Some(ctx.run_id.clone()),
                        )
                        .await
                        .map_err(|e| e.to_string())?;
                    let video_path = video.as_str().ok_or("download returned no path")?;

                    let audio = trigger
                        .trigger_and_await(
                            &DeploymentName::from("audio-extraction/local"),
                            Parameters::from_pairs([("video_path", json!(video_path))]),
                            Some(ctx.run_id.clone()),
                        )
                        .await
                        .map_err(|e| e.to_string())?;

                    Payload::from(&json!({
                        "video": video_path,
                        "audio": audio.as_value(),
                    }))
                    .map_err(|e| e.to_string())
                }
            })
            .await;
    }

    h.spawn_worker("downloads", fast_worker_config());
    h.spawn_worker("processing", fast_worker_config());

    let id = h.run_deployment("video-pipeline/local", Parameters::new()).await;
    let parent = h.wait_until(&id, RunState::Completed).await;

    let result = parent.result.expect("pipeline produces a result");
    assert_eq!(result.as_value()["video"], "media/abc/video.mp4");
    assert_eq!(result.as_value()["audio"], "media/abc/audio.m4a");

    h.shutdown();
}

#[tokio::test]
async fn test_reaper_releases_stale_claim_and_frees_pool_slot() {
    let h = Harness::new();
    h.create_pool("downloads", Some(1)).await;
    h.register(
        "video-download/local",
        "flows.download_video",
        "downloads",
        RetryPolicy::no_retries(),
    )
    .await;

    // A worker claims and dies before starting the execution.
    let runs = h.provider.flow_runs();
    let abandoned = h.run_deployment("video-download/local", Parameters::new()).await;
    runs.claim_scheduled(&abandoned, &WorkerIdentity::from("worker-dead"))
        .await
        .unwrap();

    // The dead claim holds the pool's only slot.
    let blocked = h.run_deployment("video-download/local", Parameters::new()).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    let claim = runs
        .claim_scheduled(&blocked, &WorkerIdentity::from("worker-live"))
        .await;
    assert!(matches!(claim, Err(CoreError::PoolAtCapacity(_))));

    let reaper = Reaper::new(
        h.provider.flow_runs(),
        ReaperConfig {
            scan_interval: Duration::from_millis(10),
            liveness_threshold: Duration::from_millis(50),
        },
    );
    let acted = reaper.scan_once().await.unwrap();
    assert_eq!(acted, 1);

    // The abandoned run went back on the pool, unowned, with the slot
    // freed for either run to claim.
    let released = h.runtime.get_run(&abandoned).await.unwrap();
    assert_eq!(released.state, RunState::Scheduled);
    assert!(released.worker.is_none());
    assert_eq!(released.attempt_count, 1);

    let claimed = runs
        .claim_scheduled(&blocked, &WorkerIdentity::from("worker-live"))
        .await
        .unwrap();
    assert_eq!(claimed.state, RunState::Pending);
}

#[tokio::test]
async fn test_reaper_reenqueues_retry_stranded_by_dead_worker() {
    let h = Harness::new();
    h.create_pool("downloads", None).await;
    h.register(
        "video-download/local",
        "flows.download_video",
        "downloads",
        fast_retries(3),
    )
    .await;

    // Hand-drive a run to Failed with a retry deadline, as a worker that
    // dies during the backoff wait would leave it.
    let runs = h.provider.flow_runs();
    let worker = WorkerIdentity::from("worker-dead");
    let id = h.run_deployment("video-download/local", Parameters::new()).await;

    let mut run = runs.claim_scheduled(&id, &worker).await.unwrap();
    run.start().unwrap();
    runs.update_if_state(RunState::Pending, &run).await.unwrap();
    run.fail("connection reset").unwrap();
    run.schedule_retry(chrono::Utc::now());
    runs.update_if_state(RunState::Running, &run).await.unwrap();

    let reaper = Reaper::new(
        h.provider.flow_runs(),
        ReaperConfig {
            scan_interval: Duration::from_millis(10),
            liveness_threshold: Duration::from_millis(50),
        },
    );

    // Within the grace period the retry still belongs to its worker.
    assert_eq!(reaper.scan_once().await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(reaper.scan_once().await.unwrap(), 1);

    let retried = h.runtime.get_run(&id).await.unwrap();
    assert_eq!(retried.state, RunState::Scheduled);
    assert_eq!(retried.attempt_count, 2);
    assert!(retried.retry_at.is_none());

    // A live worker picks the re-enqueued run up and finishes it.
    h.executor
        .register("flows.download_video", |_ctx: FlowContext| async move {
            Ok(Payload::from_string("media/abc/video.mp4"))
        })
        .await;
    h.spawn_worker("downloads", fast_worker_config());
    let run = h.wait_until(&id, RunState::Completed).await;
    assert_eq!(run.attempt_count, 2);

    h.shutdown();
}

#[tokio::test]
async fn test_reaper_crashes_stale_run_and_spares_live_one() {
    let h = Harness::new();
    h.create_pool("downloads", None).await;
    h.register(
        "video-download/local",
        "flows.download_video",
        "downloads",
        RetryPolicy::no_retries(),
    )
    .await;

    // Hand-drive two runs to Running without a worker behind them.
    let runs = h.provider.flow_runs();
    let dead_worker = WorkerIdentity::from("worker-dead");
    let live_worker = WorkerIdentity::from("worker-live");

    let stale_id = h.run_deployment("video-download/local", Parameters::new()).await;
    let live_id = h.run_deployment("video-download/local", Parameters::new()).await;

    for (id, worker) in [(&stale_id, &dead_worker), (&live_id, &live_worker)] {
        let mut run = runs.claim_scheduled(id, worker).await.unwrap();
        run.start().unwrap();
        runs.update_if_state(RunState::Pending, &run).await.unwrap();
    }

    let reaper = Reaper::new(
        h.provider.flow_runs(),
        ReaperConfig {
            scan_interval: Duration::from_millis(10),
            liveness_threshold: Duration::from_millis(50),
        },
    );

    // Let both heartbeats age past the threshold, then refresh only the
    // live one.
    tokio::time::sleep(Duration::from_millis(120)).await;
    runs.record_heartbeat(&live_id, &live_worker, chrono::Utc::now())
        .await
        .unwrap();

    let crashed = reaper.scan_once().await.unwrap();
    assert_eq!(crashed, 1);

    let stale = h.runtime.get_run(&stale_id).await.unwrap();
    assert_eq!(stale.state, RunState::Crashed);
    assert_eq!(stale.error.as_deref(), Some("worker heartbeat lost"));

    let live = h.runtime.get_run(&live_id).await.unwrap();
    assert_eq!(live.state, RunState::Running);
}
