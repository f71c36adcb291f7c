//! Demo: a two-stage media pipeline on the Windlass runtime
//!
//! Wires the in-memory catalogue, two work pools with workers, a reaper,
//! and three deployments: a download flow, an audio-extraction flow, and
//! a pipeline flow that triggers the other two and combines their
//! results.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::info;

use windlass_core::{
    resolve_as, Backoff, DeploymentName, ExecutorKind, FlowRef, Parameters, Payload, PoolName,
    RetryPolicy, RuntimeInterface, TriggerClient,
};
use windlass_state_inmemory::{InMemoryConfigResolver, InMemoryStateStoreProvider};
use windlass_worker::{
    FlowContext, InProcessExecutor, Reaper, ReaperConfig, Worker, WorkerConfig,
};

/// Endpoint settings for the demo's pretend media store
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MediaStoreSettings {
    endpoint: String,
    bucket: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Catalogue, runtime interface, and named configuration.
    let provider = InMemoryStateStoreProvider::new();
    let runtime = RuntimeInterface::create_with_repositories(
        provider.work_pools(),
        provider.deployments(),
        provider.flow_runs(),
    );

    let resolver = Arc::new(InMemoryConfigResolver::new());
    resolver
        .register_typed(
            "local-media-store",
            &MediaStoreSettings {
                endpoint: "http://localhost:9000".to_string(),
                bucket: "assets".to_string(),
            },
        )
        .await
        .context("registering media store settings")?;

    // Downloads are serialized; processing runs freely.
    runtime
        .create_pool(PoolName::from("downloads"), ExecutorKind::Process, Some(1))
        .await?;
    runtime
        .create_pool(PoolName::from("processing"), ExecutorKind::Process, None)
        .await?;

    runtime
        .register_deployment(
            DeploymentName::from("video-download/local"),
            FlowRef::from("flows.download_video"),
            PoolName::from("downloads"),
            Parameters::from_pairs([("quality", json!("1080p"))]),
            RetryPolicy {
                max_attempts: 3,
                backoff: Backoff {
                    initial_delay_ms: 200,
                    factor: 2.0,
                    max_delay_ms: 2_000,
                    jitter: true,
                },
            },
            true,
        )
        .await?;
    runtime
        .register_deployment(
            DeploymentName::from("audio-extraction/local"),
            FlowRef::from("flows.extract_audio"),
            PoolName::from("processing"),
            Parameters::new(),
            RetryPolicy::no_retries(),
            true,
        )
        .await?;
    runtime
        .register_deployment(
            DeploymentName::from("video-pipeline/local"),
            FlowRef::from("flows.video_pipeline"),
            PoolName::from("processing"),
            Parameters::new(),
            RetryPolicy::no_retries(),
            true,
        )
        .await?;

    // Flow code.
    let executor = Arc::new(InProcessExecutor::new());

    {
        let resolver = resolver.clone();
        executor
            .register("flows.download_video", move |ctx: FlowContext| {
                let resolver = resolver.clone();
                async move {
                    let store: MediaStoreSettings = resolve_as(resolver.as_ref(), "local-media-store")
                        .await
                        .map_err(|e| e.to_string())?;
                    let url: String = ctx.param("source_url")?;
                    let quality: String = ctx.param("quality")?;

                    ctx.log(format!("downloading {} at {}", url, quality));
                    tokio::time::sleep(Duration::from_millis(300)).await;

                    Ok(Payload::from_string(&format!(
                        "{}/{}/media/{}/video.mp4",
                        store.endpoint,
                        store.bucket,
                        ctx.run_id
                    )))
                }
            })
            .await;
    }

    executor
        .register("flows.extract_audio", |ctx: FlowContext| async move {
            let video_path: String = ctx.param("video_path")?;
            ctx.log(format!("extracting audio from {}", video_path));
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Payload::from_string(
                &video_path.replace("video.mp4", "audio.m4a"),
            ))
        })
        .await;

    let trigger =
        TriggerClient::new(runtime.scheduler()).with_poll_interval(Duration::from_millis(50));
    {
        let trigger = trigger.clone();
        executor
            .register("flows.video_pipeline", move |ctx: FlowContext| {
                let trigger = trigger.clone();
                async move {
                    ctx.log("pipeline: requesting download");
                    let video = trigger
                        .trigger_and_await(
                            &DeploymentName::from("video-download/local"),
                            ctx.parameters.clone(),
                            Some(ctx.run_id.clone()),
                        )
                        .await
                        .map_err(|e| e.to_string())?;
                    let video_path = video.as_str().ok_or("download returned no path")?;

                    ctx.log("pipeline: requesting audio extraction");
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

    // Workers and the reaper.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    for pool in ["downloads", "processing"] {
        let worker = Arc::new(Worker::new(
            PoolName::from(pool),
            provider.deployments(),
            provider.flow_runs(),
            executor.clone(),
            WorkerConfig::default(),
        ));
        tokio::spawn(worker.run(shutdown_rx.clone()));
    }
    let reaper = Arc::new(Reaper::new(provider.flow_runs(), ReaperConfig::default()));
    tokio::spawn(reaper.run(shutdown_rx.clone()));

    // Kick off the pipeline and wait for its result.
    let run_id = runtime
        .run_deployment(
            &DeploymentName::from("video-pipeline/local"),
            Parameters::from_pairs([("source_url", json!("https://example.com/v/42"))]),
        )
        .await?;
    info!(run_id = %run_id, "pipeline run submitted");

    let result = trigger.await_terminal(&run_id).await?;
    info!(result = %result.as_value(), "pipeline finished");

    for summary in runtime.list_runs(None, None).await? {
        info!(
            run = %summary.id,
            deployment = %summary.deployment,
            pool = %summary.pool,
            state = ?summary.state,
            attempts = summary.attempt_count,
            "final run state"
        );
    }

    shutdown_tx.send(true).ok();
    Ok(())
}
