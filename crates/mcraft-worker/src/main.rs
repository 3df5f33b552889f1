//! MediaCraft processing worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcraft_engines::{EngineSettings, MergeEngine, WatermarkEngine};
use mcraft_models::TaskKind;
use mcraft_scheduler::{Scheduler, SchedulerConfig};
use mcraft_store::JsonFileStore;
use mcraft_worker::WorkerConfig;

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("mcraft=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting mcraft-worker");

    let worker_config = WorkerConfig::from_env();
    let scheduler_config = SchedulerConfig::from_env();
    info!("Worker config: {:?}", worker_config);
    info!("Scheduler config: {:?}", scheduler_config);

    // The engines shell out to the transcoder; fail fast when it's absent
    if let Err(e) = mcraft_media::check_ffmpeg() {
        error!("FFmpeg check failed: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = mcraft_media::check_ffprobe() {
        error!("FFprobe check failed: {}", e);
        std::process::exit(1);
    }

    let store = match JsonFileStore::open(&worker_config.data_dir).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open task store: {}", e);
            std::process::exit(1);
        }
    };

    let scheduler = Scheduler::new(scheduler_config, store);

    let engine_settings =
        EngineSettings::new(&worker_config.work_dir, &worker_config.results_dir);
    scheduler.register_engine(
        TaskKind::WatermarkRemoval,
        Arc::new(WatermarkEngine::new(engine_settings.clone())),
    );
    scheduler.register_engine(
        TaskKind::VideoMerge,
        Arc::new(MergeEngine::new(engine_settings)),
    );

    scheduler.start();
    info!("Worker ready");

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");

    scheduler.shutdown().await;
    info!("Worker shutdown complete");
}
