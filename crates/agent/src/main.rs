//! Profiler agent
//!
//! Polls the profiler frontend for trigger settings, samples host CPU and
//! memory usage, captures a trace when a trigger fires and uploads it.

use anyhow::Result;
use profiler_lib::{
    aggregation::SystemTimeSource,
    alerting::TriggerEngine,
    health::{components, HealthRegistry},
    observability::{AgentMetrics, StructuredLogger},
    profiler::ProfilerService,
    sampling::{ProcSampleSource, SamplingLoopBuilder},
    service::ServiceProfilerClient,
    settings::ConfigPoller,
    upload::{LoggingIndexPublisher, UploadCoordinator},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod capture;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long shutdown waits for in-flight captures and uploads
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::AgentConfig::load()?;
    info!(machine_name = %config.machine_name, "Agent configured");

    let health_registry = HealthRegistry::new();
    for component in components::ALL {
        health_registry.register(component).await;
    }

    let metrics = AgentMetrics::new();
    let logger = StructuredLogger::new(config.machine_name.as_str());
    logger.log_startup(AGENT_VERSION, &config.endpoint);

    let retry = config.retry_policy();
    let client = Arc::new(ServiceProfilerClient::new(config.client_config())?);

    let uploader = Arc::new(
        UploadCoordinator::new(
            client.clone(),
            Arc::new(LoggingIndexPublisher),
            config.upload_config(),
            retry.clone(),
        )
        .with_health(health_registry.clone())
        .with_logger(logger.clone()),
    );

    let capture = Arc::new(capture::CommandCapture::new(
        config.capture_command.as_str(),
        config.target_pid(),
        config.trace_dir.clone(),
    ));
    let profiler = Arc::new(
        ProfilerService::new(capture, uploader, Handle::current())
            .with_health(health_registry.clone()),
    );

    let engine = Arc::new(
        TriggerEngine::new(config.engine_config(), profiler.clone(), Arc::new(SystemTimeSource))
            .with_logger(logger.clone()),
    );

    let poller = Arc::new(
        ConfigPoller::new(client, config.poller_config(), retry)
            .with_observer(engine.clone())
            .with_health(health_registry.clone())
            .with_logger(logger.clone()),
    );

    let sampling_config = config.sampling_config();
    let sampling_loop = SamplingLoopBuilder::new()
        .source(Arc::new(ProcSampleSource::new()))
        .engine(engine)
        .interval(sampling_config.interval)
        .jitter(sampling_config.jitter)
        .health(health_registry.clone())
        .build()?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let poller_handle = tokio::spawn(poller.run(shutdown_tx.subscribe()));
    let sampling_handle = tokio::spawn(sampling_loop.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    health_registry.set_ready(true).await;
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    let _ = shutdown_tx.send(());
    for handle in [poller_handle, sampling_handle] {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background task failed");
        }
    }

    if tokio::time::timeout(DRAIN_TIMEOUT, profiler.drain()).await.is_err() {
        warn!("Abandoning in-flight profiling work");
    }

    api_handle.abort();
    info!("Shutdown complete");

    Ok(())
}
