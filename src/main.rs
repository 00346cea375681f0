use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use algo_server::api::{AppState, routes};
use algo_server::config::ServerConfig;
use algo_server::host::SystemMemorySampler;
use algo_server::jobs::{AlgorithmJob, CommandKernel};
use algo_server::report::{ErrorKind, ModuleInfo, ServerFault};
use algo_server::store::{
    ArtifactStore, LocalArtifactStore, RedisCrashNotifier, RedisStatusStore, S3ArtifactStore,
    StatusStore,
};
use algo_server::worker::crash::{self, CrashSweep};
use algo_server::worker::{
    AdmissionController, ContextFactory, ContextSettings, MemoryCeiling, Scheduler, TaskRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, warnings) = ServerConfig::from_env();
    let _log_guard = init_tracing(config.log_dir.as_deref());

    for warning in &warnings {
        let fault = ServerFault::new(ErrorKind::ConfigParse, 1, warning.to_string());
        warn!(key = warning.key(), "{}", fault.log_message());
    }

    let module = ModuleInfo::algorithms_server();
    info!(
        "Algorithms server v{} ({} / {})",
        module.version, module.module_code, module.module_name
    );
    info!(config = %config.dump(), "Configuration loaded");

    // ── Stores ───────────────────────────────────────────────────────────
    let status: Arc<dyn StatusStore> = Arc::new(
        RedisStatusStore::new(&config.redis).context("Invalid Redis settings")?,
    );
    let artifacts: Arc<dyn ArtifactStore> = match &config.artifacts.local_root {
        Some(root) => {
            info!(root = %root.display(), "Using local artifact store");
            Arc::new(LocalArtifactStore::new(root))
        }
        None => Arc::new(S3ArtifactStore::from_config(&config.artifacts).await),
    };

    // ── Scheduler ────────────────────────────────────────────────────────
    let registry = Arc::new(TaskRegistry::new());
    let ceiling = MemoryCeiling::from_fraction(config.max_memory_usage_pct);
    if !config.memory_check_enabled() {
        warn!("Memory check disabled");
    }
    let admission = AdmissionController::new(
        Arc::clone(&registry),
        Arc::new(SystemMemorySampler::new()),
        ceiling,
    );
    let contexts = ContextFactory::new(status, artifacts, ContextSettings::from_config(&config));
    let scheduler = Arc::new(Scheduler::new(
        admission,
        contexts,
        config.scheduler_tick,
        config.max_concurrent_tasks,
    ));
    let scheduler_handle = Arc::clone(&scheduler).spawn();

    // ── Crash handler ────────────────────────────────────────────────────
    let notifier = RedisCrashNotifier::new(&config.redis).context("Failed to prepare crash notifier")?;
    crash::install(CrashSweep::new(Arc::clone(&registry), Arc::new(notifier)))
        .context("Failed to install crash handler")?;

    // ── HTTP ─────────────────────────────────────────────────────────────
    let kernel = CommandKernel::new(config.algorithm_command.clone());
    let port = config.web_server_port;
    let state = AppState {
        scheduler,
        algorithm: Arc::new(AlgorithmJob::new(Arc::new(kernel))),
        algorithm_memory_estimate: config.algorithm_memory_estimate,
        config: Arc::new(config),
        module,
    };
    let app = routes(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;
    info!(port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    scheduler_handle.abort();
    info!("Shut down");
    Ok(())
}

/// Stderr logging, plus a daily-rolling file when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let mut file_error = None;
    let (file_layer, guard) = match log_dir.map(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("algo-server")
            .filename_suffix("log")
            .build(dir)
    }) {
        Some(Ok(appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        Some(Err(e)) => {
            file_error = Some(e);
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        error!(error = %e, "Failed to open log directory, logging to stderr only");
    }
    guard
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
