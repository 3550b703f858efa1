//! ANPR Dashboard
//!
//! Main entry point: loads settings, wires the detection pipeline and camera
//! streams, and serves the status API until Ctrl-C.

use anpr_dashboard::{
    config_store::ConfigStore,
    connection_notifier::ConnectionNotifier,
    detection_pipeline::DetectionPipeline,
    detection_source::{DetectionSource, HttpDetectionSource},
    event_log_service::EventLogService,
    event_sink,
    image_resolver::HttpImageFetcher,
    plate_launcher::PlateLauncher,
    polling_orchestrator::{PollingConfig, PollingOrchestrator},
    snapshot_service::SnapshotService,
    state::{AppConfig, AppState},
    stream_manager::{FfmpegBackend, StreamManager},
    web_api,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "anpr-dashboard", version, about)]
struct Cli {
    /// Settings file. Defaults to ANPR_SETTINGS or ./appsettings.json
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Bind host. Defaults to HOST or 0.0.0.0
    #[arg(long)]
    host: Option<String>,
    /// Bind port. Defaults to PORT or 8080
    #[arg(long)]
    port: Option<u16>,
    /// Do not start the external plate recogniser
    #[arg(long)]
    no_launch: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anpr_dashboard=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ANPR dashboard v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let mut config = AppConfig::default();
    if let Some(path) = cli.settings {
        config.settings_path = path;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    config.launch_recogniser = !cli.no_launch;

    // Settings
    let settings = Arc::new(ConfigStore::load(&config.settings_path)?);
    settings.validate()?;
    let app_settings = settings.settings();
    tracing::info!(
        api_url = %app_settings.api_url,
        api_base_url = %app_settings.api_base_url,
        interval_sec = settings.polling_interval().as_secs(),
        cameras = settings.cameras().len(),
        "Configuration loaded"
    );

    // Event sink and its single consumer
    let (sink, sink_rx) = event_sink::channel();
    let sink = Arc::new(sink);
    let event_log = Arc::new(EventLogService::new(config.recent_capacity));
    let event_log_task = event_log.clone().spawn(sink_rx);

    let notifier = Arc::new(ConnectionNotifier::new(sink.clone()));

    // Detection pipeline
    let source = Arc::new(HttpDetectionSource::new(
        app_settings.api_url.clone(),
        config.fetch_timeout,
    )?);
    let fetcher = Arc::new(HttpImageFetcher::new(
        app_settings.api_base_url.clone(),
        config.image_timeout,
    )?);
    let pipeline = Arc::new(DetectionPipeline::new(fetcher, sink.clone()));
    let (detection_tx, detection_rx) = mpsc::unbounded_channel();
    let pipeline_task = pipeline.spawn(detection_rx);

    // Connection probe; polling starts either way
    let reachable = source.test_connection().await;
    if reachable {
        tracing::info!(url = %source.api_url(), "Detection API reachable");
    } else {
        tracing::warn!(url = %source.api_url(), "Detection API unreachable, polling anyway");
    }
    notifier.update_api_status(reachable).await;

    let polling = Arc::new(PollingOrchestrator::new(
        source,
        notifier.clone(),
        PollingConfig {
            interval: settings.polling_interval(),
            seen_capacity: config.seen_capacity,
        },
    ));
    let polling_task = polling.start(detection_tx).await;

    // Camera streams
    let backend = Arc::new(FfmpegBackend::new(config.stream.open_timeout));
    match backend.check_available().await {
        Ok(version) => tracing::info!(version = %version, "ffmpeg available"),
        Err(e) => tracing::warn!(error = %e, "ffmpeg unavailable, streams will fail to open"),
    }
    let streams = Arc::new(StreamManager::new(
        settings.cameras(),
        backend,
        notifier.clone(),
        config.stream.clone(),
    ));
    streams.start_all();

    // External recogniser
    let launcher = Arc::new(PlateLauncher::new(Some(
        app_settings.external_executable_path.as_str(),
    )));
    if config.launch_recogniser {
        launcher.launch().await;
    }

    let state = AppState {
        config: config.clone(),
        settings: settings.clone(),
        notifier,
        streams: streams.clone(),
        event_log,
        snapshots: Arc::new(SnapshotService::new()),
        launcher,
        started_at: Instant::now(),
    };

    let app = web_api::create_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Shutdown: stop polling, release cameras, drain consumers
    polling.stop();
    if let Some(task) = polling_task {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Polling task failed");
        }
    }
    if let Err(e) = pipeline_task.await {
        tracing::error!(error = %e, "Detection pipeline task failed");
    }
    streams.dispose_all().await;
    drop(sink);
    event_log_task.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
