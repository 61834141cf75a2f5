//! mtrack-rc - media collection reconciler
//!
//! Runs one reconciliation cycle per period (default: daily) and serves a
//! small control API (health, status, manual trigger, event stream).
//!
//! `--once` runs exactly one cycle and exits: 0 if it completed, 1 if it
//! failed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mtrack_common::config::{load_toml_config, resolve_config_path, TomlConfig};
use mtrack_common::events::EventBus;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use mtrack_rc::config::{CliOverrides, ReconcilerConfig, MODULE_NAME};
use mtrack_rc::db::{self, MemoryWatermarkStore, SqliteWatermarkStore, WatermarkStore};
use mtrack_rc::services::{
    CycleOrchestrator, CycleRunner, HttpDisambiguationEngine, HttpReporter, Scheduler,
};
use mtrack_rc::sources::{build_sources, SourceCollector};
use mtrack_rc::{build_router, AppState};

/// Command-line arguments for mtrack-rc
#[derive(Parser, Debug)]
#[command(name = "mtrack-rc")]
#[command(about = "Daily media collection reconciler")]
#[command(version)]
struct Args {
    /// TOML config file (default: <config_dir>/mtrack/mtrack-rc.toml)
    #[arg(short, long, env = "MTRACK_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding mtrack.db
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Seconds between cycles
    #[arg(long)]
    period_secs: Option<u64>,

    /// Control API bind address
    #[arg(long)]
    listen: Option<String>,

    /// Run one cycle and exit
    #[arg(long)]
    once: bool,

    /// Do not start the control API
    #[arg(long)]
    no_control: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Config is read before tracing starts so its log level can apply
    let config_path = resolve_config_path(args.config.as_deref(), MODULE_NAME);
    let toml_config = match &config_path {
        Some(path) => load_toml_config(path)?,
        None => TomlConfig::default(),
    };

    let default_filter = match &toml_config.logging.level {
        Some(level) => format!("mtrack_rc={level},mtrack_common={level}"),
        None => "mtrack_rc=info,mtrack_common=info".to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    info!(
        "Starting mtrack-rc v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    match &config_path {
        Some(path) if path.exists() => info!("Config file: {}", path.display()),
        Some(path) => info!("Config file {} not found, using defaults", path.display()),
        None => info!("No config directory on this platform, using defaults"),
    }

    let cli = CliOverrides {
        config_path: config_path.clone(),
        root_folder: args.root_folder.clone(),
        period_secs: args.period_secs,
        listen: args.listen.clone(),
    };
    let config = ReconcilerConfig::resolve(&cli, &toml_config)?;
    config.log_summary();

    let disambiguation_url = config.require_disambiguation_url()?.to_string();
    let report_url = config.require_report_url()?.to_string();

    // Watermark store
    let store: Arc<dyn WatermarkStore> = if config.persist_watermarks {
        let initializer = config.root_folder_initializer();
        initializer
            .ensure_directory_exists()
            .context("Failed to initialize root folder")?;

        let db_path = initializer.database_path();
        info!("Database: {}", db_path.display());
        let pool = db::init_database_pool(&db_path).await?;
        Arc::new(SqliteWatermarkStore::new(pool))
    } else {
        warn!("Watermark persistence disabled, watermarks reset on restart");
        Arc::new(MemoryWatermarkStore::new())
    };

    // Pipeline
    let sources = build_sources(&config).context("Failed to build media sources")?;
    if sources.is_empty() {
        warn!("No media sources configured; cycles will report nothing");
    }

    let engine = HttpDisambiguationEngine::new(disambiguation_url, config.disambiguation_timeout)
        .context("Failed to build disambiguation client")?;
    let reporter = HttpReporter::new(report_url).context("Failed to build reporter")?;

    let event_bus = EventBus::new(100);
    let orchestrator = Arc::new(CycleOrchestrator::new(
        SourceCollector::new(sources),
        Arc::new(engine),
        Arc::new(reporter),
        event_bus,
    ));

    let runner = Arc::new(CycleRunner::new(orchestrator, store));
    runner.load().await.context("Failed to load watermarks")?;

    let scheduler = Scheduler::new(Arc::clone(&runner), config.cycle_period);

    if args.once {
        let completed = scheduler
            .run_once()
            .await
            .map(|session| session.succeeded())
            .unwrap_or(false);
        return Ok(if completed {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let server = if args.no_control {
        info!("Control API disabled");
        None
    } else {
        let listener = tokio::net::TcpListener::bind(&config.control_listen)
            .await
            .with_context(|| format!("Failed to bind {}", config.control_listen))?;
        info!("Control API listening on http://{}", config.control_listen);

        let app = build_router(AppState::new(Arc::clone(&runner)));
        let token = shutdown.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
        }))
    };

    scheduler.run(shutdown.clone()).await;

    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Control API error: {}", e),
            Err(e) => error!("Control API task failed: {}", e),
        }
    }

    info!("Shutdown complete");
    Ok(ExitCode::SUCCESS)
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
