use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use motion_gif_relay::config::{self, Config};
use motion_gif_relay::db::repositories::ProcessedEventsRepository;
use motion_gif_relay::db::DatabaseService;
use motion_gif_relay::device_manager::{EventSource, SurveillanceStationClient};
use motion_gif_relay::messaging;
use motion_gif_relay::services::{FfmpegConverter, MotionEventProcessor, PollScheduler, SnapshotService};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Relay Surveillance Station motion recordings to a message bus as GIFs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (.toml or .json)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Default log filter when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

async fn run_app(config: Config) -> Result<()> {
    std::fs::create_dir_all(&config.storage.working_dir).context(format!(
        "Failed to create working directory {:?}",
        config.storage.working_dir
    ))?;
    std::fs::create_dir_all(&config.storage.data_dir).context(format!(
        "Failed to create data directory {:?}",
        config.storage.data_dir
    ))?;

    let db = DatabaseService::open(&config.storage.ledger_path()).await?;
    if !db.health_check().await? {
        anyhow::bail!("Ledger database is not usable");
    }
    let ledger = ProcessedEventsRepository::new(db.pool.clone());
    for entry in ledger.list_all().await? {
        info!(
            "Resuming camera {} after event {} (processed {})",
            entry.camera_id, entry.last_event_id, entry.processed_date
        );
    }

    let source: Arc<dyn EventSource> = Arc::new(SurveillanceStationClient::new(&config.surveillance)?);
    let converter = Arc::new(FfmpegConverter::new(config.ffmpeg.binary.clone()));

    let publisher = messaging::create_publisher(&config.message_bus).await?;
    info!("Message bus publisher initialized");

    let motion_events = Arc::new(MotionEventProcessor::new(
        source.clone(),
        ledger,
        converter,
        publisher.clone(),
        &config.storage.working_dir,
        &config.message_bus.base_topic,
        config.ffmpeg.fps,
    ));
    let snapshots = Arc::new(SnapshotService::new(
        source.clone(),
        publisher.clone(),
        &config.storage.working_dir,
        &config.message_bus.base_topic,
    ));

    let scheduler = PollScheduler::new(
        source.clone(),
        config.cameras.clone(),
        motion_events,
        snapshots,
        config.polling.interval(),
    );

    // Without a session there is nothing to poll
    scheduler
        .start()
        .await
        .context("Failed to authenticate with Surveillance Station")?;
    info!("Poll scheduler started");

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(shutdown.clone()));

    scheduler.run(shutdown).await;
    info!("Shutting down...");

    if let Err(e) = source.logout().await {
        warn!("Logout from Surveillance Station failed: {}", e);
    }
    if let Err(e) = publisher.close().await {
        warn!("Failed to close message bus publisher: {}", e);
    }
    db.close().await;

    Ok(())
}

async fn wait_for_shutdown(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received interrupt signal"),
                    _ = terminate.recv() => info!("Received terminate signal"),
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received interrupt signal");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received interrupt signal");
    }

    token.cancel();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level.as_str()))
        .init();
    info!("Starting motion GIF relay {}", env!("CARGO_PKG_VERSION"));

    let config = match config::load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Configuration loaded from {:?}", args.config);

    match run_app(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Application error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
