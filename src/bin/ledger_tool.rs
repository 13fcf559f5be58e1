use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::info;
use motion_gif_relay::config::{load_config, StorageConfig};
use motion_gif_relay::db::repositories::ProcessedEventsRepository;
use motion_gif_relay::db::DatabaseService;
use motion_gif_relay::device_manager::{CameraId, EventId};
use std::path::PathBuf;

/// Inspect or pin the processed events ledger
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay configuration; the ledger is taken from its data_dir
    #[arg(short, long, conflicts_with = "data_dir")]
    config: Option<PathBuf>,

    /// Directory holding processed_events.db
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every ledger entry
    List,
    /// Set the last handled event of a camera
    Set { camera: CameraId, event: EventId },
}

fn ledger_path(args: &Args) -> Result<PathBuf> {
    if let Some(data_dir) = &args.data_dir {
        return Ok(StorageConfig {
            working_dir: PathBuf::new(),
            data_dir: data_dir.clone(),
        }
        .ledger_path());
    }

    match &args.config {
        Some(config) => Ok(load_config(config)?.storage.ledger_path()),
        None => bail!("Either --config or --data-dir is required"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let path = ledger_path(&args)?;
    if !path.exists() {
        bail!("No ledger at {}", path.display());
    }

    let db = DatabaseService::open(&path).await?;
    let ledger = ProcessedEventsRepository::new(db.pool.clone());

    match args.command {
        Command::List => {
            let entries = ledger.list_all().await?;
            if entries.is_empty() {
                println!("Ledger is empty");
            }
            for entry in entries {
                println!(
                    "camera {:>4}  last event {:>8}  processed {}",
                    entry.camera_id,
                    entry.last_event_id,
                    entry.processed_date.to_rfc3339()
                );
            }
        }
        Command::Set { camera, event } => {
            let previous = ledger.get_by_camera(camera).await?;
            ledger.record_handled(camera, event, Utc::now()).await?;
            info!("Camera {} pinned to event {}", camera, event);
            match previous {
                Some(entry) => println!("camera {}: {} -> {}", camera, entry.last_event_id, event),
                None => println!("camera {}: (none) -> {}", camera, event),
            }
        }
    }

    db.close().await;
    Ok(())
}
