//! whiteboard: inspect, export, and demo whiteboard rooms from the command line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use whiteboard_cli::{Config, DemoOptions, FileStore, SvgExporter, run_demo};
use whiteboard_core::{BroadcastBus, Origin, Role, RoomStore, SenderId, SyncEngine};

#[derive(Parser, Debug)]
#[command(name = "whiteboard")]
#[command(about = "Realtime classroom whiteboard rooms")]
struct Args {
    /// Directory holding room documents (overrides WHITEBOARD_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the persisted state of a room
    Show {
        room: String,
        /// Print the raw document JSON
        #[arg(long)]
        json: bool,
    },
    /// Render every page of a room to SVG
    Export {
        room: String,
        /// Output directory (defaults to <data dir>/exports)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Run a trainer and a trainee against each other in one process
    Demo {
        room: String,
        /// Use the shared-storage fallback instead of the broadcast channel
        #[arg(long)]
        fallback: bool,
        /// Number of strokes the trainer draws
        #[arg(long, default_value_t = 8)]
        strokes: usize,
    },
    /// Delete the persisted state of a room
    Reset { room: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,whiteboard=debug"
    } else {
        "info,whiteboard=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::from_env()?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    info!("Data directory: {:?}", config.data_dir);
    let store = FileStore::new(&config.data_dir);

    match args.command {
        Command::Show { room, json } => {
            let Some(doc) = RoomStore::new(&store, &room).load() else {
                println!("Room {} has no saved state", room);
                return Ok(());
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                println!("Room:   {}", room);
                println!("Status: {}", doc.class_status());
                println!("Page:   {} of {}", doc.current_page_index() + 1, doc.page_count());
                for (index, page) in doc.pages().iter().enumerate() {
                    println!("  [{}] {} ({} operations)", index, page.id, page.operations.len());
                }
            }
        }
        Command::Export { room, out } => {
            let out_dir = out.unwrap_or_else(|| config.data_dir.join("exports"));
            let bus = BroadcastBus::new(SenderId::generate(), &Origin::new(), &config.sync_config());
            let mut engine = SyncEngine::new(&room, Role::Trainer, bus, &store, config.sync_config());
            engine.join()?;

            let mut exporter = SvgExporter::new(out_dir);
            let report = engine
                .export_with(&mut exporter)
                .with_context(|| format!("Failed to export room {}", room))?;
            engine.leave();
            println!("Exported {} page(s) to {}", report.pages, report.location);
        }
        Command::Demo {
            room,
            fallback,
            strokes,
        } => {
            let options = DemoOptions {
                room_id: room,
                strokes,
                fallback,
            };
            let summary = run_demo(&store, config.sync_config(), &options).await?;
            println!(
                "Trainer has {} page(s), {} operation(s){}",
                summary.pages,
                summary.operations,
                if summary.restored { " (restored)" } else { "" }
            );
            if summary.converged {
                println!("Trainee converged");
            } else {
                anyhow::bail!("Trainee did not converge");
            }
        }
        Command::Reset { room } => {
            RoomStore::new(&store, &room).clear()?;
            println!("Cleared room {}", room);
        }
    }

    Ok(())
}
