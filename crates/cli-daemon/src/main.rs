mod logging;

use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use humansize::{format_size, BINARY};
use log::{info, warn};
use watchdog::control::{self, ControlCommand, WorkerSnapshot};
use watchdog::estimator::BYTES_PER_GB;
use watchdog::{recover, Heartbeat, Supervisor, WatchdogConfig};

/// Poll interval of the command directory
const COMMAND_POLL: Duration = Duration::from_secs(1);
/// Minimum spacing between two status.json writes
const STATUS_THROTTLE: Duration = Duration::from_secs(1);

/// HEVC re-encoding watchdog
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daemon (default)
    Run,
    /// Pause a running daemon; the current transcode is aborted
    Pause,
    /// Resume a paused daemon
    Resume,
    /// Flip the pause state of a running daemon
    TogglePause,
    /// Abandon the current (or next) file
    Skip,
    /// Show the last status published by a running daemon
    Status {
        /// Print the raw status document
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = WatchdogConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    match args.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            logging::init(args.verbose, cfg.log_file.as_deref())?;
            run_daemon(cfg).await
        }
        Commands::Pause => send_command(&cfg, ControlCommand::Pause),
        Commands::Resume => send_command(&cfg, ControlCommand::Resume),
        Commands::TogglePause => send_command(&cfg, ControlCommand::TogglePause),
        Commands::Skip => send_command(&cfg, ControlCommand::Skip),
        Commands::Status { json } => show_status(&cfg, json),
    }
}

async fn run_daemon(cfg: WatchdogConfig) -> Result<()> {
    info!("HEVC Watchdog starting");
    info!("Configuration loaded:");
    for folder in &cfg.folders {
        info!(
            "  Folder: {} ({}) every {}s",
            folder.display_name(),
            folder.path.display(),
            folder.scan_interval_secs
        );
        if !folder.path.exists() {
            warn!("Folder does not exist: {}", folder.path.display());
        }
    }
    info!("  State dir: {}", cfg.state_dir.display());
    info!("  Encoder: {} crf={} preset={}", cfg.video_encoder, cfg.crf, cfg.preset);
    info!("  Min savings: {} GB", cfg.min_savings_gb);

    fs::create_dir_all(&cfg.state_dir)
        .with_context(|| format!("Failed to create state directory: {}", cfg.state_dir.display()))?;

    recover(&cfg);

    let heartbeat = Heartbeat::new(cfg.heartbeat_url.clone());
    if heartbeat.is_enabled() {
        info!("  Heartbeat: enabled");
    }

    let supervisor = Supervisor::new(cfg.clone(), heartbeat);
    let handle = supervisor.handle();
    let bridge = control::spawn_command_bridge(handle.clone(), cfg.command_dir(), COMMAND_POLL);
    let writer = control::spawn_status_writer(&handle, cfg.status_path(), STATUS_THROTTLE);

    tokio::select! {
        _ = supervisor.run() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            // Dropping the supervisor kills a running encoder; leftovers are swept on next start
            info!("Shutdown requested, stopping");
        }
    }

    bridge.abort();
    writer.abort();
    Ok(())
}

fn send_command(cfg: &WatchdogConfig, cmd: ControlCommand) -> Result<()> {
    let path = control::write_command_file(&cfg.command_dir(), cmd)?;
    println!("Queued {} request: {}", cmd.action(), path.display());
    Ok(())
}

fn show_status(cfg: &WatchdogConfig, json: bool) -> Result<()> {
    let snapshot = control::read_status_file(&cfg.status_path())?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_status(&snapshot);
    }
    Ok(())
}

fn gb_size(gb: f64) -> String {
    format_size((gb * BYTES_PER_GB).max(0.0) as u64, BINARY)
}

fn print_status(s: &WorkerSnapshot) {
    let now = Utc::now();
    let age = (now - s.updated_at).num_seconds();
    println!("Status:    {:?}{}", s.status, if s.paused { " (paused)" } else { "" });
    if age > 120 {
        println!("           last update {}s ago, daemon may not be running", age);
    }
    if s.skip {
        println!("Skip:      pending");
    }

    if let Some(file) = &s.current_file {
        println!("File:      {}", file.display());
        if let Some(folder) = &s.current_folder {
            println!("Folder:    {}", folder);
        }
        if let Some(size) = s.transcode_file_size_gb {
            println!("Size:      {}", gb_size(size));
        }
        if let Some(started) = s.transcode_started_at {
            println!(
                "Running:   {}",
                watchdog::schedule::format_duration(now - started)
            );
        }
        if let Some(progress) = &s.last_progress {
            println!("Progress:  {}", progress);
        }
    }
    if s.queue_len > 0 {
        println!("Queue:     {} file(s)", s.queue_len);
    }

    println!();
    println!("Converted: {} file(s), {} processed", s.stats.files_processed, gb_size(s.stats.gb_processed));
    println!("Saved:     {}", gb_size(s.stats.gb_saved));
    println!("Skipped:   {} file(s), {}", s.stats.files_skipped, gb_size(s.stats.gb_skipped));
    for (reason, count) in &s.stats.skip_reasons {
        println!("  {:<24} {}", reason, count);
    }

    if !s.folders.is_empty() {
        println!();
        println!("Folders:");
        for folder in &s.folders {
            println!(
                "  {:<20} {:?}, next scan {}",
                folder.display_name,
                folder.status,
                folder.describe_next_scan(now)
            );
        }
    }
}
