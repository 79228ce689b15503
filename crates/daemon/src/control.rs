//! Control surface: pause/resume/skip intents flowing into the supervisor,
//! read-only worker snapshots flowing out.
//!
//! The supervisor owns every piece of worker state. Callers only send
//! `ControlCommand`s (never blocking) and read the latest published
//! `WorkerSnapshot`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use crate::schedule::FolderSchedule;
use crate::state::{write_json, Stats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    TogglePause,
    Skip,
}

impl ControlCommand {
    /// Action name used in command files
    pub fn action(&self) -> &'static str {
        match self {
            ControlCommand::Pause => "pause",
            ControlCommand::Resume => "resume",
            ControlCommand::TogglePause => "toggle-pause",
            ControlCommand::Skip => "skip",
        }
    }

    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "pause" => Some(ControlCommand::Pause),
            "resume" => Some(ControlCommand::Resume),
            "toggle-pause" => Some(ControlCommand::TogglePause),
            "skip" => Some(ControlCommand::Skip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    Starting,
    Scanning,
    Transcoding,
    Paused,
    Idle,
}

/// Read model published by the supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub status: WorkerStatus,
    #[serde(serialize_with = "crate::state::serialize_opt_path_lossy")]
    pub current_file: Option<PathBuf>,
    pub current_folder: Option<String>,
    pub paused: bool,
    /// A skip request not yet consumed
    pub skip: bool,
    pub processing_active: bool,
    pub transcode_started_at: Option<DateTime<Utc>>,
    pub transcode_file_size_gb: Option<f64>,
    pub last_progress: Option<String>,
    pub queue_len: usize,
    pub stats: Stats,
    pub folders: Vec<FolderSchedule>,
    pub updated_at: DateTime<Utc>,
}

impl WorkerSnapshot {
    pub fn new(stats: Stats, folders: Vec<FolderSchedule>) -> Self {
        Self {
            status: WorkerStatus::Starting,
            current_file: None,
            current_folder: None,
            paused: false,
            skip: false,
            processing_active: false,
            transcode_started_at: None,
            transcode_file_size_gb: None,
            last_progress: None,
            queue_len: 0,
            stats,
            folders,
            updated_at: Utc::now(),
        }
    }
}

/// Handle given to presentation layers
#[derive(Debug, Clone)]
pub struct ControlHandle {
    commands: mpsc::UnboundedSender<ControlCommand>,
    snapshot: watch::Receiver<WorkerSnapshot>,
}

impl ControlHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<ControlCommand>,
        snapshot: watch::Receiver<WorkerSnapshot>,
    ) -> Self {
        Self { commands, snapshot }
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<WorkerSnapshot> {
        self.snapshot.clone()
    }

    pub fn send(&self, cmd: ControlCommand) {
        if self.commands.send(cmd).is_err() {
            warn!("Supervisor is gone, dropping {} request", cmd.action());
        }
    }

    pub fn request_pause(&self) {
        self.send(ControlCommand::Pause);
    }

    pub fn request_resume(&self) {
        self.send(ControlCommand::Resume);
    }

    pub fn toggle_pause(&self) {
        self.send(ControlCommand::TogglePause);
    }

    pub fn request_skip(&self) {
        self.send(ControlCommand::Skip);
    }
}

/// Command file format shared by the CLI and the daemon
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandFile {
    pub action: String,
    pub timestamp: String,
}

/// Drop a command file for a running daemon to pick up
pub fn write_command_file(dir: &Path, cmd: ControlCommand) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create command directory: {}", dir.display()))?;
    let now = Utc::now();
    let path = dir.join(format!("{}-{}.json", now.format("%Y%m%dT%H%M%S%.6f"), cmd.action()));
    let file = CommandFile {
        action: cmd.action().to_string(),
        timestamp: now.to_rfc3339(),
    };
    write_json(&path, &file)?;
    Ok(path)
}

/// Read, forward and delete every pending command file in name order.
/// Returns the number of commands forwarded.
pub fn process_command_files(handle: &ControlHandle, dir: &Path) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Failed to read command directory {}: {}", dir.display(), e);
            return 0;
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut forwarded = 0;
    for path in paths {
        let parsed = fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|c| serde_json::from_str::<CommandFile>(&c).map_err(anyhow::Error::from));
        match parsed {
            Ok(file) => match ControlCommand::from_action(&file.action) {
                Some(cmd) => {
                    info!("Control command received: {}", cmd.action());
                    match cmd {
                        ControlCommand::Pause => handle.request_pause(),
                        ControlCommand::Resume => handle.request_resume(),
                        ControlCommand::TogglePause => handle.toggle_pause(),
                        ControlCommand::Skip => handle.request_skip(),
                    }
                    forwarded += 1;
                }
                None => warn!("Unknown command action: {}", file.action),
            },
            Err(e) => warn!("Failed to parse command file {}: {}", path.display(), e),
        }
        if let Err(e) = fs::remove_file(&path) {
            warn!("Failed to delete command file {}: {}", path.display(), e);
        }
    }
    forwarded
}

/// Poll the command directory for as long as the runtime lives
pub fn spawn_command_bridge(handle: ControlHandle, dir: PathBuf, poll: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("Failed to create command directory {}: {}", dir.display(), e);
        }
        loop {
            process_command_files(&handle, &dir);
            tokio::time::sleep(poll).await;
        }
    })
}

/// Mirror every snapshot change into a JSON status file, at most once per `throttle`
pub fn spawn_status_writer(handle: &ControlHandle, path: PathBuf, throttle: Duration) -> JoinHandle<()> {
    let mut rx = handle.subscribe();
    tokio::spawn(async move {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if let Err(e) = write_json(&path, &snapshot) {
                warn!("Failed to write status file: {:#}", e);
            }
            tokio::time::sleep(throttle).await;
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}

/// Read the last status file written by a running daemon
pub fn read_status_file(path: &Path) -> Result<WorkerSnapshot> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read status file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse status file: {}", path.display()))
}
