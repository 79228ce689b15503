//! The scan-and-transcode loop.
//!
//! One supervisor drives everything: it asks the schedules which folders are
//! due, scans them, then transcodes the resulting queue one file at a time.
//! Pause/resume/skip arrive as `ControlCommand`s; the supervisor is the only
//! writer of worker state and publishes it as `WorkerSnapshot`s.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use chrono::Utc;
use humansize::{format_size, BINARY};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use crate::config::WatchdogConfig;
use crate::control::{ControlCommand, ControlHandle, WorkerSnapshot, WorkerStatus};
use crate::estimator::{bytes_to_gb, Estimator};
use crate::ffmpeg::{self, EncoderProcess};
use crate::heartbeat::Heartbeat;
use crate::replace::{self, ReplaceError};
use crate::scan::{self, Candidate};
use crate::schedule::{due_folders, FolderSchedule, FolderStatus};
use crate::sidecar;
use crate::state::{Ledger, StateStore};

/// Skip reason for outputs that came out no smaller than the source
pub const REASON_NO_SAVINGS: &str = "no savings";

/// Result of one candidate cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Succeeded { original_bytes: u64, output_bytes: u64 },
    /// Output not smaller than the source; never retried
    NoSavings { original_bytes: u64, output_bytes: u64 },
    /// Transient failure; retried next cycle
    Failed(String),
    /// Skipped on request; source untouched and still eligible
    Skipped,
    /// Interrupted by pause; the rest of the queue is abandoned
    Paused,
    /// File busy or gone; retried next cycle
    Deferred(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interruption {
    Skip,
    Pause,
    TimedOut,
}

/// What one tick did
#[derive(Debug, Default)]
pub struct TickReport {
    pub scanned_folders: usize,
    pub candidates: usize,
    pub outcomes: Vec<(PathBuf, CycleOutcome)>,
    /// The queue was abandoned because of a pause
    pub paused: bool,
}

pub struct Supervisor {
    cfg: WatchdogConfig,
    estimator: Estimator,
    ledger: Ledger,
    schedules: Vec<FolderSchedule>,
    heartbeat: Heartbeat,
    commands: mpsc::UnboundedReceiver<ControlCommand>,
    command_tx: mpsc::UnboundedSender<ControlCommand>,
    snapshot: watch::Sender<WorkerSnapshot>,
    paused: bool,
    skip: bool,
}

impl Supervisor {
    /// Build a supervisor, loading persisted state from `cfg.state_dir`
    pub fn new(cfg: WatchdogConfig, heartbeat: Heartbeat) -> Self {
        if cfg.parallel_processing {
            warn!("parallel_processing is not supported, files are transcoded one at a time");
        }

        let store = StateStore::new(cfg.stats_path(), cfg.processed_path());
        let ledger = Ledger::open(store);
        info!(
            "Loaded state: {} processed path(s), {} file(s) converted, {:.2} GB saved",
            ledger.processed().len(),
            ledger.stats().files_processed,
            ledger.stats().gb_saved
        );

        let schedules: Vec<FolderSchedule> = cfg.folders.iter().map(FolderSchedule::new).collect();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (snapshot, _) = watch::channel(WorkerSnapshot::new(ledger.stats().clone(), schedules.clone()));

        Self {
            estimator: Estimator::from_config(&cfg),
            cfg,
            ledger,
            schedules,
            heartbeat,
            commands,
            command_tx,
            snapshot,
            paused: false,
            skip: false,
        }
    }

    pub fn handle(&self) -> ControlHandle {
        ControlHandle::new(self.command_tx.clone(), self.snapshot.subscribe())
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run forever: tick, then rest for the quiescent interval
    pub async fn run(mut self) {
        info!("=== HEVC WATCHDOG START ===");
        loop {
            let report = self.tick().await;
            if report.candidates > 0 {
                info!(
                    "Cycle finished: {} candidate(s), {} handled{}",
                    report.candidates,
                    report.outcomes.len(),
                    if report.paused { " (paused)" } else { "" }
                );
            }
            if !self.paused {
                self.rest(self.cfg.tick_interval()).await;
            }
        }
    }

    /// One supervisor cycle: scan every due folder, then work the queue
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        self.drain_commands();
        self.wait_for_resume().await;

        let due = due_folders(&self.schedules, Utc::now());
        if due.is_empty() {
            self.publish(|s| s.status = WorkerStatus::Idle);
            return report;
        }

        self.publish(|s| s.status = WorkerStatus::Scanning);
        self.heartbeat.pulse().await;

        let mut queue: Vec<(usize, Candidate)> = Vec::new();
        for idx in due {
            let started = Utc::now();
            self.schedules[idx].status = FolderStatus::Scanning;
            let name = self.schedules[idx].display_name.clone();
            self.publish(|s| s.current_folder = Some(name));

            match scan::scan_folder(&self.cfg, &self.estimator, &self.schedules[idx], &mut self.ledger).await {
                Ok((candidates, _)) => queue.extend(candidates.into_iter().map(|c| (idx, c))),
                Err(e) => error!("Scan of {} failed: {:#}", self.schedules[idx].path.display(), e),
            }
            self.schedules[idx].mark_scanned(started);
            report.scanned_folders += 1;
        }
        self.publish(|s| s.current_folder = None);

        report.candidates = queue.len();
        if !queue.is_empty() {
            info!("Queue: {} file(s).", queue.len());
        }

        for (pos, (_, candidate)) in queue.iter().enumerate() {
            let remaining = queue.len() - pos;
            self.publish(|s| s.queue_len = remaining);

            let outcome = self.process_candidate(candidate).await;
            self.heartbeat.pulse().await;
            let paused = outcome == CycleOutcome::Paused;
            report.outcomes.push((candidate.path.clone(), outcome));

            if paused {
                // Everything left must be offered again after resume
                for (idx, _) in &queue[pos..] {
                    self.schedules[*idx].mark_due();
                }
                report.paused = true;
                break;
            }
        }

        let status = if self.paused { WorkerStatus::Paused } else { WorkerStatus::Idle };
        self.publish(|s| {
            s.queue_len = 0;
            s.status = status;
        });
        report
    }

    /// Drive one candidate through a transcode cycle and clear per-file state
    pub async fn process_candidate(&mut self, candidate: &Candidate) -> CycleOutcome {
        let outcome = match self.transcode(candidate).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Exception on {}: {:#}", candidate.path.display(), e);
                CycleOutcome::Failed(format!("{:#}", e))
            }
        };

        self.publish(|s| {
            s.current_file = None;
            s.processing_active = false;
            s.transcode_started_at = None;
            s.transcode_file_size_gb = None;
            s.last_progress = None;
        });
        outcome
    }

    async fn transcode(&mut self, candidate: &Candidate) -> Result<CycleOutcome> {
        let path = &candidate.path;
        let file_name = display_name(path);

        // Step 1: pending skip consumes this candidate without touching it
        self.drain_commands();
        if self.take_skip() {
            info!("Skipped file: {}", file_name);
            return Ok(CycleOutcome::Skipped);
        }

        // Step 2: wait out a pause; a skip during the wait abandons this file
        if self.wait_while_paused().await {
            self.take_skip();
            info!("Skipped file while paused: {}", file_name);
            return Ok(CycleOutcome::Skipped);
        }

        // Step 3: best-effort in-use probe
        if let Err(e) = fs::rename(path, path) {
            info!("File in use: {} ({})", file_name, e);
            return Ok(CycleOutcome::Deferred(format!("file in use: {}", e)));
        }
        let original_bytes = match fs::metadata(path) {
            Ok(m) => m.len(),
            Err(e) => {
                warn!("Candidate vanished: {} ({})", path.display(), e);
                return Ok(CycleOutcome::Deferred(format!("stat failed: {}", e)));
            }
        };
        // Still being copied in or rewritten since the scan
        if original_bytes != candidate.size_bytes {
            info!(
                "File changed since scan: {} ({} -> {})",
                file_name,
                format_size(candidate.size_bytes, BINARY),
                format_size(original_bytes, BINARY)
            );
            return Ok(CycleOutcome::Deferred("file changed since scan".to_string()));
        }

        // Step 4: launch the encoder
        let temp_output = sidecar::temp_output_path(&self.cfg, path);
        if let Some(dir) = temp_output.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create temp directory: {}", dir.display()))?;
        }
        remove_if_exists(&temp_output);

        info!(
            "START: {} ({}, {})",
            file_name,
            candidate.detected_codec,
            format_size(original_bytes, BINARY)
        );
        let folder = candidate.folder.clone();
        let current = path.clone();
        self.publish(|s| {
            s.status = WorkerStatus::Transcoding;
            s.current_file = Some(current);
            s.current_folder = Some(folder);
            s.processing_active = true;
            s.transcode_started_at = Some(Utc::now());
            s.transcode_file_size_gb = Some(bytes_to_gb(original_bytes));
            s.last_progress = None;
        });

        let mut encoder = match EncoderProcess::spawn(&self.cfg, path, &temp_output) {
            Ok(e) => e,
            Err(e) => {
                error!("FFMPEG ERROR: {}: {:#}", file_name, e);
                remove_if_exists(&temp_output);
                return Ok(CycleOutcome::Failed(format!("{:#}", e)));
            }
        };

        // Step 5: stream output, watching for control commands and the runtime guard
        let deadline = self.cfg.max_transcode().map(|d| Instant::now() + d);
        let mut interruption = None;
        loop {
            tokio::select! {
                line = encoder.next_line() => match line {
                    Some(line) => self.handle_encoder_line(&line),
                    None => break,
                },
                Some(cmd) = self.commands.recv() => {
                    self.apply(cmd);
                    if self.skip {
                        interruption = Some(Interruption::Skip);
                        break;
                    }
                    if self.paused {
                        interruption = Some(Interruption::Pause);
                        break;
                    }
                }
                _ = sleep_until(deadline) => {
                    interruption = Some(Interruption::TimedOut);
                    break;
                }
            }
        }

        // Step 6: interruption cleanup
        if let Some(kind) = interruption {
            info!("Forcing FFmpeg stop (PID: {:?})...", encoder.pid());
            encoder.terminate_tree().await;
            remove_if_exists(&temp_output);
            return Ok(match kind {
                Interruption::Skip => {
                    self.take_skip();
                    info!("Skipped file: {}", file_name);
                    CycleOutcome::Skipped
                }
                Interruption::Pause => {
                    info!("Paused on file: {}", file_name);
                    CycleOutcome::Paused
                }
                Interruption::TimedOut => {
                    error!("FFMPEG TIMEOUT: {} exceeded {:?}", file_name, self.cfg.max_transcode());
                    CycleOutcome::Failed("transcode timed out".to_string())
                }
            });
        }

        // Step 7: natural completion
        let status = match encoder.wait().await {
            Ok(status) => status,
            Err(e) => {
                remove_if_exists(&temp_output);
                return Err(e);
            }
        };
        let output_bytes = fs::metadata(&temp_output).ok().filter(|m| m.is_file()).map(|m| m.len());

        let output_bytes = match (status.success(), output_bytes) {
            (true, Some(bytes)) => bytes,
            (success, _) => {
                let reason = if success {
                    "output file missing".to_string()
                } else {
                    format!("exit code {}", status.code().unwrap_or(-1))
                };
                error!("FFMPEG ERROR: {} ({})", file_name, reason);
                remove_if_exists(&temp_output);
                return Ok(CycleOutcome::Failed(reason));
            }
        };

        if output_bytes >= original_bytes {
            remove_if_exists(&temp_output);
            self.ledger.record_skip(path, REASON_NO_SAVINGS, original_bytes);
            self.sync_stats();
            info!(
                "SKIPPED: {} (No savings: {} -> {}, will not retry)",
                file_name,
                format_size(original_bytes, BINARY),
                format_size(output_bytes, BINARY)
            );
            return Ok(CycleOutcome::NoSavings { original_bytes, output_bytes });
        }

        match replace::atomic_replace(path, &temp_output) {
            Ok(()) => {
                self.ledger.record_conversion(path, original_bytes, output_bytes);
                self.sync_stats();
                info!(
                    "✅ SUCCESS: {} (-{:.2} GB)",
                    file_name,
                    bytes_to_gb(original_bytes - output_bytes)
                );
                Ok(CycleOutcome::Succeeded { original_bytes, output_bytes })
            }
            Err(e) => {
                discard_failed_replace(&e, path, &temp_output);
                Ok(CycleOutcome::Failed(e.to_string()))
            }
        }
    }

    fn handle_encoder_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if ffmpeg::is_progress_line(line) {
            if line.starts_with("out_time=") {
                let progress = line.to_string();
                debug!("Progress: {}", progress);
                self.publish(|s| s.last_progress = Some(progress));
            }
        } else {
            info!("FFmpeg: {}", line);
        }
    }

    fn apply(&mut self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::Pause => self.paused = true,
            ControlCommand::Resume => self.paused = false,
            ControlCommand::TogglePause => self.paused = !self.paused,
            ControlCommand::Skip => self.skip = true,
        }
        debug!("Control {} -> paused={}, skip={}", cmd.action(), self.paused, self.skip);
        self.publish(|_| {});
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            self.apply(cmd);
        }
    }

    fn take_skip(&mut self) -> bool {
        let skip = std::mem::take(&mut self.skip);
        if skip {
            self.publish(|_| {});
        }
        skip
    }

    /// Block while paused. Returns true if a skip arrived during the wait.
    async fn wait_while_paused(&mut self) -> bool {
        while self.paused {
            if self.skip {
                return true;
            }
            self.publish(|s| s.status = WorkerStatus::Paused);
            if let Some(cmd) = self.commands.recv().await {
                self.apply(cmd);
            }
        }
        false
    }

    /// Block while paused, keeping any skip pending for the next candidate
    async fn wait_for_resume(&mut self) {
        if self.paused {
            info!("⏸️  Paused, waiting for resume");
        }
        while self.paused {
            self.publish(|s| s.status = WorkerStatus::Paused);
            if let Some(cmd) = self.commands.recv().await {
                self.apply(cmd);
            }
        }
    }

    /// Quiescent sleep that still applies incoming commands
    async fn rest(&mut self, duration: Duration) {
        self.publish(|s| s.status = WorkerStatus::Idle);
        debug!("Sleeping for {:?} before next tick", duration);
        let deadline = Instant::now() + duration;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                Some(cmd) = self.commands.recv() => {
                    self.apply(cmd);
                    if self.paused {
                        break;
                    }
                }
            }
        }
    }

    fn sync_stats(&self) {
        let stats = self.ledger.stats().clone();
        self.publish(|s| s.stats = stats);
    }

    fn publish(&self, update: impl FnOnce(&mut WorkerSnapshot)) {
        let (paused, skip) = (self.paused, self.skip);
        let folders = self.schedules.clone();
        self.snapshot.send_modify(|s| {
            update(s);
            s.paused = paused;
            s.skip = skip;
            s.folders = folders;
            s.updated_at = Utc::now();
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Clean up after a failed replace. When the rollback failed the encoded
/// output is left in place next to the backup for manual recovery.
fn discard_failed_replace(err: &ReplaceError, original: &Path, temp_output: &Path) {
    if let ReplaceError::RollbackFailed { backup, .. } = err {
        warn!(
            "Leaving encoded output for {} in place, original is at {}",
            original.display(),
            backup.display()
        );
        return;
    }
    error!("Replace failed for {}: {}", original.display(), err);
    remove_if_exists(temp_output);
    remove_if_exists(&sidecar::staging_path(original));
}

fn remove_if_exists(path: &Path) {
    if path.exists() {
        match fs::remove_file(path) {
            Ok(()) => debug!("🗑️  Deleted temp file: {}", path.display()),
            Err(e) => warn!("Failed to delete temp file {}: {}", path.display(), e),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testutil::TestEnv;

    fn outcome_of<'a>(report: &'a TickReport, name: &str) -> &'a CycleOutcome {
        &report
            .outcomes
            .iter()
            .find(|(p, _)| p.file_name().unwrap() == name)
            .unwrap_or_else(|| panic!("no outcome for {}", name))
            .1
    }

    #[tokio::test]
    async fn tick_converts_rejects_and_fails() {
        let env = TestEnv::new();
        env.media("b_grow.mkv", 4096);
        env.media("c_fail.mkv", 4096);
        env.media("d_movie.mkv", 4096);
        env.media("e_show.mkv", 4096);

        let mut sup = Supervisor::new(env.config(), Heartbeat::disabled());
        let report = sup.tick().await;

        assert_eq!(report.scanned_folders, 1);
        assert_eq!(report.candidates, 3);
        assert!(!report.paused);

        assert_eq!(
            outcome_of(&report, "d_movie.mkv"),
            &CycleOutcome::Succeeded { original_bytes: 4096, output_bytes: 1024 }
        );
        assert_eq!(fs::metadata(env.library().join("d_movie.mkv")).unwrap().len(), 1024);

        assert_eq!(
            outcome_of(&report, "b_grow.mkv"),
            &CycleOutcome::NoSavings { original_bytes: 4096, output_bytes: 8192 }
        );
        assert!(matches!(outcome_of(&report, "c_fail.mkv"), CycleOutcome::Failed(_)));
        assert_eq!(env.content("b_grow.mkv"), env.original_content(4096));
        assert_eq!(env.content("c_fail.mkv"), env.original_content(4096));

        let ledger = sup.ledger();
        assert!(ledger.is_processed(&env.library().join("d_movie.mkv")));
        assert!(ledger.is_processed(&env.library().join("b_grow.mkv")));
        assert!(ledger.is_processed(&env.library().join("e_show.mkv")));
        assert!(!ledger.is_processed(&env.library().join("c_fail.mkv")));

        let stats = ledger.stats();
        assert_eq!(stats.files_processed, 1);
        assert!((stats.gb_processed - bytes_to_gb(4096)).abs() < 1e-12);
        assert!((stats.gb_saved - bytes_to_gb(3072)).abs() < 1e-12);
        assert_eq!(stats.skip_reasons.get(REASON_NO_SAVINGS), Some(&1));

        // No temp, staging or backup files survive
        assert_eq!(env.library_files().len(), 4);

        // Not due yet: nothing happens
        let idle = sup.tick().await;
        assert_eq!(idle.scanned_folders, 0);

        // Forced rescan only retries the transient failure
        sup.schedules.iter_mut().for_each(|s| s.mark_due());
        let again = sup.tick().await;
        assert_eq!(again.candidates, 1);
        assert!(matches!(outcome_of(&again, "c_fail.mkv"), CycleOutcome::Failed(_)));

        let snap = sup.handle().snapshot();
        assert_eq!(snap.status, WorkerStatus::Idle);
        assert!(!snap.processing_active);
        assert_eq!(snap.stats.files_processed, 1);
    }

    #[tokio::test]
    async fn skip_mid_transcode_moves_to_next_file() {
        let env = TestEnv::new();
        env.stall();
        env.media("a_slow.mkv", 4096);
        env.media("b_movie.mkv", 4096);

        let mut sup = Supervisor::new(env.config(), Heartbeat::disabled());
        let handle = sup.handle();
        let watcher = tokio::spawn(async move {
            let mut rx = handle.subscribe();
            rx.wait_for(|s| s.last_progress.is_some()).await.unwrap();
            handle.request_skip();
        });

        let report = sup.tick().await;
        watcher.await.unwrap();

        assert_eq!(outcome_of(&report, "a_slow.mkv"), &CycleOutcome::Skipped);
        assert!(matches!(outcome_of(&report, "b_movie.mkv"), CycleOutcome::Succeeded { .. }));
        assert_eq!(env.content("a_slow.mkv"), env.original_content(4096));
        assert!(!sup.ledger().is_processed(&env.library().join("a_slow.mkv")));
        assert!(!env.library().join("a_slow.mkv.temp.mkv").exists());
        assert!(!sup.handle().snapshot().skip);
    }

    #[tokio::test]
    async fn pause_abandons_queue_and_resume_rescans() {
        let env = TestEnv::new();
        env.stall();
        env.media("a_slow.mkv", 4096);
        env.media("b_movie.mkv", 4096);

        let mut sup = Supervisor::new(env.config(), Heartbeat::disabled());
        let handle = sup.handle();
        let pauser = handle.clone();
        let watcher = tokio::spawn(async move {
            let mut rx = pauser.subscribe();
            rx.wait_for(|s| s.last_progress.is_some()).await.unwrap();
            pauser.request_pause();
        });

        let report = sup.tick().await;
        watcher.await.unwrap();

        assert!(report.paused);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(outcome_of(&report, "a_slow.mkv"), &CycleOutcome::Paused);
        assert_eq!(env.content("a_slow.mkv"), env.original_content(4096));
        assert_eq!(env.content("b_movie.mkv"), env.original_content(4096));
        assert!(!env.library().join("a_slow.mkv.temp.mkv").exists());
        assert_eq!(handle.snapshot().status, WorkerStatus::Paused);

        env.unstall();
        handle.request_resume();
        let resumed = sup.tick().await;
        assert_eq!(resumed.candidates, 2);
        assert!(matches!(outcome_of(&resumed, "a_slow.mkv"), CycleOutcome::Succeeded { .. }));
        assert!(matches!(outcome_of(&resumed, "b_movie.mkv"), CycleOutcome::Succeeded { .. }));
    }

    #[tokio::test]
    async fn skip_while_paused_abandons_waiting_file() {
        let env = TestEnv::new();
        env.media("b_movie.mkv", 4096);
        let candidate = Candidate {
            path: env.library().join("b_movie.mkv"),
            folder: "library".to_string(),
            detected_codec: "h264".to_string(),
            size_bytes: 4096,
            estimated_output_gb: None,
        };

        let mut sup = Supervisor::new(env.config(), Heartbeat::disabled());
        let handle = sup.handle();
        handle.request_pause();
        let skipper = handle.clone();
        let watcher = tokio::spawn(async move {
            let mut rx = skipper.subscribe();
            rx.wait_for(|s| s.status == WorkerStatus::Paused).await.unwrap();
            skipper.request_skip();
        });

        assert_eq!(sup.process_candidate(&candidate).await, CycleOutcome::Skipped);
        watcher.await.unwrap();
        assert_eq!(env.content("b_movie.mkv"), env.original_content(4096));
        assert!(handle.snapshot().paused);
    }

    #[tokio::test]
    async fn pending_skip_consumes_next_candidate() {
        let env = TestEnv::new();
        env.media("b_movie.mkv", 4096);
        let candidate = Candidate {
            path: env.library().join("b_movie.mkv"),
            folder: "library".to_string(),
            detected_codec: "h264".to_string(),
            size_bytes: 4096,
            estimated_output_gb: None,
        };

        let mut sup = Supervisor::new(env.config(), Heartbeat::disabled());
        sup.handle().request_skip();
        assert_eq!(sup.process_candidate(&candidate).await, CycleOutcome::Skipped);
        assert!(matches!(
            sup.process_candidate(&candidate).await,
            CycleOutcome::Succeeded { .. }
        ));
    }

    #[tokio::test]
    async fn hung_encoder_hits_runtime_guard() {
        let env = TestEnv::new();
        env.stall();
        env.media("a_slow.mkv", 4096);
        let mut cfg = env.config();
        cfg.max_transcode_secs = Some(1);

        let mut sup = Supervisor::new(cfg, Heartbeat::disabled());
        let report = sup.tick().await;
        assert_eq!(
            outcome_of(&report, "a_slow.mkv"),
            &CycleOutcome::Failed("transcode timed out".to_string())
        );
        assert_eq!(env.content("a_slow.mkv"), env.original_content(4096));
        assert!(!sup.ledger().is_processed(&env.library().join("a_slow.mkv")));
    }

    #[tokio::test]
    async fn unreachable_folder_yields_nothing_and_stays_scheduled() {
        let env = TestEnv::new();
        let mut cfg = env.config();
        cfg.folders[0].path = env.root().join("missing");

        let mut sup = Supervisor::new(cfg, Heartbeat::disabled());
        let report = sup.tick().await;
        assert_eq!(report.scanned_folders, 1);
        assert_eq!(report.candidates, 0);
        assert!(sup.schedules[0].last_scan_at.is_some());
    }

    #[tokio::test]
    async fn dedicated_temp_dir_is_used() {
        let env = TestEnv::new();
        env.media("d_movie.mkv", 4096);
        let mut cfg = env.config();
        cfg.temp_dir = Some(env.root().join("scratch"));

        let mut sup = Supervisor::new(cfg, Heartbeat::disabled());
        let report = sup.tick().await;
        assert!(matches!(outcome_of(&report, "d_movie.mkv"), CycleOutcome::Succeeded { .. }));
        assert_eq!(fs::read_dir(env.root().join("scratch")).unwrap().count(), 0);
        assert_eq!(env.library_files().len(), 1);
    }

    #[test]
    fn failed_rollback_leaves_output_for_recovery() {
        let env = TestEnv::new();
        let original = env.media("d_movie.mkv", 4096);
        let output = env.library().join("d_movie.mkv.temp.mkv");
        fs::write(&output, b"new").unwrap();

        let ops = replace::tests::Unwritable { target: original.clone() };
        let err = replace::atomic_replace_with(&ops, &original, &output).unwrap_err();
        assert!(matches!(err, ReplaceError::RollbackFailed { .. }));

        discard_failed_replace(&err, &original, &output);
        assert_eq!(fs::read(sidecar::staging_path(&original)).unwrap(), b"new");
        assert_eq!(
            fs::read(sidecar::backup_path(&original)).unwrap(),
            env.original_content(4096)
        );
    }

    #[test]
    fn restored_replace_discards_output() {
        let env = TestEnv::new();
        let original = env.media("d_movie.mkv", 4096);
        let output = env.library().join("d_movie.mkv.temp.mkv");
        fs::write(&output, b"new").unwrap();
        fs::write(sidecar::staging_path(&original), b"new").unwrap();

        let err = ReplaceError::Restored {
            path: original.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };
        discard_failed_replace(&err, &original, &output);
        assert!(!output.exists());
        assert!(!sidecar::staging_path(&original).exists());
        assert_eq!(env.content("d_movie.mkv"), env.original_content(4096));
    }

    #[tokio::test]
    async fn file_changed_since_scan_is_deferred() {
        let env = TestEnv::new();
        env.media("b_movie.mkv", 4096);
        let candidate = Candidate {
            path: env.library().join("b_movie.mkv"),
            folder: "library".to_string(),
            detected_codec: "h264".to_string(),
            size_bytes: 2048,
            estimated_output_gb: None,
        };

        let mut sup = Supervisor::new(env.config(), Heartbeat::disabled());
        assert_eq!(
            sup.process_candidate(&candidate).await,
            CycleOutcome::Deferred("file changed since scan".to_string())
        );
        assert_eq!(env.content("b_movie.mkv"), env.original_content(4096));
        assert!(!sup.ledger().is_processed(&candidate.path));
        assert!(!env.library().join("b_movie.mkv.temp.mkv").exists());
    }
}
