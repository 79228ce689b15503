use std::path::{Path, PathBuf};
use anyhow::{bail, Result};
use log::{debug, info, warn};
use walkdir::WalkDir;
use crate::config::WatchdogConfig;
use crate::estimator::{Estimator, Verdict};
use crate::ffprobe;
use crate::schedule::FolderSchedule;
use crate::sidecar;
use crate::state::Ledger;

/// Media file extensions to consider for transcoding
pub const MEDIA_EXTENSIONS: &[&str] = &["mkv", "mp4", "m4v", "avi", "mov"];

/// Skip reason for files already in the target codec family
pub const REASON_EFFICIENT: &str = "efficient codec";

/// A file worth re-encoding in the current cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub path: PathBuf,
    pub folder: String,
    pub detected_codec: String,
    pub size_bytes: u64,
    /// None when the estimator failed open
    pub estimated_output_gb: Option<f64>,
}

/// Counters for one folder scan
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScanSummary {
    pub media_files: usize,
    pub already_converted: usize,
    pub already_processed: usize,
    pub indeterminate: usize,
    pub rejected: usize,
}

/// Whether a path looks like a media file we can convert
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Walk a folder and return the sorted list of media files, excluding
/// the daemon's own outputs
pub fn collect_media_files(cfg: &WatchdogConfig, root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Directory unreachable: {}", root.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !is_media_file(path) || sidecar::is_daemon_artifact(cfg, path) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

/// Scan one folder for candidates.
///
/// Terminal rejections (efficient codec, estimator says no) are written to
/// the ledger as they are found. Probe failures leave no trace so the file
/// is retried next cycle.
pub async fn scan_folder(
    cfg: &WatchdogConfig,
    estimator: &Estimator,
    folder: &FolderSchedule,
    ledger: &mut Ledger,
) -> Result<(Vec<Candidate>, ScanSummary)> {
    info!("Scanning directory: {}", folder.path.display());
    let files = collect_media_files(cfg, &folder.path)?;

    let mut summary = ScanSummary {
        media_files: files.len(),
        ..ScanSummary::default()
    };
    let mut candidates = Vec::new();

    for path in files {
        if sidecar::has_converted_output(cfg, &path) {
            debug!("Converted output exists, skipping: {}", path.display());
            summary.already_converted += 1;
            continue;
        }
        if ledger.is_processed(&path) {
            summary.already_processed += 1;
            continue;
        }

        let codec = match ffprobe::probe_codec(cfg, &path).await {
            Ok(c) => c,
            Err(e) => {
                debug!("Codec indeterminate for {}: {}", path.display(), e);
                summary.indeterminate += 1;
                continue;
            }
        };

        if cfg.is_efficient_codec(&codec) {
            info!("Already {}: {}", codec, path.display());
            ledger.record_skip(&path, REASON_EFFICIENT, file_size(&path));
            summary.rejected += 1;
            continue;
        }

        let estimate = estimator.estimate_file(&codec, &path);
        if let Some(reason) = estimate.verdict.skip_reason() {
            info!(
                "Not worth converting ({}): {} [{} ratio {:.2}, {:.2} GB]",
                reason,
                path.display(),
                codec,
                estimate.ratio,
                estimate.original_gb
            );
            ledger.record_skip(&path, reason, file_size(&path));
            summary.rejected += 1;
            continue;
        }

        if estimate.verdict == Verdict::FailedOpen {
            warn!("Estimate unavailable, queueing anyway: {}", path.display());
        } else {
            info!(
                "Found candidate: {} ({}, {:.2} GB -> ~{:.2} GB)",
                path.display(),
                codec,
                estimate.original_gb,
                estimate.estimated_output_gb.unwrap_or_default()
            );
        }
        candidates.push(Candidate {
            size_bytes: file_size(&path),
            path,
            folder: folder.display_name.clone(),
            detected_codec: codec,
            estimated_output_gb: estimate.estimated_output_gb,
        });
    }

    info!(
        "Finished scanning {}: {} media files, {} candidates, {} rejected, {} already processed, {} indeterminate",
        folder.path.display(),
        summary.media_files,
        candidates.len(),
        summary.rejected,
        summary.already_processed,
        summary.indeterminate
    );
    Ok((candidates, summary))
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
