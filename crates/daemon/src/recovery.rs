use std::fs;
use std::path::{Path, PathBuf};
use log::{info, warn};
use walkdir::WalkDir;
use crate::config::WatchdogConfig;
use crate::sidecar::{self, BACKUP_SUFFIX, STAGING_SUFFIX};

/// What the startup sweep found
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecoveryReport {
    pub removed_temp_files: usize,
    pub removed_staging_files: usize,
    /// Backups left by an interrupted replace; never touched automatically
    pub orphaned_backups: Vec<PathBuf>,
}

/// Remove stale encoder outputs left by a previous run and report
/// interrupted replaces.
pub fn recover(cfg: &WatchdogConfig) -> RecoveryReport {
    info!("🔍 Checking for orphaned temp files...");
    let mut report = RecoveryReport::default();

    if let Some(temp_dir) = &cfg.temp_dir {
        if let Ok(entries) = fs::read_dir(temp_dir) {
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.is_file() && name_ends_with(&path, &cfg.output_suffix) && remove(&path) {
                    report.removed_temp_files += 1;
                }
            }
        }
    }

    for folder in &cfg.folders {
        if !folder.path.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&folder.path).follow_links(false).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();

            if name_ends_with(path, &cfg.temp_suffix) {
                if has_original(path, &cfg.temp_suffix) && remove(path) {
                    report.removed_temp_files += 1;
                }
            } else if name_ends_with(path, STAGING_SUFFIX) {
                // Only safe while the original is still in place
                let original_present = has_original(path, STAGING_SUFFIX);
                if original_present && remove(path) {
                    report.removed_staging_files += 1;
                } else if !original_present {
                    warn!("Staged output without original, leaving for manual recovery: {}", path.display());
                }
            } else if name_ends_with(path, BACKUP_SUFFIX) {
                warn!(
                    "⚠️  Backup from an interrupted replace needs manual recovery: {}",
                    path.display()
                );
                report.orphaned_backups.push(path.to_path_buf());
            }
        }
    }

    info!(
        "✅ Startup recovery complete: {} temp file(s) and {} staging file(s) removed, {} backup(s) need attention",
        report.removed_temp_files,
        report.removed_staging_files,
        report.orphaned_backups.len()
    );
    report
}

fn name_ends_with(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(suffix))
        .unwrap_or(false)
}

fn has_original(path: &Path, suffix: &str) -> bool {
    sidecar::original_for(path, suffix)
        .map(|o| o.is_file())
        .unwrap_or(false)
}

fn remove(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            info!("🗑️  Deleted orphaned file: {}", path.display());
            true
        }
        Err(e) => {
            warn!("Failed to delete orphaned file {}: {}", path.display(), e);
            false
        }
    }
}
