use std::path::PathBuf;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use crate::config::FolderConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FolderStatus {
    Idle,
    Scanning,
}

/// Per-folder scan bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderSchedule {
    #[serde(serialize_with = "crate::state::serialize_path_lossy")]
    pub path: PathBuf,
    pub display_name: String,
    pub interval_secs: u64,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub next_scan_at: Option<DateTime<Utc>>,
    pub status: FolderStatus,
}

impl FolderSchedule {
    pub fn new(folder: &FolderConfig) -> Self {
        Self {
            path: folder.path.clone(),
            display_name: folder.display_name(),
            interval_secs: folder.scan_interval_secs,
            last_scan_at: None,
            next_scan_at: None,
            status: FolderStatus::Idle,
        }
    }

    fn interval(&self) -> Duration {
        Duration::seconds(self.interval_secs.min(i64::MAX as u64) as i64)
    }

    /// True if never scanned or the interval has elapsed
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_scan_at {
            None => true,
            Some(last) => now - last >= self.interval(),
        }
    }

    pub fn mark_scanned(&mut self, now: DateTime<Utc>) {
        self.last_scan_at = Some(now);
        self.next_scan_at = Some(now + self.interval());
        self.status = FolderStatus::Idle;
    }

    /// Force a rescan on the next tick (used when a pause abandons the queue)
    pub fn mark_due(&mut self) {
        self.last_scan_at = None;
        self.next_scan_at = None;
    }

    /// Zero when due now
    pub fn time_until_next_scan(&self, now: DateTime<Utc>) -> Duration {
        match self.next_scan_at {
            Some(next) if next > now => next - now,
            _ => Duration::zero(),
        }
    }

    /// Human-readable form of `time_until_next_scan`
    pub fn describe_next_scan(&self, now: DateTime<Utc>) -> String {
        let remaining = self.time_until_next_scan(now);
        if remaining <= Duration::zero() {
            "due now".to_string()
        } else {
            format!("in {}", format_duration(remaining))
        }
    }
}

/// Indices of the schedules due at `now`, in configuration order
pub fn due_folders(schedules: &[FolderSchedule], now: DateTime<Utc>) -> Vec<usize> {
    schedules
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_due(now))
        .map(|(i, _)| i)
        .collect()
}

pub fn format_duration(d: Duration) -> String {
    let total = d.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
