//! Durable, best-effort JSON state: cumulative statistics and the
//! processed-file history.
//!
//! Loads never fail: a missing or malformed document yields the zero value.
//! Saves never abort the caller: a failed write is logged and the daemon
//! keeps going.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use crate::estimator::bytes_to_gb;

/// Cumulative counters, only ever increased
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    #[serde(alias = "processed")]
    pub files_processed: u64,
    #[serde(alias = "gb_proc")]
    pub gb_processed: f64,
    pub gb_saved: f64,
    pub files_skipped: u64,
    pub gb_skipped: f64,
    pub skip_reasons: BTreeMap<String, u64>,
}

impl Stats {
    pub fn record_conversion(&mut self, original_bytes: u64, output_bytes: u64) {
        self.files_processed += 1;
        self.gb_processed += bytes_to_gb(original_bytes);
        self.gb_saved += bytes_to_gb(original_bytes.saturating_sub(output_bytes));
    }

    pub fn record_skip(&mut self, reason: &str, bytes: u64) {
        self.files_skipped += 1;
        self.gb_skipped += bytes_to_gb(bytes);
        *self.skip_reasons.entry(reason.to_string()).or_insert(0) += 1;
    }
}

/// Paths that need no further action
pub type ProcessedSet = BTreeSet<PathBuf>;

/// One processed-history entry on disk. Paths that are not valid UTF-8
/// are kept as raw bytes so they survive a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredPath {
    Text(String),
    Raw { raw: Vec<u8> },
}

impl StoredPath {
    fn from_path(path: &Path) -> Option<Self> {
        match path.to_str() {
            Some(s) => Some(StoredPath::Text(s.to_string())),
            None => raw_bytes(path).map(|raw| StoredPath::Raw { raw }),
        }
    }

    fn into_path(self) -> Option<PathBuf> {
        match self {
            StoredPath::Text(s) => Some(PathBuf::from(s)),
            StoredPath::Raw { raw } => path_from_raw(raw),
        }
    }
}

#[cfg(unix)]
fn raw_bytes(path: &Path) -> Option<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;
    Some(path.as_os_str().as_bytes().to_vec())
}

#[cfg(not(unix))]
fn raw_bytes(_path: &Path) -> Option<Vec<u8>> {
    None
}

#[cfg(unix)]
fn path_from_raw(raw: Vec<u8>) -> Option<PathBuf> {
    use std::os::unix::ffi::OsStringExt;
    Some(PathBuf::from(std::ffi::OsString::from_vec(raw)))
}

#[cfg(not(unix))]
fn path_from_raw(_raw: Vec<u8>) -> Option<PathBuf> {
    None
}

/// `serialize_with` for display-only paths: never fails on non-UTF-8 names
pub(crate) fn serialize_path_lossy<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&path.to_string_lossy())
}

pub(crate) fn serialize_opt_path_lossy<S: Serializer>(
    path: &Option<PathBuf>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match path {
        Some(p) => serializer.serialize_some(&p.to_string_lossy()),
        None => serializer.serialize_none(),
    }
}

/// File locations of the persisted documents
#[derive(Debug, Clone)]
pub struct StateStore {
    stats_path: PathBuf,
    processed_path: PathBuf,
}

impl StateStore {
    pub fn new(stats_path: PathBuf, processed_path: PathBuf) -> Self {
        Self { stats_path, processed_path }
    }

    pub fn load_stats(&self) -> Stats {
        load_or_default(&self.stats_path)
    }

    pub fn save_stats(&self, stats: &Stats) {
        if let Err(e) = write_json(&self.stats_path, stats) {
            warn!("Failed to save stats: {:#}", e);
        }
    }

    pub fn load_processed(&self) -> ProcessedSet {
        let stored: Vec<StoredPath> = load_or_default(&self.processed_path);
        stored.into_iter().filter_map(StoredPath::into_path).collect()
    }

    pub fn save_processed(&self, processed: &ProcessedSet) {
        let stored: Vec<StoredPath> = processed
            .iter()
            .filter_map(|p| {
                let entry = StoredPath::from_path(p);
                if entry.is_none() {
                    debug!("Keeping unencodable path in memory only: {}", p.display());
                }
                entry
            })
            .collect();
        if let Err(e) = write_json(&self.processed_path, &stored) {
            warn!("Failed to save processed history: {:#}", e);
        }
    }
}

fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            debug!("No state at {} ({}), starting empty", path.display(), e);
            return T::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            warn!("Malformed state file {}: {} - starting empty", path.display(), e);
            T::default()
        }
    }
}

/// Rewrite a JSON document wholesale through a temp file and rename
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create state directory: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value).context("Failed to serialize state")?;
    let tmp = crate::sidecar::with_suffix(path, ".tmp");
    fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

/// In-memory stats and history with write-through persistence
#[derive(Debug)]
pub struct Ledger {
    store: StateStore,
    stats: Stats,
    processed: ProcessedSet,
}

impl Ledger {
    /// Load both documents from the store
    pub fn open(store: StateStore) -> Self {
        let stats = store.load_stats();
        let processed = store.load_processed();
        Self { store, stats, processed }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn processed(&self) -> &ProcessedSet {
        &self.processed
    }

    pub fn is_processed(&self, path: &Path) -> bool {
        self.processed.contains(path)
    }

    /// Terminal decision: never offer this file again, counted as a skip
    pub fn record_skip(&mut self, path: &Path, reason: &str, bytes: u64) {
        self.stats.record_skip(reason, bytes);
        self.processed.insert(path.to_path_buf());
        self.store.save_processed(&self.processed);
        self.store.save_stats(&self.stats);
    }

    /// Successful in-place conversion
    pub fn record_conversion(&mut self, path: &Path, original_bytes: u64, output_bytes: u64) {
        self.stats.record_conversion(original_bytes, output_bytes);
        self.processed.insert(path.to_path_buf());
        self.store.save_processed(&self.processed);
        self.store.save_stats(&self.stats);
    }
}
