use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// A library folder watched by the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FolderConfig {
    /// Root directory scanned recursively
    pub path: PathBuf,
    /// Name shown in the status snapshot (defaults to the last path component)
    #[serde(default)]
    pub name: Option<String>,
    /// Seconds between two scans of this folder
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
}

impl FolderConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            name: None,
            scan_interval_secs: default_scan_interval(),
        }
    }

    /// Display name for status output
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

fn default_scan_interval() -> u64 {
    3600
}

/// Configuration for the HEVC watchdog daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Library folders to scan for media files
    pub folders: Vec<FolderConfig>,
    /// Directory holding stats.json, processed.json, status.json and control/
    pub state_dir: PathBuf,
    /// Dedicated directory for encoder output; sibling temp files are used when unset
    pub temp_dir: Option<PathBuf>,
    /// Marker suffix of already converted files (e.g. "movie.mkv.hevc.mkv")
    pub output_suffix: String,
    /// Suffix of in-progress sibling encoder outputs
    pub temp_suffix: String,
    pub ffprobe_bin: PathBuf,
    pub ffmpeg_bin: PathBuf,
    /// Seconds before a codec probe is abandoned as indeterminate
    pub probe_timeout_secs: u64,
    /// ffmpeg video encoder name
    pub video_encoder: String,
    pub crf: u32,
    pub preset: String,
    /// Additional arguments placed before the output path
    pub extra_encoder_args: Vec<String>,
    /// Codecs that never need re-encoding (target codec family)
    pub efficient_codecs: Vec<String>,
    /// Expected output/input size ratio per lower-cased source codec
    pub codec_ratios: BTreeMap<String, f64>,
    /// Ratio used for codecs missing from `codec_ratios`
    pub default_ratio: f64,
    /// Ratios at or above this value never pay off
    pub no_benefit_ratio: f64,
    /// Minimum expected saving in GB for a file to be worth converting
    pub min_savings_gb: f64,
    /// Quiescent sleep between two supervisor ticks
    pub tick_interval_secs: u64,
    /// Hard runtime limit for a single transcode (None disables the guard)
    pub max_transcode_secs: Option<u64>,
    /// Optional push-monitor URL pinged at scan start and after every file
    pub heartbeat_url: Option<String>,
    /// Accepted for compatibility; processing is always sequential
    pub parallel_processing: bool,
    /// Optional log file receiving a copy of every log record
    pub log_file: Option<PathBuf>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Built-in codec -> size ratio table.
///
/// Legacy MPEG-family codecs shrink dramatically under HEVC, near-modern
/// codecs barely move, and AV1 output would usually grow.
pub fn default_codec_ratios() -> BTreeMap<String, f64> {
    [
        ("mpeg1video", 0.25),
        ("mpeg2video", 0.30),
        ("msmpeg4v2", 0.40),
        ("msmpeg4v3", 0.40),
        ("mpeg4", 0.40),
        ("wmv3", 0.45),
        ("vc1", 0.45),
        ("vp8", 0.50),
        ("h264", 0.55),
        ("avc", 0.55),
        ("vp9", 0.95),
        ("av1", 1.15),
    ]
    .into_iter()
    .map(|(codec, ratio)| (codec.to_string(), ratio))
    .collect()
}

impl WatchdogConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            folders: vec![FolderConfig::new("/media")],
            state_dir: PathBuf::from("/config"),
            temp_dir: None,
            output_suffix: ".hevc.mkv".to_string(),
            temp_suffix: ".temp.mkv".to_string(),
            ffprobe_bin: PathBuf::from("ffprobe"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            probe_timeout_secs: 15,
            video_encoder: "libx265".to_string(),
            crf: 26,
            preset: "medium".to_string(),
            extra_encoder_args: Vec::new(),
            efficient_codecs: vec!["hevc".to_string(), "h265".to_string()],
            codec_ratios: default_codec_ratios(),
            default_ratio: 0.60,
            no_benefit_ratio: 0.95,
            min_savings_gb: 0.5,
            tick_interval_secs: 60,
            max_transcode_secs: Some(12 * 3600),
            heartbeat_url: None,
            parallel_processing: false,
            log_file: None,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        config.absolutize_folders()?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve relative folder paths against the working directory
    pub fn absolutize_folders(&mut self) -> Result<()> {
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        for folder in &mut self.folders {
            if folder.path.is_relative() {
                folder.path = cwd.join(&folder.path);
            }
        }
        Ok(())
    }

    /// Reject configurations the supervisor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.folders.is_empty() {
            bail!("No folders configured");
        }
        if let Some(folder) = self.folders.iter().find(|f| f.scan_interval_secs == 0) {
            bail!("Scan interval must be positive for folder {}", folder.path.display());
        }
        if self.tick_interval_secs == 0 {
            bail!("tick_interval_secs must be positive");
        }
        if self.probe_timeout_secs == 0 {
            bail!("probe_timeout_secs must be positive");
        }
        if self.output_suffix.is_empty() || self.temp_suffix.is_empty() {
            bail!("output_suffix and temp_suffix must not be empty");
        }
        if self.output_suffix == self.temp_suffix {
            bail!("output_suffix and temp_suffix must differ");
        }
        if self.default_ratio <= 0.0 || self.no_benefit_ratio <= 0.0 {
            bail!("Codec ratios must be positive");
        }
        if let Some((codec, ratio)) = self.codec_ratios.iter().find(|(_, r)| **r <= 0.0) {
            bail!("Ratio for codec {} must be positive, got {}", codec, ratio);
        }
        if self.min_savings_gb < 0.0 {
            bail!("min_savings_gb must not be negative");
        }
        Ok(())
    }

    pub fn stats_path(&self) -> PathBuf {
        self.state_dir.join("stats.json")
    }

    pub fn processed_path(&self) -> PathBuf {
        self.state_dir.join("processed.json")
    }

    pub fn status_path(&self) -> PathBuf {
        self.state_dir.join("status.json")
    }

    /// Directory polled for pause/resume/skip command files
    pub fn command_dir(&self) -> PathBuf {
        self.state_dir.join("control")
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn max_transcode(&self) -> Option<Duration> {
        self.max_transcode_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }

    /// Whether a codec belongs to the efficient set
    pub fn is_efficient_codec(&self, codec: &str) -> bool {
        let codec = codec.to_lowercase();
        self.efficient_codecs.iter().any(|c| c.eq_ignore_ascii_case(&codec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"folders": [{"path": "/films", "name": "Films"}], "crf": 24}"#,
        )
        .unwrap();

        let cfg = WatchdogConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.folders.len(), 1);
        assert_eq!(cfg.folders[0].display_name(), "Films");
        assert_eq!(cfg.folders[0].scan_interval_secs, 3600);
        assert_eq!(cfg.crf, 24);
        assert_eq!(cfg.preset, "medium");
        assert_eq!(cfg.codec_ratios.get("h264"), Some(&0.55));
    }

    #[test]
    fn toml_config_is_parsed_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "min_savings_gb = 1.0\n\n[[folders]]\npath = \"/tv\"\nscan_interval_secs = 600\n",
        )
        .unwrap();

        let cfg = WatchdogConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.min_savings_gb, 1.0);
        assert_eq!(cfg.folders[0].display_name(), "tv");
        assert_eq!(cfg.folders[0].scan_interval_secs, 600);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = WatchdogConfig::load_config(Some(Path::new("/nonexistent/config.json"))).unwrap();
        assert_eq!(cfg.output_suffix, ".hevc.mkv");
        assert!(cfg.is_efficient_codec("HEVC"));
        assert!(!cfg.is_efficient_codec("av1"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = WatchdogConfig::default_config();
        cfg.folders.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = WatchdogConfig::default_config();
        cfg.folders[0].scan_interval_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = WatchdogConfig::default_config();
        cfg.codec_ratios.insert("h264".to_string(), 0.0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_tick_and_probe_timeout_are_rejected() {
        let mut cfg = WatchdogConfig::default_config();
        cfg.tick_interval_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = WatchdogConfig::default_config();
        cfg.probe_timeout_secs = 0;
        assert!(cfg.validate().is_err());

        assert!(WatchdogConfig::default_config().validate().is_ok());
    }

    #[test]
    fn relative_folders_become_absolute() {
        let mut cfg = WatchdogConfig::default_config();
        cfg.folders = vec![FolderConfig::new("films")];
        cfg.absolutize_folders().unwrap();
        assert!(cfg.folders[0].path.is_absolute());
    }
}
