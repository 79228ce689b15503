use std::ffi::OsString;
use std::path::{Path, PathBuf};
use crate::config::WatchdogConfig;

/// Suffix of the original kept aside during the fallback replace
pub const BACKUP_SUFFIX: &str = ".backup";
/// Suffix of the re-encoded file staged beside the original before the final rename
pub const STAGING_SUFFIX: &str = ".replace";

/// Append a suffix to the full file name ("a.mkv" + ".x" = "a.mkv.x")
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn file_name_ends_with(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(suffix))
        .unwrap_or(false)
}

/// Path of the converted sibling output for a media file
pub fn converted_output_path(cfg: &WatchdogConfig, file_path: &Path) -> PathBuf {
    with_suffix(file_path, &cfg.output_suffix)
}

/// Check if a converted sibling output exists for a file
pub fn has_converted_output(cfg: &WatchdogConfig, file_path: &Path) -> bool {
    converted_output_path(cfg, file_path).exists()
}

/// True for files the daemon itself produced (converted markers and temp outputs)
pub fn is_daemon_artifact(cfg: &WatchdogConfig, file_path: &Path) -> bool {
    file_name_ends_with(file_path, &cfg.output_suffix)
        || file_name_ends_with(file_path, &cfg.temp_suffix)
}

/// Where the encoder writes its output for a given source file
pub fn temp_output_path(cfg: &WatchdogConfig, file_path: &Path) -> PathBuf {
    match (&cfg.temp_dir, file_path.file_name()) {
        (Some(dir), Some(name)) => {
            let mut name = name.to_owned();
            name.push(&cfg.output_suffix);
            dir.join(name)
        }
        _ => with_suffix(file_path, &cfg.temp_suffix),
    }
}

pub fn backup_path(file_path: &Path) -> PathBuf {
    with_suffix(file_path, BACKUP_SUFFIX)
}

pub fn staging_path(file_path: &Path) -> PathBuf {
    with_suffix(file_path, STAGING_SUFFIX)
}

/// Strip a suffix from a file path, returning the original it belongs to
pub fn original_for(path: &Path, suffix: &str) -> Option<PathBuf> {
    let s = path.to_str()?;
    s.strip_suffix(suffix)
        .filter(|rest| !rest.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixes_are_appended_to_full_name() {
        let cfg = WatchdogConfig::default_config();
        let p = Path::new("/films/movie.mkv");
        assert_eq!(converted_output_path(&cfg, p), PathBuf::from("/films/movie.mkv.hevc.mkv"));
        assert_eq!(backup_path(p), PathBuf::from("/films/movie.mkv.backup"));
        assert_eq!(staging_path(p), PathBuf::from("/films/movie.mkv.replace"));
    }

    #[test]
    fn temp_output_prefers_temp_dir() {
        let mut cfg = WatchdogConfig::default_config();
        let p = Path::new("/films/movie.mkv");
        assert_eq!(temp_output_path(&cfg, p), PathBuf::from("/films/movie.mkv.temp.mkv"));

        cfg.temp_dir = Some(PathBuf::from("/scratch"));
        assert_eq!(temp_output_path(&cfg, p), PathBuf::from("/scratch/movie.mkv.hevc.mkv"));
    }

    #[test]
    fn artifacts_are_recognised() {
        let cfg = WatchdogConfig::default_config();
        assert!(is_daemon_artifact(&cfg, Path::new("/films/a.mkv.hevc.mkv")));
        assert!(is_daemon_artifact(&cfg, Path::new("/films/a.mkv.temp.mkv")));
        assert!(!is_daemon_artifact(&cfg, Path::new("/films/a.mkv")));
    }

    #[test]
    fn original_for_strips_suffix() {
        assert_eq!(
            original_for(Path::new("/films/a.mkv.backup"), BACKUP_SUFFIX),
            Some(PathBuf::from("/films/a.mkv"))
        );
        assert_eq!(original_for(Path::new("/films/a.mkv"), BACKUP_SUFFIX), None);
    }
}
