use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use log::debug;
use thiserror::Error;
use tokio::process::Command;
use crate::config::WatchdogConfig;

/// Reasons a codec probe is indeterminate
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("probe exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },
    #[error("no video stream reported")]
    NoVideoStream,
}

/// Probe the codec of the first video stream.
///
/// Returns the bare lower-cased codec token (e.g. "h264").
pub async fn probe_codec(cfg: &WatchdogConfig, file_path: &Path) -> Result<String, ProbeError> {
    let mut cmd = Command::new(&cfg.ffprobe_bin);
    cmd.arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=codec_name")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(file_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let timeout = cfg.probe_timeout();
    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.map_err(|source| ProbeError::Spawn {
            bin: cfg.ffprobe_bin.display().to_string(),
            source,
        })?,
        Err(_) => return Err(ProbeError::Timeout(timeout)),
    };

    if !output.status.success() {
        return Err(ProbeError::Failed {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let codec = parse_codec(&String::from_utf8_lossy(&output.stdout))
        .ok_or(ProbeError::NoVideoStream)?;
    debug!("ffprobe: {} -> {}", file_path.display(), codec);
    Ok(codec)
}

/// First non-empty output line, lower-cased
fn parse_codec(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_lowercase)
}
