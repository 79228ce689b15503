use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use anyhow::{Context, Result};
use log::{debug, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use crate::config::WatchdogConfig;

/// Grace period between SIGTERM and SIGKILL
const KILL_GRACE: Duration = Duration::from_secs(10);

/// Build the ffmpeg argument list for one HEVC transcode
pub fn encoder_args(cfg: &WatchdogConfig, input: &Path, output: &Path) -> Vec<OsString> {
    let crf = cfg.crf.to_string();
    let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-y", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(input.as_os_str().to_owned());

    // Keep every stream; only video is re-encoded
    args.extend(
        [
            "-map", "0",
            "-c:v", cfg.video_encoder.as_str(),
            "-crf", crf.as_str(),
            "-preset", cfg.preset.as_str(),
            "-c:a", "copy",
            "-c:s", "copy",
            "-max_muxing_queue_size", "1024",
        ]
        .into_iter()
        .map(OsString::from),
    );
    args.extend(cfg.extra_encoder_args.iter().map(OsString::from));

    // One key=value progress line per update on stdout
    args.extend(["-nostats", "-progress", "pipe:1"].into_iter().map(OsString::from));
    args.push(output.as_os_str().to_owned());
    args
}

/// True for `-progress` key=value lines and classic stats lines
pub fn is_progress_line(line: &str) -> bool {
    const KEYS: &[&str] = &[
        "frame=", "fps=", "stream_", "bitrate=", "total_size=", "out_time", "dup_frames=",
        "drop_frames=", "speed=", "progress=",
    ];
    KEYS.iter().any(|k| line.starts_with(k)) || (line.contains("frame=") && line.contains("time="))
}

/// A running encoder whose stdout and stderr are merged into one line stream
#[derive(Debug)]
pub struct EncoderProcess {
    child: Child,
    pid: Option<u32>,
    lines: mpsc::Receiver<String>,
}

impl EncoderProcess {
    pub fn spawn(cfg: &WatchdogConfig, input: &Path, output: &Path) -> Result<Self> {
        let args = encoder_args(cfg, input, output);
        debug!("ffmpeg command: {} {:?}", cfg.ffmpeg_bin.display(), args);

        let mut cmd = Command::new(&cfg.ffmpeg_bin);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so the whole tree can be signalled
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to execute ffmpeg for: {}", input.display()))?;
        let pid = child.id();

        let (tx, lines) = mpsc::channel(256);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(BufReader::new(stdout), tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(BufReader::new(stderr), tx));
        }

        Ok(Self { child, pid, lines })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Next line of combined output; None once both streams are closed
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().await.context("Failed to wait for ffmpeg")
    }

    /// Terminate the encoder and all of its descendants
    pub async fn terminate_tree(&mut self) {
        let Some(pid) = self.pid else {
            let _ = self.child.kill().await;
            return;
        };
        signal_tree(pid, false).await;

        if tokio::time::timeout(KILL_GRACE, self.child.wait()).await.is_err() {
            warn!("ffmpeg (PID {}) ignored SIGTERM, killing", pid);
            signal_tree(pid, true).await;
            let _ = self.child.kill().await;
        }
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("ffmpeg output read error: {}", e);
                break;
            }
        }
    }
}

#[cfg(unix)]
async fn signal_tree(pid: u32, force: bool) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    // The child leads its own process group (pgid == pid)
    if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
        debug!("killpg({}, {}) failed: {}", pid, signal, e);
    }
}

#[cfg(windows)]
async fn signal_tree(pid: u32, _force: bool) {
    let result = Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = result {
        debug!("taskkill for PID {} failed: {}", pid, e);
    }
}
