//! External remux/copy step: ffmpeg stream-copies the remote stream to a
//! local MP4.
//!
//! The child process gets reconnect flags for dropped HTTP connections
//! and runs under a watchdog: if its stderr goes silent for a fixed
//! window the process is killed, so a hung child can never pin a pool
//! slot indefinitely. Progress is parsed from the stderr `time=` lines
//! ffmpeg emits while copying.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, instrument, warn};

use super::DownloadError;
use crate::util::compile_static_regex;

/// Default no-progress window before the watchdog kills the child.
const DEFAULT_WATCHDOG: Duration = Duration::from_secs(45);

/// Timeout for best-effort thumbnail extraction.
const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(30);

/// `Duration: HH:MM:SS.xx` line in ffmpeg stderr.
static DURATION_LINE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"Duration:\s*(\d+):(\d+):(\d+\.?\d*)"));

/// `time=HH:MM:SS.xx` progress field in ffmpeg stderr.
static TIME_FIELD: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"time=(\d+):(\d+):(\d+\.?\d*)"));

/// One progress observation from the remux child.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemuxProgress {
    /// Media seconds written so far.
    pub media_secs: f64,
    /// Total media duration, once known (from the store or ffmpeg itself).
    pub total_secs: Option<f64>,
}

/// Wrapper around the external ffmpeg binary.
#[derive(Debug, Clone)]
pub struct Remuxer {
    ffmpeg: PathBuf,
    watchdog: Duration,
}

impl Remuxer {
    /// Locates ffmpeg on PATH.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::RemuxerNotFound`] when absent.
    pub fn locate() -> Result<Self, DownloadError> {
        let ffmpeg = which::which("ffmpeg").map_err(|_| DownloadError::RemuxerNotFound)?;
        Ok(Self::new(ffmpeg, DEFAULT_WATCHDOG))
    }

    /// Creates a remuxer over an explicit binary path.
    #[must_use]
    pub fn new(ffmpeg: PathBuf, watchdog: Duration) -> Self {
        Self { ffmpeg, watchdog }
    }

    /// Stream-copies `stream_url` into `out_path`.
    ///
    /// `known_duration_secs` seeds percent computation before ffmpeg
    /// reports its own `Duration:` line. Progress observations go to
    /// `progress`; `cancel` terminates the child on pipeline shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Spawn`] / [`DownloadError::Stalled`] /
    /// [`DownloadError::ExitStatus`] / [`DownloadError::Cancelled`] /
    /// [`DownloadError::Io`], each produced at the failure point.
    #[instrument(skip(self, progress, cancel), fields(out = %out_path.display()))]
    pub async fn remux(
        &self,
        stream_url: &str,
        out_path: &Path,
        known_duration_secs: Option<f64>,
        progress: &mpsc::UnboundedSender<RemuxProgress>,
        cancel: &Notify,
    ) -> Result<(), DownloadError> {
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DownloadError::io(parent, source))?;
        }

        let mut child = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-hide_banner")
            .args(["-protocol_whitelist", "file,http,https,tcp,tls,crypto,hls"])
            // Reconnect on dropped HTTP connections instead of aborting
            .args(["-reconnect", "1"])
            .args(["-reconnect_streamed", "1"])
            .args(["-reconnect_delay_max", "5"])
            .args(["-i", stream_url])
            .args(["-c:v", "copy"])
            .arg("-an")
            .args(["-movflags", "+faststart"])
            .arg(out_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DownloadError::Spawn { source })?;

        let stderr = child.stderr.take();
        let mut total_secs = known_duration_secs;

        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                tokio::select! {
                    line = tokio::time::timeout(self.watchdog, lines.next_line()) => {
                        match line {
                            Err(_) => {
                                // Silent child: kill it and free the slot
                                warn!(stalled_secs = self.watchdog.as_secs(), "remux watchdog fired");
                                let _ = child.kill().await;
                                return Err(DownloadError::Stalled {
                                    stalled_secs: self.watchdog.as_secs(),
                                });
                            }
                            Ok(Ok(Some(line))) => {
                                if total_secs.is_none()
                                    && let Some(secs) = parse_duration_line(&line)
                                {
                                    debug!(secs, "remux reported media duration");
                                    total_secs = Some(secs);
                                }
                                if let Some(media_secs) = parse_time_field(&line) {
                                    let _ = progress.send(RemuxProgress { media_secs, total_secs });
                                }
                            }
                            Ok(Ok(None)) => break,
                            Ok(Err(error)) => {
                                debug!(%error, "remux stderr read failed");
                                break;
                            }
                        }
                    }
                    () = cancel.notified() => {
                        let _ = child.kill().await;
                        return Err(DownloadError::Cancelled);
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|source| DownloadError::Spawn { source })?;

        if !status.success() {
            return Err(DownloadError::ExitStatus {
                code: status.code(),
            });
        }

        // A zero-byte output with exit 0 still counts as a failed copy
        let metadata = tokio::fs::metadata(out_path)
            .await
            .map_err(|source| DownloadError::io(out_path, source))?;
        if metadata.len() == 0 {
            return Err(DownloadError::ExitStatus { code: Some(0) });
        }

        Ok(())
    }

    /// Extracts a single-frame thumbnail from a downloaded file.
    ///
    /// Best effort: callers log the error and move on.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Spawn`] / [`DownloadError::ExitStatus`] /
    /// [`DownloadError::Stalled`] on failure.
    #[instrument(skip(self), fields(input = %input.display()))]
    pub async fn extract_thumbnail(&self, input: &Path, out: &Path) -> Result<(), DownloadError> {
        if let Some(parent) = out.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DownloadError::io(parent, source))?;
        }

        let mut child = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-hide_banner")
            .args(["-ss", "3"])
            .arg("-i")
            .arg(input)
            .args(["-frames:v", "1"])
            .args(["-vf", "thumbnail,scale=320:-1"])
            .args(["-q:v", "3"])
            .arg(out)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DownloadError::Spawn { source })?;

        match tokio::time::timeout(THUMBNAIL_TIMEOUT, child.wait()).await {
            Err(_) => {
                let _ = child.kill().await;
                Err(DownloadError::Stalled {
                    stalled_secs: THUMBNAIL_TIMEOUT.as_secs(),
                })
            }
            Ok(Err(source)) => Err(DownloadError::Spawn { source }),
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(DownloadError::ExitStatus {
                code: status.code(),
            }),
        }
    }
}

/// Parses ffmpeg's `Duration:` stderr line into seconds.
fn parse_duration_line(line: &str) -> Option<f64> {
    let caps = DURATION_LINE.captures(line)?;
    clock_to_secs(&caps[1], &caps[2], &caps[3])
}

/// Parses the `time=` field of an ffmpeg progress line into seconds.
fn parse_time_field(line: &str) -> Option<f64> {
    let caps = TIME_FIELD.captures(line)?;
    clock_to_secs(&caps[1], &caps[2], &caps[3])
}

fn clock_to_secs(h: &str, m: &str, s: &str) -> Option<f64> {
    let h: f64 = h.parse().ok()?;
    let m: f64 = m.parse().ok()?;
    let s: f64 = s.parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + s)
}

/// Parses a site-reported `MM:SS` or `HH:MM:SS` duration field.
#[must_use]
pub fn parse_duration_field(value: &str) -> Option<f64> {
    let parts: Vec<f64> = value
        .trim()
        .split(':')
        .map(|p| p.parse::<f64>().ok())
        .collect::<Option<Vec<_>>>()?;
    match parts.as_slice() {
        [m, s] => Some(m * 60.0 + s),
        [h, m, s] => Some(h * 3600.0 + m * 60.0 + s),
        _ => None,
    }
}
