//! C5 — Muxer Driver: concat segments via an external tool, report progress, clean up.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use process_utils::tokio_command;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::DownloadError;
use crate::model::{EpisodeWorkspace, Progress, SegmentPlan};
use crate::sanitize::url_basename;

const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub type MuxProgressSink = std::sync::Arc<dyn Fn(Progress) + Send + Sync>;

/// Generate `file.list`, one `file '<basename>'` line per segment in playlist order.
async fn write_file_list(workspace: &EpisodeWorkspace, plan: &SegmentPlan) -> Result<(), DownloadError> {
    let mut contents = String::new();
    for url in &plan.segments {
        let filename = url_basename(url);
        contents.push_str(&format!("file '{filename}'\n"));
    }
    tokio::fs::write(workspace.file_list_path(), contents).await?;
    Ok(())
}

fn resolve_muxer_binary(override_path: Option<&str>) -> Result<String, DownloadError> {
    if let Some(path) = override_path {
        return Ok(path.to_string());
    }
    if let Ok(path) = std::env::var("FFMPEG_PATH") {
        return Ok(path);
    }
    which::which("ffmpeg")
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(|_| DownloadError::ConfigError("ffmpeg binary not found (set FFMPEG_PATH or install it on PATH)".into()))
}

/// Concatenate `plan`'s segments (in workspace) into `output_path`.
#[instrument(skip(plan, progress, token), fields(output = %output_path.display()))]
pub async fn mux(
    workspace: &EpisodeWorkspace,
    plan: &SegmentPlan,
    output_path: &Path,
    muxer_binary: Option<&str>,
    progress: Option<MuxProgressSink>,
    token: &CancellationToken,
) -> Result<(), DownloadError> {
    write_file_list(workspace, plan).await?;
    let binary = resolve_muxer_binary(muxer_binary)?;

    let mut child = tokio_command(&binary)
        .arg("-f")
        .arg("concat")
        .arg("-safe")
        .arg("0")
        .arg("-i")
        .arg(workspace.file_list_path())
        .arg("-c")
        .arg("copy")
        .arg("-y")
        .arg(output_path)
        .arg("-progress")
        .arg("pipe:1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(DownloadError::from)?;

    let stdout = child.stdout.take().expect("stdout was piped");
    let mut lines = BufReader::new(stdout).lines();
    let total_seconds = plan.duration_seconds.max(1.0);
    let start = std::time::Instant::now();

    let status = loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) => {
                        if let Some(elapsed) = parse_time_line(&text)
                            && let Some(sink) = &progress {
                                let percent = (elapsed / total_seconds * 100.0).min(100.0);
                                let done = (percent / 100.0 * plan.segments.len() as f64) as usize;
                                sink(Progress {
                                    done,
                                    total: plan.segments.len(),
                                    bytes_since_start: 0,
                                    elapsed: start.elapsed(),
                                });
                            }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "error reading muxer stdout"),
                }
            }
            status = child.wait() => {
                break status.map_err(DownloadError::from)?;
            }
            _ = token.cancelled() => {
                if let Some(stdin) = child.stdin.as_mut() {
                    use tokio::io::AsyncWriteExt;
                    let _ = stdin.write_all(b"q").await;
                }
                let graceful = tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, child.wait()).await;
                match graceful {
                    Ok(status) => break status.map_err(DownloadError::from)?,
                    Err(_) => {
                        let _ = child.kill().await;
                        return Err(DownloadError::Cancelled);
                    }
                }
            }
        }
    };

    if status.success() && tokio::fs::metadata(output_path).await.is_ok() {
        tokio::fs::remove_dir_all(&workspace.root).await.ok();
        info!("mux succeeded, workspace removed");
        if let Some(sink) = &progress {
            sink(Progress { done: plan.segments.len(), total: plan.segments.len(), bytes_since_start: 0, elapsed: start.elapsed() });
        }
        Ok(())
    } else {
        warn!(status = ?status.code(), "mux failed, workspace retained for diagnosis");
        Err(DownloadError::MuxFailed { status: status.code() })
    }
}

/// Parse a `time=HH:MM:SS.CC` progress line (centiseconds, not milliseconds) to elapsed seconds.
fn parse_time_line(line: &str) -> Option<f64> {
    let rest = line.strip_prefix("time=")?;
    let mut parts = rest.splitn(2, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let rest = parts.next()?;
    let mut parts = rest.splitn(2, ':');
    let minutes: f64 = parts.next()?.parse().ok()?;
    let rest = parts.next()?;
    let mut parts = rest.splitn(2, '.');
    let seconds: f64 = parts.next()?.parse().ok()?;
    let centis: f64 = parts.next()?.trim().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds + centis / 100.0)
}
