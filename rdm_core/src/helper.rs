//! Helper process supervisor (component C6) — runs an external tool for
//! URLs that need it (video sites) and supervises its lifecycle.
//!
//! Grounded on `rdm_server/src/server.rs`'s `spawn_ui_for_item`/
//! `find_ui_binary` process-spawning pattern (`Command` + piped stdio, PATH
//! search), generalized from a one-shot fire-and-forget spawn into a fully
//! supervised child: async line-by-line stdout parsing, exit-code handling,
//! and a SIGTERM-then-SIGKILL stop.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::engine::DownloadStrategy;
use crate::error::DownloadError;
use crate::events::{DownloadEvent, EventBus};
use crate::item::DownloadItem;

const GRACE_PERIOD: Duration = Duration::from_secs(5);

pub struct HelperConfig {
    pub program: String,
    pub extra_args: Vec<String>,
}

pub struct HelperEngine {
    config: HelperConfig,
    events: EventBus,
}

impl HelperEngine {
    pub fn new(config: HelperConfig, events: EventBus) -> Self {
        Self { config, events }
    }

    /// Pre-flight check: runs `program --version` to detect absence, per the
    /// design's "ensures the tool is installed before spawning".
    pub async fn check_installed(&self) -> Result<(), DownloadError> {
        let status = Command::new(&self.config.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(_) | Err(_) => Err(DownloadError::HelperMissing(self.config.program.clone())),
        }
    }
}

#[async_trait]
impl DownloadStrategy for HelperEngine {
    async fn run(&self, item: &Arc<DownloadItem>) -> Result<(), DownloadError> {
        self.check_installed().await?;

        item.touch_last_attempt().await;
        let url = item.url().await;
        let dest_path = item.dest_path().await;
        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut args = self.config.extra_args.clone();
        args.push("-o".to_string());
        args.push(dest_path.to_string_lossy().into_owned());
        args.push(url);

        let mut child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DownloadError::HelperMissing(e.to_string()))?;

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let item_id = item.id();
        let events = self.events.clone();
        let cancel_token = item.cancel_token.read().await.clone();

        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some((downloaded, total)) = parse_progress_line(&line) {
                    events.publish(DownloadEvent::Progress {
                        item_id,
                        downloaded_size: downloaded,
                        total_size: Some(total),
                        transfer_rate_bps: 0,
                    });
                }
            }
        });

        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut last_stderr = String::new();

        let wait_result = tokio::select! {
            status = child.wait() => status,
            _ = cancel_token.cancelled() => {
                terminate(&mut child).await;
                stdout_task.abort();
                return Err(DownloadError::Cancelled);
            }
        };

        while let Ok(Some(line)) = stderr_lines.next_line().await {
            last_stderr = line;
        }
        let _ = stdout_task.await;

        match wait_result {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(DownloadError::HelperFailed(format!(
                "exit code {:?}: {}",
                status.code(),
                last_stderr
            ))),
            Err(e) => Err(DownloadError::HelperFailed(e.to_string())),
        }
    }
}

/// Terminates a child process: SIGTERM on unix (giving a well-behaved helper
/// a chance to flush partial output), then SIGKILL after [`GRACE_PERIOD`] if
/// it hasn't exited. Plain `SIGKILL` immediately on non-unix platforms, where
/// there is no portable graceful-termination signal.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();

    if tokio::time::timeout(GRACE_PERIOD, child.wait()).await.is_err() {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

/// Parses a helper tool's progress line matching `NN.N% of SS.S[KMG]iB`
/// (the format yt-dlp-style tools commonly emit), returning
/// `(downloaded_bytes, total_bytes)`.
fn parse_progress_line(line: &str) -> Option<(u64, u64)> {
    let percent_idx = line.find('%')?;
    let percent_start = line[..percent_idx]
        .rfind(|c: char| !c.is_ascii_digit() && c != '.')
        .map(|i| i + 1)
        .unwrap_or(0);
    let percent: f64 = line[percent_start..percent_idx].trim().parse().ok()?;

    let of_idx = line[percent_idx..].find("of")? + percent_idx;
    let rest = line[of_idx + 2..].trim();
    let size_end = rest.find(|c: char| !c.is_ascii_digit() && c != '.').unwrap_or(rest.len());
    let number: f64 = rest[..size_end].parse().ok()?;
    let unit = rest[size_end..].trim_start();

    let multiplier: f64 = if unit.starts_with("GiB") {
        1024.0 * 1024.0 * 1024.0
    } else if unit.starts_with("MiB") {
        1024.0 * 1024.0
    } else if unit.starts_with("KiB") {
        1024.0
    } else {
        1.0
    };

    let total = (number * multiplier) as u64;
    let downloaded = (total as f64 * (percent / 100.0)) as u64;
    Some((downloaded, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_progress_line() {
        let (downloaded, total) = parse_progress_line("[download]  42.5% of 123.4MiB at 2.1MiB/s").unwrap();
        assert_eq!(total, (123.4 * 1024.0 * 1024.0) as u64);
        assert_eq!(downloaded, (total as f64 * 0.425) as u64);
    }

    #[test]
    fn parses_gib_unit() {
        let (_, total) = parse_progress_line("10.0% of 1.0GiB").unwrap();
        assert_eq!(total, 1024 * 1024 * 1024);
    }

    #[test]
    fn non_matching_line_returns_none() {
        assert_eq!(parse_progress_line("Merging formats into output.mp4"), None);
    }
}
