//! Short-lived helper processes (ffprobe, yt-dlp)

use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Run `program` to completion and capture its output.
///
/// The child is killed if it does not finish within `limit`. A non-zero exit
/// status is not an error here; callers inspect `Output::status`.
pub async fn run_captured(program: &str, args: &[String], limit: Duration) -> Result<Output> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match timeout(limit, cmd.output()).await {
        Ok(result) => result.map_err(|e| Error::io(program, e)),
        Err(_) => Err(Error::Timeout(limit)),
    }
}

/// First 500 characters of stderr, for log lines
#[must_use]
pub fn stderr_excerpt(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr)
        .trim()
        .chars()
        .take(500)
        .collect()
}
