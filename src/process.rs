#![forbid(unsafe_code)]

//! Child-process helpers shared by the `yt-dlp` and `ffmpeg` adapters.

use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STDERR_TAIL_LINES: usize = 3;

#[derive(Debug)]
pub(crate) struct Finished {
    pub status: ExitStatus,
    pub stderr: String,
}

#[derive(Debug)]
pub(crate) enum RunError {
    Spawn(io::Error),
    Cancelled,
}

/// Runs `command` to completion while watching `cancel`.
///
/// Stdout goes to `stdout_file` when given and is discarded otherwise. Stderr
/// is captured into `stderr_log`. Both are files, so a chatty child can never
/// block on a full pipe. A cancelled token kills the child and reaps it
/// before returning.
pub(crate) fn run_cancellable(
    mut command: Command,
    stdout_file: Option<&Path>,
    stderr_log: &Path,
    cancel: &CancellationToken,
) -> Result<Finished, RunError> {
    if cancel.is_cancelled() {
        return Err(RunError::Cancelled);
    }
    let stdout = match stdout_file {
        Some(path) => Stdio::from(File::create(path).map_err(RunError::Spawn)?),
        None => Stdio::null(),
    };
    let log = File::create(stderr_log).map_err(RunError::Spawn)?;
    let mut child = command
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(Stdio::from(log))
        .spawn()
        .map_err(RunError::Spawn)?;

    loop {
        if let Some(status) = child.try_wait().map_err(RunError::Spawn)? {
            let stderr = fs::read_to_string(stderr_log).unwrap_or_default();
            let _ = fs::remove_file(stderr_log);
            return Ok(Finished {
                status,
                stderr: stderr_tail(&stderr),
            });
        }
        if cancel.is_cancelled() {
            if let Err(err) = child.kill() {
                tracing::warn!(error = %err, "failed to kill cancelled child process");
            }
            let _ = child.wait();
            let _ = fs::remove_file(stderr_log);
            return Err(RunError::Cancelled);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Keeps the last few meaningful lines of a tool's stderr for error messages.
pub(crate) fn stderr_tail(raw: &str) -> String {
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Display name for an executable path, used in error messages.
pub(crate) fn program_name(binary: &Path) -> String {
    binary
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.display().to_string())
}
