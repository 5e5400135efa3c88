// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded subprocess execution for external CLIs (git, cp, btrfs, rsync,
//! the sidecar, the assistant's one-shot title call).

use std::io;
use std::process::{Output, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Upper bound for a workspace `git pull` (further capped by the job's own
/// execution timeout).
pub const GIT_PULL_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound for one copy-on-write clone attempt.
pub const CLONE_TIMEOUT: Duration = Duration::from_secs(600);

/// Upper bound for a single sidecar CLI invocation (start/status/stop).
pub const CIDX_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound for the whole sidecar bring-up, readiness polling included.
pub const CIDX_READY_TIMEOUT: Duration = Duration::from_secs(300);

/// Upper bound for the one-shot title summarization call.
pub const SUMMARY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SubprocessError {
    #[error("{label} timed out after {timeout:?}")]
    TimedOut { label: String, timeout: Duration },
    #[error("{label}: {source}")]
    Io { label: String, source: io::Error },
}

/// Run a command to completion with a deadline, capturing its output.
///
/// Stdin is closed. The child is killed if the deadline elapses or the
/// future is dropped.
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    label: &str,
) -> Result<Output, SubprocessError> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(source)) => Err(SubprocessError::Io { label: label.to_string(), source }),
        Err(_) => Err(SubprocessError::TimedOut { label: label.to_string(), timeout }),
    }
}

/// Convenience for the `exit nonzero → stderr message` pattern.
pub fn stderr_trimmed(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
