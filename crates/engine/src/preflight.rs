// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-flight steps between dispatch and execution: the bounded workspace
//! `git pull` and system-prompt composition. Staged-file materialization
//! and sidecar bring-up are orchestrated by the pipeline directly.

use std::path::Path;
use std::time::Duration;

use bx_core::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::engine::EngineConfig;
use crate::subprocess::{run_with_timeout, stderr_trimmed, GIT_PULL_TIMEOUT};

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PullOutcome {
    Pulled,
    /// The workspace is not a git tree; execution proceeds without a pull.
    NotRepo,
    Failed(String),
    Cancelled,
}

/// Run `git pull` in the workspace, bounded by the smaller of the global
/// pull timeout and the job's own execution timeout.
pub(crate) async fn git_pull(
    workspace: &Path,
    job_timeout_seconds: u64,
    cancel: &CancellationToken,
) -> PullOutcome {
    if !workspace.join(".git").exists() {
        return PullOutcome::NotRepo;
    }

    let bound = GIT_PULL_TIMEOUT.min(Duration::from_secs(job_timeout_seconds.max(1)));
    let mut cmd = Command::new("git");
    cmd.arg("pull")
        .current_dir(workspace)
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE");

    tokio::select! {
        _ = cancel.cancelled() => PullOutcome::Cancelled,
        result = run_with_timeout(cmd, bound, "git pull") => match result {
            Ok(output) if output.status.success() => PullOutcome::Pulled,
            Ok(output) => PullOutcome::Failed(format!("git pull: {}", stderr_trimmed(&output))),
            Err(e) => PullOutcome::Failed(e.to_string()),
        },
    }
}

/// Read the system-prompt template chosen by sidecar availability.
///
/// An unset (empty) template path composes an empty system prompt; a
/// configured-but-unreadable template is an operator error and fails the
/// job.
pub(crate) fn compose_system_prompt(cfg: &EngineConfig, cidx_ready: bool) -> Result<String, Error> {
    let path =
        if cidx_ready { &cfg.cidx_available_template } else { &cfg.cidx_unavailable_template };
    if path.as_os_str().is_empty() {
        return Ok(String::new());
    }
    std::fs::read_to_string(path).map_err(|e| {
        Error::Internal(format!("system prompt template {}: {e}", path.display()))
    })
}

#[cfg(test)]
#[path = "preflight_tests.rs"]
mod tests;
