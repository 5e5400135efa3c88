// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Semantic-index sidecar adapter.
//!
//! The sidecar is a containerized service scoped to one workspace, driven
//! entirely through its CLI: start, a JSON status probe, stop. Readiness
//! means all four declared subservices report ready.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bx_core::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::subprocess::{run_with_timeout, stderr_trimmed, CIDX_COMMAND_TIMEOUT};

/// The subservices that must report ready before a job may rely on
/// semantic search.
pub const READINESS_SERVICES: [&str; 4] = ["qdrant", "ollama", "data-cleaner", "indexer"];

/// Poll cadence for the readiness probe.
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Drives the per-job semantic-index sidecar.
#[async_trait]
pub trait CidxAdapter: Send + Sync {
    /// Start the sidecar for a workspace.
    async fn start(&self, workspace: &Path) -> Result<(), Error>;

    /// Poll until every declared subservice reports ready, the deadline
    /// elapses, or the job is cancelled.
    async fn wait_ready(
        &self,
        workspace: &Path,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), Error>;

    /// Stop the sidecar. Best-effort; failures are logged, not returned.
    async fn stop(&self, workspace: &Path);
}

/// CLI-backed sidecar adapter.
pub struct CliCidx {
    command: Vec<String>,
}

impl CliCidx {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn cmd(&self, workspace: &Path, subcommand: &str) -> Command {
        let program = self.command.first().map(String::as_str).unwrap_or("cidx");
        let mut cmd = Command::new(program);
        cmd.args(&self.command[1.min(self.command.len())..]);
        cmd.arg(subcommand).current_dir(workspace);
        cmd
    }
}

impl Default for CliCidx {
    fn default() -> Self {
        Self::new(vec!["cidx".to_string()])
    }
}

#[async_trait]
impl CidxAdapter for CliCidx {
    async fn start(&self, workspace: &Path) -> Result<(), Error> {
        let output = run_with_timeout(self.cmd(workspace, "start"), CIDX_COMMAND_TIMEOUT, "cidx start")
            .await
            .map_err(|e| Error::CidxFailed(e.to_string()))?;
        if !output.status.success() {
            return Err(Error::CidxFailed(format!("start: {}", stderr_trimmed(&output))));
        }
        Ok(())
    }

    async fn wait_ready(
        &self,
        workspace: &Path,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let started = tokio::time::Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if started.elapsed() > deadline {
                return Err(Error::CidxFailed(format!(
                    "not ready after {}s",
                    deadline.as_secs()
                )));
            }

            let mut cmd = self.cmd(workspace, "status");
            cmd.arg("--json");
            match run_with_timeout(cmd, CIDX_COMMAND_TIMEOUT, "cidx status").await {
                Ok(output) if output.status.success() => {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    if all_services_ready(&stdout) {
                        return Ok(());
                    }
                    debug!(workspace = %workspace.display(), "sidecar not ready yet");
                }
                Ok(output) => {
                    debug!(
                        workspace = %workspace.display(),
                        stderr = %stderr_trimmed(&output),
                        "sidecar status probe failed"
                    );
                }
                Err(e) => {
                    debug!(workspace = %workspace.display(), error = %e, "sidecar status probe error");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(READY_POLL_INTERVAL) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }
    }

    async fn stop(&self, workspace: &Path) {
        match run_with_timeout(self.cmd(workspace, "stop"), CIDX_COMMAND_TIMEOUT, "cidx stop").await
        {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                warn!(
                    workspace = %workspace.display(),
                    stderr = %stderr_trimmed(&output),
                    "sidecar stop failed"
                );
            }
            Err(e) => {
                warn!(workspace = %workspace.display(), error = %e, "sidecar stop error");
            }
        }
    }
}

/// Parse the status probe's JSON and check the four-service contract.
///
/// Expected shape: `{"services": {"qdrant": {"state": "ready"}, ...}}`.
fn all_services_ready(status_json: &str) -> bool {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(status_json) else {
        return false;
    };
    let services = &value["services"];
    READINESS_SERVICES
        .iter()
        .all(|name| services[name]["state"].as_str() == Some("ready"))
}

/// Scripted sidecar for tests: records calls and returns configured results.
#[cfg(any(test, feature = "test-support"))]
pub struct FakeCidx {
    pub start_ok: bool,
    pub ready_ok: bool,
    pub calls: parking_lot::Mutex<Vec<String>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeCidx {
    pub fn healthy() -> Self {
        Self { start_ok: true, ready_ok: true, calls: parking_lot::Mutex::new(Vec::new()) }
    }

    pub fn broken() -> Self {
        Self { start_ok: true, ready_ok: false, calls: parking_lot::Mutex::new(Vec::new()) }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl CidxAdapter for FakeCidx {
    async fn start(&self, _workspace: &Path) -> Result<(), Error> {
        self.calls.lock().push("start".to_string());
        if self.start_ok {
            Ok(())
        } else {
            Err(Error::CidxFailed("fake start failure".to_string()))
        }
    }

    async fn wait_ready(
        &self,
        _workspace: &Path,
        _deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.calls.lock().push("wait_ready".to_string());
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.ready_ok {
            Ok(())
        } else {
            Err(Error::CidxFailed("fake readiness failure".to_string()))
        }
    }

    async fn stop(&self, _workspace: &Path) {
        self.calls.lock().push("stop".to_string());
    }
}

#[cfg(test)]
#[path = "cidx_tests.rs"]
mod tests;
