// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervised assistant-process execution.
//!
//! The assistant runs as the submitting OS user with the workspace as its
//! working directory. Stdin is closed; stdout and stderr are merged into a
//! rolling buffer. A per-job watchdog enforces the execution timeout, and
//! cancellation (user delete, wall-clock expiry, shutdown) signals the
//! whole process group: SIGTERM, a bounded grace, then SIGKILL.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bx_core::Error;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::impersonate::Impersonator;

/// Cap on the in-memory output buffer; earlier bytes roll off the front.
pub const OUTPUT_BUFFER_MAX: usize = 1024 * 1024;

/// Grace between SIGTERM and SIGKILL on the process group.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// The assistant program and its default arguments, configured at process
/// start (`claude.command`).
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub command: Vec<String>,
}

impl AssistantConfig {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    pub(crate) fn split(&self) -> Result<(&str, &[String]), Error> {
        match self.command.split_first() {
            Some((program, args)) => Ok((program, args)),
            None => Err(Error::InvalidInput("assistant command is empty".to_string())),
        }
    }
}

/// One assistant invocation, fully resolved.
pub struct ExecSpec {
    pub user: String,
    pub workspace: PathBuf,
    /// User prompt with placeholders already rewritten
    pub prompt: String,
    /// Composed system prompt (may be empty)
    pub system_prompt: String,
    /// Absolute paths of materialized image uploads
    pub images: Vec<PathBuf>,
    pub timeout: Duration,
}

/// How the assistant process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Process exited on its own with this code
    Exited(i32),
    /// The execution watchdog fired
    TimedOut,
    /// The cancellation token fired (user delete, wall-clock, shutdown)
    Cancelled,
}

pub struct ExecResult {
    pub outcome: ExecOutcome,
    pub output: String,
}

/// Run the assistant to completion, timeout, or cancellation.
pub async fn execute(
    assistant: &AssistantConfig,
    impersonator: &dyn Impersonator,
    spec: ExecSpec,
    cancel: &CancellationToken,
) -> Result<ExecResult, Error> {
    if cancel.is_cancelled() {
        return Ok(ExecResult { outcome: ExecOutcome::Cancelled, output: String::new() });
    }

    let (program, base_args) = assistant.split()?;
    let mut args: Vec<String> = base_args.to_vec();
    if !spec.system_prompt.is_empty() {
        args.push("--append-system-prompt".to_string());
        args.push(spec.system_prompt.clone());
    }
    for image in &spec.images {
        args.push("--image".to_string());
        args.push(image.display().to_string());
    }
    args.push(spec.prompt.clone());

    let (program, args) = impersonator.wrap(&spec.user, program, &args)?;

    let mut cmd = Command::new(&program);
    cmd.args(&args)
        .current_dir(&spec.workspace)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Internal(format!("failed to spawn assistant {program}: {e}")))?;

    let buffer = Arc::new(Mutex::new(RollingBuffer::new(OUTPUT_BUFFER_MAX)));
    let mut readers: Vec<JoinHandle<()>> = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, Arc::clone(&buffer)));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, Arc::clone(&buffer)));
    }

    enum Waited {
        Exited(Result<std::process::ExitStatus, std::io::Error>),
        TimedOut,
        Cancelled,
    }

    let waited = tokio::select! {
        status = child.wait() => Waited::Exited(status),
        _ = tokio::time::sleep(spec.timeout) => Waited::TimedOut,
        _ = cancel.cancelled() => Waited::Cancelled,
    };

    let outcome = match waited {
        Waited::Exited(Ok(status)) => ExecOutcome::Exited(status.code().unwrap_or(-1)),
        Waited::Exited(Err(e)) => {
            return Err(Error::Internal(format!("failed to wait on assistant: {e}")))
        }
        Waited::TimedOut => {
            terminate(&mut child).await;
            ExecOutcome::TimedOut
        }
        Waited::Cancelled => {
            terminate(&mut child).await;
            ExecOutcome::Cancelled
        }
    };

    for reader in readers {
        let _ = reader.await;
    }
    let output = buffer.lock().as_text();
    Ok(ExecResult { outcome, output })
}

/// SIGTERM the process group, wait the grace, then SIGKILL.
async fn terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        let _ = child.wait().await;
        return;
    };
    let pgid = Pid::from_raw(pid as i32);

    if let Err(e) = killpg(pgid, Signal::SIGTERM) {
        debug!(%pgid, error = %e, "SIGTERM to process group failed");
    }
    if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_err() {
        let _ = killpg(pgid, Signal::SIGKILL);
        let _ = child.wait().await;
    }
}

fn spawn_reader<R>(mut src: R, buffer: Arc<Mutex<RollingBuffer>>) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match src.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.lock().push(&chunk[..n]),
            }
        }
    })
}

/// Bounded byte buffer keeping the most recent output.
pub(crate) struct RollingBuffer {
    cap: usize,
    data: VecDeque<u8>,
}

impl RollingBuffer {
    pub(crate) fn new(cap: usize) -> Self {
        Self { cap, data: VecDeque::new() }
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) {
        if bytes.len() >= self.cap {
            self.data.clear();
            self.data.extend(&bytes[bytes.len() - self.cap..]);
            return;
        }
        self.data.extend(bytes);
        while self.data.len() > self.cap {
            self.data.pop_front();
        }
    }

    pub(crate) fn as_text(&self) -> String {
        let (a, b) = self.data.as_slices();
        let mut bytes = Vec::with_capacity(self.data.len());
        bytes.extend_from_slice(a);
        bytes.extend_from_slice(b);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
