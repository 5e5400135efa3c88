// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job entity and status state machines.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

crate::define_id! {
    /// Unique identifier for a job.
    ///
    /// Assigned at creation and used to name the job's workspace directory,
    /// its staging directory, and its on-disk record file.
    pub struct JobId("job-");
}

/// Lifecycle status of a job.
///
/// Moves only along the transitions declared in [`JobStatus::can_transition`];
/// terminal statuses never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Record exists; staging open for uploads
    Created,
    /// Admitted to the FIFO queue, waiting for a slot
    Queued,
    /// Workspace provisioned, `git pull` step in progress
    GitPulling,
    /// `git pull` exited nonzero; job will not run
    GitFailed,
    /// Semantic-index sidecar coming up
    CidxIndexing,
    /// Sidecar ready, about to hand off to the executor
    CidxReady,
    /// Assistant process executing
    Running,
    /// Assistant exited zero
    Completed,
    /// Pre-flight or execution failure (nonzero exit, shutdown abort, ...)
    Failed,
    /// Execution watchdog fired
    Timeout,
    /// User-initiated delete before or during execution
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses never change.
    ///
    /// `GitFailed` has no outgoing transitions and is counted as terminal so
    /// its records age out under the retention sweep like any other failure.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::GitFailed
                | JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::Timeout
                | JobStatus::Cancelled
        )
    }

    /// The declared transition relation.
    ///
    /// Any non-terminal status may move to `Cancelled` (user delete).
    pub fn can_transition(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        if self.is_terminal() {
            return false;
        }
        if to == Cancelled {
            return true;
        }
        matches!(
            (self, to),
            (Created, Queued)
                | (Queued, GitPulling)
                | (GitPulling, GitFailed)
                | (GitPulling, CidxIndexing)
                | (GitPulling, Running)
                | (GitPulling, Failed)
                | (CidxIndexing, CidxReady)
                | (CidxIndexing, Failed)
                | (CidxReady, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Timeout)
        )
    }
}

crate::simple_display! {
    JobStatus {
        Created => "created",
        Queued => "queued",
        GitPulling => "git_pulling",
        GitFailed => "git_failed",
        CidxIndexing => "cidx_indexing",
        CidxReady => "cidx_ready",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Timeout => "timeout",
        Cancelled => "cancelled",
    }
}

/// Outcome of the workspace `git pull` step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitStatus {
    #[default]
    NotChecked,
    Checking,
    Pulled,
    Failed,
    /// Workspace is not a git tree; execution proceeds without a pull
    NotGitRepo,
}

crate::simple_display! {
    GitStatus {
        NotChecked => "not_checked",
        Checking => "checking",
        Pulled => "pulled",
        Failed => "failed",
        NotGitRepo => "not_git_repo",
    }
}

/// Lifecycle of the per-job semantic-index sidecar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CidxStatus {
    #[default]
    NotStarted,
    Starting,
    Indexing,
    Ready,
    Failed,
    Stopped,
}

crate::simple_display! {
    CidxStatus {
        NotStarted => "not_started",
        Starting => "starting",
        Indexing => "indexing",
        Ready => "ready",
        Failed => "failed",
        Stopped => "stopped",
    }
}

/// Per-job execution options supplied at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Execution timeout, measured from entry into `Running`
    pub timeout_seconds: u64,
    /// Run `git pull` in the workspace before execution
    pub git_aware: bool,
    /// Bring up the semantic-index sidecar before execution
    pub cidx_aware: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self { timeout_seconds: 3600, git_aware: true, cidx_aware: false }
    }
}

/// Configuration for creating a new job.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub id: JobId,
    pub user: String,
    pub prompt: String,
    pub repository: String,
    pub options: JobOptions,
}

impl JobConfig {
    pub fn builder(
        user: impl Into<String>,
        prompt: impl Into<String>,
        repository: impl Into<String>,
    ) -> JobConfigBuilder {
        JobConfigBuilder {
            id: JobId::generate(),
            user: user.into(),
            prompt: prompt.into(),
            repository: repository.into(),
            options: JobOptions::default(),
        }
    }
}

pub struct JobConfigBuilder {
    id: JobId,
    user: String,
    prompt: String,
    repository: String,
    options: JobOptions,
}

impl JobConfigBuilder {
    pub fn id(mut self, v: impl Into<JobId>) -> Self {
        self.id = v.into();
        self
    }

    pub fn options(mut self, v: JobOptions) -> Self {
        self.options = v;
        self
    }

    pub fn build(self) -> JobConfig {
        JobConfig {
            id: self.id,
            user: self.user,
            prompt: self.prompt,
            repository: self.repository,
            options: self.options,
        }
    }
}

/// A job instance.
///
/// The scheduler and its pipeline are the only writers of `status` after
/// creation; readers observe transitions in the declared order because the
/// status is written under the index lock before any subsequent I/O begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// OS username of the submitter, captured from the authenticated identity
    pub user: String,
    /// Short human label, filled in asynchronously by the title summarizer
    #[serde(default)]
    pub title: String,
    /// Original prompt text; `{{name}}` tokens preserved until execution
    pub prompt: String,
    /// Logical repository name resolved against the repository registry
    pub repository: String,
    /// Original filenames materialized under the workspace `files/` subtree
    #[serde(default)]
    pub uploaded_files: Vec<String>,
    /// Subset of uploads passed as explicit image arguments to the assistant
    #[serde(default)]
    pub images: Vec<String>,
    pub options: JobOptions,
    pub status: JobStatus,
    #[serde(default)]
    pub git_status: GitStatus,
    #[serde(default)]
    pub cidx_status: CidxStatus,
    /// Absolute workspace path; `None` until provisioning succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<PathBuf>,
    /// Captured combined stdout+stderr of the assistant run
    #[serde(default)]
    pub output: String,
    /// Exit code of the assistant process; absent until terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// 1-based FIFO position while queued, 0 otherwise. Computed at query
    /// time from the live queue; never persisted.
    #[serde(skip)]
    pub queue_position: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new job record with `status = Created`.
    pub fn new(config: JobConfig, clock: &impl Clock) -> Self {
        Self {
            id: config.id,
            user: config.user,
            title: String::new(),
            prompt: config.prompt,
            repository: config.repository,
            uploaded_files: Vec::new(),
            images: Vec::new(),
            options: config.options,
            status: JobStatus::Created,
            git_status: GitStatus::NotChecked,
            cidx_status: CidxStatus::NotStarted,
            workspace_path: None,
            output: String::new(),
            exit_code: None,
            queue_position: 0,
            created_at: clock.timestamp(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Age of the job in milliseconds at the given epoch instant.
    pub fn age_ms(&self, now_epoch_ms: u64) -> u64 {
        let created = self.created_at.timestamp_millis().max(0) as u64;
        now_epoch_ms.saturating_sub(created)
    }

    /// Append a diagnostic note to the captured output.
    pub fn push_note(&mut self, note: &str) {
        if !self.output.is_empty() && !self.output.ends_with('\n') {
            self.output.push('\n');
        }
        self.output.push_str("[bx] ");
        self.output.push_str(note);
        self.output.push('\n');
    }
}

crate::builder! {
    pub struct JobBuilder => Job {
        into {
            id: JobId = "job-test0000",
            user: String = "alice",
            title: String = "",
            prompt: String = "do the thing",
            repository: String = "repo1",
        }
        set {
            uploaded_files: Vec<String> = Vec::new(),
            images: Vec<String> = Vec::new(),
            options: JobOptions = JobOptions::default(),
            status: JobStatus = JobStatus::Created,
            git_status: GitStatus = GitStatus::NotChecked,
            cidx_status: CidxStatus = CidxStatus::NotStarted,
            output: String = String::new(),
            queue_position: usize = 0,
        }
        option {
            workspace_path: PathBuf = None,
            exit_code: i32 = None,
            started_at: chrono::DateTime<chrono::Utc> = None,
            completed_at: chrono::DateTime<chrono::Utc> = None,
        }
        computed {
            created_at: chrono::DateTime<chrono::Utc> = chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
