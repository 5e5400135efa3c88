// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-socket protocol: line-delimited JSON requests and responses.
//!
//! Callers supply the already-authenticated OS username; translation to a
//! transport (HTTP status codes, CLI exit codes) happens on their side.

use bx_core::{Error, Job, JobOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateJob {
        user: String,
        prompt: String,
        repository: String,
        #[serde(default)]
        options: Option<JobOptions>,
    },
    Upload {
        user: String,
        job_id: String,
        name: String,
        /// File content, base64-encoded
        data: String,
        #[serde(default)]
        image: bool,
    },
    StartJob {
        user: String,
        job_id: String,
    },
    GetJob {
        user: String,
        job_id: String,
    },
    ListUserJobs {
        user: String,
    },
    DeleteJob {
        user: String,
        job_id: String,
    },
    Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Job { job: JobDto },
    Jobs { jobs: Vec<JobDto> },
    Stored { name: String },
    Deleted,
    Status { uptime_seconds: u64, total: usize, queued: usize, running: usize },
    Error { kind: String, message: String },
}

/// Wire representation of a job record.
///
/// Flattens enums to their display strings and carries the live
/// `queue_position`, which the persisted record never does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDto {
    pub id: String,
    pub user: String,
    pub title: String,
    pub prompt: String,
    pub repository: String,
    pub uploaded_files: Vec<String>,
    pub images: Vec<String>,
    pub options: JobOptions,
    pub status: String,
    pub git_status: String,
    pub cidx_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<PathBuf>,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub queue_position: usize,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl From<Job> for JobDto {
    fn from(job: Job) -> Self {
        Self {
            id: job.id.to_string(),
            user: job.user,
            title: job.title,
            prompt: job.prompt,
            repository: job.repository,
            uploaded_files: job.uploaded_files,
            images: job.images,
            options: job.options,
            status: job.status.to_string(),
            git_status: job.git_status.to_string(),
            cidx_status: job.cidx_status.to_string(),
            workspace_path: job.workspace_path,
            output: job.output,
            exit_code: job.exit_code,
            queue_position: job.queue_position,
            created_at: job.created_at.to_rfc3339(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Stable kind tags for the boundary error taxonomy.
pub fn error_kind(error: &Error) -> &'static str {
    match error {
        Error::NotFound(_) => "not_found",
        Error::AccessDenied(_) => "access_denied",
        Error::InvalidInput(_) => "invalid_input",
        Error::WorkspaceCreateFailed(_) => "workspace_create_failed",
        Error::StagingMaterializeFailed(_) => "staging_materialize_failed",
        Error::GitFailed(_) => "git_failed",
        Error::CidxFailed(_) => "cidx_failed",
        Error::ExecutionFailed(_) => "execution_failed",
        Error::Timeout(_) => "timeout",
        Error::Cancelled => "cancelled",
        Error::Internal(_) => "internal",
    }
}

impl Response {
    pub fn error(e: &Error) -> Self {
        Response::Error { kind: error_kind(e).to_string(), message: e.to_string() }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
