// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy surfaced to collaborators.
//!
//! Translation to transport status codes (HTTP or otherwise) is the
//! collaborator's responsibility; the core only distinguishes kinds.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Job or repository missing
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation attempted by a user other than the job's owner
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Unresolvable repository name, illegal placeholder, illegal path
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Copy-on-write clone failed on every strategy
    #[error("workspace create failed: {0}")]
    WorkspaceCreateFailed(String),

    /// Staged uploads could not be copied into the workspace
    #[error("staging materialize failed: {0}")]
    StagingMaterializeFailed(String),

    /// Pre-flight `git pull` exited nonzero
    #[error("git pull failed: {0}")]
    GitFailed(String),

    /// Semantic-index sidecar failed to come up
    #[error("semantic index failed: {0}")]
    CidxFailed(String),

    /// Assistant exited nonzero
    #[error("execution failed with exit code {0}")]
    ExecutionFailed(i32),

    /// Execution watchdog fired
    #[error("execution timed out after {0}s")]
    Timeout(u64),

    /// User-initiated delete during execution
    #[error("cancelled")]
    Cancelled,

    /// Invariant violation or disk persistence failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn internal(e: impl std::fmt::Display) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}
