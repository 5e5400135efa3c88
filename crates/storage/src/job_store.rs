// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Flat-directory job record store: one JSON file per job.
//!
//! Records live beside the workspaces they describe, named
//! `<job_id>.job.json` under the jobs root. `save` is a full overwrite and
//! is called on every status transition; the last write wins.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bx_core::{Job, JobId};
use thiserror::Error;
use tracing::warn;

/// Filename suffix distinguishing record files from workspace directories.
pub const RECORD_SUFFIX: &str = ".job.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable store for [`Job`] records.
#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    /// Open a store rooted at the jobs directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record file for a job.
    pub fn record_path(&self, id: &JobId) -> PathBuf {
        self.root.join(format!("{id}{RECORD_SUFFIX}"))
    }

    /// Persist a job record (full overwrite, atomic via temp-file rename).
    ///
    /// Temp names are unique per write so concurrent saves of the same job
    /// (e.g. the title summarizer racing the pipeline) cannot interleave;
    /// the last rename wins.
    pub fn save(&self, job: &Job) -> Result<(), StoreError> {
        static TMP_SEQ: AtomicU64 = AtomicU64::new(0);
        let path = self.record_path(&job.id);
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self.root.join(format!("{}.tmp{seq}", job.id));
        let bytes = serde_json::to_vec_pretty(job)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load a single record, `Ok(None)` when the file does not exist.
    pub fn load(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        let path = self.record_path(id);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Load every record in the store, ordered by creation time.
    ///
    /// Individual corrupted files are skipped and logged; a bad record never
    /// fails the whole batch.
    pub fn load_all(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(RECORD_SUFFIX) {
                continue;
            }
            let path = entry.path();
            match fs::read(&path).map_err(StoreError::from).and_then(|bytes| {
                serde_json::from_slice::<Job>(&bytes).map_err(StoreError::from)
            }) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable job record");
                }
            }
        }
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    /// Load all records owned by `user`, ordered by creation time.
    pub fn load_for_user(&self, user: &str) -> Result<Vec<Job>, StoreError> {
        let mut jobs = self.load_all()?;
        jobs.retain(|j| j.user == user);
        Ok(jobs)
    }

    /// Delete a record file. Idempotent on nonexistent records.
    pub fn delete(&self, id: &JobId) -> Result<(), StoreError> {
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Long-horizon retention sweep.
    ///
    /// Deletes record files of terminal jobs whose `completed_at` precedes
    /// `now - retention`. Non-terminal jobs are never deleted by retention
    /// regardless of age. Returns the ids of reaped records.
    pub fn reap_terminal(
        &self,
        retention: Duration,
        now_epoch_ms: u64,
    ) -> Result<Vec<JobId>, StoreError> {
        let cutoff = now_epoch_ms.saturating_sub(retention.as_millis() as u64);
        let mut reaped = Vec::new();
        for job in self.load_all()? {
            if !job.is_terminal() {
                continue;
            }
            let Some(completed_at) = job.completed_at else {
                // Terminal without completed_at is an invariant break; leave
                // the record for inspection.
                warn!(job_id = %job.id, status = %job.status, "terminal record missing completed_at");
                continue;
            };
            if (completed_at.timestamp_millis().max(0) as u64) < cutoff {
                self.delete(&job.id)?;
                reaped.push(job.id);
            }
        }
        Ok(reaped)
    }
}

#[cfg(test)]
#[path = "job_store_tests.rs"]
mod tests;
