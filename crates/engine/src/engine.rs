// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The engine facade.
//!
//! Implements the process-level contract offered to collaborators:
//! `create_job`, `upload`, `start_job`, `get_job`, `list_user_jobs`,
//! `delete_job`. The authenticated OS username is supplied by the caller;
//! the engine performs no credential checks but enforces ownership.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bx_core::{Clock, Error, Job, JobConfig, JobId, JobOptions, JobStatus};
use bx_storage::JobStore;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cidx::CidxAdapter;
use crate::executor::AssistantConfig;
use crate::impersonate::Impersonator;
use crate::staging::StagingArea;
use crate::state::{CancelCause, EngineState};
use crate::summarizer;
use crate::workspace::WorkspaceStore;

/// Engine-wide settings, resolved from configuration at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cap on concurrently running pipelines (must be at least 1)
    pub max_concurrent: usize,
    /// Wall-clock age past which any job's workspace is reclaimed
    pub wall_clock_timeout: Duration,
    /// Age past which terminal job records are deleted from disk
    pub retention: Duration,
    /// Grace given to running pipelines at shutdown and user delete
    pub shutdown_grace: Duration,
    pub assistant: AssistantConfig,
    /// System-prompt template used when the sidecar is ready.
    /// An empty path means "no template" and composes an empty prompt.
    pub cidx_available_template: PathBuf,
    /// System-prompt template used when semantic search is unavailable
    pub cidx_unavailable_template: PathBuf,
}

/// External collaborators injected at construction.
pub struct EngineDeps {
    pub store: JobStore,
    pub workspaces: WorkspaceStore,
    pub staging: StagingArea,
    pub cidx: Arc<dyn CidxAdapter>,
    pub impersonator: Arc<dyn Impersonator>,
}

/// Counts reported by [`Engine::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
}

/// What startup recovery found on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub loaded: usize,
    pub requeued: usize,
    pub orphaned: usize,
}

/// The job lifecycle engine. One instance per daemon, shared via `Arc`.
pub struct Engine<C: Clock> {
    pub(crate) cfg: EngineConfig,
    pub(crate) store: JobStore,
    pub(crate) workspaces: WorkspaceStore,
    pub(crate) staging: StagingArea,
    pub(crate) cidx: Arc<dyn CidxAdapter>,
    pub(crate) impersonator: Arc<dyn Impersonator>,
    pub(crate) clock: C,
    pub(crate) state: Mutex<EngineState>,
    /// Process-wide shutdown token; per-job tokens are children of it.
    pub(crate) shutdown: CancellationToken,
    /// Wakes the dispatcher when the queue or a slot changes.
    pub(crate) dispatch_wake: Notify,
    /// Signalled whenever a pipeline releases its slot.
    pub(crate) slot_released: Notify,
}

impl<C: Clock> Engine<C> {
    /// Build an engine. Rejects `max_concurrent = 0` at startup.
    pub fn new(cfg: EngineConfig, deps: EngineDeps, clock: C) -> Result<Self, Error> {
        if cfg.max_concurrent == 0 {
            return Err(Error::InvalidInput("jobs.max_concurrent must be at least 1".to_string()));
        }
        Ok(Self {
            cfg,
            store: deps.store,
            workspaces: deps.workspaces,
            staging: deps.staging,
            cidx: deps.cidx,
            impersonator: deps.impersonator,
            clock,
            state: Mutex::new(EngineState::default()),
            shutdown: CancellationToken::new(),
            dispatch_wake: Notify::new(),
            slot_released: Notify::new(),
        })
    }

    /// Create a job record with `status = Created` and kick off the
    /// detached title summarization.
    pub fn create_job(
        self: &Arc<Self>,
        user: &str,
        prompt: &str,
        repository: &str,
        options: JobOptions,
    ) -> Result<Job, Error> {
        self.workspaces.verify_repository(repository)?;
        let config = JobConfig::builder(user, prompt, repository).options(options).build();
        let job = Job::new(config, &self.clock);

        {
            let mut state = self.state.lock();
            state.jobs.insert(job.id.clone(), job.clone());
        }
        self.persist(&job)?;
        info!(job_id = %job.id, user, repository, "job created");

        summarizer::spawn(Arc::clone(self), job.id.clone(), job.prompt.clone());
        Ok(job)
    }

    /// Stage an upload for a not-yet-dispatched job. Returns the stored
    /// name. `is_image` marks the file for the assistant's image arguments.
    pub fn upload(
        &self,
        id: &JobId,
        user: &str,
        original_name: &str,
        bytes: &[u8],
        is_image: bool,
    ) -> Result<String, Error> {
        {
            let state = self.state.lock();
            let job = state.jobs.get(id).ok_or_else(|| Error::NotFound(format!("job {id}")))?;
            if job.user != user {
                return Err(Error::AccessDenied(format!("job {id} belongs to {}", job.user)));
            }
            if !matches!(job.status, JobStatus::Created | JobStatus::Queued) {
                return Err(Error::InvalidInput(format!(
                    "job {id} is {} and no longer accepts uploads",
                    job.status
                )));
            }
        }

        let stored = self.staging.accept(id, original_name, bytes)?;
        let job = self.update_job(id, |job| {
            if !job.uploaded_files.iter().any(|f| f == original_name) {
                job.uploaded_files.push(original_name.to_string());
            }
            if is_image && !job.images.iter().any(|f| f == original_name) {
                job.images.push(original_name.to_string());
            }
        })?;
        info!(job_id = %job.id, original = original_name, stored = %stored, "upload accepted");
        Ok(stored)
    }

    /// Admit a job to the queue. Admission never rejects on load: if the
    /// concurrency cap is reached the job simply waits in FIFO order.
    pub fn start_job(&self, id: &JobId, user: &str) -> Result<Job, Error> {
        let job = {
            let mut state = self.state.lock();
            let job = state.jobs.get_mut(id).ok_or_else(|| Error::NotFound(format!("job {id}")))?;
            if job.user != user {
                return Err(Error::AccessDenied(format!("job {id} belongs to {}", job.user)));
            }
            if job.status != JobStatus::Created {
                return Err(Error::InvalidInput(format!("job {id} was already started")));
            }
            job.status = JobStatus::Queued;
            let job = job.clone();
            state.queue.push_back(id.clone());
            job
        };
        self.persist(&job)?;
        self.dispatch_wake.notify_one();
        info!(job_id = %id, "job queued");
        Ok(job)
    }

    /// Fetch a job owned by `user`, with its live queue position.
    pub fn get_job(&self, id: &JobId, user: &str) -> Result<Job, Error> {
        let state = self.state.lock();
        let job = state.jobs.get(id).ok_or_else(|| Error::NotFound(format!("job {id}")))?;
        if job.user != user {
            return Err(Error::AccessDenied(format!("job {id} belongs to {}", job.user)));
        }
        let mut job = job.clone();
        job.queue_position = state.position(id);
        Ok(job)
    }

    /// All jobs owned by `user`, oldest first, with live queue positions.
    pub fn list_user_jobs(&self, user: &str) -> Vec<Job> {
        let state = self.state.lock();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| j.user == user)
            .cloned()
            .map(|mut j| {
                j.queue_position = state.position(&j.id);
                j
            })
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Synchronous user-initiated delete: terminate the process if running,
    /// stop the sidecar, remove the workspace, drop the in-memory entry,
    /// delete the record. Idempotent — deleting an unknown job is a no-op.
    pub async fn delete_job(self: &Arc<Self>, id: &JobId, user: &str) -> Result<(), Error> {
        let (job, token) = {
            let mut state = self.state.lock();
            let Some(job) = state.jobs.get(id) else {
                return Ok(());
            };
            if job.user != user {
                return Err(Error::AccessDenied(format!("job {id} belongs to {}", job.user)));
            }
            let job = job.clone();
            state.unqueue(id);
            let token = state.active.get(id).cloned();
            if token.is_some() {
                state.cancel_causes.insert(id.clone(), CancelCause::UserDelete);
            }
            (job, token)
        };

        if let Some(token) = token {
            token.cancel();
            self.await_pipeline_exit(id, self.cfg.shutdown_grace).await;
        }

        if job.options.cidx_aware && job.cidx_status != bx_core::CidxStatus::NotStarted {
            if let Some(ws) = &job.workspace_path {
                self.cidx.stop(ws).await;
            }
        }
        let workspace =
            job.workspace_path.clone().unwrap_or_else(|| self.workspaces.workspace_path(id));
        self.workspaces.remove(&workspace).await?;

        {
            let mut state = self.state.lock();
            state.jobs.remove(id);
            state.cancel_causes.remove(id);
        }
        self.store.delete(id).map_err(Error::internal)?;
        self.dispatch_wake.notify_one();
        info!(job_id = %id, "job deleted");
        Ok(())
    }

    /// Queue depth and running count for status queries.
    pub fn stats(&self) -> EngineStats {
        let state = self.state.lock();
        EngineStats { total: state.jobs.len(), queued: state.queue.len(), running: state.running }
    }

    /// Hydrate the in-memory index from disk and normalize statuses:
    /// interrupted pre-flight re-enters the queue in prior creation order,
    /// orphaned `Running` jobs are failed with a diagnostic note.
    pub fn recover(&self) -> Result<RecoveryReport, Error> {
        let jobs = self.store.load_all().map_err(Error::internal)?;
        let mut report = RecoveryReport { loaded: jobs.len(), ..Default::default() };
        let mut dirty = Vec::new();

        {
            let mut state = self.state.lock();
            for mut job in jobs {
                match job.status {
                    JobStatus::Queued
                    | JobStatus::GitPulling
                    | JobStatus::CidxIndexing
                    | JobStatus::CidxReady => {
                        job.status = JobStatus::Queued;
                        job.git_status = bx_core::GitStatus::NotChecked;
                        job.cidx_status = bx_core::CidxStatus::NotStarted;
                        state.queue.push_back(job.id.clone());
                        dirty.push(job.clone());
                        report.requeued += 1;
                    }
                    JobStatus::Running => {
                        job.status = JobStatus::Failed;
                        job.completed_at = Some(self.clock.timestamp());
                        job.push_note("orphaned at restart: previous daemon process is gone");
                        // The reaper reclaims the workspace on its next pass.
                        state.pending_reclaim.push(job.id.clone());
                        dirty.push(job.clone());
                        report.orphaned += 1;
                    }
                    _ => {}
                }
                state.jobs.insert(job.id.clone(), job);
            }
        }

        for job in dirty {
            self.persist(&job)?;
        }
        info!(
            loaded = report.loaded,
            requeued = report.requeued,
            orphaned = report.orphaned,
            "startup recovery complete"
        );
        Ok(report)
    }

    // ---- internal helpers (status writes under the lock, I/O outside) ----

    /// Clone a job without an ownership check (pipeline internal).
    pub(crate) fn get_internal(&self, id: &JobId) -> Result<Job, Error> {
        self.state
            .lock()
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("job {id}")))
    }

    /// Mutate a job under the lock, then persist the updated record.
    pub(crate) fn update_job(
        &self,
        id: &JobId,
        mutate: impl FnOnce(&mut Job),
    ) -> Result<Job, Error> {
        let job = {
            let mut state = self.state.lock();
            let job = state.jobs.get_mut(id).ok_or_else(|| Error::NotFound(format!("job {id}")))?;
            mutate(job);
            job.clone()
        };
        self.persist(&job)?;
        Ok(job)
    }

    /// Move a job along the declared transition relation.
    ///
    /// Entering `GitPulling` stamps `started_at` (dispatch begins); entering
    /// any terminal status stamps `completed_at`.
    pub(crate) fn set_status(&self, id: &JobId, to: JobStatus) -> Result<Job, Error> {
        let now = self.clock.timestamp();
        let job = {
            let mut state = self.state.lock();
            let job = state.jobs.get_mut(id).ok_or_else(|| Error::NotFound(format!("job {id}")))?;
            if !job.status.can_transition(to) {
                return Err(Error::Internal(format!(
                    "illegal status transition {} -> {} for job {id}",
                    job.status, to
                )));
            }
            job.status = to;
            if to == JobStatus::GitPulling {
                job.started_at = Some(now);
            }
            if to.is_terminal() {
                job.completed_at = Some(now);
            }
            job.clone()
        };
        self.persist(&job)?;
        Ok(job)
    }

    pub(crate) fn persist(&self, job: &Job) -> Result<(), Error> {
        self.store.save(job).map_err(Error::internal)
    }

    /// Wait until the job's pipeline releases its slot, bounded by `grace`.
    pub(crate) async fn await_pipeline_exit(&self, id: &JobId, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if !self.state.lock().active.contains_key(id) {
                return;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                warn!(job_id = %id, "pipeline did not exit within grace");
                return;
            }
            let _ = tokio::time::timeout(deadline - now, self.slot_released.notified()).await;
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
