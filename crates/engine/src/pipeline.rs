// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-job pipeline: workspace provisioning, pre-flight, execution,
//! and terminal-status capture. One pipeline task per dispatched job.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bx_core::{resolve_placeholders, CidxStatus, Clock, Error, GitStatus, JobId, JobStatus, FILES_DIR};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::executor::{self, ExecOutcome, ExecSpec};
use crate::preflight::{self, PullOutcome};
use crate::state::CancelCause;
use crate::subprocess::CIDX_READY_TIMEOUT;

/// Entry point spawned by the dispatcher. Never panics: any error forces
/// the job to `Failed` before the slot is released.
pub(crate) async fn run<C: Clock>(engine: Arc<Engine<C>>, id: JobId, cancel: CancellationToken) {
    if let Err(e) = run_inner(&engine, &id, &cancel).await {
        error!(job_id = %id, error = %e, "pipeline error, forcing job to failed");
        let now = engine.clock.timestamp();
        let _ = engine.update_job(&id, |job| {
            if !job.is_terminal() {
                job.status = JobStatus::Failed;
                job.completed_at = Some(now);
                job.push_note(&format!("pipeline error: {e}"));
            }
        });
    }
    engine.finish_dispatch(&id);
}

async fn run_inner<C: Clock>(
    engine: &Arc<Engine<C>>,
    id: &JobId,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let job = engine.get_internal(id)?;

    // Dispatch begins: stamps started_at.
    engine.set_status(id, JobStatus::GitPulling)?;

    // Workspace provisioning.
    let workspace = match engine.workspaces.clone_for_job(&job.repository, id).await {
        Ok(path) => path,
        Err(e) => return fail(engine, id, JobStatus::Failed, &e.to_string()),
    };
    engine.update_job(id, |j| j.workspace_path = Some(workspace.clone()))?;

    // Pre-flight (a): git pull.
    if job.options.git_aware {
        engine.update_job(id, |j| j.git_status = GitStatus::Checking)?;
        match preflight::git_pull(&workspace, job.options.timeout_seconds, cancel).await {
            PullOutcome::Pulled => {
                engine.update_job(id, |j| j.git_status = GitStatus::Pulled)?;
            }
            PullOutcome::NotRepo => {
                debug!(job_id = %id, "workspace is not a git tree, skipping pull");
                engine.update_job(id, |j| j.git_status = GitStatus::NotGitRepo)?;
            }
            PullOutcome::Failed(reason) => {
                engine.update_job(id, |j| {
                    j.git_status = GitStatus::Failed;
                    j.push_note(&reason);
                })?;
                engine.set_status(id, JobStatus::GitFailed)?;
                info!(job_id = %id, reason = %reason, "git pull failed");
                return Ok(());
            }
            PullOutcome::Cancelled => return finish_cancelled(engine, id, None),
        }
    }

    // Pre-flight (b): staged-file materialization. Always performed; on
    // failure staging is retained for diagnostics.
    match engine.staging.materialize(id, &workspace) {
        Ok(count) => {
            if count > 0 {
                debug!(job_id = %id, count, "staged files materialized");
            }
            engine.staging.cleanup(id);
        }
        Err(e) => return fail(engine, id, JobStatus::Failed, &e.to_string()),
    }

    // Pre-flight (c): semantic-index bring-up.
    let mut cidx_ready = false;
    if job.options.cidx_aware {
        engine.set_status(id, JobStatus::CidxIndexing)?;
        engine.update_job(id, |j| j.cidx_status = CidxStatus::Starting)?;
        match bring_up_sidecar(engine, &workspace, cancel).await {
            Ok(()) => {
                engine.update_job(id, |j| j.cidx_status = CidxStatus::Ready)?;
                engine.set_status(id, JobStatus::CidxReady)?;
                cidx_ready = true;
            }
            Err(Error::Cancelled) => {
                engine.cidx.stop(&workspace).await;
                return finish_cancelled(engine, id, None);
            }
            Err(e) => {
                // The job opted into semantic search; running without it
                // would silently degrade behavior.
                engine.cidx.stop(&workspace).await;
                engine.update_job(id, |j| j.cidx_status = CidxStatus::Failed)?;
                return fail(engine, id, JobStatus::Failed, &e.to_string());
            }
        }
    }

    // Compose the effective prompt and system prompt.
    let system_prompt = preflight::compose_system_prompt(&engine.cfg, cidx_ready)?;
    let job = engine.get_internal(id)?;
    let prompt = resolve_placeholders(&job.prompt, &job.uploaded_files);
    let images: Vec<PathBuf> =
        job.images.iter().map(|name| workspace.join(FILES_DIR).join(name)).collect();

    // Execution.
    engine.set_status(id, JobStatus::Running)?;
    let spec = ExecSpec {
        user: job.user.clone(),
        workspace: workspace.clone(),
        prompt,
        system_prompt,
        images,
        timeout: Duration::from_secs(job.options.timeout_seconds.max(1)),
    };
    let result =
        executor::execute(&engine.cfg.assistant, engine.impersonator.as_ref(), spec, cancel).await;

    if job.options.cidx_aware {
        stop_sidecar(engine, id, &workspace).await;
    }

    let result = result?;
    engine.update_job(id, |j| j.output = result.output.clone())?;

    match result.outcome {
        ExecOutcome::Exited(0) => {
            engine.update_job(id, |j| j.exit_code = Some(0))?;
            engine.set_status(id, JobStatus::Completed)?;
            info!(job_id = %id, "job completed");
        }
        ExecOutcome::Exited(code) => {
            engine.update_job(id, |j| {
                j.exit_code = Some(code);
                j.push_note(&Error::ExecutionFailed(code).to_string());
            })?;
            engine.set_status(id, JobStatus::Failed)?;
            info!(job_id = %id, code, "job failed");
        }
        ExecOutcome::TimedOut => {
            engine.update_job(id, |j| {
                j.push_note(&Error::Timeout(job.options.timeout_seconds).to_string());
            })?;
            engine.set_status(id, JobStatus::Timeout)?;
            info!(job_id = %id, "job timed out");
        }
        ExecOutcome::Cancelled => {
            return finish_cancelled(engine, id, Some(&result.output));
        }
    }
    Ok(())
}

/// Start the sidecar and poll its readiness contract.
async fn bring_up_sidecar<C: Clock>(
    engine: &Arc<Engine<C>>,
    workspace: &Path,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    engine.cidx.start(workspace).await?;
    engine.cidx.wait_ready(workspace, CIDX_READY_TIMEOUT, cancel).await
}

async fn stop_sidecar<C: Clock>(engine: &Arc<Engine<C>>, id: &JobId, workspace: &Path) {
    engine.cidx.stop(workspace).await;
    let _ = engine.update_job(id, |j| {
        if j.cidx_status == CidxStatus::Ready {
            j.cidx_status = CidxStatus::Stopped;
        }
    });
}

/// Terminalize a failed step, persisting the diagnostic note.
fn fail<C: Clock>(
    engine: &Arc<Engine<C>>,
    id: &JobId,
    status: JobStatus,
    note: &str,
) -> Result<(), Error> {
    info!(job_id = %id, %status, note, "pipeline step failed");
    engine.update_job(id, |j| j.push_note(note))?;
    engine.set_status(id, status)?;
    Ok(())
}

/// Map a fired cancellation token to the right terminal status: user
/// delete → `Cancelled`, wall-clock expiry → `Failed` (partial output
/// preserved), process shutdown → `Failed`.
fn finish_cancelled<C: Clock>(
    engine: &Arc<Engine<C>>,
    id: &JobId,
    partial_output: Option<&str>,
) -> Result<(), Error> {
    let cause = engine.state.lock().cancel_causes.get(id).copied();

    if let Some(output) = partial_output {
        let output = output.to_string();
        engine.update_job(id, move |j| j.output = output)?;
    }

    match cause {
        Some(CancelCause::UserDelete) => {
            engine.set_status(id, JobStatus::Cancelled)?;
            info!(job_id = %id, "job cancelled by user");
        }
        Some(CancelCause::WallClock) => {
            engine.update_job(id, |j| j.push_note("wall-clock timeout exceeded"))?;
            engine.set_status(id, JobStatus::Failed)?;
            info!(job_id = %id, "job failed: wall-clock timeout");
        }
        None => {
            // No recorded cause: the process-wide shutdown token fired.
            engine.update_job(id, |j| j.push_note("aborted at shutdown"))?;
            engine.set_status(id, JobStatus::Failed)?;
            info!(job_id = %id, "job aborted at shutdown");
        }
    }
    Ok(())
}
