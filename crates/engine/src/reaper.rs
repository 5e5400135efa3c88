// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two-tier cleanup.
//!
//! Short horizon (colocated with the dispatcher loop): jobs older than the
//! wall-clock timeout lose their sidecar, workspace, and in-memory entry;
//! the record file is retained. A still-running pipeline is cancelled on
//! one pass and torn down on a later pass so partial output survives.
//!
//! Long horizon: terminal records older than the retention window are
//! deleted from disk and dropped from the index.

use std::sync::Arc;
use std::time::Duration;

use bx_core::{CidxStatus, Clock, Job};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::state::CancelCause;

pub(crate) const SHORT_INTERVAL: Duration = Duration::from_secs(5);
pub(crate) const LONG_INTERVAL: Duration = Duration::from_secs(600);

/// Reclaim workspaces of jobs past the wall-clock age, whatever their
/// status, plus the workspaces of orphans flagged at startup recovery.
pub(crate) async fn short_pass<C: Clock>(engine: &Arc<Engine<C>>) {
    let now_ms = engine.clock.epoch_ms();
    let limit_ms = engine.cfg.wall_clock_timeout.as_millis() as u64;

    // Orphans keep their index entry and record; only the workspace goes.
    let orphans: Vec<Job> = {
        let mut state = engine.state.lock();
        let ids = std::mem::take(&mut state.pending_reclaim);
        ids.iter().filter_map(|id| state.jobs.get(id).cloned()).collect()
    };
    for job in orphans {
        info!(job_id = %job.id, "reclaiming orphaned workspace");
        teardown(engine, &job).await;
    }

    let (to_cancel, to_remove): (Vec<CancellationToken>, Vec<Job>) = {
        let mut state = engine.state.lock();
        let expired: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.age_ms(now_ms) > limit_ms)
            .cloned()
            .collect();

        let mut cancels = Vec::new();
        let mut removals = Vec::new();
        for job in expired {
            if let Some(token) = state.active.get(&job.id).cloned() {
                // First pass on a live pipeline: record the cause and cancel;
                // teardown happens once the pipeline has terminalized.
                state.cancel_causes.entry(job.id.clone()).or_insert(CancelCause::WallClock);
                cancels.push(token);
            } else {
                state.unqueue(&job.id);
                state.jobs.remove(&job.id);
                removals.push(job);
            }
        }
        (cancels, removals)
    };

    for token in to_cancel {
        token.cancel();
    }

    for job in to_remove {
        info!(job_id = %job.id, status = %job.status, "wall-clock timeout: reclaiming workspace");
        teardown(engine, &job).await;
    }
}

/// Stop the sidecar and remove the workspace; the record file survives
/// until the retention sweep.
pub(crate) async fn teardown<C: Clock>(engine: &Arc<Engine<C>>, job: &Job) {
    if job.options.cidx_aware && job.cidx_status != CidxStatus::NotStarted {
        if let Some(ws) = &job.workspace_path {
            engine.cidx.stop(ws).await;
        }
    }
    let workspace = job
        .workspace_path
        .clone()
        .unwrap_or_else(|| engine.workspaces.workspace_path(&job.id));
    if let Err(e) = engine.workspaces.remove(&workspace).await {
        warn!(job_id = %job.id, error = %e, "workspace removal failed");
    }
}

/// Delete terminal records past the retention window.
pub(crate) fn long_pass<C: Clock>(engine: &Arc<Engine<C>>) {
    match engine.store.reap_terminal(engine.cfg.retention, engine.clock.epoch_ms()) {
        Ok(reaped) => {
            if reaped.is_empty() {
                return;
            }
            let mut state = engine.state.lock();
            for id in &reaped {
                state.jobs.remove(id);
            }
            info!(count = reaped.len(), "retention sweep deleted terminal records");
        }
        Err(e) => warn!(error = %e, "retention sweep failed"),
    }
}

#[cfg(test)]
#[path = "reaper_tests.rs"]
mod tests;
