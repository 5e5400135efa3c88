// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dispatcher: a single cooperative loop that pops queued jobs into
//! pipeline tasks whenever a slot is free, hosts the reaper ticks, and
//! drives graceful shutdown.

use std::sync::Arc;

use bx_core::{Clock, JobId, JobStatus};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::{pipeline, reaper};

impl<C: Clock> Engine<C> {
    /// Run the dispatcher until shutdown. The short-horizon reaper pass is
    /// colocated here; the long-horizon retention sweep runs on its own
    /// slower tick.
    pub async fn run(self: Arc<Self>) {
        let mut short_tick = tokio::time::interval(reaper::SHORT_INTERVAL);
        let mut long_tick = tokio::time::interval(reaper::LONG_INTERVAL);
        // The first tick of a tokio interval fires immediately.
        short_tick.tick().await;
        long_tick.tick().await;

        info!(max_concurrent = self.cfg.max_concurrent, "dispatcher started");
        loop {
            self.dispatch_ready();
            tokio::select! {
                _ = self.dispatch_wake.notified() => {}
                _ = short_tick.tick() => reaper::short_pass(&self).await,
                _ = long_tick.tick() => reaper::long_pass(&self),
                _ = self.shutdown.cancelled() => break,
            }
        }
        info!("dispatcher stopped");
    }

    /// Pop as many queued jobs as free slots allow and spawn their
    /// pipelines. Constant-time state work under the lock; task spawning
    /// outside it.
    pub(crate) fn dispatch_ready(self: &Arc<Self>) {
        let to_launch: Vec<(JobId, CancellationToken)> = {
            let mut state = self.state.lock();
            let mut launches = Vec::new();
            while state.running < self.cfg.max_concurrent {
                let Some(id) = state.queue.pop_front() else { break };
                state.running += 1;
                let token = self.shutdown.child_token();
                state.active.insert(id.clone(), token.clone());
                launches.push((id, token));
            }
            launches
        };

        for (id, token) in to_launch {
            info!(job_id = %id, "dispatching job");
            let engine = Arc::clone(self);
            tokio::spawn(pipeline::run(engine, id, token));
        }
    }

    /// Release the slot held by a finished pipeline.
    pub(crate) fn finish_dispatch(&self, id: &JobId) {
        {
            let mut state = self.state.lock();
            state.running = state.running.saturating_sub(1);
            state.active.remove(id);
            state.cancel_causes.remove(id);
        }
        self.slot_released.notify_waiters();
        self.dispatch_wake.notify_one();
    }

    /// Graceful shutdown: stop dispatching, cancel running pipelines, wait
    /// out the grace, then force-fail whatever is still in flight.
    /// Workspaces are left for the reaper.
    pub async fn shutdown(self: &Arc<Self>) {
        let stats = self.stats();
        info!(running = stats.running, queued = stats.queued, "shutdown initiated");
        self.shutdown.cancel();

        let deadline = tokio::time::Instant::now() + self.cfg.shutdown_grace;
        loop {
            let active: Vec<JobId> = self.state.lock().active.keys().cloned().collect();
            if active.is_empty() {
                break;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                self.abort_stragglers(&active);
                break;
            }
            let _ = tokio::time::timeout(deadline - now, self.slot_released.notified()).await;
        }
        info!("shutdown complete");
    }

    /// Pipelines that did not conclude within the grace are recorded as
    /// failed; their processes die with the daemon.
    fn abort_stragglers(&self, active: &[JobId]) {
        let now = self.clock.timestamp();
        for id in active {
            warn!(job_id = %id, "pipeline did not finish within shutdown grace");
            let result = self.update_job(id, |job| {
                if !job.is_terminal() {
                    job.status = JobStatus::Failed;
                    job.completed_at = Some(now);
                    job.push_note("aborted at shutdown");
                }
            });
            if let Err(e) = result {
                warn!(job_id = %id, error = %e, "failed to record shutdown abort");
            }
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
