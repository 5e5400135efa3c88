// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The engine's single exclusive section: job index, FIFO queue, running
//! count, and per-job cancellation bookkeeping.
//!
//! Critical regions over this state are constant-time map and queue
//! mutations only — no disk or subprocess I/O ever happens under the lock.

use std::collections::{HashMap, VecDeque};

use bx_core::{Job, JobId};
use tokio_util::sync::CancellationToken;

/// Why a job's cancellation token was fired, recorded before cancelling so
/// the pipeline can pick the right terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelCause {
    UserDelete,
    WallClock,
}

#[derive(Default)]
pub(crate) struct EngineState {
    /// In-memory job index; mirrors the record files on disk.
    pub jobs: HashMap<JobId, Job>,
    /// FIFO of queued job ids awaiting a slot.
    pub queue: VecDeque<JobId>,
    /// Number of pipelines currently holding a slot.
    pub running: usize,
    /// Cancellation token per in-flight pipeline.
    pub active: HashMap<JobId, CancellationToken>,
    /// Recorded cancellation causes (user delete vs. wall-clock expiry).
    pub cancel_causes: HashMap<JobId, CancelCause>,
    /// Workspaces of orphans found at startup, awaiting the next reaper pass.
    pub pending_reclaim: Vec<JobId>,
}

impl EngineState {
    /// 1-based queue position, 0 for any job not currently queued.
    pub fn position(&self, id: &JobId) -> usize {
        self.queue.iter().position(|q| q == id).map(|i| i + 1).unwrap_or(0)
    }

    /// Remove a job from the queue; true if it was queued.
    pub fn unqueue(&mut self, id: &JobId) -> bool {
        match self.queue.iter().position(|q| q == id) {
            Some(at) => {
                self.queue.remove(at);
                true
            }
            None => false,
        }
    }
}
