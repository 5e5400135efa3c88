// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for engine tests: a fully wired [`Engine`] on temp
//! directories with the stub cloner, fake sidecar, and fake clock.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bx_core::{FakeClock, Job, JobId, JobOptions};
use bx_storage::JobStore;
use tempfile::TempDir;

use crate::cidx::FakeCidx;
use crate::engine::{Engine, EngineConfig, EngineDeps};
use crate::executor::AssistantConfig;
use crate::impersonate::NoopImpersonator;
use crate::repository::DirRegistry;
use crate::staging::StagingArea;
use crate::workspace::{StubCloner, WorkspaceStore};

pub(crate) struct HarnessOptions {
    pub max_concurrent: usize,
    pub assistant: Vec<String>,
    pub cidx: FakeCidx,
    pub wall_clock_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            assistant: shell_assistant("echo ok"),
            cidx: FakeCidx::healthy(),
            wall_clock_timeout: Duration::from_secs(24 * 3600),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// `sh -c <script>` assistant; the appended prompt becomes `$0`.
pub(crate) fn shell_assistant(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

pub(crate) struct Harness {
    pub _dir: TempDir,
    pub clock: FakeClock,
    pub cidx: Arc<FakeCidx>,
    pub engine: Arc<Engine<FakeClock>>,
    pub jobs_root: PathBuf,
    pub repos_root: PathBuf,
}

impl Harness {
    pub fn new(opts: HarnessOptions) -> Self {
        let dir = TempDir::new().unwrap();
        let repos_root = dir.path().join("repos");
        std::fs::create_dir_all(repos_root.join("r1")).unwrap();
        std::fs::write(repos_root.join("r1").join("README.md"), b"fixture repo").unwrap();
        let jobs_root = dir.path().join("jobs");

        let clock = FakeClock::new();
        let cidx = Arc::new(opts.cidx);
        let store = JobStore::open(&jobs_root).unwrap();
        let workspaces = WorkspaceStore::with_cloner(
            &jobs_root,
            Arc::new(DirRegistry::new(&repos_root)),
            Arc::new(StubCloner::new()),
        );
        let engine = Engine::new(
            EngineConfig {
                max_concurrent: opts.max_concurrent,
                wall_clock_timeout: opts.wall_clock_timeout,
                retention: Duration::from_secs(30 * 86_400),
                shutdown_grace: opts.shutdown_grace,
                assistant: AssistantConfig::new(opts.assistant),
                cidx_available_template: PathBuf::new(),
                cidx_unavailable_template: PathBuf::new(),
            },
            EngineDeps {
                store,
                workspaces,
                staging: StagingArea::new(&jobs_root),
                cidx: Arc::clone(&cidx) as Arc<dyn crate::cidx::CidxAdapter>,
                impersonator: Arc::new(NoopImpersonator),
            },
            clock.clone(),
        )
        .unwrap();

        Self {
            _dir: dir,
            clock,
            cidx,
            engine: Arc::new(engine),
            jobs_root,
            repos_root,
        }
    }

    pub fn default() -> Self {
        Self::new(HarnessOptions::default())
    }

    /// Create a job against the fixture repository.
    pub fn create(&self, options: JobOptions) -> Job {
        self.engine.create_job("alice", "do the thing", "r1", options).unwrap()
    }

    /// Options that skip both pre-flight integrations.
    pub fn plain_options() -> JobOptions {
        JobOptions { timeout_seconds: 30, git_aware: false, cidx_aware: false }
    }

    /// Poll `get_job` until the predicate holds or the deadline passes.
    pub async fn wait_for(&self, id: &JobId, what: &str, pred: impl Fn(&Job) -> bool) -> Job {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
        loop {
            if let Ok(job) = self.engine.get_job(id, "alice") {
                if pred(&job) {
                    return job;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for: {what}"
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Poll until `get_job` reports NotFound.
    pub async fn wait_for_gone(&self, id: &JobId, what: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
        loop {
            if matches!(self.engine.get_job(id, "alice"), Err(bx_core::Error::NotFound(_))) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for disappearance: {what}"
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}
