// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end lifecycle specs.
//!
//! Drive the engine the way its collaborators do — create, upload, start,
//! poll, delete — against real workspaces on a temp filesystem, with a
//! shell-script assistant standing in for the real one.

use std::sync::Arc;
use std::time::Duration;

use bx_core::{Error, FakeClock, Job, JobId, JobOptions, JobStatus};
use bx_engine::{
    AssistantConfig, DirRegistry, Engine, EngineConfig, EngineDeps, FakeCidx, NoopImpersonator,
    StagingArea, StubCloner, WorkspaceStore,
};
use bx_storage::JobStore;
use tempfile::TempDir;

const WAIT_MAX: Duration = Duration::from_secs(15);

struct Server {
    _dir: TempDir,
    engine: Arc<Engine<FakeClock>>,
    jobs_root: std::path::PathBuf,
}

fn shell(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

fn server(max_concurrent: usize, assistant_script: &str) -> Server {
    let dir = TempDir::new().unwrap();
    let repos = dir.path().join("repos");
    std::fs::create_dir_all(repos.join("r1")).unwrap();
    std::fs::write(repos.join("r1").join("README.md"), b"seed").unwrap();
    let jobs_root = dir.path().join("jobs");

    let clock = FakeClock::new();
    let engine = Arc::new(
        Engine::new(
            EngineConfig {
                max_concurrent,
                wall_clock_timeout: Duration::from_secs(24 * 3600),
                retention: Duration::from_secs(30 * 86_400),
                shutdown_grace: Duration::from_secs(3),
                assistant: AssistantConfig::new(shell(assistant_script)),
                cidx_available_template: std::path::PathBuf::new(),
                cidx_unavailable_template: std::path::PathBuf::new(),
            },
            EngineDeps {
                store: JobStore::open(&jobs_root).unwrap(),
                workspaces: WorkspaceStore::with_cloner(
                    &jobs_root,
                    Arc::new(DirRegistry::new(&repos)),
                    Arc::new(StubCloner::new()),
                ),
                staging: StagingArea::new(&jobs_root),
                cidx: Arc::new(FakeCidx::healthy()),
                impersonator: Arc::new(NoopImpersonator),
            },
            clock.clone(),
        )
        .unwrap(),
    );
    tokio::spawn(Arc::clone(&engine).run());
    Server { _dir: dir, engine, jobs_root }
}

fn options() -> JobOptions {
    JobOptions { timeout_seconds: 60, git_aware: true, cidx_aware: false }
}

async fn wait_until(server: &Server, id: &JobId, what: &str, pred: impl Fn(&Job) -> bool) -> Job {
    let deadline = tokio::time::Instant::now() + WAIT_MAX;
    loop {
        if let Ok(job) = server.engine.get_job(id, "alice") {
            if pred(&job) {
                return job;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Scenario: create and queue — a started job reaches Completed with the
/// assistant's stdout captured and exit code zero.
#[tokio::test]
async fn create_and_queue() {
    let s = server(5, "echo hello from the assistant");
    let job = s.engine.create_job("alice", "hello", "r1", options()).unwrap();
    assert_eq!(job.status, JobStatus::Created);

    s.engine.start_job(&job.id, "alice").unwrap();
    let done = wait_until(&s, &job.id, "completion", |j| j.is_terminal()).await;

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.exit_code, Some(0));
    assert!(done.output.contains("hello from the assistant"));
}

/// Scenario: queue position — with one slot, the second job reports
/// position 1 while the first runs, then takes the slot itself.
#[tokio::test]
async fn queue_position_drains_in_fifo_order() {
    let s = server(1, "sleep 0.4; echo done");
    let j1 = s.engine.create_job("alice", "first", "r1", options()).unwrap();
    let j2 = s.engine.create_job("alice", "second", "r1", options()).unwrap();
    s.engine.start_job(&j1.id, "alice").unwrap();
    s.engine.start_job(&j2.id, "alice").unwrap();

    wait_until(&s, &j1.id, "j1 running", |j| j.status == JobStatus::Running).await;
    let waiting = s.engine.get_job(&j2.id, "alice").unwrap();
    assert_eq!(waiting.queue_position, 1);

    let done = wait_until(&s, &j2.id, "j2 terminal", |j| j.is_terminal()).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.queue_position, 0);
}

/// Scenario: staged upload and placeholder — the assistant receives the
/// rewritten prompt and finds the upload at its original name.
#[tokio::test]
async fn staged_upload_and_placeholder() {
    let s = server(5, "printf 'prompt=%s\\n' \"$0\"; cat ./files/spec.txt");
    let job = s.engine.create_job("alice", "see {{spec.txt}}", "r1", options()).unwrap();
    s.engine.upload(&job.id, "alice", "spec.txt", b"the uploaded bytes", false).unwrap();
    s.engine.start_job(&job.id, "alice").unwrap();

    let done = wait_until(&s, &job.id, "completion", |j| j.is_terminal()).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.output.contains("prompt=see ./files/spec.txt"));
    assert!(done.output.contains("the uploaded bytes"));

    let workspace = done.workspace_path.unwrap();
    assert_eq!(
        std::fs::read(workspace.join("files/spec.txt")).unwrap(),
        b"the uploaded bytes"
    );
    // Repository tree sits at the workspace root next to files/.
    assert_eq!(std::fs::read(workspace.join("README.md")).unwrap(), b"seed");
}

/// Scenario: pre-flight failure — a git-aware job against a repository
/// with no upstream observes Queued → GitPulling → GitFailed and never
/// runs; the workspace stays for the reaper.
#[tokio::test]
async fn preflight_git_failure() {
    let s = server(5, "echo should never run");
    // Make the registered repository a git tree with no remote.
    let repo = s._dir.path().join("repos").join("r1");
    let status = std::process::Command::new("git")
        .args(["init", "-q"])
        .current_dir(&repo)
        .status()
        .unwrap();
    assert!(status.success());

    let job = s.engine.create_job("alice", "hi", "r1", options()).unwrap();
    s.engine.start_job(&job.id, "alice").unwrap();

    let done = wait_until(&s, &job.id, "git failure", |j| j.is_terminal()).await;
    assert_eq!(done.status, JobStatus::GitFailed);
    assert!(done.exit_code.is_none());
    assert!(!done.output.contains("should never run"));
    assert!(done.workspace_path.unwrap().is_dir());
}

/// Scenario: cancellation — deleting a running job signals and reaps the
/// subprocess, removes the workspace, and forgets the job entirely.
#[tokio::test]
async fn cancellation_of_a_running_job() {
    let s = server(5, "sleep 30");
    let job = s.engine.create_job("alice", "long", "r1", options()).unwrap();
    s.engine.start_job(&job.id, "alice").unwrap();
    let running = wait_until(&s, &job.id, "running", |j| j.status == JobStatus::Running).await;
    let workspace = running.workspace_path.unwrap();

    s.engine.delete_job(&job.id, "alice").await.unwrap();

    assert!(matches!(s.engine.get_job(&job.id, "alice"), Err(Error::NotFound(_))));
    assert!(!workspace.exists());
    assert!(!s.jobs_root.join(format!("{}.job.json", job.id)).exists());
}

/// Scenario: crash recovery — a Queued record re-enters the queue, a
/// Running record is rewritten to Failed with a diagnostic, a Completed
/// record is untouched.
#[tokio::test]
async fn crash_recovery() {
    let dir = TempDir::new().unwrap();
    let repos = dir.path().join("repos");
    std::fs::create_dir_all(repos.join("r1")).unwrap();
    let jobs_root = dir.path().join("jobs");
    let store = JobStore::open(&jobs_root).unwrap();

    let queued = Job::builder().id("job-q").status(JobStatus::Queued).build();
    let running = Job::builder().id("job-r").status(JobStatus::Running).build();
    let mut completed = Job::builder().id("job-c").status(JobStatus::Completed).build();
    completed.completed_at = Some(chrono::Utc::now());
    completed.exit_code = Some(0);
    for job in [&queued, &running, &completed] {
        store.save(job).unwrap();
    }

    // "Restart": build a fresh engine over the same jobs root.
    let engine = Engine::new(
        EngineConfig {
            max_concurrent: 1,
            wall_clock_timeout: Duration::from_secs(24 * 3600),
            retention: Duration::from_secs(30 * 86_400),
            shutdown_grace: Duration::from_secs(3),
            assistant: AssistantConfig::new(shell("echo ok")),
            cidx_available_template: std::path::PathBuf::new(),
            cidx_unavailable_template: std::path::PathBuf::new(),
        },
        EngineDeps {
            store: JobStore::open(&jobs_root).unwrap(),
            workspaces: WorkspaceStore::with_cloner(
                &jobs_root,
                Arc::new(DirRegistry::new(&repos)),
                Arc::new(StubCloner::new()),
            ),
            staging: StagingArea::new(&jobs_root),
            cidx: Arc::new(FakeCidx::healthy()),
            impersonator: Arc::new(NoopImpersonator),
        },
        FakeClock::new(),
    )
    .unwrap();
    let report = engine.recover().unwrap();
    assert_eq!(report.loaded, 3);

    let q = engine.get_job(&queued.id, "alice").unwrap();
    assert_eq!(q.status, JobStatus::Queued);
    assert_eq!(q.queue_position, 1);

    let r = engine.get_job(&running.id, "alice").unwrap();
    assert_eq!(r.status, JobStatus::Failed);
    assert!(r.output.contains("orphaned at restart"));

    let c = engine.get_job(&completed.id, "alice").unwrap();
    assert_eq!(c.status, JobStatus::Completed);
    assert_eq!(c.exit_code, Some(0));
}

/// Boundary: a cancellation received before dispatch removes the job from
/// the queue without ever creating a workspace.
#[tokio::test]
async fn delete_before_dispatch_creates_no_workspace() {
    let s = server(1, "sleep 5");
    // Occupy the single slot so the second job stays queued.
    let blocker = s.engine.create_job("alice", "blocker", "r1", options()).unwrap();
    s.engine.start_job(&blocker.id, "alice").unwrap();
    wait_until(&s, &blocker.id, "blocker running", |j| j.status == JobStatus::Running).await;

    let queued = s.engine.create_job("alice", "queued", "r1", options()).unwrap();
    s.engine.start_job(&queued.id, "alice").unwrap();
    assert_eq!(s.engine.get_job(&queued.id, "alice").unwrap().queue_position, 1);

    s.engine.delete_job(&queued.id, "alice").await.unwrap();
    assert!(matches!(s.engine.get_job(&queued.id, "alice"), Err(Error::NotFound(_))));
    assert!(!s.jobs_root.join(queued.id.as_str()).exists());

    s.engine.shutdown().await;
}

/// Boundary: a job with no uploads has no files/ side effects beyond the
/// empty directory the workspace store always provides.
#[tokio::test]
async fn no_uploads_means_empty_files_dir() {
    let s = server(5, "ls files");
    let job = s.engine.create_job("alice", "hi", "r1", options()).unwrap();
    s.engine.start_job(&job.id, "alice").unwrap();

    let done = wait_until(&s, &job.id, "completion", |j| j.is_terminal()).await;
    assert_eq!(done.status, JobStatus::Completed);
    let files: Vec<_> = std::fs::read_dir(done.workspace_path.unwrap().join("files"))
        .unwrap()
        .collect();
    assert!(files.is_empty());
}

/// Law: wall-clock age applies to every state; queued jobs never hit the
/// execution timeout.
#[tokio::test]
async fn queued_jobs_do_not_consume_execution_timeout() {
    // The blocker sleeps past the short job's 1s execution timeout; the
    // short job itself finishes instantly once dispatched.
    let s = server(1, "case \"$0\" in *blocker*) sleep 1.5 ;; esac; echo ok");
    let blocker = s.engine.create_job("alice", "blocker", "r1", options()).unwrap();
    s.engine.start_job(&blocker.id, "alice").unwrap();

    let short = s
        .engine
        .create_job(
            "alice",
            "short",
            "r1",
            JobOptions { timeout_seconds: 1, git_aware: false, cidx_aware: false },
        )
        .unwrap();
    s.engine.start_job(&short.id, "alice").unwrap();

    // Even though it waited longer than its own 1s execution timeout, the
    // queued job still completes once dispatched.
    let done = wait_until(&s, &short.id, "short job terminal", |j| j.is_terminal()).await;
    assert_eq!(done.status, JobStatus::Completed);
}
