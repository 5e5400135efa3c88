// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use base64::Engine as _;
use bx_core::FakeClock;
use bx_engine::{
    AssistantConfig, DirRegistry, EngineConfig, EngineDeps, FakeCidx, NoopImpersonator,
    StagingArea, StubCloner, WorkspaceStore,
};
use bx_storage::JobStore;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

struct SocketHarness {
    _dir: TempDir,
    stream: tokio::net::UnixStream,
    shutdown: CancellationToken,
}

async fn socket_harness() -> SocketHarness {
    let dir = TempDir::new().unwrap();
    let repos = dir.path().join("repos");
    std::fs::create_dir_all(repos.join("r1")).unwrap();
    std::fs::write(repos.join("r1").join("README.md"), b"x").unwrap();
    let jobs_root = dir.path().join("jobs");

    let engine = Arc::new(
        Engine::new(
            EngineConfig {
                max_concurrent: 1,
                wall_clock_timeout: Duration::from_secs(3600),
                retention: Duration::from_secs(3600),
                shutdown_grace: Duration::from_secs(1),
                assistant: AssistantConfig::new(vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "echo listener test output".to_string(),
                ]),
                cidx_available_template: PathBuf::new(),
                cidx_unavailable_template: PathBuf::new(),
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
        .unwrap(),
    );

    let socket_path = dir.path().join("bxd.sock");
    let unix_listener = UnixListener::bind(&socket_path).unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(Arc::new(Listener::new(engine)).run(unix_listener, shutdown.clone()));

    let stream = UnixStream::connect(&socket_path).await.unwrap();
    SocketHarness { _dir: dir, stream, shutdown }
}

async fn roundtrip(harness: &mut SocketHarness, request: &Request) -> serde_json::Value {
    let mut line = serde_json::to_string(request).unwrap();
    line.push('\n');
    harness.stream.write_all(line.as_bytes()).await.unwrap();

    let mut reader = BufReader::new(&mut harness.stream);
    let mut response = String::new();
    reader.read_line(&mut response).await.unwrap();
    serde_json::from_str(&response).unwrap()
}

#[tokio::test]
async fn create_upload_get_flow_over_the_socket() {
    let mut h = socket_harness().await;

    let created = roundtrip(
        &mut h,
        &Request::CreateJob {
            user: "alice".to_string(),
            prompt: "see {{spec.txt}}".to_string(),
            repository: "r1".to_string(),
            options: None,
        },
    )
    .await;
    assert_eq!(created["result"], "job");
    assert_eq!(created["job"]["status"], "created");
    let job_id = created["job"]["id"].as_str().unwrap().to_string();

    let data = base64::engine::general_purpose::STANDARD.encode(b"file bytes");
    let stored = roundtrip(
        &mut h,
        &Request::Upload {
            user: "alice".to_string(),
            job_id: job_id.clone(),
            name: "spec.txt".to_string(),
            data,
            image: false,
        },
    )
    .await;
    assert_eq!(stored["result"], "stored");

    let fetched = roundtrip(
        &mut h,
        &Request::GetJob { user: "alice".to_string(), job_id: job_id.clone() },
    )
    .await;
    assert_eq!(fetched["job"]["uploaded_files"][0], "spec.txt");

    h.shutdown.cancel();
}

#[tokio::test]
async fn errors_carry_the_taxonomy_kind() {
    let mut h = socket_harness().await;

    let missing = roundtrip(
        &mut h,
        &Request::GetJob { user: "alice".to_string(), job_id: "job-nope".to_string() },
    )
    .await;
    assert_eq!(missing["result"], "error");
    assert_eq!(missing["kind"], "not_found");

    let bad_repo = roundtrip(
        &mut h,
        &Request::CreateJob {
            user: "alice".to_string(),
            prompt: "p".to_string(),
            repository: "ghost".to_string(),
            options: None,
        },
    )
    .await;
    assert_eq!(bad_repo["kind"], "not_found");

    h.shutdown.cancel();
}

#[tokio::test]
async fn malformed_requests_do_not_kill_the_connection() {
    let mut h = socket_harness().await;

    h.stream.write_all(b"this is not json\n").await.unwrap();
    let mut reader = BufReader::new(&mut h.stream);
    let mut response = String::new();
    reader.read_line(&mut response).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert_eq!(parsed["kind"], "invalid_input");

    // The same connection still serves valid requests.
    let status = roundtrip(&mut h, &Request::Status).await;
    assert_eq!(status["result"], "status");
    assert_eq!(status["total"], 0);

    h.shutdown.cancel();
}

#[tokio::test]
async fn status_reports_queue_counts() {
    let mut h = socket_harness().await;

    roundtrip(
        &mut h,
        &Request::CreateJob {
            user: "alice".to_string(),
            prompt: "p".to_string(),
            repository: "r1".to_string(),
            options: None,
        },
    )
    .await;

    let status = roundtrip(&mut h, &Request::Status).await;
    assert_eq!(status["total"], 1);
    assert_eq!(status["queued"], 0);

    h.shutdown.cancel();
}
