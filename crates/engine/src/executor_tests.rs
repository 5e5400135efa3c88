// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::impersonate::NoopImpersonator;
use tempfile::TempDir;

fn spec(dir: &TempDir, timeout: Duration) -> ExecSpec {
    ExecSpec {
        user: "alice".to_string(),
        workspace: dir.path().to_path_buf(),
        prompt: "ignored".to_string(),
        system_prompt: String::new(),
        images: Vec::new(),
        timeout,
    }
}

fn shell(script: &str) -> AssistantConfig {
    AssistantConfig::new(vec!["sh".to_string(), "-c".to_string(), script.to_string()])
}

#[tokio::test]
async fn zero_exit_with_captured_stdout() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let result = execute(
        &shell("echo assistant says hi"),
        &NoopImpersonator,
        spec(&dir, Duration::from_secs(10)),
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(result.outcome, ExecOutcome::Exited(0));
    assert!(result.output.contains("assistant says hi"));
}

#[tokio::test]
async fn stderr_is_merged_into_output() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let result = execute(
        &shell("echo to-out; echo to-err >&2"),
        &NoopImpersonator,
        spec(&dir, Duration::from_secs(10)),
        &cancel,
    )
    .await
    .unwrap();

    assert!(result.output.contains("to-out"));
    assert!(result.output.contains("to-err"));
}

#[tokio::test]
async fn nonzero_exit_is_reported() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let result = execute(
        &shell("exit 3"),
        &NoopImpersonator,
        spec(&dir, Duration::from_secs(10)),
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(result.outcome, ExecOutcome::Exited(3));
}

#[tokio::test]
async fn workspace_is_the_working_directory() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("marker.txt"), b"here").unwrap();
    let cancel = CancellationToken::new();

    let result = execute(
        &shell("cat marker.txt"),
        &NoopImpersonator,
        spec(&dir, Duration::from_secs(10)),
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(result.outcome, ExecOutcome::Exited(0));
    assert!(result.output.contains("here"));
}

#[tokio::test]
async fn watchdog_terminates_long_runs() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let started = std::time::Instant::now();
    let result = execute(
        &shell("echo partial; sleep 30"),
        &NoopImpersonator,
        spec(&dir, Duration::from_millis(300)),
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(result.outcome, ExecOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(10));
    // Output produced before the watchdog fired is preserved.
    assert!(result.output.contains("partial"));
}

#[tokio::test]
async fn cancellation_interrupts_the_run() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let result = execute(
        &shell("sleep 30"),
        &NoopImpersonator,
        spec(&dir, Duration::from_secs(60)),
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(result.outcome, ExecOutcome::Cancelled);
}

#[tokio::test]
async fn pre_cancelled_token_skips_the_spawn() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = execute(
        &shell("echo should not run"),
        &NoopImpersonator,
        spec(&dir, Duration::from_secs(10)),
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(result.outcome, ExecOutcome::Cancelled);
    assert!(result.output.is_empty());
}

#[tokio::test]
async fn prompt_is_passed_as_final_argument() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let mut s = spec(&dir, Duration::from_secs(10));
    s.prompt = "the actual prompt".to_string();

    // With `sh -c <script>`, the first extra argument becomes $0.
    let result = execute(&shell("printf '%s' \"$0\""), &NoopImpersonator, s, &cancel)
        .await
        .unwrap();

    assert_eq!(result.output, "the actual prompt");
}

#[test]
fn empty_assistant_command_is_invalid() {
    let cfg = AssistantConfig::new(Vec::new());
    assert!(matches!(cfg.split(), Err(Error::InvalidInput(_))));
}

#[test]
fn rolling_buffer_keeps_the_tail() {
    let mut buf = RollingBuffer::new(8);
    buf.push(b"0123456789");
    assert_eq!(buf.as_text(), "23456789");

    buf.push(b"ab");
    assert_eq!(buf.as_text(), "456789ab");
}

#[test]
fn rolling_buffer_handles_oversized_single_push() {
    let mut buf = RollingBuffer::new(4);
    buf.push(b"a");
    buf.push(b"0123456789");
    assert_eq!(buf.as_text(), "6789");
}
