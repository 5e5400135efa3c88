// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn status(states: &[(&str, &str)]) -> String {
    let services: serde_json::Map<String, serde_json::Value> = states
        .iter()
        .map(|(name, state)| {
            (name.to_string(), serde_json::json!({ "state": state }))
        })
        .collect();
    serde_json::json!({ "services": services }).to_string()
}

#[test]
fn all_four_ready_services_pass() {
    let json = status(&[
        ("qdrant", "ready"),
        ("ollama", "ready"),
        ("data-cleaner", "ready"),
        ("indexer", "ready"),
    ]);
    assert!(all_services_ready(&json));
}

#[test]
fn one_starting_service_fails_the_probe() {
    let json = status(&[
        ("qdrant", "ready"),
        ("ollama", "starting"),
        ("data-cleaner", "ready"),
        ("indexer", "ready"),
    ]);
    assert!(!all_services_ready(&json));
}

#[test]
fn missing_service_fails_the_probe() {
    let json = status(&[("qdrant", "ready"), ("ollama", "ready"), ("indexer", "ready")]);
    assert!(!all_services_ready(&json));
}

#[test]
fn malformed_json_fails_the_probe() {
    assert!(!all_services_ready("not json at all"));
    assert!(!all_services_ready("{}"));
}

#[tokio::test]
async fn fake_cidx_honors_cancellation() {
    let fake = FakeCidx::healthy();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = fake
        .wait_ready(Path::new("/tmp"), Duration::from_secs(1), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
}
