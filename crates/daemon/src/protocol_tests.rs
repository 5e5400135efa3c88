// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn request_round_trips_through_json() {
    let req = Request::CreateJob {
        user: "alice".to_string(),
        prompt: "hello".to_string(),
        repository: "r1".to_string(),
        options: Some(JobOptions { timeout_seconds: 60, git_aware: true, cidx_aware: false }),
    };

    let json = serde_json::to_string(&req).unwrap();
    assert!(json.contains("\"op\":\"create_job\""));
    let parsed: Request = serde_json::from_str(&json).unwrap();
    match parsed {
        Request::CreateJob { user, options, .. } => {
            assert_eq!(user, "alice");
            assert_eq!(options.unwrap().timeout_seconds, 60);
        }
        other => panic!("unexpected request: {other:?}"),
    }
}

#[test]
fn request_options_default_to_absent() {
    let parsed: Request = serde_json::from_str(
        r#"{"op":"create_job","user":"a","prompt":"p","repository":"r"}"#,
    )
    .unwrap();
    assert!(matches!(parsed, Request::CreateJob { options: None, .. }));
}

#[test]
fn job_dto_flattens_status_enums() {
    let mut job = Job::builder().id("job-dto1").build();
    job.queue_position = 2;
    let dto = JobDto::from(job);

    assert_eq!(dto.status, "created");
    assert_eq!(dto.git_status, "not_checked");
    assert_eq!(dto.cidx_status, "not_started");
    assert_eq!(dto.queue_position, 2);

    let json = serde_json::to_string(&dto).unwrap();
    assert!(json.contains("\"queue_position\":2"));
}

#[test]
fn every_error_kind_has_a_stable_tag() {
    let cases: Vec<(Error, &str)> = vec![
        (Error::NotFound("x".into()), "not_found"),
        (Error::AccessDenied("x".into()), "access_denied"),
        (Error::InvalidInput("x".into()), "invalid_input"),
        (Error::WorkspaceCreateFailed("x".into()), "workspace_create_failed"),
        (Error::StagingMaterializeFailed("x".into()), "staging_materialize_failed"),
        (Error::GitFailed("x".into()), "git_failed"),
        (Error::CidxFailed("x".into()), "cidx_failed"),
        (Error::ExecutionFailed(1), "execution_failed"),
        (Error::Timeout(60), "timeout"),
        (Error::Cancelled, "cancelled"),
        (Error::Internal("x".into()), "internal"),
    ];
    for (error, expected) in cases {
        assert_eq!(error_kind(&error), expected);
        match Response::error(&error) {
            Response::Error { kind, message } => {
                assert_eq!(kind, expected);
                assert!(!message.is_empty());
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
