// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::job::JobId;
use crate::id::short;

#[test]
fn generated_ids_carry_prefix() {
    let id = JobId::generate();
    assert!(id.as_str().starts_with("job-"));
    assert_eq!(id.suffix().len(), 12);
}

#[test]
fn generated_ids_are_unique() {
    let a = JobId::generate();
    let b = JobId::generate();
    assert_ne!(a, b);
}

#[test]
fn from_string_round_trips() {
    let id = JobId::from_string("job-abc123");
    assert_eq!(id.as_str(), "job-abc123");
    assert_eq!(id.suffix(), "abc123");
    assert_eq!(id, "job-abc123");
}

#[test]
fn serde_is_transparent() {
    let id = JobId::from_string("job-xyz");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"job-xyz\"");
    let parsed: JobId = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn short_truncates() {
    assert_eq!(short("abcdef", 3), "abc");
    assert_eq!(short("ab", 3), "ab");
}
