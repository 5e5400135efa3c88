// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn shell(script: &str) -> AssistantConfig {
    AssistantConfig::new(vec!["sh".to_string(), "-c".to_string(), script.to_string()])
}

#[tokio::test]
async fn summarize_returns_first_line() {
    let title = summarize(&shell("echo 'Fix the login bug'; echo second line"), "prompt").await;
    assert_eq!(title.as_deref(), Some("Fix the login bug"));
}

#[tokio::test]
async fn summarize_fails_on_nonzero_exit() {
    assert_eq!(summarize(&shell("exit 2"), "prompt").await, None);
}

#[tokio::test]
async fn summarize_fails_on_empty_output() {
    assert_eq!(summarize(&shell("true"), "prompt").await, None);
}

#[tokio::test]
async fn meta_prompt_is_passed_to_the_assistant() {
    // The appended argument is $0 for `sh -c`.
    let title = summarize(&shell("printf '%s' \"$0\" | head -c 20"), "user words").await.unwrap();
    assert!(title.starts_with("Reply with only"));
}

#[test]
fn clean_title_strips_quotes_and_truncates() {
    assert_eq!(clean_title("\"Quoted title\"\n").as_deref(), Some("Quoted title"));
    assert_eq!(clean_title("'single'\n").as_deref(), Some("single"));

    let long = "x".repeat(100);
    assert_eq!(clean_title(&long).unwrap().chars().count(), 60);
}

#[test]
fn clean_title_rejects_blank_output() {
    assert_eq!(clean_title(""), None);
    assert_eq!(clean_title("\n\n"), None);
    assert_eq!(clean_title("   \n"), None);
}
