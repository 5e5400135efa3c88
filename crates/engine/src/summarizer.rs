// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Title summarizer: a detached one-shot assistant call that derives a
//! short human label from the prompt at job-creation time. Never blocks
//! dispatch; any failure yields the default title.

use std::sync::Arc;

use bx_core::{Clock, JobId};
use tokio::process::Command;
use tracing::debug;

use crate::engine::Engine;
use crate::executor::AssistantConfig;
use crate::subprocess::{run_with_timeout, SUMMARY_TIMEOUT};

/// Title used when summarization fails or produces nothing usable.
pub const DEFAULT_TITLE: &str = "(untitled)";

/// Hard cap on the stored title length.
const TITLE_MAX_CHARS: usize = 60;

const META_PROMPT: &str = "Reply with only a short title (at most eight words, no quotes, \
no trailing punctuation) describing this request:\n\n";

/// Spawn the detached summarization task for a freshly created job.
pub(crate) fn spawn<C: Clock>(engine: Arc<Engine<C>>, id: JobId, prompt: String) {
    tokio::spawn(async move {
        let title = summarize(&engine.cfg.assistant, &prompt)
            .await
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());
        // The job may already be gone (deleted or reaped); that is fine.
        if engine.update_job(&id, |job| job.title = title.clone()).is_ok() {
            debug!(job_id = %id, title = %title, "job title set");
        }
    });
}

/// One-shot assistant invocation with the fixed meta-prompt. Runs as the
/// service user with a short deadline.
pub async fn summarize(assistant: &AssistantConfig, prompt: &str) -> Option<String> {
    let (program, args) = assistant.split().ok()?;
    let mut cmd = Command::new(program);
    cmd.args(args).arg(format!("{META_PROMPT}{prompt}"));

    let output = run_with_timeout(cmd, SUMMARY_TIMEOUT, "title summarization").await.ok()?;
    if !output.status.success() {
        return None;
    }
    clean_title(&String::from_utf8_lossy(&output.stdout))
}

/// First line, quotes stripped, truncated to the title cap.
fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().next()?.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if line.is_empty() {
        return None;
    }
    let title: String = line.chars().take(TITLE_MAX_CHARS).collect();
    Some(title)
}

#[cfg(test)]
#[path = "summarizer_tests.rs"]
mod tests;
