// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prompt placeholder rewriting.
//!
//! `{{name}}` tokens that match an uploaded filename are rewritten to the
//! workspace-relative path `./files/name`. The reserved token `{{filename}}`
//! expands to the space-joined list of all materialized paths. Tokens that
//! match no file are left literal, so resolution is a pure function of
//! (prompt, uploaded_files) and repeated application is a no-op once no
//! matching tokens remain.

/// Subdirectory of the workspace where staged uploads are materialized.
pub const FILES_DIR: &str = "files";

/// Reserved token that expands to every materialized file path.
const ALL_FILES_TOKEN: &str = "filename";

fn file_path(name: &str) -> String {
    format!("./{FILES_DIR}/{name}")
}

/// Rewrite `{{name}}` tokens in `prompt` against the materialized file list.
pub fn resolve_placeholders(prompt: &str, uploaded_files: &[String]) -> String {
    let mut out = String::with_capacity(prompt.len());
    let mut rest = prompt;

    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // Unterminated token; emit the remainder literally.
            break;
        };
        let token = after[..end].trim();
        out.push_str(&rest[..start]);

        if uploaded_files.iter().any(|f| f == token) {
            out.push_str(&file_path(token));
        } else if token == ALL_FILES_TOKEN && !uploaded_files.is_empty() {
            let joined: Vec<String> = uploaded_files.iter().map(|f| file_path(f)).collect();
            out.push_str(&joined.join(" "));
        } else {
            // Unknown token stays literal.
            out.push_str(&rest[start..start + 2 + end + 2]);
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
#[path = "placeholder_tests.rs"]
mod tests;
