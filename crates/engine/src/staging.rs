// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upload staging area.
//!
//! Accepts file uploads before the job's workspace exists and later
//! materializes them into `{workspace}/files/` under their original names.
//! Stored names carry a short content-derived suffix so successive uploads
//! with the same original name never collide.

use std::fs;
use std::path::{Component, Path, PathBuf};

use bx_core::{Error, JobId, FILES_DIR};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Subdirectory of the job directory that holds staged uploads.
pub const STAGING_DIR: &str = "staging";

/// Hex characters of the content hash appended to stored basenames.
const SUFFIX_LEN: usize = 8;

/// Staging area rooted at the jobs directory.
#[derive(Debug, Clone)]
pub struct StagingArea {
    jobs_root: PathBuf,
}

impl StagingArea {
    pub fn new(jobs_root: impl Into<PathBuf>) -> Self {
        Self { jobs_root: jobs_root.into() }
    }

    /// Staging directory for a job (`{jobs_root}/{job_id}/staging`).
    pub fn staging_path(&self, id: &JobId) -> PathBuf {
        self.jobs_root.join(id.as_str()).join(STAGING_DIR)
    }

    /// Store uploaded bytes under a collision-free name derived from the
    /// original filename and the content hash. Returns the stored name,
    /// relative to the staging directory.
    pub fn accept(&self, id: &JobId, original_name: &str, bytes: &[u8]) -> Result<String, Error> {
        let rel = sanitize_rel_path(original_name)?;
        let stored = stored_name(&rel, bytes);
        let path = self.staging_path(id).join(&stored);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        debug!(job_id = %id, original = original_name, stored = %stored.display(), "upload staged");
        Ok(stored.to_string_lossy().into_owned())
    }

    /// Stored names currently staged for a job, relative to the staging
    /// directory, in sorted order. Empty when nothing was ever staged.
    pub fn list(&self, id: &JobId) -> Result<Vec<String>, Error> {
        let root = self.staging_path(id);
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        collect_files(&root, &root, &mut out)?;
        out.sort();
        Ok(out)
    }

    /// Copy every staged file into `{workspace}/files/` under its original
    /// name (content-hash suffix stripped), creating parent directories as
    /// needed. Returns the number of files copied.
    ///
    /// On failure the staging directory is left in place for diagnostics.
    pub fn materialize(&self, id: &JobId, workspace: &Path) -> Result<usize, Error> {
        let files_root = workspace.join(FILES_DIR);
        let mut count = 0;
        for stored in self.list(id)? {
            let stored_path = self.staging_path(id).join(&stored);
            let original = original_rel_path(Path::new(&stored));
            let dest = files_root.join(original);
            (|| -> std::io::Result<()> {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&stored_path, &dest)?;
                Ok(())
            })()
            .map_err(|e| {
                Error::StagingMaterializeFailed(format!(
                    "{} -> {}: {e}",
                    stored_path.display(),
                    dest.display()
                ))
            })?;
            count += 1;
        }
        Ok(count)
    }

    /// Remove the staging directory. Best-effort and idempotent.
    pub fn cleanup(&self, id: &JobId) {
        let root = self.staging_path(id);
        if root.is_dir() {
            if let Err(e) = fs::remove_dir_all(&root) {
                warn!(job_id = %id, error = %e, "failed to remove staging directory");
            }
        }
    }
}

/// Reject absolute paths and parent-directory escapes in upload names.
fn sanitize_rel_path(name: &str) -> Result<PathBuf, Error> {
    let path = Path::new(name);
    if name.is_empty()
        || path.components().any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(Error::InvalidInput(format!("illegal upload path: {name:?}")));
    }
    Ok(path.to_path_buf())
}

/// `report.txt` + content → `report-1a2b3c4d.txt` (subpath preserved).
fn stored_name(rel: &Path, bytes: &[u8]) -> PathBuf {
    let digest = Sha256::digest(bytes);
    let tag: String = digest.iter().take(SUFFIX_LEN / 2).map(|b| format!("{b:02x}")).collect();

    let stem = rel.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let ext = rel.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
    rel.with_file_name(format!("{stem}-{tag}{ext}"))
}

/// Strip the trailing `-xxxxxxxx` content tag from a stored basename.
fn original_rel_path(stored: &Path) -> PathBuf {
    let stem = stored.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let ext = stored.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();

    let original_stem = match stem.rfind('-') {
        Some(at)
            if stem.len() - at == SUFFIX_LEN + 1
                && stem[at + 1..].chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            &stem[..at]
        }
        _ => &stem,
    };
    stored.with_file_name(format!("{original_stem}{ext}"))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), Error> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().into_owned());
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "staging_tests.rs"]
mod tests;
