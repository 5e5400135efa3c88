// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-job workspace provisioning via copy-on-write clones.
//!
//! Three filesystem strategies are attempted in order — reflink copy,
//! btrfs snapshot, hardlink-dense rsync — and the first one that succeeds
//! on the hosting filesystem is cached for the life of the process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bx_core::{Error, JobId, FILES_DIR};
use parking_lot::Mutex;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::repository::RepoRegistry;
use crate::staging::STAGING_DIR;
use crate::subprocess::{run_with_timeout, stderr_trimmed, CLONE_TIMEOUT};

/// Copy-on-write strategies, in probe order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneMethod {
    Reflink,
    BtrfsSnapshot,
    HardlinkRsync,
}

impl CloneMethod {
    pub const ALL: [CloneMethod; 3] =
        [CloneMethod::Reflink, CloneMethod::BtrfsSnapshot, CloneMethod::HardlinkRsync];
}

bx_core::simple_display! {
    CloneMethod {
        Reflink => "reflink",
        BtrfsSnapshot => "btrfs_snapshot",
        HardlinkRsync => "hardlink_rsync",
    }
}

/// Filesystem backend for the clone strategies.
///
/// Factored out of [`WorkspaceStore`] so tests can exercise the fallback
/// chain without depending on the host filesystem.
#[async_trait]
pub trait CowCloner: Send + Sync {
    /// Clone `src` to the nonexistent path `dst` using `method`.
    async fn clone_with(&self, method: CloneMethod, src: &Path, dst: &Path)
        -> Result<(), String>;

    /// Delete a btrfs subvolume at `path`. Errors are advisory; the store
    /// falls back to a recursive delete.
    async fn snapshot_delete(&self, path: &Path) -> Result<(), String>;
}

/// Production backend shelling out to `cp`, `btrfs`, and `rsync`.
pub struct CommandCloner;

#[async_trait]
impl CowCloner for CommandCloner {
    async fn clone_with(
        &self,
        method: CloneMethod,
        src: &Path,
        dst: &Path,
    ) -> Result<(), String> {
        let mut cmd = match method {
            CloneMethod::Reflink => {
                let mut c = Command::new("cp");
                c.arg("-a").arg("--reflink=always").arg(src).arg(dst);
                c
            }
            CloneMethod::BtrfsSnapshot => {
                let mut c = Command::new("btrfs");
                c.arg("subvolume").arg("snapshot").arg(src).arg(dst);
                c
            }
            CloneMethod::HardlinkRsync => {
                let mut c = Command::new("rsync");
                c.arg("-a")
                    .arg(format!("--link-dest={}", src.display()))
                    .arg(format!("{}/", src.display()))
                    .arg(format!("{}/", dst.display()));
                c
            }
        };
        cmd.env_remove("GIT_DIR").env_remove("GIT_WORK_TREE");
        let output = run_with_timeout(cmd, CLONE_TIMEOUT, "cow clone")
            .await
            .map_err(|e| e.to_string())?;
        if !output.status.success() {
            return Err(format!("{method} clone failed: {}", stderr_trimmed(&output)));
        }
        Ok(())
    }

    async fn snapshot_delete(&self, path: &Path) -> Result<(), String> {
        let mut cmd = Command::new("btrfs");
        cmd.arg("subvolume").arg("delete").arg(path);
        let output = run_with_timeout(cmd, CLONE_TIMEOUT, "btrfs subvolume delete")
            .await
            .map_err(|e| e.to_string())?;
        if !output.status.success() {
            return Err(stderr_trimmed(&output));
        }
        Ok(())
    }
}

/// Creates and destroys per-job workspace directories.
pub struct WorkspaceStore {
    jobs_root: PathBuf,
    registry: Arc<dyn RepoRegistry>,
    cloner: Arc<dyn CowCloner>,
    /// Strategy cached after its first success, to avoid repeated probes.
    method: Mutex<Option<CloneMethod>>,
}

impl WorkspaceStore {
    pub fn new(jobs_root: impl Into<PathBuf>, registry: Arc<dyn RepoRegistry>) -> Self {
        Self::with_cloner(jobs_root, registry, Arc::new(CommandCloner))
    }

    pub fn with_cloner(
        jobs_root: impl Into<PathBuf>,
        registry: Arc<dyn RepoRegistry>,
        cloner: Arc<dyn CowCloner>,
    ) -> Self {
        Self { jobs_root: jobs_root.into(), registry, cloner, method: Mutex::new(None) }
    }

    /// Workspace directory assigned to a job.
    pub fn workspace_path(&self, id: &JobId) -> PathBuf {
        self.jobs_root.join(id.as_str())
    }

    /// The cached clone method, if one has succeeded yet.
    pub fn cached_method(&self) -> Option<CloneMethod> {
        *self.method.lock()
    }

    /// Check that a repository name resolves without cloning anything.
    pub fn verify_repository(&self, name: &str) -> Result<(), Error> {
        self.registry.lookup(name).map(|_| ())
    }

    /// Create the job's workspace as a copy-on-write clone of the named
    /// repository, with an empty `files/` subdirectory.
    ///
    /// A pre-existing target (holding the job's staging directory) is moved
    /// aside so every strategy sees a clean destination; `staging/` is
    /// restored into the fresh clone afterwards.
    pub async fn clone_for_job(&self, repo_name: &str, id: &JobId) -> Result<PathBuf, Error> {
        let src = self.registry.lookup(repo_name)?;
        let target = self.workspace_path(id);
        tokio::fs::create_dir_all(&self.jobs_root).await?;

        let aside = self.jobs_root.join(format!("{id}.pre"));
        let had_prior = tokio::fs::try_exists(&target).await.unwrap_or(false);
        if had_prior {
            if tokio::fs::try_exists(&aside).await.unwrap_or(false) {
                tokio::fs::remove_dir_all(&aside).await?;
            }
            tokio::fs::rename(&target, &aside).await?;
        }

        let result = self.clone_with_fallback(&src, &target).await;
        let method = match result {
            Ok(method) => method,
            Err(e) => {
                // Put the staging directory back where accept() expects it.
                if had_prior {
                    let _ = tokio::fs::rename(&aside, &target).await;
                }
                return Err(Error::WorkspaceCreateFailed(e));
            }
        };

        if had_prior {
            let staged = aside.join(STAGING_DIR);
            if tokio::fs::try_exists(&staged).await.unwrap_or(false) {
                tokio::fs::rename(&staged, target.join(STAGING_DIR)).await?;
            }
            let _ = tokio::fs::remove_dir_all(&aside).await;
        }

        tokio::fs::create_dir_all(target.join(FILES_DIR)).await?;
        info!(job_id = %id, repo = repo_name, %method, path = %target.display(), "workspace cloned");
        Ok(target)
    }

    async fn clone_with_fallback(&self, src: &Path, dst: &Path) -> Result<CloneMethod, String> {
        let methods: Vec<CloneMethod> = match self.cached_method() {
            Some(m) => vec![m],
            None => CloneMethod::ALL.to_vec(),
        };

        let mut failures = Vec::new();
        for method in methods {
            match self.cloner.clone_with(method, src, dst).await {
                Ok(()) => {
                    *self.method.lock() = Some(method);
                    return Ok(method);
                }
                Err(e) => {
                    debug!(%method, error = %e, "clone strategy failed");
                    failures.push(format!("{method}: {e}"));
                    // A half-written target would poison the next strategy.
                    let _ = tokio::fs::remove_dir_all(dst).await;
                }
            }
        }
        Err(failures.join("; "))
    }

    /// Remove a workspace directory with the teardown symmetric to the
    /// detected CoW form. Idempotent on nonexistent paths.
    pub async fn remove(&self, path: &Path) -> Result<(), Error> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(());
        }
        if self.cached_method() == Some(CloneMethod::BtrfsSnapshot) {
            if let Err(e) = self.cloner.snapshot_delete(path).await {
                warn!(path = %path.display(), error = %e, "snapshot delete failed, falling back");
            }
        }
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a workspace directory currently exists on disk.
    pub fn exists(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

/// Test backend: reflink and btrfs refuse, hardlink rsync degrades to a
/// plain recursive copy. Records every attempt for assertions.
#[cfg(any(test, feature = "test-support"))]
pub struct StubCloner {
    pub attempts: Mutex<Vec<CloneMethod>>,
}

#[cfg(any(test, feature = "test-support"))]
impl StubCloner {
    pub fn new() -> Self {
        Self { attempts: Mutex::new(Vec::new()) }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Default for StubCloner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl CowCloner for StubCloner {
    async fn clone_with(
        &self,
        method: CloneMethod,
        src: &Path,
        dst: &Path,
    ) -> Result<(), String> {
        self.attempts.lock().push(method);
        match method {
            CloneMethod::Reflink => Err("reflink not supported on this filesystem".to_string()),
            CloneMethod::BtrfsSnapshot => Err("not a btrfs subvolume".to_string()),
            CloneMethod::HardlinkRsync => {
                copy_tree(src, dst).map_err(|e| e.to_string())
            }
        }
    }

    async fn snapshot_delete(&self, _path: &Path) -> Result<(), String> {
        Err("not a btrfs subvolume".to_string())
    }
}

#[cfg(any(test, feature = "test-support"))]
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &to)?;
        } else {
            std::fs::copy(entry.path(), &to)?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
