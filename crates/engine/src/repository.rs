// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Repository registry seam.
//!
//! Registration and Git-URL management belong to an external collaborator;
//! the engine only needs name-to-path resolution for the clone source.

use std::path::{Component, Path, PathBuf};

use bx_core::Error;

/// Resolve logical repository names to on-disk clone paths.
pub trait RepoRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> Result<PathBuf, Error>;
}

/// Directory-backed registry: each registered repository is a subdirectory
/// of the configured repositories root.
pub struct DirRegistry {
    root: PathBuf,
}

impl DirRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl RepoRegistry for DirRegistry {
    fn lookup(&self, name: &str) -> Result<PathBuf, Error> {
        if !is_safe_name(name) {
            return Err(Error::InvalidInput(format!("illegal repository name: {name:?}")));
        }
        let path = self.root.join(name);
        if !path.is_dir() {
            return Err(Error::NotFound(format!("repository {name}")));
        }
        Ok(path)
    }
}

/// A repository name must be a single plain path component.
fn is_safe_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none()
}

#[cfg(test)]
#[path = "repository_tests.rs"]
mod tests;
