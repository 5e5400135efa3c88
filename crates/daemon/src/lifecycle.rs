// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: lock acquisition, engine wiring, startup recovery,
//! socket binding, and shutdown.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use bx_core::SystemClock;
use bx_engine::{
    AssistantConfig, CliCidx, DirRegistry, Engine, EngineConfig, EngineDeps, StagingArea,
    SudoImpersonator, WorkspaceStore,
};
use bx_storage::JobStore;
use fs2::FileExt;
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::info;

use crate::config::{state_dir, Config, ConfigError};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("another bxd instance holds the lock: {0}")]
    LockFailed(std::io::Error),
    #[error("failed to bind {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),
    #[error("engine error: {0}")]
    Engine(#[from] bx_core::Error),
}

/// Filesystem locations derived from the state directory.
#[derive(Debug, Clone)]
pub struct Paths {
    pub state_dir: PathBuf,
    pub socket_path: PathBuf,
    pub lock_path: PathBuf,
    pub log_path: PathBuf,
}

impl Paths {
    pub fn resolve() -> Result<Self, LifecycleError> {
        let state_dir = state_dir()?;
        Ok(Self {
            socket_path: state_dir.join("bxd.sock"),
            lock_path: state_dir.join("bxd.pid"),
            log_path: state_dir.join("daemon.log"),
            state_dir,
        })
    }
}

/// Everything `main` needs after a successful startup.
pub struct Startup {
    pub engine: Arc<Engine<SystemClock>>,
    pub listener: UnixListener,
    pub paths: Paths,
    // NOTE(lifetime): held to maintain the exclusive lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
}

/// Start the daemon: lock first (prevents races), then recover state from
/// disk, then bind the socket last so clients only see a ready daemon.
pub async fn startup(config: &Config) -> Result<Startup, LifecycleError> {
    let paths = Paths::resolve()?;
    std::fs::create_dir_all(&paths.state_dir)?;

    // Acquire the lock without truncating: the file may hold the PID of a
    // running daemon we must not clobber.
    let mut lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&paths.lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    std::fs::create_dir_all(&config.workspace.jobs_path)?;
    std::fs::create_dir_all(&config.workspace.repositories_path)?;

    let engine = build_engine(config)?;
    let report = engine.recover()?;
    info!(
        loaded = report.loaded,
        requeued = report.requeued,
        orphaned = report.orphaned,
        "state recovered"
    );

    if paths.socket_path.exists() {
        std::fs::remove_file(&paths.socket_path)?;
    }
    let listener = UnixListener::bind(&paths.socket_path)
        .map_err(|e| LifecycleError::BindFailed(paths.socket_path.clone(), e))?;

    info!(socket = %paths.socket_path.display(), "daemon started");
    Ok(Startup { engine, listener, paths, lock_file })
}

fn build_engine(config: &Config) -> Result<Arc<Engine<SystemClock>>, LifecycleError> {
    let jobs_root = &config.workspace.jobs_path;
    let registry = Arc::new(DirRegistry::new(&config.workspace.repositories_path));

    let engine = Engine::new(
        EngineConfig {
            max_concurrent: config.jobs.max_concurrent,
            wall_clock_timeout: std::time::Duration::from_secs(config.jobs.timeout_hours * 3600),
            retention: std::time::Duration::from_secs(config.jobs.retention_days * 86_400),
            shutdown_grace: std::time::Duration::from_secs(config.jobs.shutdown_grace_seconds),
            assistant: AssistantConfig::new(config.claude.command.clone()),
            cidx_available_template: config.system_prompts.cidx_available_template_path.clone(),
            cidx_unavailable_template: config
                .system_prompts
                .cidx_unavailable_template_path
                .clone(),
        },
        EngineDeps {
            store: JobStore::open(jobs_root).map_err(|e| bx_core::Error::internal(e))?,
            workspaces: WorkspaceStore::new(jobs_root, registry),
            staging: StagingArea::new(jobs_root),
            cidx: Arc::new(CliCidx::new(config.cidx.command.clone())),
            impersonator: Arc::new(SudoImpersonator),
        },
        SystemClock,
    )?;
    Ok(Arc::new(engine))
}

/// Remove the socket and lock files on clean exit.
pub fn cleanup(paths: &Paths) {
    let _ = std::fs::remove_file(&paths.socket_path);
    let _ = std::fs::remove_file(&paths.lock_path);
}
