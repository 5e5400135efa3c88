// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! bx daemon (bxd)
//!
//! Background process that owns the job lifecycle engine and serves the
//! control socket. Typically started by the deployment scripts; not meant
//! to be invoked interactively.

use std::sync::Arc;

use bx_daemon::config::Config;
use bx_daemon::lifecycle::{self, Paths};
use bx_daemon::listener::Listener;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("bxd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                println!("bxd {}", env!("CARGO_PKG_VERSION"));
                println!("bx daemon - batch-execution server for assistant jobs");
                println!();
                println!("USAGE:");
                println!("    bxd");
                println!();
                println!("Configuration is read from BX_CONFIG or ~/.config/bx/config.toml.");
                println!("The daemon listens on a Unix socket under the state directory.");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: bxd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load()?;
    let paths = Paths::resolve()?;
    let _log_guard = setup_logging(&paths)?;

    info!("starting bxd");
    let startup = match lifecycle::startup(&config).await {
        Ok(startup) => startup,
        Err(bx_daemon::LifecycleError::LockFailed(_)) => {
            let pid = std::fs::read_to_string(&paths.lock_path).unwrap_or_default();
            eprintln!("bxd is already running (pid {})", pid.trim());
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "startup failed");
            return Err(e.into());
        }
    };

    // Dispatcher task owns scheduling and the reaper ticks.
    let dispatcher = tokio::spawn(Arc::clone(&startup.engine).run());

    // Listener task; stops accepting when the shutdown token fires.
    let listener_shutdown = CancellationToken::new();
    let listener = Arc::new(Listener::new(Arc::clone(&startup.engine)));
    let listener_task =
        tokio::spawn(listener.run(startup.listener, listener_shutdown.clone()));

    wait_for_signal().await;
    info!("termination signal received");

    listener_shutdown.cancel();
    startup.engine.shutdown().await;
    let _ = dispatcher.await;
    let _ = listener_task.await;

    lifecycle::cleanup(&startup.paths);
    info!("bxd exited cleanly");
    Ok(())
}

async fn wait_for_signal() {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "cannot install SIGTERM handler");
            return;
        }
    };
    tokio::select! {
        _ = term.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

fn setup_logging(
    paths: &Paths,
) -> Result<tracing_appender::non_blocking::WorkerGuard, std::io::Error> {
    std::fs::create_dir_all(&paths.state_dir)?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.log_path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("BX_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}
