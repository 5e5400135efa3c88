// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unix-socket control listener: one line-delimited JSON request per line,
//! one JSON response per line. Connections are handled concurrently; the
//! listener stops accepting on shutdown.

use std::sync::Arc;
use std::time::Instant;

use base64::Engine as _;
use bx_core::{Clock, Error, JobId};
use bx_engine::Engine;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{JobDto, Request, Response};

pub struct Listener<C: Clock> {
    engine: Arc<Engine<C>>,
    start_time: Instant,
}

impl<C: Clock> Listener<C> {
    pub fn new(engine: Arc<Engine<C>>) -> Self {
        Self { engine, start_time: Instant::now() }
    }

    /// Accept connections until the shutdown token fires.
    pub async fn run(self: Arc<Self>, listener: UnixListener, shutdown: CancellationToken) {
        info!("control listener accepting connections");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let handler = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = handler.serve_connection(stream).await {
                                debug!(error = %e, "connection closed with error");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                },
            }
        }
        info!("control listener stopped");
    }

    async fn serve_connection(&self, stream: UnixStream) -> std::io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<Request>(&line) {
                Ok(request) => self.handle(request).await,
                Err(e) => Response::error(&Error::InvalidInput(format!("bad request: {e}"))),
            };
            let mut payload = serde_json::to_string(&response).unwrap_or_else(|e| {
                format!(r#"{{"result":"error","kind":"internal","message":"{e}"}}"#)
            });
            payload.push('\n');
            writer.write_all(payload.as_bytes()).await?;
        }
        Ok(())
    }

    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::CreateJob { user, prompt, repository, options } => {
                let options = options.unwrap_or_default();
                self.job_response(self.engine.create_job(&user, &prompt, &repository, options))
            }
            Request::Upload { user, job_id, name, data, image } => {
                let bytes = match base64::engine::general_purpose::STANDARD.decode(&data) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        return Response::error(&Error::InvalidInput(format!(
                            "upload data is not valid base64: {e}"
                        )))
                    }
                };
                match self.engine.upload(&JobId::from_string(job_id), &user, &name, &bytes, image)
                {
                    Ok(stored) => Response::Stored { name: stored },
                    Err(e) => Response::error(&e),
                }
            }
            Request::StartJob { user, job_id } => {
                self.job_response(self.engine.start_job(&JobId::from_string(job_id), &user))
            }
            Request::GetJob { user, job_id } => {
                self.job_response(self.engine.get_job(&JobId::from_string(job_id), &user))
            }
            Request::ListUserJobs { user } => {
                let jobs = self.engine.list_user_jobs(&user);
                Response::Jobs { jobs: jobs.into_iter().map(JobDto::from).collect() }
            }
            Request::DeleteJob { user, job_id } => {
                match self.engine.delete_job(&JobId::from_string(job_id), &user).await {
                    Ok(()) => Response::Deleted,
                    Err(e) => Response::error(&e),
                }
            }
            Request::Status => {
                let stats = self.engine.stats();
                Response::Status {
                    uptime_seconds: self.start_time.elapsed().as_secs(),
                    total: stats.total,
                    queued: stats.queued,
                    running: stats.running,
                }
            }
        }
    }

    fn job_response(&self, result: Result<bx_core::Job, Error>) -> Response {
        match result {
            Ok(job) => Response::Job { job: JobDto::from(job) },
            Err(e) => Response::error(&e),
        }
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
