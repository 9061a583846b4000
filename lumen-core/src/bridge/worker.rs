//! Serial background worker for slow host requests.
//!
//! Jobs run one at a time, in submission order, and reply to the host
//! directly when they finish.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bridge::{HostMessage, HostSender, HttpClient, Pairing, post};
use crate::error::StreamError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    OpenUrl {
        callback_id: i32,
        url: String,
    },
    Pair {
        callback_id: i32,
        server_major_version: i32,
        address: String,
        pin: String,
    },
}

pub struct RequestWorker {
    jobs: Option<mpsc::UnboundedSender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl RequestWorker {
    /// Spawn the worker on the current runtime.
    pub fn spawn(http: Arc<dyn HttpClient>, pairing: Arc<dyn Pairing>, host: HostSender) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(rx, http, pairing, host));
        Self {
            jobs: Some(jobs),
            handle: Some(handle),
        }
    }

    pub fn submit(&self, job: Job) -> Result<(), StreamError> {
        let jobs = self.jobs.as_ref().ok_or(StreamError::ChannelClosed)?;
        jobs.send(job)?;
        Ok(())
    }

    /// Let queued jobs finish, then wait for the worker to exit.
    pub async fn shutdown(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("request worker failed: {e}");
            }
        }
    }
}

async fn run(
    mut jobs: mpsc::UnboundedReceiver<Job>,
    http: Arc<dyn HttpClient>,
    pairing: Arc<dyn Pairing>,
    host: HostSender,
) {
    while let Some(job) = jobs.recv().await {
        let reply = match job {
            Job::OpenUrl { callback_id, url } => match http.get(&url).await {
                Ok(body) => HostMessage::Resolve {
                    callback_id,
                    ret: Value::String(body),
                },
                Err(e) => {
                    warn!(%url, "request failed: {e}");
                    HostMessage::Reject {
                        callback_id,
                        error: e.to_string(),
                    }
                }
            },
            Job::Pair {
                callback_id,
                server_major_version,
                address,
                pin,
            } => {
                let code = pairing.pair(server_major_version, &address, &pin).await;
                debug!(%address, code, "pairing finished");
                HostMessage::Resolve {
                    callback_id,
                    ret: Value::from(code),
                }
            }
        };
        post(&host, reply);
    }
}
