//! Host message bridge.
//!
//! The embedding host talks to the pipeline with JSON request objects
//! and receives tagged replies. Requests are dispatched on the control
//! context; slow HTTP-backed requests run on a serial background worker.

pub mod dispatch;
pub mod message;
pub mod worker;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StreamError;

pub use dispatch::Bridge;
pub use message::{HostMessage, HostMethod, HostRequest, StreamRequest};
pub use worker::{Job, RequestWorker};

pub type HostSender = mpsc::UnboundedSender<HostMessage>;
pub type HostReceiver = mpsc::UnboundedReceiver<HostMessage>;

/// Post `message` to the host, logging if it has gone away.
pub fn post(host: &HostSender, message: HostMessage) {
    if host.send(message).is_err() {
        tracing::debug!("host channel closed, reply dropped");
    }
}

/// Plain HTTP GET used by `openUrl`.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<String, StreamError>;
}

/// Pairing handshake collaborator. Returns the pairing library's result
/// code; zero means paired.
#[async_trait]
pub trait Pairing: Send + Sync {
    async fn pair(&self, server_major_version: i32, address: &str, pin: &str) -> i32;
}
