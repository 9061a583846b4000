use std::sync::Arc;

use tracing::{debug, warn};

use crate::bridge::message::{HostMessage, HostMethod, HostRequest, StreamRequest};
use crate::bridge::worker::{Job, RequestWorker};
use crate::bridge::{HostSender, HttpClient, Pairing, post};
use crate::error::StreamError;
use crate::render::renderer::Renderer;
use crate::session::controller::SessionController;

/// Routes host requests on the control context.
pub struct Bridge {
    host: HostSender,
    worker: RequestWorker,
}

impl Bridge {
    /// Must be called inside a tokio runtime.
    pub fn new(http: Arc<dyn HttpClient>, pairing: Arc<dyn Pairing>, host: HostSender) -> Self {
        let worker = RequestWorker::spawn(http, pairing, host.clone());
        Self { host, worker }
    }

    pub async fn dispatch(
        &mut self,
        request: HostRequest,
        controller: &mut SessionController,
        renderer: &mut Renderer,
    ) {
        let method = match request.method.parse::<HostMethod>() {
            Ok(method) => method,
            Err(_) => {
                warn!(method = %request.method, "unhandled host message");
                post(
                    &self.host,
                    HostMessage::status(format!(
                        "Unhandled message received: {}",
                        request.method
                    )),
                );
                return;
            }
        };
        debug!(%method, callback_id = request.callback_id, "host request");

        let callback_id = request.callback_id;
        let reply = match method {
            HostMethod::StartRequest => self.start(&request, controller, renderer).await,
            HostMethod::StopRequest => {
                controller.stop().await;
                Ok(Some(HostMessage::resolved(callback_id)))
            }
            HostMethod::OpenUrl => self.open_url(&request),
            HostMethod::Pair => self.pair(&request),
        };

        match reply {
            Ok(Some(message)) => post(&self.host, message),
            Ok(None) => {}
            Err(e) => {
                warn!(%method, "request failed: {e}");
                post(
                    &self.host,
                    HostMessage::Reject {
                        callback_id,
                        error: e.to_string(),
                    },
                );
            }
        }
    }

    async fn start(
        &self,
        request: &HostRequest,
        controller: &mut SessionController,
        renderer: &mut Renderer,
    ) -> Result<Option<HostMessage>, StreamError> {
        let stream = StreamRequest::try_from(request)?;
        controller.start(stream, renderer).await?;
        Ok(Some(HostMessage::resolved(request.callback_id)))
    }

    /// Echo the URL now; the worker resolves with the response body.
    fn open_url(&self, request: &HostRequest) -> Result<Option<HostMessage>, StreamError> {
        let url = request.param(0, "url")?.to_string();
        post(&self.host, HostMessage::status(url.clone()));
        self.worker.submit(Job::OpenUrl {
            callback_id: request.callback_id,
            url,
        })?;
        Ok(None)
    }

    fn pair(&self, request: &HostRequest) -> Result<Option<HostMessage>, StreamError> {
        self.worker.submit(Job::Pair {
            callback_id: request.callback_id,
            server_major_version: request.int_param(0, "serverMajorVersion")?,
            address: request.param(1, "address")?.to_string(),
            pin: request.param(2, "pin")?.to_string(),
        })?;
        Ok(None)
    }

    /// Drain the request worker.
    pub async fn shutdown(&mut self) {
        self.worker.shutdown().await;
    }
}
