//! The control context.
//!
//! Every host message, listener callback and asynchronous completion is
//! funnelled into one [`ControlEvent`] channel and handled, one at a
//! time, by [`ControlLoop`]. The loop is the only owner of the surface,
//! the display queue and the session controller, so none of them need
//! locks.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::bridge::{Bridge, HostRequest, HostSender, HttpClient, Pairing};
use crate::error::StreamError;
use crate::render::display::DisplayQueue;
use crate::render::renderer::Renderer;
use crate::render::surface::RenderSurface;
use crate::session::controller::{SessionController, SessionOptions};
use crate::session::input::InputSource;
use crate::session::transport::Transport;
use crate::video::decoder::{PictureResult, VideoDecoder};

pub type ControlSender = mpsc::UnboundedSender<ControlEvent>;
pub type ControlReceiver = mpsc::UnboundedReceiver<ControlEvent>;

// ── Events ───────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ControlEvent {
    /// A message from the embedding host.
    Host(HostRequest),
    /// The stream view gained or lost input focus.
    FocusChanged(bool),
    /// A transport notification, tagged with the session that raised it.
    Session { generation: u64, event: SessionEvent },
    Display(DisplayEvent),
    /// Stop any session and exit the loop.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// `start_connection` returned.
    ConnectFinished { error: i32 },
    Started,
    Terminated { error: i32 },
    Message(String),
}

#[derive(Debug)]
pub enum DisplayEvent {
    /// Decoder setup ran; pictures may start arriving.
    DecoderReady,
    PictureReady(PictureResult),
    SwapComplete,
    /// Decoder cleanup ran; release every held picture.
    DecoderCleanup,
}

// ── Callback ─────────────────────────────────────────────────────

/// A one-shot completion that re-enters the control context.
///
/// Collaborators may complete it from any thread; the value is posted to
/// the control loop rather than handled in place.
pub struct Callback<T> {
    events: ControlSender,
    wrap: fn(T) -> ControlEvent,
}

impl<T> Callback<T> {
    pub fn new(events: ControlSender, wrap: fn(T) -> ControlEvent) -> Self {
        Self { events, wrap }
    }

    pub fn complete(self, value: T) {
        if self.events.send((self.wrap)(value)).is_err() {
            debug!("control loop gone, completion dropped");
        }
    }
}

impl<T> std::fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callback").finish_non_exhaustive()
    }
}

pub type PictureCallback = Callback<PictureResult>;
pub type SwapCallback = Callback<()>;

impl Callback<PictureResult> {
    pub fn picture_ready(events: ControlSender) -> Self {
        Self::new(events, |result| {
            ControlEvent::Display(DisplayEvent::PictureReady(result))
        })
    }
}

impl Callback<()> {
    pub fn swap_complete(events: ControlSender) -> Self {
        Self::new(events, |()| ControlEvent::Display(DisplayEvent::SwapComplete))
    }
}

// ── ControlLoop ──────────────────────────────────────────────────

/// Platform collaborators the pipeline is wired to.
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub decoder: Arc<dyn VideoDecoder>,
    pub surface: Box<dyn RenderSurface>,
    pub input: Arc<dyn InputSource>,
    pub http: Arc<dyn HttpClient>,
    pub pairing: Arc<dyn Pairing>,
}

pub struct ControlLoop {
    events: ControlReceiver,
    sender: ControlSender,
    controller: SessionController,
    display: DisplayQueue,
    bridge: Bridge,
}

impl ControlLoop {
    /// Wire the pipeline. Must be called inside a tokio runtime, since
    /// the bridge spawns its request worker here.
    pub fn new(collaborators: Collaborators, options: SessionOptions, host: HostSender) -> Self {
        let (sender, events) = mpsc::unbounded_channel();
        let Collaborators {
            transport,
            decoder,
            surface,
            input,
            http,
            pairing,
        } = collaborators;

        let display = DisplayQueue::new(Renderer::new(surface), decoder.clone(), sender.clone());
        let controller = SessionController::new(
            transport,
            decoder,
            input,
            sender.clone(),
            host.clone(),
            options,
        );
        let bridge = Bridge::new(http, pairing, host);

        Self {
            events,
            sender,
            controller,
            display,
            bridge,
        }
    }

    /// Handle for posting events into the loop.
    pub fn sender(&self) -> ControlSender {
        self.sender.clone()
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn display(&self) -> &DisplayQueue {
        &self.display
    }

    /// Process events until [`ControlEvent::Shutdown`].
    pub async fn run(mut self) -> Result<(), StreamError> {
        while let Some(event) = self.events.recv().await {
            if !self.handle(event).await {
                break;
            }
        }
        self.bridge.shutdown().await;
        info!("control loop stopped");
        Ok(())
    }

    /// Handle one event. Returns `false` once the loop should exit.
    pub async fn handle(&mut self, event: ControlEvent) -> bool {
        match event {
            ControlEvent::Host(request) => {
                self.bridge
                    .dispatch(request, &mut self.controller, self.display.renderer_mut())
                    .await;
            }
            ControlEvent::FocusChanged(focused) => self.controller.focus_changed(focused),
            ControlEvent::Session { generation, event } => {
                self.controller.on_session_event(generation, event).await;
            }
            ControlEvent::Display(event) => {
                if let Err(e) = self.on_display(event) {
                    error!("rendering failed, stopping session: {e}");
                    self.controller.stop().await;
                }
            }
            ControlEvent::Shutdown => {
                self.controller.stop().await;
                self.controller.join_teardown().await;
                return false;
            }
        }
        true
    }

    fn on_display(&mut self, event: DisplayEvent) -> Result<(), StreamError> {
        match event {
            DisplayEvent::DecoderReady => {
                self.display.start();
                Ok(())
            }
            DisplayEvent::PictureReady(result) => self.display.picture_ready(result),
            DisplayEvent::SwapComplete => self.display.swap_complete(),
            DisplayEvent::DecoderCleanup => {
                self.display.teardown();
                Ok(())
            }
        }
    }
}
