//! Session lifecycle controller.
//!
//! Owns the session phase and the two per-session workers: the
//! connection worker, which blocks in `start_connection` on the blocking
//! pool, and the input-poll worker it spawns once the stream is up.
//! Every method runs on the control context.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::{HostMessage, HostSender, StreamRequest, post};
use crate::control::{ControlEvent, ControlSender, SessionEvent};
use crate::error::StreamError;
use crate::render::renderer::Renderer;
use crate::session::input::{INPUT_POLL_INTERVAL, InputSource, poll_input};
use crate::session::phase::SessionPhase;
use crate::session::transport::{
    AudioConfiguration, ConnectionCallbacks, ConnectionListener, DEFAULT_PACKET_SIZE,
    StreamConfig, Transport,
};
use crate::video::buffer::INITIAL_DECODE_BUFFER_LEN;
use crate::video::decoder::VideoDecoder;
use crate::video::gate::SubmissionGate;

/// Tunables applied to every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub initial_decode_buffer: usize,
    pub input_poll_interval: Duration,
    pub packet_size: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            initial_decode_buffer: INITIAL_DECODE_BUFFER_LEN,
            input_poll_interval: INPUT_POLL_INTERVAL,
            packet_size: DEFAULT_PACKET_SIZE,
        }
    }
}

/// The connection worker's result: the input poller, if one started.
type ConnectionWorker = JoinHandle<Option<JoinHandle<()>>>;

pub struct SessionController {
    transport: Arc<dyn Transport>,
    decoder: Arc<dyn VideoDecoder>,
    input: Arc<dyn InputSource>,
    events: ControlSender,
    host: HostSender,
    options: SessionOptions,

    phase: SessionPhase,
    generation: u64,
    active: Option<StreamRequest>,
    running: Arc<AtomicBool>,
    request_idr: Arc<AtomicBool>,
    connection: Option<ConnectionWorker>,
    teardown: Option<oneshot::Receiver<()>>,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn Transport>,
        decoder: Arc<dyn VideoDecoder>,
        input: Arc<dyn InputSource>,
        events: ControlSender,
        host: HostSender,
        options: SessionOptions,
    ) -> Self {
        Self {
            transport,
            decoder,
            input,
            events,
            host,
            options,
            phase: SessionPhase::Idle,
            generation: 0,
            active: None,
            running: Arc::new(AtomicBool::new(false)),
            request_idr: Arc::new(AtomicBool::new(false)),
            connection: None,
            teardown: None,
        }
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn active(&self) -> Option<&StreamRequest> {
        self.active.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn keyframe_requested(&self) -> bool {
        self.request_idr.load(Ordering::SeqCst)
    }

    // ── Start ────────────────────────────────────────────────────

    /// Initialize the surface and spawn the connection worker. Returns
    /// once the worker is running; the outcome arrives later as a
    /// [`SessionEvent::ConnectFinished`].
    pub async fn start(
        &mut self,
        request: StreamRequest,
        renderer: &mut Renderer,
    ) -> Result<(), StreamError> {
        if !self.phase.is_idle() {
            return Err(StreamError::InvalidTransition(
                "cannot start: a session is already active",
            ));
        }
        self.join_teardown().await;

        for line in [
            format!("Setting stream width to: {}", request.width),
            format!("Setting stream height to: {}", request.height),
            format!("Setting stream fps to: {}", request.fps),
            format!("Setting stream host to: {}", request.host),
            format!("Setting stream bitrate to: {}", request.bitrate_kbps),
            format!(
                "Setting server major version to: {}",
                request.server_major_version
            ),
        ] {
            post(&self.host, HostMessage::status(line));
        }

        renderer.initialize(request.width, request.height)?;
        self.phase.begin_connect()?;
        self.generation += 1;
        self.running.store(false, Ordering::SeqCst);
        self.request_idr.store(false, Ordering::SeqCst);
        info!(
            host = %request.host,
            width = request.width,
            height = request.height,
            fps = request.fps,
            generation = self.generation,
            "starting session"
        );

        let config = StreamConfig {
            width: request.width,
            height: request.height,
            fps: request.fps,
            bitrate_kbps: request.bitrate_kbps,
            packet_size: self.options.packet_size,
            streaming_remotely: false,
            audio: AudioConfiguration::Stereo,
        };
        let callbacks = ConnectionCallbacks {
            listener: Arc::new(SessionListener {
                generation: self.generation,
                events: self.events.clone(),
            }),
            decoder: Box::new(SubmissionGate::new(
                self.decoder.clone(),
                self.request_idr.clone(),
                self.events.clone(),
                self.options.initial_decode_buffer,
            )),
        };

        let transport = self.transport.clone();
        let input = self.input.clone();
        let running = self.running.clone();
        let events = self.events.clone();
        let host = self.host.clone();
        let interval = self.options.input_poll_interval;
        let generation = self.generation;
        let host_name = request.host.clone();
        let server_major_version = request.server_major_version;
        let runtime = Handle::current();

        self.connection = Some(tokio::task::spawn_blocking(move || {
            post(
                &host,
                HostMessage::status(format!("Starting connection to {host_name}")),
            );
            let error =
                transport.start_connection(&host_name, &config, callbacks, server_major_version);

            let poller = if error == 0 {
                running.store(true, Ordering::SeqCst);
                Some(runtime.spawn(poll_input(input, running, interval)))
            } else {
                None
            };
            let finished = ControlEvent::Session {
                generation,
                event: SessionEvent::ConnectFinished { error },
            };
            if events.send(finished).is_err() {
                debug!("control loop gone before connection finished");
            }
            poller
        }));

        self.active = Some(request);
        Ok(())
    }

    // ── Events ───────────────────────────────────────────────────

    pub async fn on_session_event(&mut self, generation: u64, event: SessionEvent) {
        if generation != self.generation || self.phase.is_idle() {
            debug!(
                generation,
                current = self.generation,
                ?event,
                "ignoring event from finished session"
            );
            return;
        }

        match event {
            SessionEvent::ConnectFinished { error: 0 } => match self.phase.connected() {
                Ok(()) => info!("stream established"),
                Err(e) => debug!("{e}"),
            },
            SessionEvent::ConnectFinished { error } => {
                warn!("{}", StreamError::ConnectionFailed(error));
                if self.phase.fail(error).is_ok() {
                    self.connection_stopped().await;
                }
            }
            SessionEvent::Started => {
                post(&self.host, HostMessage::status("Connection Established"));
                self.input.capture();
            }
            SessionEvent::Terminated { error } => {
                info!(error, "connection terminated by transport");
                self.connection_stopped().await;
            }
            SessionEvent::Message(message) => post(&self.host, HostMessage::status(message)),
        }
    }

    /// Request a key frame when the stream regains focus.
    pub fn focus_changed(&self, focused: bool) {
        if focused && self.phase.is_streaming() {
            debug!("focus regained, requesting key frame");
            self.request_idr.store(true, Ordering::SeqCst);
        }
    }

    // ── Stop ─────────────────────────────────────────────────────

    /// User-initiated stop. The transport teardown runs on a throwaway
    /// blocking worker; this side synthesizes the termination.
    pub async fn stop(&mut self) {
        if self.phase.is_idle() {
            return;
        }

        let transport = self.transport.clone();
        let (done, finished) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            transport.stop_connection();
            let _ = done.send(());
        });
        self.teardown = Some(finished);

        self.connection_stopped().await;
    }

    /// Wait for an outstanding transport teardown.
    pub async fn join_teardown(&mut self) {
        if let Some(finished) = self.teardown.take() {
            if finished.await.is_err() {
                warn!("transport teardown worker exited without completing");
            }
        }
    }

    async fn connection_stopped(&mut self) {
        let streamed = self.phase.streaming_duration();
        if !matches!(self.phase, SessionPhase::Failed { .. }) {
            if let Err(e) = self.phase.begin_stop() {
                debug!("{e}");
                return;
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.input.release();

        let poller = match self.connection.take() {
            Some(worker) => match worker.await {
                Ok(poller) => poller,
                Err(e) => {
                    warn!("connection worker failed: {}", StreamError::from(e));
                    None
                }
            },
            None => None,
        };
        // The connection worker may have raised the flag while we waited on it.
        self.running.store(false, Ordering::SeqCst);
        if let Some(poller) = poller {
            if let Err(e) = poller.await {
                warn!("input poll worker failed: {e}");
            }
        }

        self.active = None;
        if let Err(e) = self.phase.finish() {
            debug!("{e}");
        }
        info!(
            generation = self.generation,
            streamed_ms = streamed.map(|d| d.as_millis() as u64),
            "session ended"
        );
        post(&self.host, HostMessage::StreamTerminated);
    }
}

// ── SessionListener ──────────────────────────────────────────────

/// Listener handed to the transport. Posts every callback to the control
/// loop tagged with the session that created it.
struct SessionListener {
    generation: u64,
    events: ControlSender,
}

impl SessionListener {
    fn post(&self, event: SessionEvent) {
        let event = ControlEvent::Session {
            generation: self.generation,
            event,
        };
        if self.events.send(event).is_err() {
            debug!("control loop gone, listener event dropped");
        }
    }
}

impl ConnectionListener for SessionListener {
    fn connection_started(&self) {
        self.post(SessionEvent::Started);
    }

    fn connection_terminated(&self, error: i32) {
        self.post(SessionEvent::Terminated { error });
    }

    fn display_message(&self, message: &str) {
        self.post(SessionEvent::Message(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{HostMessage, HostReceiver};
    use crate::control::ControlReceiver;
    use crate::session::input::NullInput;
    use crate::testing::{FakeDecoder, FakeSurface, FakeTransport, SurfaceCall};
    use tokio::sync::mpsc;

    struct Harness {
        controller: SessionController,
        transport: Arc<FakeTransport>,
        renderer: Renderer,
        surface_calls: Arc<std::sync::Mutex<Vec<SurfaceCall>>>,
        events: ControlReceiver,
        host: HostReceiver,
    }

    fn harness(start_result: i32) -> Harness {
        let transport = FakeTransport::new();
        transport.fail_next_start(start_result);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (host_tx, host) = mpsc::unbounded_channel();
        let surface = FakeSurface::new();
        let surface_calls = surface.calls();
        let controller = SessionController::new(
            transport.clone(),
            FakeDecoder::new(),
            Arc::new(NullInput),
            events_tx,
            host_tx,
            SessionOptions::default(),
        );
        Harness {
            controller,
            transport,
            renderer: Renderer::new(Box::new(surface)),
            surface_calls,
            events,
            host,
        }
    }

    fn request() -> StreamRequest {
        StreamRequest {
            host: "192.168.1.20".into(),
            width: 1280,
            height: 720,
            fps: 60,
            bitrate_kbps: 10_000,
            server_major_version: 7,
        }
    }

    /// Feed session events to the controller until the connection
    /// worker reports back.
    async fn until_connect_finished(h: &mut Harness) {
        while let Some(event) = h.events.recv().await {
            if let ControlEvent::Session { generation, event } = event {
                let finished = matches!(event, SessionEvent::ConnectFinished { .. });
                h.controller.on_session_event(generation, event).await;
                if finished {
                    return;
                }
            }
        }
    }

    fn terminations(host: &mut HostReceiver) -> usize {
        let mut count = 0;
        while let Ok(message) = host.try_recv() {
            if message == HostMessage::StreamTerminated {
                count += 1;
            }
        }
        count
    }

    #[tokio::test]
    async fn start_initializes_surface_and_streams() {
        let mut h = harness(0);
        h.controller.start(request(), &mut h.renderer).await.unwrap();
        assert_eq!(h.controller.phase(), &SessionPhase::Connecting);
        assert!(h
            .surface_calls
            .lock()
            .unwrap()
            .contains(&SurfaceCall::Initialize {
                width: 1280,
                height: 720
            }));

        until_connect_finished(&mut h).await;
        assert!(h.controller.phase().is_streaming());
        assert!(h.controller.is_running());

        let config = h.transport.last_config().unwrap();
        assert_eq!(config.packet_size, DEFAULT_PACKET_SIZE);
        assert!(!config.streaming_remotely);
        assert_eq!(config.audio, AudioConfiguration::Stereo);
        assert_eq!(config.bitrate_kbps, 10_000);
    }

    #[tokio::test]
    async fn failed_connect_terminates_once() {
        let mut h = harness(-1);
        h.controller.start(request(), &mut h.renderer).await.unwrap();
        until_connect_finished(&mut h).await;

        assert!(h.controller.phase().is_idle());
        assert!(!h.controller.is_running());
        assert!(h.controller.active().is_none());
        assert_eq!(terminations(&mut h.host), 1);
    }

    #[tokio::test]
    async fn stop_while_streaming_terminates_once() {
        let mut h = harness(0);
        h.controller.start(request(), &mut h.renderer).await.unwrap();
        until_connect_finished(&mut h).await;

        h.controller.stop().await;
        assert!(h.controller.phase().is_idle());
        assert!(!h.controller.is_running());
        assert_eq!(terminations(&mut h.host), 1);

        // The transport reports its own termination during teardown.
        h.controller.join_teardown().await;
        while let Ok(event) = h.events.try_recv() {
            if let ControlEvent::Session { generation, event } = event {
                h.controller.on_session_event(generation, event).await;
            }
        }
        assert_eq!(terminations(&mut h.host), 0);
        assert_eq!(h.transport.stops(), 1);
    }

    #[tokio::test]
    async fn transport_termination_ends_session() {
        let mut h = harness(0);
        h.controller.start(request(), &mut h.renderer).await.unwrap();
        until_connect_finished(&mut h).await;

        let generation = h.controller.generation();
        h.controller
            .on_session_event(generation, SessionEvent::Terminated { error: -5 })
            .await;
        assert!(h.controller.phase().is_idle());
        assert_eq!(terminations(&mut h.host), 1);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let mut h = harness(0);
        h.controller.start(request(), &mut h.renderer).await.unwrap();
        let err = h
            .controller
            .start(request(), &mut h.renderer)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::InvalidTransition(_)));
        h.controller.stop().await;
    }

    #[tokio::test]
    async fn focus_requests_keyframe_only_while_streaming() {
        let mut h = harness(0);
        h.controller.focus_changed(true);
        assert!(!h.controller.keyframe_requested());

        h.controller.start(request(), &mut h.renderer).await.unwrap();
        until_connect_finished(&mut h).await;

        h.controller.focus_changed(false);
        assert!(!h.controller.keyframe_requested());
        h.controller.focus_changed(true);
        assert!(h.controller.keyframe_requested());
        h.controller.stop().await;
    }

    #[tokio::test]
    async fn stale_generation_is_ignored() {
        let mut h = harness(0);
        h.controller.start(request(), &mut h.renderer).await.unwrap();
        until_connect_finished(&mut h).await;

        let stale = h.controller.generation() - 1;
        h.controller
            .on_session_event(stale, SessionEvent::Terminated { error: 0 })
            .await;
        assert!(h.controller.phase().is_streaming());
        h.controller.stop().await;
    }

    #[tokio::test]
    async fn status_messages_are_forwarded() {
        let mut h = harness(0);
        h.controller.start(request(), &mut h.renderer).await.unwrap();
        until_connect_finished(&mut h).await;

        let statuses: Vec<_> = std::iter::from_fn(|| h.host.try_recv().ok())
            .filter_map(|m| match m {
                HostMessage::Status { message } => Some(message),
                _ => None,
            })
            .collect();
        assert!(statuses.contains(&"Setting stream width to: 1280".to_string()));
        assert!(statuses.contains(&"Starting connection to 192.168.1.20".to_string()));
        assert!(statuses.contains(&"Connection Established".to_string()));
        h.controller.stop().await;
    }
}
