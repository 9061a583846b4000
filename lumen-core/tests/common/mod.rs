//! Pipeline harness and bitstream samples shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use bytes::Bytes;
use lumen_core::bridge::HostReceiver;
use lumen_core::session::SubmitStatus;
use lumen_core::testing::{
    CountingInput, EchoHttp, FakeSurface, FakeTransport, LoopbackDecoder, PinPairing,
};
use lumen_core::{
    Collaborators, ControlEvent, ControlLoop, ControlSender, HostMessage, HostRequest,
    SessionOptions, StreamError,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ── Running pipeline ─────────────────────────────────────────────

pub struct Pipeline {
    pub events: ControlSender,
    pub host: HostReceiver,
    pub transport: Arc<FakeTransport>,
    pub decoder: Arc<LoopbackDecoder>,
    pub input: Arc<CountingInput>,
    pub frames: Arc<AtomicUsize>,
    pub control: JoinHandle<Result<(), StreamError>>,
    next_callback: i32,
}

impl Pipeline {
    pub fn spawn() -> Self {
        let transport = FakeTransport::new();
        let decoder = LoopbackDecoder::new();
        let input = Arc::new(CountingInput::default());
        let surface = FakeSurface::new();
        let frames = surface.swaps();
        let (host_tx, host) = mpsc::unbounded_channel();

        let control = ControlLoop::new(
            Collaborators {
                transport: transport.clone(),
                decoder: decoder.clone(),
                surface: Box::new(surface),
                input: input.clone(),
                http: Arc::new(EchoHttp),
                pairing: Arc::new(PinPairing),
            },
            SessionOptions::default(),
            host_tx,
        );
        let events = control.sender();

        Self {
            events,
            host,
            transport,
            decoder,
            input,
            frames,
            control: tokio::spawn(control.run()),
            next_callback: 0,
        }
    }

    /// Post a host request and return its callback id.
    pub fn request(&mut self, method: &str, params: &[&str]) -> i32 {
        self.next_callback += 1;
        let request = HostRequest::new(self.next_callback, method, params);
        self.events.send(ControlEvent::Host(request)).unwrap();
        self.next_callback
    }

    pub fn start(&mut self) -> i32 {
        self.request(
            "startRequest",
            &["10.0.0.2", "1280", "720", "60", "10000", "7"],
        )
    }

    /// Wait for a message matching `pred`, collecting everything seen
    /// on the way (the match included).
    pub async fn until<F>(&mut self, pred: F) -> Vec<HostMessage>
    where
        F: Fn(&HostMessage) -> bool,
    {
        let host = &mut self.host;
        tokio::time::timeout(Duration::from_secs(5), async move {
            let mut seen = Vec::new();
            loop {
                let message = host.recv().await.expect("host channel closed");
                let done = pred(&message);
                seen.push(message);
                if done {
                    return seen;
                }
            }
        })
        .await
        .expect("timed out waiting for host message")
    }

    pub async fn until_resolved(&mut self, callback_id: i32) -> Vec<HostMessage> {
        self.until(|m| matches!(m, HostMessage::Resolve { callback_id: id, .. } if *id == callback_id))
            .await
    }

    /// Wait until every event posted so far has been handled.
    pub async fn barrier(&mut self) -> Vec<HostMessage> {
        self.request("barrier", &[]);
        self.until(|m| {
            matches!(m, HostMessage::Status { message } if message == "Unhandled message received: barrier")
        })
        .await
    }

    /// Regain focus until a submission asks for an IDR, which proves the
    /// session reached `Streaming`.
    pub async fn wait_streaming(&mut self, p_frame: &[Bytes]) {
        for _ in 0..500 {
            self.events.send(ControlEvent::FocusChanged(true)).unwrap();
            self.barrier().await;
            if self.transport.deliver(0, p_frame) == SubmitStatus::NeedIdr {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("session never reached Streaming");
    }
}

pub fn count_terminated(messages: &[HostMessage]) -> usize {
    messages
        .iter()
        .filter(|m| **m == HostMessage::StreamTerminated)
        .count()
}

// ── Bitstream samples ────────────────────────────────────────────

pub fn annex_b(nal: &[u8]) -> Bytes {
    let mut unit = vec![0, 0, 0, 1];
    unit.extend_from_slice(nal);
    Bytes::from(unit)
}

/// Baseline 640x480 SPS.
pub const SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x02, 0x80, 0xF6, 0x9B, 0x80, 0x80, 0x83, 0x01];
pub const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];
pub const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x00, 0x33, 0xFF];
pub const P_SLICE: &[u8] = &[0x41, 0x9A, 0x02, 0x0C, 0x44];
