//! In-memory collaborators shared by the unit and integration tests.
//!
//! Compiled for this crate's own tests and, through the `testing`
//! feature, for the integration tests under `tests/`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::bridge::{HttpClient, Pairing};
use crate::control::{PictureCallback, SwapCallback};
use crate::error::StreamError;
use crate::render::surface::{ProgramId, RenderSurface};
use crate::session::input::InputSource;
use crate::session::transport::{
    ConnectionCallbacks, DecoderSetup, StreamConfig, SubmitStatus, Transport, VideoFormat,
};
use crate::video::decoder::{
    Picture, PictureError, TEXTURE_2D, TextureSize, VideoDecoder, VideoProfile,
};
use crate::video::unit::DecodeUnit;

pub fn picture(decode_id: u32, texture_id: u32, texture_target: u32) -> Picture {
    Picture {
        decode_id,
        texture_id,
        texture_target,
        texture_size: TextureSize {
            width: 1280,
            height: 720,
        },
    }
}

// ── FakeSurface ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    Initialize { width: u32, height: u32 },
    CreateProgram,
    UseProgram { program: ProgramId, scale: [f32; 2] },
    BindTexture { target: u32, texture_id: u32 },
    Clear,
    Draw,
    Swap,
    DeleteProgram,
}

/// Records every call; swaps complete inside `swap_buffers`.
#[derive(Default)]
pub struct FakeSurface {
    calls: Arc<Mutex<Vec<SurfaceCall>>>,
    fail_draw: Arc<AtomicBool>,
    swaps: Arc<AtomicUsize>,
    next_program: u32,
}

impl FakeSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<SurfaceCall>>> {
        self.calls.clone()
    }

    pub fn fail_draw(&self) -> Arc<AtomicBool> {
        self.fail_draw.clone()
    }

    /// Number of presented frames.
    pub fn swaps(&self) -> Arc<AtomicUsize> {
        self.swaps.clone()
    }

    fn record(&self, call: SurfaceCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl RenderSurface for FakeSurface {
    fn initialize(&mut self, width: u32, height: u32, _vertices: &[f32]) -> Result<(), StreamError> {
        self.record(SurfaceCall::Initialize { width, height });
        Ok(())
    }

    fn create_program(&mut self, _vertex: &str, _fragment: &str) -> Result<ProgramId, StreamError> {
        self.next_program += 1;
        self.record(SurfaceCall::CreateProgram);
        Ok(ProgramId(self.next_program))
    }

    fn use_program(&mut self, program: ProgramId, scale: [f32; 2]) -> Result<(), StreamError> {
        self.record(SurfaceCall::UseProgram { program, scale });
        Ok(())
    }

    fn bind_texture(&mut self, target: u32, texture_id: u32) -> Result<(), StreamError> {
        self.record(SurfaceCall::BindTexture { target, texture_id });
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StreamError> {
        self.record(SurfaceCall::Clear);
        Ok(())
    }

    fn draw_quad(&mut self) -> Result<(), StreamError> {
        if self.fail_draw.load(Ordering::SeqCst) {
            return Err(StreamError::Graphics("draw failed".into()));
        }
        self.record(SurfaceCall::Draw);
        Ok(())
    }

    fn swap_buffers(&mut self, done: SwapCallback) -> Result<(), StreamError> {
        self.record(SurfaceCall::Swap);
        self.swaps.fetch_add(1, Ordering::SeqCst);
        done.complete(());
        Ok(())
    }

    fn delete_program(&mut self, _program: ProgramId) {
        self.record(SurfaceCall::DeleteProgram);
    }
}

// ── FakeDecoder ──────────────────────────────────────────────────

#[derive(Default)]
pub struct DecoderLog {
    pub initialized: usize,
    pub decoded: Vec<(u32, Vec<u8>)>,
    pub recycled: Vec<u32>,
    pub armed: Vec<PictureCallback>,
    pub flushes: usize,
}

/// Keeps armed picture callbacks so tests decide what arrives when.
#[derive(Default)]
pub struct FakeDecoder {
    pub log: Mutex<DecoderLog>,
    pub reject_decode: AtomicBool,
}

impl FakeDecoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn armed(&self) -> usize {
        self.log.lock().unwrap().armed.len()
    }

    pub fn recycled(&self) -> Vec<u32> {
        self.log.lock().unwrap().recycled.clone()
    }

    pub fn decoded_ids(&self) -> Vec<u32> {
        self.log.lock().unwrap().decoded.iter().map(|(id, _)| *id).collect()
    }

    pub fn decoded(&self, index: usize) -> Vec<u8> {
        self.log.lock().unwrap().decoded[index].1.clone()
    }

    /// Complete the oldest armed callback.
    pub fn deliver(&self, result: Result<Picture, PictureError>) {
        let callback = self.log.lock().unwrap().armed.remove(0);
        callback.complete(result);
    }
}

impl VideoDecoder for FakeDecoder {
    fn initialize(&self, _profile: VideoProfile) -> Result<(), StreamError> {
        self.log.lock().unwrap().initialized += 1;
        Ok(())
    }

    fn decode(&self, decode_id: u32, access_unit: &[u8]) -> Result<(), StreamError> {
        if self.reject_decode.load(Ordering::SeqCst) {
            return Err(StreamError::Decoder("rejected".into()));
        }
        self.log
            .lock()
            .unwrap()
            .decoded
            .push((decode_id, access_unit.to_vec()));
        Ok(())
    }

    fn get_picture(&self, ready: PictureCallback) {
        self.log.lock().unwrap().armed.push(ready);
    }

    fn recycle_picture(&self, picture: Picture) {
        self.log.lock().unwrap().recycled.push(picture.decode_id);
    }

    fn flush(&self) {
        let armed: Vec<_> = {
            let mut log = self.log.lock().unwrap();
            log.flushes += 1;
            log.armed.drain(..).collect()
        };
        for callback in armed {
            callback.complete(Err(PictureError::Aborted));
        }
    }
}

// ── LoopbackDecoder ──────────────────────────────────────────────

#[derive(Default)]
struct LoopbackState {
    decoded: Vec<(u32, Vec<u8>)>,
    ready: VecDeque<Picture>,
    armed: Option<PictureCallback>,
    handed_out: usize,
    recycled: usize,
}

/// Produces one 2D picture per decoded access unit.
#[derive(Default)]
pub struct LoopbackDecoder {
    state: Mutex<LoopbackState>,
}

impl LoopbackDecoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn decoded(&self) -> Vec<(u32, Vec<u8>)> {
        self.state.lock().unwrap().decoded.clone()
    }

    /// Pictures handed to the display that were never recycled.
    pub fn outstanding(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.handed_out - state.recycled
    }

    fn hand_out(state: &mut LoopbackState) -> Option<(PictureCallback, Picture)> {
        if state.armed.is_none() || state.ready.is_empty() {
            return None;
        }
        let callback = state.armed.take()?;
        let picture = state.ready.pop_front()?;
        state.handed_out += 1;
        Some((callback, picture))
    }
}

impl VideoDecoder for LoopbackDecoder {
    fn initialize(&self, _profile: VideoProfile) -> Result<(), StreamError> {
        Ok(())
    }

    fn decode(&self, decode_id: u32, access_unit: &[u8]) -> Result<(), StreamError> {
        let ready = {
            let mut state = self.state.lock().unwrap();
            state.decoded.push((decode_id, access_unit.to_vec()));
            state
                .ready
                .push_back(picture(decode_id, decode_id % 3 + 1, TEXTURE_2D));
            Self::hand_out(&mut state)
        };
        if let Some((callback, picture)) = ready {
            callback.complete(Ok(picture));
        }
        Ok(())
    }

    fn get_picture(&self, ready: PictureCallback) {
        let handed = {
            let mut state = self.state.lock().unwrap();
            state.armed = Some(ready);
            Self::hand_out(&mut state)
        };
        if let Some((callback, picture)) = handed {
            callback.complete(Ok(picture));
        }
    }

    fn recycle_picture(&self, _picture: Picture) {
        self.state.lock().unwrap().recycled += 1;
    }

    fn flush(&self) {
        let armed = {
            let mut state = self.state.lock().unwrap();
            state.ready.clear();
            state.armed.take()
        };
        if let Some(callback) = armed {
            callback.complete(Err(PictureError::Aborted));
        }
    }
}

// ── FakeTransport ────────────────────────────────────────────────

/// Runs decoder setup and the started callback inside
/// `start_connection`, then keeps the callback table so the test can act
/// as the receipt thread. `stop_connection` runs cleanup and reports
/// termination, as a real transport does.
#[derive(Default)]
pub struct FakeTransport {
    start_result: AtomicI32,
    callbacks: Mutex<Option<ConnectionCallbacks>>,
    config: Mutex<Option<StreamConfig>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `start_connection` return `error` without setup.
    pub fn fail_next_start(&self, error: i32) {
        self.start_result.store(error, Ordering::SeqCst);
    }

    pub fn last_config(&self) -> Option<StreamConfig> {
        self.config.lock().unwrap().clone()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Deliver one decode unit through the gate.
    pub fn deliver(&self, frame_number: u32, fragments: &[Bytes]) -> SubmitStatus {
        let mut callbacks = self.callbacks.lock().unwrap();
        let callbacks = callbacks.as_mut().expect("no active connection");
        callbacks
            .decoder
            .submit_decode_unit(&DecodeUnit::new(frame_number, fragments))
    }
}

impl Transport for FakeTransport {
    fn start_connection(
        &self,
        _host: &str,
        config: &StreamConfig,
        mut callbacks: ConnectionCallbacks,
        _server_major_version: i32,
    ) -> i32 {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.config.lock().unwrap() = Some(config.clone());
        let result = self.start_result.swap(0, Ordering::SeqCst);
        if result != 0 {
            return result;
        }
        callbacks.listener.display_message("Starting RTSP handshake");
        callbacks
            .decoder
            .setup(&DecoderSetup {
                format: VideoFormat::H264,
                width: config.width,
                height: config.height,
                redraw_rate: config.fps,
                flags: 0,
            })
            .unwrap();
        let listener = callbacks.listener.clone();
        *self.callbacks.lock().unwrap() = Some(callbacks);
        listener.connection_started();
        0
    }

    fn stop_connection(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let callbacks = self.callbacks.lock().unwrap().take();
        if let Some(mut callbacks) = callbacks {
            callbacks.decoder.cleanup();
            callbacks.listener.connection_terminated(0);
        }
    }
}

// ── Input / HTTP / pairing ───────────────────────────────────────

#[derive(Default)]
pub struct CountingInput {
    pub polls: AtomicUsize,
    pub captures: AtomicUsize,
    pub releases: AtomicUsize,
}

impl InputSource for CountingInput {
    fn capture(&self) {
        self.captures.fetch_add(1, Ordering::SeqCst);
    }

    fn poll(&self) {
        self.polls.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Answers every GET with a document naming the URL.
pub struct EchoHttp;

#[async_trait]
impl HttpClient for EchoHttp {
    async fn get(&self, url: &str) -> Result<String, StreamError> {
        Ok(format!("<root url=\"{url}\"/>"))
    }
}

/// Accepts PIN `1234` only.
pub struct PinPairing;

#[async_trait]
impl Pairing for PinPairing {
    async fn pair(&self, _server_major_version: i32, _address: &str, pin: &str) -> i32 {
        if pin == "1234" { 0 } else { -1 }
    }
}
