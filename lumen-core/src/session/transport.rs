//! Transport collaborator boundary.
//!
//! The transport negotiates the stream with the host and then drives the
//! decoder callback table from its own receipt thread. Nothing here
//! knows about the wire; implementations live outside this crate.

use std::sync::Arc;

use bitflags::bitflags;

use crate::error::StreamError;
use crate::video::unit::DecodeUnit;

/// Fixed packet size requested from the host.
pub const DEFAULT_PACKET_SIZE: u32 = 1024;

/// Number of slices the decoder accepts per frame.
pub const SLICES_PER_FRAME: u8 = 4;

// ── Stream configuration ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioConfiguration {
    #[default]
    Stereo,
}

/// Stream parameters handed to `start_connection`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Kilobits per second.
    pub bitrate_kbps: u32,
    pub packet_size: u32,
    pub streaming_remotely: bool,
    pub audio: AudioConfiguration,
}

// ── Decoder callback table ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFormat {
    H264,
}

bitflags! {
    /// Decoder capabilities advertised to the transport. No flag bits are
    /// set; the slice count lives in the top byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const _ = !0;
    }
}

impl Capabilities {
    pub fn with_slices_per_frame(self, slices: u8) -> Self {
        self | Capabilities::from_bits_retain((slices as u32) << 24)
    }

    pub fn slices_per_frame(self) -> u8 {
        (self.bits() >> 24) as u8
    }
}

/// Arguments of the decoder setup callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderSetup {
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    pub redraw_rate: u32,
    pub flags: u32,
}

/// Result of a decode-unit submission as seen by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Ok,
    /// Ask the host for a fresh IDR frame.
    NeedIdr,
}

/// Decoder callbacks invoked by the transport, serially, from its own
/// thread.
pub trait DecoderRenderer: Send {
    fn setup(&mut self, params: &DecoderSetup) -> Result<(), StreamError>;
    fn cleanup(&mut self);
    fn submit_decode_unit(&mut self, unit: &DecodeUnit<'_>) -> SubmitStatus;
    fn capabilities(&self) -> Capabilities;
}

// ── Connection listener ──────────────────────────────────────────

/// Connection lifecycle callbacks. They may fire on any transport
/// thread, including inside `stop_connection`.
pub trait ConnectionListener: Send + Sync {
    fn connection_started(&self);
    fn connection_terminated(&self, error: i32);
    fn display_message(&self, message: &str);
}

/// Everything the transport needs to call back into the pipeline.
pub struct ConnectionCallbacks {
    pub listener: Arc<dyn ConnectionListener>,
    pub decoder: Box<dyn DecoderRenderer>,
}

// ── Transport ────────────────────────────────────────────────────

pub trait Transport: Send + Sync {
    /// Negotiate and start the stream. Blocks until the stream is up or
    /// negotiation fails; returns zero on success.
    fn start_connection(
        &self,
        host: &str,
        config: &StreamConfig,
        callbacks: ConnectionCallbacks,
        server_major_version: i32,
    ) -> i32;

    /// Tear the stream down. May invoke listener and decoder callbacks
    /// synchronously before returning.
    fn stop_connection(&self);
}
