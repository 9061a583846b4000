//! Hardware decoder boundary.
//!
//! The decoder accepts flattened access units from the transport's
//! receipt thread and hands decoded pictures back on the control
//! context through one-shot [`PictureCallback`]s. Implementations must
//! therefore be `Send + Sync` and do their own internal locking.

use thiserror::Error;

use crate::control::PictureCallback;
use crate::error::StreamError;

// ── Texture targets ──────────────────────────────────────────────

/// `GL_TEXTURE_2D`.
pub const TEXTURE_2D: u32 = 0x0DE1;
/// `GL_TEXTURE_RECTANGLE_ARB`.
pub const TEXTURE_RECTANGLE: u32 = 0x84F5;
/// `GL_TEXTURE_EXTERNAL_OES`.
pub const TEXTURE_EXTERNAL_OES: u32 = 0x8D65;

/// Texture dimensions in texels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureSize {
    pub width: u32,
    pub height: u32,
}

// ── Picture ──────────────────────────────────────────────────────

/// A decoded picture backed by a decoder-owned texture.
///
/// Every picture handed out by [`VideoDecoder::get_picture`] must be
/// returned through [`VideoDecoder::recycle_picture`] exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct Picture {
    /// Submission number the picture was decoded from.
    pub decode_id: u32,
    pub texture_id: u32,
    /// GL texture target; zero marks a placeholder with nothing to draw.
    pub texture_target: u32,
    pub texture_size: TextureSize,
}

impl Picture {
    /// Placeholder pictures carry no texture target.
    pub fn is_bogus(&self) -> bool {
        self.texture_target == 0
    }
}

/// Why a picture-ready wait completed without a picture.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PictureError {
    /// The decoder is being torn down.
    #[error("picture request aborted")]
    Aborted,
    #[error("picture request failed: {0}")]
    Failed(String),
}

pub type PictureResult = Result<Picture, PictureError>;

/// Decoder profile requested at setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoProfile {
    H264High,
}

// ── VideoDecoder ─────────────────────────────────────────────────

pub trait VideoDecoder: Send + Sync {
    /// Prepare for a new stream. Called from the transport's setup.
    fn initialize(&self, profile: VideoProfile) -> Result<(), StreamError>;

    /// Queue an access unit for decoding. `access_unit` is only borrowed
    /// for the duration of the call.
    fn decode(&self, decode_id: u32, access_unit: &[u8]) -> Result<(), StreamError>;

    /// Arm a single picture-ready notification. `ready` is completed
    /// exactly once, with [`PictureError::Aborted`] if the decoder is
    /// flushed first.
    fn get_picture(&self, ready: PictureCallback);

    /// Return a picture's texture to the decoder.
    fn recycle_picture(&self, picture: Picture);

    /// Drop pending work and abort outstanding picture requests.
    fn flush(&self);
}
