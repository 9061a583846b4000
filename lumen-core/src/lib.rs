//! # lumen-core
//!
//! Client-side media pipeline for low-latency game streaming.
//!
//! This crate contains:
//! - **Video**: NAL classification, SPS rewriting, the parameter-set cache,
//!   the scratch decode buffer and the decoder submission gate
//! - **Render**: the picture display queue, shader cache and the
//!   `RenderSurface` boundary
//! - **Session**: the lifecycle controller, phase machine and the
//!   `Transport` / `InputSource` boundaries
//! - **Bridge**: JSON host requests and replies, and the serial request worker
//! - **Control**: the single-task event loop every callback is funnelled into
//! - **Error**: `StreamError`, a typed `thiserror`-based error hierarchy
//! - **Testing**: in-memory collaborators, behind the `testing` feature

pub mod bridge;
pub mod control;
pub mod error;
pub mod render;
pub mod session;
pub mod video;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use bridge::{HostMessage, HostRequest, HostSender, HttpClient, Pairing};
pub use control::{Collaborators, ControlEvent, ControlLoop, ControlSender};
pub use error::StreamError;
pub use render::{DisplayQueue, RenderSurface, Renderer};
pub use session::{SessionController, SessionOptions, SessionPhase, Transport};
pub use video::{DecodeUnit, Picture, SubmissionGate, VideoDecoder};
