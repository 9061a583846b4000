//! Domain-specific error types for the streaming pipeline.
//!
//! Fallible pipeline operations return `Result<T, StreamError>`.
//! The only panics are the parameter-set contract assertions in the
//! submission gate, which indicate a broken transport invariant.

use thiserror::Error;

/// The canonical error type for the lumen pipeline.
#[derive(Debug, Error)]
pub enum StreamError {
    // ── Bitstream Errors ─────────────────────────────────────────
    /// The RBSP ended before a syntax element could be read.
    #[error("bitstream truncated while reading {0}")]
    Truncated(&'static str),

    /// An Exp-Golomb code was longer than 32 bits.
    #[error("malformed exp-golomb code in {0}")]
    MalformedExpGolomb(&'static str),

    /// A syntax element decoded outside its legal range.
    #[error("{element} out of range: {value}")]
    OutOfRange { element: &'static str, value: i64 },

    /// A NAL unit was not the type the caller expected.
    #[error("unexpected NAL unit type {actual} (expected {expected})")]
    UnexpectedNalType { expected: u8, actual: u8 },

    // ── Decoder Errors ───────────────────────────────────────────
    /// The hardware decoder rejected an operation.
    #[error("decoder error: {0}")]
    Decoder(String),

    // ── Graphics Errors ──────────────────────────────────────────
    /// A state-changing call on the rendering surface failed.
    ///
    /// The rendering context is considered broken; the running session
    /// cannot recover.
    #[error("graphics error: {0}")]
    Graphics(String),

    // ── Session Errors ───────────────────────────────────────────
    /// A lifecycle transition was requested from the wrong phase.
    #[error("invalid session transition: {0}")]
    InvalidTransition(&'static str),

    /// The transport refused to establish a connection.
    #[error("connection failed with code {0}")]
    ConnectionFailed(i32),

    /// A worker task panicked or was cancelled.
    #[error("worker join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Bridge Errors ────────────────────────────────────────────
    /// A host request was missing a parameter or carried a bad value.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// JSON encoding or decoding of a host message failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A background HTTP request failed.
    #[error("http error: {0}")]
    Http(String),

    /// An I/O operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for StreamError {
    fn from(s: String) -> Self {
        StreamError::Other(s)
    }
}

impl From<&str> for StreamError {
    fn from(s: &str) -> Self {
        StreamError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for StreamError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        StreamError::ChannelClosed
    }
}
