//! Session lifecycle state machine.
//!
//! Provides a `SessionPhase` enum with validated transitions that return
//! `Result` instead of panicking.

use std::time::Instant;

use crate::error::StreamError;

/// The current phase of a streaming session.
///
/// ```text
///  Idle ──► Connecting ──► Streaming ──► Stopping ──► Idle
///               │   │                       ▲
///               │   └───────────────────────┘
///               ▼
///            Failed ──► Idle
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No session. Initial / terminal state.
    #[default]
    Idle,

    /// The connection worker is negotiating with the host.
    Connecting,

    /// `start_connection` succeeded; decode units are flowing.
    Streaming {
        /// When the session entered the `Streaming` state.
        since: Instant,
    },

    /// Workers are being joined.
    Stopping,

    /// Negotiation failed; the termination notice is pending.
    Failed { error: i32 },
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Streaming { .. } => write!(f, "Streaming"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Failed { error } => write!(f, "Failed ({error})"),
        }
    }
}

impl SessionPhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    /// How long the session has been streaming.
    ///
    /// Returns `None` for any other phase.
    pub fn streaming_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Streaming { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`.
    pub fn begin_connect(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Idle => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot start: a session is already active",
            )),
        }
    }

    /// Valid from: `Connecting`.
    pub fn connected(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Connecting => {
                *self = Self::Streaming {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot stream: not in Connecting state",
            )),
        }
    }

    /// Valid from: `Connecting`.
    pub fn fail(&mut self, error: i32) -> Result<(), StreamError> {
        match self {
            Self::Connecting => {
                *self = Self::Failed { error };
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot fail: not in Connecting state",
            )),
        }
    }

    /// Valid from: `Connecting`, `Streaming`.
    pub fn begin_stop(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Connecting | Self::Streaming { .. } => {
                *self = Self::Stopping;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot stop: not in Connecting or Streaming state",
            )),
        }
    }

    /// Valid from: `Stopping`, `Failed`.
    pub fn finish(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Stopping | Self::Failed { .. } => {
                *self = Self::Idle;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot finish: not in Stopping or Failed state",
            )),
        }
    }
}
