//! Client configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use lumen_core::SessionOptions;
use lumen_core::session::transport::DEFAULT_PACKET_SIZE;
use serde::{Deserialize, Serialize};

/// Top-level configuration for the client.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Stream parameters used for session-level tuning.
    pub stream: StreamSection,
    /// Headless decoder settings.
    pub decoder: DecoderSection,
    /// Input forwarding.
    pub input: InputSection,
    /// Annex-B replay transport.
    pub replay: ReplaySection,
    /// Logging.
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    /// Packet size requested from the host.
    pub packet_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderSection {
    /// Initial scratch buffer size in KiB.
    pub initial_buffer_kib: usize,
    /// Number of output textures the decoder cycles through.
    pub texture_pool: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSection {
    /// Controller poll interval in milliseconds.
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaySection {
    /// Annex-B H.264 elementary stream to play back.
    pub file: PathBuf,
    /// Maximum fragment size a decode unit is split into.
    pub fragment_size: usize,
    /// Restart from the beginning at end of stream.
    pub loop_playback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level, used when `RUST_LOG` is unset.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
        }
    }
}

impl Default for DecoderSection {
    fn default() -> Self {
        Self {
            initial_buffer_kib: 128,
            texture_pool: 4,
        }
    }
}

impl Default for InputSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
        }
    }
}

impl Default for ReplaySection {
    fn default() -> Self {
        Self {
            file: PathBuf::from("stream.h264"),
            fragment_size: 1024,
            loop_playback: false,
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Per-session tunables for the core pipeline.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            initial_decode_buffer: self.decoder.initial_buffer_kib * 1024,
            input_poll_interval: Duration::from_millis(self.input.poll_interval_ms),
            packet_size: self.stream.packet_size,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
