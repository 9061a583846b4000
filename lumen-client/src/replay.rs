//! Annex-B replay transport.
//!
//! Plays a recorded H.264 elementary stream into the pipeline as if it
//! arrived from a host: access units are fragmented the way the network
//! layer would deliver them and paced at the negotiated frame rate on a
//! dedicated receipt thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use lumen_core::session::{
    ConnectionCallbacks, ConnectionListener, DecoderRenderer, DecoderSetup, StreamConfig,
    SubmitStatus, Transport, VideoFormat,
};
use lumen_core::video::nal::{NAL_HEADER_OFFSET, split_annex_b};
use lumen_core::video::{DecodeUnit, NalKind};

use crate::config::ReplaySection;

/// The stream file could not be read or held no NAL units.
pub const ERROR_NO_STREAM: i32 = -1;
/// The decoder refused setup.
pub const ERROR_DECODER_SETUP: i32 = -2;
/// The receipt thread could not be spawned.
pub const ERROR_THREAD: i32 = -3;
/// The connection was stopped before playback began.
pub const ERROR_CANCELLED: i32 = -4;

// ── Access units ─────────────────────────────────────────────────

fn nal_type(nal: &[u8]) -> u8 {
    nal.get(NAL_HEADER_OFFSET).map_or(0, |header| header & 0x1F)
}

fn is_slice(nal: &[u8]) -> bool {
    (1..=5).contains(&nal_type(nal))
}

/// `first_mb_in_slice == 0` encodes as a single set bit.
fn starts_picture(nal: &[u8]) -> bool {
    nal.get(NAL_HEADER_OFFSET + 1).is_some_and(|b| b & 0x80 != 0)
}

/// Group an Annex-B stream into decode units.
///
/// Parameter sets and other non-slice NAL units travel alone; the slices
/// of one picture are concatenated into a single unit.
pub fn access_units(stream: &[u8]) -> Vec<Bytes> {
    let mut units = Vec::new();
    let mut picture: Vec<u8> = Vec::new();

    for nal in split_annex_b(stream) {
        if is_slice(&nal) {
            if !picture.is_empty() && starts_picture(&nal) {
                units.push(Bytes::from(std::mem::take(&mut picture)));
            }
            picture.extend_from_slice(&nal);
        } else {
            if !picture.is_empty() {
                units.push(Bytes::from(std::mem::take(&mut picture)));
            }
            units.push(Bytes::from(nal));
        }
    }
    if !picture.is_empty() {
        units.push(Bytes::from(picture));
    }
    units
}

/// Split a unit into transport-sized fragments. Parameter sets are
/// always delivered whole.
pub fn fragment(unit: &Bytes, fragment_size: usize) -> Vec<Bytes> {
    if NalKind::classify(unit).is_parameter_set() || fragment_size == 0 {
        return vec![unit.clone()];
    }
    (0..unit.len())
        .step_by(fragment_size)
        .map(|offset| unit.slice(offset..(offset + fragment_size).min(unit.len())))
        .collect()
}

// ── Playback ─────────────────────────────────────────────────────

struct Playback {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

struct Player {
    units: Vec<Bytes>,
    decoder: Box<dyn DecoderRenderer>,
    listener: Arc<dyn ConnectionListener>,
    stop: Arc<AtomicBool>,
    fragment_size: usize,
    loop_playback: bool,
    frame_interval: Duration,
}

impl Player {
    fn run(mut self) {
        let mut frame_number = 0u32;
        let mut awaiting_idr = false;
        let mut next_frame = Instant::now();
        let mut finished = false;

        'playback: loop {
            for unit in &self.units {
                if self.stop.load(Ordering::SeqCst) {
                    break 'playback;
                }
                let kind = NalKind::classify(unit);
                let picture = is_slice(unit);
                if awaiting_idr && picture && kind != NalKind::Idr {
                    continue;
                }
                if picture {
                    let now = Instant::now();
                    if next_frame > now {
                        thread::sleep(next_frame - now);
                    }
                    next_frame = next_frame.max(now) + self.frame_interval;
                }

                let fragments = fragment(unit, self.fragment_size);
                let status = self
                    .decoder
                    .submit_decode_unit(&DecodeUnit::new(frame_number, &fragments));
                frame_number = frame_number.wrapping_add(1);

                match status {
                    SubmitStatus::Ok if kind == NalKind::Idr => awaiting_idr = false,
                    SubmitStatus::Ok => {}
                    SubmitStatus::NeedIdr => {
                        if !awaiting_idr {
                            debug!(frame_number, "keyframe requested, skipping to next IDR");
                        }
                        awaiting_idr = true;
                    }
                }
            }
            if !self.loop_playback {
                finished = true;
                break;
            }
            debug!("replay looped");
        }

        self.decoder.cleanup();
        if finished {
            info!(frames = frame_number, "replay finished");
            self.listener.connection_terminated(0);
        }
    }
}

// ── ReplayTransport ──────────────────────────────────────────────

/// Where the transport is in its connect/stop cycle.
///
/// `stop_connection` may run on another thread before, during or after
/// `start_connection`, so a stop is recorded in whatever state it finds.
#[derive(Default)]
enum Link {
    #[default]
    Idle,
    /// A stop arrived before the start it belongs to.
    StopPending,
    Connecting {
        cancelled: bool,
    },
    Playing(Playback),
    /// The last start failed and no stop has consumed it yet.
    Failed,
}

/// A [`Transport`] that streams a recorded file.
pub struct ReplayTransport {
    settings: ReplaySection,
    link: Mutex<Link>,
}

impl ReplayTransport {
    pub fn new(settings: ReplaySection) -> Self {
        Self {
            settings,
            link: Mutex::new(Link::Idle),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn join(playback: Playback) {
        playback.stop.store(true, Ordering::SeqCst);
        if playback.thread.join().is_err() {
            warn!("replay thread panicked");
        }
    }

    /// Enter `Connecting`, or report that this start was already stopped.
    fn begin_connect(&self) -> bool {
        let mut link = self.lock();
        let previous = match std::mem::take(&mut *link) {
            Link::StopPending => {
                debug!("replay stopped before it started");
                return false;
            }
            // A playback that ran to completion still holds its thread.
            Link::Playing(playback) => Some(playback),
            Link::Idle | Link::Failed | Link::Connecting { .. } => None,
        };
        *link = Link::Connecting { cancelled: false };
        drop(link);

        if let Some(playback) = previous {
            Self::join(playback);
        }
        true
    }

    /// Record a failed start. A stop that already arrived is consumed.
    fn connect_failed(&self, code: i32) -> i32 {
        let mut link = self.lock();
        *link = match *link {
            Link::Connecting { cancelled: true } => Link::Idle,
            _ => Link::Failed,
        };
        code
    }
}

impl Transport for ReplayTransport {
    fn start_connection(
        &self,
        host: &str,
        config: &StreamConfig,
        callbacks: ConnectionCallbacks,
        server_major_version: i32,
    ) -> i32 {
        if !self.begin_connect() {
            return ERROR_CANCELLED;
        }

        let path = &self.settings.file;
        let units = match std::fs::read(path) {
            Ok(stream) => access_units(&stream),
            Err(e) => {
                warn!("cannot read {}: {e}", path.display());
                return self.connect_failed(ERROR_NO_STREAM);
            }
        };
        if units.is_empty() {
            warn!("{} holds no NAL units", path.display());
            return self.connect_failed(ERROR_NO_STREAM);
        }
        info!(
            host,
            server_major_version,
            units = units.len(),
            "replaying {}",
            path.display()
        );

        let ConnectionCallbacks {
            listener,
            mut decoder,
        } = callbacks;
        listener.display_message(&format!("Replaying {}", path.display()));

        let setup = DecoderSetup {
            format: VideoFormat::H264,
            width: config.width,
            height: config.height,
            redraw_rate: config.fps,
            flags: 0,
        };
        if let Err(e) = decoder.setup(&setup) {
            warn!("decoder setup failed: {e}");
            return self.connect_failed(ERROR_DECODER_SETUP);
        }
        debug!(
            slices = decoder.capabilities().slices_per_frame(),
            "decoder capabilities"
        );

        // Checked and installed under one lock so a concurrent stop either
        // cancels here or finds the playback to join.
        let mut link = self.lock();
        if matches!(*link, Link::Connecting { cancelled: true }) {
            *link = Link::Idle;
            drop(link);
            debug!("replay stopped during connect");
            decoder.cleanup();
            return ERROR_CANCELLED;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let player = Player {
            units,
            decoder,
            listener: listener.clone(),
            stop: stop.clone(),
            fragment_size: self.settings.fragment_size,
            loop_playback: self.settings.loop_playback,
            frame_interval: Duration::from_secs(1) / config.fps.max(1),
        };
        let thread = match thread::Builder::new()
            .name("lumen-replay".into())
            .spawn(move || player.run())
        {
            Ok(thread) => thread,
            Err(e) => {
                drop(link);
                warn!("cannot spawn replay thread: {e}");
                return self.connect_failed(ERROR_THREAD);
            }
        };
        *link = Link::Playing(Playback { stop, thread });
        drop(link);

        listener.connection_started();
        0
    }

    fn stop_connection(&self) {
        let mut link = self.lock();
        let playback = match std::mem::take(&mut *link) {
            Link::Idle | Link::StopPending => {
                *link = Link::StopPending;
                None
            }
            Link::Connecting { .. } => {
                *link = Link::Connecting { cancelled: true };
                None
            }
            Link::Playing(playback) => Some(playback),
            Link::Failed => None,
        };
        drop(link);

        if let Some(playback) = playback {
            Self::join(playback);
            debug!("replay stopped");
        }
    }
}
