//! Headless collaborators.
//!
//! A software stand-in for the platform decoder and GL surface, so the
//! whole pipeline can run against a recorded stream without a GPU. The
//! decoder hands out textures from a fixed pool and the surface counts
//! presented frames.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use lumen_core::control::{PictureCallback, SwapCallback};
use lumen_core::render::ProgramId;
use lumen_core::video::decoder::{TEXTURE_2D, TEXTURE_EXTERNAL_OES, TEXTURE_RECTANGLE};
use lumen_core::video::nal::{NAL_HEADER_OFFSET, split_annex_b};
use lumen_core::video::{NalKind, PictureError, TextureSize, VideoProfile, parse_sps};
use lumen_core::{HttpClient, Pairing, Picture, RenderSurface, StreamError, VideoDecoder};

/// Log a summary every this many presented frames.
const PRESENT_LOG_INTERVAL: u64 = 600;

// ── HeadlessDecoder ──────────────────────────────────────────────

#[derive(Debug, Default)]
struct DecoderState {
    /// Textures not currently held by a picture.
    free: Vec<u32>,
    ready: VecDeque<Picture>,
    armed: Option<PictureCallback>,
    size: TextureSize,
    dropped: u64,
}

/// Produces one 2D picture per access unit carrying a coded slice.
#[derive(Debug)]
pub struct HeadlessDecoder {
    pool_size: u32,
    state: Mutex<DecoderState>,
    decoded: AtomicU64,
}

impl HeadlessDecoder {
    pub fn new(pool_size: u32, size: TextureSize) -> Self {
        Self {
            pool_size: pool_size.max(1),
            state: Mutex::new(DecoderState {
                free: (1..=pool_size.max(1)).collect(),
                size,
                ..DecoderState::default()
            }),
            decoded: AtomicU64::new(0),
        }
    }

    /// Access units that produced a picture.
    pub fn decoded(&self) -> u64 {
        self.decoded.load(Ordering::Relaxed)
    }

    /// Access units dropped because every texture was in use.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Textures currently held by the display side or the ready queue.
    pub fn outstanding(&self) -> u32 {
        self.pool_size - self.lock().free.len() as u32
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DecoderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Luma size in pixels, or `None` if it does not fit in `u32`.
fn picture_size(
    width_in_mbs: u32,
    height_in_map_units: u32,
    frame_mbs_only: bool,
) -> Option<TextureSize> {
    let field_factor = if frame_mbs_only { 1 } else { 2 };
    Some(TextureSize {
        width: width_in_mbs.checked_mul(16)?,
        height: height_in_map_units.checked_mul(16)?.checked_mul(field_factor)?,
    })
}

/// Returns whether the unit carries a coded slice, updating the picture
/// size from any SPS found on the way.
fn scan_access_unit(access_unit: &[u8], size: &mut TextureSize) -> bool {
    let mut has_slice = false;
    for nal in split_annex_b(access_unit) {
        let header = nal[NAL_HEADER_OFFSET];
        match NalKind::from_header(header) {
            NalKind::Sps => match parse_sps(&nal[NAL_HEADER_OFFSET..]) {
                Ok(sps) => match picture_size(
                    sps.width_in_mbs,
                    sps.height_in_map_units,
                    sps.frame_mbs_only,
                ) {
                    Some(parsed) if parsed != *size => {
                        debug!(
                            width = parsed.width,
                            height = parsed.height,
                            profile = sps.profile_idc,
                            "stream resolution"
                        );
                        *size = parsed;
                    }
                    Some(_) => {}
                    None => warn!(
                        width_in_mbs = sps.width_in_mbs,
                        height_in_map_units = sps.height_in_map_units,
                        "SPS dimensions overflow, keeping previous size"
                    ),
                },
                Err(e) => warn!("unparseable SPS: {e}"),
            },
            NalKind::Idr => has_slice = true,
            NalKind::Other(kind) if (1..=4).contains(&kind) => has_slice = true,
            _ => {}
        }
    }
    has_slice
}

impl VideoDecoder for HeadlessDecoder {
    fn initialize(&self, profile: VideoProfile) -> Result<(), StreamError> {
        info!(?profile, pool = self.pool_size, "headless decoder initialized");
        Ok(())
    }

    fn decode(&self, decode_id: u32, access_unit: &[u8]) -> Result<(), StreamError> {
        let mut state = self.lock();
        let mut size = state.size;
        let has_slice = scan_access_unit(access_unit, &mut size);
        state.size = size;
        if !has_slice {
            return Ok(());
        }

        let Some(texture_id) = state.free.pop() else {
            state.dropped += 1;
            debug!(decode_id, "no free texture, dropping picture");
            return Ok(());
        };
        self.decoded.fetch_add(1, Ordering::Relaxed);
        let picture = Picture {
            decode_id,
            texture_id,
            texture_target: TEXTURE_2D,
            texture_size: size,
        };
        match state.armed.take() {
            Some(ready) => {
                drop(state);
                ready.complete(Ok(picture));
            }
            None => state.ready.push_back(picture),
        }
        Ok(())
    }

    fn get_picture(&self, ready: PictureCallback) {
        let mut state = self.lock();
        match state.ready.pop_front() {
            Some(picture) => {
                drop(state);
                ready.complete(Ok(picture));
            }
            None => {
                if state.armed.replace(ready).is_some() {
                    warn!("picture callback re-armed before completion");
                }
            }
        }
    }

    fn recycle_picture(&self, picture: Picture) {
        if picture.is_bogus() {
            return;
        }
        let mut state = self.lock();
        if state.free.contains(&picture.texture_id) || picture.texture_id > self.pool_size {
            warn!(texture_id = picture.texture_id, "recycled unknown texture");
            return;
        }
        state.free.push(picture.texture_id);
    }

    fn flush(&self) {
        let mut state = self.lock();
        while let Some(picture) = state.ready.pop_front() {
            state.free.push(picture.texture_id);
        }
        let armed = state.armed.take();
        drop(state);
        if let Some(ready) = armed {
            ready.complete(Err(PictureError::Aborted));
        }
    }
}

// ── HeadlessSurface ──────────────────────────────────────────────

/// A surface with no output. Swaps complete immediately.
#[derive(Debug)]
pub struct HeadlessSurface {
    next_program: u32,
    bound: Option<(u32, u32)>,
    presented: Arc<AtomicU64>,
}

impl HeadlessSurface {
    pub fn new(presented: Arc<AtomicU64>) -> Self {
        Self {
            next_program: 1,
            bound: None,
            presented,
        }
    }
}

impl RenderSurface for HeadlessSurface {
    fn initialize(&mut self, width: u32, height: u32, vertices: &[f32]) -> Result<(), StreamError> {
        if vertices.len() % 4 != 0 {
            return Err(StreamError::Graphics(format!(
                "vertex buffer of {} floats is not a quad",
                vertices.len()
            )));
        }
        info!(width, height, "headless surface ready");
        self.bound = None;
        Ok(())
    }

    fn create_program(&mut self, _vertex: &str, _fragment: &str) -> Result<ProgramId, StreamError> {
        let id = ProgramId(self.next_program);
        self.next_program += 1;
        Ok(id)
    }

    fn use_program(&mut self, program: ProgramId, texcoord_scale: [f32; 2]) -> Result<(), StreamError> {
        debug!(program = program.0, ?texcoord_scale, "use program");
        Ok(())
    }

    fn bind_texture(&mut self, target: u32, texture_id: u32) -> Result<(), StreamError> {
        if !matches!(target, TEXTURE_2D | TEXTURE_RECTANGLE | TEXTURE_EXTERNAL_OES) {
            return Err(StreamError::Graphics(format!(
                "unsupported texture target {target:#x}"
            )));
        }
        self.bound = Some((target, texture_id));
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StreamError> {
        Ok(())
    }

    fn draw_quad(&mut self) -> Result<(), StreamError> {
        if self.bound.is_none() {
            return Err(StreamError::Graphics("draw with no texture bound".into()));
        }
        Ok(())
    }

    fn swap_buffers(&mut self, done: SwapCallback) -> Result<(), StreamError> {
        let presented = self.presented.fetch_add(1, Ordering::Relaxed) + 1;
        if presented % PRESENT_LOG_INTERVAL == 0 {
            info!(presented, "frames presented");
        }
        done.complete(());
        Ok(())
    }

    fn delete_program(&mut self, program: ProgramId) {
        debug!(program = program.0, "delete program");
    }
}

// ── Host services ────────────────────────────────────────────────

/// No HTTP stack in headless mode; every fetch is rejected.
#[derive(Debug, Default)]
pub struct OfflineHttp;

#[async_trait]
impl HttpClient for OfflineHttp {
    async fn get(&self, url: &str) -> Result<String, StreamError> {
        Err(StreamError::Http(format!("offline, cannot fetch {url}")))
    }
}

/// Pairing always fails with `-1`.
#[derive(Debug, Default)]
pub struct OfflinePairing;

#[async_trait]
impl Pairing for OfflinePairing {
    async fn pair(&self, server_major_version: i32, address: &str, _pin: &str) -> i32 {
        warn!(server_major_version, address, "pairing unavailable in headless mode");
        -1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::ControlEvent;
    use lumen_core::control::{Callback, DisplayEvent};
    use lumen_core::video::bitstream::{BitWriter, insert_emulation_prevention};
    use tokio::sync::mpsc;

    const IDR: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x21];
    const SEI: &[u8] = &[0, 0, 0, 1, 0x06, 0x05, 0x01, 0x80];

    fn size() -> TextureSize {
        TextureSize {
            width: 1280,
            height: 720,
        }
    }

    fn ready_picture(rx: &mut mpsc::UnboundedReceiver<ControlEvent>) -> Option<Result<Picture, PictureError>> {
        match rx.try_recv() {
            Ok(ControlEvent::Display(DisplayEvent::PictureReady(result))) => Some(result),
            _ => None,
        }
    }

    #[test]
    fn armed_callback_receives_next_picture() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let decoder = HeadlessDecoder::new(2, size());
        decoder.get_picture(Callback::picture_ready(tx));
        decoder.decode(3, IDR).unwrap();

        let picture = ready_picture(&mut rx).unwrap().unwrap();
        assert_eq!(picture.decode_id, 3);
        assert_eq!(picture.texture_target, TEXTURE_2D);
        assert_eq!(picture.texture_size, size());
        assert_eq!(decoder.outstanding(), 1);

        decoder.recycle_picture(picture);
        assert_eq!(decoder.outstanding(), 0);
    }

    #[test]
    fn picture_size_accounts_for_fields() {
        assert_eq!(picture_size(80, 45, true), Some(size()));
        assert_eq!(
            picture_size(80, 23, false),
            Some(TextureSize {
                width: 1280,
                height: 736
            })
        );
    }

    #[test]
    fn oversized_sps_dimensions_keep_previous_size() {
        assert_eq!(picture_size(u32::MAX, 45, true), None);
        assert_eq!(picture_size(80, u32::MAX / 16, false), None);

        // pic_width_in_mbs_minus1 = 2^31 parses but overflows at 16 px per MB.
        let mut w = BitWriter::new();
        w.write_bits(66, 8);
        w.write_bits(0, 8);
        w.write_bits(31, 8);
        w.write_ue(0);
        w.write_ue(0);
        w.write_ue(2);
        w.write_ue(1);
        w.write_bit(false);
        w.write_ue(1 << 31);
        w.write_ue(44);
        w.write_bit(true);
        w.write_bit(true);
        w.write_bit(false);
        w.write_bit(false);
        let mut unit = vec![0, 0, 0, 1, 0x67];
        unit.extend_from_slice(&insert_emulation_prevention(&w.finish_rbsp()));
        unit.extend_from_slice(IDR);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let decoder = HeadlessDecoder::new(2, size());
        decoder.get_picture(Callback::picture_ready(tx));
        decoder.decode(0, &unit).unwrap();
        let picture = ready_picture(&mut rx).unwrap().unwrap();
        assert_eq!(picture.texture_size, size());
    }

    #[test]
    fn units_without_slices_produce_nothing() {
        let decoder = HeadlessDecoder::new(2, size());
        decoder.decode(0, SEI).unwrap();
        assert_eq!(decoder.decoded(), 0);
        assert_eq!(decoder.outstanding(), 0);
    }

    #[test]
    fn exhausted_pool_drops_pictures() {
        let decoder = HeadlessDecoder::new(1, size());
        decoder.decode(0, IDR).unwrap();
        decoder.decode(1, IDR).unwrap();
        assert_eq!(decoder.decoded(), 1);
        assert_eq!(decoder.dropped(), 1);
    }

    #[test]
    fn flush_aborts_armed_wait_and_reclaims_ready() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let decoder = HeadlessDecoder::new(2, size());
        decoder.decode(0, IDR).unwrap();
        decoder.flush();
        assert_eq!(decoder.outstanding(), 0);

        decoder.get_picture(Callback::picture_ready(tx));
        decoder.flush();
        assert_eq!(ready_picture(&mut rx), Some(Err(PictureError::Aborted)));
    }

    #[test]
    fn surface_rejects_unknown_target_and_counts_swaps() {
        let presented = Arc::new(AtomicU64::new(0));
        let mut surface = HeadlessSurface::new(presented.clone());
        assert!(surface.bind_texture(0x1234, 1).is_err());
        assert!(surface.draw_quad().is_err());

        surface.bind_texture(TEXTURE_2D, 1).unwrap();
        surface.draw_quad().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        surface.swap_buffers(Callback::swap_complete(tx)).unwrap();
        assert_eq!(presented.load(Ordering::Relaxed), 1);
        assert!(matches!(
            rx.try_recv(),
            Ok(ControlEvent::Display(DisplayEvent::SwapComplete))
        ));
    }

    #[tokio::test]
    async fn offline_services_fail() {
        assert!(OfflineHttp.get("http://host/serverinfo").await.is_err());
        assert_eq!(OfflinePairing.pair(7, "10.0.0.2", "1234").await, -1);
    }
}
