//! Decoder submission gate.
//!
//! The transport calls [`SubmissionGate::submit_decode_unit`] once per
//! access unit from its receipt thread. The gate consumes parameter
//! sets into its cache, injects them ahead of IDR frames, flattens the
//! unit into the scratch buffer and queues it on the decoder. It never
//! blocks and never waits on the decoder.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::control::{ControlEvent, ControlSender, DisplayEvent};
use crate::error::StreamError;
use crate::session::transport::{
    Capabilities, DecoderRenderer, DecoderSetup, SLICES_PER_FRAME, SubmitStatus,
};
use crate::video::buffer::{DecodeBuffer, ParameterSetCache};
use crate::video::decoder::{VideoDecoder, VideoProfile};
use crate::video::nal::{MAX_PARAMETER_SET_LEN, NAL_HEADER_OFFSET, NalKind};
use crate::video::sps::rewrite_sps;
use crate::video::unit::DecodeUnit;

/// Per-session decode state, rebuilt at every decoder setup.
#[derive(Debug)]
pub struct DecodeContext {
    pub cache: ParameterSetCache,
    pub buffer: DecodeBuffer,
    /// Submission number for the next decoder call.
    pub next_decode_id: u32,
}

impl DecodeContext {
    pub fn new(initial_buffer_len: usize) -> Self {
        Self {
            cache: ParameterSetCache::new(),
            buffer: DecodeBuffer::with_capacity(initial_buffer_len),
            next_decode_id: 0,
        }
    }
}

/// What the gate did with a decode unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// A key frame was requested; nothing was classified or submitted.
    NeedKeyframe,
    /// A parameter set was cached; nothing was submitted.
    Cached(NalKind),
    Submitted { decode_id: u32, len: usize },
    /// The decoder refused the access unit.
    Rejected,
}

impl Submission {
    pub fn status(self) -> SubmitStatus {
        match self {
            Submission::NeedKeyframe | Submission::Rejected => SubmitStatus::NeedIdr,
            Submission::Cached(_) | Submission::Submitted { .. } => SubmitStatus::Ok,
        }
    }
}

pub struct SubmissionGate {
    decoder: Arc<dyn VideoDecoder>,
    request_idr: Arc<AtomicBool>,
    events: ControlSender,
    initial_buffer_len: usize,
    ctx: DecodeContext,
}

impl SubmissionGate {
    pub fn new(
        decoder: Arc<dyn VideoDecoder>,
        request_idr: Arc<AtomicBool>,
        events: ControlSender,
        initial_buffer_len: usize,
    ) -> Self {
        Self {
            decoder,
            request_idr,
            events,
            initial_buffer_len,
            ctx: DecodeContext::new(initial_buffer_len),
        }
    }

    pub fn context(&self) -> &DecodeContext {
        &self.ctx
    }

    pub fn submit(&mut self, unit: &DecodeUnit<'_>) -> Submission {
        if self.request_idr.swap(false, Ordering::SeqCst) {
            debug!(frame = unit.frame_number, "requesting key frame");
            return Submission::NeedKeyframe;
        }

        let kind = NalKind::classify(unit.first_fragment());
        if kind.is_parameter_set() {
            self.cache_parameter_set(kind, unit);
            return Submission::Cached(kind);
        }

        let key_frame = kind == NalKind::Idr;
        let decode_id = self.ctx.next_decode_id;
        let flat = self.ctx.buffer.flatten(unit, key_frame, &self.ctx.cache);
        let len = flat.len();

        match self.decoder.decode(decode_id, flat) {
            Ok(()) => {
                self.ctx.next_decode_id = self.ctx.next_decode_id.wrapping_add(1);
                Submission::Submitted { decode_id, len }
            }
            Err(e) => {
                warn!(frame = unit.frame_number, "decoder rejected access unit: {e}");
                Submission::Rejected
            }
        }
    }

    fn cache_parameter_set(&mut self, kind: NalKind, unit: &DecodeUnit<'_>) {
        let fragment = unit.first_fragment();
        assert!(
            unit.is_single_fragment() && fragment.len() == unit.full_length,
            "parameter set split across fragments"
        );
        assert!(
            unit.full_length < MAX_PARAMETER_SET_LEN,
            "parameter set of {} bytes exceeds cache capacity",
            unit.full_length
        );

        if kind == NalKind::Sps {
            let nal = &fragment[NAL_HEADER_OFFSET..];
            match rewrite_sps(nal) {
                Ok(rewritten) => self.ctx.cache.store_sps(&rewritten),
                Err(e) => {
                    warn!("caching SPS unmodified: {e}");
                    self.ctx.cache.store_sps(nal);
                }
            }
        } else {
            self.ctx.cache.store_pps(fragment);
        }
    }
}

impl DecoderRenderer for SubmissionGate {
    fn setup(&mut self, params: &DecoderSetup) -> Result<(), StreamError> {
        info!(
            width = params.width,
            height = params.height,
            redraw_rate = params.redraw_rate,
            "decoder setup"
        );
        self.ctx = DecodeContext::new(self.initial_buffer_len);
        self.decoder.initialize(VideoProfile::H264High)?;
        self.events
            .send(ControlEvent::Display(DisplayEvent::DecoderReady))?;
        Ok(())
    }

    fn cleanup(&mut self) {
        debug!("decoder cleanup");
        self.decoder.flush();
        self.ctx = DecodeContext::new(0);
        if self
            .events
            .send(ControlEvent::Display(DisplayEvent::DecoderCleanup))
            .is_err()
        {
            debug!("control loop gone before decoder cleanup");
        }
    }

    fn submit_decode_unit(&mut self, unit: &DecodeUnit<'_>) -> SubmitStatus {
        self.submit(unit).status()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::empty().with_slices_per_frame(SLICES_PER_FRAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDecoder;
    use crate::video::buffer::INITIAL_DECODE_BUFFER_LEN;
    use crate::video::sps::{
        parse_sps,
        tests::{build_scaled_sps, build_sps},
    };
    use crate::video::nal::START_CODE;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    struct Harness {
        gate: SubmissionGate,
        decoder: Arc<FakeDecoder>,
        request_idr: Arc<AtomicBool>,
        events: mpsc::UnboundedReceiver<ControlEvent>,
    }

    fn harness(initial: usize) -> Harness {
        let decoder = FakeDecoder::new();
        let request_idr = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = SubmissionGate::new(decoder.clone(), request_idr.clone(), tx, initial);
        Harness {
            gate,
            decoder,
            request_idr,
            events: rx,
        }
    }

    fn annex_b(nal: &[u8]) -> Bytes {
        let mut v = START_CODE.to_vec();
        v.extend_from_slice(nal);
        Bytes::from(v)
    }

    fn submit(gate: &mut SubmissionGate, frame: u32, fragments: &[Bytes]) -> Submission {
        gate.submit(&DecodeUnit::new(frame, fragments))
    }

    #[test]
    fn parameter_sets_then_idr_are_flattened_in_order() {
        let mut h = harness(INITIAL_DECODE_BUFFER_LEN);
        let sps = annex_b(&build_sps(4, Some(4)));
        let pps = annex_b(&[0x68, 0xEE, 0x3C, 0x80]);
        let idr = [annex_b(&[0x65, 0x88, 0x84]), Bytes::from_static(&[1, 2, 3, 4])];

        assert_eq!(submit(&mut h.gate, 0, &[sps]), Submission::Cached(NalKind::Sps));
        assert_eq!(submit(&mut h.gate, 1, &[pps.clone()]), Submission::Cached(NalKind::Pps));
        assert!(h.decoder.decoded_ids().is_empty());

        let cached_sps = h.gate.context().cache.sps().to_vec();
        assert_eq!(&cached_sps[..4], &START_CODE);
        let summary = parse_sps(&cached_sps[4..]).unwrap();
        assert_eq!(summary.max_num_ref_frames, 1);
        assert_eq!(summary.max_dec_frame_buffering, Some(1));
        assert_eq!(h.gate.context().cache.pps(), pps.as_ref());

        let status = submit(&mut h.gate, 2, &idr);
        assert!(matches!(status, Submission::Submitted { decode_id: 0, .. }));

        let mut expected = cached_sps;
        expected.extend_from_slice(&pps);
        expected.extend_from_slice(&idr[0]);
        expected.extend_from_slice(&idr[1]);
        assert_eq!(h.decoder.decoded_ids(), vec![0]);
        assert_eq!(h.decoder.decoded(0), expected);
    }

    #[test]
    fn non_idr_units_pass_through_and_count_up() {
        let mut h = harness(INITIAL_DECODE_BUFFER_LEN);
        h.gate.submit(&DecodeUnit::new(0, &[annex_b(&build_sps(1, None))]));

        let p = [annex_b(&[0x41, 0x9A, 0x00])];
        submit(&mut h.gate, 1, &p);
        submit(&mut h.gate, 2, &p);

        assert_eq!(h.decoder.decoded_ids(), vec![0, 1]);
        assert_eq!(h.decoder.decoded(1), p[0].to_vec());
    }

    #[test]
    fn short_first_fragment_is_not_classified() {
        let mut h = harness(INITIAL_DECODE_BUFFER_LEN);
        let tiny = [Bytes::from_static(&[0, 0, 0, 1, 0x67])];
        assert!(matches!(
            submit(&mut h.gate, 0, &tiny),
            Submission::Submitted { .. }
        ));
        assert!(h.gate.context().cache.sps().is_empty());
    }

    #[test]
    fn keyframe_request_short_circuits_exactly_once() {
        let mut h = harness(0);
        h.request_idr.store(true, Ordering::SeqCst);

        let sps = [annex_b(&build_sps(2, None))];
        assert_eq!(submit(&mut h.gate, 0, &sps), Submission::NeedKeyframe);
        assert_eq!(
            h.gate.submit_decode_unit(&DecodeUnit::new(0, &sps)),
            SubmitStatus::Ok
        );
        assert!(!h.request_idr.load(Ordering::SeqCst));
    }

    #[test]
    fn keyframe_request_leaves_cache_and_buffer_untouched() {
        let mut h = harness(0);
        h.request_idr.store(true, Ordering::SeqCst);

        let idr = [annex_b(&[0x65, 1, 2, 3, 4, 5])];
        assert_eq!(
            h.gate.submit_decode_unit(&DecodeUnit::new(7, &idr)),
            SubmitStatus::NeedIdr
        );
        assert_eq!(h.gate.context().buffer.capacity(), 0);
        assert_eq!(h.gate.context().cache.prefix_len(), 0);
        assert_eq!(h.gate.context().next_decode_id, 0);
        assert!(h.decoder.decoded_ids().is_empty());
    }

    #[test]
    fn malformed_sps_is_cached_verbatim() {
        let mut h = harness(INITIAL_DECODE_BUFFER_LEN);
        let bad = [annex_b(&[0x67, 0x64, 0x00])];
        submit(&mut h.gate, 0, &bad);
        assert_eq!(h.gate.context().cache.sps(), bad[0].as_ref());
    }

    #[test]
    fn sps_with_out_of_range_scaling_delta_is_cached_verbatim() {
        let mut h = harness(INITIAL_DECODE_BUFFER_LEN);
        let hostile = [annex_b(&build_scaled_sps(i32::MAX))];
        assert_eq!(
            submit(&mut h.gate, 0, &hostile),
            Submission::Cached(NalKind::Sps)
        );
        assert_eq!(h.gate.context().cache.sps(), hostile[0].as_ref());
    }

    #[test]
    #[should_panic(expected = "split across fragments")]
    fn fragmented_parameter_set_is_fatal() {
        let mut h = harness(INITIAL_DECODE_BUFFER_LEN);
        let split = [annex_b(&[0x68, 0xEE]), Bytes::from_static(&[0x3C, 0x80])];
        submit(&mut h.gate, 0, &split);
    }

    #[test]
    #[should_panic(expected = "exceeds cache capacity")]
    fn oversized_parameter_set_is_fatal() {
        let mut h = harness(INITIAL_DECODE_BUFFER_LEN);
        let mut pps = vec![0x68];
        pps.resize(300, 0xAB);
        submit(&mut h.gate, 0, &[annex_b(&pps)]);
    }

    #[test]
    fn rejected_decode_requests_idr() {
        let mut h = harness(INITIAL_DECODE_BUFFER_LEN);
        h.decoder.reject_decode.store(true, Ordering::SeqCst);
        let p = [annex_b(&[0x41, 0x9A, 0x00])];
        assert_eq!(
            h.gate.submit_decode_unit(&DecodeUnit::new(0, &p)),
            SubmitStatus::NeedIdr
        );
        assert_eq!(h.gate.context().next_decode_id, 0);
    }

    #[test]
    fn setup_resets_context_and_signals_display() {
        let mut h = harness(64);
        submit(&mut h.gate, 0, &[annex_b(&[0x41, 0x9A, 0x00])]);

        let params = DecoderSetup {
            format: crate::session::transport::VideoFormat::H264,
            width: 1280,
            height: 720,
            redraw_rate: 60,
            flags: 0,
        };
        h.gate.setup(&params).unwrap();

        assert_eq!(h.gate.context().next_decode_id, 0);
        assert_eq!(h.gate.context().buffer.capacity(), 64);
        assert_eq!(h.decoder.log.lock().unwrap().initialized, 1);
        assert!(matches!(
            h.events.try_recv(),
            Ok(ControlEvent::Display(DisplayEvent::DecoderReady))
        ));
    }

    #[test]
    fn cleanup_flushes_and_frees_buffer() {
        let mut h = harness(INITIAL_DECODE_BUFFER_LEN);
        h.gate.cleanup();
        assert_eq!(h.decoder.log.lock().unwrap().flushes, 1);
        assert_eq!(h.gate.context().buffer.capacity(), 0);
        assert!(matches!(
            h.events.try_recv(),
            Ok(ControlEvent::Display(DisplayEvent::DecoderCleanup))
        ));
    }

    #[test]
    fn advertises_four_slices() {
        let h = harness(0);
        assert_eq!(h.gate.capabilities().slices_per_frame(), 4);
    }
}
