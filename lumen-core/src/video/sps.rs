//! Sequence parameter set rewriting.
//!
//! Some hardware decoders only run in their low-latency mode when the
//! stream promises a single reference frame and a one-picture decoded
//! picture buffer. [`rewrite_sps`] copies a `seq_parameter_set_rbsp`
//! through a [`BitReader`]/[`BitWriter`] pair, forcing
//! `max_num_ref_frames = 1` and, when the VUI carries bitstream
//! restrictions, `max_dec_frame_buffering = 1`.

use crate::error::StreamError;
use crate::video::bitstream::{
    BitReader, BitWriter, insert_emulation_prevention, strip_emulation_prevention,
};
use crate::video::nal::NalKind;

/// Fields of interest observed while copying an SPS through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpsSummary {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub seq_parameter_set_id: u32,
    pub max_num_ref_frames: u32,
    pub width_in_mbs: u32,
    pub height_in_map_units: u32,
    pub frame_mbs_only: bool,
    /// `None` when the VUI or its bitstream restriction block is absent.
    pub max_dec_frame_buffering: Option<u32>,
}

/// Values to force while copying.
#[derive(Debug, Clone, Copy)]
struct Overrides {
    max_num_ref_frames: Option<u32>,
    max_dec_frame_buffering: Option<u32>,
}

/// Rewrite an SPS NAL unit (header byte included, no start code) for
/// minimal decoder buffering. Returns the re-encoded NAL unit with the
/// original header byte.
pub fn rewrite_sps(nal: &[u8]) -> Result<Vec<u8>, StreamError> {
    let (bytes, _) = transcode(
        nal,
        Overrides {
            max_num_ref_frames: Some(1),
            max_dec_frame_buffering: Some(1),
        },
    )?;
    Ok(bytes)
}

/// Parse an SPS NAL unit (header byte included) without changing it.
pub fn parse_sps(nal: &[u8]) -> Result<SpsSummary, StreamError> {
    let (_, summary) = transcode(
        nal,
        Overrides {
            max_num_ref_frames: None,
            max_dec_frame_buffering: None,
        },
    )?;
    Ok(summary)
}

fn transcode(nal: &[u8], overrides: Overrides) -> Result<(Vec<u8>, SpsSummary), StreamError> {
    let header = *nal.first().ok_or(StreamError::Truncated("nal_unit_header"))?;
    if NalKind::from_header(header) != NalKind::Sps {
        return Err(StreamError::UnexpectedNalType {
            expected: NalKind::SPS_TYPE,
            actual: header & 0x1F,
        });
    }

    let rbsp = strip_emulation_prevention(&nal[1..]);
    let mut copy = Copier {
        r: BitReader::new(&rbsp),
        w: BitWriter::new(),
    };
    let summary = copy.seq_parameter_set(overrides)?;

    let mut out = vec![header];
    out.extend_from_slice(&insert_emulation_prevention(&copy.w.finish_rbsp()));
    Ok((out, summary))
}

// ── Copier ───────────────────────────────────────────────────────

/// Reads syntax elements and writes them straight back.
struct Copier<'a> {
    r: BitReader<'a>,
    w: BitWriter,
}

impl Copier<'_> {
    fn flag(&mut self, name: &'static str) -> Result<bool, StreamError> {
        let v = self.r.read_bit(name)?;
        self.w.write_bit(v);
        Ok(v)
    }

    fn bits(&mut self, count: u32, name: &'static str) -> Result<u32, StreamError> {
        let v = self.r.read_bits(count, name)?;
        self.w.write_bits(v, count);
        Ok(v)
    }

    fn ue(&mut self, name: &'static str) -> Result<u32, StreamError> {
        let v = self.r.read_ue(name)?;
        self.w.write_ue(v);
        Ok(v)
    }

    fn se(&mut self, name: &'static str) -> Result<i32, StreamError> {
        let v = self.r.read_se(name)?;
        self.w.write_se(v);
        Ok(v)
    }

    /// Read a `ue(v)` and write `forced` in its place when set.
    fn ue_forced(&mut self, forced: Option<u32>, name: &'static str) -> Result<u32, StreamError> {
        let v = self.r.read_ue(name)?;
        let out = forced.unwrap_or(v);
        self.w.write_ue(out);
        Ok(out)
    }

    fn seq_parameter_set(&mut self, overrides: Overrides) -> Result<SpsSummary, StreamError> {
        let mut s = SpsSummary {
            profile_idc: self.bits(8, "profile_idc")? as u8,
            ..SpsSummary::default()
        };
        self.bits(8, "constraint_set_flags")?;
        s.level_idc = self.bits(8, "level_idc")? as u8;
        s.seq_parameter_set_id = self.ue("seq_parameter_set_id")?;

        if has_chroma_info(s.profile_idc) {
            let chroma_format_idc = self.ue("chroma_format_idc")?;
            if chroma_format_idc == 3 {
                self.flag("separate_colour_plane_flag")?;
            }
            self.ue("bit_depth_luma_minus8")?;
            self.ue("bit_depth_chroma_minus8")?;
            self.flag("qpprime_y_zero_transform_bypass_flag")?;
            if self.flag("seq_scaling_matrix_present_flag")? {
                let lists = if chroma_format_idc == 3 { 12 } else { 8 };
                for i in 0..lists {
                    if self.flag("seq_scaling_list_present_flag")? {
                        self.scaling_list(if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        self.ue("log2_max_frame_num_minus4")?;
        match self.ue("pic_order_cnt_type")? {
            0 => {
                self.ue("log2_max_pic_order_cnt_lsb_minus4")?;
            }
            1 => {
                self.flag("delta_pic_order_always_zero_flag")?;
                self.se("offset_for_non_ref_pic")?;
                self.se("offset_for_top_to_bottom_field")?;
                let cycle = self.ue("num_ref_frames_in_pic_order_cnt_cycle")?;
                for _ in 0..cycle {
                    self.se("offset_for_ref_frame")?;
                }
            }
            _ => {}
        }

        s.max_num_ref_frames = self.ue_forced(overrides.max_num_ref_frames, "max_num_ref_frames")?;
        self.flag("gaps_in_frame_num_value_allowed_flag")?;
        s.width_in_mbs = self.ue("pic_width_in_mbs_minus1")? + 1;
        s.height_in_map_units = self.ue("pic_height_in_map_units_minus1")? + 1;
        s.frame_mbs_only = self.flag("frame_mbs_only_flag")?;
        if !s.frame_mbs_only {
            self.flag("mb_adaptive_frame_field_flag")?;
        }
        self.flag("direct_8x8_inference_flag")?;
        if self.flag("frame_cropping_flag")? {
            self.ue("frame_crop_left_offset")?;
            self.ue("frame_crop_right_offset")?;
            self.ue("frame_crop_top_offset")?;
            self.ue("frame_crop_bottom_offset")?;
        }
        if self.flag("vui_parameters_present_flag")? {
            s.max_dec_frame_buffering = self.vui_parameters(overrides)?;
        }
        Ok(s)
    }

    fn scaling_list(&mut self, size: usize) -> Result<(), StreamError> {
        let mut last_scale = 8i32;
        let mut next_scale = 8i32;
        for _ in 0..size {
            if next_scale != 0 {
                let delta = self.se("delta_scale")?;
                if !(-128..=127).contains(&delta) {
                    return Err(StreamError::OutOfRange {
                        element: "delta_scale",
                        value: delta.into(),
                    });
                }
                next_scale = (last_scale + delta).rem_euclid(256);
            }
            if next_scale != 0 {
                last_scale = next_scale;
            }
        }
        Ok(())
    }

    fn vui_parameters(&mut self, overrides: Overrides) -> Result<Option<u32>, StreamError> {
        if self.flag("aspect_ratio_info_present_flag")? {
            const EXTENDED_SAR: u32 = 255;
            if self.bits(8, "aspect_ratio_idc")? == EXTENDED_SAR {
                self.bits(16, "sar_width")?;
                self.bits(16, "sar_height")?;
            }
        }
        if self.flag("overscan_info_present_flag")? {
            self.flag("overscan_appropriate_flag")?;
        }
        if self.flag("video_signal_type_present_flag")? {
            self.bits(3, "video_format")?;
            self.flag("video_full_range_flag")?;
            if self.flag("colour_description_present_flag")? {
                self.bits(8, "colour_primaries")?;
                self.bits(8, "transfer_characteristics")?;
                self.bits(8, "matrix_coefficients")?;
            }
        }
        if self.flag("chroma_loc_info_present_flag")? {
            self.ue("chroma_sample_loc_type_top_field")?;
            self.ue("chroma_sample_loc_type_bottom_field")?;
        }
        if self.flag("timing_info_present_flag")? {
            self.bits(32, "num_units_in_tick")?;
            self.bits(32, "time_scale")?;
            self.flag("fixed_frame_rate_flag")?;
        }
        let nal_hrd = self.flag("nal_hrd_parameters_present_flag")?;
        if nal_hrd {
            self.hrd_parameters()?;
        }
        let vcl_hrd = self.flag("vcl_hrd_parameters_present_flag")?;
        if vcl_hrd {
            self.hrd_parameters()?;
        }
        if nal_hrd || vcl_hrd {
            self.flag("low_delay_hrd_flag")?;
        }
        self.flag("pic_struct_present_flag")?;
        if !self.flag("bitstream_restriction_flag")? {
            return Ok(None);
        }
        self.flag("motion_vectors_over_pic_boundaries_flag")?;
        self.ue("max_bytes_per_pic_denom")?;
        self.ue("max_bits_per_mb_denom")?;
        self.ue("log2_max_mv_length_horizontal")?;
        self.ue("log2_max_mv_length_vertical")?;
        self.ue("max_num_reorder_frames")?;
        let buffering =
            self.ue_forced(overrides.max_dec_frame_buffering, "max_dec_frame_buffering")?;
        Ok(Some(buffering))
    }

    fn hrd_parameters(&mut self) -> Result<(), StreamError> {
        let cpb_cnt = self.ue("cpb_cnt_minus1")? + 1;
        self.bits(4, "bit_rate_scale")?;
        self.bits(4, "cpb_size_scale")?;
        for _ in 0..cpb_cnt {
            self.ue("bit_rate_value_minus1")?;
            self.ue("cpb_size_value_minus1")?;
            self.flag("cbr_flag")?;
        }
        self.bits(5, "initial_cpb_removal_delay_length_minus1")?;
        self.bits(5, "cpb_removal_delay_length_minus1")?;
        self.bits(5, "dpb_output_delay_length_minus1")?;
        self.bits(5, "time_offset_length")?;
        Ok(())
    }
}

/// Profiles whose SPS carries `chroma_format_idc` and friends.
fn has_chroma_info(profile_idc: u8) -> bool {
    matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    )
}
