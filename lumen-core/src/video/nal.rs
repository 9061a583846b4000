//! NAL unit classification for Annex-B framed decode units.
//!
//! Every decode unit delivered by the transport begins with a 4-byte
//! start code, so the NAL header byte sits at a fixed offset in the
//! first fragment.

/// Annex-B start code prefixed to every cached parameter set.
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Offset of the NAL header byte within the first fragment.
pub const NAL_HEADER_OFFSET: usize = START_CODE.len();

/// Capacity of each parameter-set slot in the cache, start code included.
pub const MAX_PARAMETER_SET_LEN: usize = 256;

/// H.264 `nal_unit_type` values the pipeline acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NalKind {
    /// Sequence parameter set (type 7).
    Sps,
    /// Picture parameter set (type 8).
    Pps,
    /// Coded slice of an IDR picture (type 5).
    Idr,
    /// Any other NAL unit; submitted unmodified.
    Other(u8),
}

impl NalKind {
    pub const SPS_TYPE: u8 = 7;
    pub const PPS_TYPE: u8 = 8;
    pub const IDR_TYPE: u8 = 5;

    /// Map a NAL header byte (`forbidden | nal_ref_idc | nal_unit_type`)
    /// to its kind.
    pub fn from_header(header: u8) -> Self {
        match header & 0x1F {
            Self::SPS_TYPE => NalKind::Sps,
            Self::PPS_TYPE => NalKind::Pps,
            Self::IDR_TYPE => NalKind::Idr,
            other => NalKind::Other(other),
        }
    }

    /// Classify the first fragment of a decode unit.
    ///
    /// The header is only inspected when the fragment carries more than
    /// the start code and header byte; shorter fragments are passed
    /// through as [`NalKind::Other`].
    pub fn classify(first_fragment: &[u8]) -> Self {
        if first_fragment.len() > NAL_HEADER_OFFSET + 1 {
            Self::from_header(first_fragment[NAL_HEADER_OFFSET])
        } else {
            NalKind::Other(0)
        }
    }

    /// Whether this unit is consumed into the parameter-set cache.
    pub fn is_parameter_set(self) -> bool {
        matches!(self, NalKind::Sps | NalKind::Pps)
    }
}

/// Split an Annex-B byte stream into NAL units, each still carrying a
/// 4-byte start code. Three-byte start codes are widened to four.
pub fn split_annex_b(stream: &[u8]) -> Vec<Vec<u8>> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= stream.len() {
        if stream[i] == 0 && stream[i + 1] == 0 && stream[i + 2] == 1 {
            starts.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nals = Vec::with_capacity(starts.len());
    for (n, &(_, payload_start)) in starts.iter().enumerate() {
        let mut payload_end = match starts.get(n + 1) {
            Some(&(next_code, _)) => next_code,
            None => stream.len(),
        };
        // A zero before the next 00 00 01 belongs to its 4-byte start code.
        while payload_end > payload_start && stream[payload_end - 1] == 0 {
            payload_end -= 1;
        }
        if payload_end == payload_start {
            continue;
        }
        let mut nal = Vec::with_capacity(START_CODE.len() + payload_end - payload_start);
        nal.extend_from_slice(&START_CODE);
        nal.extend_from_slice(&stream[payload_start..payload_end]);
        nals.push(nal);
    }
    nals
}
