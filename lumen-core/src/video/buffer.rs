//! Parameter-set cache and the scratch buffer access units are
//! flattened into before submission.

use crate::video::nal::START_CODE;
use crate::video::unit::DecodeUnit;

/// Initial scratch capacity at session setup.
pub const INITIAL_DECODE_BUFFER_LEN: usize = 128 * 1024;

// ── ParameterSetCache ────────────────────────────────────────────

/// The most recent SPS and PPS, each start-code prefixed.
#[derive(Debug, Clone, Default)]
pub struct ParameterSetCache {
    sps: Vec<u8>,
    pps: Vec<u8>,
}

impl ParameterSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an SPS NAL unit (no start code); the prefix is added here.
    pub fn store_sps(&mut self, nal: &[u8]) {
        self.sps.clear();
        self.sps.extend_from_slice(&START_CODE);
        self.sps.extend_from_slice(nal);
    }

    /// Store a PPS unit verbatim; it already carries its start code.
    pub fn store_pps(&mut self, unit: &[u8]) {
        self.pps.clear();
        self.pps.extend_from_slice(unit);
    }

    pub fn sps(&self) -> &[u8] {
        &self.sps
    }

    pub fn pps(&self) -> &[u8] {
        &self.pps
    }

    /// Combined length injected ahead of a key frame.
    pub fn prefix_len(&self) -> usize {
        self.sps.len() + self.pps.len()
    }

    pub fn clear(&mut self) {
        self.sps.clear();
        self.pps.clear();
    }
}

// ── DecodeBuffer ─────────────────────────────────────────────────

/// Scratch buffer that grows to fit the largest unit seen and never
/// shrinks.
#[derive(Debug)]
pub struct DecodeBuffer {
    data: Vec<u8>,
}

impl DecodeBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Flatten `unit` into the buffer, prefixed by the cached parameter
    /// sets when `key_frame` is set. Returns the filled slice.
    pub fn flatten(
        &mut self,
        unit: &DecodeUnit<'_>,
        key_frame: bool,
        cache: &ParameterSetCache,
    ) -> &[u8] {
        let prefix = if key_frame { cache.prefix_len() } else { 0 };
        let payload: usize = unit.fragments.iter().map(|f| f.len()).sum();
        let required = prefix + unit.full_length.max(payload);

        if required > self.data.len() {
            self.data = vec![0; required];
        }

        let mut offset = 0;
        if key_frame {
            offset = copy_at(&mut self.data, offset, cache.sps());
            offset = copy_at(&mut self.data, offset, cache.pps());
        }
        for fragment in unit.fragments {
            offset = copy_at(&mut self.data, offset, fragment);
        }
        &self.data[..offset]
    }
}

impl Default for DecodeBuffer {
    fn default() -> Self {
        Self::with_capacity(INITIAL_DECODE_BUFFER_LEN)
    }
}

fn copy_at(dst: &mut [u8], offset: usize, src: &[u8]) -> usize {
    let end = offset + src.len();
    dst[offset..end].copy_from_slice(src);
    end
}
