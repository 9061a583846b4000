//! Decode units as delivered by the transport.

use bytes::Bytes;

/// One access unit's worth of bitstream fragments.
///
/// Fragments are borrowed from the transport for the duration of a
/// single submission and are never mutated by the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct DecodeUnit<'a> {
    /// Transport-assigned frame number.
    pub frame_number: u32,
    /// Declared total length of all fragments.
    pub full_length: usize,
    /// Ordered fragments; the first begins with an Annex-B start code.
    pub fragments: &'a [Bytes],
}

impl<'a> DecodeUnit<'a> {
    /// Build a unit whose declared length is the sum of its fragments.
    pub fn new(frame_number: u32, fragments: &'a [Bytes]) -> Self {
        Self {
            frame_number,
            full_length: fragments.iter().map(Bytes::len).sum(),
            fragments,
        }
    }

    /// The first fragment, or an empty slice for an empty unit.
    pub fn first_fragment(&self) -> &[u8] {
        self.fragments.first().map(|b| b.as_ref()).unwrap_or(&[])
    }

    pub fn is_single_fragment(&self) -> bool {
        self.fragments.len() == 1
    }
}
