//! Bit-level RBSP reader and writer with Exp-Golomb support.
//!
//! The reader and writer are deliberately symmetrical so syntax can be
//! copied through element by element: read a field, optionally change
//! it, write it back.

use crate::error::StreamError;

// ── Emulation prevention ─────────────────────────────────────────

/// Remove `emulation_prevention_three_byte`s, turning NAL payload bytes
/// into RBSP bytes.
pub fn strip_emulation_prevention(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    let mut zeros = 0usize;
    for &byte in payload {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

/// Insert `emulation_prevention_three_byte`s so no start-code prefix can
/// appear inside the payload.
pub fn insert_emulation_prevention(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + rbsp.len() / 64 + 1);
    let mut zeros = 0usize;
    for &byte in rbsp {
        if zeros >= 2 && byte <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

// ── BitReader ────────────────────────────────────────────────────

/// MSB-first reader over RBSP bytes.
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of bits not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    pub fn read_bit(&mut self, name: &'static str) -> Result<bool, StreamError> {
        let byte = *self
            .data
            .get(self.pos / 8)
            .ok_or(StreamError::Truncated(name))?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        Ok(bit == 1)
    }

    /// Read `count` (≤ 32) bits as an unsigned integer.
    pub fn read_bits(&mut self, count: u32, name: &'static str) -> Result<u32, StreamError> {
        debug_assert!(count <= 32);
        if self.remaining() < count as usize {
            return Err(StreamError::Truncated(name));
        }
        let mut value = 0u32;
        for _ in 0..count {
            value = (value << 1) | self.read_bit(name)? as u32;
        }
        Ok(value)
    }

    /// Unsigned Exp-Golomb (`ue(v)`).
    pub fn read_ue(&mut self, name: &'static str) -> Result<u32, StreamError> {
        let mut leading_zeros = 0u32;
        while !self.read_bit(name)? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(StreamError::MalformedExpGolomb(name));
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let suffix = self.read_bits(leading_zeros, name)?;
        Ok(((1u64 << leading_zeros) - 1 + suffix as u64) as u32)
    }

    /// Signed Exp-Golomb (`se(v)`).
    pub fn read_se(&mut self, name: &'static str) -> Result<i32, StreamError> {
        let code = self.read_ue(name)? as i64;
        let value = if code % 2 == 1 {
            (code + 1) / 2
        } else {
            -(code / 2)
        };
        Ok(value as i32)
    }
}

// ── BitWriter ────────────────────────────────────────────────────

/// MSB-first writer producing RBSP bytes.
#[derive(Debug, Default)]
pub struct BitWriter {
    data: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bit(&mut self, bit: bool) {
        if self.bits % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            let last = self.data.len() - 1;
            self.data[last] |= 1 << (7 - (self.bits % 8));
        }
        self.bits += 1;
    }

    /// Write the low `count` (≤ 32) bits of `value`, MSB first.
    pub fn write_bits(&mut self, value: u32, count: u32) {
        debug_assert!(count <= 32);
        for shift in (0..count).rev() {
            self.write_bit((value >> shift) & 1 == 1);
        }
    }

    pub fn write_ue(&mut self, value: u32) {
        let code = value as u64 + 1;
        let len = 64 - code.leading_zeros();
        for _ in 0..len - 1 {
            self.write_bit(false);
        }
        for shift in (0..len).rev() {
            self.write_bit((code >> shift) & 1 == 1);
        }
    }

    pub fn write_se(&mut self, value: i32) {
        let code = if value > 0 {
            (value as i64) * 2 - 1
        } else {
            -(value as i64) * 2
        };
        self.write_ue(code as u32);
    }

    /// Append `rbsp_trailing_bits`: a stop bit, then zero-align.
    pub fn finish_rbsp(mut self) -> Vec<u8> {
        self.write_bit(true);
        // Bits past `self.bits` in the last byte are already zero.
        self.data
    }

    /// Bytes written so far; a partial trailing byte is zero-padded.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exp_golomb_known_codes() {
        // ue: 0 -> 1, 1 -> 010, 2 -> 011, 3 -> 00100
        let mut w = BitWriter::new();
        w.write_ue(0);
        w.write_ue(1);
        w.write_ue(2);
        w.write_ue(3);
        assert_eq!(w.into_bytes(), vec![0b1010_0110, 0b0100_0000]);
    }

    #[test]
    fn reader_matches_writer() {
        let mut w = BitWriter::new();
        w.write_bits(100, 8);
        w.write_ue(31);
        w.write_se(-4);
        w.write_se(3);
        w.write_bit(true);
        w.write_bits(0xDEAD_BEEF, 32);
        let bytes = w.finish_rbsp();

        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read_bits(8, "a").unwrap(), 100);
        assert_eq!(r.read_ue("b").unwrap(), 31);
        assert_eq!(r.read_se("c").unwrap(), -4);
        assert_eq!(r.read_se("d").unwrap(), 3);
        assert!(r.read_bit("e").unwrap());
        assert_eq!(r.read_bits(32, "f").unwrap(), 0xDEAD_BEEF);
        assert!(r.read_bit("stop").unwrap());
        assert!(r.remaining() < 8);
    }

    #[test]
    fn truncated_read_names_the_field() {
        let mut r = BitReader::new(&[0x00]);
        match r.read_ue("level_idc") {
            Err(StreamError::Truncated(name)) => assert_eq!(name, "level_idc"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn emulation_prevention_inserted_and_stripped() {
        let rbsp = [0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x42];
        let escaped = insert_emulation_prevention(&rbsp);
        assert_eq!(
            escaped,
            vec![0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00, 0x42]
        );
        assert_eq!(strip_emulation_prevention(&escaped), rbsp.to_vec());
    }

    #[test]
    fn plain_payload_untouched() {
        let data = [0x67, 0x42, 0xC0, 0x1F];
        assert_eq!(insert_emulation_prevention(&data), data.to_vec());
        assert_eq!(strip_emulation_prevention(&data), data.to_vec());
    }
}
