//! Bit-level reader for MPEG system layer headers.

use crate::{DemuxError, Result};

/// Reads MSB-first bit fields from a byte slice.
///
/// Running past the end of the data is an error rather than
/// a silent truncation, and `marker()` checks fixed bit patterns.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_pos: usize,
    bit_pos: u8,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
        }
    }

    /// Current position in bits.
    pub fn position(&self) -> usize {
        self.byte_pos * 8 + self.bit_pos as usize
    }

    pub fn remaining_bits(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.position())
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        let byte = *self
            .data
            .get(self.byte_pos)
            .ok_or_else(|| DemuxError::corrupted("bit reader exhausted"))?;
        let bit = (byte >> (7 - self.bit_pos)) & 1;
        self.bit_pos += 1;
        if self.bit_pos == 8 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
        Ok(bit != 0)
    }

    /// Reads up to 64 bits as an unsigned integer.
    pub fn read_bits(&mut self, n: u8) -> Result<u64> {
        if n > 64 {
            return Err(DemuxError::corrupted(format!("can not read {n} bits at once")));
        }
        if self.remaining_bits() < n as usize {
            return Err(DemuxError::corrupted("bit reader exhausted"));
        }
        let mut value = 0_u64;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Ok(value)
    }

    pub fn read_u8(&mut self, n: u8) -> Result<u8> {
        Ok(self.read_bits(n.min(8))? as u8)
    }

    pub fn read_u32(&mut self, n: u8) -> Result<u32> {
        Ok(self.read_bits(n.min(32))? as u32)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.remaining_bits() < n {
            return Err(DemuxError::corrupted("bit reader exhausted"));
        }
        let pos = self.position() + n;
        self.byte_pos = pos / 8;
        self.bit_pos = (pos % 8) as u8;
        Ok(())
    }

    /// Reads `n` bits and fails with `DemuxError::Corrupted`
    /// unless they equal `expected`.
    pub fn marker(&mut self, n: u8, expected: u64, name: &str) -> Result<()> {
        let got = self.read_bits(n)?;
        match got == expected {
            true => Ok(()),
            false => Err(DemuxError::corrupted(format!(
                "{name}: expected marker {expected:#b}, got {got:#b}"
            ))),
        }
    }

    /// Single '1' marker bit.
    pub fn marker_bit(&mut self, name: &str) -> Result<()> {
        self.marker(1, 1, name)
    }

    /// 33-bit MPEG system clock value laid out as
    /// `[32..30] marker [29..15] marker [14..0] marker`.
    pub fn read_clock33(&mut self, name: &str) -> Result<u64> {
        let hi = self.read_bits(3)?;
        self.marker_bit(name)?;
        let mid = self.read_bits(15)?;
        self.marker_bit(name)?;
        let lo = self.read_bits(15)?;
        self.marker_bit(name)?;
        Ok(hi << 30 | mid << 15 | lo)
    }
}
