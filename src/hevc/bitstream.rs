//! Raw bit reader for the fixed-length fields embedded in slice data
//!
//! Used for `pcm_sample()` payloads, which interrupt the arithmetic-coded
//! stream with byte-aligned uncompressed samples.

use crate::error::HevcError;

type Result<T> = core::result::Result<T, HevcError>;

/// MSB-first bit reader over a byte slice
pub struct BitstreamReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
}

impl<'a> BitstreamReader<'a> {
    /// Create a new bitstream reader
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// Read a single bit
    pub fn read_bit(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.byte_offset)
            .ok_or(HevcError::InvalidBitstream("unexpected end of PCM data"))?;
        let bit = (byte >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;
        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }
        Ok(bit)
    }

    /// Read up to 32 bits
    pub fn read_bits(&mut self, n: u8) -> Result<u32> {
        if n > 32 {
            return Err(HevcError::InvalidBitstream("too many bits requested"));
        }
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | u32::from(self.read_bit()?);
        }
        Ok(value)
    }

    /// Bytes touched so far, counting a partially read byte as consumed
    pub fn bytes_consumed(&self) -> usize {
        self.byte_offset + usize::from(self.bit_offset != 0)
    }
}
