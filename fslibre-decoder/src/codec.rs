//! Binary field codec
//!
//! Little-endian fixed-width field reader shared by all record parsers.
//! Every read is bounds-checked and reports a `DecoderError::Truncated`
//! instead of panicking on short buffers.

use crate::types::{DecoderError, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Cursor over a byte buffer
#[derive(Debug, Clone)]
pub struct FieldReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    /// Create a reader positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Create a reader positioned at `offset`
    pub fn at(data: &'a [u8], offset: usize) -> Self {
        Self { data, offset }
    }

    /// Current cursor position
    pub fn position(&self) -> usize {
        self.offset
    }

    /// Bytes left after the cursor
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    /// Move the cursor forward without reading
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    /// Borrow the next `len` bytes and advance past them
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn i16(&mut self) -> Result<i16> {
        Ok(LittleEndian::read_i16(self.take(2)?))
    }

    /// 24-bit unsigned value, as used by compression block lengths
    pub fn u24(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u24(self.take(3)?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.offset.checked_add(len).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.offset..end];
                self.offset = end;
                Ok(slice)
            }
            None => Err(DecoderError::Truncated {
                offset: self.offset,
                needed: len,
                available: self.remaining(),
            }),
        }
    }
}

/// Read a little-endian u16 at a fixed offset
pub fn read_u16_at(data: &[u8], offset: usize) -> Result<u16> {
    FieldReader::at(data, offset).u16()
}
