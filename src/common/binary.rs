//! Binary data parsing utilities shared by the record codecs.
//!
//! This module provides little-endian fixed-width accessors over byte slices,
//! a sequential [`ByteCursor`] for decoding and a [`ByteWriter`] for encoding.
//! Every read is bounds-checked and reports [`Error::UnexpectedEndOfRecord`]
//! instead of panicking.

use crate::common::error::{Error, Result};
use zerocopy::{FromBytes, I32, LE, U16, U32};

#[inline]
fn check(data: &[u8], offset: usize, needed: usize) -> Result<()> {
    if offset.checked_add(needed).is_none_or(|end| end > data.len()) {
        return Err(Error::UnexpectedEndOfRecord {
            offset,
            needed,
            available: data.len().saturating_sub(offset),
        });
    }
    Ok(())
}

/// Read a little-endian u16 from a byte slice at the given offset.
///
/// # Examples
///
/// ```
/// use officeart_biff::common::binary::read_u16_le;
/// let data = [0x34, 0x12, 0x78, 0x56];
/// assert_eq!(read_u16_le(&data, 0).unwrap(), 0x1234);
/// assert_eq!(read_u16_le(&data, 2).unwrap(), 0x5678);
/// ```
#[inline]
pub fn read_u16_le(data: &[u8], offset: usize) -> Result<u16> {
    check(data, offset, 2)?;
    U16::<LE>::read_from_bytes(&data[offset..offset + 2])
        .map(|v| v.get())
        .map_err(|_| Error::InvalidData("failed to read u16".to_string()))
}

/// Read a little-endian u32 from a byte slice at the given offset.
///
/// # Examples
///
/// ```
/// use officeart_biff::common::binary::read_u32_le;
/// let data = [0x78, 0x56, 0x34, 0x12];
/// assert_eq!(read_u32_le(&data, 0).unwrap(), 0x12345678);
/// ```
#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    check(data, offset, 4)?;
    U32::<LE>::read_from_bytes(&data[offset..offset + 4])
        .map(|v| v.get())
        .map_err(|_| Error::InvalidData("failed to read u32".to_string()))
}

/// Read a little-endian i32 from a byte slice at the given offset.
#[inline]
pub fn read_i32_le(data: &[u8], offset: usize) -> Result<i32> {
    check(data, offset, 4)?;
    I32::<LE>::read_from_bytes(&data[offset..offset + 4])
        .map(|v| v.get())
        .map_err(|_| Error::InvalidData("failed to read i32".to_string()))
}

/// Parse a UTF-16LE string, stopping at the first NUL code unit.
///
/// A trailing odd byte is ignored.
///
/// # Examples
///
/// ```
/// use officeart_biff::common::binary::parse_utf16le_string;
/// let data = vec![0x48, 0x00, 0x69, 0x00, 0x00, 0x00];
/// assert_eq!(parse_utf16le_string(&data), "Hi");
/// ```
pub fn parse_utf16le_string(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Sequential little-endian reader over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct ByteCursor<'data> {
    data: &'data [u8],
    pos: usize,
}

impl<'data> ByteCursor<'data> {
    #[inline]
    pub fn new(data: &'data [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Create a cursor positioned at `offset`.
    #[inline]
    pub fn at(data: &'data [u8], offset: usize) -> Self {
        Self { data, pos: offset }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        check(self.data, self.pos, 1)?;
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let value = read_u16_le(self.data, self.pos)?;
        self.pos += 2;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let value = read_u32_le(self.data, self.pos)?;
        self.pos += 4;
        Ok(value)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let value = read_i32_le(self.data, self.pos)?;
        self.pos += 4;
        Ok(value)
    }

    /// Borrow the next `len` bytes and advance past them.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'data [u8]> {
        check(self.data, self.pos, len)?;
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

/// Sequential little-endian writer backed by a growable buffer.
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Overwrite a previously written u32 (used to back-fill lengths).
    pub fn patch_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        check(&self.buf, offset, 4)?;
        self.buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    #[inline]
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}
