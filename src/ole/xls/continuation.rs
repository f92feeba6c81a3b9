//! BIFF8 physical record framing and CONTINUE handling.
//!
//! A BIFF record payload is limited to [`MAX_RECORD_PAYLOAD`] bytes. Longer
//! logical records spill into CONTINUE (0x003C) records that follow the
//! first physical record directly.
//!
//! # Splitting rules
//!
//! - Fixed-size fields are written as atomic chunks and never split
//! - A string that fits in a fresh record but not in the space left moves to
//!   the next record whole
//! - A string longer than one record is split inside its character data at a
//!   breakable point; the continuation starts with the repeated width flag
//!
//! Readers undo this with [`LogicalRecord`] and [`FragmentCursor`], which
//! consume the repeated flag byte and switch character width per fragment.

use std::io::Write;

use super::string::{EncodedString, RichRun, flags};
use crate::common::binary::ByteCursor;
use crate::common::error::{Error, Result};
use crate::common::options::{CodecOptions, MAX_RECORD_PAYLOAD};

/// CONTINUE record type.
pub const CONTINUE: u16 = 0x003C;

/// Size of a BIFF physical record header.
pub const BIFF_HEADER_SIZE: usize = 4;

/// Write a physical record header (type + payload length).
pub fn write_biff_header<W: Write>(writer: &mut W, record_type: u16, data_len: u16) -> Result<()> {
    writer.write_all(&record_type.to_le_bytes())?;
    writer.write_all(&data_len.to_le_bytes())?;
    Ok(())
}

/// One physical BIFF record borrowed from a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiffRecord<'data> {
    pub record_type: u16,
    /// Offset of the record header in the stream.
    pub offset: usize,
    pub data: &'data [u8],
}

/// Iterator over the physical records of a BIFF stream.
#[derive(Debug, Clone)]
pub struct BiffRecordIter<'data> {
    stream: &'data [u8],
    pos: usize,
}

impl<'data> BiffRecordIter<'data> {
    pub fn new(stream: &'data [u8]) -> Self {
        Self { stream, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Next record only if it is a CONTINUE.
    fn next_continue(&mut self) -> Option<Result<BiffRecord<'data>>> {
        let record_type = self.stream.get(self.pos..self.pos + 2)?;
        if u16::from_le_bytes([record_type[0], record_type[1]]) != CONTINUE {
            return None;
        }
        self.next()
    }

    /// Next logical record: a physical record plus the CONTINUE records
    /// directly after it.
    pub fn next_logical(&mut self) -> Option<Result<LogicalRecord<'data>>> {
        let first = match self.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e)),
        };

        let mut logical = LogicalRecord {
            record_type: first.record_type,
            offset: first.offset,
            fragments: vec![first.data],
        };
        while let Some(next) = self.next_continue() {
            match next {
                Ok(record) => logical.fragments.push(record.data),
                Err(e) => return Some(Err(e)),
            }
        }
        Some(Ok(logical))
    }
}

impl<'data> Iterator for BiffRecordIter<'data> {
    type Item = Result<BiffRecord<'data>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.stream.len() {
            return None;
        }

        let offset = self.pos;
        let mut cursor = ByteCursor::at(self.stream, offset);
        let record = cursor.read_u16().and_then(|record_type| {
            let len = cursor.read_u16()? as usize;
            let data = cursor.read_bytes(len)?;
            Ok(BiffRecord {
                record_type,
                offset,
                data,
            })
        });

        match record {
            Ok(record) => {
                self.pos = cursor.position();
                Some(Ok(record))
            }
            Err(e) => {
                // Stop after a truncated record.
                self.pos = self.stream.len();
                Some(Err(e))
            }
        }
    }
}

/// A logical record assembled from its physical fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalRecord<'data> {
    pub record_type: u16,
    pub offset: usize,
    pub fragments: Vec<&'data [u8]>,
}

impl<'data> LogicalRecord<'data> {
    pub fn len(&self) -> usize {
        self.fragments.iter().map(|f| f.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload with fragment boundaries removed.
    ///
    /// Only meaningful for records whose continuations carry no repeated
    /// flag bytes, such as drawing data.
    pub fn concat(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for fragment in &self.fragments {
            out.extend_from_slice(fragment);
        }
        out
    }

    pub fn cursor(&self) -> FragmentCursor<'_> {
        FragmentCursor::new(&self.fragments)
    }
}

/// Reader over the fragments of a logical record.
#[derive(Debug, Clone)]
pub struct FragmentCursor<'a> {
    fragments: &'a [&'a [u8]],
    index: usize,
    offset: usize,
}

impl<'a> FragmentCursor<'a> {
    pub fn new(fragments: &'a [&'a [u8]]) -> Self {
        Self {
            fragments,
            index: 0,
            offset: 0,
        }
    }

    fn remaining_in_fragment(&self) -> usize {
        self.fragments
            .get(self.index)
            .map_or(0, |f| f.len().saturating_sub(self.offset))
    }

    /// Bytes left in this and every later fragment.
    fn remaining(&self) -> usize {
        self.remaining_in_fragment()
            + self
                .fragments
                .iter()
                .skip(self.index + 1)
                .map(|f| f.len())
                .sum::<usize>()
    }

    fn end_of_record(&self, needed: usize) -> Error {
        Error::UnexpectedEndOfRecord {
            offset: self.offset,
            needed,
            available: self.remaining_in_fragment(),
        }
    }

    fn advance_fragment(&mut self, needed: usize) -> Result<()> {
        if self.index + 1 >= self.fragments.len() {
            return Err(self.end_of_record(needed));
        }
        self.index += 1;
        self.offset = 0;
        Ok(())
    }

    /// Whether every fragment has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.remaining_in_fragment() == 0 && self.index + 1 >= self.fragments.len()
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        while self.remaining_in_fragment() == 0 {
            self.advance_fragment(1)?;
        }
        let value = self.fragments[self.index][self.offset];
        self.offset += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let lo = self.read_u8()?;
        let hi = self.read_u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let lo = self.read_u16()? as u32;
        let hi = self.read_u16()? as u32;
        Ok(lo | (hi << 16))
    }

    /// Read `n` bytes that may cross fragment boundaries.
    pub fn read_bytes(&mut self, mut n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n.min(self.remaining()));
        while n > 0 {
            if self.remaining_in_fragment() == 0 {
                self.advance_fragment(n)?;
                continue;
            }
            let take = n.min(self.remaining_in_fragment());
            let fragment = self.fragments[self.index];
            out.extend_from_slice(&fragment[self.offset..self.offset + take]);
            self.offset += take;
            n -= take;
        }
        Ok(out)
    }

    /// Read `count` characters whose width may change at each fragment
    /// boundary, where a repeated flag byte selects the new width.
    fn read_chars(&mut self, count: usize, double_byte: &mut bool) -> Result<Vec<u16>> {
        let mut units = Vec::with_capacity(count);
        let mut widened = *double_byte;
        while units.len() < count {
            if self.remaining_in_fragment() == 0 {
                self.advance_fragment(count - units.len())?;
                let flag = self.read_u8()?;
                *double_byte = flag & flags::HIGH_BYTE != 0;
                widened |= *double_byte;
                continue;
            }

            let width = if *double_byte { 2 } else { 1 };
            let available = self.remaining_in_fragment() / width;
            if available == 0 {
                return Err(Error::InvalidData(
                    "string continuation splits a character".to_string(),
                ));
            }
            let take = available.min(count - units.len());
            let fragment = &self.fragments[self.index][self.offset..self.offset + take * width];
            if *double_byte {
                units.extend(
                    fragment
                        .chunks_exact(2)
                        .map(|pair| u16::from_le_bytes([pair[0], pair[1]])),
                );
            } else {
                units.extend(fragment.iter().map(|&b| b as u16));
            }
            self.offset += take * width;
        }
        *double_byte = widened;
        Ok(units)
    }

    /// Read a string that may be split across CONTINUE fragments.
    ///
    /// If any fragment switches to double-byte characters the whole string
    /// is widened.
    pub fn read_string(&mut self) -> Result<EncodedString> {
        let count = self.read_u16()? as usize;
        let option_flags = self.read_u8()?;
        let run_count = if option_flags & flags::RICH_ST != 0 {
            Some(self.read_u16()? as usize)
        } else {
            None
        };
        let phonetic_len = if option_flags & flags::EXT_ST != 0 {
            Some(self.read_u32()? as usize)
        } else {
            None
        };

        let mut double_byte = option_flags & flags::HIGH_BYTE != 0;
        let units = self.read_chars(count, &mut double_byte)?;
        let mut string = EncodedString::from_units(units, double_byte);

        if let Some(n) = run_count {
            let mut runs = Vec::with_capacity(n);
            for _ in 0..n {
                runs.push(RichRun {
                    char_index: self.read_u16()?,
                    font_index: self.read_u16()?,
                });
            }
            string = string.with_runs(runs)?;
        }
        if let Some(len) = phonetic_len {
            string = string.with_phonetic_block(self.read_bytes(len)?);
        }
        Ok(string)
    }
}

/// Writes one logical record as a first physical record plus CONTINUE
/// records.
#[derive(Debug, Clone)]
pub struct ContinueWriter {
    record_type: u16,
    max_payload: usize,
    records: Vec<Vec<u8>>,
    current: Vec<u8>,
}

impl ContinueWriter {
    pub fn new(record_type: u16) -> Self {
        Self::with_max_payload(record_type, MAX_RECORD_PAYLOAD)
    }

    pub fn with_options(record_type: u16, options: &CodecOptions) -> Self {
        Self::with_max_payload(record_type, options.max_record_payload)
    }

    pub fn with_max_payload(record_type: u16, max_payload: usize) -> Self {
        Self {
            record_type,
            max_payload: max_payload.clamp(1, u16::MAX as usize),
            records: Vec::new(),
            current: Vec::with_capacity(max_payload.min(MAX_RECORD_PAYLOAD)),
        }
    }

    #[inline]
    fn space_left(&self) -> usize {
        self.max_payload - self.current.len()
    }

    fn start_continue(&mut self) {
        let full = std::mem::take(&mut self.current);
        self.records.push(full);
    }

    fn too_large(&self, size: usize) -> Error {
        Error::RecordTooLarge {
            record_type: self.record_type,
            size,
            max: self.max_payload,
        }
    }

    /// Append bytes that must stay in one physical record.
    pub fn write_atomic(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.max_payload {
            return Err(self.too_large(bytes.len()));
        }
        if bytes.len() > self.space_left() {
            self.start_continue();
        }
        self.current.extend_from_slice(bytes);
        Ok(())
    }

    /// Append bytes that may be cut anywhere.
    pub fn write_splittable(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            if self.space_left() == 0 {
                self.start_continue();
            }
            let take = bytes.len().min(self.space_left());
            self.current.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
        }
    }

    /// Append an encoded string, splitting it only at breakable points.
    pub fn write_string(&mut self, string: &EncodedString) -> Result<()> {
        let bytes = string.encode();
        if bytes.len() <= self.space_left() {
            self.current.extend_from_slice(&bytes);
            return Ok(());
        }
        if bytes.len() <= self.max_payload {
            self.start_continue();
            self.current.extend_from_slice(&bytes);
            return Ok(());
        }

        let layout = string.layout();
        let width = string.char_width();
        if self.space_left() < layout.chars_start + width {
            self.start_continue();
            if self.space_left() < layout.chars_start + width {
                return Err(self.too_large(layout.chars_start + width));
            }
        }

        let repeated_flag = string.flags() & flags::HIGH_BYTE;
        let mut pos = 0;
        loop {
            let rest = bytes.len() - pos;
            if rest <= self.space_left() {
                self.current.extend_from_slice(&bytes[pos..]);
                return Ok(());
            }

            // Largest character boundary that fits, keeping at least one
            // character for the continuation.
            let limit = (pos + self.space_left()).min(layout.chars_end - width);
            let cut = if limit > layout.chars_start {
                layout.chars_start + (limit - layout.chars_start) / width * width
            } else {
                0
            };
            if cut <= pos {
                return Err(self.too_large(rest + 1));
            }
            if !string.is_breakable_point_within(cut, 0, self.max_payload) {
                return Err(Error::IllegalSplitPoint { offset: cut });
            }

            self.current.extend_from_slice(&bytes[pos..cut]);
            self.start_continue();
            self.current.push(repeated_flag);
            pos = cut;
        }
    }

    /// Physical record payloads, first record first.
    pub fn into_payloads(mut self) -> Vec<Vec<u8>> {
        if !self.current.is_empty() || self.records.is_empty() {
            self.records.push(self.current);
        }
        self.records
    }

    /// Write every physical record with its header.
    pub fn finish<W: Write>(self, writer: &mut W) -> Result<()> {
        let record_type = self.record_type;
        for (i, payload) in self.into_payloads().into_iter().enumerate() {
            let kind = if i == 0 { record_type } else { CONTINUE };
            write_biff_header(writer, kind, payload.len() as u16)?;
            writer.write_all(&payload)?;
        }
        Ok(())
    }

    /// [`finish`](Self::finish) into a new buffer.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.finish(&mut out)?;
        Ok(out)
    }
}
