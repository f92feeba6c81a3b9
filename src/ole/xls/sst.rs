//! Shared String Table (SST) record.
//!
//! Record type: 0x00FC
//!
//! Payload: total reference count (u32), unique string count (u32), then the
//! unique strings back to back. Large tables spill into CONTINUE records
//! following the string splitting rules in [`super::continuation`].

use std::io::Write;

use super::continuation::{BiffRecordIter, ContinueWriter, LogicalRecord};
use super::string::EncodedString;
use crate::common::error::{Error, Result};
use crate::common::options::CodecOptions;

/// SST record type.
pub const SST: u16 = 0x00FC;

/// Decoded shared string table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SharedStrings {
    /// Number of cell references to the table across the workbook.
    pub total_refs: u32,
    pub strings: Vec<EncodedString>,
}

impl SharedStrings {
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&EncodedString> {
        self.strings.get(index)
    }

    /// Plain text of the string at `index`.
    pub fn text(&self, index: usize) -> Option<String> {
        self.get(index).map(EncodedString::text)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EncodedString> {
        self.strings.iter()
    }
}

/// Write an SST record with CONTINUE support.
///
/// # Arguments
///
/// * `writer` - Output writer
/// * `strings` - Unique strings in index order
/// * `total_refs` - Number of references to the table
/// * `options` - Payload limit for physical records
pub fn write_sst<W: Write>(
    writer: &mut W,
    strings: &[EncodedString],
    total_refs: u32,
    options: &CodecOptions,
) -> Result<()> {
    let mut records = ContinueWriter::with_options(SST, options);

    let mut counts = [0u8; 8];
    counts[..4].copy_from_slice(&total_refs.to_le_bytes());
    counts[4..].copy_from_slice(&(strings.len() as u32).to_le_bytes());
    records.write_atomic(&counts)?;

    for string in strings {
        records.write_string(string)?;
    }
    records.finish(writer)
}

/// Parse an SST logical record (the SST plus its CONTINUE fragments).
pub fn parse_sst(logical: &LogicalRecord<'_>) -> Result<SharedStrings> {
    if logical.record_type != SST {
        return Err(Error::InvalidData(format!(
            "expected SST record, found 0x{:04X}",
            logical.record_type
        )));
    }

    let mut cursor = logical.cursor();
    let total_refs = cursor.read_u32()?;
    let unique = cursor.read_u32()? as usize;

    // The unique count is untrusted; every string takes at least 3 bytes.
    let mut strings = Vec::with_capacity(unique.min(logical.len() / 3));
    for _ in 0..unique {
        strings.push(cursor.read_string()?);
    }
    if !cursor.is_exhausted() {
        log::debug!("SST has trailing bytes after {} strings", unique);
    }

    Ok(SharedStrings {
        total_refs,
        strings,
    })
}

/// Find and parse the first SST record in a workbook globals stream.
pub fn read_sst(stream: &[u8]) -> Result<Option<SharedStrings>> {
    let mut records = BiffRecordIter::new(stream);
    while let Some(logical) = records.next_logical() {
        let logical = logical?;
        if logical.record_type == SST {
            return parse_sst(&logical).map(Some);
        }
    }
    Ok(None)
}
