//! Sheet drawing data carried in MSODRAWING records.
//!
//! A sheet's Escher drawing is stored as the concatenation of every
//! MSODRAWING (0x00EC) payload in the sheet substream, each optionally
//! followed by CONTINUE records. OBJ and TXO records sit between the
//! MSODRAWING records and are skipped here.

use std::io::Write;

use super::continuation::{BiffRecordIter, ContinueWriter};
use crate::common::error::Result;
use crate::common::options::CodecOptions;
use crate::ole::escher::{ShapeTree, parse_tree_with};

/// MSODRAWING record type.
pub const MSODRAWING: u16 = 0x00EC;

/// Frame encoded drawing bytes as MSODRAWING + CONTINUE records.
///
/// `boundaries` are Escher record offsets within `bytes` (see
/// [`ShapeTree::record_boundaries`]). Physical records are cut at those
/// offsets whenever the records between them fit; a single record larger
/// than the payload limit is cut wherever the limit falls.
pub fn write_drawing_records<W: Write>(
    writer: &mut W,
    bytes: &[u8],
    boundaries: &[usize],
    options: &CodecOptions,
) -> Result<()> {
    let mut cuts: Vec<usize> = boundaries
        .iter()
        .copied()
        .filter(|&offset| offset > 0 && offset < bytes.len())
        .collect();
    cuts.sort_unstable();
    cuts.dedup();
    cuts.push(bytes.len());

    let mut records = ContinueWriter::with_options(MSODRAWING, options);
    let mut start = 0;
    for end in cuts {
        let piece = &bytes[start..end];
        if piece.len() <= options.max_record_payload {
            records.write_atomic(piece)?;
        } else {
            records.write_splittable(piece);
        }
        start = end;
    }
    records.finish(writer)
}

/// Encode `tree` and frame it for a sheet substream.
pub fn write_sheet_drawing<W: Write>(
    writer: &mut W,
    tree: &mut ShapeTree,
    options: &CodecOptions,
) -> Result<()> {
    let bytes = tree.encode_with(options)?;
    let boundaries = tree.record_boundaries()?;
    write_drawing_records(writer, &bytes, &boundaries, options)
}

/// Concatenated MSODRAWING payloads of a sheet substream.
pub fn collect_drawing_bytes(stream: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut records = BiffRecordIter::new(stream);
    while let Some(logical) = records.next_logical() {
        let logical = logical?;
        if logical.record_type == MSODRAWING {
            for fragment in &logical.fragments {
                out.extend_from_slice(fragment);
            }
        }
    }
    Ok(out)
}

/// Decode the drawing of one sheet substream.
///
/// Returns `Ok(None)` when the sheet has no drawing data, or when the data
/// is damaged in a way that only costs this sheet its drawing objects.
pub fn read_sheet_drawing(stream: &[u8], options: &CodecOptions) -> Result<Option<ShapeTree>> {
    let decoded = collect_drawing_bytes(stream).and_then(|bytes| {
        if bytes.is_empty() {
            return Ok(None);
        }
        parse_tree_with(&bytes, options).map(Some)
    });

    match decoded {
        Ok(tree) => Ok(tree),
        Err(e) if e.degrades_to_absent() => {
            log::warn!("Dropping sheet drawing objects: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
