//! Two-pass drawing encoder.
//!
//! Pass one measures every record bottom-up; pass two emits each header with
//! its measured length and caches the record's new offset. Container lengths
//! are always re-derived from their children, never copied from decoded
//! input, so a mutated tree cannot carry a stale length.
//!
//! # Length arithmetic
//!
//! - Shape container: `Σ (8 + child payload)` over its atoms
//! - Group shape: shape containers and bookkeeping atoms, headers included
//! - Drawing group: descriptor atom + group shape + solver, headers included
//!
//! An attached-text atom following a shape is a sibling of that shape's
//! container, so it counts toward the group shape and drawing group only.

use super::header::{HEADER_SIZE, RecordHeader};
use super::tree::{DrawingSummary, RecordBody, RecordId, ShapeTree};
use crate::common::binary::ByteWriter;
use crate::common::error::{Error, Result};
use crate::common::options::CodecOptions;

/// Encode `tree` with default options.
pub fn build_tree(tree: &mut ShapeTree) -> Result<Vec<u8>> {
    tree.encode()
}

impl ShapeTree {
    pub fn encode(&mut self) -> Result<Vec<u8>> {
        self.encode_with(&CodecOptions::default())
    }

    /// Encode the tree and cache the offsets of the new layout.
    pub fn encode_with(&mut self, options: &CodecOptions) -> Result<Vec<u8>> {
        let mut sizes = vec![0usize; self.records.len()];
        let roots = self.roots.clone();
        let total: usize = roots.iter().map(|&root| self.measure(root, &mut sizes)).sum();

        let mut out = ByteWriter::with_capacity(total);
        let mut summary = DrawingSummary::default();
        for root in roots {
            self.emit(root, &sizes, &mut out, &mut summary)?;
        }
        let bytes = out.into_inner();

        if options.verify_on_encode {
            verify_container_lengths(&bytes)?;
        }
        self.summary = summary;
        self.layout_len = Some(bytes.len());
        log::debug!(
            "encoded drawing {} ({} shapes, {} bytes)",
            self.drawing_id(),
            summary.shape_count,
            bytes.len()
        );
        Ok(bytes)
    }

    /// Encoded size of the whole tree.
    pub fn serialized_len(&self) -> usize {
        let mut sizes = vec![0usize; self.records.len()];
        self.roots
            .iter()
            .map(|&root| self.measure(root, &mut sizes))
            .sum()
    }

    /// Offsets of every record header in the current layout, in document
    /// order.
    pub fn record_boundaries(&self) -> Result<Vec<usize>> {
        if !self.is_layout_valid() {
            return Err(Error::StaleLayout);
        }
        Ok(self
            .preorder()
            .into_iter()
            .filter_map(|id| self.record(id)?.offset())
            .collect())
    }

    fn measure(&self, id: RecordId, sizes: &mut [usize]) -> usize {
        let Some(record) = self.record(id) else {
            return 0;
        };
        let size = match &record.body {
            RecordBody::Container { children, .. } => {
                HEADER_SIZE
                    + children
                        .iter()
                        .map(|&child| self.measure(child, sizes))
                        .sum::<usize>()
            }
            RecordBody::Atom(atom) => atom.serialized_len(),
        };
        sizes[id.index()] = size;
        size
    }

    fn emit(
        &mut self,
        id: RecordId,
        sizes: &[usize],
        out: &mut ByteWriter,
        summary: &mut DrawingSummary,
    ) -> Result<()> {
        let start = out.position();
        let measured = sizes[id.index()].saturating_sub(HEADER_SIZE);

        let children = match self.record(id).map(|r| &r.body) {
            Some(RecordBody::Container {
                record_type,
                instance,
                children,
            }) => {
                let header = RecordHeader::container(*record_type, *instance, measured as u32);
                out.write_bytes(&header.encode());
                summary.record(&header);
                Some(children.clone())
            }
            Some(RecordBody::Atom(atom)) => {
                atom.write(out);
                None
            }
            None => return Ok(()),
        };

        if let Some(children) = children {
            for child in children {
                self.emit(child, sizes, out, summary)?;
            }
            let actual = out.position() - start - HEADER_SIZE;
            if actual != measured {
                debug_assert_eq!(actual, measured, "container length drifted during encode");
                log::error!(
                    "container at offset {} measured {} bytes but wrote {}; clamping",
                    start,
                    measured,
                    actual
                );
                out.patch_u32(start + 4, actual as u32)?;
            }
        }

        let written = (out.position() - start - HEADER_SIZE) as u32;
        if let Some(record) = self.record_mut(id) {
            record.offset = Some(start);
            record.declared_length = Some(written);
        }
        Ok(())
    }
}

/// Re-walk encoded drawing bytes and check every container length against
/// the records that actually follow its header.
pub fn verify_container_lengths(bytes: &[u8]) -> Result<()> {
    let mut offset = 0;
    while offset < bytes.len() {
        offset += walk(bytes, offset)?;
    }
    Ok(())
}

/// Size of the record at `offset`, checking containers recursively.
fn walk(bytes: &[u8], offset: usize) -> Result<usize> {
    let (header, consumed) = RecordHeader::decode(bytes, offset)?;
    let declared = header.length as usize;

    if !(header.is_container() && header.kind().is_container()) {
        let available = bytes.len() - offset - consumed;
        if declared > available {
            return Err(Error::TruncatedRecord {
                record_type: header.record_type,
                offset,
                declared: header.length,
                available,
            });
        }
        return Ok(consumed + declared);
    }

    let mut actual = 0usize;
    while actual < declared {
        let child = offset + consumed + actual;
        if child >= bytes.len() {
            break;
        }
        actual += walk(bytes, child)?;
    }
    if actual != declared {
        return Err(Error::LengthMismatchOnEncode {
            record_type: header.record_type,
            offset,
            declared: header.length,
            actual: actual as u32,
        });
    }
    Ok(consumed + declared)
}
