//! Typed Escher atoms.
//!
//! The tree codec fully interprets a handful of atom kinds and carries every
//! other record as [`Atom::Opaque`] so unknown bytes survive a rebuild.
//! Based on MS-ODRAW sections 2.2.40 (Sp), 2.2.38 (Spgr), 2.2.49 (Dg) and
//! MS-XLS 2.5.193 (client anchor).

use super::header::{HEADER_SIZE, RecordHeader};
use super::properties::PropertyTable;
use super::types::EscherRecordType;
use crate::common::binary::{ByteCursor, ByteWriter};
use crate::common::error::Result;
use bitflags::bitflags;
use zerocopy::byteorder::{I16, LittleEndian, U16};
use zerocopy::{FromBytes, IntoBytes};
use zerocopy_derive::*;

// =============================================================================
// Shape Flags (MS-ODRAW 2.2.40)
// =============================================================================

bitflags! {
    /// Shape flags for the Sp atom
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShapeFlags: u32 {
        /// Shape is a group
        const GROUP = 0x0001;
        /// Shape is a child of a group
        const CHILD = 0x0002;
        /// Shape is the topmost group (patriarch)
        const PATRIARCH = 0x0004;
        /// Shape has been deleted
        const DELETED = 0x0008;
        /// Shape is an OLE object
        const OLE_SHAPE = 0x0010;
        /// Shape has a valid master
        const HAVE_MASTER = 0x0020;
        /// Shape is flipped horizontally
        const FLIP_H = 0x0040;
        /// Shape is flipped vertically
        const FLIP_V = 0x0080;
        /// Shape is a connector
        const CONNECTOR = 0x0100;
        /// Shape has an anchor
        const HAVE_ANCHOR = 0x0200;
        /// Shape is a background shape
        const BACKGROUND = 0x0400;
        /// Shape has a shape type property
        const HAVE_SPT = 0x0800;
    }
}

/// Shape types (MSOSPT values) used for the Sp instance field.
pub mod shape_type {
    pub const NOT_PRIMITIVE: u16 = 0;
    pub const RECTANGLE: u16 = 1;
    pub const ELLIPSE: u16 = 3;
    pub const LINE: u16 = 20;
    pub const PICTURE_FRAME: u16 = 75;
    pub const HOST_CONTROL: u16 = 201;
    pub const TEXT_BOX: u16 = 202;
}

// =============================================================================
// Drawing (Dg) - drawing descriptor
// =============================================================================

/// Drawing descriptor atom: shape count and last assigned shape id.
///
/// The instance field of the record carries the drawing id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawingAtom {
    pub drawing_id: u16,
    pub shape_count: u32,
    pub last_shape_id: u32,
}

impl DrawingAtom {
    pub const PAYLOAD_SIZE: usize = 8;

    pub fn new(drawing_id: u16, shape_count: u32, last_shape_id: u32) -> Self {
        Self {
            drawing_id,
            shape_count,
            last_shape_id,
        }
    }

    fn parse(instance: u16, payload: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(payload);
        Ok(Self {
            drawing_id: instance,
            shape_count: cursor.read_u32()?,
            last_shape_id: cursor.read_u32()?,
        })
    }
}

// =============================================================================
// Shape (Sp) - shape identity
// =============================================================================

/// Shape identity atom.
///
/// Bytes past the 8-byte id/flags body are kept in `trailing` so records
/// written by other producers survive a rebuild unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeAtom {
    /// Shape type (record instance)
    pub shape_type: u16,
    pub shape_id: u32,
    pub flags: ShapeFlags,
    pub trailing: Vec<u8>,
}

impl ShapeAtom {
    pub const BODY_SIZE: usize = 8;

    pub fn new(shape_type: u16, shape_id: u32, flags: ShapeFlags) -> Self {
        Self {
            shape_type,
            shape_id,
            flags,
            trailing: Vec::new(),
        }
    }

    /// The patriarch shape that seeds a drawing's shape ids.
    pub fn patriarch(shape_id: u32) -> Self {
        Self::new(
            shape_type::NOT_PRIMITIVE,
            shape_id,
            ShapeFlags::GROUP | ShapeFlags::PATRIARCH,
        )
    }

    #[inline]
    pub fn is_patriarch(&self) -> bool {
        self.flags.contains(ShapeFlags::PATRIARCH)
    }

    #[inline]
    pub fn is_group(&self) -> bool {
        self.flags.contains(ShapeFlags::GROUP)
    }

    #[inline]
    pub fn is_child(&self) -> bool {
        self.flags.contains(ShapeFlags::CHILD)
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.flags.contains(ShapeFlags::DELETED)
    }

    #[inline]
    pub fn has_anchor(&self) -> bool {
        self.flags.contains(ShapeFlags::HAVE_ANCHOR)
    }

    #[inline]
    pub fn has_shape_type(&self) -> bool {
        self.flags.contains(ShapeFlags::HAVE_SPT)
    }

    fn parse(instance: u16, payload: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(payload);
        let shape_id = cursor.read_u32()?;
        let flags = ShapeFlags::from_bits_retain(cursor.read_u32()?);
        Ok(Self {
            shape_type: instance,
            shape_id,
            flags,
            trailing: payload[Self::BODY_SIZE..].to_vec(),
        })
    }
}

// =============================================================================
// Shape Group (Spgr) - group coordinates
// =============================================================================

/// Group coordinate atom: the bounding rectangle of a shape group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupCoordinates {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl GroupCoordinates {
    pub const PAYLOAD_SIZE: usize = 16;

    fn parse(payload: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(payload);
        Ok(Self {
            left: cursor.read_i32()?,
            top: cursor.read_i32()?,
            right: cursor.read_i32()?,
            bottom: cursor.read_i32()?,
        })
    }
}

// =============================================================================
// Client Anchor - grid-relative placement
// =============================================================================

/// Raw 18-byte client anchor layout
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct RawClientAnchor {
    flags: U16<LittleEndian>,
    col1: I16<LittleEndian>,
    dx1: I16<LittleEndian>,
    row1: I16<LittleEndian>,
    dy1: I16<LittleEndian>,
    col2: I16<LittleEndian>,
    dx2: I16<LittleEndian>,
    row2: I16<LittleEndian>,
    dy2: I16<LittleEndian>,
}

/// Shape anchor relative to grid cells.
///
/// Offsets are stored in the format's own units; converting them to pixels
/// needs column widths and row heights from the sheet model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ClientAnchor {
    /// Move/size-with-cells flags
    pub flags: u16,
    pub col: i16,
    pub col_offset: i16,
    pub row: i16,
    pub row_offset: i16,
    pub col2: i16,
    pub col_offset2: i16,
    pub row2: i16,
    pub row_offset2: i16,
}

impl ClientAnchor {
    pub const PAYLOAD_SIZE: usize = 18;

    /// Anchor spanning from `(col, row)` to `(col2, row2)` with zero offsets.
    pub fn cells(col: i16, row: i16, col2: i16, row2: i16) -> Self {
        Self {
            col,
            row,
            col2,
            row2,
            ..Self::default()
        }
    }

    /// The eight positional values in on-disk order.
    pub fn bounds(&self) -> [i16; 8] {
        [
            self.col,
            self.col_offset,
            self.row,
            self.row_offset,
            self.col2,
            self.col_offset2,
            self.row2,
            self.row_offset2,
        ]
    }

    fn parse(payload: &[u8]) -> Option<Self> {
        let raw = RawClientAnchor::read_from_bytes(payload.get(..Self::PAYLOAD_SIZE)?).ok()?;
        Some(Self {
            flags: raw.flags.get(),
            col: raw.col1.get(),
            col_offset: raw.dx1.get(),
            row: raw.row1.get(),
            row_offset: raw.dy1.get(),
            col2: raw.col2.get(),
            col_offset2: raw.dx2.get(),
            row2: raw.row2.get(),
            row_offset2: raw.dy2.get(),
        })
    }

    /// Encode the 18-byte payload.
    pub fn to_bytes(&self) -> [u8; Self::PAYLOAD_SIZE] {
        let raw = RawClientAnchor {
            flags: U16::new(self.flags),
            col1: I16::new(self.col),
            dx1: I16::new(self.col_offset),
            row1: I16::new(self.row),
            dy1: I16::new(self.row_offset),
            col2: I16::new(self.col2),
            dx2: I16::new(self.col_offset2),
            row2: I16::new(self.row2),
            dy2: I16::new(self.row_offset2),
        };
        let mut out = [0u8; Self::PAYLOAD_SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }
}

// =============================================================================
// Atom enumeration
// =============================================================================

/// A leaf record, interpreted by type code.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Drawing(DrawingAtom),
    Shape(ShapeAtom),
    GroupCoordinates(GroupCoordinates),
    Properties(PropertyTable),
    ClientAnchor(ClientAnchor),
    ClientData(Vec<u8>),
    /// Attached text placeholder; the text itself lives in a TXO record.
    ClientTextbox(Vec<u8>),
    /// Any record the codec does not interpret, kept byte-for-byte.
    Opaque { header: RecordHeader, payload: Vec<u8> },
}

impl Atom {
    /// Interpret a payload by its header's type code.
    ///
    /// Payloads that do not fit their typed layout fall back to
    /// [`Atom::Opaque`].
    pub fn decode(header: RecordHeader, payload: &[u8]) -> Self {
        let typed = match header.kind() {
            EscherRecordType::Dg
                if header.version == 0 && payload.len() == DrawingAtom::PAYLOAD_SIZE =>
            {
                DrawingAtom::parse(header.instance, payload)
                    .ok()
                    .map(Atom::Drawing)
            }
            EscherRecordType::Sp
                if header.version == 0x02 && payload.len() >= ShapeAtom::BODY_SIZE =>
            {
                ShapeAtom::parse(header.instance, payload).ok().map(Atom::Shape)
            }
            EscherRecordType::Spgr
                if header.version == 0x01
                    && header.instance == 0
                    && payload.len() == GroupCoordinates::PAYLOAD_SIZE =>
            {
                GroupCoordinates::parse(payload)
                    .ok()
                    .map(Atom::GroupCoordinates)
            }
            EscherRecordType::Opt if header.version == 0x03 => {
                PropertyTable::parse(header.instance, payload)
                    .ok()
                    .map(Atom::Properties)
            }
            EscherRecordType::ClientAnchor
                if header.version == 0
                    && header.instance == 0
                    && payload.len() == ClientAnchor::PAYLOAD_SIZE =>
            {
                ClientAnchor::parse(payload).map(Atom::ClientAnchor)
            }
            EscherRecordType::ClientData if header.version == 0 && header.instance == 0 => {
                Some(Atom::ClientData(payload.to_vec()))
            }
            EscherRecordType::ClientTextbox if header.version == 0 && header.instance == 0 => {
                Some(Atom::ClientTextbox(payload.to_vec()))
            }
            _ => None,
        };

        typed.unwrap_or_else(|| {
            if matches!(
                header.kind(),
                EscherRecordType::Dg
                    | EscherRecordType::Sp
                    | EscherRecordType::Spgr
                    | EscherRecordType::Opt
                    | EscherRecordType::ClientAnchor
            ) {
                log::warn!(
                    "escher atom 0x{:04X} with {} payload bytes kept opaque",
                    header.record_type,
                    payload.len()
                );
            }
            Atom::Opaque {
                header,
                payload: payload.to_vec(),
            }
        })
    }

    pub fn record_type(&self) -> u16 {
        match self {
            Atom::Drawing(_) => EscherRecordType::Dg.into(),
            Atom::Shape(_) => EscherRecordType::Sp.into(),
            Atom::GroupCoordinates(_) => EscherRecordType::Spgr.into(),
            Atom::Properties(_) => EscherRecordType::Opt.into(),
            Atom::ClientAnchor(_) => EscherRecordType::ClientAnchor.into(),
            Atom::ClientData(_) => EscherRecordType::ClientData.into(),
            Atom::ClientTextbox(_) => EscherRecordType::ClientTextbox.into(),
            Atom::Opaque { header, .. } => header.record_type,
        }
    }

    /// Payload size as it will be encoded.
    pub fn payload_len(&self) -> usize {
        match self {
            Atom::Drawing(_) => DrawingAtom::PAYLOAD_SIZE,
            Atom::Shape(sp) => ShapeAtom::BODY_SIZE + sp.trailing.len(),
            Atom::GroupCoordinates(_) => GroupCoordinates::PAYLOAD_SIZE,
            Atom::Properties(table) => table.payload_len(),
            Atom::ClientAnchor(_) => ClientAnchor::PAYLOAD_SIZE,
            Atom::ClientData(data) | Atom::ClientTextbox(data) => data.len(),
            Atom::Opaque { payload, .. } => payload.len(),
        }
    }

    /// Encoded size including the record header.
    #[inline]
    pub fn serialized_len(&self) -> usize {
        HEADER_SIZE + self.payload_len()
    }

    /// Header re-derived from the current field values.
    pub fn header(&self) -> RecordHeader {
        let length = self.payload_len() as u32;
        let record_type = self.record_type();
        match self {
            Atom::Drawing(dg) => RecordHeader::new(0x00, dg.drawing_id, record_type, length),
            Atom::Shape(sp) => RecordHeader::new(0x02, sp.shape_type, record_type, length),
            Atom::GroupCoordinates(_) => RecordHeader::new(0x01, 0, record_type, length),
            Atom::Properties(table) => {
                RecordHeader::new(0x03, table.len() as u16, record_type, length)
            }
            Atom::ClientAnchor(_) | Atom::ClientData(_) | Atom::ClientTextbox(_) => {
                RecordHeader::new(0x00, 0, record_type, length)
            }
            Atom::Opaque { header, .. } => RecordHeader { length, ..*header },
        }
    }

    /// Write header and payload.
    pub fn write(&self, out: &mut ByteWriter) {
        out.write_bytes(&self.header().encode());
        match self {
            Atom::Drawing(dg) => {
                out.write_u32(dg.shape_count);
                out.write_u32(dg.last_shape_id);
            }
            Atom::Shape(sp) => {
                out.write_u32(sp.shape_id);
                out.write_u32(sp.flags.bits());
                out.write_bytes(&sp.trailing);
            }
            Atom::GroupCoordinates(spgr) => {
                out.write_i32(spgr.left);
                out.write_i32(spgr.top);
                out.write_i32(spgr.right);
                out.write_i32(spgr.bottom);
            }
            Atom::Properties(table) => table.write_payload(out),
            Atom::ClientAnchor(anchor) => out.write_bytes(&anchor.to_bytes()),
            Atom::ClientData(data) | Atom::ClientTextbox(data) => out.write_bytes(data),
            Atom::Opaque { payload, .. } => out.write_bytes(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(atom: &Atom) -> Vec<u8> {
        let mut out = ByteWriter::new();
        atom.write(&mut out);
        out.into_inner()
    }

    fn decode(bytes: &[u8]) -> Atom {
        let (header, _) = RecordHeader::decode(bytes, 0).unwrap();
        Atom::decode(header, &bytes[HEADER_SIZE..])
    }

    #[test]
    fn test_shape_atom_layout() {
        let atom = Atom::Shape(ShapeAtom::new(
            shape_type::TEXT_BOX,
            1025,
            ShapeFlags::HAVE_ANCHOR | ShapeFlags::HAVE_SPT,
        ));
        let bytes = encode(&atom);
        assert_eq!(
            bytes,
            vec![
                0xA2, 0x0C, 0x0A, 0xF0, 0x08, 0x00, 0x00, 0x00, // header
                0x01, 0x04, 0x00, 0x00, // spid 1025
                0x00, 0x0A, 0x00, 0x00, // flags
            ]
        );
        assert_eq!(decode(&bytes), atom);
    }

    #[test]
    fn test_shape_atom_keeps_trailing_bytes() {
        let mut sp = ShapeAtom::new(shape_type::RECTANGLE, 7, ShapeFlags::CHILD);
        sp.trailing = vec![0xAB, 0xCD];
        let atom = Atom::Shape(sp);
        let bytes = encode(&atom);
        assert_eq!(bytes.len(), 8 + 10);
        assert_eq!(decode(&bytes), atom);
    }

    #[test]
    fn test_anchor_layout() {
        let anchor = ClientAnchor {
            flags: 2,
            col: 1,
            col_offset: -1,
            row: 3,
            row_offset: 0,
            col2: 4,
            col_offset2: 512,
            row2: 9,
            row_offset2: 128,
        };
        let bytes = anchor.to_bytes();
        assert_eq!(&bytes[..6], &[0x02, 0x00, 0x01, 0x00, 0xFF, 0xFF]);
        assert_eq!(ClientAnchor::parse(&bytes), Some(anchor));
        assert_eq!(anchor.bounds(), [1, -1, 3, 0, 4, 512, 9, 128]);
    }

    #[test]
    fn test_short_typed_payload_is_opaque() {
        let header = RecordHeader::new(0x00, 0, 0xF010, 4);
        let atom = Atom::decode(header, &[1, 2, 3, 4]);
        assert!(matches!(atom, Atom::Opaque { .. }));
        assert_eq!(encode(&atom)[8..], [1, 2, 3, 4]);
    }

    #[test]
    fn test_unknown_atom_preserved() {
        let bytes = [0x31, 0x00, 0x77, 0xF1, 0x03, 0x00, 0x00, 0x00, 9, 8, 7];
        let atom = decode(&bytes);
        assert_eq!(atom.record_type(), 0xF177);
        assert_eq!(encode(&atom), bytes.to_vec());
    }

    #[test]
    fn test_drawing_atom_instance_is_drawing_id() {
        let atom = Atom::Drawing(DrawingAtom::new(3, 2, 3074));
        let bytes = encode(&atom);
        assert_eq!(&bytes[..2], &[0x30, 0x00]);
        assert_eq!(decode(&bytes), atom);
    }

    #[test]
    fn test_full_property_table_instance() {
        use crate::ole::escher::properties::{MAX_PROPERTIES, Property};

        let mut table = PropertyTable::new();
        for id in 0..MAX_PROPERTIES as u16 {
            table.set(Property::simple(id, 1)).unwrap();
        }
        assert!(table.set(Property::simple(0x2000, 1)).is_err());

        let atom = Atom::Properties(table);
        assert_eq!(atom.header().instance, 0x0FFF);
        let bytes = encode(&atom);
        assert_eq!(&bytes[..2], &[0xF3, 0xFF]);
        assert_eq!(decode(&bytes), atom);
    }
}
