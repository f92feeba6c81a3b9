//! Escher shape property table (Opt record).
//!
//! A property table is a run of 6-byte entries (`id:u16`, `value:u32`)
//! followed by the variable-length data of every complex entry, in entry
//! order. The record instance carries the entry count.
//! Based on MS-ODRAW specification section 2.2.9 and 2.3.
//!
//! # Complex Properties
//!
//! Parsing is two-pass:
//! 1. First pass: read all 6-byte entry headers
//! 2. Second pass: slice the complex data that follows the headers
//!
//! Entries with ids this module does not know are preserved unchanged, so a
//! table written by a newer producer survives a rebuild.

use crate::common::binary::{ByteCursor, ByteWriter, parse_utf16le_string};
use crate::common::error::{Error, Result};
use crate::ole::xls::string::EncodedString;
use smallvec::SmallVec;

/// Entry id bit: the value is a blip store index.
pub const IS_BLOB: u16 = 0x4000;
/// Entry id bit: the value is the length of trailing complex data.
pub const IS_COMPLEX: u16 = 0x8000;
const PROPERTY_ID_MASK: u16 = 0x3FFF;

/// Size of one entry header.
pub const ENTRY_SIZE: usize = 6;

/// Largest entry count the 12-bit record instance can carry.
pub const MAX_PROPERTIES: usize = 0x0FFF;

/// Escher property ids the typed accessors understand.
///
/// Anything else decodes as [`EscherPropertyId::Unknown`]; the raw id is kept
/// on the [`Property`] itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EscherPropertyId {
    Rotation = 0x0004,
    LockAgainstGrouping = 0x007F,
    TextId = 0x0080,
    TextLeft = 0x0081,
    TextTop = 0x0082,
    TextRight = 0x0083,
    TextBottom = 0x0084,
    WrapText = 0x0085,
    AnchorText = 0x0087,
    TextBooleans = 0x00BF,
    BlipToDisplay = 0x0104,
    PictureFileName = 0x0105,
    BlipBooleans = 0x013F,
    GeomRight = 0x0142,
    GeomBottom = 0x0143,
    ShapePath = 0x0144,
    GeometryBooleans = 0x017F,
    FillType = 0x0180,
    FillColor = 0x0181,
    FillOpacity = 0x0182,
    FillBackColor = 0x0183,
    FillStyleBooleans = 0x01BF,
    LineColor = 0x01C0,
    LineWidth = 0x01CB,
    LineStyleBooleans = 0x01FF,
    ShadowStyleBooleans = 0x023F,
    ShapeName = 0x0380,
    Description = 0x0381,
    Hyperlink = 0x0382,
    GroupShapeBooleans = 0x03BF,
    Unknown = 0xFFFF,
}

impl From<u16> for EscherPropertyId {
    fn from(value: u16) -> Self {
        match value & PROPERTY_ID_MASK {
            0x0004 => Self::Rotation,
            0x007F => Self::LockAgainstGrouping,
            0x0080 => Self::TextId,
            0x0081 => Self::TextLeft,
            0x0082 => Self::TextTop,
            0x0083 => Self::TextRight,
            0x0084 => Self::TextBottom,
            0x0085 => Self::WrapText,
            0x0087 => Self::AnchorText,
            0x00BF => Self::TextBooleans,
            0x0104 => Self::BlipToDisplay,
            0x0105 => Self::PictureFileName,
            0x013F => Self::BlipBooleans,
            0x0142 => Self::GeomRight,
            0x0143 => Self::GeomBottom,
            0x0144 => Self::ShapePath,
            0x017F => Self::GeometryBooleans,
            0x0180 => Self::FillType,
            0x0181 => Self::FillColor,
            0x0182 => Self::FillOpacity,
            0x0183 => Self::FillBackColor,
            0x01BF => Self::FillStyleBooleans,
            0x01C0 => Self::LineColor,
            0x01CB => Self::LineWidth,
            0x01FF => Self::LineStyleBooleans,
            0x023F => Self::ShadowStyleBooleans,
            0x0380 => Self::ShapeName,
            0x0381 => Self::Description,
            0x0382 => Self::Hyperlink,
            0x03BF => Self::GroupShapeBooleans,
            _ => Self::Unknown,
        }
    }
}

// Boolean property bits: (value bit, "use" bit)
const FILLED_BITS: (u32, u32) = (1 << 4, 1 << 20);
const LINE_BITS: (u32, u32) = (1 << 3, 1 << 19);

/// One property table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Property id without the blob/complex flag bits
    pub id: u16,
    pub is_blob: bool,
    pub is_complex: bool,
    /// Simple value; for complex entries the encoder re-derives it from
    /// `complex_data`
    pub value: u32,
    pub complex_data: Vec<u8>,
}

impl Property {
    pub fn simple(id: u16, value: u32) -> Self {
        Self {
            id: id & PROPERTY_ID_MASK,
            is_blob: false,
            is_complex: false,
            value,
            complex_data: Vec::new(),
        }
    }

    pub fn blob(id: u16, value: u32) -> Self {
        Self {
            is_blob: true,
            ..Self::simple(id, value)
        }
    }

    pub fn complex(id: u16, data: Vec<u8>) -> Self {
        Self {
            id: id & PROPERTY_ID_MASK,
            is_blob: false,
            is_complex: true,
            value: data.len() as u32,
            complex_data: data,
        }
    }

    #[inline]
    pub fn kind(&self) -> EscherPropertyId {
        EscherPropertyId::from(self.id)
    }

    /// Raw id field including flag bits.
    #[inline]
    pub fn raw_id(&self) -> u16 {
        let mut raw = self.id & PROPERTY_ID_MASK;
        if self.is_blob {
            raw |= IS_BLOB;
        }
        if self.is_complex {
            raw |= IS_COMPLEX;
        }
        raw
    }

    #[inline]
    fn encoded_value(&self) -> u32 {
        if self.is_complex {
            self.complex_data.len() as u32
        } else {
            self.value
        }
    }
}

/// Decoded property table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertyTable {
    properties: SmallVec<[Property; 8]>,
    /// Bytes past the last complex entry, kept for round-tripping
    trailing: Vec<u8>,
}

impl PropertyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a table of `count` entries from an Opt payload.
    pub fn parse(count: u16, payload: &[u8]) -> Result<Self> {
        let count = count as usize;
        let mut cursor = ByteCursor::new(payload);
        let mut properties: SmallVec<[Property; 8]> = SmallVec::with_capacity(count);

        for _ in 0..count {
            let raw_id = cursor.read_u16()?;
            let value = cursor.read_u32()?;
            properties.push(Property {
                id: raw_id & PROPERTY_ID_MASK,
                is_blob: raw_id & IS_BLOB != 0,
                is_complex: raw_id & IS_COMPLEX != 0,
                value,
                complex_data: Vec::new(),
            });
        }

        for property in properties.iter_mut().filter(|p| p.is_complex) {
            let len = property.value as usize;
            if len > cursor.remaining() {
                return Err(Error::InvalidData(format!(
                    "complex property 0x{:04X} declares {} bytes, {} remain",
                    property.id,
                    len,
                    cursor.remaining()
                )));
            }
            property.complex_data = cursor.read_bytes(len)?.to_vec();
        }

        let trailing = cursor.read_bytes(cursor.remaining())?.to_vec();
        Ok(Self {
            properties,
            trailing,
        })
    }

    /// Number of entries (the record instance).
    #[inline]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    /// Serialized payload size, re-derived from the entries.
    pub fn payload_len(&self) -> usize {
        self.properties
            .iter()
            .map(|p| ENTRY_SIZE + if p.is_complex { p.complex_data.len() } else { 0 })
            .sum::<usize>()
            + self.trailing.len()
    }

    pub fn write_payload(&self, out: &mut ByteWriter) {
        for property in &self.properties {
            out.write_u16(property.raw_id());
            out.write_u32(property.encoded_value());
        }
        for property in self.properties.iter().filter(|p| p.is_complex) {
            out.write_bytes(&property.complex_data);
        }
        out.write_bytes(&self.trailing);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = ByteWriter::with_capacity(self.payload_len());
        self.write_payload(&mut out);
        out.into_inner()
    }

    pub fn get(&self, id: u16) -> Option<&Property> {
        let id = id & PROPERTY_ID_MASK;
        self.properties.iter().find(|p| p.id == id)
    }

    /// Insert or replace the entry with the same id.
    ///
    /// New entries keep the table sorted by id, matching what Excel writes.
    /// A new id is refused once the table holds [`MAX_PROPERTIES`] entries.
    pub fn set(&mut self, property: Property) -> Result<()> {
        if let Some(existing) = self.properties.iter_mut().find(|p| p.id == property.id) {
            *existing = property;
            return Ok(());
        }
        if self.properties.len() >= MAX_PROPERTIES {
            return Err(Error::PropertyTableFull(MAX_PROPERTIES));
        }
        let at = self
            .properties
            .iter()
            .position(|p| p.id > property.id)
            .unwrap_or(self.properties.len());
        self.properties.insert(at, property);
        Ok(())
    }

    pub fn remove(&mut self, id: u16) -> Option<Property> {
        let id = id & PROPERTY_ID_MASK;
        let at = self.properties.iter().position(|p| p.id == id)?;
        Some(self.properties.remove(at))
    }

    /// Simple value of an entry.
    pub fn value(&self, id: EscherPropertyId) -> Option<u32> {
        self.get(id as u16)
            .filter(|p| !p.is_complex)
            .map(|p| p.value)
    }

    fn text(&self, id: EscherPropertyId) -> Option<EncodedString> {
        let property = self.get(id as u16).filter(|p| p.is_complex)?;
        EncodedString::from_text(&parse_utf16le_string(&property.complex_data)).ok()
    }

    fn set_text(&mut self, id: EscherPropertyId, text: &str) -> Result<()> {
        let mut data: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
        data.extend_from_slice(&[0, 0]);
        self.set(Property::complex(id as u16, data))
    }

    /// Shape name.
    pub fn name(&self) -> Option<EncodedString> {
        self.text(EscherPropertyId::ShapeName)
    }

    pub fn set_name(&mut self, name: &str) -> Result<()> {
        self.set_text(EscherPropertyId::ShapeName, name)
    }

    /// Alternative text (caption).
    pub fn description(&self) -> Option<EncodedString> {
        self.text(EscherPropertyId::Description)
    }

    pub fn set_description(&mut self, description: &str) -> Result<()> {
        self.set_text(EscherPropertyId::Description, description)
    }

    /// 1-based index into the workbook's blip store.
    pub fn image_index(&self) -> Option<u32> {
        self.get(EscherPropertyId::BlipToDisplay as u16)
            .filter(|p| !p.is_complex)
            .map(|p| p.value)
    }

    pub fn set_image_index(&mut self, index: u32) -> Result<()> {
        self.set(Property::blob(EscherPropertyId::BlipToDisplay as u16, index))
    }

    pub fn fill_color(&self) -> Option<u32> {
        self.value(EscherPropertyId::FillColor)
    }

    pub fn line_color(&self) -> Option<u32> {
        self.value(EscherPropertyId::LineColor)
    }

    fn flag(&self, id: EscherPropertyId, (bit, use_bit): (u32, u32)) -> Option<bool> {
        self.value(id)
            .filter(|v| v & use_bit != 0)
            .map(|v| v & bit != 0)
    }

    fn set_flag(&mut self, id: EscherPropertyId, (bit, use_bit): (u32, u32), on: bool) -> Result<()> {
        let mut value = self.value(id).unwrap_or(0) | use_bit;
        if on {
            value |= bit;
        } else {
            value &= !bit;
        }
        self.set(Property::simple(id as u16, value))
    }

    /// Whether the shape is filled, if the table says so explicitly.
    pub fn filled(&self) -> Option<bool> {
        self.flag(EscherPropertyId::FillStyleBooleans, FILLED_BITS)
    }

    pub fn set_filled(&mut self, filled: bool) -> Result<()> {
        self.set_flag(EscherPropertyId::FillStyleBooleans, FILLED_BITS, filled)
    }

    /// Whether the shape has a border line, if the table says so explicitly.
    pub fn line(&self) -> Option<bool> {
        self.flag(EscherPropertyId::LineStyleBooleans, LINE_BITS)
    }

    pub fn set_line(&mut self, line: bool) -> Result<()> {
        self.set_flag(EscherPropertyId::LineStyleBooleans, LINE_BITS, line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> Vec<u8> {
        let mut out = ByteWriter::new();
        // fill colour
        out.write_u16(0x0181);
        out.write_u32(0x00FF_0000);
        // name, complex, 6 bytes
        out.write_u16(0x0380 | IS_COMPLEX);
        out.write_u32(6);
        // unknown id, kept raw
        out.write_u16(0x0ABC);
        out.write_u32(7);
        out.write_bytes(&[b'A', 0, b'b', 0, 0, 0]);
        out.into_inner()
    }

    #[test]
    fn test_two_pass_parse() {
        let payload = sample_payload();
        let table = PropertyTable::parse(3, &payload).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.fill_color(), Some(0x00FF_0000));
        assert_eq!(table.name().unwrap().text(), "Ab");
        let unknown = table.get(0x0ABC).unwrap();
        assert_eq!(unknown.kind(), EscherPropertyId::Unknown);
        assert_eq!(unknown.value, 7);
        assert_eq!(table.payload_len(), payload.len());
        assert_eq!(table.to_bytes(), payload);
    }

    #[test]
    fn test_truncated_complex_data_fails() {
        let mut payload = sample_payload();
        payload.truncate(payload.len() - 2);
        assert!(PropertyTable::parse(3, &payload).is_err());
    }

    #[test]
    fn test_setters_resize_table() {
        let mut table = PropertyTable::new();
        table.set_image_index(2).unwrap();
        assert_eq!(table.payload_len(), 6);
        assert_eq!(table.get(0x0104).map(|p| p.raw_id()), Some(0x4104));

        table.set_description("Chart").unwrap();
        assert_eq!(table.payload_len(), 12 + 12);
        assert_eq!(table.description().unwrap().text(), "Chart");

        let bytes = table.to_bytes();
        let reparsed = PropertyTable::parse(table.len() as u16, &bytes).unwrap();
        assert_eq!(reparsed, table);
        assert_eq!(reparsed.image_index(), Some(2));

        assert!(table.remove(0x0381).is_some());
        assert_eq!(table.payload_len(), 6);
    }

    #[test]
    fn test_boolean_flags() {
        let mut table = PropertyTable::new();
        assert_eq!(table.filled(), None);
        table.set_filled(false).unwrap();
        table.set_line(true).unwrap();
        assert_eq!(table.filled(), Some(false));
        assert_eq!(table.line(), Some(true));
        assert_eq!(
            table.value(EscherPropertyId::FillStyleBooleans),
            Some(1 << 20)
        );
        assert_eq!(
            table.value(EscherPropertyId::LineStyleBooleans),
            Some((1 << 19) | (1 << 3))
        );
    }

    #[test]
    fn test_set_keeps_id_order() {
        let mut table = PropertyTable::new();
        table.set(Property::simple(0x01C0, 1)).unwrap();
        table.set(Property::simple(0x0004, 2)).unwrap();
        table.set(Property::simple(0x0181, 3)).unwrap();
        let ids: Vec<u16> = table.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0x0004, 0x0181, 0x01C0]);
    }

    #[test]
    fn test_entry_count_fits_instance() {
        let mut table = PropertyTable::new();
        for id in 0..MAX_PROPERTIES as u16 {
            table.set(Property::simple(id, u32::from(id))).unwrap();
        }
        assert_eq!(table.len(), 0x0FFF);
        assert!(matches!(
            table.set(Property::simple(0x1000, 1)),
            Err(Error::PropertyTableFull(0x0FFF))
        ));
        table.set(Property::simple(0x0181, 7)).unwrap();
        assert_eq!(table.len(), 0x0FFF);
        assert_eq!(table.value(EscherPropertyId::FillColor), Some(7));

        let reparsed = PropertyTable::parse(table.len() as u16, &table.to_bytes()).unwrap();
        assert_eq!(reparsed, table);
    }
}
