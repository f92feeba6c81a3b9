//! Escher record header codec.
//!
//! # Format
//!
//! Every Escher record starts with an 8-byte little-endian header:
//! - Bytes 0-1: Version (low 4 bits) | Instance (high 12 bits)
//! - Bytes 2-3: Record Type
//! - Bytes 4-7: Record Length (payload bytes, excluding this header)
//!
//! A version of `0xF` marks a container; its length is the total size of the
//! records nested inside it.

use super::types::EscherRecordType;
use crate::common::error::{Error, Result};
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{FromBytes, IntoBytes};
use zerocopy_derive::*;

/// Size of an encoded record header.
pub const HEADER_SIZE: usize = 8;

/// Version nibble that marks a container record.
pub const CONTAINER_VERSION: u8 = 0x0F;

/// Raw on-disk header layout.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct RawRecordHeader {
    ver_inst: U16<LittleEndian>,
    rec_type: U16<LittleEndian>,
    length: U32<LittleEndian>,
}

/// Decoded Escher record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHeader {
    /// Version (4 bits); `0xF` for containers
    pub version: u8,
    /// Instance (12 bits)
    pub instance: u16,
    /// Record type code
    pub record_type: u16,
    /// Payload length in bytes
    pub length: u32,
}

impl RecordHeader {
    pub const fn new(version: u8, instance: u16, record_type: u16, length: u32) -> Self {
        Self {
            version: version & 0x0F,
            instance: instance & 0x0FFF,
            record_type,
            length,
        }
    }

    pub const fn container(record_type: u16, instance: u16, length: u32) -> Self {
        Self::new(CONTAINER_VERSION, instance, record_type, length)
    }

    #[inline]
    pub const fn is_container(&self) -> bool {
        self.version == CONTAINER_VERSION
    }

    #[inline]
    pub fn kind(&self) -> EscherRecordType {
        EscherRecordType::from(self.record_type)
    }

    /// Decode the header at `offset`.
    ///
    /// Returns the header and the number of bytes consumed (always 8).
    pub fn decode(data: &[u8], offset: usize) -> Result<(Self, usize)> {
        let available = data.len().saturating_sub(offset);
        if available < HEADER_SIZE {
            return Err(Error::MalformedHeader { offset, available });
        }
        let raw = RawRecordHeader::read_from_bytes(&data[offset..offset + HEADER_SIZE])
            .map_err(|_| Error::MalformedHeader { offset, available })?;

        let ver_inst = raw.ver_inst.get();
        Ok((
            Self {
                version: (ver_inst & 0x000F) as u8,
                instance: (ver_inst >> 4) & 0x0FFF,
                record_type: raw.rec_type.get(),
                length: raw.length.get(),
            },
            HEADER_SIZE,
        ))
    }

    /// Encode the header into its 8-byte on-disk form.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let raw = RawRecordHeader {
            ver_inst: U16::new((self.version as u16 & 0x000F) | ((self.instance & 0x0FFF) << 4)),
            rec_type: U16::new(self.record_type),
            length: U32::new(self.length),
        };
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }
}

/// Decode a record header at `offset`; see [`RecordHeader::decode`].
#[inline]
pub fn decode_header(data: &[u8], offset: usize) -> Result<(RecordHeader, usize)> {
    RecordHeader::decode(data, offset)
}

/// Encode a record header; see [`RecordHeader::encode`].
#[inline]
pub fn encode_header(header: &RecordHeader) -> [u8; HEADER_SIZE] {
    header.encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_container_header() {
        let data = [
            0x0F, 0x00, // version=0xF, instance=0
            0x04, 0xF0, // record type = 0xF004 (SpContainer)
            0x08, 0x00, 0x00, 0x00, // length = 8
        ];

        let (header, consumed) = decode_header(&data, 0).unwrap();
        assert_eq!(consumed, 8);
        assert_eq!(header.version, 0x0F);
        assert_eq!(header.instance, 0);
        assert_eq!(header.kind(), EscherRecordType::SpContainer);
        assert_eq!(header.length, 8);
        assert!(header.is_container());
    }

    #[test]
    fn test_instance_packing() {
        // Opt record: version 3, 5 properties
        let header = RecordHeader::new(0x03, 5, 0xF00B, 30);
        let bytes = encode_header(&header);
        assert_eq!(bytes, [0x53, 0x00, 0x0B, 0xF0, 0x1E, 0x00, 0x00, 0x00]);

        // Sp record: version 2, shape type 202 (text box)
        let header = RecordHeader::new(0x02, 202, 0xF00A, 8);
        let bytes = encode_header(&header);
        assert_eq!(bytes[0], 0xA2);
        assert_eq!(bytes[1], 0x0C);
        let (decoded, _) = decode_header(&bytes, 0).unwrap();
        assert_eq!(decoded, header);
        assert!(!decoded.is_container());
    }

    #[test]
    fn test_masks_out_of_range_fields() {
        let header = RecordHeader::new(0x1F, 0xFFFF, 0xF004, 0);
        assert_eq!(header.version, 0x0F);
        assert_eq!(header.instance, 0x0FFF);
    }

    #[test]
    fn test_short_input_is_malformed() {
        let data = [0x0F, 0x00, 0x04, 0xF0, 0x08, 0x00, 0x00];
        assert!(matches!(
            decode_header(&data, 0),
            Err(Error::MalformedHeader {
                offset: 0,
                available: 7
            })
        ));
        assert!(matches!(
            decode_header(&data, 9),
            Err(Error::MalformedHeader { available: 0, .. })
        ));
    }
}
