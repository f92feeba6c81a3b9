//! BIFF8 encoded strings (XLUnicodeRichExtendedString).
//!
//! # Format
//!
//! - Header: char_count (2 bytes) + flags (1 byte)
//! - Flags bit 0 (`fHighByte`): 0 = compressed Latin-1, 1 = UTF-16LE
//! - Flags bit 2 (`fExtSt`): phonetic block follows the runs
//! - Flags bit 3 (`fRichSt`): rich text runs follow the characters
//! - If fRichSt: 2-byte run count follows the flags
//! - If fExtSt: 4-byte phonetic block size follows
//! - Then the character data
//! - Then the rich text runs (4 bytes each) if fRichSt
//! - Then the phonetic block if fExtSt
//!
//! `char_count` counts UTF-16 code units, never bytes.
//!
//! When a string is split across a CONTINUE record the continuation starts
//! with a repeated flags byte carrying only `fHighByte`. Offsets passed to
//! [`EncodedString::is_breakable_point`] and [`EncodedString::split_at`] are
//! logical: they count the bytes of [`EncodedString::encode`] and never that
//! repeated byte.

use super::phonetic::PhoneticBlock;
use crate::common::binary::{ByteCursor, ByteWriter};
use crate::common::error::{Error, Result};
use crate::common::options::MAX_RECORD_PAYLOAD;

/// String option flags.
pub mod flags {
    pub const HIGH_BYTE: u8 = 0x01;
    pub const EXT_ST: u8 = 0x04;
    pub const RICH_ST: u8 = 0x08;
}

/// Size of one rich text run.
pub const RUN_SIZE: usize = 4;

/// Font change at a character position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RichRun {
    pub char_index: u16,
    pub font_index: u16,
}

/// Byte regions of an encoded string, relative to its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringLayout {
    pub chars_start: usize,
    pub chars_end: usize,
    pub runs_end: usize,
    pub total: usize,
}

/// A BIFF8 string with optional rich runs and phonetic block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncodedString {
    units: Vec<u16>,
    double_byte: bool,
    runs: Option<Vec<RichRun>>,
    phonetic: Option<Vec<u8>>,
}

impl EncodedString {
    /// Encode `text`, picking the narrowest width that holds every character.
    pub fn from_text(text: &str) -> Result<Self> {
        let mut string = Self::default();
        string.set_text(text)?;
        Ok(string)
    }

    /// Build from raw code units, keeping the stored width.
    pub(crate) fn from_units(units: Vec<u16>, double_byte: bool) -> Self {
        Self {
            double_byte: double_byte || units.iter().any(|&unit| unit > 0xFF),
            units,
            runs: None,
            phonetic: None,
        }
    }

    /// Decode a string occupying all of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (string, consumed) = Self::decode_prefix(bytes)?;
        if consumed != bytes.len() {
            return Err(Error::InvalidData(format!(
                "{} trailing bytes after encoded string",
                bytes.len() - consumed
            )));
        }
        Ok(string)
    }

    /// Decode the string at the start of `bytes`.
    ///
    /// Returns the string and the number of bytes consumed.
    pub fn decode_prefix(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut cursor = ByteCursor::new(bytes);
        let count = cursor.read_u16()? as usize;
        let option_flags = cursor.read_u8()?;
        let double_byte = option_flags & flags::HIGH_BYTE != 0;

        let run_count = if option_flags & flags::RICH_ST != 0 {
            Some(cursor.read_u16()? as usize)
        } else {
            None
        };
        let phonetic_len = if option_flags & flags::EXT_ST != 0 {
            Some(cursor.read_u32()? as usize)
        } else {
            None
        };

        let units = if double_byte {
            cursor
                .read_bytes(count * 2)?
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect()
        } else {
            cursor.read_bytes(count)?.iter().map(|&b| b as u16).collect()
        };

        let runs = match run_count {
            Some(n) => {
                let mut runs = Vec::with_capacity(n);
                for _ in 0..n {
                    runs.push(RichRun {
                        char_index: cursor.read_u16()?,
                        font_index: cursor.read_u16()?,
                    });
                }
                Some(runs)
            }
            None => None,
        };

        let phonetic = match phonetic_len {
            Some(len) => Some(cursor.read_bytes(len)?.to_vec()),
            None => None,
        };

        Ok((
            Self {
                units,
                double_byte,
                runs,
                phonetic,
            },
            cursor.position(),
        ))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = ByteWriter::with_capacity(self.serialized_len());
        self.write(&mut out);
        out.into_inner()
    }

    pub fn write(&self, out: &mut ByteWriter) {
        out.write_u16(self.count());
        out.write_u8(self.flags());
        if let Some(runs) = &self.runs {
            out.write_u16(runs.len() as u16);
        }
        if let Some(phonetic) = &self.phonetic {
            out.write_u32(phonetic.len() as u32);
        }
        if self.double_byte {
            for &unit in &self.units {
                out.write_u16(unit);
            }
        } else {
            for &unit in &self.units {
                out.write_u8(unit as u8);
            }
        }
        for run in self.runs.iter().flatten() {
            out.write_u16(run.char_index);
            out.write_u16(run.font_index);
        }
        if let Some(phonetic) = &self.phonetic {
            out.write_bytes(phonetic);
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Character count (UTF-16 code units).
    #[inline]
    pub fn count(&self) -> u16 {
        self.units.len() as u16
    }

    #[inline]
    pub fn is_double_byte(&self) -> bool {
        self.double_byte
    }

    #[inline]
    pub fn has_rich_runs(&self) -> bool {
        self.runs.is_some()
    }

    #[inline]
    pub fn has_phonetic_block(&self) -> bool {
        self.phonetic.is_some()
    }

    pub fn flags(&self) -> u8 {
        let mut value = 0;
        if self.double_byte {
            value |= flags::HIGH_BYTE;
        }
        if self.phonetic.is_some() {
            value |= flags::EXT_ST;
        }
        if self.runs.is_some() {
            value |= flags::RICH_ST;
        }
        value
    }

    pub fn text(&self) -> String {
        String::from_utf16_lossy(&self.units)
    }

    pub fn runs(&self) -> &[RichRun] {
        self.runs.as_deref().unwrap_or(&[])
    }

    /// Raw phonetic block bytes.
    pub fn phonetic_block(&self) -> Option<&[u8]> {
        self.phonetic.as_deref()
    }

    /// Decoded phonetic block, if present and well formed.
    pub fn phonetic(&self) -> Option<PhoneticBlock> {
        PhoneticBlock::parse(self.phonetic.as_deref()?)
    }

    /// Attach formatting runs. The run count field is 16 bits wide.
    pub fn with_runs(mut self, runs: Vec<RichRun>) -> Result<Self> {
        if runs.len() > u16::MAX as usize {
            return Err(Error::TooManyRuns(runs.len()));
        }
        self.runs = Some(runs);
        Ok(self)
    }

    pub fn with_phonetic_block(mut self, block: Vec<u8>) -> Self {
        self.phonetic = Some(block);
        self
    }

    // -------------------------------------------------------------------------
    // Layout
    // -------------------------------------------------------------------------

    /// Bytes before the character data: count, flags and the optional
    /// run count and phonetic size fields.
    pub fn header_len(&self) -> usize {
        3 + if self.runs.is_some() { 2 } else { 0 } + if self.phonetic.is_some() { 4 } else { 0 }
    }

    #[inline]
    pub fn char_width(&self) -> usize {
        if self.double_byte { 2 } else { 1 }
    }

    pub fn layout(&self) -> StringLayout {
        let chars_start = self.header_len();
        let chars_end = chars_start + self.units.len() * self.char_width();
        let runs_end = chars_end + self.runs().len() * RUN_SIZE;
        let total = runs_end + self.phonetic.as_ref().map_or(0, Vec::len);
        StringLayout {
            chars_start,
            chars_end,
            runs_end,
            total,
        }
    }

    #[inline]
    pub fn serialized_len(&self) -> usize {
        self.layout().total
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Replace the text, recomputing count and width.
    ///
    /// Rich runs and the phonetic block describe the old text and are
    /// dropped.
    pub fn set_text(&mut self, text: &str) -> Result<()> {
        let units: Vec<u16> = text.encode_utf16().collect();
        if units.len() > u16::MAX as usize {
            return Err(Error::StringTooLong(units.len()));
        }
        self.double_byte = units.iter().any(|&unit| unit > 0xFF);
        self.units = units;
        self.runs = None;
        self.phonetic = None;
        Ok(())
    }

    /// [`set_text`](Self::set_text), returning the new serialized length.
    pub fn reencode_text(&mut self, text: &str) -> Result<usize> {
        self.set_text(text)?;
        Ok(self.serialized_len())
    }

    // -------------------------------------------------------------------------
    // Continuation splits
    // -------------------------------------------------------------------------

    /// Whether a CONTINUE boundary may fall at `logical_offset`.
    ///
    /// `record_start_offset` is the logical offset of this string's first
    /// byte. Legal points lie strictly inside the character data of a string
    /// longer than one record payload with at least two characters, and on
    /// a character boundary.
    pub fn is_breakable_point(&self, logical_offset: usize, record_start_offset: usize) -> bool {
        self.is_breakable_point_within(logical_offset, record_start_offset, MAX_RECORD_PAYLOAD)
    }

    /// [`is_breakable_point`](Self::is_breakable_point) against a custom
    /// record payload size.
    pub fn is_breakable_point_within(
        &self,
        logical_offset: usize,
        record_start_offset: usize,
        max_payload: usize,
    ) -> bool {
        let Some(relative) = logical_offset.checked_sub(record_start_offset) else {
            return false;
        };
        let layout = self.layout();
        relative > layout.chars_start
            && relative < layout.chars_end
            && layout.total > max_payload
            && self.units.len() >= 2
            && (relative - layout.chars_start) % self.char_width() == 0
    }

    /// Split the encoded string at a breakable point.
    ///
    /// Returns the bytes before the boundary and the continuation fragment,
    /// which starts with the repeated width flag.
    pub fn split_at(
        &self,
        logical_offset: usize,
        record_start_offset: usize,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        self.split_at_within(logical_offset, record_start_offset, MAX_RECORD_PAYLOAD)
    }

    pub fn split_at_within(
        &self,
        logical_offset: usize,
        record_start_offset: usize,
        max_payload: usize,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        if !self.is_breakable_point_within(logical_offset, record_start_offset, max_payload) {
            return Err(Error::IllegalSplitPoint {
                offset: logical_offset,
            });
        }
        let relative = logical_offset - record_start_offset;
        let mut encoded = self.encode();
        let mut tail = Vec::with_capacity(encoded.len() - relative + 1);
        tail.push(self.flags() & flags::HIGH_BYTE);
        tail.extend_from_slice(&encoded[relative..]);
        encoded.truncate(relative);
        Ok((encoded, tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_then_japanese() {
        let mut string = EncodedString::from_text("Hello").unwrap();
        assert_eq!(string.count(), 5);
        assert!(!string.is_double_byte());
        let bytes = string.encode();
        assert_eq!(bytes, vec![5, 0, 0x00, b'H', b'e', b'l', b'l', b'o']);
        assert_eq!(string.layout().chars_end - string.layout().chars_start, 5);

        string = string
            .with_runs(vec![RichRun {
                char_index: 1,
                font_index: 6,
            }])
            .unwrap()
            .with_phonetic_block(vec![1, 0, 0, 0]);
        assert!(string.has_rich_runs());

        let len = string.reencode_text("日本語").unwrap();
        assert_eq!(string.count(), 3);
        assert!(string.is_double_byte());
        assert!(!string.has_rich_runs());
        assert!(!string.has_phonetic_block());
        assert_eq!(len, 3 + 6);
        let bytes = string.encode();
        assert_eq!(bytes[2], flags::HIGH_BYTE);
        assert_eq!(&bytes[3..5], &0x65E5u16.to_le_bytes());
    }

    #[test]
    fn test_rich_and_phonetic_layout() {
        let string = EncodedString::from_text("abc")
            .unwrap()
            .with_runs(vec![
                RichRun {
                    char_index: 0,
                    font_index: 5,
                },
                RichRun {
                    char_index: 2,
                    font_index: 6,
                },
            ])
            .unwrap()
            .with_phonetic_block(vec![0xAA; 5]);
        let bytes = string.encode();
        assert_eq!(bytes[2], flags::RICH_ST | flags::EXT_ST);
        assert_eq!(&bytes[3..5], &[2, 0]);
        assert_eq!(&bytes[5..9], &[5, 0, 0, 0]);
        assert_eq!(&bytes[9..12], b"abc");
        assert_eq!(
            string.layout(),
            StringLayout {
                chars_start: 9,
                chars_end: 12,
                runs_end: 20,
                total: 25,
            }
        );
        assert_eq!(EncodedString::decode(&bytes).unwrap(), string);
    }

    #[test]
    fn test_decode_prefix_reports_consumed() {
        let mut bytes = EncodedString::from_text("xy").unwrap().encode();
        bytes.extend_from_slice(&[0xFF, 0xFF]);
        let (string, consumed) = EncodedString::decode_prefix(&bytes).unwrap();
        assert_eq!(string.text(), "xy");
        assert_eq!(consumed, 5);
        assert!(EncodedString::decode(&bytes).is_err());
    }

    #[test]
    fn test_truncated_characters() {
        let bytes = [4, 0, 0x01, b'a', 0];
        assert!(matches!(
            EncodedString::decode(&bytes),
            Err(Error::UnexpectedEndOfRecord { needed: 8, .. })
        ));
    }

    #[test]
    fn test_too_long() {
        let text = "a".repeat(70_000);
        assert!(matches!(
            EncodedString::from_text(&text),
            Err(Error::StringTooLong(70_000))
        ));
    }

    #[test]
    fn test_run_count_limit() {
        let run = RichRun {
            char_index: 1,
            font_index: 3,
        };
        assert!(matches!(
            EncodedString::from_text("ab").unwrap().with_runs(vec![run; 65_536]),
            Err(Error::TooManyRuns(65_536))
        ));

        let string = EncodedString::from_text("ab")
            .unwrap()
            .with_runs(vec![run; 65_535])
            .unwrap();
        let bytes = string.encode();
        assert_eq!(&bytes[3..5], &[0xFF, 0xFF]);
        assert_eq!(EncodedString::decode(&bytes).unwrap(), string);
    }

    #[test]
    fn test_breakable_points() {
        let narrow = EncodedString::from_text(&"a".repeat(9000)).unwrap();
        // 3-byte header at logical offset 100
        assert!(!narrow.is_breakable_point(103, 100));
        assert!(narrow.is_breakable_point(104, 100));
        assert!(narrow.is_breakable_point(100 + 3 + 8999, 100));
        assert!(!narrow.is_breakable_point(100 + 3 + 9000, 100));
        assert!(!narrow.is_breakable_point(50, 100));

        let wide = EncodedString::from_text(&"é€".repeat(4200)).unwrap();
        assert!(wide.is_double_byte());
        assert!(wide.is_breakable_point(3 + 2, 0));
        assert!(!wide.is_breakable_point(3 + 3, 0));

        // fits one record: never split
        let short = EncodedString::from_text(&"a".repeat(100)).unwrap();
        assert!(!short.is_breakable_point(50, 0));
        assert!(short.is_breakable_point_within(50, 0, 64));

        let single = EncodedString::from_text("a").unwrap();
        assert!(!single.is_breakable_point_within(3, 0, 0));
    }

    #[test]
    fn test_split_repeats_flag() {
        let wide = EncodedString::from_text(&"€".repeat(20)).unwrap();
        let (head, tail) = wide.split_at_within(13, 0, 16).unwrap();
        assert_eq!(head.len(), 13);
        assert_eq!(tail[0], flags::HIGH_BYTE);
        assert_eq!(head.len() + tail.len() - 1, wide.serialized_len());

        assert!(matches!(
            wide.split_at_within(14, 0, 16),
            Err(Error::IllegalSplitPoint { offset: 14 })
        ));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn any_string() -> impl Strategy<Value = EncodedString> {
            (
                "\\PC{0,40}",
                proptest::option::of(proptest::collection::vec(any::<(u16, u16)>(), 0..4)),
                proptest::option::of(proptest::collection::vec(any::<u8>(), 0..12)),
            )
                .prop_map(|(text, runs, phonetic)| {
                    let mut string = EncodedString::from_text(&text).unwrap();
                    if let Some(runs) = runs {
                        string = string.with_runs(
                            runs.into_iter()
                                .map(|(char_index, font_index)| RichRun { char_index, font_index })
                                .collect(),
                        )
                        .unwrap();
                    }
                    if let Some(phonetic) = phonetic {
                        string = string.with_phonetic_block(phonetic);
                    }
                    string
                })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            #[test]
            fn prop_string_roundtrip(string in any_string()) {
                let bytes = string.encode();
                prop_assert_eq!(bytes.len(), string.serialized_len());
                prop_assert_eq!(EncodedString::decode(&bytes).unwrap(), string);
            }

            #[test]
            fn prop_width_matches_text(text in "\\PC{0,40}") {
                let string = EncodedString::from_text(&text).unwrap();
                let needs_wide = text.encode_utf16().any(|u| u > 0xFF);
                prop_assert_eq!(string.is_double_byte(), needs_wide);
                prop_assert_eq!(string.count() as usize, text.encode_utf16().count());
                let layout = string.layout();
                prop_assert_eq!(
                    layout.chars_end - layout.chars_start,
                    string.count() as usize * if needs_wide { 2 } else { 1 }
                );
                prop_assert_eq!(string.text(), text);
            }

            #[test]
            fn prop_breakpoints_never_split_a_character(
                string in any_string(),
                start in 0usize..64,
                offset in 0usize..256,
                max in 0usize..64,
            ) {
                if string.is_breakable_point_within(offset, start, max) {
                    let layout = string.layout();
                    let relative = offset - start;
                    prop_assert!(relative > layout.chars_start && relative < layout.chars_end);
                    prop_assert_eq!((relative - layout.chars_start) % string.char_width(), 0);

                    let (head, tail) = string.split_at_within(offset, start, max).unwrap();
                    let mut joined = head;
                    joined.extend_from_slice(&tail[1..]);
                    prop_assert_eq!(joined, string.encode());
                } else {
                    let is_illegal = matches!(
                        string.split_at_within(offset, start, max),
                        Err(Error::IllegalSplitPoint { .. })
                    );
                    prop_assert!(is_illegal);
                }
            }
        }
    }
}
