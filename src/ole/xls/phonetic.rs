//! Phonetic guide blocks (ExtRst) attached to BIFF8 strings.
//!
//! East Asian producers store furigana for a string in an extended block
//! after its rich text runs. The block is a small TLV:
//!
//! ```text
//! rt: u16 (0x0001)   cb: u16
//! phs:      font_index u16, settings u16
//! rphssub:  run_count u16, char_count u16, text_len u16, text (UTF-16LE)
//! runs:     run_count * (first u16, base_first u16, base_count u16)
//! ```
//!
//! Layouts vary between writers, so parsing is best effort: a block that does
//! not follow the structure above falls back to scanning for an embedded
//! BIFF8 string and keeps only its text.

use super::string::EncodedString;
use crate::common::binary::{ByteCursor, ByteWriter};
use crate::common::error::Result;

/// ExtRst record type for phonetic information.
pub const PHONETIC_RECORD_TYPE: u16 = 0x0001;

/// Offsets tried when scanning a malformed block for embedded text.
const SCAN_WINDOW: usize = 32;

/// Maps a span of phonetic text onto the base characters it annotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhoneticRun {
    pub first: u16,
    pub base_first: u16,
    pub base_count: u16,
}

/// Decoded phonetic guide block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PhoneticBlock {
    pub font_index: u16,
    /// Raw `phs.info` bits: phonetic type, alignment.
    pub settings: u16,
    pub text: String,
    pub runs: Vec<PhoneticRun>,
}

impl PhoneticBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Parse an ExtRst block. Returns `None` when no phonetic text can be
    /// recovered.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let mut pos = 0usize;
        while let Some(header) = bytes.get(pos..pos + 4) {
            let rt = u16::from_le_bytes([header[0], header[1]]);
            let cb = u16::from_le_bytes([header[2], header[3]]) as usize;
            pos += 4;
            let Some(body) = bytes.get(pos..pos + cb) else {
                break;
            };
            pos += cb;

            if rt == PHONETIC_RECORD_TYPE {
                if let Ok(block) = Self::parse_body(body) {
                    return Some(block);
                }
                if let Some(text) = scan_for_embedded_string(body) {
                    return Some(Self::new(text));
                }
            }
        }

        scan_for_embedded_string(bytes).map(Self::new)
    }

    fn parse_body(body: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(body);
        let font_index = cursor.read_u16()?;
        let settings = cursor.read_u16()?;
        let run_count = cursor.read_u16()? as usize;
        let _char_count = cursor.read_u16()?;
        let text_len = cursor.read_u16()? as usize;
        let units: Vec<u16> = cursor
            .read_bytes(text_len * 2)?
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        let mut runs = Vec::with_capacity(run_count);
        for _ in 0..run_count {
            runs.push(PhoneticRun {
                first: cursor.read_u16()?,
                base_first: cursor.read_u16()?,
                base_count: cursor.read_u16()?,
            });
        }

        Ok(Self {
            font_index,
            settings,
            text: String::from_utf16_lossy(&units),
            runs,
        })
    }

    /// Encode as an ExtRst block suitable for
    /// [`EncodedString::with_phonetic_block`].
    pub fn to_bytes(&self) -> Vec<u8> {
        let units: Vec<u16> = self.text.encode_utf16().collect();
        let body_len = 4 + 6 + units.len() * 2 + self.runs.len() * 6;

        let mut out = ByteWriter::with_capacity(4 + body_len);
        out.write_u16(PHONETIC_RECORD_TYPE);
        out.write_u16(body_len as u16);
        out.write_u16(self.font_index);
        out.write_u16(self.settings);
        out.write_u16(self.runs.len() as u16);
        out.write_u16(units.len() as u16);
        out.write_u16(units.len() as u16);
        for unit in units {
            out.write_u16(unit);
        }
        for run in &self.runs {
            out.write_u16(run.first);
            out.write_u16(run.base_first);
            out.write_u16(run.base_count);
        }
        out.into_inner()
    }
}

/// Best scoring BIFF8 string found near the start of `bytes`.
fn scan_for_embedded_string(bytes: &[u8]) -> Option<String> {
    let max_start = bytes.len().saturating_sub(3).min(SCAN_WINDOW);
    let mut best: Option<(usize, String)> = None;

    for start in 0..=max_start {
        let Ok((string, _)) = EncodedString::decode_prefix(&bytes[start..]) else {
            continue;
        };
        let text: String = string.text().chars().filter(|&c| c != '\0').collect();
        if text.is_empty() {
            continue;
        }

        let score = text.chars().filter(|c| !c.is_control()).count();
        match &best {
            Some((best_score, _)) if *best_score >= score => {},
            _ => best = Some((score, text)),
        }
    }

    best.map(|(_, text)| text)
}
