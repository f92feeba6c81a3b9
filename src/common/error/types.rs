//! Unified error type for the record codecs.
//!
//! Decode errors are scoped to the smallest unit that can be abandoned (one
//! record, one sheet's drawing data); encode errors signal programming
//! defects and are never swallowed.
use thiserror::Error;

/// Main error type for record and string codec operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A fixed-width read ran past the end of the available bytes
    #[error(
        "unexpected end of record at offset {offset}: needed {needed} bytes, {available} available"
    )]
    UnexpectedEndOfRecord {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Fewer than 8 bytes remain where a record header is expected
    #[error("malformed record header at offset {offset}: only {available} bytes remain")]
    MalformedHeader { offset: usize, available: usize },

    /// An atom's declared payload length exceeds the remaining bytes
    #[error(
        "record 0x{record_type:04X} at offset {offset} declares {declared} bytes but only {available} remain"
    )]
    TruncatedRecord {
        record_type: u16,
        offset: usize,
        declared: u32,
        available: usize,
    },

    /// A container's declared length exceeds the remaining bytes
    #[error(
        "container 0x{record_type:04X} at offset {offset} declares {declared} bytes but only {available} remain"
    )]
    TruncatedContainer {
        record_type: u16,
        offset: usize,
        declared: u32,
        available: usize,
    },

    /// A container type the decoder cannot interpret structurally
    #[error("unknown container 0x{record_type:04X} at offset {offset}")]
    UnknownRequiredContainer { record_type: u16, offset: usize },

    /// A second shape container was flagged as the header instance
    #[error("shape {requested} cannot become the header instance: shape {existing} already is")]
    MultipleHeaderInstances { existing: u32, requested: u32 },

    /// An encoded container length disagrees with the bytes that follow it
    #[error(
        "container 0x{record_type:04X} at offset {offset} declares {declared} bytes but its children occupy {actual}"
    )]
    LengthMismatchOnEncode {
        record_type: u16,
        offset: usize,
        declared: u32,
        actual: u32,
    },

    /// A continuation split was requested at a non-breakable offset
    #[error("offset {offset} is not a legal continuation split point")]
    IllegalSplitPoint { offset: usize },

    /// An unsplittable chunk does not fit in a single physical record
    #[error("{size} unsplittable bytes exceed the {max} byte record payload of record 0x{record_type:04X}")]
    RecordTooLarge {
        record_type: u16,
        size: usize,
        max: usize,
    },

    /// No shape container carries the requested shape id
    #[error("shape {0} not found")]
    ShapeNotFound(u32),

    /// The record id does not name a shape container
    #[error("record {0} is not a shape container")]
    NotAShapeContainer(u32),

    /// The tree has no group-shape container to hold shapes
    #[error("drawing has no group shape container")]
    MissingGroupShape,

    /// Cached field offsets were invalidated by a structural change
    #[error("cached record offsets are stale; rebuild the tree before patching")]
    StaleLayout,

    /// Text exceeds the 16-bit character count of an encoded string
    #[error("string of {0} UTF-16 code units exceeds the 65535 character limit")]
    StringTooLong(usize),

    /// More formatting runs than the 16-bit run count can describe
    #[error("{0} formatting runs exceed the 65535 run limit")]
    TooManyRuns(usize),

    /// A property table cannot grow past the 12-bit entry count of its header
    #[error("property table already holds the maximum of {0} entries")]
    PropertyTableFull(usize),

    /// Structurally invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl Error {
    /// Whether a decode failure should degrade the enclosing sheet's drawing
    /// data to "absent" rather than abort the whole document load.
    pub fn degrades_to_absent(&self) -> bool {
        matches!(
            self,
            Error::UnexpectedEndOfRecord { .. }
                | Error::MalformedHeader { .. }
                | Error::TruncatedRecord { .. }
                | Error::TruncatedContainer { .. }
                | Error::UnknownRequiredContainer { .. }
                | Error::InvalidData(_)
        )
    }
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;
