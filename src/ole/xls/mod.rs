//! BIFF8 records used around drawing and shared string data.
//!
//! # Modules
//!
//! - `string`: rich encoded strings and their continuation split points
//! - `phonetic`: phonetic guide blocks attached to strings
//! - `continuation`: physical record iteration, CONTINUE gathering and writing
//! - `sst`: shared string table
//! - `drawing`: MSODRAWING framing for sheet drawings

pub mod continuation;
pub mod drawing;
pub mod phonetic;
pub mod sst;
pub mod string;

pub use continuation::{
    BiffRecord, BiffRecordIter, CONTINUE, ContinueWriter, FragmentCursor, LogicalRecord,
};
pub use drawing::{MSODRAWING, read_sheet_drawing, write_drawing_records, write_sheet_drawing};
pub use phonetic::{PhoneticBlock, PhoneticRun};
pub use sst::{SST, SharedStrings, parse_sst, read_sst, write_sst};
pub use string::{EncodedString, RichRun, StringLayout};
