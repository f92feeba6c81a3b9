//! Common types and utilities shared by the record codecs.

// Submodule declarations
pub mod binary;
pub mod error;
pub mod options;

// Re-exports for convenience
pub use binary::{ByteCursor, ByteWriter};
pub use error::{Error, Result};
pub use options::{CodecOptions, MAX_RECORD_PAYLOAD};
