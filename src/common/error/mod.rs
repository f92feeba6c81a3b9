//! Unified error types for the codecs.

// Submodule declarations
pub mod types;

// Re-exports
pub use types::{Error, Result};
