/// OfficeArt (Escher) drawing records
///
/// This module decodes, edits and re-encodes the container/atom tree that
/// stores a sheet's shapes.
pub mod escher;

/// BIFF8 spreadsheet records
///
/// This module provides rich string encoding and the CONTINUE framing used
/// by shared strings and drawing data.
pub mod xls;
