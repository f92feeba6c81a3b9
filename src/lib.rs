//! OfficeArt-BIFF - drawing trees and rich strings for legacy spreadsheets
//!
//! This library reads and writes two pieces of the BIFF8 spreadsheet format
//! that must stay byte-exact across edits:
//!
//! # Features
//!
//! - **Escher drawing trees**: Decode, edit and re-encode the OfficeArt
//!   container/atom tree behind a sheet's shapes, with every container length
//!   recomputed on encode
//! - **Header instance bookkeeping**: Insert and remove the drawing-group
//!   atoms that precede the first shape of a drawing
//! - **Targeted patches**: Update anchors, shape ids and property tables in
//!   an encoded buffer without a rebuild while the layout is unchanged
//! - **Rich strings**: Compressed or UTF-16 strings with formatting runs and
//!   phonetic blocks, including the offsets where a CONTINUE record may split
//!   them
//! - **Record framing**: SST and MSODRAWING records with CONTINUE support
//!
//! # Example - Building a drawing
//!
//! ```
//! use officeart_biff::ole::escher::{
//!     ClientAnchor, NewShape, SequentialShapeIds, ShapeTree, parse_tree, shape_type,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut tree = ShapeTree::new(1);
//! let mut ids = SequentialShapeIds::new();
//!
//! let anchor = ClientAnchor::cells(1, 1, 4, 6);
//! let shape_id = tree.add_shape(NewShape::new(shape_type::RECTANGLE, anchor), &mut ids, &mut ())?;
//! assert_eq!(shape_id, 1024);
//!
//! let bytes = tree.encode()?;
//! let decoded = parse_tree(&bytes)?;
//! assert_eq!(decoded.shapes().len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Splitting a long string
//!
//! ```
//! use officeart_biff::ole::xls::EncodedString;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let text = "a".repeat(9000);
//! let string = EncodedString::from_text(&text)?;
//!
//! // Offset 3 is the end of the string header; offset 4 is inside the characters.
//! assert!(!string.is_breakable_point(3, 0));
//! assert!(string.is_breakable_point(4, 0));
//!
//! let (head, tail) = string.split_at(4, 0)?;
//! assert_eq!(head.len(), 4);
//! assert_eq!(tail[0], 0x00);
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod ole;

pub use common::{CodecOptions, Error, Result};
