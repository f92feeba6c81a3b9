//! OfficeArt (Escher) drawing records.
//!
//! Escher is Microsoft's drawing layer format. Spreadsheets store one
//! drawing per sheet or chart: a drawing-group container holding a
//! descriptor atom, a group shape with one container per shape, and an
//! optional solver container.
//!
//! # Architecture
//!
//! - **Arena tree**: records are owned by a [`ShapeTree`] and addressed by
//!   stable [`RecordId`]s
//! - **Closed atom set**: the handful of atoms the codec edits are typed;
//!   everything else round-trips as [`Atom::Opaque`]
//! - **Derived lengths**: every container length is recomputed on encode
//! - **Cached offsets**: fixed-size fields are patched in place until a
//!   structural edit invalidates the layout
//!
//! # Modules
//!
//! - `types`: Escher record type codes
//! - `header`: 8-byte record header codec
//! - `atoms`: typed atoms (shape, anchor, descriptor, ...)
//! - `properties`: property tables (Opt records)
//! - `tree`: arena tree and decoder
//! - `builder`: two-pass encoder and length verification
//! - `edit`: patches and structural edits
//! - `services`: shape id allocation and drawing observers

pub mod atoms;
pub mod builder;
pub mod edit;
pub mod header;
pub mod properties;
pub mod services;
pub mod tree;
pub mod types;

pub use atoms::{
    Atom, ClientAnchor, DrawingAtom, GroupCoordinates, ShapeAtom, ShapeFlags, shape_type,
};
pub use builder::{build_tree, verify_container_lengths};
pub use edit::{NewShape, PatchOutcome};
pub use header::{HEADER_SIZE, RecordHeader, decode_header, encode_header};
pub use properties::{EscherPropertyId, Property, PropertyTable};
pub use services::{DrawingObserver, SequentialShapeIds, ShapeIdAllocator, TreeId};
pub use tree::{
    DrawingSummary, HeaderInstance, Record, RecordBody, RecordId, ShapeTree, parse_tree,
    parse_tree_with,
};
pub use types::EscherRecordType;
