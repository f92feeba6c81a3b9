//! Arena-owned Escher record tree.
//!
//! Records live in a flat arena and refer to each other through stable
//! [`RecordId`]s, so a shape can be looked up, patched or removed without
//! walking parent pointers by reference. Each record remembers the offset of
//! its header in the last decoded or encoded byte layout; those offsets drive
//! in-place patches until a structural edit invalidates them.
//!
//! # Layout
//!
//! ```text
//! DgContainer (0xF002)
//! ├── Dg (0xF008)                shape count, last shape id
//! ├── [RegroupItems / ColorScheme]
//! ├── SpgrContainer (0xF003)
//! │   ├── [Spgr (0xF009)]        header instance only
//! │   ├── [Sp (0xF00A)]          header instance only: seed, group + patriarch
//! │   ├── SpContainer (0xF004)
//! │   │   ├── Sp, Opt, ClientAnchor, ClientData
//! │   ├── [ClientTextbox (0xF00D)] attached text of the preceding shape
//! │   └── ...
//! └── [SolverContainer (0xF005)]
//! ```

use super::atoms::{Atom, ClientAnchor, DrawingAtom, ShapeAtom};
use super::header::{HEADER_SIZE, RecordHeader};
use super::properties::PropertyTable;
use super::services::TreeId;
use super::types::EscherRecordType;
use crate::common::error::{Error, Result};
use crate::common::options::CodecOptions;
use smallvec::SmallVec;

/// Deepest container nesting the decoder follows.
const MAX_DEPTH: usize = 64;

/// Child list of a container record.
pub type Children = SmallVec<[RecordId; 4]>;

/// Stable handle of a record inside one [`ShapeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u32);

impl RecordId {
    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub(super) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Record contents: either nested children or a typed leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordBody {
    Container {
        record_type: u16,
        instance: u16,
        children: Children,
    },
    Atom(Atom),
}

impl RecordBody {
    pub fn container(kind: EscherRecordType) -> Self {
        RecordBody::Container {
            record_type: kind.into(),
            instance: 0,
            children: Children::new(),
        }
    }

    pub fn record_type(&self) -> u16 {
        match self {
            RecordBody::Container { record_type, .. } => *record_type,
            RecordBody::Atom(atom) => atom.record_type(),
        }
    }

    #[inline]
    pub fn kind(&self) -> EscherRecordType {
        EscherRecordType::from(self.record_type())
    }

    #[inline]
    pub fn is_container(&self) -> bool {
        matches!(self, RecordBody::Container { .. })
    }
}

/// One arena slot.
#[derive(Debug, Clone)]
pub struct Record {
    pub body: RecordBody,
    pub parent: Option<RecordId>,
    pub(super) offset: Option<usize>,
    pub(super) declared_length: Option<u32>,
}

impl Record {
    /// Offset of this record's header in the last decoded or encoded layout.
    #[inline]
    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// Length field as last read or written.
    #[inline]
    pub fn declared_length(&self) -> Option<u32> {
        self.declared_length
    }

    pub fn atom(&self) -> Option<&Atom> {
        match &self.body {
            RecordBody::Atom(atom) => Some(atom),
            RecordBody::Container { .. } => None,
        }
    }

    pub fn children(&self) -> &[RecordId] {
        match &self.body {
            RecordBody::Container { children, .. } => children,
            RecordBody::Atom(_) => &[],
        }
    }
}

/// The shape carrying the drawing's bookkeeping atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInstance {
    /// Shape container flagged as header
    pub shape: RecordId,
    /// Group coordinate atom preceding it
    pub group_coordinates: Option<RecordId>,
    /// Seed shape-id atom preceding it
    pub seed: Option<RecordId>,
}

/// Totals accumulated while decoding, and reproduced while encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawingSummary {
    /// Bytes of every shape container, headers included
    pub shape_container_total: u32,
    /// Whether a drawing-group container was seen
    pub is_header_instance: bool,
    /// Length of the first solver container
    pub solver_length: Option<u32>,
    /// Number of shape containers
    pub shape_count: u32,
}

impl DrawingSummary {
    pub(super) fn record(&mut self, header: &RecordHeader) {
        match header.kind() {
            EscherRecordType::SpContainer => {
                self.shape_container_total += HEADER_SIZE as u32 + header.length;
                self.shape_count += 1;
            }
            EscherRecordType::DgContainer => self.is_header_instance = true,
            EscherRecordType::SolverContainer if self.solver_length.is_none() => {
                self.solver_length = Some(header.length);
            }
            _ => {},
        }
    }
}

/// A decoded drawing: the records of one sheet's or chart's drawing data.
#[derive(Debug)]
pub struct ShapeTree {
    pub(super) id: TreeId,
    pub(super) records: Vec<Option<Record>>,
    pub(super) roots: Children,
    pub(super) header: Option<HeaderInstance>,
    /// Byte length of the layout the cached offsets describe
    pub(super) layout_len: Option<usize>,
    pub(super) summary: DrawingSummary,
}

impl Clone for ShapeTree {
    /// Clones get a fresh [`TreeId`].
    fn clone(&self) -> Self {
        Self {
            id: TreeId::next(),
            records: self.records.clone(),
            roots: self.roots.clone(),
            header: self.header,
            layout_len: self.layout_len,
            summary: self.summary,
        }
    }
}

/// Structural equality: same record shapes and contents, ignoring arena
/// slot numbering and cached offsets.
impl PartialEq for ShapeTree {
    fn eq(&self, other: &Self) -> bool {
        self.roots.len() == other.roots.len()
            && self
                .roots
                .iter()
                .zip(other.roots.iter())
                .all(|(&a, &b)| self.subtree_eq(a, other, b))
            && self.header_shape_id() == other.header_shape_id()
    }
}

impl ShapeTree {
    pub(super) fn empty() -> Self {
        Self {
            id: TreeId::next(),
            records: Vec::new(),
            roots: Children::new(),
            header: None,
            layout_len: None,
            summary: DrawingSummary::default(),
        }
    }

    /// A drawing with a descriptor atom and an empty group shape.
    pub fn new(drawing_id: u16) -> Self {
        let mut tree = Self::empty();
        let dg = tree.alloc(RecordBody::container(EscherRecordType::DgContainer), None);
        tree.roots.push(dg);
        tree.alloc_child(
            dg,
            RecordBody::Atom(Atom::Drawing(DrawingAtom::new(drawing_id, 0, 0))),
        );
        tree.alloc_child(dg, RecordBody::container(EscherRecordType::SpgrContainer));
        tree
    }

    // -------------------------------------------------------------------------
    // Arena
    // -------------------------------------------------------------------------

    pub(super) fn alloc(&mut self, body: RecordBody, parent: Option<RecordId>) -> RecordId {
        let id = RecordId(self.records.len() as u32);
        self.records.push(Some(Record {
            body,
            parent,
            offset: None,
            declared_length: None,
        }));
        id
    }

    pub(super) fn alloc_child(&mut self, parent: RecordId, body: RecordBody) -> RecordId {
        let id = self.alloc(body, Some(parent));
        if let Some(children) = self.children_mut(parent) {
            children.push(id);
        }
        id
    }

    pub(super) fn insert_child(
        &mut self,
        parent: RecordId,
        index: usize,
        body: RecordBody,
    ) -> RecordId {
        let id = self.alloc(body, Some(parent));
        if let Some(children) = self.children_mut(parent) {
            let index = index.min(children.len());
            children.insert(index, id);
        }
        id
    }

    /// Unlink `id` from its parent (or the root list) and free its subtree.
    pub(super) fn remove_record(&mut self, id: RecordId) {
        match self.parent(id) {
            Some(parent) => {
                if let Some(children) = self.children_mut(parent) {
                    children.retain(|child| *child != id);
                }
            }
            None => self.roots.retain(|root| *root != id),
        }

        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(record) = self.records.get_mut(next.index()).and_then(Option::take) {
                stack.extend_from_slice(record.children());
            }
        }
    }

    pub(super) fn record_mut(&mut self, id: RecordId) -> Option<&mut Record> {
        self.records.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub(super) fn atom_mut(&mut self, id: RecordId) -> Option<&mut Atom> {
        match &mut self.record_mut(id)?.body {
            RecordBody::Atom(atom) => Some(atom),
            RecordBody::Container { .. } => None,
        }
    }

    fn children_mut(&mut self, id: RecordId) -> Option<&mut Children> {
        match &mut self.record_mut(id)?.body {
            RecordBody::Container { children, .. } => Some(children),
            RecordBody::Atom(_) => None,
        }
    }

    fn subtree_eq(&self, a: RecordId, other: &ShapeTree, b: RecordId) -> bool {
        match (self.record(a).map(|r| &r.body), other.record(b).map(|r| &r.body)) {
            (
                Some(RecordBody::Container {
                    record_type: t1,
                    instance: i1,
                    children: c1,
                }),
                Some(RecordBody::Container {
                    record_type: t2,
                    instance: i2,
                    children: c2,
                }),
            ) => {
                t1 == t2
                    && i1 == i2
                    && c1.len() == c2.len()
                    && c1
                        .iter()
                        .zip(c2.iter())
                        .all(|(&x, &y)| self.subtree_eq(x, other, y))
            }
            (Some(RecordBody::Atom(x)), Some(RecordBody::Atom(y))) => x == y,
            _ => false,
        }
    }

    // -------------------------------------------------------------------------
    // Navigation
    // -------------------------------------------------------------------------

    #[inline]
    pub fn id(&self) -> TreeId {
        self.id
    }

    pub fn record(&self, id: RecordId) -> Option<&Record> {
        self.records.get(id.index()).and_then(Option::as_ref)
    }

    #[inline]
    pub fn roots(&self) -> &[RecordId] {
        &self.roots
    }

    pub fn children(&self, id: RecordId) -> &[RecordId] {
        self.record(id).map(Record::children).unwrap_or(&[])
    }

    pub fn parent(&self, id: RecordId) -> Option<RecordId> {
        self.record(id)?.parent
    }

    pub fn kind(&self, id: RecordId) -> Option<EscherRecordType> {
        self.record(id).map(|r| r.body.kind())
    }

    /// Every live record in document order.
    pub fn preorder(&self) -> Vec<RecordId> {
        let mut order = Vec::with_capacity(self.records.len());
        let mut stack: Vec<RecordId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        order
    }

    fn first_child_of_kind(&self, parent: RecordId, kind: EscherRecordType) -> Option<RecordId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|&child| self.kind(child) == Some(kind))
    }

    /// First child of `container` with the given type code.
    pub fn atom_child(
        &self,
        container: RecordId,
        kind: EscherRecordType,
    ) -> Option<(RecordId, &Atom)> {
        let id = self.first_child_of_kind(container, kind)?;
        Some((id, self.record(id)?.atom()?))
    }

    pub fn drawing_group(&self) -> Option<RecordId> {
        self.roots
            .iter()
            .copied()
            .find(|&root| self.kind(root) == Some(EscherRecordType::DgContainer))
    }

    /// The top-level group shape container that holds the shapes.
    pub fn group_shape(&self) -> Option<RecordId> {
        match self.drawing_group() {
            Some(dg) => self.first_child_of_kind(dg, EscherRecordType::SpgrContainer),
            None => self
                .roots
                .iter()
                .copied()
                .find(|&root| self.kind(root) == Some(EscherRecordType::SpgrContainer)),
        }
    }

    pub fn solver(&self) -> Option<RecordId> {
        self.first_child_of_kind(self.drawing_group()?, EscherRecordType::SolverContainer)
    }

    /// The drawing descriptor atom.
    pub fn drawing(&self) -> Option<&DrawingAtom> {
        match self.atom_child(self.drawing_group()?, EscherRecordType::Dg)? {
            (_, Atom::Drawing(dg)) => Some(dg),
            _ => None,
        }
    }

    pub fn drawing_id(&self) -> u16 {
        self.drawing().map_or(0, |dg| dg.drawing_id)
    }

    /// Every shape container in document order.
    pub fn shapes(&self) -> Vec<RecordId> {
        self.preorder()
            .into_iter()
            .filter(|&id| self.kind(id) == Some(EscherRecordType::SpContainer))
            .collect()
    }

    pub fn shape(&self, container: RecordId) -> Option<&ShapeAtom> {
        match self.atom_child(container, EscherRecordType::Sp)? {
            (_, Atom::Shape(sp)) => Some(sp),
            _ => None,
        }
    }

    #[inline]
    pub fn shape_id(&self, container: RecordId) -> Option<u32> {
        self.shape(container).map(|sp| sp.shape_id)
    }

    pub fn properties(&self, container: RecordId) -> Option<&PropertyTable> {
        match self.atom_child(container, EscherRecordType::Opt)? {
            (_, Atom::Properties(table)) => Some(table),
            _ => None,
        }
    }

    pub fn anchor(&self, container: RecordId) -> Option<&ClientAnchor> {
        match self.atom_child(container, EscherRecordType::ClientAnchor)? {
            (_, Atom::ClientAnchor(anchor)) => Some(anchor),
            _ => None,
        }
    }

    /// Shape container whose identity atom carries `shape_id`.
    pub fn find_shape(&self, shape_id: u32) -> Option<RecordId> {
        self.shapes()
            .into_iter()
            .find(|&id| self.shape_id(id) == Some(shape_id))
    }

    /// The attached-text atom following `container`, if any.
    pub fn attached_text(&self, container: RecordId) -> Option<RecordId> {
        let siblings = self.children(self.parent(container)?);
        let index = siblings.iter().position(|&id| id == container)?;
        let next = *siblings.get(index + 1)?;
        match self.record(next)?.atom()? {
            Atom::ClientTextbox(_) => Some(next),
            _ => None,
        }
    }

    #[inline]
    pub fn header_instance(&self) -> Option<HeaderInstance> {
        self.header
    }

    pub fn header_shape_id(&self) -> Option<u32> {
        self.shape_id(self.header?.shape)
    }

    /// Totals of the last decode or encode.
    #[inline]
    pub fn summary(&self) -> DrawingSummary {
        self.summary
    }

    /// Whether cached offsets still describe a byte layout.
    #[inline]
    pub fn is_layout_valid(&self) -> bool {
        self.layout_len.is_some()
    }

    /// Locate the header instance from loose bookkeeping atoms.
    ///
    /// A group coordinate atom or patriarch seed atom sitting directly in a
    /// group shape container flags the shape container that follows it.
    fn detect_header(&mut self) -> Result<()> {
        let groups: Vec<RecordId> = self
            .preorder()
            .into_iter()
            .filter(|&id| self.kind(id) == Some(EscherRecordType::SpgrContainer))
            .collect();

        for group in groups {
            let mut coords = None;
            let mut seed = None;
            for child in Children::from_slice(self.children(group)) {
                let body = self.record(child).map(|r| &r.body);
                let is_coords = matches!(body, Some(RecordBody::Atom(Atom::GroupCoordinates(_))));
                let is_seed = matches!(
                    body,
                    Some(RecordBody::Atom(Atom::Shape(sp))) if sp.is_patriarch()
                );

                if is_coords {
                    coords = Some(child);
                } else if is_seed {
                    seed = Some(child);
                } else if self.kind(child) == Some(EscherRecordType::SpContainer)
                    && (coords.is_some() || seed.is_some())
                {
                    if let Some(existing) = self.header {
                        return Err(Error::MultipleHeaderInstances {
                            existing: self.shape_id(existing.shape).unwrap_or(0),
                            requested: self.shape_id(child).unwrap_or(0),
                        });
                    }
                    self.header = Some(HeaderInstance {
                        shape: child,
                        group_coordinates: coords.take(),
                        seed: seed.take(),
                    });
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Decoding
// =============================================================================

struct TreeParser<'a> {
    tree: ShapeTree,
    data: &'a [u8],
    options: &'a CodecOptions,
    summary: DrawingSummary,
}

impl<'a> TreeParser<'a> {
    /// Decode the record at `offset`, which must end by `end`.
    ///
    /// Returns the new record and the offset just past it.
    fn parse_record(
        &mut self,
        offset: usize,
        end: usize,
        parent: Option<RecordId>,
        depth: usize,
    ) -> Result<(RecordId, usize)> {
        let (header, consumed) = RecordHeader::decode(&self.data[..end], offset)?;
        let body_start = offset + consumed;
        let available = end - body_start;
        let declared = header.length as usize;
        let kind = header.kind();

        if header.is_container() && kind.is_container() {
            if declared > available {
                return Err(Error::TruncatedContainer {
                    record_type: header.record_type,
                    offset,
                    declared: header.length,
                    available,
                });
            }
            if depth >= MAX_DEPTH {
                return Err(Error::InvalidData(format!(
                    "containers nested deeper than {} levels at offset {}",
                    MAX_DEPTH, offset
                )));
            }
            self.summary.record(&header);

            let id = self.tree.alloc(
                RecordBody::Container {
                    record_type: header.record_type,
                    instance: header.instance,
                    children: Children::new(),
                },
                parent,
            );
            let child_end = body_start + declared;
            let mut pos = body_start;
            while pos < child_end {
                let (child, next) = self.parse_record(pos, child_end, Some(id), depth + 1)?;
                if let Some(children) = self.tree.children_mut(id) {
                    children.push(child);
                }
                pos = next;
            }
            self.stamp(id, offset, header.length);
            return Ok((id, child_end));
        }

        if header.is_container() {
            if self.options.strict_containers {
                return Err(Error::UnknownRequiredContainer {
                    record_type: header.record_type,
                    offset,
                });
            }
            log::warn!(
                "unknown escher container 0x{:04X} at offset {} kept opaque",
                header.record_type,
                offset
            );
        }

        if declared > available {
            return Err(Error::TruncatedRecord {
                record_type: header.record_type,
                offset,
                declared: header.length,
                available,
            });
        }
        let payload = &self.data[body_start..body_start + declared];
        let atom = if header.is_container() {
            Atom::Opaque {
                header,
                payload: payload.to_vec(),
            }
        } else {
            Atom::decode(header, payload)
        };
        let id = self.tree.alloc(RecordBody::Atom(atom), parent);
        self.stamp(id, offset, header.length);
        Ok((id, body_start + declared))
    }

    fn stamp(&mut self, id: RecordId, offset: usize, length: u32) {
        if let Some(record) = self.tree.record_mut(id) {
            record.offset = Some(offset);
            record.declared_length = Some(length);
        }
    }
}

/// Decode drawing bytes with default options.
pub fn parse_tree(bytes: &[u8]) -> Result<ShapeTree> {
    parse_tree_with(bytes, &CodecOptions::default())
}

/// Decode drawing bytes into a [`ShapeTree`].
///
/// The bytes may hold several top-level records; each becomes a root.
pub fn parse_tree_with(bytes: &[u8], options: &CodecOptions) -> Result<ShapeTree> {
    let mut parser = TreeParser {
        tree: ShapeTree::empty(),
        data: bytes,
        options,
        summary: DrawingSummary::default(),
    };

    let mut offset = 0;
    while offset < bytes.len() {
        let (root, next) = parser.parse_record(offset, bytes.len(), None, 0)?;
        parser.tree.roots.push(root);
        offset = next;
    }

    let mut tree = parser.tree;
    tree.summary = parser.summary;
    tree.layout_len = Some(bytes.len());
    tree.detect_header()?;
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::binary::ByteWriter;
    use crate::ole::escher::atoms::ShapeFlags;

    fn atom_bytes(atom: &Atom) -> Vec<u8> {
        let mut out = ByteWriter::new();
        atom.write(&mut out);
        out.into_inner()
    }

    fn container_bytes(kind: EscherRecordType, children: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = children.concat();
        let mut out = RecordHeader::container(kind.into(), 0, body.len() as u32)
            .encode()
            .to_vec();
        out.extend_from_slice(&body);
        out
    }

    fn shape_container(shape_id: u32) -> Vec<u8> {
        container_bytes(
            EscherRecordType::SpContainer,
            &[
                atom_bytes(&Atom::Shape(ShapeAtom::new(
                    1,
                    shape_id,
                    ShapeFlags::HAVE_ANCHOR,
                ))),
                atom_bytes(&Atom::ClientAnchor(ClientAnchor::cells(0, 0, 2, 3))),
                atom_bytes(&Atom::ClientData(Vec::new())),
            ],
        )
    }

    #[test]
    fn test_parse_nested_drawing() {
        let bytes = container_bytes(
            EscherRecordType::DgContainer,
            &[
                atom_bytes(&Atom::Drawing(DrawingAtom::new(1, 2, 1026))),
                container_bytes(
                    EscherRecordType::SpgrContainer,
                    &[shape_container(1025), shape_container(1026)],
                ),
                container_bytes(EscherRecordType::SolverContainer, &[]),
            ],
        );

        let tree = parse_tree(&bytes).unwrap();
        assert_eq!(tree.roots().len(), 1);
        assert_eq!(tree.drawing().map(|dg| dg.last_shape_id), Some(1026));
        assert_eq!(tree.shapes().len(), 2);
        assert!(tree.solver().is_some());
        assert!(tree.header_instance().is_none());

        let shape = tree.find_shape(1026).unwrap();
        assert_eq!(tree.anchor(shape), Some(&ClientAnchor::cells(0, 0, 2, 3)));
        assert_eq!(tree.parent(shape), tree.group_shape());

        let summary = tree.summary();
        assert!(summary.is_header_instance);
        assert_eq!(summary.shape_count, 2);
        assert_eq!(summary.solver_length, Some(0));
        assert_eq!(
            summary.shape_container_total as usize,
            shape_container(1025).len() * 2
        );

        // offsets point at record headers in the input
        let dg = tree.drawing_group().unwrap();
        assert_eq!(tree.record(dg).and_then(Record::offset), Some(0));
        let group = tree.group_shape().unwrap();
        assert_eq!(tree.record(group).and_then(Record::offset), Some(8 + 16));
    }

    #[test]
    fn test_truncated_container() {
        let mut bytes = container_bytes(EscherRecordType::SpgrContainer, &[shape_container(5)]);
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(
            parse_tree(&bytes),
            Err(Error::TruncatedContainer {
                record_type: 0xF003,
                offset: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_truncated_atom() {
        let mut bytes = atom_bytes(&Atom::ClientAnchor(ClientAnchor::default()));
        bytes.truncate(20);
        assert!(matches!(
            parse_tree(&bytes),
            Err(Error::TruncatedRecord {
                declared: 18,
                available: 12,
                ..
            })
        ));
    }

    #[test]
    fn test_child_overrunning_parent_is_truncated() {
        // The container claims 10 bytes, its only child claims 18 + 8.
        let mut bytes = RecordHeader::container(0xF004, 0, 10).encode().to_vec();
        bytes.extend(atom_bytes(&Atom::ClientAnchor(ClientAnchor::default())));
        assert!(matches!(
            parse_tree(&bytes),
            Err(Error::MalformedHeader { .. }) | Err(Error::TruncatedRecord { .. })
        ));
    }

    #[test]
    fn test_unknown_container_preserved_or_rejected() {
        let mut bytes = RecordHeader::container(0xF0AA, 0, 3).encode().to_vec();
        bytes.extend_from_slice(&[1, 2, 3]);

        let tree = parse_tree(&bytes).unwrap();
        let root = tree.roots()[0];
        match tree.record(root).and_then(Record::atom) {
            Some(Atom::Opaque { header, payload }) => {
                assert_eq!(header.record_type, 0xF0AA);
                assert_eq!(payload, &vec![1, 2, 3]);
            }
            other => panic!("expected opaque atom, got {:?}", other),
        }

        assert!(matches!(
            parse_tree_with(&bytes, &CodecOptions::strict()),
            Err(Error::UnknownRequiredContainer {
                record_type: 0xF0AA,
                offset: 0
            })
        ));
    }

    #[test]
    fn test_nested_unknown_container_reencodes_exactly() {
        let opaque_child = [0x10, 0x00, 0x33, 0xF1, 0x02, 0x00, 0x00, 0x00, 0xDE, 0xAD];
        let mut unknown = RecordHeader::container(0xF0AA, 5, opaque_child.len() as u32)
            .encode()
            .to_vec();
        unknown.extend_from_slice(&opaque_child);

        let bytes = container_bytes(
            EscherRecordType::DgContainer,
            &[
                atom_bytes(&Atom::Drawing(DrawingAtom::new(1, 0, 1024))),
                unknown,
            ],
        );
        assert_eq!(bytes[8 + 16] & 0x0F, 0x0F);

        let mut tree = parse_tree(&bytes).unwrap();
        let dg = tree.drawing_group().unwrap();
        assert_eq!(tree.children(dg).len(), 2);
        assert_eq!(tree.encode().unwrap(), bytes);
    }

    #[test]
    fn test_header_detected_from_loose_atoms() {
        let bytes = container_bytes(
            EscherRecordType::SpgrContainer,
            &[
                atom_bytes(&Atom::GroupCoordinates(Default::default())),
                atom_bytes(&Atom::Shape(ShapeAtom::patriarch(1024))),
                shape_container(1025),
                shape_container(1026),
            ],
        );
        let tree = parse_tree(&bytes).unwrap();
        let header = tree.header_instance().unwrap();
        assert_eq!(tree.header_shape_id(), Some(1025));
        assert!(header.group_coordinates.is_some());
        assert!(header.seed.is_some());
        assert_eq!(tree.find_shape(1024), None);
    }

    #[test]
    fn test_second_header_rejected() {
        let bytes = container_bytes(
            EscherRecordType::SpgrContainer,
            &[
                atom_bytes(&Atom::Shape(ShapeAtom::patriarch(1024))),
                shape_container(1025),
                atom_bytes(&Atom::Shape(ShapeAtom::patriarch(1027))),
                shape_container(1026),
            ],
        );
        assert!(matches!(
            parse_tree(&bytes),
            Err(Error::MultipleHeaderInstances {
                existing: 1025,
                requested: 1026
            })
        ));
    }

    #[test]
    fn test_structural_equality_ignores_arena_layout() {
        let a = ShapeTree::new(3);
        let b = ShapeTree::new(3);
        assert_eq!(a, b);
        assert_ne!(a.id(), b.id());
        assert_ne!(a, ShapeTree::new(4));
    }

    #[test]
    fn test_remove_record_frees_subtree() {
        let mut tree = ShapeTree::new(1);
        let group = tree.group_shape().unwrap();
        let sp = tree.alloc_child(group, RecordBody::container(EscherRecordType::SpContainer));
        let atom = tree.alloc_child(
            sp,
            RecordBody::Atom(Atom::Shape(ShapeAtom::new(1, 1025, ShapeFlags::empty()))),
        );
        tree.remove_record(sp);
        assert!(tree.record(sp).is_none());
        assert!(tree.record(atom).is_none());
        assert!(tree.children(group).is_empty());
    }
}
