//! Targeted updates and structural edits on a [`ShapeTree`].
//!
//! Fixed-size fields (anchor bounds, shape ids, same-size property tables)
//! are patched straight into the caller's encoded bytes at the offsets
//! cached by the last decode or encode. Anything that changes a record's
//! size is applied to the model only, invalidates the cached layout and
//! leaves the caller to encode again.

use super::atoms::{Atom, ClientAnchor, DrawingAtom, GroupCoordinates, ShapeAtom, ShapeFlags};
use super::header::HEADER_SIZE;
use super::properties::PropertyTable;
use super::services::{DrawingObserver, ShapeIdAllocator};
use super::tree::{HeaderInstance, RecordBody, RecordId, ShapeTree};
use super::types::EscherRecordType;
use crate::common::binary::ByteWriter;
use crate::common::error::{Error, Result};

/// Result of a targeted update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The encoded bytes were updated in place.
    Patched,
    /// Only the model changed; the tree must be encoded again.
    RebuildRequired,
}

/// Description of a shape to append to a drawing.
#[derive(Debug, Clone)]
pub struct NewShape {
    pub shape_type: u16,
    pub flags: ShapeFlags,
    pub properties: PropertyTable,
    pub anchor: ClientAnchor,
    pub client_data: Vec<u8>,
    /// Follow the shape with an attached-text atom
    pub attached_text: bool,
}

impl NewShape {
    pub fn new(shape_type: u16, anchor: ClientAnchor) -> Self {
        Self {
            shape_type,
            flags: ShapeFlags::HAVE_ANCHOR | ShapeFlags::HAVE_SPT,
            properties: PropertyTable::new(),
            anchor,
            client_data: Vec::new(),
            attached_text: false,
        }
    }

    pub fn with_flags(mut self, flags: ShapeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_properties(mut self, properties: PropertyTable) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_client_data(mut self, data: Vec<u8>) -> Self {
        self.client_data = data;
        self
    }

    pub fn with_attached_text(mut self, attached_text: bool) -> Self {
        self.attached_text = attached_text;
        self
    }
}

impl ShapeTree {
    // -------------------------------------------------------------------------
    // In-place patches
    // -------------------------------------------------------------------------

    /// Cached offsets must describe exactly `buf`.
    fn check_layout(&self, buf: &[u8]) -> Result<()> {
        match self.layout_len {
            Some(len) if len == buf.len() => Ok(()),
            _ => Err(Error::StaleLayout),
        }
    }

    /// Byte range of an atom's payload in the current layout.
    fn payload_range(&self, id: RecordId, len: usize) -> Result<std::ops::Range<usize>> {
        let offset = self
            .record(id)
            .and_then(|r| r.offset())
            .ok_or(Error::StaleLayout)?;
        let start = offset + HEADER_SIZE;
        Ok(start..start + len)
    }

    fn write_payload(&self, buf: &mut [u8], id: RecordId, bytes: &[u8]) -> Result<()> {
        let range = self.payload_range(id, bytes.len())?;
        buf.get_mut(range)
            .ok_or(Error::StaleLayout)?
            .copy_from_slice(bytes);
        Ok(())
    }

    fn shape_container(&self, shape_id: u32) -> Result<RecordId> {
        self.find_shape(shape_id)
            .ok_or(Error::ShapeNotFound(shape_id))
    }

    /// Move a shape's anchor, rewriting the 18 anchor bytes in `buf`.
    pub fn patch_anchor(&mut self, buf: &mut [u8], shape_id: u32, anchor: ClientAnchor) -> Result<()> {
        self.check_layout(buf)?;
        let container = self.shape_container(shape_id)?;
        let id = match self.atom_child(container, EscherRecordType::ClientAnchor) {
            Some((id, Atom::ClientAnchor(_))) => id,
            _ => {
                return Err(Error::InvalidData(format!(
                    "shape {} has no client anchor",
                    shape_id
                )));
            }
        };

        self.write_payload(buf, id, &anchor.to_bytes())?;
        if let Some(Atom::ClientAnchor(current)) = self.atom_mut(id) {
            *current = anchor;
        }
        Ok(())
    }

    /// Renumber a shape, rewriting its id and the drawing descriptor in `buf`.
    pub fn patch_shape_id(&mut self, buf: &mut [u8], shape_id: u32, new_id: u32) -> Result<()> {
        self.check_layout(buf)?;
        let container = self.shape_container(shape_id)?;
        if new_id != shape_id && self.find_shape(new_id).is_some() {
            return Err(Error::InvalidData(format!("shape id {} already in use", new_id)));
        }
        let (id, _) = self
            .atom_child(container, EscherRecordType::Sp)
            .ok_or(Error::NotAShapeContainer(container.get()))?;

        self.write_payload(buf, id, &new_id.to_le_bytes())?;
        if let Some(Atom::Shape(sp)) = self.atom_mut(id) {
            sp.shape_id = new_id;
        }

        // The descriptor is fixed-size too.
        self.refresh_descriptor();
        if let Some(dg) = self.drawing_group()
            && let Some((dg_atom, Atom::Drawing(descriptor))) =
                self.atom_child(dg, EscherRecordType::Dg)
        {
            let mut payload = [0u8; DrawingAtom::PAYLOAD_SIZE];
            payload[..4].copy_from_slice(&descriptor.shape_count.to_le_bytes());
            payload[4..].copy_from_slice(&descriptor.last_shape_id.to_le_bytes());
            self.write_payload(buf, dg_atom, &payload)?;
        }
        Ok(())
    }

    /// Replace a shape's property table.
    ///
    /// Same-size tables are written into `buf`; anything else updates the
    /// model, invalidates the layout and notifies `observer`.
    pub fn patch_property_table(
        &mut self,
        buf: &mut [u8],
        shape_id: u32,
        table: PropertyTable,
        observer: &mut dyn DrawingObserver,
    ) -> Result<PatchOutcome> {
        let container = self.shape_container(shape_id)?;
        let existing = match self.atom_child(container, EscherRecordType::Opt) {
            Some((id, Atom::Properties(current))) => Some((id, current.payload_len())),
            Some((id, _)) => Some((id, usize::MAX)),
            None => None,
        };

        match existing {
            Some((id, len)) if self.is_layout_valid() && len == table.payload_len() => {
                self.check_layout(buf)?;
                let atom = Atom::Properties(table);
                let mut out = ByteWriter::with_capacity(atom.serialized_len());
                atom.write(&mut out);
                let offset = self
                    .record(id)
                    .and_then(|r| r.offset())
                    .ok_or(Error::StaleLayout)?;
                buf.get_mut(offset..offset + out.position())
                    .ok_or(Error::StaleLayout)?
                    .copy_from_slice(out.as_slice());
                if let Some(current) = self.atom_mut(id) {
                    *current = atom;
                }
                Ok(PatchOutcome::Patched)
            }
            Some((id, _)) => {
                if let Some(current) = self.atom_mut(id) {
                    *current = Atom::Properties(table);
                }
                self.invalidate_layout(observer);
                Ok(PatchOutcome::RebuildRequired)
            }
            None => {
                // Property tables follow the identity atom.
                let index = self
                    .children(container)
                    .iter()
                    .position(|&child| self.kind(child) == Some(EscherRecordType::Sp))
                    .map_or(0, |i| i + 1);
                self.insert_child(container, index, RecordBody::Atom(Atom::Properties(table)));
                self.invalidate_layout(observer);
                Ok(PatchOutcome::RebuildRequired)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Header instance
    // -------------------------------------------------------------------------

    /// Flag a shape as the header instance.
    ///
    /// Inserts the group coordinate and seed atoms before the shape's
    /// container; the seed id comes from `ids`. Flagging the current header
    /// again is a no-op.
    pub fn set_header_instance(
        &mut self,
        shape_id: u32,
        ids: &mut dyn ShapeIdAllocator,
        observer: &mut dyn DrawingObserver,
    ) -> Result<()> {
        let container = self.shape_container(shape_id)?;
        if let Some(header) = self.header {
            if header.shape == container {
                return Ok(());
            }
            return Err(Error::MultipleHeaderInstances {
                existing: self.shape_id(header.shape).unwrap_or(0),
                requested: shape_id,
            });
        }

        let parent = self
            .parent(container)
            .filter(|&p| self.kind(p) == Some(EscherRecordType::SpgrContainer))
            .ok_or(Error::MissingGroupShape)?;
        let index = self
            .children(parent)
            .iter()
            .position(|&child| child == container)
            .ok_or(Error::NotAShapeContainer(container.get()))?;

        let seed_id = ids.allocate_shape_id(self.drawing_id());
        let coords = self.insert_child(
            parent,
            index,
            RecordBody::Atom(Atom::GroupCoordinates(GroupCoordinates::default())),
        );
        let seed = self.insert_child(
            parent,
            index + 1,
            RecordBody::Atom(Atom::Shape(ShapeAtom::patriarch(seed_id))),
        );
        self.header = Some(HeaderInstance {
            shape: container,
            group_coordinates: Some(coords),
            seed: Some(seed),
        });
        log::debug!("shape {} is now the header instance (seed {})", shape_id, seed_id);

        self.after_structural_edit(observer);
        Ok(())
    }

    /// Remove the header bookkeeping atoms, releasing the seed id.
    pub fn clear_header_instance(
        &mut self,
        ids: &mut dyn ShapeIdAllocator,
        observer: &mut dyn DrawingObserver,
    ) {
        if self.take_header(ids) {
            self.after_structural_edit(observer);
        }
    }

    fn take_header(&mut self, ids: &mut dyn ShapeIdAllocator) -> bool {
        let Some(header) = self.header.take() else {
            return false;
        };
        if let Some(seed) = header.seed {
            if let Some(Atom::Shape(sp)) = self.record(seed).and_then(|r| r.atom()) {
                ids.release_shape_id(sp.shape_id);
            }
            self.remove_record(seed);
        }
        if let Some(coords) = header.group_coordinates {
            self.remove_record(coords);
        }
        true
    }

    // -------------------------------------------------------------------------
    // Shapes
    // -------------------------------------------------------------------------

    /// Append a shape to the group shape container and return its new id.
    pub fn add_shape(
        &mut self,
        shape: NewShape,
        ids: &mut dyn ShapeIdAllocator,
        observer: &mut dyn DrawingObserver,
    ) -> Result<u32> {
        let group = self.group_shape().ok_or(Error::MissingGroupShape)?;
        let shape_id = ids.allocate_shape_id(self.drawing_id());

        let container =
            self.alloc_child(group, RecordBody::container(EscherRecordType::SpContainer));
        self.alloc_child(
            container,
            RecordBody::Atom(Atom::Shape(ShapeAtom::new(shape.shape_type, shape_id, shape.flags))),
        );
        self.alloc_child(container, RecordBody::Atom(Atom::Properties(shape.properties)));
        self.alloc_child(container, RecordBody::Atom(Atom::ClientAnchor(shape.anchor)));
        self.alloc_child(container, RecordBody::Atom(Atom::ClientData(shape.client_data)));
        if shape.attached_text {
            self.alloc_child(group, RecordBody::Atom(Atom::ClientTextbox(Vec::new())));
        }
        log::debug!("added shape {} to drawing {}", shape_id, self.drawing_id());

        self.after_structural_edit(observer);
        Ok(shape_id)
    }

    /// Remove a shape, its attached text and, if it was the header instance,
    /// the header bookkeeping atoms.
    pub fn remove_shape(
        &mut self,
        shape_id: u32,
        ids: &mut dyn ShapeIdAllocator,
        observer: &mut dyn DrawingObserver,
    ) -> Result<()> {
        let container = self.shape_container(shape_id)?;
        if self.header.is_some_and(|h| h.shape == container) {
            self.take_header(ids);
        }
        if let Some(text) = self.attached_text(container) {
            self.remove_record(text);
        }
        self.remove_record(container);
        ids.release_shape_id(shape_id);
        log::debug!("removed shape {} from drawing {}", shape_id, self.drawing_id());

        self.after_structural_edit(observer);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Bookkeeping
    // -------------------------------------------------------------------------

    fn invalidate_layout(&mut self, observer: &mut dyn DrawingObserver) {
        if self.layout_len.take().is_some() {
            log::debug!("drawing {} layout invalidated", self.drawing_id());
        }
        observer.layout_invalidated(self.id);
    }

    fn after_structural_edit(&mut self, observer: &mut dyn DrawingObserver) {
        self.invalidate_layout(observer);
        if let Some(count) = self.refresh_descriptor() {
            observer.shape_count_changed(self.id, count);
        }
    }

    /// Recompute the descriptor's shape count and last shape id.
    ///
    /// Returns the new count when it changed.
    pub(super) fn refresh_descriptor(&mut self) -> Option<u32> {
        let (count, last) = self
            .preorder()
            .into_iter()
            .filter_map(|id| match self.record(id)?.atom()? {
                Atom::Shape(sp) => Some(sp.shape_id),
                _ => None,
            })
            .fold((0u32, 0u32), |(count, last), id| (count + 1, last.max(id)));

        let dg = self.drawing_group()?;
        let (id, _) = self.atom_child(dg, EscherRecordType::Dg)?;
        match self.atom_mut(id)? {
            Atom::Drawing(descriptor) => {
                let changed = descriptor.shape_count != count;
                descriptor.shape_count = count;
                descriptor.last_shape_id = last;
                changed.then_some(count)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ole::escher::atoms::shape_type;
    use crate::ole::escher::services::{SequentialShapeIds, TreeId};
    use crate::ole::escher::tree::parse_tree;

    #[derive(Default)]
    struct Recorder {
        counts: Vec<u32>,
        invalidations: usize,
    }

    impl DrawingObserver for Recorder {
        fn shape_count_changed(&mut self, _tree: TreeId, shape_count: u32) {
            self.counts.push(shape_count);
        }

        fn layout_invalidated(&mut self, _tree: TreeId) {
            self.invalidations += 1;
        }
    }

    fn drawing_with(shapes: usize) -> (ShapeTree, SequentialShapeIds, Vec<u32>) {
        let mut ids = SequentialShapeIds::new();
        let mut tree = ShapeTree::new(1);
        let added = (0..shapes)
            .map(|i| {
                let anchor = ClientAnchor::cells(i as i16, 0, i as i16 + 2, 3);
                tree.add_shape(NewShape::new(shape_type::RECTANGLE, anchor), &mut ids, &mut ())
                    .unwrap()
            })
            .collect();
        (tree, ids, added)
    }

    #[test]
    fn test_add_shape_updates_descriptor() {
        let mut recorder = Recorder::default();
        let (mut tree, mut ids, added) = drawing_with(2);
        assert_eq!(added, vec![1024, 1025]);

        let id = tree
            .add_shape(
                NewShape::new(shape_type::TEXT_BOX, ClientAnchor::cells(0, 5, 2, 8))
                    .with_attached_text(true),
                &mut ids,
                &mut recorder,
            )
            .unwrap();
        assert_eq!(id, 1026);
        assert_eq!(recorder.counts, vec![3]);
        assert_eq!(recorder.invalidations, 1);

        let descriptor = tree.drawing().unwrap();
        assert_eq!(descriptor.shape_count, 3);
        assert_eq!(descriptor.last_shape_id, 1026);
        assert!(tree.attached_text(tree.find_shape(1026).unwrap()).is_some());
    }

    #[test]
    fn test_remove_shape_drops_attached_text() {
        let mut ids = SequentialShapeIds::new();
        let mut tree = ShapeTree::new(1);
        let id = tree
            .add_shape(
                NewShape::new(shape_type::TEXT_BOX, ClientAnchor::default()).with_attached_text(true),
                &mut ids,
                &mut (),
            )
            .unwrap();
        let group = tree.group_shape().unwrap();
        assert_eq!(tree.children(group).len(), 2);

        tree.remove_shape(id, &mut ids, &mut ()).unwrap();
        assert!(tree.children(group).is_empty());
        assert_eq!(tree.drawing().unwrap().shape_count, 0);
        assert!(matches!(
            tree.remove_shape(id, &mut ids, &mut ()),
            Err(Error::ShapeNotFound(_))
        ));
        // the id is handed out again
        assert_eq!(ids.allocate_shape_id(1), id);
    }

    #[test]
    fn test_patch_anchor_in_place() {
        let (mut tree, _, added) = drawing_with(2);
        let mut bytes = tree.encode().unwrap();
        let moved = ClientAnchor::cells(7, 7, 9, 9);

        tree.patch_anchor(&mut bytes, added[1], moved).unwrap();
        assert!(tree.is_layout_valid());
        let decoded = parse_tree(&bytes).unwrap();
        assert_eq!(decoded.anchor(decoded.find_shape(added[1]).unwrap()), Some(&moved));
        assert_eq!(decoded, tree);
        assert_eq!(tree.encode().unwrap(), bytes);
    }

    #[test]
    fn test_patch_shape_id_updates_descriptor_bytes() {
        let (mut tree, _, added) = drawing_with(2);
        let mut bytes = tree.encode().unwrap();

        tree.patch_shape_id(&mut bytes, added[0], 1100).unwrap();
        let decoded = parse_tree(&bytes).unwrap();
        assert!(decoded.find_shape(1100).is_some());
        assert_eq!(decoded.drawing().unwrap().last_shape_id, 1100);
        assert_eq!(tree.encode().unwrap(), bytes);

        assert!(matches!(
            tree.patch_shape_id(&mut bytes, 1100, added[1]),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_patch_property_table_same_size() {
        let (mut tree, _, added) = drawing_with(1);
        let container = tree.find_shape(added[0]).unwrap();
        let mut table = tree.properties(container).cloned().unwrap();
        table.set_filled(true).unwrap();
        tree.patch_property_table(&mut Vec::new(), added[0], table.clone(), &mut ())
            .unwrap();
        let mut bytes = tree.encode().unwrap();

        table.set_filled(false).unwrap();
        let outcome = tree
            .patch_property_table(&mut bytes, added[0], table, &mut ())
            .unwrap();
        assert_eq!(outcome, PatchOutcome::Patched);
        let decoded = parse_tree(&bytes).unwrap();
        let props = decoded.properties(decoded.find_shape(added[0]).unwrap()).unwrap();
        assert_eq!(props.filled(), Some(false));
    }

    #[test]
    fn test_patch_property_table_resize_requires_rebuild() {
        let mut recorder = Recorder::default();
        let (mut tree, _, added) = drawing_with(1);
        let mut bytes = tree.encode().unwrap();

        let mut table = PropertyTable::new();
        table.set_description("a longer caption").unwrap();
        let outcome = tree
            .patch_property_table(&mut bytes, added[0], table, &mut recorder)
            .unwrap();
        assert_eq!(outcome, PatchOutcome::RebuildRequired);
        assert_eq!(recorder.invalidations, 1);
        assert!(!tree.is_layout_valid());

        // fixed-size patches refuse to touch stale bytes
        assert!(matches!(
            tree.patch_anchor(&mut bytes, added[0], ClientAnchor::default()),
            Err(Error::StaleLayout)
        ));
        assert!(tree.record_boundaries().is_err());

        let rebuilt = tree.encode().unwrap();
        let decoded = parse_tree(&rebuilt).unwrap();
        let caption = decoded
            .properties(decoded.find_shape(added[0]).unwrap())
            .and_then(PropertyTable::description)
            .unwrap();
        assert_eq!(caption.text(), "a longer caption");
    }

    #[test]
    fn test_header_instance_lifecycle() {
        let (mut tree, mut ids, added) = drawing_with(2);
        tree.set_header_instance(added[0], &mut ids, &mut ()).unwrap();
        assert_eq!(tree.header_shape_id(), Some(added[0]));
        // seed counts as a shape in the descriptor
        assert_eq!(tree.drawing().unwrap().shape_count, 3);

        // again on the same shape: no-op
        tree.set_header_instance(added[0], &mut ids, &mut ()).unwrap();
        assert!(matches!(
            tree.set_header_instance(added[1], &mut ids, &mut ()),
            Err(Error::MultipleHeaderInstances {
                existing,
                requested,
            }) if existing == added[0] && requested == added[1]
        ));

        let bytes = tree.encode().unwrap();
        let decoded = parse_tree(&bytes).unwrap();
        assert_eq!(decoded.header_shape_id(), Some(added[0]));

        tree.clear_header_instance(&mut ids, &mut ());
        assert!(tree.header_instance().is_none());
        assert_eq!(tree.drawing().unwrap().shape_count, 2);
        tree.set_header_instance(added[1], &mut ids, &mut ()).unwrap();
        assert_eq!(tree.header_shape_id(), Some(added[1]));
    }

    #[test]
    fn test_removing_header_shape_clears_header() {
        let (mut tree, mut ids, added) = drawing_with(2);
        tree.set_header_instance(added[1], &mut ids, &mut ()).unwrap();
        tree.remove_shape(added[1], &mut ids, &mut ()).unwrap();
        assert!(tree.header_instance().is_none());
        let group = tree.group_shape().unwrap();
        assert_eq!(tree.children(group).len(), 1);
        assert_eq!(tree.drawing().unwrap().shape_count, 1);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            #[test]
            fn prop_at_most_one_header(
                shapes in 1usize..6,
                attempts in proptest::collection::vec(any::<prop::sample::Index>(), 1..6),
            ) {
                let (mut tree, mut ids, added) = drawing_with(shapes);
                let mut header = None;
                for pick in attempts {
                    let shape_id = added[pick.index(added.len())];
                    match tree.set_header_instance(shape_id, &mut ids, &mut ()) {
                        Ok(()) => {
                            prop_assert!(header.is_none() || header == Some(shape_id));
                            header = Some(shape_id);
                        }
                        Err(Error::MultipleHeaderInstances { .. }) => {
                            prop_assert!(header.is_some() && header != Some(shape_id));
                        }
                        Err(other) => prop_assert!(false, "unexpected error {:?}", other),
                    }
                }

                let bytes = tree.encode().unwrap();
                let decoded = parse_tree(&bytes).unwrap();
                prop_assert_eq!(decoded.header_shape_id(), header);
                let seeds = decoded
                    .preorder()
                    .into_iter()
                    .filter(|&id| matches!(
                        decoded.record(id).and_then(|r| r.atom()),
                        Some(Atom::Shape(sp)) if sp.is_patriarch()
                    ))
                    .count();
                prop_assert_eq!(seeds, 1);
            }
        }
    }
}
