//! Collaborators a drawing tree talks to while it is edited.
//!
//! Shape ids are unique per workbook, so the tree never invents them: the
//! owning document hands in a [`ShapeIdAllocator`]. Structural edits are
//! reported through a [`DrawingObserver`] so workbook-level bookkeeping
//! (the drawing group's cluster table) can follow along.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of shape ids in one drawing's id cluster.
pub const SHAPE_ID_CLUSTER: u32 = 1 << 10;

/// Process-unique identity of a [`ShapeTree`](super::tree::ShapeTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeId(u64);

impl TreeId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Source of workbook-unique shape ids.
pub trait ShapeIdAllocator {
    /// Hand out an unused id for a shape in drawing `drawing_id`.
    fn allocate_shape_id(&mut self, drawing_id: u16) -> u32;

    /// Return an id whose shape was removed.
    fn release_shape_id(&mut self, shape_id: u32);
}

/// Reference allocator using per-drawing id clusters.
///
/// Drawing `n` owns ids `n << 10 .. (n + 1) << 10`; the first id of a
/// cluster goes to the patriarch. Released ids are reused lowest first.
#[derive(Debug, Clone, Default)]
pub struct SequentialShapeIds {
    next: HashMap<u16, u32>,
    released: BTreeSet<u32>,
}

impl SequentialShapeIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every id up to and including `shape_id` in its cluster as used.
    ///
    /// Call this with the drawing descriptor's last shape id after loading a
    /// drawing so new shapes do not collide with existing ones.
    pub fn reserve_through(&mut self, shape_id: u32) {
        let drawing_id = (shape_id / SHAPE_ID_CLUSTER) as u16;
        let used = shape_id % SHAPE_ID_CLUSTER + 1;
        let next = self.next.entry(drawing_id).or_insert(0);
        *next = (*next).max(used);
    }
}

impl ShapeIdAllocator for SequentialShapeIds {
    fn allocate_shape_id(&mut self, drawing_id: u16) -> u32 {
        let base = (drawing_id as u32) << 10;
        if let Some(&id) = self.released.range(base..base + SHAPE_ID_CLUSTER).next() {
            self.released.remove(&id);
            return id;
        }
        let next = self.next.entry(drawing_id).or_insert(0);
        let id = base + *next;
        *next += 1;
        if *next > SHAPE_ID_CLUSTER {
            log::warn!(
                "drawing {} exhausted its shape id cluster; id {} spills into the next one",
                drawing_id,
                id
            );
        }
        id
    }

    fn release_shape_id(&mut self, shape_id: u32) {
        self.released.insert(shape_id);
    }
}

/// Hooks for workbook-level drawing bookkeeping.
pub trait DrawingObserver {
    /// The drawing descriptor's shape count changed.
    fn shape_count_changed(&mut self, tree: TreeId, shape_count: u32);

    /// Cached offsets of `tree` no longer match its model; the next write
    /// must rebuild it.
    fn layout_invalidated(&mut self, _tree: TreeId) {}
}

/// No-op observer.
impl DrawingObserver for () {
    fn shape_count_changed(&mut self, _tree: TreeId, _shape_count: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_ids() {
        let mut ids = SequentialShapeIds::new();
        assert_eq!(ids.allocate_shape_id(1), 1024);
        assert_eq!(ids.allocate_shape_id(1), 1025);
        assert_eq!(ids.allocate_shape_id(2), 2048);
        assert_eq!(ids.allocate_shape_id(1), 1026);
    }

    #[test]
    fn test_released_ids_are_reused() {
        let mut ids = SequentialShapeIds::new();
        let a = ids.allocate_shape_id(1);
        let b = ids.allocate_shape_id(1);
        ids.release_shape_id(a);
        assert_eq!(ids.allocate_shape_id(2), 2048);
        assert_eq!(ids.allocate_shape_id(1), a);
        assert_eq!(ids.allocate_shape_id(1), b + 1);
    }

    #[test]
    fn test_reserve_through() {
        let mut ids = SequentialShapeIds::new();
        ids.reserve_through(1027);
        assert_eq!(ids.allocate_shape_id(1), 1028);
        ids.reserve_through(1025);
        assert_eq!(ids.allocate_shape_id(1), 1029);
    }

    #[test]
    fn test_tree_ids_are_unique() {
        assert_ne!(TreeId::next(), TreeId::next());
    }
}
