// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Segment tree: a binary partition of space whose leaves run sweep-and-prune.
//!
//! Every leaf keeps one endpoint array per axis, sorted by `(value, is_max)`.
//! A split node on axis `a` at value `v` sends a box to child 0 when
//! `min[a] < v` and to child 1 when `max[a] >= v`; a box that satisfies both
//! is *crossing* and is registered in both children. With this rule two
//! overlapping boxes always share at least one leaf, so the union of the
//! per-leaf overlaps is the global overlap set.
//!
//! Segments live in an arena and refer to each other by [`SegmentId`].

use alloc::vec::Vec;
use core::cmp::Ordering;
use core::fmt::Debug;

use hashbrown::HashSet;
use smallvec::{SmallVec, smallvec};

use crate::boxes::{BoxStore, MAX_END, MIN_END, Occurrence};
use crate::config::SapConfig;
use crate::types::{Aabb, Scalar};

/// Identifier of a segment in the tree's arena.
///
/// Ids of merged-away segments are reused by later splits.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(u32);

impl SegmentId {
    #[allow(
        clippy::cast_possible_truncation,
        reason = "Segment ids are intentionally 32-bit."
    )]
    pub(crate) const fn new(idx: usize) -> Self {
        Self(idx as u32)
    }

    /// Arena index of the segment.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Leaf list returned by region descents; most boxes sit in one or two leaves.
pub(crate) type LeafList = SmallVec<[SegmentId; 4]>;

const MAX_FLAG: u32 = 1 << 31;

/// One coordinate of a box on one axis, packed with the owning slot.
#[derive(Copy, Clone, Debug)]
pub(crate) struct EndPoint<T> {
    /// 1 bit is-max, 31 bits box slot.
    packed: u32,
    value: T,
}

impl<T: Scalar> EndPoint<T> {
    #[inline]
    fn new(slot: u32, is_max: bool, value: T) -> Self {
        debug_assert!(slot < MAX_FLAG, "box slot does not fit an endpoint");
        Self {
            packed: slot | if is_max { MAX_FLAG } else { 0 },
            value,
        }
    }

    #[inline]
    pub(crate) fn slot(&self) -> u32 {
        self.packed & !MAX_FLAG
    }

    #[inline]
    pub(crate) fn is_max(&self) -> bool {
        self.packed & MAX_FLAG != 0
    }

    #[inline]
    fn end(&self) -> usize {
        if self.is_max() { MAX_END } else { MIN_END }
    }

    /// Strict array order: by value, and a min before a max at equal values.
    #[inline]
    fn precedes(&self, other: &Self) -> bool {
        self.value < other.value
            || (self.value == other.value && !self.is_max() && other.is_max())
    }

    fn order(&self, other: &Self) -> Ordering {
        if self.precedes(other) {
            Ordering::Less
        } else if other.precedes(self) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

/// Box with the longest side on one axis, when the leaf is not empty.
///
/// The cached length may be larger than the current longest side after a
/// box shrinks, never smaller.
#[derive(Copy, Clone, Debug)]
struct LongestSide<T> {
    slot: u32,
    length: T,
}

#[derive(Clone, Debug)]
pub(crate) struct Leaf<T, const N: usize> {
    points: [Vec<EndPoint<T>>; N],
    longest: [Option<LongestSide<T>>; N],
}

impl<T: Scalar, const N: usize> Leaf<T, N> {
    fn new() -> Self {
        Self {
            points: core::array::from_fn(|_| Vec::new()),
            longest: [None; N],
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.points[0].len() / 2
    }

    fn slots(&self) -> impl Iterator<Item = u32> + '_ {
        self.points[0]
            .iter()
            .filter(|p| !p.is_max())
            .map(EndPoint::slot)
    }

    fn offer_longest(&mut self, axis: usize, slot: u32, length: T) {
        let longer = match self.longest[axis] {
            Some(cur) => length > cur.length,
            None => true,
        };
        if longer {
            self.longest[axis] = Some(LongestSide { slot, length });
        }
    }

    fn recompute_longest<P>(&mut self, boxes: &BoxStore<T, P, N>) {
        let slots: SmallVec<[u32; 32]> = self.slots().collect();
        self.longest = [None; N];
        for slot in slots {
            let bounds = &boxes.slot(slot).bounds;
            for axis in 0..N {
                self.offer_longest(axis, slot, bounds.extent(axis));
            }
        }
    }

    fn content_bounds(&self) -> Option<Aabb<T, N>> {
        let first = self.points[0].first()?;
        let mut out = Aabb::new([first.value; N], [first.value; N]);
        for axis in 0..N {
            let pts = &self.points[axis];
            out.min[axis] = pts[0].value;
            out.max[axis] = pts[pts.len() - 1].value;
        }
        Some(out)
    }
}

#[derive(Clone, Debug)]
enum Kind<T, const N: usize> {
    Leaf(Leaf<T, N>),
    Split {
        axis: usize,
        value: T,
        children: [SegmentId; 2],
    },
}

#[derive(Clone, Debug)]
struct Segment<T, const N: usize> {
    parent: Option<SegmentId>,
    kind: Kind<T, N>,
    /// Bounding box of everything registered at or below this segment.
    borders: Option<Aabb<T, N>>,
}

impl<T: Scalar, const N: usize> Segment<T, N> {
    fn leaf(parent: Option<SegmentId>, leaf: Leaf<T, N>) -> Self {
        Self {
            parent,
            kind: Kind::Leaf(leaf),
            borders: None,
        }
    }
}

/// Which child of `(axis, value)` a box belongs to.
#[inline]
fn sides<T: Scalar, const N: usize>(bounds: &Aabb<T, N>, axis: usize, value: T) -> (bool, bool) {
    (bounds.min[axis] < value, bounds.max[axis] >= value)
}

/// The spatial partition.
///
/// Exposed read-only for debug rendering and inspection through
/// [`SapManager::tree`](crate::SapManager::tree).
pub struct SegmentTree<T, const N: usize> {
    arena: Vec<Option<Segment<T, N>>>,
    free: Vec<usize>,
    root: SegmentId,
}

impl<T: Scalar, const N: usize> Debug for SegmentTree<T, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let live = self.arena.iter().filter(|s| s.is_some()).count();
        let leaves = self.leaves().count();
        f.debug_struct("SegmentTree")
            .field("segments", &live)
            .field("leaves", &leaves)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl<T: Scalar, const N: usize> SegmentTree<T, N> {
    pub(crate) fn new() -> Self {
        Self {
            arena: alloc::vec![Some(Segment::leaf(None, Leaf::new()))],
            free: Vec::new(),
            root: SegmentId::new(0),
        }
    }

    /// Drop every segment except an empty root leaf.
    pub(crate) fn clear(&mut self) {
        *self = Self::new();
    }

    // --- read-only traversal ---------------------------------------------

    /// The root segment; it always exists.
    #[inline]
    pub fn root(&self) -> SegmentId {
        self.root
    }

    /// Whether `id` names a live segment.
    pub fn contains(&self, id: SegmentId) -> bool {
        matches!(self.arena.get(id.index()), Some(Some(_)))
    }

    /// Parent of a segment; `None` for the root or a dead id.
    pub fn parent(&self, id: SegmentId) -> Option<SegmentId> {
        self.get(id)?.parent
    }

    /// Children of a split segment, low side first.
    pub fn children(&self, id: SegmentId) -> Option<[SegmentId; 2]> {
        match self.get(id)?.kind {
            Kind::Split { children, .. } => Some(children),
            Kind::Leaf(_) => None,
        }
    }

    /// Whether the segment is split.
    pub fn is_split(&self, id: SegmentId) -> bool {
        self.children(id).is_some()
    }

    /// Split axis of a split segment.
    pub fn split_axis(&self, id: SegmentId) -> Option<usize> {
        match self.get(id)?.kind {
            Kind::Split { axis, .. } => Some(axis),
            Kind::Leaf(_) => None,
        }
    }

    /// Split value of a split segment.
    pub fn split_value(&self, id: SegmentId) -> Option<T> {
        match self.get(id)?.kind {
            Kind::Split { value, .. } => Some(value),
            Kind::Leaf(_) => None,
        }
    }

    /// Bounding box of all content at or below the segment.
    ///
    /// `None` when the subtree holds no boxes.
    pub fn borders(&self, id: SegmentId) -> Option<Aabb<T, N>> {
        self.get(id)?.borders
    }

    /// Low content border on `axis`.
    pub fn low_border(&self, id: SegmentId, axis: usize) -> Option<T> {
        self.borders(id).map(|b| b.min[axis])
    }

    /// High content border on `axis`.
    pub fn high_border(&self, id: SegmentId, axis: usize) -> Option<T> {
        self.borders(id).map(|b| b.max[axis])
    }

    /// Number of boxes registered in a leaf (zero for split segments).
    pub fn boxes_count(&self, id: SegmentId) -> usize {
        match self.get(id).map(|s| &s.kind) {
            Some(Kind::Leaf(leaf)) => leaf.len(),
            _ => 0,
        }
    }

    /// Iterate over all leaf segments.
    pub fn leaves(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.arena.iter().enumerate().filter_map(|(i, s)| match s {
            Some(Segment {
                kind: Kind::Leaf(_),
                ..
            }) => Some(SegmentId::new(i)),
            _ => None,
        })
    }

    /// Number of live segments, split and leaf.
    pub fn segments_count(&self) -> usize {
        self.arena.iter().filter(|s| s.is_some()).count()
    }

    /// Depth of the deepest leaf; a lone root leaf has depth zero.
    pub fn depth(&self) -> usize {
        self.leaves()
            .map(|leaf| {
                let mut depth = 0;
                let mut cur = leaf;
                while let Some(p) = self.parent(cur) {
                    depth += 1;
                    cur = p;
                }
                depth
            })
            .max()
            .unwrap_or(0)
    }

    /// The other child of this segment's parent, and its child index.
    pub fn split_neighbor(&self, id: SegmentId) -> Option<(SegmentId, usize)> {
        let children = self.children(self.parent(id)?)?;
        if children[0] == id {
            Some((children[1], 1))
        } else {
            Some((children[0], 0))
        }
    }

    /// Largest segment directly below this one on `axis`, if any.
    ///
    /// Walks up to the nearest ancestor split on `axis` that has this
    /// segment on its high side; the result may be a split segment.
    pub fn prev_neighbor(&self, id: SegmentId, axis: usize) -> Option<SegmentId> {
        self.neighbor(id, axis, 1)
    }

    /// Largest segment directly above this one on `axis`, if any.
    pub fn next_neighbor(&self, id: SegmentId, axis: usize) -> Option<SegmentId> {
        self.neighbor(id, axis, 0)
    }

    fn neighbor(&self, id: SegmentId, axis: usize, from_side: usize) -> Option<SegmentId> {
        let mut cur = id;
        loop {
            let parent = self.parent(cur)?;
            if let Kind::Split {
                axis: split_axis,
                children,
                ..
            } = self.seg(parent).kind
                && split_axis == axis
                && children[from_side] == cur
            {
                return Some(children[1 - from_side]);
            }
            cur = parent;
        }
    }

    // --- internal access -------------------------------------------------

    fn get(&self, id: SegmentId) -> Option<&Segment<T, N>> {
        self.arena.get(id.index())?.as_ref()
    }

    fn seg(&self, id: SegmentId) -> &Segment<T, N> {
        self.get(id)
            .expect("segment invariant violated: dead segment id")
    }

    fn seg_mut(&mut self, id: SegmentId) -> &mut Segment<T, N> {
        self.arena
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .expect("segment invariant violated: dead segment id")
    }

    fn leaf(&self, id: SegmentId) -> &Leaf<T, N> {
        match &self.seg(id).kind {
            Kind::Leaf(leaf) => leaf,
            Kind::Split { .. } => panic!("segment invariant violated: expected a leaf"),
        }
    }

    fn leaf_mut(&mut self, id: SegmentId) -> &mut Leaf<T, N> {
        match &mut self.seg_mut(id).kind {
            Kind::Leaf(leaf) => leaf,
            Kind::Split { .. } => panic!("segment invariant violated: expected a leaf"),
        }
    }

    pub(crate) fn is_leaf(&self, id: SegmentId) -> bool {
        matches!(
            self.get(id),
            Some(Segment {
                kind: Kind::Leaf(_),
                ..
            })
        )
    }

    /// Box slots registered in a leaf.
    pub(crate) fn leaf_slots(&self, id: SegmentId) -> impl Iterator<Item = u32> + '_ {
        self.leaf(id).slots()
    }

    fn alloc(&mut self, segment: Segment<T, N>) -> SegmentId {
        if let Some(i) = self.free.pop() {
            self.arena[i] = Some(segment);
            SegmentId::new(i)
        } else {
            self.arena.push(Some(segment));
            SegmentId::new(self.arena.len() - 1)
        }
    }

    fn release(&mut self, id: SegmentId) -> Segment<T, N> {
        let segment = self.arena[id.index()]
            .take()
            .expect("segment invariant violated: double release");
        self.free.push(id.index());
        segment
    }

    // --- region descent --------------------------------------------------

    /// Leaves below `from` that a box with `bounds` belongs to.
    pub(crate) fn collect_leaves(&self, from: SegmentId, bounds: &Aabb<T, N>, out: &mut LeafList) {
        let mut stack: SmallVec<[SegmentId; 16]> = smallvec![from];
        while let Some(id) = stack.pop() {
            match self.seg(id).kind {
                Kind::Leaf(_) => out.push(id),
                Kind::Split {
                    axis,
                    value,
                    children,
                } => {
                    let (low, high) = sides(bounds, axis, value);
                    if high {
                        stack.push(children[1]);
                    }
                    if low {
                        stack.push(children[0]);
                    }
                }
            }
        }
    }

    /// Lowest ancestor of `leaf` (or `leaf` itself) whose region holds all of
    /// `bounds`, so that every leaf of the box lies below it.
    pub(crate) fn containing_ancestor(&self, leaf: SegmentId, bounds: &Aabb<T, N>) -> SegmentId {
        let mut result = leaf;
        let mut cur = leaf;
        while let Some(parent) = self.seg(cur).parent {
            if let Kind::Split {
                axis,
                value,
                children,
            } = self.seg(parent).kind
            {
                let inside = if children[0] == cur {
                    bounds.max[axis] < value
                } else {
                    bounds.min[axis] >= value
                };
                if !inside {
                    result = parent;
                }
            }
            cur = parent;
        }
        result
    }

    /// Leaves a box with `bounds` belongs to, starting the descent from the
    /// lowest ancestor of `near` that contains it.
    pub(crate) fn leaves_for(&self, near: SegmentId, bounds: &Aabb<T, N>) -> LeafList {
        let start = self.containing_ancestor(near, bounds);
        let mut out = LeafList::new();
        self.collect_leaves(start, bounds, &mut out);
        out
    }

    // --- leaf mutation -----------------------------------------------------

    /// Rewrite the indices stored in occurrences for `axis` from `from` on.
    fn reindex<P>(&self, id: SegmentId, axis: usize, from: usize, boxes: &mut BoxStore<T, P, N>) {
        for (i, ep) in self.leaf(id).points[axis].iter().enumerate().skip(from) {
            boxes.slot_mut(ep.slot()).occurrence_mut(id).ends[axis][ep.end()] = to_index(i);
        }
    }

    fn reindex_all<P>(&self, id: SegmentId, boxes: &mut BoxStore<T, P, N>) {
        for axis in 0..N {
            self.reindex(id, axis, 0, boxes);
        }
    }

    /// Register `slot` in a leaf and push the slots of boxes it overlaps
    /// there onto `candidates`.
    ///
    /// The box's current bounds are read from the store.
    pub(crate) fn insert_box<P>(
        &mut self,
        id: SegmentId,
        slot: u32,
        boxes: &mut BoxStore<T, P, N>,
        candidates: &mut Vec<u32>,
    ) {
        let bounds = boxes.slot(slot).bounds;
        let leaf = self.leaf_mut(id);

        // Anything overlapping on axis 0 has its min no further left than
        // our min minus the longest side in this leaf.
        let reach = leaf.longest[0].map_or(T::zero(), |l| l.length);
        let scan_from = bounds.min[0] - reach - reach;
        let pts = &leaf.points[0];
        let start = pts.partition_point(|p| p.value < scan_from);
        for p in &pts[start..] {
            if p.value > bounds.max[0] {
                break;
            }
            if !p.is_max() && boxes.slot(p.slot()).bounds.overlaps(&bounds) {
                candidates.push(p.slot());
            }
        }

        let mut from = [0_usize; N];
        for (axis, first) in from.iter_mut().enumerate() {
            let min = EndPoint::new(slot, false, bounds.min[axis]);
            let max = EndPoint::new(slot, true, bounds.max[axis]);
            let pts = &mut leaf.points[axis];
            let at_min = pts.partition_point(|p| p.precedes(&min));
            pts.insert(at_min, min);
            let at_max = pts.partition_point(|p| p.precedes(&max));
            pts.insert(at_max, max);
            *first = at_min;
            leaf.offer_longest(axis, slot, bounds.extent(axis));
        }

        boxes.slot_mut(slot).occurrences.push(Occurrence::new(id));
        for (axis, first) in from.into_iter().enumerate() {
            self.reindex(id, axis, first, boxes);
        }
    }

    /// Drop `slot`'s endpoints from a leaf and forget the occurrence.
    pub(crate) fn remove_box<P>(
        &mut self,
        id: SegmentId,
        slot: u32,
        boxes: &mut BoxStore<T, P, N>,
    ) {
        let occurrence = *boxes
            .slot(slot)
            .occurrence(id)
            .expect("segment invariant violated: box not registered in leaf");
        let leaf = self.leaf_mut(id);
        let mut from = [0_usize; N];
        let mut was_longest = false;
        for (axis, first) in from.iter_mut().enumerate() {
            let [at_min, at_max] = occurrence.ends[axis].map(|i| i as usize);
            let pts = &mut leaf.points[axis];
            debug_assert_eq!(pts[at_min].slot(), slot, "stale min index");
            debug_assert_eq!(pts[at_max].slot(), slot, "stale max index");
            pts.remove(at_max);
            pts.remove(at_min);
            *first = at_min;
            was_longest |= leaf.longest[axis].is_some_and(|l| l.slot == slot);
        }
        boxes.slot_mut(slot).remove_occurrence(id);
        if was_longest {
            leaf.recompute_longest(boxes);
        }
        for (axis, first) in from.into_iter().enumerate() {
            self.reindex(id, axis, first, boxes);
        }
    }

    /// Move `slot`'s endpoints in a leaf to its current bounds and push the
    /// slots of boxes whose overlap status may have changed onto
    /// `candidates`.
    pub(crate) fn move_box<P>(
        &mut self,
        id: SegmentId,
        slot: u32,
        boxes: &mut BoxStore<T, P, N>,
        candidates: &mut Vec<u32>,
    ) {
        let bounds = boxes.slot(slot).bounds;
        for axis in 0..N {
            let [at_min, at_max] = self.ends(id, slot, axis, boxes);
            let old_max = self.leaf(id).points[axis][at_max].value;
            // Move the leading endpoint first so min and max never cross.
            if bounds.max[axis] > old_max {
                self.move_endpoint(id, axis, at_max, bounds.max[axis], boxes, candidates);
                let [at_min, _] = self.ends(id, slot, axis, boxes);
                self.move_endpoint(id, axis, at_min, bounds.min[axis], boxes, candidates);
            } else {
                self.move_endpoint(id, axis, at_min, bounds.min[axis], boxes, candidates);
                let [_, at_max] = self.ends(id, slot, axis, boxes);
                self.move_endpoint(id, axis, at_max, bounds.max[axis], boxes, candidates);
            }
            self.leaf_mut(id)
                .offer_longest(axis, slot, bounds.extent(axis));
        }
    }

    fn ends<P>(
        &self,
        id: SegmentId,
        slot: u32,
        axis: usize,
        boxes: &BoxStore<T, P, N>,
    ) -> [usize; 2] {
        boxes
            .slot(slot)
            .occurrence(id)
            .expect("segment invariant violated: box not registered in leaf")
            .ends[axis]
            .map(|i| i as usize)
    }

    /// Shift one endpoint to `value` by adjacent swaps.
    ///
    /// Passing another box's opposite endpoint is the only event that can
    /// change the overlap status of the two boxes: a max moving right over a
    /// min (or a min moving left over a max) may start an overlap, the reverse
    /// may end one. Both kinds are reported as candidates.
    fn move_endpoint<P>(
        &mut self,
        id: SegmentId,
        axis: usize,
        at: usize,
        value: T,
        boxes: &mut BoxStore<T, P, N>,
        candidates: &mut Vec<u32>,
    ) {
        let pts = &mut self.leaf_mut(id).points[axis];
        let mut moving = pts[at];
        moving.value = value;
        let mut i = at;
        while i + 1 < pts.len() && pts[i + 1].precedes(&moving) {
            let other = pts[i + 1];
            debug_assert_ne!(other.slot(), moving.slot(), "min and max crossed");
            if other.is_max() != moving.is_max() {
                candidates.push(other.slot());
            }
            pts[i] = other;
            boxes.slot_mut(other.slot()).occurrence_mut(id).ends[axis][other.end()] = to_index(i);
            i += 1;
        }
        while i > 0 && moving.precedes(&pts[i - 1]) {
            let other = pts[i - 1];
            debug_assert_ne!(other.slot(), moving.slot(), "min and max crossed");
            if other.is_max() != moving.is_max() {
                candidates.push(other.slot());
            }
            pts[i] = other;
            boxes.slot_mut(other.slot()).occurrence_mut(id).ends[axis][other.end()] = to_index(i);
            i -= 1;
        }
        pts[i] = moving;
        boxes.slot_mut(moving.slot()).occurrence_mut(id).ends[axis][moving.end()] = to_index(i);
    }

    // --- split and merge ---------------------------------------------------

    /// Pick a split for an oversized leaf.
    ///
    /// Per axis the candidate value is the median box center. An axis whose
    /// longest side spans the whole content is only tried when no other axis
    /// qualifies. The cost is the larger child plus a penalty per crossing
    /// box; a split must shrink both children and keep crossing boxes within
    /// the occurrence limit.
    fn choose_split<P>(
        &self,
        id: SegmentId,
        config: &SapConfig,
        boxes: &BoxStore<T, P, N>,
    ) -> Option<(usize, T)> {
        let leaf = self.leaf(id);
        let n = leaf.len();
        let content = leaf.content_bounds()?;
        let slots: SmallVec<[u32; 32]> = leaf.slots().collect();
        let mut centers: SmallVec<[T; 32]> = SmallVec::with_capacity(n);
        let mut best: Option<(f32, usize, T)> = None;

        for relaxed in [false, true] {
            for axis in 0..N {
                let spans_all = leaf.longest[axis]
                    .is_some_and(|l| l.length >= content.extent(axis));
                if spans_all && !relaxed {
                    continue;
                }
                centers.clear();
                centers.extend(slots.iter().map(|&s| boxes.slot(s).bounds.center(axis)));
                centers.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
                let value = centers[n / 2];

                let (mut low, mut high, mut crossing) = (0_usize, 0_usize, 0_usize);
                let mut over_limit = false;
                for &slot in &slots {
                    let entry = boxes.slot(slot);
                    let (l, h) = sides(&entry.bounds, axis, value);
                    low += usize::from(l);
                    high += usize::from(h);
                    if l && h {
                        crossing += 1;
                        over_limit |= entry.occurrences.len() >= config.max_box_occurrences;
                    }
                }
                if low == n || high == n || over_limit {
                    continue;
                }
                #[allow(
                    clippy::cast_precision_loss,
                    reason = "Leaf counts are small; the cost is a heuristic."
                )]
                let cost = low.max(high) as f32 + config.crossed_split_penalty * crossing as f32;
                if best.is_none_or(|(c, _, _)| cost < c) {
                    best = Some((cost, axis, value));
                }
            }
            if best.is_some() {
                break;
            }
        }
        best.map(|(_, axis, value)| (axis, value))
    }

    /// Split an oversized leaf. Returns the new children, or `None` when no
    /// split makes progress.
    pub(crate) fn split<P>(
        &mut self,
        id: SegmentId,
        config: &SapConfig,
        boxes: &mut BoxStore<T, P, N>,
    ) -> Option<[SegmentId; 2]> {
        let Some((axis, value)) = self.choose_split(id, config, boxes) else {
            tracing::debug!(
                segment = id.index(),
                boxes = self.leaf(id).len(),
                "leaf cannot be split"
            );
            return None;
        };

        let mut low = Leaf::new();
        let mut high = Leaf::new();
        let source = self.leaf(id);
        for a in 0..N {
            for ep in &source.points[a] {
                let (l, h) = sides(&boxes.slot(ep.slot()).bounds, axis, value);
                if l {
                    low.points[a].push(*ep);
                }
                if h {
                    high.points[a].push(*ep);
                }
            }
        }
        let slots: SmallVec<[u32; 32]> = source.slots().collect();
        low.recompute_longest(boxes);
        high.recompute_longest(boxes);
        let (low_len, high_len) = (low.len(), high.len());

        let c0 = self.alloc(Segment::leaf(Some(id), low));
        let c1 = self.alloc(Segment::leaf(Some(id), high));
        self.seg_mut(id).kind = Kind::Split {
            axis,
            value,
            children: [c0, c1],
        };

        for slot in slots {
            let entry = boxes.slot_mut(slot);
            let (l, h) = sides(&entry.bounds, axis, value);
            let occurrence = entry.occurrence_mut(id);
            occurrence.segment = if l { c0 } else { c1 };
            if l && h {
                let mut copy = *occurrence;
                copy.segment = c1;
                entry.occurrences.push(copy);
            }
        }
        self.reindex_all(c0, boxes);
        self.reindex_all(c1, boxes);
        self.refresh_borders(c0);
        self.refresh_borders(c1);

        tracing::debug!(
            segment = id.index(),
            axis,
            value = ?value,
            low = low_len,
            high = high_len,
            "segment split"
        );
        Some([c0, c1])
    }

    /// Number of distinct boxes in two sibling leaves.
    pub(crate) fn merged_len(&self, a: SegmentId, b: SegmentId) -> usize {
        let in_a: HashSet<u32> = self.leaf(a).slots().collect();
        in_a.len() + self.leaf(b).slots().filter(|s| !in_a.contains(s)).count()
    }

    /// Fold the two leaf children of `id` back into it.
    pub(crate) fn merge<P>(&mut self, id: SegmentId, boxes: &mut BoxStore<T, P, N>) {
        let [c0, c1] = self
            .children(id)
            .expect("segment invariant violated: merging a leaf");
        let Kind::Leaf(low) = self.release(c0).kind else {
            panic!("segment invariant violated: merging a split child");
        };
        let Kind::Leaf(high) = self.release(c1).kind else {
            panic!("segment invariant violated: merging a split child");
        };

        let in_low: HashSet<u32> = low.slots().collect();
        let only_high: SmallVec<[u32; 32]> = high.slots().filter(|s| !in_low.contains(s)).collect();
        let mut merged = Leaf::new();
        for (axis, (mut lo, hi)) in low.points.into_iter().zip(high.points).enumerate() {
            lo.extend(hi.into_iter().filter(|ep| !in_low.contains(&ep.slot())));
            lo.sort_by(EndPoint::order);
            merged.points[axis] = lo;
        }

        for &slot in &in_low {
            let entry = boxes.slot_mut(slot);
            entry.remove_occurrence(c1);
            entry.occurrence_mut(c0).segment = id;
        }
        for &slot in &only_high {
            boxes.slot_mut(slot).occurrence_mut(c1).segment = id;
        }
        merged.recompute_longest(boxes);
        let len = merged.len();
        self.seg_mut(id).kind = Kind::Leaf(merged);
        self.reindex_all(id, boxes);
        self.refresh_borders(id);

        tracing::debug!(segment = id.index(), boxes = len, "segments merged");
    }

    /// Recompute cached borders of `id` and every ancestor.
    pub(crate) fn refresh_borders(&mut self, id: SegmentId) {
        let mut cur = Some(id);
        while let Some(c) = cur {
            let Some(segment) = self.get(c) else {
                return;
            };
            let borders = match &segment.kind {
                Kind::Leaf(leaf) => leaf.content_bounds(),
                Kind::Split { children, .. } => {
                    match (self.borders(children[0]), self.borders(children[1])) {
                        (Some(a), Some(b)) => Some(a.union(&b)),
                        (a, b) => a.or(b),
                    }
                }
            };
            let segment = self.seg_mut(c);
            segment.borders = borders;
            cur = segment.parent;
        }
    }

    // --- validation ----------------------------------------------------------

    /// Assert structural invariants. Used by `SapManager::validate`.
    pub(crate) fn validate<P>(&self, boxes: &BoxStore<T, P, N>) {
        for (i, segment) in self.arena.iter().enumerate() {
            let Some(segment) = segment else {
                continue;
            };
            let id = SegmentId::new(i);
            if let Some(parent) = segment.parent {
                let children = self
                    .children(parent)
                    .expect("segment invariant violated: parent is not split");
                assert!(children.contains(&id), "parent does not list segment {i}");
            } else {
                assert_eq!(id, self.root, "only the root may lack a parent");
            }
            match &segment.kind {
                Kind::Split { children, .. } => {
                    for c in children {
                        assert_eq!(self.parent(*c), Some(id), "child {c:?} has wrong parent");
                    }
                    let expected = match (self.borders(children[0]), self.borders(children[1])) {
                        (Some(a), Some(b)) => Some(a.union(&b)),
                        (a, b) => a.or(b),
                    };
                    assert_eq!(segment.borders, expected, "stale borders on split {i}");
                }
                Kind::Leaf(leaf) => {
                    assert_eq!(segment.borders, leaf.content_bounds(), "stale borders on leaf {i}");
                    for axis in 0..N {
                        let pts = &leaf.points[axis];
                        assert_eq!(pts.len(), 2 * leaf.len(), "axis {axis} endpoint count");
                        for w in pts.windows(2) {
                            assert!(!w[1].precedes(&w[0]), "leaf {i} axis {axis} not sorted");
                        }
                        for (at, ep) in pts.iter().enumerate() {
                            let entry = boxes.slot(ep.slot());
                            let occurrence = entry
                                .occurrence(id)
                                .expect("endpoint of a box without an occurrence");
                            assert_eq!(
                                occurrence.ends[axis][ep.end()] as usize,
                                at,
                                "stale endpoint index"
                            );
                            let expected = if ep.is_max() {
                                entry.bounds.max[axis]
                            } else {
                                entry.bounds.min[axis]
                            };
                            assert!(ep.value == expected, "endpoint value differs from bounds");
                        }
                        if let Some(l) = leaf.longest[axis] {
                            for slot in leaf.slots() {
                                assert!(
                                    boxes.slot(slot).bounds.extent(axis) <= l.length,
                                    "longest side underestimates leaf {i}"
                                );
                            }
                        } else {
                            assert_eq!(leaf.len(), 0, "non-empty leaf without longest side");
                        }
                    }
                }
            }
        }
        for (slot, entry) in boxes.iter() {
            let mut expected = LeafList::new();
            self.collect_leaves(self.root, &entry.bounds, &mut expected);
            let mut actual = entry.segments();
            expected.sort_unstable();
            actual.sort_unstable();
            assert_eq!(
                expected.as_slice(),
                actual.as_slice(),
                "box {slot} registered in wrong leaves"
            );
        }
    }
}

#[allow(
    clippy::cast_possible_truncation,
    reason = "Leaf arrays stay far below 2^32 endpoints."
)]
#[inline]
fn to_index(i: usize) -> u32 {
    i as u32
}
