// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The manager: box lifecycle, collision groups, and overlap bookkeeping.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{Debug, Write as _};

use crate::boxes::{BoxEntry, BoxId, BoxStore, Occurrences};
use crate::config::SapConfig;
use crate::error::SapError;
use crate::pairs::{Pair, PairRegistry};
use crate::raycast::RayCaster;
use crate::segment::{LeafList, SegmentId, SegmentTree};
use crate::types::{Aabb, Scalar};

bitflags::bitflags! {
    /// Which directions of the collision-group matrix allowed a pair.
    ///
    /// "First" is the box of the pair with the lower slot index.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Contact: u8 {
        /// `matrix[group(first)][group(second)]` is set.
        const FIRST_TO_SECOND = 0b0000_0001;
        /// `matrix[group(second)][group(first)]` is set.
        const SECOND_TO_FIRST = 0b0000_0010;
    }
}

/// One row of the collision-group matrix: a bit per group.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupFlags([u64; 8]);

impl GroupFlags {
    /// Every group set.
    pub const ALL: Self = Self([u64::MAX; 8]);
    /// No group set.
    pub const NONE: Self = Self([0; 8]);

    /// Whether `group` is set.
    #[inline]
    pub fn get(&self, group: u32) -> bool {
        let g = group as usize;
        self.0.get(g / 64).is_some_and(|w| w & (1 << (g % 64)) != 0)
    }

    #[inline]
    fn set(&mut self, group: u32, value: bool) {
        let g = group as usize;
        if value {
            self.0[g / 64] |= 1 << (g % 64);
        } else {
            self.0[g / 64] &= !(1 << (g % 64));
        }
    }

    /// Iterate over the set groups in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..64 * 8_u32).filter(|&g| self.get(g))
    }
}

impl Debug for GroupFlags {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if *self == Self::ALL {
            return f.write_str("GroupFlags(ALL)");
        }
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Callbacks around the lifetime of a tracked pair.
///
/// Both methods default to no-ops, so an implementation only overrides what
/// it needs.
pub trait OverlapHooks<O> {
    /// Called before a newly overlapping eligible pair is tracked.
    ///
    /// `data` starts as `O::default()` and becomes the pair's payload.
    /// Returning `false` leaves the pair untracked; it is offered again the
    /// next time the pair is reconsidered.
    fn begin_overlap(&mut self, first: BoxId, second: BoxId, data: &mut O) -> bool {
        let _ = (first, second, data);
        true
    }

    /// Called after a tracked pair stops overlapping, becomes ineligible, or
    /// loses one of its boxes. Receives the pair's payload back.
    fn end_overlap(&mut self, first: BoxId, second: BoxId, data: O) {
        let _ = (first, second, data);
    }
}

/// Hooks that track every eligible pair and do nothing else.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl<O> OverlapHooks<O> for NoHooks {}

/// Payload stored per pair in the registry.
#[derive(Clone, Debug, Default)]
struct PairData<O> {
    contact: Contact,
    data: O,
}

/// A tracked overlap.
#[derive(Debug)]
pub struct Overlap<'a, O> {
    /// Box with the lower slot index.
    pub first: BoxId,
    /// Box with the higher slot index.
    pub second: BoxId,
    /// Which matrix directions allowed the pair.
    pub contact: Contact,
    /// Per-pair payload.
    pub data: &'a O,
}

/// Work collected while mutating and drained before an operation returns.
#[derive(Debug, Default)]
struct Deferred {
    merges: Vec<SegmentId>,
    splits: Vec<SegmentId>,
    dirty: Vec<SegmentId>,
}

/// Incremental sweep-and-prune broad phase.
///
/// - `T`: coordinate scalar.
/// - `P`: client payload per box.
/// - `N`: axis count.
/// - `O`: payload per tracked pair.
/// - `H`: [`OverlapHooks`] consulted when pairs begin and end.
///
/// ```
/// use understory_broadphase::{Aabb2D, SapManager2D};
///
/// let mut sap: SapManager2D<&str> = SapManager2D::new();
/// let a = sap.add_box(Aabb2D::from_corners(0.0, 0.0, 1.0, 1.0), 0, "a").unwrap();
/// let b = sap.add_box(Aabb2D::from_corners(0.5, 0.5, 1.5, 1.5), 0, "b").unwrap();
/// assert_eq!(sap.overlaps_count(), 1);
///
/// sap.move_box(b, &[10.0, 10.0]).unwrap();
/// assert_eq!(sap.overlaps_count(), 0);
///
/// assert_eq!(sap.remove_box(b), Ok("b"));
/// assert_eq!(sap.payload(a), Ok(&"a"));
/// ```
pub struct SapManager<T: Scalar, P, const N: usize, O = (), H = NoHooks> {
    config: SapConfig,
    boxes: BoxStore<T, P, N>,
    tree: SegmentTree<T, N>,
    pairs: PairRegistry<PairData<O>>,
    groups: Vec<GroupFlags>,
    /// Groups whose row changed since the last `update_collision_flags`.
    changed: GroupFlags,
    hooks: H,
    deferred: Deferred,
    candidates: Vec<u32>,
}

/// 2D manager over `f32`.
pub type SapManager2D<P, O = (), H = NoHooks> = SapManager<f32, P, 2, O, H>;

/// 3D manager over `f32`.
pub type SapManager3D<P, O = (), H = NoHooks> = SapManager<f32, P, 3, O, H>;

impl<T: Scalar, P, const N: usize, O, H> Debug for SapManager<T, P, N, O, H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SapManager")
            .field("boxes", &self.boxes.len())
            .field("overlaps", &self.pairs.len())
            .field("tree", &self.tree)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: Scalar, P, const N: usize, O: Default> Default for SapManager<T, P, N, O, NoHooks> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar, P, const N: usize, O: Default> SapManager<T, P, N, O, NoHooks> {
    /// Create an empty manager with the default configuration.
    pub fn new() -> Self {
        Self::build(SapConfig::default(), NoHooks)
    }

    /// Create an empty manager with a custom configuration.
    pub fn with_config(config: SapConfig) -> Result<Self, SapError> {
        Self::with_hooks(config, NoHooks)
    }
}

impl<T: Scalar, P, const N: usize, O: Default, H: OverlapHooks<O>> SapManager<T, P, N, O, H> {
    /// Create an empty manager that reports pair lifetimes to `hooks`.
    pub fn with_hooks(config: SapConfig, hooks: H) -> Result<Self, SapError> {
        config.validate()?;
        Ok(Self::build(config, hooks))
    }

    fn build(config: SapConfig, hooks: H) -> Self {
        Self {
            pairs: PairRegistry::new(config.initial_pair_capacity),
            groups: alloc::vec![GroupFlags::ALL; config.max_collision_groups],
            config,
            boxes: BoxStore::new(),
            tree: SegmentTree::new(),
            changed: GroupFlags::NONE,
            hooks,
            deferred: Deferred::default(),
            candidates: Vec::new(),
        }
    }

    /// The configuration the manager was built with.
    pub fn config(&self) -> &SapConfig {
        &self.config
    }

    /// The hooks.
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Mutable access to the hooks.
    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    // --- box lifecycle -----------------------------------------------------

    /// Add a box in collision group `group` and track its overlaps.
    pub fn add_box(
        &mut self,
        bounds: Aabb<T, N>,
        group: u32,
        payload: P,
    ) -> Result<BoxId, SapError> {
        if !bounds.is_valid() {
            return Err(SapError::InvalidBounds);
        }
        self.check_group(group)?;
        let mut leaves = LeafList::new();
        self.tree.collect_leaves(self.tree.root(), &bounds, &mut leaves);
        self.check_capacity(leaves.len())?;

        let id = self.boxes.insert(BoxEntry {
            bounds,
            group,
            payload,
            occurrences: Occurrences::new(),
        });
        let slot = id.index();
        for &leaf in &leaves {
            self.tree
                .insert_box(leaf, slot, &mut self.boxes, &mut self.candidates);
            self.mark_inserted(leaf);
        }
        tracing::trace!(slot, group, leaves = leaves.len(), "box added");
        self.reconcile(slot, false);
        self.drain();
        Ok(id)
    }

    /// Replace the bounds of a box.
    pub fn update_box(&mut self, id: BoxId, bounds: Aabb<T, N>) -> Result<(), SapError> {
        if !bounds.is_valid() {
            return Err(SapError::InvalidBounds);
        }
        let entry = self.boxes.get(id).ok_or(SapError::UnknownBox(id))?;
        let old = entry.segments();
        let target = self.tree.leaves_for(old[0], &bounds);
        self.check_capacity(target.len())?;

        let slot = id.index();
        self.boxes.slot_mut(slot).bounds = bounds;
        for &leaf in &old {
            if target.contains(&leaf) {
                self.tree
                    .move_box(leaf, slot, &mut self.boxes, &mut self.candidates);
            } else {
                // Everything this box shared the leaf with may have lost it.
                self.candidates.extend(self.tree.leaf_slots(leaf));
                self.tree.remove_box(leaf, slot, &mut self.boxes);
                self.deferred.merges.push(leaf);
            }
            self.deferred.dirty.push(leaf);
        }
        for &leaf in &target {
            if !old.contains(&leaf) {
                self.tree
                    .insert_box(leaf, slot, &mut self.boxes, &mut self.candidates);
                self.mark_inserted(leaf);
            }
        }
        self.reconcile(slot, false);
        self.drain();
        Ok(())
    }

    /// Translate a box by `delta`.
    pub fn move_box(&mut self, id: BoxId, delta: &[T; N]) -> Result<(), SapError> {
        let bounds = self.bounds(id)?.translated(delta);
        self.update_box(id, bounds)
    }

    /// Remove a box, ending all of its overlaps, and return its payload.
    pub fn remove_box(&mut self, id: BoxId) -> Result<P, SapError> {
        let entry = self.boxes.get(id).ok_or(SapError::UnknownBox(id))?;
        let leaves = entry.segments();
        let slot = id.index();
        for &leaf in &leaves {
            self.candidates.extend(self.tree.leaf_slots(leaf));
            self.tree.remove_box(leaf, slot, &mut self.boxes);
            self.deferred.merges.push(leaf);
            self.deferred.dirty.push(leaf);
        }
        let mut candidates = core::mem::take(&mut self.candidates);
        candidates.sort_unstable();
        candidates.dedup();
        for &other in &candidates {
            if other != slot {
                self.end_pair(slot, other);
            }
        }
        candidates.clear();
        self.candidates = candidates;

        let entry = self
            .boxes
            .remove(id)
            .expect("box invariant violated: live id vanished during removal");
        tracing::trace!(slot, "box removed");
        self.drain();
        Ok(entry.payload)
    }

    /// Remove every box. Tracked pairs are ended through the hooks.
    ///
    /// Collision flags are kept.
    pub fn clear(&mut self) {
        while let Some(pair) = self.pairs.pairs().last() {
            let (a, b) = (pair.first(), pair.second());
            self.end_pair(a, b);
        }
        self.boxes.clear();
        self.tree.clear();
        self.pairs.clear();
    }

    // --- box accessors -----------------------------------------------------

    /// Bounds of a box.
    pub fn bounds(&self, id: BoxId) -> Result<&Aabb<T, N>, SapError> {
        self.try_bounds(id).ok_or(SapError::UnknownBox(id))
    }

    /// Bounds of a box, or `None` for an unknown id.
    pub fn try_bounds(&self, id: BoxId) -> Option<&Aabb<T, N>> {
        self.boxes.get(id).map(|e| &e.bounds)
    }

    /// Client payload of a box.
    pub fn payload(&self, id: BoxId) -> Result<&P, SapError> {
        self.boxes
            .get(id)
            .map(|e| &e.payload)
            .ok_or(SapError::UnknownBox(id))
    }

    /// Mutable client payload of a box.
    pub fn payload_mut(&mut self, id: BoxId) -> Result<&mut P, SapError> {
        self.boxes
            .get_mut(id)
            .map(|e| &mut e.payload)
            .ok_or(SapError::UnknownBox(id))
    }

    /// Collision group of a box.
    pub fn group(&self, id: BoxId) -> Result<u32, SapError> {
        self.boxes
            .get(id)
            .map(|e| e.group)
            .ok_or(SapError::UnknownBox(id))
    }

    /// Whether `id` names a live box.
    pub fn contains(&self, id: BoxId) -> bool {
        self.boxes.get(id).is_some()
    }

    /// Number of live boxes.
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    /// Whether there are no live boxes.
    pub fn is_empty(&self) -> bool {
        self.boxes.len() == 0
    }

    /// Number of box slots, including freed ones awaiting reuse.
    pub fn pool_size(&self) -> usize {
        self.boxes.pool_size()
    }

    /// Iterate over the ids of all live boxes.
    pub fn box_ids(&self) -> impl Iterator<Item = BoxId> + '_ {
        self.boxes.iter().map(|(slot, _)| self.boxes.id_of(slot))
    }

    /// Leaf segments a box is currently registered in.
    pub fn box_segments(
        &self,
        id: BoxId,
    ) -> Result<impl Iterator<Item = SegmentId> + '_, SapError> {
        let entry = self.boxes.get(id).ok_or(SapError::UnknownBox(id))?;
        Ok(entry.occurrences.iter().map(|o| o.segment))
    }

    /// Live boxes registered in a leaf segment.
    ///
    /// Empty for split or dead segments.
    pub fn segment_boxes(&self, segment: SegmentId) -> impl Iterator<Item = BoxId> + '_ {
        self.tree
            .is_leaf(segment)
            .then(|| self.tree.leaf_slots(segment))
            .into_iter()
            .flatten()
            .map(|slot| self.boxes.id_of(slot))
    }

    /// Boxes registered in more than one leaf.
    pub fn crossed_boxes(&self) -> impl Iterator<Item = BoxId> + '_ {
        self.boxes
            .iter()
            .filter(|(_, e)| e.occurrences.len() > 1)
            .map(|(slot, _)| self.boxes.id_of(slot))
    }

    /// Bounding box of all live boxes, or `None` when empty.
    pub fn bounds_all(&self) -> Option<Aabb<T, N>> {
        self.tree.borders(self.tree.root())
    }

    /// Read-only view of the segment tree.
    pub fn tree(&self) -> &SegmentTree<T, N> {
        &self.tree
    }

    /// A ray caster over the current tree.
    pub fn ray_caster(&self) -> RayCaster<'_, T, P, N> {
        RayCaster::new(&self.tree, &self.boxes)
    }

    // --- collision groups --------------------------------------------------

    /// Matrix row of `group`: which groups it wants to collide with.
    pub fn collision_flags(&self, group: u32) -> Result<&GroupFlags, SapError> {
        self.check_group(group)?;
        Ok(&self.groups[group as usize])
    }

    /// Set `matrix[group][other] = value` for every `other` in `others`.
    ///
    /// Existing pairs are not touched until
    /// [`update_collision_flags`](Self::update_collision_flags) runs; new
    /// overlaps follow the matrix immediately.
    pub fn set_collision_flags(
        &mut self,
        group: u32,
        value: bool,
        others: &[u32],
    ) -> Result<(), SapError> {
        self.check_group(group)?;
        for &other in others {
            self.check_group(other)?;
        }
        let row = &mut self.groups[group as usize];
        for &other in others {
            row.set(other, value);
        }
        self.changed.set(group, true);
        Ok(())
    }

    /// Bring the pair set in line with the matrix after
    /// [`set_collision_flags`](Self::set_collision_flags).
    ///
    /// Rescans every box in a changed group against all boxes sharing a leaf
    /// with it; this is the expensive path and meant to run rarely.
    pub fn update_collision_flags(&mut self) {
        if self.changed == GroupFlags::NONE {
            return;
        }
        let changed = self.changed;
        let slots: Vec<u32> = self
            .boxes
            .iter()
            .filter(|(_, e)| changed.get(e.group))
            .map(|(slot, _)| slot)
            .collect();
        tracing::debug!(boxes = slots.len(), "rescanning collision flags");
        for slot in slots {
            for leaf in self.boxes.slot(slot).segments() {
                self.candidates.extend(self.tree.leaf_slots(leaf));
            }
            self.reconcile(slot, true);
        }
        self.changed = GroupFlags::NONE;
    }

    // --- overlaps ----------------------------------------------------------

    /// Number of tracked overlaps.
    pub fn overlaps_count(&self) -> usize {
        self.pairs.len()
    }

    /// Tracked overlap at a dense index in `0..overlaps_count()`.
    ///
    /// Indices are invalidated by any mutation.
    pub fn overlap(&self, index: usize) -> Option<Overlap<'_, O>> {
        self.pairs.get(index).map(|p| self.view(p))
    }

    /// Iterate over all tracked overlaps.
    pub fn overlaps(&self) -> impl Iterator<Item = Overlap<'_, O>> + '_ {
        self.pairs.iter().map(|p| self.view(p))
    }

    /// The tracked overlap of two boxes, in either order.
    pub fn find_overlap(&self, a: BoxId, b: BoxId) -> Option<Overlap<'_, O>> {
        if !self.contains(a) || !self.contains(b) {
            return None;
        }
        self.pairs.find(a.index(), b.index()).map(|p| self.view(p))
    }

    /// Mutable payload of the tracked overlap of two boxes.
    pub fn find_overlap_mut(&mut self, a: BoxId, b: BoxId) -> Option<&mut O> {
        if !self.contains(a) || !self.contains(b) {
            return None;
        }
        self.pairs
            .find_mut(a.index(), b.index())
            .map(|p| &mut p.data.data)
    }

    fn view<'a>(&'a self, pair: &'a Pair<PairData<O>>) -> Overlap<'a, O> {
        Overlap {
            first: self.boxes.id_of(pair.first()),
            second: self.boxes.id_of(pair.second()),
            contact: pair.data.contact,
            data: &pair.data.data,
        }
    }

    // --- internals ---------------------------------------------------------

    fn check_group(&self, group: u32) -> Result<(), SapError> {
        if (group as usize) < self.groups.len() {
            Ok(())
        } else {
            Err(SapError::InvalidGroup {
                group,
                limit: self.groups.len(),
            })
        }
    }

    fn check_capacity(&self, needed: usize) -> Result<(), SapError> {
        let limit = self.config.max_box_occurrences;
        if needed > limit {
            tracing::error!(needed, limit, "box exceeds occurrence capacity");
            return Err(SapError::OccurrenceCapacity { needed, limit });
        }
        Ok(())
    }

    fn mark_inserted(&mut self, leaf: SegmentId) {
        if self.tree.boxes_count(leaf) > self.config.max_boxes_in_segment {
            self.deferred.splits.push(leaf);
        }
        self.deferred.dirty.push(leaf);
    }

    fn contact(&self, first: u32, second: u32) -> Contact {
        let g1 = self.boxes.slot(first).group;
        let g2 = self.boxes.slot(second).group;
        let mut contact = Contact::empty();
        if self.groups[g1 as usize].get(g2) {
            contact |= Contact::FIRST_TO_SECOND;
        }
        if self.groups[g2 as usize].get(g1) {
            contact |= Contact::SECOND_TO_FIRST;
        }
        contact
    }

    /// Settle the pair state of `slot` against every candidate gathered.
    ///
    /// Tracked pairs keep the eligibility they were added with unless
    /// `regroup` is set, so matrix edits only reach them through
    /// [`update_collision_flags`](Self::update_collision_flags).
    fn reconcile(&mut self, slot: u32, regroup: bool) {
        let mut candidates = core::mem::take(&mut self.candidates);
        candidates.sort_unstable();
        candidates.dedup();
        for &other in &candidates {
            if other != slot {
                self.reconcile_pair(slot, other, regroup);
            }
        }
        candidates.clear();
        self.candidates = candidates;
    }

    fn reconcile_pair(&mut self, a: u32, b: u32, regroup: bool) {
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let overlapping = self
            .boxes
            .slot(first)
            .bounds
            .overlaps(&self.boxes.slot(second).bounds);
        if !overlapping {
            self.end_pair(first, second);
            return;
        }
        let contact = self.contact(first, second);
        if let Some(pair) = self.pairs.find_mut(first, second) {
            if regroup && contact.is_empty() {
                self.end_pair(first, second);
            } else if regroup {
                pair.data.contact = contact;
            }
            return;
        }
        if contact.is_empty() {
            return;
        }
        let mut data = O::default();
        let (id1, id2) = (self.boxes.id_of(first), self.boxes.id_of(second));
        if !self.hooks.begin_overlap(id1, id2, &mut data) {
            return;
        }
        self.pairs
            .add_with(first, second, || PairData { contact, data });
        tracing::trace!(first, second, "pair added");
    }

    fn end_pair(&mut self, a: u32, b: u32) {
        if let Some(record) = self.pairs.take(a, b) {
            let (first, second) = if a < b { (a, b) } else { (b, a) };
            let (id1, id2) = (self.boxes.id_of(first), self.boxes.id_of(second));
            self.hooks.end_overlap(id1, id2, record.data);
            tracing::trace!(first, second, "pair removed");
        }
    }

    /// Run merges, then splits, then border refreshes queued by the
    /// current operation.
    fn drain(&mut self) {
        while let Some(leaf) = self.deferred.merges.pop() {
            self.merge_upward(leaf);
        }
        while let Some(leaf) = self.deferred.splits.pop() {
            if !self.tree.is_leaf(leaf)
                || self.tree.boxes_count(leaf) <= self.config.max_boxes_in_segment
            {
                continue;
            }
            if let Some(children) = self.tree.split(leaf, &self.config, &mut self.boxes) {
                for child in children {
                    if self.tree.boxes_count(child) > self.config.max_boxes_in_segment {
                        self.deferred.splits.push(child);
                    }
                }
            }
        }
        let mut dirty = core::mem::take(&mut self.deferred.dirty);
        dirty.sort_unstable();
        dirty.dedup();
        for &segment in &dirty {
            if self.tree.is_leaf(segment) {
                self.tree.refresh_borders(segment);
            }
        }
        dirty.clear();
        self.deferred.dirty = dirty;
    }

    /// Merge `leaf` with its sibling leaf while either is underfull and the
    /// result stays within the split threshold, repeating upward.
    fn merge_upward(&mut self, leaf: SegmentId) {
        let (min, max) = (
            self.config.min_boxes_in_segment,
            self.config.max_boxes_in_segment,
        );
        let mut cur = leaf;
        while self.tree.is_leaf(cur) {
            let Some(parent) = self.tree.parent(cur) else {
                return;
            };
            let Some((sibling, _)) = self.tree.split_neighbor(cur) else {
                return;
            };
            if !self.tree.is_leaf(sibling) {
                return;
            }
            let underfull =
                self.tree.boxes_count(cur) < min || self.tree.boxes_count(sibling) < min;
            if !underfull || self.tree.merged_len(cur, sibling) > max {
                return;
            }
            self.tree.merge(parent, &mut self.boxes);
            cur = parent;
        }
    }

    // --- diagnostics -------------------------------------------------------

    /// Assert every structural invariant and the soundness of the pair set.
    ///
    /// Every tracked pair must overlap and be eligible; with hooks that never
    /// veto, the tracked set must also equal the brute-force overlap set.
    /// While matrix edits await
    /// [`update_collision_flags`](Self::update_collision_flags), eligibility
    /// is checked against the contact recorded on each pair.
    /// Panics on the first violation.
    pub fn validate(&self) {
        self.tree.validate(&self.boxes);
        let in_sync = self.changed == GroupFlags::NONE;
        let eligible = |a: u32, b: u32| !in_sync || !self.contact(a, b).is_empty();
        for pair in self.pairs.iter() {
            let (a, b) = (self.boxes.slot(pair.first()), self.boxes.slot(pair.second()));
            assert!(a.bounds.overlaps(&b.bounds), "tracked pair does not overlap");
            assert!(!pair.data.contact.is_empty(), "tracked pair has no contact");
            assert!(eligible(pair.first(), pair.second()), "tracked pair is not eligible");
        }
        let mut expected = 0_usize;
        let live: Vec<(u32, &Aabb<T, N>)> = self
            .boxes
            .iter()
            .map(|(s, e)| (s, &e.bounds))
            .collect();
        for (i, &(a, ba)) in live.iter().enumerate() {
            for &(b, bb) in &live[i + 1..] {
                if ba.overlaps(bb) && eligible(a, b) {
                    expected += 1;
                }
            }
        }
        assert!(
            self.pairs.len() <= expected,
            "tracked {} pairs, only {expected} overlap",
            self.pairs.len()
        );
    }

    /// Human-readable dump of the tree.
    pub fn debug_print(&self) -> String {
        let mut out = String::new();
        let mut stack = alloc::vec![(self.tree.root(), 0_usize)];
        while let Some((id, depth)) = stack.pop() {
            let _ = write!(out, "{:1$}", "", depth * 2);
            if let Some(children) = self.tree.children(id) {
                let _ = writeln!(
                    out,
                    "split #{} axis {} at {:?}, borders {:?}",
                    id.index(),
                    self.tree.split_axis(id).unwrap_or_default(),
                    self.tree.split_value(id),
                    self.tree.borders(id),
                );
                stack.push((children[1], depth + 1));
                stack.push((children[0], depth + 1));
            } else {
                let slots: Vec<u32> = self.tree.leaf_slots(id).collect();
                let _ = writeln!(
                    out,
                    "leaf #{} with {} boxes {:?}, borders {:?}",
                    id.index(),
                    slots.len(),
                    slots,
                    self.tree.borders(id),
                );
            }
        }
        let _ = writeln!(out, "{} boxes, {} overlaps", self.boxes.len(), self.pairs.len());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Aabb2D, Aabb3D};
    use alloc::vec;

    #[test]
    fn two_unit_boxes_overlap_then_separate() {
        let mut sap: SapManager2D<u32> = SapManager2D::new();
        let a = sap
            .add_box(Aabb2D::from_corners(0.0, 0.0, 1.0, 1.0), 0, 1)
            .unwrap();
        let b = sap
            .add_box(Aabb2D::from_corners(0.5, 0.5, 1.5, 1.5), 0, 2)
            .unwrap();
        assert_eq!(sap.overlaps_count(), 1);
        let overlap = sap.overlap(0).unwrap();
        assert_eq!((overlap.first, overlap.second), (a, b));
        assert_eq!(overlap.contact, Contact::all());

        sap.move_box(b, &[10.0, 10.0]).unwrap();
        assert_eq!(sap.overlaps_count(), 0);
        assert_eq!(
            sap.bounds(b),
            Ok(&Aabb2D::from_corners(10.5, 10.5, 11.5, 11.5))
        );

        sap.move_box(b, &[-10.0, -10.0]).unwrap();
        assert_eq!(sap.overlaps_count(), 1);
        assert_eq!(sap.remove_box(a), Ok(1));
        assert_eq!(sap.overlaps_count(), 0);
        assert_eq!(sap.payload(b), Ok(&2));
        sap.validate();
    }

    #[test]
    fn stale_ids_are_rejected() {
        let mut sap: SapManager2D<()> = SapManager2D::new();
        let a = sap
            .add_box(Aabb2D::from_corners(0.0, 0.0, 1.0, 1.0), 0, ())
            .unwrap();
        sap.remove_box(a).unwrap();
        assert_eq!(sap.remove_box(a), Err(SapError::UnknownBox(a)));
        assert_eq!(
            sap.update_box(a, Aabb2D::from_corners(0.0, 0.0, 2.0, 2.0)),
            Err(SapError::UnknownBox(a))
        );
        let b = sap
            .add_box(Aabb2D::from_corners(0.0, 0.0, 1.0, 1.0), 0, ())
            .unwrap();
        assert_eq!(b.index(), a.index(), "slot is reused");
        assert!(!sap.contains(a));
        assert!(sap.contains(b));
        assert_eq!(sap.pool_size(), 1);
    }

    #[test]
    fn invalid_input_is_rejected_without_side_effects() {
        let mut sap: SapManager2D<()> = SapManager2D::new();
        assert_eq!(
            sap.add_box(Aabb2D::from_corners(1.0, 0.0, 0.0, 1.0), 0, ()),
            Err(SapError::InvalidBounds)
        );
        assert_eq!(
            sap.add_box(Aabb2D::from_corners(0.0, 0.0, 1.0, 1.0), 512, ()),
            Err(SapError::InvalidGroup {
                group: 512,
                limit: 512
            })
        );
        assert!(sap.is_empty());
        assert_eq!(sap.pool_size(), 0);
        assert!(matches!(
            SapManager2D::<()>::with_config(SapConfig {
                initial_pair_capacity: 1000,
                ..SapConfig::default()
            }),
            Err(SapError::InvalidConfig(_))
        ));
    }

    #[test]
    fn asymmetric_groups_track_either_direction() {
        let mut sap: SapManager2D<()> = SapManager2D::new();
        sap.set_collision_flags(1, false, &[2]).unwrap();
        let a = sap
            .add_box(Aabb2D::from_corners(0.0, 0.0, 1.0, 1.0), 1, ())
            .unwrap();
        let b = sap
            .add_box(Aabb2D::from_corners(0.0, 0.0, 1.0, 1.0), 2, ())
            .unwrap();
        let overlap = sap.find_overlap(a, b).unwrap();
        assert_eq!(overlap.contact, Contact::SECOND_TO_FIRST);

        // Both directions off: the pair stays until the slow path runs.
        sap.set_collision_flags(2, false, &[1]).unwrap();
        assert_eq!(sap.overlaps_count(), 1);
        sap.update_collision_flags();
        assert_eq!(sap.overlaps_count(), 0);
        assert!(!sap.collision_flags(1).unwrap().get(2));

        sap.set_collision_flags(1, true, &[2]).unwrap();
        sap.update_collision_flags();
        assert_eq!(
            sap.find_overlap(b, a).map(|o| o.contact),
            Some(Contact::FIRST_TO_SECOND)
        );
        sap.validate();
    }

    #[test]
    fn matrix_edits_wait_for_the_rescan() {
        let mut sap: SapManager2D<()> = SapManager2D::new();
        let a = sap
            .add_box(Aabb2D::from_corners(0.0, 0.0, 1.0, 1.0), 1, ())
            .unwrap();
        let b = sap
            .add_box(Aabb2D::from_corners(0.5, 0.0, 1.5, 1.0), 1, ())
            .unwrap();
        sap.set_collision_flags(1, false, &[1]).unwrap();

        // Both endpoints of `a` swap past those of `b`, so the pair is
        // reconsidered; it still overlaps and must survive.
        sap.move_box(a, &[0.75, 0.0]).unwrap();
        assert!(sap.find_overlap(a, b).is_some());
        sap.validate();

        // Separating still ends it before the rescan.
        sap.move_box(a, &[5.0, 0.0]).unwrap();
        assert_eq!(sap.overlaps_count(), 0);
        // A fresh overlap uses the current matrix.
        sap.move_box(a, &[-5.0, 0.0]).unwrap();
        assert_eq!(sap.overlaps_count(), 0);

        sap.set_collision_flags(1, true, &[1]).unwrap();
        sap.update_collision_flags();
        assert!(sap.find_overlap(a, b).is_some());
        sap.set_collision_flags(1, false, &[1]).unwrap();
        sap.move_box(b, &[0.25, 0.0]).unwrap();
        assert_eq!(sap.overlaps_count(), 1);
        sap.update_collision_flags();
        assert_eq!(sap.overlaps_count(), 0);
        sap.validate();
    }

    #[test]
    fn infinite_extents_are_rejected() {
        let mut sap: SapManager2D<()> = SapManager2D::new();
        let unbounded = Aabb2D::from_corners(f32::NEG_INFINITY, 0.0, f32::INFINITY, 1.0);
        assert_eq!(sap.add_box(unbounded, 0, ()), Err(SapError::InvalidBounds));
        let a = sap
            .add_box(Aabb2D::from_corners(0.0, 0.0, 1.0, 1.0), 0, ())
            .unwrap();
        assert_eq!(sap.update_box(a, unbounded), Err(SapError::InvalidBounds));
        assert_eq!(sap.move_box(a, &[f32::MAX, 0.0]), Ok(()));
        assert_eq!(
            sap.move_box(a, &[f32::MAX, 0.0]),
            Err(SapError::InvalidBounds)
        );
        assert_eq!(sap.len(), 1);
        sap.validate();
    }

    #[test]
    fn huge_extents_split_without_losing_boxes() {
        let mut sap: SapManager2D<u32> = SapManager2D::new();
        let mut ids = Vec::new();
        for i in 0..16_u32 {
            let y = i as f32 * 0.5;
            let wide = Aabb2D::from_corners(-f32::MAX, y, f32::MAX, y + 1.0);
            ids.push(sap.add_box(wide, 0, i).unwrap());
        }
        for i in 0..40_u32 {
            let x = i as f32 * 3.0;
            let unit = Aabb2D::from_corners(x, 0.0, x + 1.0, 1.0);
            ids.push(sap.add_box(unit, 0, 16 + i).unwrap());
        }
        sap.validate();
        assert!(sap.tree().segments_count() > 1);
        assert!(sap.crossed_boxes().any(|id| id == ids[0]));

        let mut expected = 0;
        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                if sap.bounds(a).unwrap().overlaps(sap.bounds(b).unwrap()) {
                    expected += 1;
                }
            }
        }
        assert_eq!(sap.overlaps_count(), expected);
    }

    #[derive(Default)]
    struct Recorder {
        begun: usize,
        ended: Vec<(BoxId, BoxId, u32)>,
        veto: bool,
    }

    impl OverlapHooks<u32> for Recorder {
        fn begin_overlap(&mut self, _first: BoxId, _second: BoxId, data: &mut u32) -> bool {
            self.begun += 1;
            *data = 7;
            !self.veto
        }

        fn end_overlap(&mut self, first: BoxId, second: BoxId, data: u32) {
            self.ended.push((first, second, data));
        }
    }

    #[test]
    fn hooks_see_pair_lifetimes() {
        let mut sap: SapManager2D<(), u32, Recorder> =
            SapManager::with_hooks(SapConfig::default(), Recorder::default()).unwrap();
        let a = sap
            .add_box(Aabb2D::from_corners(0.0, 0.0, 1.0, 1.0), 0, ())
            .unwrap();
        let b = sap
            .add_box(Aabb2D::from_corners(0.5, 0.0, 1.5, 1.0), 0, ())
            .unwrap();
        assert_eq!(sap.hooks().begun, 1);
        assert_eq!(sap.find_overlap(a, b).map(|o| *o.data), Some(7));
        *sap.find_overlap_mut(a, b).unwrap() = 9;

        sap.update_box(b, Aabb2D::from_corners(5.0, 0.0, 6.0, 1.0))
            .unwrap();
        assert_eq!(sap.hooks().ended, vec![(a, b, 9)]);

        sap.hooks_mut().veto = true;
        sap.update_box(b, Aabb2D::from_corners(0.5, 0.0, 1.5, 1.0))
            .unwrap();
        assert_eq!(sap.hooks().begun, 2);
        assert_eq!(sap.overlaps_count(), 0);
        sap.validate();
    }

    #[test]
    fn clear_ends_pairs_and_keeps_flags() {
        let mut sap: SapManager2D<(), u32, Recorder> =
            SapManager::with_hooks(SapConfig::default(), Recorder::default()).unwrap();
        sap.set_collision_flags(3, false, &[3]).unwrap();
        for _ in 0..3 {
            sap.add_box(Aabb2D::from_corners(0.0, 0.0, 1.0, 1.0), 0, ())
                .unwrap();
        }
        assert_eq!(sap.overlaps_count(), 3);
        sap.clear();
        assert_eq!(sap.hooks().ended.len(), 3);
        assert!(sap.is_empty());
        assert_eq!(sap.bounds_all(), None);
        assert!(!sap.collision_flags(3).unwrap().get(3));
    }

    fn grid_config() -> SapConfig {
        SapConfig {
            max_boxes_in_segment: 8,
            min_boxes_in_segment: 3,
            ..SapConfig::default()
        }
    }

    #[test]
    fn growing_and_shrinking_reshapes_the_tree() {
        let mut sap: SapManager2D<usize> = SapManager2D::with_config(grid_config()).unwrap();
        let mut ids = Vec::new();
        for i in 0..100_usize {
            let x = (i % 10) as f32 * 2.0;
            let y = (i / 10) as f32 * 2.0;
            ids.push(
                sap.add_box(Aabb2D::from_corners(x, y, x + 1.5, y + 1.5), 0, i)
                    .unwrap(),
            );
        }
        sap.validate();
        assert!(sap.tree().segments_count() > 1, "tree split");
        assert!(sap.tree().leaves().all(|l| sap.tree().boxes_count(l) <= 8));
        assert_eq!(sap.overlaps_count(), 0);
        assert_eq!(
            sap.bounds_all(),
            Some(Aabb2D::from_corners(0.0, 0.0, 19.5, 19.5))
        );

        // Sweep one box across the grid; it overlaps as it passes.
        let runner = ids[0];
        for step in 0..40 {
            sap.move_box(runner, &[0.5, 0.25]).unwrap();
            sap.validate();
            if step == 39 {
                assert!(sap.bounds(runner).unwrap().min[0] >= 20.0);
            }
        }

        for id in ids.drain(..).rev().skip(3) {
            sap.remove_box(id).unwrap();
            sap.validate();
        }
        assert_eq!(sap.len(), 3);
        assert_eq!(sap.tree().segments_count(), 1, "tree merged back");
    }

    #[test]
    fn occurrence_capacity_is_reported() {
        let config = SapConfig {
            max_boxes_in_segment: 2,
            min_boxes_in_segment: 1,
            max_box_occurrences: 2,
            ..SapConfig::default()
        };
        let mut sap: SapManager2D<()> = SapManager2D::with_config(config).unwrap();
        for i in 0..12 {
            let x = i as f32 * 3.0;
            sap.add_box(Aabb2D::from_corners(x, 0.0, x + 1.0, 1.0), 0, ())
                .unwrap();
        }
        sap.validate();
        let leaves = sap.tree().leaves().count();
        assert!(leaves > 2);
        let result = sap.add_box(Aabb2D::from_corners(-1.0, 0.0, 40.0, 1.0), 0, ());
        assert!(matches!(
            result,
            Err(SapError::OccurrenceCapacity { limit: 2, .. })
        ));
        assert_eq!(sap.len(), 12);
        sap.validate();
    }

    #[test]
    fn boxes_migrate_across_splits_in_3d() {
        let config = SapConfig {
            max_boxes_in_segment: 4,
            min_boxes_in_segment: 2,
            max_box_occurrences: 32,
            ..SapConfig::default()
        };
        let mut sap: SapManager3D<()> = SapManager3D::with_config(config).unwrap();
        let mut ids = Vec::new();
        for i in 0..20 {
            let z = i as f32 * 2.0;
            ids.push(
                sap.add_box(Aabb3D::from_corners(0.0, 0.0, z, 1.0, 1.0, z + 1.0), 0, ())
                    .unwrap(),
            );
        }
        sap.validate();
        let mover = ids[0];
        sap.update_box(mover, Aabb3D::from_corners(0.0, 0.0, 0.0, 1.0, 1.0, 40.0))
            .unwrap();
        sap.validate();
        assert_eq!(sap.overlaps_count(), 19);
        assert!(sap.crossed_boxes().any(|id| id == mover));

        sap.update_box(mover, Aabb3D::from_corners(0.0, 0.0, 38.25, 1.0, 1.0, 38.75))
            .unwrap();
        sap.validate();
        assert_eq!(sap.overlaps_count(), 1);
        assert_eq!(sap.box_segments(mover).unwrap().count(), 1);
    }

    #[test]
    fn debug_print_lists_every_leaf() {
        let mut sap: SapManager2D<()> = SapManager2D::with_config(grid_config()).unwrap();
        for i in 0..20 {
            let x = i as f32;
            sap.add_box(Aabb2D::from_corners(x, 0.0, x + 0.5, 1.0), 0, ())
                .unwrap();
        }
        let dump = sap.debug_print();
        assert_eq!(
            dump.matches("leaf #").count(),
            sap.tree().leaves().count()
        );
        assert!(dump.ends_with("20 boxes, 0 overlaps\n"));
    }
}
