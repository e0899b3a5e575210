// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Slot-stable storage for boxes and their per-segment occurrence records.

use alloc::vec::Vec;

use smallvec::SmallVec;

use crate::segment::SegmentId;
use crate::types::Aabb;

/// Generational handle for a box.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoxId(u32, u32);

impl BoxId {
    pub(crate) const fn new(slot: u32, generation: u32) -> Self {
        Self(slot, generation)
    }

    /// Slot index of the box in the manager's pool.
    ///
    /// Slots are reused after removal; the generation tells occupants apart.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) const fn slot(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) const fn generation(self) -> u32 {
        self.1
    }
}

/// Which endpoint of a box on one axis.
pub(crate) const MIN_END: usize = 0;
pub(crate) const MAX_END: usize = 1;

/// Registration of a box in one leaf segment.
///
/// `ends[axis][MIN_END]` and `ends[axis][MAX_END]` are the indices of the box's
/// endpoints in that leaf's sorted array for `axis`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Occurrence<const N: usize> {
    pub(crate) segment: SegmentId,
    pub(crate) ends: [[u32; 2]; N],
}

impl<const N: usize> Occurrence<N> {
    pub(crate) const fn new(segment: SegmentId) -> Self {
        Self {
            segment,
            ends: [[0; 2]; N],
        }
    }
}

pub(crate) type Occurrences<const N: usize> = SmallVec<[Occurrence<N>; 4]>;

#[derive(Clone, Debug)]
pub(crate) struct BoxEntry<T, P, const N: usize> {
    pub(crate) bounds: Aabb<T, N>,
    pub(crate) group: u32,
    pub(crate) payload: P,
    pub(crate) occurrences: Occurrences<N>,
}

impl<T, P, const N: usize> BoxEntry<T, P, N> {
    pub(crate) fn occurrence(&self, segment: SegmentId) -> Option<&Occurrence<N>> {
        self.occurrences.iter().find(|o| o.segment == segment)
    }

    pub(crate) fn occurrence_mut(&mut self, segment: SegmentId) -> &mut Occurrence<N> {
        self.occurrences
            .iter_mut()
            .find(|o| o.segment == segment)
            .expect("box invariant violated: no occurrence for segment")
    }

    pub(crate) fn remove_occurrence(&mut self, segment: SegmentId) {
        if let Some(pos) = self.occurrences.iter().position(|o| o.segment == segment) {
            self.occurrences.swap_remove(pos);
        }
    }

    pub(crate) fn segments(&self) -> SmallVec<[SegmentId; 4]> {
        self.occurrences.iter().map(|o| o.segment).collect()
    }
}

/// Pool of boxes with free-list slot reuse.
#[derive(Debug)]
pub(crate) struct BoxStore<T, P, const N: usize> {
    entries: Vec<Option<BoxEntry<T, P, N>>>,
    /// Last generation per slot (persists across frees).
    generations: Vec<u32>,
    free_list: Vec<usize>,
    live: usize,
}

impl<T, P, const N: usize> BoxStore<T, P, N> {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "Box slots are intentionally 31-bit; endpoints pack the slot with a flag bit."
    )]
    pub(crate) fn insert(&mut self, entry: BoxEntry<T, P, N>) -> BoxId {
        let slot = if let Some(slot) = self.free_list.pop() {
            self.generations[slot] = self.generations[slot].wrapping_add(1);
            self.entries[slot] = Some(entry);
            slot
        } else {
            self.entries.push(Some(entry));
            self.generations.push(1);
            self.entries.len() - 1
        };
        debug_assert!(slot < (1 << 31), "box pool exceeded 2^31 slots");
        self.live += 1;
        BoxId::new(slot as u32, self.generations[slot])
    }

    pub(crate) fn remove(&mut self, id: BoxId) -> Option<BoxEntry<T, P, N>> {
        self.get(id)?;
        let entry = self.entries[id.slot()].take()?;
        self.free_list.push(id.slot());
        self.live -= 1;
        Some(entry)
    }

    pub(crate) fn clear(&mut self) {
        for (slot, entry) in self.entries.iter_mut().enumerate() {
            if entry.take().is_some() {
                self.free_list.push(slot);
            }
        }
        self.live = 0;
    }

    /// Entry addressed by a handle, if the handle is current.
    pub(crate) fn get(&self, id: BoxId) -> Option<&BoxEntry<T, P, N>> {
        if self.generations.get(id.slot()) != Some(&id.generation()) {
            return None;
        }
        self.entries.get(id.slot())?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: BoxId) -> Option<&mut BoxEntry<T, P, N>> {
        if self.generations.get(id.slot()) != Some(&id.generation()) {
            return None;
        }
        self.entries.get_mut(id.slot())?.as_mut()
    }

    /// Entry in a slot that the tree references; the slot must be live.
    pub(crate) fn slot(&self, slot: u32) -> &BoxEntry<T, P, N> {
        self.entries
            .get(slot as usize)
            .and_then(Option::as_ref)
            .expect("box invariant violated: segment references vacant slot")
    }

    pub(crate) fn slot_mut(&mut self, slot: u32) -> &mut BoxEntry<T, P, N> {
        self.entries
            .get_mut(slot as usize)
            .and_then(Option::as_mut)
            .expect("box invariant violated: segment references vacant slot")
    }

    /// Current handle of a live slot.
    pub(crate) fn id_of(&self, slot: u32) -> BoxId {
        BoxId::new(slot, self.generations[slot as usize])
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Slot count including vacant slots.
    pub(crate) fn pool_size(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over live `(slot, entry)` pairs.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "Box slots are intentionally 31-bit."
    )]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (u32, &BoxEntry<T, P, N>)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(slot, e)| e.as_ref().map(|e| (slot as u32, e)))
    }
}
