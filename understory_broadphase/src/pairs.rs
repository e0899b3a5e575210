// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hash registry of unordered id pairs.
//!
//! Records live in one dense array so that `pairs()[..len]` is exactly the set
//! of live pairs. A power-of-two table of bucket heads indexes into that array
//! and a parallel `next` array chains records that share a bucket. Removing a
//! record moves the last record into the hole and relinks it.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt::Debug;

const INVALID: u32 = u32::MAX;

/// Load factor numerator/denominator above which the bucket table doubles.
const MAX_LOAD_NUM: usize = 3;
const MAX_LOAD_DEN: usize = 4;

/// A pair record: two canonically ordered ids and a payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pair<V> {
    id1: u32,
    id2: u32,
    /// Per-pair payload.
    pub data: V,
}

impl<V> Pair<V> {
    /// The smaller id.
    #[inline]
    pub fn first(&self) -> u32 {
        self.id1
    }

    /// The larger id.
    #[inline]
    pub fn second(&self) -> u32 {
        self.id2
    }

    #[inline]
    fn is(&self, id1: u32, id2: u32) -> bool {
        self.id1 == id1 && self.id2 == id2
    }
}

/// Registry mapping unordered `(id1, id2)` to a [`Pair`] record.
///
/// ```
/// use understory_broadphase::PairRegistry;
///
/// let mut pairs: PairRegistry<u8> = PairRegistry::new(16);
/// pairs.add(7, 3).data = 42;
/// assert_eq!(pairs.find(3, 7).map(|p| p.data), Some(42));
/// assert!(pairs.remove(7, 3));
/// assert!(pairs.find(3, 7).is_none());
/// ```
pub struct PairRegistry<V> {
    hash_table: Vec<u32>,
    pairs: Vec<Pair<V>>,
    next: Vec<u32>,
    mask: u32,
}

impl<V> Debug for PairRegistry<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PairRegistry")
            .field("len", &self.pairs.len())
            .field("capacity", &self.hash_table.len())
            .finish_non_exhaustive()
    }
}

impl<V> PairRegistry<V> {
    /// Create an empty registry with `initial_capacity` buckets.
    ///
    /// The capacity is rounded up to a power of two.
    pub fn new(initial_capacity: usize) -> Self {
        debug_assert!(
            initial_capacity.is_power_of_two(),
            "pair registry capacity should be a power of two"
        );
        let capacity = initial_capacity.max(1).next_power_of_two();
        Self {
            hash_table: vec![INVALID; capacity],
            pairs: Vec::new(),
            next: Vec::new(),
            mask: mask_for(capacity),
        }
    }

    /// Number of live pairs.
    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether there are no live pairs.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Current bucket count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.hash_table.len()
    }

    /// All live pairs, densely packed.
    #[inline]
    pub fn pairs(&self) -> &[Pair<V>] {
        &self.pairs
    }

    /// Iterate over all live pairs.
    pub fn iter(&self) -> impl Iterator<Item = &Pair<V>> + '_ {
        self.pairs.iter()
    }

    /// The pair stored at a dense index.
    ///
    /// Indices stay valid until the next removal.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Pair<V>> {
        self.pairs.get(index)
    }

    /// Mutable access to the pair stored at a dense index.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Pair<V>> {
        self.pairs.get_mut(index)
    }

    /// Dense index of the pair `(id1, id2)`, in either order.
    pub fn index_of(&self, id1: u32, id2: u32) -> Option<usize> {
        let (id1, id2) = sort_ids(id1, id2);
        self.find_in_bucket(self.bucket(id1, id2), id1, id2)
    }

    /// Find the pair `(id1, id2)`, in either order.
    pub fn find(&self, id1: u32, id2: u32) -> Option<&Pair<V>> {
        self.index_of(id1, id2).map(|i| &self.pairs[i])
    }

    /// Find the pair `(id1, id2)` for mutation, in either order.
    pub fn find_mut(&mut self, id1: u32, id2: u32) -> Option<&mut Pair<V>> {
        self.index_of(id1, id2).map(|i| &mut self.pairs[i])
    }

    /// Whether the pair `(id1, id2)` is registered.
    #[inline]
    pub fn contains(&self, id1: u32, id2: u32) -> bool {
        self.index_of(id1, id2).is_some()
    }

    /// Insert `(id1, id2)` with a payload produced by `make`, unless it is
    /// already present.
    ///
    /// Returns the dense index of the record and whether it was inserted.
    pub fn add_with(&mut self, id1: u32, id2: u32, make: impl FnOnce() -> V) -> (usize, bool) {
        debug_assert_ne!(id1, id2, "a pair needs two distinct ids");
        let (id1, id2) = sort_ids(id1, id2);
        let mut bucket = self.bucket(id1, id2);
        if let Some(i) = self.find_in_bucket(bucket, id1, id2) {
            return (i, false);
        }
        if (self.pairs.len() + 1) * MAX_LOAD_DEN > self.hash_table.len() * MAX_LOAD_NUM {
            self.grow();
            bucket = self.bucket(id1, id2);
        }
        let index = self.pairs.len();
        self.pairs.push(Pair {
            id1,
            id2,
            data: make(),
        });
        self.next.push(self.hash_table[bucket]);
        self.hash_table[bucket] = to_link(index);
        (index, true)
    }

    /// Insert `(id1, id2)` with a default payload, or return the existing
    /// record.
    pub fn add(&mut self, id1: u32, id2: u32) -> &mut Pair<V>
    where
        V: Default,
    {
        let (index, _) = self.add_with(id1, id2, V::default);
        &mut self.pairs[index]
    }

    /// Remove `(id1, id2)` and return its payload.
    pub fn take(&mut self, id1: u32, id2: u32) -> Option<V> {
        let (id1, id2) = sort_ids(id1, id2);
        let bucket = self.bucket(id1, id2);
        let index = self.find_in_bucket(bucket, id1, id2)?;
        Some(self.remove_at(index, bucket).data)
    }

    /// Remove `(id1, id2)`. Returns `true` if the pair was present.
    pub fn remove(&mut self, id1: u32, id2: u32) -> bool {
        self.take(id1, id2).is_some()
    }

    /// Remove every pair, keeping the current bucket count.
    pub fn clear(&mut self) {
        self.hash_table.fill(INVALID);
        self.pairs.clear();
        self.next.clear();
    }

    #[inline]
    fn bucket(&self, id1: u32, id2: u32) -> usize {
        (hash_pair(id1, id2) & self.mask) as usize
    }

    fn find_in_bucket(&self, bucket: usize, id1: u32, id2: u32) -> Option<usize> {
        let mut cur = self.hash_table[bucket];
        while cur != INVALID {
            let i = cur as usize;
            if self.pairs[i].is(id1, id2) {
                return Some(i);
            }
            cur = self.next[i];
        }
        None
    }

    /// Replace the chain link that points at `from` with `to`.
    fn relink(&mut self, bucket: usize, from: u32, to: u32) {
        let mut prev = INVALID;
        let mut cur = self.hash_table[bucket];
        while cur != from {
            debug_assert_ne!(cur, INVALID, "pair registry invariant violated: broken chain");
            prev = cur;
            cur = self.next[cur as usize];
        }
        if prev == INVALID {
            self.hash_table[bucket] = to;
        } else {
            self.next[prev as usize] = to;
        }
    }

    fn remove_at(&mut self, index: usize, bucket: usize) -> Pair<V> {
        let link = to_link(index);
        let after = self.next[index];
        self.relink(bucket, link, after);

        let last = self.pairs.len() - 1;
        if index != last {
            let moved = &self.pairs[last];
            let last_bucket = self.bucket(moved.id1, moved.id2);
            self.relink(last_bucket, to_link(last), link);
            self.next[index] = self.next[last];
        }
        self.next.pop();
        self.pairs.swap_remove(index)
    }

    fn grow(&mut self) {
        let capacity = self.hash_table.len() * 2;
        self.hash_table = vec![INVALID; capacity];
        self.mask = mask_for(capacity);
        for i in 0..self.pairs.len() {
            let bucket = self.bucket(self.pairs[i].id1, self.pairs[i].id2);
            self.next[i] = self.hash_table[bucket];
            self.hash_table[bucket] = to_link(i);
        }
        tracing::debug!(capacity, pairs = self.pairs.len(), "pair registry grown");
    }
}

#[inline]
fn sort_ids(id1: u32, id2: u32) -> (u32, u32) {
    if id1 <= id2 { (id1, id2) } else { (id2, id1) }
}

/// 64-bit finalizer over both ids so that strided id patterns spread evenly.
#[allow(
    clippy::cast_possible_truncation,
    reason = "Only the low bits survive the bucket mask anyway."
)]
#[inline]
fn hash_pair(id1: u32, id2: u32) -> u32 {
    let mut h = (u64::from(id1) << 32) | u64::from(id2);
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h as u32
}

#[allow(
    clippy::cast_possible_truncation,
    reason = "Pair counts and bucket counts are intentionally 32-bit."
)]
#[inline]
fn to_link(index: usize) -> u32 {
    debug_assert!(index < INVALID as usize, "pair registry overflow");
    index as u32
}

#[inline]
fn mask_for(capacity: usize) -> u32 {
    to_link(capacity - 1)
}
