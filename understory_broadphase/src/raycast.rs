// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Ray queries over the segment tree.
//!
//! Traversal is depth first and visits the child the ray enters first. Hits
//! found in a leaf are held back until no segment still waiting on the stack
//! can contain a nearer one, so the callback sees hits in non-decreasing `t`
//! across the whole query.

use alloc::vec::Vec;

use hashbrown::HashSet;
use smallvec::SmallVec;

use crate::boxes::{BoxId, BoxStore};
use crate::segment::{SegmentId, SegmentTree};
use crate::types::{Aabb, Scalar, max_t, min_t};

/// Casts rays against the boxes of a [`SapManager`](crate::SapManager).
///
/// Obtained from [`SapManager::ray_caster`](crate::SapManager::ray_caster).
/// The ray starts unset (origin at zero, zero direction), which only hits
/// boxes containing the origin.
///
/// ```
/// use understory_broadphase::{Aabb2D, SapManager2D};
///
/// let mut sap: SapManager2D<()> = SapManager2D::new();
/// let near = sap.add_box(Aabb2D::from_corners(2.0, -1.0, 3.0, 1.0), 0, ()).unwrap();
/// let far = sap.add_box(Aabb2D::from_corners(6.0, -1.0, 7.0, 1.0), 0, ()).unwrap();
///
/// let mut caster = sap.ray_caster();
/// caster.set_ray([0.0, 0.0], [1.0, 0.0]);
/// let mut seen = Vec::new();
/// caster.hits(|id, t| {
///     seen.push((id, t));
///     true
/// });
/// assert_eq!(seen, vec![(near, 2.0), (far, 6.0)]);
/// ```
pub struct RayCaster<'a, T, P, const N: usize> {
    tree: &'a SegmentTree<T, N>,
    boxes: &'a BoxStore<T, P, N>,
    origin: [T; N],
    dir: [T; N],
    inv_dir: [T; N],
    negative: [bool; N],
    t_max: T,
}

impl<T: Scalar, P, const N: usize> core::fmt::Debug for RayCaster<'_, T, P, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RayCaster")
            .field("origin", &self.origin)
            .field("dir", &self.dir)
            .field("t_max", &self.t_max)
            .finish_non_exhaustive()
    }
}

impl<'a, T: Scalar, P, const N: usize> RayCaster<'a, T, P, N> {
    pub(crate) fn new(tree: &'a SegmentTree<T, N>, boxes: &'a BoxStore<T, P, N>) -> Self {
        Self {
            tree,
            boxes,
            origin: [T::zero(); N],
            dir: [T::zero(); N],
            inv_dir: [T::zero(); N],
            negative: [false; N],
            t_max: T::infinity(),
        }
    }

    /// Cast from `origin` along `dir` without a far limit.
    ///
    /// `dir` need not be normalized; reported `t` is in units of `dir`.
    pub fn set_ray(&mut self, origin: [T; N], dir: [T; N]) {
        self.origin = origin;
        self.dir = dir;
        for a in 0..N {
            self.inv_dir[a] = if dir[a] == T::zero() {
                T::zero()
            } else {
                T::one() / dir[a]
            };
            self.negative[a] = dir[a] < T::zero();
        }
        self.t_max = T::infinity();
    }

    /// Cast from `start` to `end`; hits have `t` in `0..=1`.
    pub fn set_segment(&mut self, start: [T; N], end: [T; N]) {
        let mut dir = end;
        for a in 0..N {
            dir[a] = end[a] - start[a];
        }
        self.set_ray(start, dir);
        self.t_max = T::one();
    }

    /// Entry parameter of the ray into `b`, if it hits within `0..=t_max`.
    ///
    /// A ray starting inside the box enters at `t = 0`.
    pub fn intersect(&self, b: &Aabb<T, N>) -> Option<T> {
        let mut t0 = T::zero();
        let mut t1 = self.t_max;
        for a in 0..N {
            if self.dir[a] == T::zero() {
                // Parallel to this slab: the origin must lie inside it.
                if self.origin[a] < b.min[a] || self.origin[a] > b.max[a] {
                    return None;
                }
                continue;
            }
            let (near, far) = if self.negative[a] {
                (b.max[a], b.min[a])
            } else {
                (b.min[a], b.max[a])
            };
            t0 = max_t(t0, (near - self.origin[a]) * self.inv_dir[a]);
            t1 = min_t(t1, (far - self.origin[a]) * self.inv_dir[a]);
            if t0 > t1 {
                return None;
            }
        }
        Some(t0)
    }

    /// Report every box the ray hits, nearest first, as `(id, t)`.
    ///
    /// Each box is reported once. Returning `false` from `f` stops the query
    /// before any further box is reported.
    pub fn hits(&self, mut f: impl FnMut(BoxId, T) -> bool) {
        let root = self.tree.root();
        let Some(t) = self.tree.borders(root).and_then(|b| self.intersect(&b)) else {
            return;
        };
        let mut stack: SmallVec<[(SegmentId, T); 32]> = SmallVec::new();
        stack.push((root, t));
        // Held-back hits, kept sorted with the nearest last.
        let mut pending: Vec<(T, u32)> = Vec::new();
        let mut tested: HashSet<u32> = HashSet::new();

        while let Some((segment, _)) = stack.pop() {
            if let Some(children) = self.tree.children(segment) {
                let entry = children.map(|c| self.tree.borders(c).and_then(|b| self.intersect(&b)));
                match (entry[0], entry[1]) {
                    (Some(t0), Some(t1)) => {
                        let (near, far) = if t1 < t0 { (1, 0) } else { (0, 1) };
                        stack.push((children[far], max_t(t0, t1)));
                        stack.push((children[near], min_t(t0, t1)));
                    }
                    (Some(t0), None) => stack.push((children[0], t0)),
                    (None, Some(t1)) => stack.push((children[1], t1)),
                    (None, None) => {}
                }
            } else {
                for slot in self.tree.leaf_slots(segment) {
                    if !tested.insert(slot) {
                        continue;
                    }
                    if let Some(t) = self.intersect(&self.boxes.slot(slot).bounds) {
                        let at = pending.partition_point(|&(p, _)| p > t);
                        pending.insert(at, (t, slot));
                    }
                }
            }

            // Nothing left on the stack can produce a hit before `bound`.
            let bound = stack.iter().map(|&(_, t)| t).reduce(min_t);
            while let Some(&(t, slot)) = pending.last() {
                if bound.is_some_and(|b| t > b) {
                    break;
                }
                pending.pop();
                if !f(self.boxes.id_of(slot), t) {
                    return;
                }
            }
        }
    }

    /// The nearest hit, if any.
    pub fn first_hit(&self) -> Option<(BoxId, T)> {
        let mut first = None;
        self.hits(|id, t| {
            first = Some((id, t));
            false
        });
        first
    }

    /// All hits, nearest first.
    pub fn collect_hits(&self) -> Vec<(BoxId, T)> {
        let mut out = Vec::new();
        self.hits(|id, t| {
            out.push((id, t));
            true
        });
        out
    }
}
