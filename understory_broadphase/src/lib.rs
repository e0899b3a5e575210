// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Broadphase: an incremental sweep-and-prune broad phase.
//!
//! Understory Broadphase keeps the set of overlapping pairs among a dynamic
//! set of axis-aligned boxes in 2D or 3D, updated incrementally as boxes are
//! added, moved, resized, and removed.
//!
//! - Boxes live in the leaves of a binary segment tree. Each leaf runs sweep
//!   and prune over one sorted endpoint array per axis, so a small move costs
//!   a few adjacent swaps.
//! - Leaves split when they grow past a threshold and merge back when they
//!   empty out. A box straddling a split is registered on both sides.
//! - Pairs are filtered by a collision-group matrix that may be asymmetric.
//! - Rays and segments can be cast against the boxes, with hits reported
//!   nearest first.
//!
//! It is generic over the scalar type `T` (`f32` or `f64`), the axis count
//! `N`, and the per-box payload, and does not depend on any geometry crate.
//!
//! # Example
//!
//! ```rust
//! use understory_broadphase::{Aabb2D, SapManager2D};
//!
//! let mut sap: SapManager2D<u32> = SapManager2D::new();
//! let a = sap.add_box(Aabb2D::from_corners(0.0, 0.0, 1.0, 1.0), 0, 1).unwrap();
//! let b = sap.add_box(Aabb2D::from_corners(0.5, 0.5, 1.5, 1.5), 0, 2).unwrap();
//! assert_eq!(sap.overlaps_count(), 1);
//!
//! // Move the second box away: the pair ends.
//! sap.move_box(b, &[10.0, 10.0]).unwrap();
//! assert_eq!(sap.overlaps_count(), 0);
//!
//! // Removing a box leaves the other one queryable.
//! sap.remove_box(a).unwrap();
//! assert_eq!(sap.payload(b), Ok(&2));
//! ```
//!
//! ## Collision groups
//!
//! Every box belongs to a group in `0..max_collision_groups`. A pair is
//! tracked when either direction of the group matrix allows it; the
//! [`Contact`] flags on each [`Overlap`] say which. Changing the matrix only
//! affects new overlaps until [`SapManager::update_collision_flags`] rescans.
//!
//! ```rust
//! use understory_broadphase::{Aabb2D, SapManager2D};
//!
//! let mut sap: SapManager2D<()> = SapManager2D::new();
//! sap.set_collision_flags(1, false, &[1]).unwrap();
//! let unit = Aabb2D::from_corners(0.0, 0.0, 1.0, 1.0);
//! sap.add_box(unit, 1, ()).unwrap();
//! sap.add_box(unit, 1, ()).unwrap();
//! assert_eq!(sap.overlaps_count(), 0);
//! ```
//!
//! ## Float semantics
//!
//! Bounds containing NaN or infinite coordinates are rejected, including a
//! [`SapManager::move_box`] whose result would overflow. Boundaries are
//! inclusive: boxes that touch overlap.

#![no_std]

extern crate alloc;

mod boxes;
mod config;
mod error;
mod manager;
mod pairs;
mod raycast;
mod segment;
mod types;

pub use boxes::BoxId;
pub use config::{
    CROSSED_SPLIT_PENALTY_COEF, MAX_BOX_OCCURENCES, MAX_BOXES_IN_SEGMENT, MAX_COLLISION_GROUPS,
    MIN_BOXES_IN_SEGMENT, PM_INITIAL_SIZE, SapConfig,
};
pub use error::SapError;
pub use manager::{
    Contact, GroupFlags, NoHooks, Overlap, OverlapHooks, SapManager, SapManager2D, SapManager3D,
};
pub use pairs::{Pair, PairRegistry};
pub use raycast::RayCaster;
pub use segment::{SegmentId, SegmentTree};
pub use types::{Aabb, Aabb2D, Aabb3D, Scalar};
