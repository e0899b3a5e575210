// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error type shared by the manager and its configuration.

use crate::boxes::BoxId;

/// Errors reported by [`SapManager`](crate::SapManager) operations.
///
/// A failing operation leaves the manager unchanged.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SapError {
    /// The id was never issued, has been removed, or belongs to an older
    /// occupant of its slot.
    #[error("unknown box identifier {0:?}")]
    UnknownBox(BoxId),
    /// The box would need more leaf segments than a box may occupy.
    ///
    /// This points at boxes that are large relative to the segment sizing.
    #[error("box would occupy {needed} segments, the limit is {limit}")]
    OccurrenceCapacity {
        /// Number of leaf segments the box would be registered in.
        needed: usize,
        /// Configured `max_box_occurrences`.
        limit: usize,
    },
    /// A collision group outside `0..limit`.
    #[error("collision group {group} is outside 0..{limit}")]
    InvalidGroup {
        /// The offending group id.
        group: u32,
        /// Configured `max_collision_groups`.
        limit: usize,
    },
    /// Bounds with `min > max` on some axis, or with NaN or infinite
    /// coordinates.
    #[error("box bounds are inverted or not finite")]
    InvalidBounds,
    /// Rejected by [`SapConfig::validate`](crate::SapConfig::validate).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
