// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tunable constants, consumed once when a manager is built.

use crate::error::SapError;

/// Upper bound for [`SapConfig::max_collision_groups`].
pub const MAX_COLLISION_GROUPS: usize = 512;
/// Default leaf size above which a leaf segment is split.
pub const MAX_BOXES_IN_SEGMENT: usize = 30;
/// Default leaf size below which sibling leaves are merged.
pub const MIN_BOXES_IN_SEGMENT: usize = 10;
/// Default weight of a box crossing a candidate split.
pub const CROSSED_SPLIT_PENALTY_COEF: f32 = 2.0;
/// Default initial bucket count of the pair registry (a power of two).
pub const PM_INITIAL_SIZE: usize = 1024;
/// Default number of leaf segments a single box may occupy.
pub const MAX_BOX_OCCURENCES: usize = 10;

/// Manager configuration.
///
/// ```
/// use understory_broadphase::{SapConfig, SapManager2D};
///
/// let config = SapConfig {
///     max_boxes_in_segment: 16,
///     min_boxes_in_segment: 4,
///     ..SapConfig::default()
/// };
/// let sap = SapManager2D::<u32>::with_config(config).unwrap();
/// assert!(sap.is_empty());
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SapConfig {
    /// A leaf holding more boxes than this is split.
    pub max_boxes_in_segment: usize,
    /// Sibling leaves are merged once they drop under this.
    pub min_boxes_in_segment: usize,
    /// How much a box straddling a candidate split costs relative to a box
    /// that ends up in only one child.
    pub crossed_split_penalty: f32,
    /// Initial bucket count of the pair registry. Must be a power of two.
    pub initial_pair_capacity: usize,
    /// Number of leaf segments a single box may be registered in.
    pub max_box_occurrences: usize,
    /// Number of collision groups, at most [`MAX_COLLISION_GROUPS`].
    pub max_collision_groups: usize,
}

impl Default for SapConfig {
    fn default() -> Self {
        Self {
            max_boxes_in_segment: MAX_BOXES_IN_SEGMENT,
            min_boxes_in_segment: MIN_BOXES_IN_SEGMENT,
            crossed_split_penalty: CROSSED_SPLIT_PENALTY_COEF,
            initial_pair_capacity: PM_INITIAL_SIZE,
            max_box_occurrences: MAX_BOX_OCCURENCES,
            max_collision_groups: MAX_COLLISION_GROUPS,
        }
    }
}

impl SapConfig {
    /// Check the configuration for values the manager cannot work with.
    pub fn validate(&self) -> Result<(), SapError> {
        if self.max_boxes_in_segment < 2 {
            return Err(SapError::InvalidConfig(
                "max_boxes_in_segment must be at least 2",
            ));
        }
        if self.min_boxes_in_segment >= self.max_boxes_in_segment {
            return Err(SapError::InvalidConfig(
                "min_boxes_in_segment must be below max_boxes_in_segment",
            ));
        }
        if self.crossed_split_penalty.is_nan() || self.crossed_split_penalty < 0.0 {
            return Err(SapError::InvalidConfig(
                "crossed_split_penalty must be a non-negative number",
            ));
        }
        if !self.initial_pair_capacity.is_power_of_two() {
            return Err(SapError::InvalidConfig(
                "initial_pair_capacity must be a power of two",
            ));
        }
        if self.max_box_occurrences == 0 {
            return Err(SapError::InvalidConfig(
                "max_box_occurrences must be at least 1",
            ));
        }
        if self.max_collision_groups == 0 || self.max_collision_groups > MAX_COLLISION_GROUPS {
            return Err(SapError::InvalidConfig(
                "max_collision_groups must be in 1..=512",
            ));
        }
        Ok(())
    }
}
