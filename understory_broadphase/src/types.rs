// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Primitive geometry types and helpers.

use core::cmp::Ordering;
use core::fmt::Debug;
use core::ops::{Add, Div, Mul, Neg, Sub};

/// Axis-aligned box in `N` dimensions.
///
/// Coordinates must be finite and `min[a] <= max[a]` must hold on every
/// axis for boxes handed to the manager; see [`Aabb::is_valid`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb<T, const N: usize> {
    /// Minimum corner.
    pub min: [T; N],
    /// Maximum corner.
    pub max: [T; N],
}

/// Axis-aligned box in 2D.
pub type Aabb2D<T> = Aabb<T, 2>;

/// Axis-aligned box in 3D.
pub type Aabb3D<T> = Aabb<T, 3>;

impl<T, const N: usize> Aabb<T, N> {
    /// Create a new box from min/max corners.
    #[inline(always)]
    pub const fn new(min: [T; N], max: [T; N]) -> Self {
        Self { min, max }
    }
}

impl<T: Copy> Aabb<T, 2> {
    /// Create a 2D box from its corner coordinates.
    #[inline(always)]
    pub const fn from_corners(min_x: T, min_y: T, max_x: T, max_y: T) -> Self {
        Self {
            min: [min_x, min_y],
            max: [max_x, max_y],
        }
    }
}

impl<T: Copy> Aabb<T, 3> {
    /// Create a 3D box from its corner coordinates.
    #[inline(always)]
    pub const fn from_corners(min_x: T, min_y: T, min_z: T, max_x: T, max_y: T, max_z: T) -> Self {
        Self {
            min: [min_x, min_y, min_z],
            max: [max_x, max_y, max_z],
        }
    }
}

impl<T: Scalar, const N: usize> Aabb<T, N> {
    /// Determines whether this box overlaps with another in any way.
    ///
    /// The boundary is part of the box, so two boxes that share an edge
    /// overlap.
    ///
    /// # Examples
    ///
    /// ```
    /// use understory_broadphase::Aabb2D;
    ///
    /// let a = Aabb2D::from_corners(0.0, 0.0, 10.0, 10.0);
    /// let b = Aabb2D::from_corners(10.0, 0.0, 20.0, 10.0);
    /// assert!(a.overlaps(&b));
    ///
    /// let c = Aabb2D::from_corners(11.0, 0.0, 20.0, 10.0);
    /// assert!(!a.overlaps(&c));
    /// ```
    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        (0..N).all(|a| self.min[a] <= other.max[a] && other.min[a] <= self.max[a])
    }

    /// Whether `other` lies entirely inside this box.
    #[inline]
    pub fn contains(&self, other: &Self) -> bool {
        (0..N).all(|a| self.min[a] <= other.min[a] && other.max[a] <= self.max[a])
    }

    /// Whether every coordinate is finite and `min <= max` holds on every
    /// axis. Returns `false` for NaN and infinities.
    #[inline]
    pub fn is_valid(&self) -> bool {
        (0..N).all(|a| {
            self.min[a].is_finite() && self.max[a].is_finite() && self.min[a] <= self.max[a]
        })
    }

    /// The box shifted by `delta` on every axis.
    #[inline]
    pub fn translated(&self, delta: &[T; N]) -> Self {
        let mut out = *self;
        for a in 0..N {
            out.min[a] = out.min[a] + delta[a];
            out.max[a] = out.max[a] + delta[a];
        }
        out
    }

    /// The smallest box enclosing both boxes.
    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        let mut out = *self;
        for a in 0..N {
            out.min[a] = min_t(self.min[a], other.min[a]);
            out.max[a] = max_t(self.max[a], other.max[a]);
        }
        out
    }

    /// Side length along `axis`.
    #[inline]
    pub fn extent(&self, axis: usize) -> T {
        self.max[axis] - self.min[axis]
    }

    /// Center coordinate along `axis`.
    #[inline]
    pub fn center(&self, axis: usize) -> T {
        T::mid(self.min[axis], self.max[axis])
    }
}

/// Numeric scalar abstraction for box coordinates and ray parameters.
///
/// Ray casting needs division and an infinity, so only floating point
/// types implement this.
pub trait Scalar:
    Copy
    + PartialOrd
    + Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    /// Zero value for the scalar type.
    fn zero() -> Self;

    /// One value for the scalar type.
    fn one() -> Self;

    /// Positive infinity.
    fn infinity() -> Self;

    /// Max of the two scalar values.
    fn max(a: Self, b: Self) -> Self;

    /// Min of the two scalar values.
    fn min(a: Self, b: Self) -> Self;

    /// Midpoint between a and b. Finite for finite inputs.
    fn mid(a: Self, b: Self) -> Self;

    /// Whether the value is neither infinite nor NaN.
    fn is_finite(self) -> bool;
}

impl Scalar for f32 {
    #[inline(always)]
    fn zero() -> Self {
        0.0
    }

    #[inline(always)]
    fn one() -> Self {
        1.0
    }

    #[inline(always)]
    fn infinity() -> Self {
        Self::INFINITY
    }

    #[inline]
    fn max(a: Self, b: Self) -> Self {
        Self::max(a, b)
    }

    #[inline]
    fn min(a: Self, b: Self) -> Self {
        Self::min(a, b)
    }

    #[inline]
    fn mid(a: Self, b: Self) -> Self {
        0.5 * a + 0.5 * b
    }

    #[inline(always)]
    fn is_finite(self) -> bool {
        Self::is_finite(self)
    }
}

impl Scalar for f64 {
    #[inline(always)]
    fn zero() -> Self {
        0.0
    }

    #[inline(always)]
    fn one() -> Self {
        1.0
    }

    #[inline(always)]
    fn infinity() -> Self {
        Self::INFINITY
    }

    #[inline]
    fn max(a: Self, b: Self) -> Self {
        Self::max(a, b)
    }

    #[inline]
    fn min(a: Self, b: Self) -> Self {
        Self::min(a, b)
    }

    #[inline]
    fn mid(a: Self, b: Self) -> Self {
        0.5 * a + 0.5 * b
    }

    #[inline(always)]
    fn is_finite(self) -> bool {
        Self::is_finite(self)
    }
}

pub(crate) fn min_t<T: PartialOrd + Copy>(a: T, b: T) -> T {
    match a.partial_cmp(&b) {
        Some(Ordering::Greater) => b,
        _ => a,
    }
}

pub(crate) fn max_t<T: PartialOrd + Copy>(a: T, b: T) -> T {
    match a.partial_cmp(&b) {
        Some(Ordering::Less) => b,
        _ => a,
    }
}
