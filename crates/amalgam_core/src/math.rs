//! # Vector Math
//!
//! The small amount of 3D math the transition animations need: linear
//! interpolation, uniform scaling and rotation about the vertical axis.

use serde::{Deserialize, Serialize};

/// A 3D vector used for positions, offsets and local scales.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate (up).
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
}

impl Vec3 {
    /// The zero vector.
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// The unit-scale vector `(1, 1, 1)`.
    pub const ONE: Self = Self::new(1.0, 1.0, 1.0);

    /// Creates a new vector.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Creates a vector with all three components set to `value`.
    #[inline]
    #[must_use]
    pub const fn splat(value: f32) -> Self {
        Self::new(value, value, value)
    }

    /// Linear interpolation from `self` to `target`.
    ///
    /// `t` is clamped to `[0, 1]`, so any factor at or past `1.0` snaps to
    /// `target`.
    #[inline]
    #[must_use]
    pub fn lerp(self, target: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(
            self.x + (target.x - self.x) * t,
            self.y + (target.y - self.y) * t,
            self.z + (target.z - self.z) * t,
        )
    }

    /// Returns the midpoint between `self` and `other`.
    #[inline]
    #[must_use]
    pub fn midpoint(self, other: Self) -> Self {
        self.lerp(other, 0.5)
    }

    /// Multiplies every component by `factor`.
    #[inline]
    #[must_use]
    pub fn scaled(self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    /// Rotates the vector about the Y axis by `degrees`.
    ///
    /// Positive angles turn +Z towards +X (left-handed, Y up).
    #[must_use]
    pub fn rotate_y(self, degrees: f32) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self::new(
            self.x * cos + self.z * sin,
            self.y,
            -self.x * sin + self.z * cos,
        )
    }

    /// Returns the same vector with Y replaced.
    #[inline]
    #[must_use]
    pub const fn with_y(self, y: f32) -> Self {
        Self::new(self.x, y, self.z)
    }

    /// Returns the squared distance to another vector.
    #[inline]
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

impl std::ops::Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}
