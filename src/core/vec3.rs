//! 3D Float Vector
//!
//! Positions, Euler rotations, and movement deltas all travel as `Vec3`.
//! Components are plain `f32`; the send-on-change cache in the intent layer
//! relies on exact component equality, so no epsilon comparison is built in.

use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// 3D vector with float components.
#[derive(Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
}

impl Vec3 {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0.0, y: 0.0, z: 0.0 };

    /// Unit vector pointing forward (+Z)
    pub const FORWARD: Self = Self { x: 0.0, y: 0.0, z: 1.0 };

    /// Unit vector pointing up (+Y)
    pub const UP: Self = Self { x: 0.0, y: 1.0, z: 0.0 };

    /// Create a new vector.
    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Scale by a scalar.
    #[inline]
    pub fn scale(self, scalar: f32) -> Self {
        Self {
            x: self.x * scalar,
            y: self.y * scalar,
            z: self.z * scalar,
        }
    }

    /// Squared length (avoids sqrt - prefer this for comparisons).
    #[inline]
    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    /// Length (magnitude).
    #[inline]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Rotate a vector around the Y axis by `yaw_degrees`.
    ///
    /// Used to turn the local forward unit vector into world space from an
    /// entity's Euler rotation.
    pub fn rotated_y(self, yaw_degrees: f32) -> Self {
        let rad = yaw_degrees.to_radians();
        let (sin, cos) = rad.sin_cos();
        Self {
            x: self.x * cos + self.z * sin,
            y: self.y,
            z: -self.x * sin + self.z * cos,
        }
    }

    /// Is this the zero vector?
    #[inline]
    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }
}

impl Add for Vec3 {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        }
    }
}

impl AddAssign for Vec3 {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Sub for Vec3 {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Self {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;

    #[inline]
    fn mul(self, scalar: f32) -> Self {
        self.scale(scalar)
    }
}

impl Neg for Vec3 {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self {
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }
}

impl fmt::Debug for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_sub() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(0.5, -2.0, 1.0);

        assert_eq!(a + b, Vec3::new(1.5, 0.0, 4.0));
        assert_eq!(a - b, Vec3::new(0.5, 4.0, 2.0));
    }

    #[test]
    fn test_scale() {
        let v = Vec3::FORWARD.scale(2.5);
        assert_eq!(v, Vec3::new(0.0, 0.0, 2.5));
        assert_eq!(v * 2.0, Vec3::new(0.0, 0.0, 5.0));
    }

    #[test]
    fn test_length() {
        let v = Vec3::new(3.0, 0.0, 4.0);
        assert_eq!(v.length_squared(), 25.0);
        assert_eq!(v.length(), 5.0);
    }

    #[test]
    fn test_rotated_y_quarter_turn() {
        let v = Vec3::FORWARD.rotated_y(90.0);
        assert!((v.x - 1.0).abs() < 1e-6);
        assert!(v.z.abs() < 1e-6);
    }

    #[test]
    fn test_exact_equality_for_dedup() {
        // The intent channel caches the last sent delta and compares exactly.
        let a = Vec3::new(0.1 + 0.2, 0.0, 0.0);
        let b = Vec3::new(0.1 + 0.2, 0.0, 0.0);
        assert_eq!(a, b);
        assert!(!a.is_zero());
    }
}
