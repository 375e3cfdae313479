//! Minimal pose math. The engine only moves numbers around; interpolation
//! and dynamics belong to the application on either end.

use serde_derive::{Deserialize, Serialize};
use std::ops;

#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    #[inline]
    pub fn new(x: f64, y: f64, z: f64) -> Vec3 {
        Vec3 { x, y, z }
    }

    /// Largest absolute component difference. Used by tests to compare
    /// quantized round trips.
    #[inline]
    pub fn max_delta(&self, other: Vec3) -> f64 {
        let dx = (self.x - other.x).abs();
        let dy = (self.y - other.y).abs();
        let dz = (self.z - other.z).abs();
        dx.max(dy).max(dz)
    }
}

impl ops::Add for Vec3 {
    type Output = Vec3;

    #[inline]
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl ops::Sub for Vec3 {
    type Output = Vec3;

    #[inline]
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// Unit quaternion in (x, y, z, w) order. Identity is (0, 0, 0, 1).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    #[inline]
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Quat {
        Quat { x, y, z, w }
    }

    #[inline]
    pub fn max_delta(&self, other: Quat) -> f64 {
        let dx = (self.x - other.x).abs();
        let dy = (self.y - other.y).abs();
        let dz = (self.z - other.z).abs();
        let dw = (self.w - other.w).abs();
        dx.max(dy).max(dz).max(dw)
    }
}

impl Default for Quat {
    #[inline]
    fn default() -> Quat {
        Quat::IDENTITY
    }
}

/// Axis-aligned world-space box. Objects report these as their spatial
/// extents for zone classification.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Aabb {
        Aabb { min, max }
    }

    /// Box covering a single point.
    #[inline]
    pub fn point(p: Vec3) -> Aabb {
        Aabb { min: p, max: p }
    }

    /// Box of half-extent `r` centered on `p`.
    #[inline]
    pub fn centered(p: Vec3, r: f64) -> Aabb {
        Aabb {
            min: Vec3::new(p.x - r, p.y - r, p.z - r),
            max: Vec3::new(p.x + r, p.y + r, p.z + r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_add_sub_roundtrip() {
        let a = Vec3::new(1.5, -2.0, 3.25);
        let b = Vec3::new(10.0, 20.0, 30.0);

        assert_eq!(a + b - b, a);
    }

    #[test]
    fn test_max_delta() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(0.25, -0.5, 0.125);

        assert_eq!(a.max_delta(b), 0.5);
    }

    #[test]
    fn test_centered_box() {
        let aabb = Aabb::centered(Vec3::new(5.0, 0.0, 5.0), 2.0);

        assert_eq!(aabb.min, Vec3::new(3.0, -2.0, 3.0));
        assert_eq!(aabb.max, Vec3::new(7.0, 2.0, 7.0));
    }
}
