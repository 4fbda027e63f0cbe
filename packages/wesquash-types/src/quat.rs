//! Rotation value types shared by the controller and the backend.
//!
//! ## Conventions
//! - Components are stored `(x, y, z, w)`, scalar last.
//! - Multiplication is the Hamilton product: `a * b` applies `b` first, then `a`.
//! - Every constructor that can leave the unit sphere renormalizes on the way out.

use std::ops::{Mul, Neg};

use serde::{Deserialize, Serialize};

/// Below this norm a quaternion is treated as degenerate and collapses to identity.
const DEGENERATE_NORM: f32 = 1e-8;

/// Above this dot product slerp falls back to normalized lerp (angles ~0.5°).
const SLERP_LINEAR_THRESHOLD: f32 = 0.9995;

/// 3D vector (deg/s for gyro, m/s² for acceleration)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Orientation quaternion (normalized)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Self = Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    /// Build from raw components and renormalize.
    pub fn from_xyzw(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }.normalize()
    }

    /// Rotation of `angle` radians about `axis` (need not be unit length).
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        let len = axis.length();
        if len < DEGENERATE_NORM {
            return Self::IDENTITY;
        }
        let (s, c) = (angle * 0.5).sin_cos();
        let k = s / len;
        Self::from_xyzw(axis.x * k, axis.y * k, axis.z * k, c)
    }

    pub fn from_rotation_x(angle: f32) -> Self {
        let (s, c) = (angle * 0.5).sin_cos();
        Self { x: s, y: 0.0, z: 0.0, w: c }
    }

    pub fn from_rotation_y(angle: f32) -> Self {
        let (s, c) = (angle * 0.5).sin_cos();
        Self { x: 0.0, y: s, z: 0.0, w: c }
    }

    pub fn from_rotation_z(angle: f32) -> Self {
        let (s, c) = (angle * 0.5).sin_cos();
        Self { x: 0.0, y: 0.0, z: s, w: c }
    }

    pub fn length(&self) -> f32 {
        self.dot(*self).sqrt()
    }

    /// Unit-length copy. A zero (or NaN-free but vanishing) quaternion becomes identity;
    /// NaN components propagate unchanged.
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len.is_nan() {
            return self;
        }
        if len < DEGENERATE_NORM {
            return Self::IDENTITY;
        }
        let inv = 1.0 / len;
        Self {
            x: self.x * inv,
            y: self.y * inv,
            z: self.z * inv,
            w: self.w * inv,
        }
    }

    pub fn is_normalized(&self, eps: f32) -> bool {
        (self.length() - 1.0).abs() <= eps
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.w.is_finite()
    }

    pub fn dot(&self, other: Quat) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    pub fn conjugate(&self) -> Self {
        Self { x: -self.x, y: -self.y, z: -self.z, w: self.w }
    }

    /// Inverse of a unit quaternion (its conjugate).
    pub fn inverse(&self) -> Self {
        self.conjugate()
    }

    /// Rotation taking `self` to `other`, expressed in `self`'s frame: `self⁻¹ · other`.
    pub fn relative_to(&self, other: Quat) -> Self {
        (self.inverse() * other).normalize()
    }

    /// Angle in radians of the shortest rotation between the two orientations.
    pub fn angle_to(&self, other: Quat) -> f32 {
        let d = self.dot(other).abs().min(1.0);
        2.0 * d.acos()
    }

    /// True when both describe the same physical rotation (`q` and `-q` are equal here).
    pub fn approx_eq_rotation(&self, other: Quat, eps: f32) -> bool {
        self.dot(other).abs() >= 1.0 - eps
    }

    /// Spherical linear interpolation along the shorter arc.
    pub fn slerp(self, target: Quat, t: f32) -> Self {
        let mut end = target;
        let mut cos_theta = self.dot(target);
        if cos_theta < 0.0 {
            end = -target;
            cos_theta = -cos_theta;
        }

        if cos_theta > SLERP_LINEAR_THRESHOLD {
            return Self {
                x: self.x + (end.x - self.x) * t,
                y: self.y + (end.y - self.y) * t,
                z: self.z + (end.z - self.z) * t,
                w: self.w + (end.w - self.w) * t,
            }
            .normalize();
        }

        let theta = cos_theta.acos();
        let sin_theta = theta.sin();
        let a = ((1.0 - t) * theta).sin() / sin_theta;
        let b = (t * theta).sin() / sin_theta;
        Self {
            x: self.x * a + end.x * b,
            y: self.y * a + end.y * b,
            z: self.z * a + end.z * b,
            w: self.w * a + end.w * b,
        }
        .normalize()
    }
}

impl Mul for Quat {
    type Output = Quat;

    fn mul(self, rhs: Quat) -> Quat {
        let (a, b) = (self, rhs);
        Quat {
            x: a.w * b.x + a.x * b.w + a.y * b.z - a.z * b.y,
            y: a.w * b.y - a.x * b.z + a.y * b.w + a.z * b.x,
            z: a.w * b.z + a.x * b.y - a.y * b.x + a.z * b.w,
            w: a.w * b.w - a.x * b.x - a.y * b.y - a.z * b.z,
        }
    }
}

impl Neg for Quat {
    type Output = Quat;

    fn neg(self) -> Quat {
        Quat { x: -self.x, y: -self.y, z: -self.z, w: -self.w }
    }
}
