// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Small vector and quaternion types used by object properties.
//!
//! Angles on the public API are in degrees, matching the scripting layers
//! that sit on top of the engine.

use core::ops::{Add, Mul, Sub};

/// Tolerance used for "close enough" comparisons of fractions and angles.
pub const EPSILON: f32 = 0.000_001;

/// A 3-component vector.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3 {
    /// X component.
    pub x: f32,
    /// Y component.
    pub y: f32,
    /// Z component.
    pub z: f32,
}

impl Vec3 {
    /// The zero vector.
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    /// All components one.
    pub const ONE: Self = Self::new(1.0, 1.0, 1.0);

    /// Creates a vector from components.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Linear interpolation with an already eased fraction.
    #[inline]
    #[must_use]
    pub fn lerp(self, to: Self, t: f32) -> Self {
        Self {
            x: self.x + (to.x - self.x) * t,
            y: self.y + (to.y - self.y) * t,
            z: self.z + (to.z - self.z) * t,
        }
    }
}

impl Add for Vec3 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// A rotation quaternion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quat {
    /// X component.
    pub x: f32,
    /// Y component.
    pub y: f32,
    /// Z component.
    pub z: f32,
    /// W (scalar) component.
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    /// The identity rotation.
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    /// Rotation of `degrees` around the axis `(x, y, z)`.
    #[must_use]
    pub fn from_axis_angle(degrees: f32, x: f32, y: f32, z: f32) -> Self {
        let half = degrees.to_radians() * 0.5;
        let (s, c) = half.sin_cos();
        Self {
            x: x * s,
            y: y * s,
            z: z * s,
            w: c,
        }
    }

    /// Builds a quaternion from Tait-Bryan angles in degrees.
    ///
    /// Each angle is wrapped into `[-180, 180)` first.
    #[must_use]
    pub fn from_euler(roll: f32, pitch: f32, yaw: f32) -> Self {
        let wrap = |a: f32| (a + 180.0).rem_euclid(360.0) - 180.0;
        let pitch_q = Self::from_axis_angle(wrap(pitch), 1.0, 0.0, 0.0);
        let yaw_q = Self::from_axis_angle(wrap(yaw), 0.0, 1.0, 0.0);
        let roll_q = Self::from_axis_angle(wrap(roll), 0.0, 0.0, 1.0);
        pitch_q * yaw_q * roll_q
    }

    /// Converts back to `(roll, pitch, yaw)` in degrees.
    #[must_use]
    pub fn to_euler(self) -> Vec3 {
        let Self { x, y, z, w } = self;
        let (sqw, sqx, sqy, sqz) = (w * w, x * x, y * y, z * z);
        let roll = (2.0 * (x * y + z * w)).atan2(sqx - sqy - sqz + sqw);
        let pitch = (-2.0 * (x * z - y * w)).clamp(-1.0, 1.0).asin();
        let yaw = (2.0 * (y * z + x * w)).atan2(-sqx - sqy + sqz + sqw);
        Vec3::new(roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees())
    }

    /// Dot product.
    #[inline]
    #[must_use]
    pub fn dot(self, o: Self) -> f32 {
        self.x * o.x + self.y * o.y + self.z * o.z + self.w * o.w
    }

    /// Returns the unit-length quaternion, leaving near-unit input untouched.
    #[must_use]
    pub fn normalize(self) -> Self {
        let sq = self.dot(self);
        if sq > 0.99999 && sq < 1.000_001 {
            return self;
        }
        let len = sq.sqrt();
        if len <= 0.0 {
            return Self::IDENTITY;
        }
        Self {
            x: self.x / len,
            y: self.y / len,
            z: self.z / len,
            w: self.w / len,
        }
    }

    /// Normalized linear interpolation.
    ///
    /// With `shortest` set, the end rotation is flipped into the same
    /// hemisphere as `self` so the rotation takes the short arc.
    #[must_use]
    pub fn nlerp(self, to: Self, t: f32, shortest: bool) -> Self {
        let to = if shortest && self.dot(to) < 0.0 {
            Self {
                x: -to.x,
                y: -to.y,
                z: -to.z,
                w: -to.w,
            }
        } else {
            to
        };
        let inv = 1.0 - t;
        Self {
            x: self.x * inv + to.x * t,
            y: self.y * inv + to.y * t,
            z: self.z * inv + to.z * t,
            w: self.w * inv + to.w * t,
        }
        .normalize()
    }
}

impl Mul for Quat {
    type Output = Self;

    fn mul(self, b: Self) -> Self {
        let a = self;
        Self {
            w: a.w * b.w - a.x * b.x - a.y * b.y - a.z * b.z,
            x: a.w * b.x + a.x * b.w + a.y * b.z - a.z * b.y,
            y: a.w * b.y + a.y * b.w + a.z * b.x - a.x * b.z,
            z: a.w * b.z + a.z * b.w + a.x * b.y - a.y * b.x,
        }
    }
}

/// Orientation as both Tait-Bryan angles (degrees) and a quaternion.
///
/// The angles are what callers set and what the inherited-orientation mask
/// adds up; the quaternion is what gets interpolated and drawn.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rotation {
    /// Rotation around Z, in degrees.
    pub roll: f32,
    /// Rotation around X, in degrees.
    pub pitch: f32,
    /// Rotation around Y, in degrees.
    pub yaw: f32,
    /// Combined rotation.
    pub quat: Quat,
}

impl Rotation {
    /// No rotation.
    pub const IDENTITY: Self = Self {
        roll: 0.0,
        pitch: 0.0,
        yaw: 0.0,
        quat: Quat::IDENTITY,
    };

    /// Builds a rotation from angles in degrees.
    #[must_use]
    pub fn from_euler(roll: f32, pitch: f32, yaw: f32) -> Self {
        Self {
            roll,
            pitch,
            yaw,
            quat: Quat::from_euler(roll, pitch, yaw),
        }
    }

    /// Whether any angle is meaningfully non-zero.
    #[inline]
    #[must_use]
    pub fn is_rotated(&self) -> bool {
        self.roll.abs() > EPSILON || self.pitch.abs() > EPSILON || self.yaw.abs() > EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn euler_round_trip_on_roll() {
        let q = Quat::from_euler(45.0, 0.0, 0.0);
        let e = q.to_euler();
        assert!(close(e.x, 45.0), "roll survives: {e:?}");
        assert!(close(e.y, 0.0) && close(e.z, 0.0), "no bleed: {e:?}");
    }

    #[test]
    fn nlerp_endpoints() {
        let a = Quat::IDENTITY;
        let b = Quat::from_euler(90.0, 0.0, 0.0);
        assert_eq!(a.nlerp(b, 0.0, true), a);
        let end = a.nlerp(b, 1.0, true);
        assert!(close(end.dot(b).abs(), 1.0), "t=1 reaches target");
    }

    #[test]
    fn shortest_nlerp_flips_hemisphere() {
        let a = Quat::IDENTITY;
        let b = Quat {
            x: 0.0,
            y: 0.0,
            z: -0.1,
            w: -0.995,
        }
        .normalize();
        let mid = a.nlerp(b, 0.5, true);
        assert!(mid.w > 0.9, "short arc stays near identity: {mid:?}");
    }

    #[test]
    fn identity_is_not_rotated() {
        assert!(!Rotation::IDENTITY.is_rotated());
        assert!(Rotation::from_euler(0.0, 0.0, 10.0).is_rotated());
    }
}
