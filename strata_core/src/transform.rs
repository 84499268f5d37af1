// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Column-major 4×4 matrices for model and projection transforms.
//!
//! Only the operations the draw pass needs are provided: composition,
//! translation, scaling, quaternion rotation and orthographic projection.

use core::ops::Mul;

use crate::math::Quat;

/// A column-major 4×4 transform stored as `[[f64; 4]; 4]`.
///
/// Each inner array is one *column*, matching what graphics APIs expect for
/// uniform upload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform3d {
    /// Four columns, each `[x, y, z, w]`.
    pub cols: [[f64; 4]; 4],
}

impl Transform3d {
    /// The identity matrix.
    pub const IDENTITY: Self = Self {
        cols: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    /// Returns column `i` (0-based).
    ///
    /// # Panics
    ///
    /// Panics if `i >= 4`.
    #[inline]
    #[must_use]
    pub const fn col(self, i: usize) -> [f64; 4] {
        self.cols[i]
    }

    /// A pure translation.
    #[inline]
    #[must_use]
    pub const fn from_translation(x: f64, y: f64, z: f64) -> Self {
        Self {
            cols: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [x, y, z, 1.0],
            ],
        }
    }

    /// A non-uniform scale.
    #[inline]
    #[must_use]
    pub const fn from_scale(sx: f64, sy: f64, sz: f64) -> Self {
        Self {
            cols: [
                [sx, 0.0, 0.0, 0.0],
                [0.0, sy, 0.0, 0.0],
                [0.0, 0.0, sz, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Rotation matrix for a (normalized) quaternion.
    #[must_use]
    pub fn from_quat(q: Quat) -> Self {
        let (x, y, z, w) = (
            f64::from(q.x),
            f64::from(q.y),
            f64::from(q.z),
            f64::from(q.w),
        );
        Self {
            cols: [
                [
                    1.0 - 2.0 * (y * y + z * z),
                    2.0 * (x * y + z * w),
                    2.0 * (x * z - y * w),
                    0.0,
                ],
                [
                    2.0 * (x * y - z * w),
                    1.0 - 2.0 * (x * x + z * z),
                    2.0 * (z * y + x * w),
                    0.0,
                ],
                [
                    2.0 * (x * z + y * w),
                    2.0 * (y * z - x * w),
                    1.0 - 2.0 * (x * x + y * y),
                    0.0,
                ],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Orthographic projection mapping the box `[left, right] × [bottom,
    /// top] × [near, far]` to clip space.
    #[must_use]
    pub fn ortho(left: f64, right: f64, bottom: f64, top: f64, near: f64, far: f64) -> Self {
        let w = right - left;
        let h = top - bottom;
        let d = far - near;
        Self {
            cols: [
                [2.0 / w, 0.0, 0.0, 0.0],
                [0.0, 2.0 / h, 0.0, 0.0],
                [0.0, 0.0, -2.0 / d, 0.0],
                [
                    -(right + left) / w,
                    -(top + bottom) / h,
                    -(far + near) / d,
                    1.0,
                ],
            ],
        }
    }

    /// Returns `self * translation(x, y, z)`.
    #[inline]
    #[must_use]
    pub fn translate(self, x: f64, y: f64, z: f64) -> Self {
        self * Self::from_translation(x, y, z)
    }

    /// Transforms a point (w = 1) and returns `[x, y, z]`.
    #[must_use]
    pub fn transform_point(&self, p: [f64; 3]) -> [f64; 3] {
        let c = &self.cols;
        let mut out = [0.0; 3];
        for (i, v) in out.iter_mut().enumerate() {
            *v = c[0][i] * p[0] + c[1][i] * p[1] + c[2][i] * p[2] + c[3][i];
        }
        out
    }

    /// Is every element finite?
    #[inline]
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.cols.iter().flatten().all(|v| v.is_finite())
    }
}

impl Default for Transform3d {
    #[inline]
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Transform3d {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        let a = &self.cols;
        let b = &rhs.cols;
        let mut out = [[0.0_f64; 4]; 4];
        for (j, col) in out.iter_mut().enumerate() {
            for (i, v) in col.iter_mut().enumerate() {
                *v = a[0][i] * b[j][0] + a[1][i] * b[j][1] + a[2][i] * b[j][2] + a[3][i] * b[j][3];
            }
        }
        Self { cols: out }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_multiply() {
        let t = Transform3d::from_translation(1.0, 2.0, 3.0);
        assert_eq!(Transform3d::IDENTITY * t, t);
        assert_eq!(t * Transform3d::IDENTITY, t);
    }

    #[test]
    fn translate_composes() {
        let t = Transform3d::from_translation(1.0, 0.0, 0.0).translate(0.0, 2.0, 0.0);
        assert_eq!(t.col(3), [1.0, 2.0, 0.0, 1.0]);
    }

    #[test]
    fn ortho_maps_corners_to_clip_space() {
        let p = Transform3d::ortho(0.0, 640.0, 480.0, 0.0, 0.0, 1.0);
        let tl = p.transform_point([0.0, 0.0, 0.0]);
        let br = p.transform_point([640.0, 480.0, 0.0]);
        assert!((tl[0] + 1.0).abs() < 1e-9 && (tl[1] - 1.0).abs() < 1e-9, "{tl:?}");
        assert!((br[0] - 1.0).abs() < 1e-9 && (br[1] + 1.0).abs() < 1e-9, "{br:?}");
    }

    #[test]
    fn quat_rotation_about_z() {
        let q = Quat::from_axis_angle(90.0, 0.0, 0.0, 1.0);
        let r = Transform3d::from_quat(q);
        let p = r.transform_point([1.0, 0.0, 0.0]);
        assert!(p[0].abs() < 1e-6 && (p[1] - 1.0).abs() < 1e-6, "{p:?}");
    }

    #[test]
    fn scale_then_translate() {
        let combined = Transform3d::from_translation(3.0, 4.0, 0.0) * Transform3d::from_scale(2.0, 2.0, 2.0);
        assert_eq!(combined.col(0), [2.0, 0.0, 0.0, 0.0]);
        assert_eq!(combined.col(3), [3.0, 4.0, 0.0, 1.0]);
        assert!(combined.is_finite());
    }
}
