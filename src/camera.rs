//! Pinhole camera intrinsics with closed-form radial undistortion.
//!
//! The forward radial model is `r_d = r (1 + k1 r² + k2 r⁴ + k3 r⁶)`. Its inverse is
//! approximated by the first three terms of the exact inverse series
//! `s (1 + b1 s² + b2 s⁴ + b3 s⁶)` with
//! `b1 = −k1`, `b2 = 3k1² − k2`, `b3 = 8k1k2 − 12k1³ − k3`,
//! which is O(1) per event and avoids an iterative root solve.

use nalgebra::{Matrix2x3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::types::Point2D;

/// Tangential coefficients below this magnitude are treated as zero
const TANGENTIAL_EPSILON: f64 = 1e-9;

/// Points closer than this to the image plane are not projected
const MIN_DEPTH: f64 = 1e-9;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Principal point [px]
    pub u0: f64,
    pub v0: f64,

    /// Focal lengths [px]
    pub fx: f64,
    pub fy: f64,

    /// Radial distortion coefficients
    #[serde(default)]
    pub k1: f64,
    #[serde(default)]
    pub k2: f64,
    #[serde(default)]
    pub k3: f64,

    /// Tangential coefficients; the model assumes these are zero
    #[serde(default)]
    pub p1: f64,
    #[serde(default)]
    pub p2: f64,
}

impl CameraIntrinsics {
    pub fn new(u0: f64, v0: f64, fx: f64, fy: f64) -> Self {
        Self {
            u0,
            v0,
            fx,
            fy,
            k1: 0.0,
            k2: 0.0,
            k3: 0.0,
            p1: 0.0,
            p2: 0.0,
        }
    }

    pub fn with_radial(mut self, k1: f64, k2: f64, k3: f64) -> Self {
        self.k1 = k1;
        self.k2 = k2;
        self.k3 = k3;
        self
    }

    /// Build from a row-major 3×3 camera matrix and plumb-bob coefficients `[k1, k2, p1, p2, k3]`
    pub fn from_camera_info(k: [f64; 9], d: &[f64]) -> Self {
        let coeff = |i: usize| d.get(i).copied().unwrap_or(0.0);
        Self {
            u0: k[2],
            v0: k[5],
            fx: k[0],
            fy: k[4],
            k1: coeff(0),
            k2: coeff(1),
            p1: coeff(2),
            p2: coeff(3),
            k3: coeff(4),
        }
    }

    pub fn has_tangential_distortion(&self) -> bool {
        self.p1.abs() > TANGENTIAL_EPSILON || self.p2.abs() > TANGENTIAL_EPSILON
    }

    /// Coefficients of the 3-term inverse radial series
    pub fn inverse_coefficients(&self) -> Vector3<f64> {
        let (k1, k2, k3) = (self.k1, self.k2, self.k3);
        Vector3::new(
            -k1,
            3.0 * k1 * k1 - k2,
            8.0 * k1 * k2 - 12.0 * k1 * k1 * k1 - k3,
        )
    }

    pub fn normalize(&self, pixel: &Point2D) -> Vector2<f64> {
        Vector2::new((pixel.x - self.u0) / self.fx, (pixel.y - self.v0) / self.fy)
    }

    pub fn denormalize(&self, normalized: &Vector2<f64>) -> Point2D {
        Point2D::new(
            normalized.x * self.fx + self.u0,
            normalized.y * self.fy + self.v0,
        )
    }

    /// Forward radial model on a normalized coordinate
    pub fn distort_normalized(&self, normalized: &Vector2<f64>) -> Vector2<f64> {
        let r2 = normalized.norm_squared();
        let factor = 1.0 + self.k1 * r2 + self.k2 * r2 * r2 + self.k3 * r2 * r2 * r2;
        normalized * factor
    }

    /// Pinhole projection of a camera-frame point; `None` at or behind the image plane
    pub fn project(&self, point_camera: &Vector3<f64>) -> Option<Point2D> {
        if point_camera.z <= MIN_DEPTH {
            return None;
        }
        Some(Point2D::new(
            self.fx * point_camera.x / point_camera.z + self.u0,
            self.fy * point_camera.y / point_camera.z + self.v0,
        ))
    }

    /// ∂(u, v)/∂(x, y, z) of the pinhole projection
    pub fn projection_jacobian(&self, point_camera: &Vector3<f64>) -> Matrix2x3<f64> {
        let (x, y, z) = (point_camera.x, point_camera.y, point_camera.z);
        let z2 = z * z;
        Matrix2x3::new(
            self.fx / z, 0.0, -self.fx * x / z2, //
            0.0, self.fy / z, -self.fy * y / z2,
        )
    }
}

/// Per-event radial undistortion bound to one set of intrinsics
#[derive(Clone, Debug)]
pub struct Undistorter {
    intrinsics: CameraIntrinsics,
    coeffs: Vector3<f64>,
}

impl Undistorter {
    pub fn new(intrinsics: CameraIntrinsics) -> Self {
        if intrinsics.has_tangential_distortion() {
            log::warn!(
                "Non-zero tangential distortion (p1={}, p2={}); undistorting with the radial-only model",
                intrinsics.p1,
                intrinsics.p2
            );
        }
        let coeffs = intrinsics.inverse_coefficients();
        Self { intrinsics, coeffs }
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    pub fn undistort(&self, pixel: &Point2D) -> Point2D {
        let normalized = self.intrinsics.normalize(pixel);
        let s2 = normalized.norm_squared();
        let s4 = s2 * s2;
        let s6 = s4 * s2;
        let factor = 1.0 + self.coeffs.dot(&Vector3::new(s2, s4, s6));
        self.intrinsics.denormalize(&(normalized * factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn davis_intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::new(120.0, 90.0, 200.0, 200.0)
    }

    #[test]
    fn test_from_camera_info() {
        let k = [199.0, 0.0, 121.5, 0.0, 198.0, 88.0, 0.0, 0.0, 1.0];
        let d = [-0.35, 0.15, 0.0, 0.0, -0.02];
        let cam = CameraIntrinsics::from_camera_info(k, &d);

        assert_eq!(cam.u0, 121.5);
        assert_eq!(cam.v0, 88.0);
        assert_eq!(cam.fx, 199.0);
        assert_eq!(cam.fy, 198.0);
        assert_eq!(cam.k1, -0.35);
        assert_eq!(cam.k2, 0.15);
        assert_eq!(cam.k3, -0.02);
        assert!(!cam.has_tangential_distortion());
    }

    #[test]
    fn test_short_coefficient_vector_defaults_to_zero() {
        let k = [200.0, 0.0, 120.0, 0.0, 200.0, 90.0, 0.0, 0.0, 1.0];
        let cam = CameraIntrinsics::from_camera_info(k, &[0.1]);
        assert_eq!(cam.k1, 0.1);
        assert_eq!(cam.k2, 0.0);
        assert_eq!(cam.k3, 0.0);
    }

    #[test]
    fn test_tangential_is_detected() {
        let k = [200.0, 0.0, 120.0, 0.0, 200.0, 90.0, 0.0, 0.0, 1.0];
        let cam = CameraIntrinsics::from_camera_info(k, &[0.0, 0.0, 0.001, 0.0, 0.0]);
        assert!(cam.has_tangential_distortion());
        // Still usable
        let out = Undistorter::new(cam).undistort(&Point2D::new(130.0, 95.0));
        assert!(out.x.is_finite() && out.y.is_finite());
    }

    #[test]
    fn test_inverse_coefficients() {
        let cam = davis_intrinsics().with_radial(0.1, 0.02, 0.003);
        let b = cam.inverse_coefficients();
        assert!((b[0] + 0.1).abs() < 1e-15);
        assert!((b[1] - (3.0 * 0.01 - 0.02)).abs() < 1e-15);
        assert!((b[2] - (8.0 * 0.1 * 0.02 - 12.0 * 0.001 - 0.003)).abs() < 1e-15);
    }

    #[test]
    fn test_zero_distortion_is_identity() {
        let undistorter = Undistorter::new(davis_intrinsics());
        let p = Point2D::new(17.0, 160.0);
        let out = undistorter.undistort(&p);
        assert!((out - p).norm() < 1e-12);
    }

    #[test]
    fn test_principal_point_is_fixed() {
        let cam = davis_intrinsics().with_radial(-0.3, 0.1, -0.01);
        let out = Undistorter::new(cam.clone()).undistort(&Point2D::new(cam.u0, cam.v0));
        assert!((out.x - cam.u0).abs() < 1e-12);
        assert!((out.y - cam.v0).abs() < 1e-12);
    }

    #[test]
    fn test_round_trip_within_series_tolerance() {
        let coefficient_sets = [
            (0.05, 0.01, 0.001),
            (-0.05, 0.01, -0.001),
            (0.02, -0.005, 0.0),
            (-0.08, 0.0, 0.002),
        ];
        for &(k1, k2, k3) in &coefficient_sets {
            let cam = davis_intrinsics().with_radial(k1, k2, k3);
            let undistorter = Undistorter::new(cam.clone());
            for i in -4..=4 {
                for j in -4..=4 {
                    let normalized = Vector2::new(i as f64 * 0.1, j as f64 * 0.1);
                    let distorted = cam.denormalize(&cam.distort_normalized(&normalized));
                    let recovered = cam.normalize(&undistorter.undistort(&distorted));
                    let err = (recovered - normalized).norm();
                    assert!(
                        err < 1e-4,
                        "k=({}, {}, {}) point=({}, {}) err={}",
                        k1,
                        k2,
                        k3,
                        normalized.x,
                        normalized.y,
                        err
                    );
                }
            }
        }
    }

    #[test]
    fn test_projection_behind_camera() {
        let cam = davis_intrinsics();
        assert!(cam.project(&Vector3::new(0.1, 0.1, -1.0)).is_none());
        assert!(cam.project(&Vector3::new(0.1, 0.1, 0.0)).is_none());
        let p = cam.project(&Vector3::new(0.1, -0.2, 1.0)).unwrap();
        assert!((p.x - 140.0).abs() < 1e-12);
        assert!((p.y - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_projection_jacobian_finite_difference() {
        let cam = davis_intrinsics();
        let p = Vector3::new(0.3, -0.1, 1.7);
        let jac = cam.projection_jacobian(&p);
        let eps = 1e-7;
        for k in 0..3 {
            let mut plus = p;
            let mut minus = p;
            plus[k] += eps;
            minus[k] -= eps;
            let numeric = (cam.project(&plus).unwrap() - cam.project(&minus).unwrap()) / (2.0 * eps);
            assert!((numeric - jac.column(k)).norm() < 1e-5);
        }
    }
}
