//! Planar Perspective-n-Point via homography decomposition.
//!
//! Image points are undistorted and normalised, a plane-to-image homography is fitted by DLT
//! with Hartley normalisation, and `[r1 r2 t]` is read off its columns. The rotation is
//! projected back onto SO(3) before the camera-relative pose is inverted into a world-frame
//! camera pose.

use nalgebra::{DMatrix, Matrix3, Rotation3, SymmetricEigen, UnitQuaternion, Vector3};

use crate::camera::{CameraIntrinsics, Undistorter};
use crate::error::{TrackResult, TrackerError};
use crate::map_match::square_corners;
use crate::types::{Point2D, Point3D, SeedPose};

use super::square::{polygon_area, sort_by_centroid_angle};

/// Object points must lie on z = 0 within this tolerance
const PLANE_TOLERANCE: f64 = 1e-9;

// ── Hartley normalization ────────────────────────────────────────────────

/// Translate the centroid to the origin and scale to a mean distance of √2
fn normalize_points(points: &[Point2D]) -> (Matrix3<f64>, Vec<Point2D>) {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;

    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = points
        .iter()
        .map(|p| Point2D::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    (t, normalized)
}

// ── DLT ──────────────────────────────────────────────────────────────────

/// Homography H with `dst ≈ H · src` from at least four correspondences
pub fn estimate_homography_dlt(src: &[Point2D], dst: &[Point2D]) -> TrackResult<Matrix3<f64>> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return Err(TrackerError::PoseSolve(format!(
            "homography needs >= 4 matched points, got {} and {}",
            n,
            dst.len()
        )));
    }

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = (src_n[i].x, src_n[i].y);
        let (dx, dy) = (dst_n[i].x, dst_n[i].y);

        // Row 2i:   [  0  0  0 | -sx -sy -1 | dy*sx  dy*sy  dy ]
        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        // Row 2i+1: [ sx  sy  1 |  0  0  0 | -dx*sx -dx*sy -dx ]
        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // Null vector of A: eigenvector of the smallest eigenvalue of AᵀA
    let eig = SymmetricEigen::new(a.transpose() * &a);
    let min_idx = eig.eigenvalues.imin();
    let h = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| TrackerError::PoseSolve("normalisation not invertible".into()))?;
    let h = t_dst_inv * h_norm * t_src;

    let scale = h[(2, 2)];
    Ok(if scale.abs() < 1e-15 { h } else { h / scale })
}

// ── Pose ─────────────────────────────────────────────────────────────────

/// Camera pose in the world frame from correspondences between z = 0 object points and pixels
pub fn solve_planar_pose(
    object: &[Point3D],
    pixels: &[Point2D],
    intrinsics: &CameraIntrinsics,
) -> TrackResult<SeedPose> {
    if object.iter().any(|p| p.z.abs() > PLANE_TOLERANCE) {
        return Err(TrackerError::PoseSolve("object points must lie on z = 0".into()));
    }
    if polygon_area(pixels) < 1e-6 {
        return Err(TrackerError::PoseSolve("image points are degenerate".into()));
    }

    let undistorter = Undistorter::new(intrinsics.clone());
    let normalized: Vec<Point2D> = pixels
        .iter()
        .map(|p| Point2D::from(intrinsics.normalize(&undistorter.undistort(p))))
        .collect();
    let plane: Vec<Point2D> = object.iter().map(|p| Point2D::new(p.x, p.y)).collect();

    // In normalised coordinates H ∝ [r1 r2 t]
    let h = estimate_homography_dlt(&plane, &normalized)?;
    let (h1, h2, h3) = (
        h.column(0).into_owned(),
        h.column(1).into_owned(),
        h.column(2).into_owned(),
    );
    let norm_sum = h1.norm() + h2.norm();
    if !(norm_sum > 1e-12) {
        return Err(TrackerError::PoseSolve("degenerate homography".into()));
    }
    let mut lambda = 2.0 / norm_sum;
    // Target in front of the camera
    if h3.z * lambda < 0.0 {
        lambda = -lambda;
    }
    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let t: Vector3<f64> = h3 * lambda;
    let r3 = r1.cross(&r2);

    let r_approx = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = r_approx.svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| TrackerError::PoseSolve("svd failed".into()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| TrackerError::PoseSolve("svd failed".into()))?;
    let mut rotation = u * v_t;
    if rotation.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        rotation = u_flipped * v_t;
    }

    // p_c = R p_w + t  →  camera in world: orientation Rᵀ, position −Rᵀ t
    let camera_to_world = rotation.transpose();
    let position = -(camera_to_world * t);
    let orientation =
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(camera_to_world));

    if !position.iter().all(|v| v.is_finite()) {
        return Err(TrackerError::PoseSolve("non-finite pose".into()));
    }
    Ok(SeedPose::new(position, orientation))
}

/// Camera pose from the four image corners of the square target
pub fn solve_square_pose(
    corners: &[Point2D; 4],
    side_length: f64,
    intrinsics: &CameraIntrinsics,
) -> TrackResult<SeedPose> {
    let mut sorted = *corners;
    sort_by_centroid_angle(&mut sorted);
    solve_planar_pose(&square_corners(side_length), &sorted, intrinsics)
}
