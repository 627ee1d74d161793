//! Rotation helpers shared by the map model, the pose filter and the debug overlay.
//!
//! Quaternions are handled in (w, x, y, z) order throughout.

use nalgebra::{Matrix3, Matrix3x4, Matrix4x3, UnitQuaternion, Vector3};

/// Skew-symmetric matrix such that `skew(a) * b == a × b`
pub fn skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

/// Rotation generated by a rotation vector (axis·angle), i.e. the SO(3) exponential map
pub fn exp_rotation(theta: &Vector3<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::from_scaled_axis(*theta)
}

/// Express a world point in the camera frame: `p_c = Rᵀ (p_w − r)`
///
/// `orientation` rotates camera-frame vectors into the world frame.
pub fn world_to_camera(
    point: &Vector3<f64>,
    position: &Vector3<f64>,
    orientation: &UnitQuaternion<f64>,
) -> Vector3<f64> {
    orientation.inverse_transform_vector(&(point - position))
}

/// ∂(Rᵀ d)/∂q for the raw quaternion q = (w, v), holding `d` fixed.
///
/// Uses the homogeneous form `Rᵀ d = (w² − v·v) d + 2 v (v·d) − 2 w (v × d)`,
/// which agrees with the rotation on the unit sphere.
pub fn inverse_rotation_quaternion_jacobian(
    orientation: &UnitQuaternion<f64>,
    d: &Vector3<f64>,
) -> Matrix3x4<f64> {
    let w = orientation.w;
    let v = orientation.imag();

    let d_dw = 2.0 * w * d - 2.0 * v.cross(d);
    let d_dv = -2.0 * d * v.transpose()
        + Matrix3::identity() * (2.0 * v.dot(d))
        + 2.0 * v * d.transpose()
        + 2.0 * w * skew_symmetric(d);

    let mut jac = Matrix3x4::zeros();
    jac.set_column(0, &d_dw);
    jac.fixed_view_mut::<3, 3>(0, 1).copy_from(&d_dv);
    jac
}

/// ∂q/∂δθ for the right perturbation `q ⊗ Exp(δθ)` at δθ = 0 (rows w, x, y, z)
pub fn quaternion_tangent_jacobian(orientation: &UnitQuaternion<f64>) -> Matrix4x3<f64> {
    let w = orientation.w;
    let v = orientation.imag();

    let mut jac = Matrix4x3::zeros();
    jac.fixed_view_mut::<1, 3>(0, 0).copy_from(&(-v.transpose()));
    jac.fixed_view_mut::<3, 3>(1, 0)
        .copy_from(&(Matrix3::identity() * w + skew_symmetric(&v)));
    jac * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Quaternion;

    fn sample_orientation() -> UnitQuaternion<f64> {
        UnitQuaternion::from_euler_angles(0.3, -0.2, 0.7)
    }

    #[test]
    fn test_skew_matches_cross_product() {
        let a = Vector3::new(1.0, -2.0, 0.5);
        let b = Vector3::new(0.3, 0.4, -1.5);
        assert!((skew_symmetric(&a) * b - a.cross(&b)).norm() < 1e-12);
    }

    #[test]
    fn test_world_to_camera_inverts_pose() {
        let q = sample_orientation();
        let r = Vector3::new(0.1, -0.4, 2.0);
        let p_c = Vector3::new(0.2, 0.3, 1.5);
        let p_w = q * p_c + r;
        assert!((world_to_camera(&p_w, &r, &q) - p_c).norm() < 1e-12);
    }

    #[test]
    fn test_inverse_rotation_jacobian_finite_difference() {
        let q = sample_orientation();
        let d = Vector3::new(0.4, -0.1, 1.2);
        let jac = inverse_rotation_quaternion_jacobian(&q, &d);

        // Homogeneous (unnormalised) evaluation so raw coordinates can be perturbed freely
        let eval = |c: [f64; 4]| {
            let w = c[0];
            let v = Vector3::new(c[1], c[2], c[3]);
            (w * w - v.dot(&v)) * d + 2.0 * v * v.dot(&d) - 2.0 * w * v.cross(&d)
        };
        let base = [q.w, q.i, q.j, q.k];
        let eps = 1e-7;
        for k in 0..4 {
            let mut plus = base;
            let mut minus = base;
            plus[k] += eps;
            minus[k] -= eps;
            let numeric = (eval(plus) - eval(minus)) / (2.0 * eps);
            assert!(
                (numeric - jac.column(k)).norm() < 1e-6,
                "column {} mismatch",
                k
            );
        }
    }

    #[test]
    fn test_tangent_jacobian_matches_perturbation() {
        let q = sample_orientation();
        let jac = quaternion_tangent_jacobian(&q);
        let eps = 1e-7;
        for k in 0..3 {
            let mut delta = Vector3::zeros();
            delta[k] = eps;
            let perturbed: Quaternion<f64> = (q * exp_rotation(&delta)).into_inner();
            let numeric = (perturbed.coords - q.into_inner().coords) / eps;
            // coords are (x, y, z, w); reorder to (w, x, y, z)
            let numeric_wxyz = [numeric[3], numeric[0], numeric[1], numeric[2]];
            for row in 0..4 {
                assert!((numeric_wxyz[row] - jac[(row, k)]).abs() < 1e-6);
            }
        }
    }
}
