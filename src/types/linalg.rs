//! Linear algebra type system for the event tracker
//!
//! Provides compile-time dimension checking and clean type aliases
//! for the pose filter and the map model.

use nalgebra::{Matrix2x3, Matrix2x4, SMatrix, SVector};

// ===== State Dimensions =====
/// Error state: [δr(3), δθ(3), δv(3), δω(3)]
pub const ERROR_STATE_DIM: usize = 12;
/// Raw pose parameters: position (3) + quaternion (w, x, y, z)
pub const POSE_PARAM_DIM: usize = 7;

// ===== Error-state block offsets =====
pub const IDX_POSITION: usize = 0;
pub const IDX_ORIENTATION: usize = 3;
pub const IDX_VELOCITY: usize = 6;
pub const IDX_ANGULAR_VELOCITY: usize = 9;

// ===== 12-State Filter Types =====
pub type ErrorStateVec = SVector<f64, ERROR_STATE_DIM>;
pub type ErrorStateMat = SMatrix<f64, ERROR_STATE_DIM, ERROR_STATE_DIM>;

// Kalman gain for a scalar measurement
pub type KalmanGain = SVector<f64, ERROR_STATE_DIM>; // 12×1

// ===== Jacobian Types =====
/// ∂d/∂[r, q] for the scalar point-to-segment distance (1×7)
pub type PoseJacobian = SMatrix<f64, 1, POSE_PARAM_DIM>;
/// ∂d/∂δx for the scalar measurement in error-state coordinates (1×12)
pub type MeasurementJacobian = SMatrix<f64, 1, ERROR_STATE_DIM>;

/// Pixel Jacobians of one projected point w.r.t. position and raw quaternion
pub type PixelPositionJacobian = Matrix2x3<f64>;
pub type PixelQuaternionJacobian = Matrix2x4<f64>;

/// Pose block (δr, δθ) of the covariance, used by the debug overlay
pub type PoseCovariance = SMatrix<f64, 6, 6>;
