/// 12-Dimensional Error-State Extended Kalman Filter for the camera pose
///
/// Nominal state:
///   position r (world frame), orientation q (camera → world, unit quaternion),
///   linear velocity v (world frame), angular velocity ω (body frame, axis·angle per second)
///
/// Error state (12D):
/// [0-2]:   δr   position error
/// [3-5]:   δθ   local rotation error, q_true = q ⊗ Exp(δθ)
/// [6-8]:   δv   velocity error
/// [9-11]:  δω   angular velocity error
///
/// Motion model is constant velocity / constant angular velocity. The only measurement is
/// the scalar signed distance between an event and its associated projected segment.
use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::config::EkfConfig;
use crate::error::{TrackResult, TrackerError};
use crate::geometry::{exp_rotation, quaternion_tangent_jacobian};
use crate::types::{
    ErrorStateMat, ErrorStateVec, KalmanGain, MeasurementJacobian, PoseCovariance, PoseJacobian,
    SeedPose, IDX_ANGULAR_VELOCITY, IDX_ORIENTATION, IDX_POSITION, IDX_VELOCITY,
};

/// Mean of the belief
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EstimatorState {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub velocity: Vector3<f64>,
    pub angular_velocity: Vector3<f64>,
}

impl EstimatorState {
    /// Seed state with zero velocities
    pub fn from_seed(seed: &SeedPose) -> Self {
        Self {
            position: seed.position,
            orientation: seed.orientation,
            velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
        }
    }
}

impl Default for EstimatorState {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
        }
    }
}

/// Serializable summary, mirrors the other filter state snapshots
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoseEkfSnapshot {
    pub position: (f64, f64, f64),
    /// Quaternion (w, x, y, z)
    pub quaternion: (f64, f64, f64, f64),
    pub velocity: (f64, f64, f64),
    pub angular_velocity: (f64, f64, f64),
    pub covariance_trace: f64,
    pub predict_count: u64,
    pub update_count: u64,
}

#[derive(Clone, Debug)]
pub struct PoseEkf {
    config: EkfConfig,

    /// Nominal state
    state: EstimatorState,

    /// Error-state covariance [12x12]
    covariance: ErrorStateMat,

    /// Measurement noise variance σ_d² [px²]
    r_distance: f64,

    predict_count: u64,
    update_count: u64,
}

impl PoseEkf {
    pub fn new(config: EkfConfig) -> Self {
        let covariance = Self::initial_covariance(&config);
        let r_distance = config.sigma_d * config.sigma_d;
        Self {
            config,
            state: EstimatorState::default(),
            covariance,
            r_distance,
            predict_count: 0,
            update_count: 0,
        }
    }

    fn initial_covariance(config: &EkfConfig) -> ErrorStateMat {
        let mut p = ErrorStateMat::zeros();
        let blocks = [
            (IDX_POSITION, config.initial_position_std),
            (IDX_ORIENTATION, config.initial_orientation_std),
            (IDX_VELOCITY, config.initial_velocity_std),
            (IDX_ANGULAR_VELOCITY, config.initial_angular_velocity_std),
        ];
        for (offset, std) in blocks {
            for i in 0..3 {
                p[(offset + i, offset + i)] = std * std;
            }
        }
        p
    }

    /// Discard any prior belief and restart from `seed`
    pub fn init(&mut self, seed: EstimatorState) {
        self.state = seed;
        self.state.orientation.renormalize();
        self.covariance = Self::initial_covariance(&self.config);
        self.predict_count = 0;
        self.update_count = 0;
    }

    /// Error-state transition for a constant-velocity model over `dt`
    fn build_transition_jacobian(&self, dt: f64) -> ErrorStateMat {
        let mut f = ErrorStateMat::identity();
        let step_rotation = exp_rotation(&(self.state.angular_velocity * dt));
        let identity_dt = Matrix3::identity() * dt;

        // δr' = δr + δv dt
        f.fixed_view_mut::<3, 3>(IDX_POSITION, IDX_VELOCITY)
            .copy_from(&identity_dt);
        // δθ' = Exp(ω dt)ᵀ δθ + δω dt
        f.fixed_view_mut::<3, 3>(IDX_ORIENTATION, IDX_ORIENTATION)
            .copy_from(&step_rotation.to_rotation_matrix().matrix().transpose());
        f.fixed_view_mut::<3, 3>(IDX_ORIENTATION, IDX_ANGULAR_VELOCITY)
            .copy_from(&identity_dt);
        f
    }

    /// Discrete white-noise-acceleration process noise, per axis
    fn build_process_noise(&self, dt: f64) -> ErrorStateMat {
        let mut q = ErrorStateMat::zeros();
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;

        let blocks = [
            (IDX_POSITION, IDX_VELOCITY, self.config.sigma_v),
            (IDX_ORIENTATION, IDX_ANGULAR_VELOCITY, self.config.sigma_w),
        ];
        for (pose_idx, rate_idx, sigma) in blocks {
            let var = sigma * sigma;
            for i in 0..3 {
                q[(pose_idx + i, pose_idx + i)] = var * dt3 / 3.0;
                q[(pose_idx + i, rate_idx + i)] = var * dt2 / 2.0;
                q[(rate_idx + i, pose_idx + i)] = var * dt2 / 2.0;
                q[(rate_idx + i, rate_idx + i)] = var * dt;
            }
        }
        q
    }

    /// Propagate the belief by `dt` seconds
    pub fn predict(&mut self, dt: f64) -> TrackResult<()> {
        if !(dt > 0.0) || !dt.is_finite() {
            return Err(TrackerError::NonPositiveDt(dt));
        }
        if dt > self.config.huge_dt_warning {
            log::warn!("Huge dt {:.6}s between events, covariance growth may destabilise", dt);
        } else if dt > self.config.big_dt_debug {
            log::debug!("Big dt {:.6}s", dt);
        }

        // Jacobian uses the pre-step angular velocity
        let f = self.build_transition_jacobian(dt);
        let q = self.build_process_noise(dt);

        // Kinematics
        self.state.position += self.state.velocity * dt;
        self.state.orientation *= exp_rotation(&(self.state.angular_velocity * dt));
        self.state.orientation.renormalize();

        // Covariance prediction: P = F * P * F^T + Q
        self.covariance = f * self.covariance * f.transpose() + q;
        self.symmetrize();

        self.predict_count += 1;
        Ok(())
    }

    /// Map a raw 1×7 pose Jacobian (r, q as w, x, y, z) onto the 12D error state
    pub fn measurement_jacobian(&self, pose_jacobian: &PoseJacobian) -> MeasurementJacobian {
        let mut h = MeasurementJacobian::zeros();
        h.fixed_view_mut::<1, 3>(0, IDX_POSITION)
            .copy_from(&pose_jacobian.fixed_view::<1, 3>(0, 0));

        let dq_dtheta = quaternion_tangent_jacobian(&self.state.orientation);
        let h_theta = pose_jacobian.fixed_view::<1, 4>(0, 3) * dq_dtheta;
        h.fixed_view_mut::<1, 3>(0, IDX_ORIENTATION)
            .copy_from(&h_theta);
        h
    }

    /// Scalar EKF correction.
    ///
    /// `residual` is the innovation (the negated measured distance, since inliers lie on their
    /// line) and `pose_jacobian` is ∂distance/∂[r, q].
    pub fn update(&mut self, residual: f64, pose_jacobian: &PoseJacobian) -> TrackResult<()> {
        let h = self.measurement_jacobian(pose_jacobian);
        let ph_t: KalmanGain = self.covariance * h.transpose();
        let s = (h * ph_t)[(0, 0)] + self.r_distance;
        if !s.is_finite() || s <= 0.0 {
            return Err(TrackerError::DegenerateInnovation(s));
        }

        // Kalman gain: K = P * H^T * S^-1
        let k: KalmanGain = ph_t / s;
        let dx: ErrorStateVec = k * residual;
        self.inject(&dx);

        // Joseph form: P = (I - KH) P (I - KH)^T + K R K^T
        let i_kh = ErrorStateMat::identity() - k * h;
        self.covariance = i_kh * self.covariance * i_kh.transpose()
            + k * k.transpose() * self.r_distance;
        self.symmetrize();

        self.update_count += 1;
        Ok(())
    }

    /// Fold an error-state correction into the nominal state
    fn inject(&mut self, dx: &ErrorStateVec) {
        self.state.position += dx.fixed_rows::<3>(IDX_POSITION);
        let dtheta: Vector3<f64> = dx.fixed_rows::<3>(IDX_ORIENTATION).into_owned();
        self.state.orientation *= exp_rotation(&dtheta);
        self.state.orientation.renormalize();
        self.state.velocity += dx.fixed_rows::<3>(IDX_VELOCITY);
        self.state.angular_velocity += dx.fixed_rows::<3>(IDX_ANGULAR_VELOCITY);
    }

    fn symmetrize(&mut self) {
        self.covariance = (self.covariance + self.covariance.transpose()) * 0.5;
    }

    pub fn state(&self) -> &EstimatorState {
        &self.state
    }

    pub fn covariance(&self) -> &ErrorStateMat {
        &self.covariance
    }

    /// Position / orientation block of the covariance
    pub fn pose_covariance(&self) -> PoseCovariance {
        self.covariance.fixed_view::<6, 6>(0, 0).into_owned()
    }

    pub fn covariance_trace(&self) -> f64 {
        self.covariance.trace()
    }

    pub fn config(&self) -> &EkfConfig {
        &self.config
    }

    pub fn snapshot(&self) -> PoseEkfSnapshot {
        let s = &self.state;
        PoseEkfSnapshot {
            position: (s.position.x, s.position.y, s.position.z),
            quaternion: (s.orientation.w, s.orientation.i, s.orientation.j, s.orientation.k),
            velocity: (s.velocity.x, s.velocity.y, s.velocity.z),
            angular_velocity: (
                s.angular_velocity.x,
                s.angular_velocity.y,
                s.angular_velocity.z,
            ),
            covariance_trace: self.covariance_trace(),
            predict_count: self.predict_count,
            update_count: self.update_count,
        }
    }
}
