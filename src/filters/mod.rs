pub mod pose_ekf;

pub use pose_ekf::{EstimatorState, PoseEkf, PoseEkfSnapshot};
