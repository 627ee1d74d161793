//! Event-camera pose tracking against a fixed line-segment target.
//!
//! Events are undistorted, associated with the projected target edges and fused one at a time
//! into an error-state EKF over pose and velocity. See [`tracker::Tracker`] for the processing
//! loop and [`node::run_tracker`] for the async wrapper.

pub mod camera;
pub mod config;
pub mod debug_raster;
pub mod error;
pub mod filters;
pub mod geometry;
pub mod map_match;
pub mod node;
pub mod recording;
pub mod track_init;
pub mod tracker;
pub mod types;

pub use config::TrackerConfig;
pub use error::{TrackResult, TrackerError};
pub use tracker::{Tracker, TrackerOutput, TrackerSnapshot};
