//! Initial-pose acquisition from a conventional grayscale frame.
//!
//! Finds the dark square target, orders its corners and solves a planar PnP for the camera
//! pose. Emits nothing when no square is visible.

pub mod pnp;
pub mod square;

pub use pnp::{estimate_homography_dlt, solve_planar_pose, solve_square_pose};
pub use square::{find_square, sort_by_centroid_angle};

use image::GrayImage;

use crate::camera::CameraIntrinsics;
use crate::config::InitConfig;
use crate::error::TrackResult;
use crate::types::SeedPose;

/// Seed pose from one frame; `Ok(None)` when no square is detected
pub fn estimate_seed_pose(
    gray: &GrayImage,
    config: &InitConfig,
    side_length: f64,
    intrinsics: &CameraIntrinsics,
) -> TrackResult<Option<SeedPose>> {
    let Some(corners) = find_square(gray, config) else {
        log::debug!("No square found in {}x{} frame", gray.width(), gray.height());
        return Ok(None);
    };
    for (i, c) in corners.iter().enumerate() {
        log::debug!("Square corner P{} [{:.0}, {:.0}]", i + 1, c.x, c.y);
    }

    let pose = solve_square_pose(&corners, side_length, intrinsics)?;
    log::info!(
        "Seed pose from square: position=({:.3}, {:.3}, {:.3})",
        pose.position.x,
        pose.position.y,
        pose.position.z
    );
    Ok(Some(pose))
}
