pub mod linalg;

pub use linalg::*;

use nalgebra::{Point2, Point3, Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Continuous image-plane coordinate in pixels
pub type Point2D = Point2<f64>;
/// 3D coordinate in the target (world) frame or the camera frame
pub type Point3D = Point3<f64>;

/// Raw event as delivered by the sensor: integer pixel, timestamp in seconds
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub x: u16,
    pub y: u16,
    pub ts: f64,
    #[serde(default)]
    pub polarity: bool,
}

/// Event after undistortion. Transient, consumed by the tracker.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Event {
    pub position: Point2D,
    pub timestamp: f64,
}

impl Event {
    pub fn from_raw(raw: &RawEvent) -> Self {
        Self {
            position: Point2D::new(raw.x as f64, raw.y as f64),
            timestamp: raw.ts,
        }
    }
}

/// Externally supplied camera pose used to (re)initialise tracking
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeedPose {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

impl SeedPose {
    pub fn new(position: Vector3<f64>, orientation: UnitQuaternion<f64>) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Build from a position and a (w, x, y, z) quaternion, normalising it
    pub fn from_wxyz(position: [f64; 3], q: [f64; 4]) -> Self {
        Self {
            position: Vector3::from(position),
            orientation: UnitQuaternion::from_quaternion(Quaternion::new(q[0], q[1], q[2], q[3])),
        }
    }
}

/// Pose published once per associated-and-updated event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedPose {
    /// Timestamp of the event that produced this estimate [s]
    pub timestamp: f64,
    pub frame_id: String,
    pub position: [f64; 3],
    /// Quaternion (w, x, y, z)
    pub orientation: [f64; 4],
}

impl TrackedPose {
    pub fn new(
        timestamp: f64,
        frame_id: &str,
        position: &Vector3<f64>,
        orientation: &UnitQuaternion<f64>,
    ) -> Self {
        Self {
            timestamp,
            frame_id: frame_id.to_string(),
            position: [position.x, position.y, position.z],
            orientation: [orientation.w, orientation.i, orientation.j, orientation.k],
        }
    }
}
