use nalgebra::{RowVector2, RowVector3, RowVector4, UnitQuaternion, Vector2, Vector3};

use crate::camera::CameraIntrinsics;
use crate::error::{TrackResult, TrackerError};
use crate::geometry::{inverse_rotation_quaternion_jacobian, world_to_camera};
use crate::types::{
    PixelPositionJacobian, PixelQuaternionJacobian, Point2D, Point3D, PoseJacobian,
};

/// Cached image-plane projection of a segment, valid for the pose it was computed with
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectedSegment {
    pub start: Point2D,
    pub end: Point2D,
}

/// Fixed 3D edge of the target in the world frame
#[derive(Clone, Debug)]
pub struct MapSegment {
    pub start: Point3D,
    pub end: Point3D,
    projection: Option<ProjectedSegment>,
}

impl MapSegment {
    pub fn new(start: Point3D, end: Point3D) -> Self {
        Self {
            start,
            end,
            projection: None,
        }
    }

    pub fn projection(&self) -> Option<&ProjectedSegment> {
        self.projection.as_ref()
    }
}

/// Which part of the segment the query point is closest to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NearestFeature {
    Interior,
    Start,
    End,
}

/// Point-to-segment distance in the image plane
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentDistance {
    /// Signed distance [px]; the sign is that of (b − a) × (p − a)
    pub distance: f64,
    /// Unclamped foot parameter along a → b
    pub t: f64,
    pub feature: NearestFeature,
}

/// Signed perpendicular distance from `point` to segment `a`–`b`, clamped to the segment extent.
///
/// When the perpendicular foot falls outside the segment the magnitude is the distance to the
/// nearer endpoint. Collinear points are reported as non-negative.
pub fn segment_distance(point: &Point2D, a: &Point2D, b: &Point2D) -> SegmentDistance {
    let ab = b - a;
    let ap = point - a;
    let length_sq = ab.norm_squared();

    if length_sq < 1e-12 {
        // Degenerate segment (start == end)
        return SegmentDistance {
            distance: ap.norm(),
            t: 0.0,
            feature: NearestFeature::Start,
        };
    }

    let t = ap.dot(&ab) / length_sq;
    let cross = ab.x * ap.y - ab.y * ap.x;
    let sign = if cross < 0.0 { -1.0 } else { 1.0 };

    if t < 0.0 {
        SegmentDistance {
            distance: sign * ap.norm(),
            t,
            feature: NearestFeature::Start,
        }
    } else if t > 1.0 {
        SegmentDistance {
            distance: sign * (point - b).norm(),
            t,
            feature: NearestFeature::End,
        }
    } else {
        SegmentDistance {
            distance: cross / length_sq.sqrt(),
            t,
            feature: NearestFeature::Interior,
        }
    }
}

/// ∂distance/∂a and ∂distance/∂b for a fixed query point
fn segment_distance_gradients(
    point: &Point2D,
    a: &Point2D,
    b: &Point2D,
    nearest: &SegmentDistance,
) -> (RowVector2<f64>, RowVector2<f64>) {
    let endpoint_gradient = |endpoint: &Point2D| {
        let offset = point - endpoint;
        let norm = offset.norm();
        if norm < 1e-12 {
            RowVector2::zeros()
        } else {
            let sign = nearest.distance.signum();
            -(offset / norm).transpose() * sign
        }
    };

    match nearest.feature {
        NearestFeature::Start => (endpoint_gradient(a), RowVector2::zeros()),
        NearestFeature::End => (RowVector2::zeros(), endpoint_gradient(b)),
        NearestFeature::Interior => {
            let ab: Vector2<f64> = b - a;
            let length = ab.norm();
            let cross = nearest.distance * length;

            // cross = (bx − ax)(py − ay) − (by − ay)(px − ax)
            let dcross_da = RowVector2::new(b.y - point.y, point.x - b.x);
            let dcross_db = RowVector2::new(point.y - a.y, a.x - point.x);
            let dlength_db = (ab / length).transpose();
            let dlength_da = -dlength_db;

            let scale = cross / (length * length);
            (
                dcross_da / length - dlength_da * scale,
                dcross_db / length - dlength_db * scale,
            )
        }
    }
}

/// Outcome of gating an event against every projected segment
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Association {
    /// Accepted segment, if both gates passed
    pub segment: Option<usize>,
    /// Absolute distance to the closest projected segment
    pub distance: f64,
    /// Absolute distance to the runner-up (`+∞` if there is none)
    pub second_distance: f64,
    pub margin_ok: bool,
}

/// Exact distance to one segment plus its analytic pose Jacobian
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistanceMeasurement {
    pub distance: f64,
    /// ∂d/∂r
    pub d_position: RowVector3<f64>,
    /// ∂d/∂q, quaternion order (w, x, y, z)
    pub d_orientation: RowVector4<f64>,
}

impl DistanceMeasurement {
    /// Concatenated 1×7 Jacobian as consumed by the pose filter
    pub fn pose_jacobian(&self) -> PoseJacobian {
        let mut jac = PoseJacobian::zeros();
        jac.fixed_view_mut::<1, 3>(0, 0).copy_from(&self.d_position);
        jac.fixed_view_mut::<1, 4>(0, 3).copy_from(&self.d_orientation);
        jac
    }
}

/// Projected endpoint with its pixel Jacobians
#[derive(Clone, Copy, Debug)]
pub struct ProjectedEndpoint {
    pub pixel: Point2D,
    pub d_position: PixelPositionJacobian,
    pub d_orientation: PixelQuaternionJacobian,
}

/// Fixed set of 3D line segments with per-segment projection caches
#[derive(Clone, Debug, Default)]
pub struct MapModel {
    segments: Vec<MapSegment>,
}

impl MapModel {
    pub fn from_segments(segments: impl IntoIterator<Item = (Point3D, Point3D)>) -> Self {
        Self {
            segments: segments
                .into_iter()
                .map(|(start, end)| MapSegment::new(start, end))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[MapSegment] {
        &self.segments
    }

    fn segment(&self, id: usize) -> TrackResult<&MapSegment> {
        self.segments.get(id).ok_or(TrackerError::UnknownSegment(id))
    }

    fn project_point(
        point: &Point3D,
        position: &Vector3<f64>,
        orientation: &UnitQuaternion<f64>,
        intrinsics: &CameraIntrinsics,
    ) -> Option<Point2D> {
        intrinsics.project(&world_to_camera(&point.coords, position, orientation))
    }

    /// Refresh every projection cache for the given pose
    pub fn project_all(
        &mut self,
        position: &Vector3<f64>,
        orientation: &UnitQuaternion<f64>,
        intrinsics: &CameraIntrinsics,
    ) {
        for segment in &mut self.segments {
            segment.projection = Self::project_segment(segment, position, orientation, intrinsics);
        }
        log::trace!(
            "Projected {} segments, {} visible",
            self.segments.len(),
            self.segments.iter().filter(|s| s.projection.is_some()).count()
        );
    }

    /// Refresh the projection cache of a single segment
    pub fn project(
        &mut self,
        id: usize,
        position: &Vector3<f64>,
        orientation: &UnitQuaternion<f64>,
        intrinsics: &CameraIntrinsics,
    ) -> TrackResult<()> {
        let segment = self
            .segments
            .get_mut(id)
            .ok_or(TrackerError::UnknownSegment(id))?;
        segment.projection = Self::project_segment(segment, position, orientation, intrinsics);
        if segment.projection.is_none() {
            return Err(TrackerError::SegmentBehindCamera(id));
        }
        Ok(())
    }

    fn project_segment(
        segment: &MapSegment,
        position: &Vector3<f64>,
        orientation: &UnitQuaternion<f64>,
        intrinsics: &CameraIntrinsics,
    ) -> Option<ProjectedSegment> {
        let start = Self::project_point(&segment.start, position, orientation, intrinsics)?;
        let end = Self::project_point(&segment.end, position, orientation, intrinsics)?;
        Some(ProjectedSegment { start, end })
    }

    /// Gate `point` against every projected segment by distance and ambiguity margin
    pub fn associate(&self, point: &Point2D, distance_threshold: f64, min_margin: f64) -> Association {
        let mut best: Option<(usize, f64)> = None;
        let mut second = f64::INFINITY;

        for (id, segment) in self.segments.iter().enumerate() {
            let Some(projection) = &segment.projection else {
                continue;
            };
            let d = segment_distance(point, &projection.start, &projection.end)
                .distance
                .abs();
            let best_d = best.map_or(f64::INFINITY, |(_, d)| d);
            if d < best_d {
                second = best_d;
                best = Some((id, d));
            } else {
                second = second.min(d);
            }
        }

        let Some((id, distance)) = best else {
            return Association {
                segment: None,
                distance: f64::INFINITY,
                second_distance: f64::INFINITY,
                margin_ok: false,
            };
        };

        let margin_ok = second - distance >= min_margin;
        Association {
            segment: (distance <= distance_threshold && margin_ok).then_some(id),
            distance,
            second_distance: second,
            margin_ok,
        }
    }

    /// Closest projected segment, if it is within `distance_threshold` and unambiguous
    pub fn get_nearest(&self, point: &Point2D, distance_threshold: f64, min_margin: f64) -> Option<usize> {
        self.associate(point, distance_threshold, min_margin).segment
    }

    /// Project one world point and return its pixel Jacobians w.r.t. position and quaternion
    fn endpoint_with_jacobians(
        point: &Point3D,
        position: &Vector3<f64>,
        orientation: &UnitQuaternion<f64>,
        intrinsics: &CameraIntrinsics,
    ) -> Option<ProjectedEndpoint> {
        let offset = point.coords - position;
        let point_camera = orientation.inverse_transform_vector(&offset);
        let pixel = intrinsics.project(&point_camera)?;

        let d_pixel = intrinsics.projection_jacobian(&point_camera);
        let rotation_t = orientation.to_rotation_matrix().matrix().transpose();
        Some(ProjectedEndpoint {
            pixel,
            d_position: d_pixel * (-rotation_t),
            d_orientation: d_pixel * inverse_rotation_quaternion_jacobian(orientation, &offset),
        })
    }

    /// Both endpoints of segment `id` with pixel Jacobians, for covariance propagation
    pub fn endpoint_jacobians(
        &self,
        id: usize,
        position: &Vector3<f64>,
        orientation: &UnitQuaternion<f64>,
        intrinsics: &CameraIntrinsics,
    ) -> TrackResult<[ProjectedEndpoint; 2]> {
        let segment = self.segment(id)?;
        let start = Self::endpoint_with_jacobians(&segment.start, position, orientation, intrinsics)
            .ok_or(TrackerError::SegmentBehindCamera(id))?;
        let end = Self::endpoint_with_jacobians(&segment.end, position, orientation, intrinsics)
            .ok_or(TrackerError::SegmentBehindCamera(id))?;
        Ok([start, end])
    }

    /// Exact signed distance from `point` to the cached projection of segment `id`, with its
    /// Jacobian w.r.t. the 7 pose parameters.
    ///
    /// The cache must have been refreshed with `project` for the same pose.
    pub fn get_distance(
        &self,
        point: &Point2D,
        id: usize,
        position: &Vector3<f64>,
        orientation: &UnitQuaternion<f64>,
        intrinsics: &CameraIntrinsics,
    ) -> TrackResult<DistanceMeasurement> {
        let segment = self.segment(id)?;
        let projection = segment
            .projection
            .ok_or(TrackerError::SegmentNotProjected(id))?;

        let nearest = segment_distance(point, &projection.start, &projection.end);
        let (dd_da, dd_db) =
            segment_distance_gradients(point, &projection.start, &projection.end, &nearest);

        let [a, b] = self.endpoint_jacobians(id, position, orientation, intrinsics)?;
        Ok(DistanceMeasurement {
            distance: nearest.distance,
            d_position: dd_da * a.d_position + dd_db * b.d_position,
            d_orientation: dd_da * a.d_orientation + dd_db * b.d_orientation,
        })
    }
}
