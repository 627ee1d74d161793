//! Calibration target geometry shared by the tracker map and the initial-pose solver.

use crate::config::TargetConfig;
use crate::types::Point3D;

use super::MapModel;

/// Corners of a square of side `side_length` centred on the origin in the z = 0 plane.
///
/// Ordered by ascending `atan2(y, x)` about the centre, the same order the square detector
/// assigns to image corners.
pub fn square_corners(side_length: f64) -> [Point3D; 4] {
    let h = side_length / 2.0;
    [
        Point3D::new(-h, -h, 0.0),
        Point3D::new(h, -h, 0.0),
        Point3D::new(h, h, 0.0),
        Point3D::new(-h, h, 0.0),
    ]
}

impl MapModel {
    /// The four edges of the square target
    pub fn square(side_length: f64) -> Self {
        let corners = square_corners(side_length);
        Self::from_segments((0..4).map(|i| (corners[i], corners[(i + 1) % 4])))
    }

    /// Map described by the target section of the configuration
    pub fn from_config(config: &TargetConfig) -> Self {
        match &config.segments {
            Some(segments) => Self::from_segments(
                segments
                    .iter()
                    .map(|[a, b]| (Point3D::from(*a), Point3D::from(*b))),
            ),
            None => Self::square(config.side_length),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_corner_order_is_ascending_angle() {
        let corners = square_corners(0.2);
        let angles: Vec<f64> = corners.iter().map(|c| c.y.atan2(c.x)).collect();
        assert!(angles.windows(2).all(|w| w[0] < w[1]));
        assert!(corners.iter().all(|c| c.z == 0.0));
        assert!((corners[1].x - corners[0].x - 0.2).abs() < 1e-15);
    }

    #[test]
    fn test_square_map_is_closed() {
        let map = MapModel::square(0.3);
        assert_eq!(map.len(), 4);
        let segments = map.segments();
        for i in 0..4 {
            assert_eq!(segments[i].end, segments[(i + 1) % 4].start);
            assert!(((segments[i].end - segments[i].start).norm() - 0.3).abs() < 1e-12);
        }
    }

    #[test]
    fn test_map_from_explicit_segments() {
        let config = TargetConfig {
            side_length: 0.2,
            segments: Some(vec![[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]], [[0.0, 0.0, 0.0], [0.0, 1.0, 0.0]]]),
        };
        let map = MapModel::from_config(&config);
        assert_eq!(map.len(), 2);
        assert_eq!(map.segments()[1].end, Point3D::new(0.0, 1.0, 0.0));

        let default_map = MapModel::from_config(&TargetConfig::default());
        assert_eq!(default_map.len(), 4);
    }
}
