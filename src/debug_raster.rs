//! Observational raster of recent events with the projected map and pose uncertainty.
//!
//! Nothing here feeds back into estimation.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use nalgebra::{Matrix2, SMatrix, UnitQuaternion, Vector2, Vector3};

use crate::camera::CameraIntrinsics;
use crate::config::DebugConfig;
use crate::geometry::quaternion_tangent_jacobian;
use crate::map_match::{MapModel, ProjectedEndpoint};
use crate::types::{Point2D, PoseCovariance};

const USED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const UNUSED_COLOR: Rgb<u8> = Rgb([150, 150, 150]);
const MAP_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const COVARIANCE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

/// Vertices of each drawn covariance ellipse
const ELLIPSE_VERTICES: usize = 24;

/// Rendered debug image
#[derive(Clone, Debug)]
pub struct DebugFrame {
    /// Timestamp of the event that completed the frame [s]
    pub timestamp: f64,
    pub image: RgbImage,
}

pub struct DebugRaster {
    config: DebugConfig,
    image: RgbImage,
    recorded: usize,
    out_of_bounds: usize,
}

impl DebugRaster {
    pub fn new(config: DebugConfig) -> Self {
        let image = RgbImage::new(config.width, config.height);
        Self {
            config,
            image,
            recorded: 0,
            out_of_bounds: 0,
        }
    }

    /// Mark one event as used (matched) or unused.
    ///
    /// Returns true once `publish_every` events have accumulated.
    pub fn record(&mut self, point: &Point2D, used: bool) -> bool {
        self.recorded += 1;

        let (x, y) = (point.x.round(), point.y.round());
        if x >= 0.0 && y >= 0.0 && x < self.image.width() as f64 && y < self.image.height() as f64 {
            let color = if used { USED_COLOR } else { UNUSED_COLOR };
            self.image.put_pixel(x as u32, y as u32, color);
        } else {
            self.out_of_bounds += 1;
        }

        self.recorded >= self.config.publish_every
    }

    pub fn recorded(&self) -> usize {
        self.recorded
    }

    pub fn out_of_bounds(&self) -> usize {
        self.out_of_bounds
    }

    pub fn clear(&mut self) {
        self.image = RgbImage::new(self.config.width, self.config.height);
        self.recorded = 0;
        self.out_of_bounds = 0;
    }

    /// Compose the accumulated events with the projected map and endpoint covariance ellipses
    pub fn render(
        &self,
        timestamp: f64,
        map: &MapModel,
        position: &Vector3<f64>,
        orientation: &UnitQuaternion<f64>,
        pose_covariance: &PoseCovariance,
        intrinsics: &CameraIntrinsics,
    ) -> DebugFrame {
        let mut image = self.image.clone();

        for (id, segment) in map.segments().iter().enumerate() {
            let Some(projection) = segment.projection() else {
                continue;
            };
            draw_clipped_segment(&mut image, &projection.start, &projection.end, MAP_COLOR);

            match map.endpoint_jacobians(id, position, orientation, intrinsics) {
                Ok(endpoints) => {
                    for endpoint in &endpoints {
                        let covariance = pixel_covariance(endpoint, orientation, pose_covariance);
                        draw_ellipse(
                            &mut image,
                            &endpoint.pixel,
                            &covariance,
                            self.config.covariance_sigma,
                        );
                    }
                }
                Err(e) => log::trace!("No covariance overlay for segment {}: {}", id, e),
            }
        }

        DebugFrame { timestamp, image }
    }
}

/// Pixel covariance J·P·Jᵀ of a projected endpoint under the (δr, δθ) pose covariance
fn pixel_covariance(
    endpoint: &ProjectedEndpoint,
    orientation: &UnitQuaternion<f64>,
    pose_covariance: &PoseCovariance,
) -> Matrix2<f64> {
    let mut jac = SMatrix::<f64, 2, 6>::zeros();
    jac.fixed_view_mut::<2, 3>(0, 0).copy_from(&endpoint.d_position);
    jac.fixed_view_mut::<2, 3>(0, 3)
        .copy_from(&(endpoint.d_orientation * quaternion_tangent_jacobian(orientation)));
    jac * pose_covariance * jac.transpose()
}

/// Closed polyline of the `sigma`-scaled ellipse of a 2×2 covariance
fn ellipse_points(center: &Point2D, covariance: &Matrix2<f64>, sigma: f64) -> Vec<Point2D> {
    let eigen = covariance.symmetric_eigen();
    let axes: Vec<Vector2<f64>> = (0..2)
        .map(|i| eigen.eigenvectors.column(i) * (sigma * eigen.eigenvalues[i].max(0.0).sqrt()))
        .collect();

    (0..ELLIPSE_VERTICES)
        .map(|k| {
            let angle = 2.0 * std::f64::consts::PI * k as f64 / ELLIPSE_VERTICES as f64;
            center + axes[0] * angle.cos() + axes[1] * angle.sin()
        })
        .collect()
}

/// Clip the segment `a`–`b` to the rectangle `[min, max]` (Liang–Barsky).
///
/// Returns `None` when no part of it lies inside or an endpoint is not finite.
fn clip_segment(a: &Point2D, b: &Point2D, min: &Point2D, max: &Point2D) -> Option<(Point2D, Point2D)> {
    if !(a.x.is_finite() && a.y.is_finite() && b.x.is_finite() && b.y.is_finite()) {
        return None;
    }
    let d = b - a;
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    let edges = [
        (-d.x, a.x - min.x),
        (d.x, max.x - a.x),
        (-d.y, a.y - min.y),
        (d.y, max.y - a.y),
    ];
    for (p, q) in edges {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some((a + d * t0, a + d * t1))
}

/// Draw only the part of a segment that falls on the image (plus a one pixel border)
fn draw_clipped_segment(image: &mut RgbImage, a: &Point2D, b: &Point2D, color: Rgb<u8>) {
    let min = Point2D::new(-1.0, -1.0);
    let max = Point2D::new(image.width() as f64, image.height() as f64);
    if let Some((a, b)) = clip_segment(a, b, &min, &max) {
        draw_line_segment_mut(image, (a.x as f32, a.y as f32), (b.x as f32, b.y as f32), color);
    }
}

fn draw_ellipse(image: &mut RgbImage, center: &Point2D, covariance: &Matrix2<f64>, sigma: f64) {
    let (width, height) = (image.width() as f64, image.height() as f64);
    if !(center.x >= 0.0 && center.y >= 0.0 && center.x < width && center.y < height) {
        return;
    }
    let points = ellipse_points(center, covariance, sigma);
    let diagonal = width.hypot(height);
    if points
        .iter()
        .any(|p| !p.x.is_finite() || !p.y.is_finite() || (p - center).norm() > diagonal)
    {
        return;
    }
    for i in 0..points.len() {
        draw_clipped_segment(image, &points[i], &points[(i + 1) % points.len()], COVARIANCE_COLOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(publish_every: usize) -> DebugConfig {
        DebugConfig {
            publish_every,
            ..DebugConfig::default()
        }
    }

    #[test]
    fn test_record_colors_and_cadence() {
        let mut raster = DebugRaster::new(small_config(3));
        assert!(!raster.record(&Point2D::new(10.2, 20.4), true));
        assert!(!raster.record(&Point2D::new(30.0, 40.0), false));
        assert_eq!(*raster.image.get_pixel(10, 20), USED_COLOR);
        assert_eq!(*raster.image.get_pixel(30, 40), UNUSED_COLOR);
        assert!(raster.record(&Point2D::new(1.0, 1.0), false));

        raster.clear();
        assert_eq!(raster.recorded(), 0);
        assert_eq!(*raster.image.get_pixel(10, 20), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_out_of_bounds_events_are_counted_not_drawn() {
        let mut raster = DebugRaster::new(small_config(10));
        raster.record(&Point2D::new(-3.0, 5.0), true);
        raster.record(&Point2D::new(240.0, 5.0), true);
        raster.record(&Point2D::new(5.0, 179.6), true);
        assert_eq!(raster.out_of_bounds(), 3);
        assert_eq!(raster.recorded(), 3);
    }

    #[test]
    fn test_render_overlays_map() {
        let intrinsics = CameraIntrinsics::new(120.0, 90.0, 200.0, 200.0);
        let position = Vector3::new(0.0, 0.0, -1.0);
        let orientation = UnitQuaternion::identity();
        let mut map = MapModel::square(0.4);
        map.project_all(&position, &orientation, &intrinsics);

        let mut raster = DebugRaster::new(small_config(10));
        raster.record(&Point2D::new(5.0, 5.0), true);
        let covariance = PoseCovariance::identity() * 1e-4;
        let frame = raster.render(0.5, &map, &position, &orientation, &covariance, &intrinsics);

        assert_eq!(frame.timestamp, 0.5);
        assert_eq!(frame.image.dimensions(), (240, 180));
        // Top edge of the square projects to v = 50 between u = 80 and 160
        assert_eq!(*frame.image.get_pixel(120, 50), MAP_COLOR);
        assert_eq!(*frame.image.get_pixel(5, 5), USED_COLOR);
        assert!(frame.image.pixels().any(|p| *p == COVARIANCE_COLOR));
        // Rendering leaves the accumulator untouched
        assert_eq!(raster.recorded(), 1);
    }

    #[test]
    fn test_clip_segment_to_raster() {
        let min = Point2D::new(0.0, 0.0);
        let max = Point2D::new(100.0, 50.0);

        let (a, b) =
            clip_segment(&Point2D::new(-1e7, 25.0), &Point2D::new(1e7, 25.0), &min, &max).unwrap();
        assert!((a - Point2D::new(0.0, 25.0)).norm() < 1e-6);
        assert!((b - Point2D::new(100.0, 25.0)).norm() < 1e-6);

        // Inside segments are untouched
        let (a, b) = clip_segment(&Point2D::new(10.0, 10.0), &Point2D::new(20.0, 30.0), &min, &max).unwrap();
        assert_eq!(a, Point2D::new(10.0, 10.0));
        assert_eq!(b, Point2D::new(20.0, 30.0));

        assert!(clip_segment(&Point2D::new(-5.0, -5.0), &Point2D::new(-5.0, 1e9), &min, &max).is_none());
        assert!(clip_segment(&Point2D::new(-1e9, -1e9), &Point2D::new(-1e9, 1e9), &min, &max).is_none());
        assert!(clip_segment(&Point2D::new(f64::NAN, 0.0), &Point2D::new(1.0, 1.0), &min, &max).is_none());
    }

    #[test]
    fn test_render_near_target_plane_is_bounded() {
        let intrinsics = CameraIntrinsics::new(120.0, 90.0, 200.0, 200.0);
        let orientation = UnitQuaternion::identity();
        let covariance = PoseCovariance::identity() * 2.5e-3;
        let raster = DebugRaster::new(small_config(10));

        for z in [-1e-3, -1e-6] {
            let position = Vector3::new(0.0, 0.0, z);
            let mut map = MapModel::square(0.2);
            map.project_all(&position, &orientation, &intrinsics);
            assert!(map.segments().iter().any(|s| s.projection().is_some()));

            let start = std::time::Instant::now();
            let frame = raster.render(0.0, &map, &position, &orientation, &covariance, &intrinsics);
            assert!(start.elapsed() < std::time::Duration::from_secs(2));
            assert_eq!(frame.image.dimensions(), (240, 180));
        }
    }

    #[test]
    fn test_oversized_ellipse_is_skipped() {
        let mut image = RgbImage::new(240, 180);
        let covariance = Matrix2::new(1e12, 0.0, 0.0, 1e12);
        draw_ellipse(&mut image, &Point2D::new(120.0, 90.0), &covariance, 3.0);
        draw_ellipse(&mut image, &Point2D::new(-1e6, 90.0), &Matrix2::identity(), 3.0);
        assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_ellipse_axes_follow_covariance() {
        let center = Point2D::new(50.0, 50.0);
        let covariance = Matrix2::new(4.0, 0.0, 0.0, 1.0);
        let points = ellipse_points(&center, &covariance, 3.0);
        assert_eq!(points.len(), ELLIPSE_VERTICES);
        let max_dx = points.iter().map(|p| (p.x - center.x).abs()).fold(0.0, f64::max);
        let max_dy = points.iter().map(|p| (p.y - center.y).abs()).fold(0.0, f64::max);
        assert!((max_dx - 6.0).abs() < 1e-9);
        assert!((max_dy - 3.0).abs() < 1e-9);
    }
}
