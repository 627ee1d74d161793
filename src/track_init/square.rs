//! Dark square detection in a grayscale frame.

use image::{GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::geometry::arc_length;
use imageproc::point::Point;

use crate::config::InitConfig;
use crate::types::Point2D;

/// Inverse binary threshold: pixels at or below `threshold` become foreground (255)
pub fn threshold_inverse(gray: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > threshold {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

/// Shoelace area of a closed polygon
pub fn polygon_area(points: &[Point2D]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let twice: f64 = (0..n)
        .map(|i| {
            let a = &points[i];
            let b = &points[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum();
    twice.abs() / 2.0
}

fn perpendicular_distance(p: &Point2D, a: &Point2D, b: &Point2D) -> f64 {
    let ab = b - a;
    let length = ab.norm();
    if length < 1e-12 {
        return (p - a).norm();
    }
    (ab.x * (p.y - a.y) - ab.y * (p.x - a.x)).abs() / length
}

/// Douglas–Peucker on an open chain, keeping both ends
fn simplify_chain(chain: &[Point2D], epsilon: f64, out: &mut Vec<Point2D>) {
    let (first, last) = match chain {
        [] => return,
        [only] => {
            out.push(*only);
            return;
        }
        [first, .., last] => (first, last),
    };

    let (index, dmax) = chain[1..chain.len() - 1]
        .iter()
        .enumerate()
        .map(|(i, p)| (i + 1, perpendicular_distance(p, first, last)))
        .fold((0, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });

    if dmax > epsilon {
        simplify_chain(&chain[..=index], epsilon, out);
        out.pop();
        simplify_chain(&chain[index..], epsilon, out);
    } else {
        out.push(*first);
        out.push(*last);
    }
}

/// Douglas–Peucker approximation of a closed contour.
///
/// The contour is split at two mutually distant points, which are vertices of any convex
/// approximation, and each half is simplified separately.
pub fn approximate_closed_polygon(contour: &[Point2D], epsilon: f64) -> Vec<Point2D> {
    if contour.len() < 3 {
        return contour.to_vec();
    }
    let farthest_from = |origin: &Point2D| {
        contour
            .iter()
            .enumerate()
            .map(|(i, p)| (i, (p - origin).norm_squared()))
            .fold((0, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best })
            .0
    };
    let i0 = farthest_from(&contour[0]);
    let i1 = farthest_from(&contour[i0]);
    let (start, end) = (i0.min(i1), i0.max(i1));
    if start == end {
        return vec![contour[start]];
    }

    let first_half = &contour[start..=end];
    let second_half: Vec<Point2D> = contour[end..]
        .iter()
        .chain(contour[..=start].iter())
        .copied()
        .collect();

    let mut polygon = Vec::new();
    simplify_chain(first_half, epsilon, &mut polygon);
    polygon.pop();
    simplify_chain(&second_half, epsilon, &mut polygon);
    polygon.pop();
    polygon
}

fn to_points(contour: &[Point<i32>]) -> Vec<Point2D> {
    contour
        .iter()
        .map(|p| Point2D::new(p.x as f64, p.y as f64))
        .collect()
}

/// Largest dark quadrilateral in the frame, corners in contour order.
///
/// Contours are visited by descending area; the first one covering at least
/// `min_area_fraction` of the image whose polygon approximation has exactly four vertices wins.
pub fn find_square(gray: &GrayImage, config: &InitConfig) -> Option<[Point2D; 4]> {
    let binary = threshold_inverse(gray, config.threshold);
    let image_area = (gray.width() as f64) * (gray.height() as f64);

    let mut candidates: Vec<(f64, Vec<Point<i32>>)> = find_contours::<i32>(&binary)
        .into_iter()
        .map(|contour| {
            let area = polygon_area(&to_points(&contour.points));
            (area, contour.points)
        })
        .collect();
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
    log::debug!("{} contours found", candidates.len());

    for (area, contour) in &candidates {
        if *area <= config.min_area_fraction * image_area {
            break;
        }
        let epsilon = config.approx_tolerance * arc_length(contour, true);
        if epsilon <= 0.0 {
            continue;
        }
        let polygon = approximate_closed_polygon(&to_points(contour), epsilon);
        log::trace!("Contour of area {:.0} approximated by {} vertices", area, polygon.len());
        if let [a, b, c, d] = polygon.as_slice() {
            return Some([*a, *b, *c, *d]);
        }
    }
    None
}

/// Order corners by ascending angle of the centroid-to-vertex vector
pub fn sort_by_centroid_angle(corners: &mut [Point2D]) {
    if corners.is_empty() {
        return;
    }
    let centroid = corners
        .iter()
        .fold(Point2D::origin().coords, |acc, p| acc + p.coords)
        / corners.len() as f64;
    let angle = |p: &Point2D| (p.y - centroid.y).atan2(p.x - centroid.x);
    corners.sort_by(|a, b| angle(a).total_cmp(&angle(b)));
}
