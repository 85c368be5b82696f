//! SVG path construction from ordered point lists.
//!
//! Smoothed paths convert each Catmull-Rom span into a cubic Bézier segment
//! using the 1/6-tension control-point formula:
//! ```text
//! c1 = p1 + (p2 - p0) / 6
//! c2 = p2 - (p3 - p1) / 6
//! ```

use crate::types::Point;
use std::fmt::Write;

/// Minimum point count for curve fitting; fewer degrade to a polyline.
const MIN_SMOOTH_POINTS: usize = 4;
const CATMULL_ROM_TENSION: f64 = 6.0;

/// Build an SVG path `d` attribute.
///
/// - 0–1 points: empty string.
/// - 2 points: one straight segment, regardless of `smooth` and `closed`.
/// - 3 points, or `smooth == false`: straight polyline.
/// - otherwise: one cubic segment per consecutive pair, with neighbours
///   wrapping around when `closed`.
///
/// `closed` appends `Z` to polylines and curves. Coordinates use 2 decimals.
pub fn build_path(points: &[Point], closed: bool, smooth: bool) -> String {
    match points.len() {
        0 | 1 => String::new(),
        2 => format!(
            "M {:.2},{:.2} L {:.2},{:.2}",
            points[0].x, points[0].y, points[1].x, points[1].y
        ),
        n if !smooth || n < MIN_SMOOTH_POINTS => polyline(points, closed),
        _ => catmull_rom(points, closed),
    }
}

fn polyline(points: &[Point], closed: bool) -> String {
    let mut d = format!("M {:.2},{:.2}", points[0].x, points[0].y);
    for p in &points[1..] {
        let _ = write!(d, " L {:.2},{:.2}", p.x, p.y);
    }
    if closed {
        d.push_str(" Z");
    }
    d
}

fn catmull_rom(points: &[Point], closed: bool) -> String {
    // Closed curves revisit the first point so the last span returns home.
    let mut pts = points.to_vec();
    if closed {
        pts.push(points[0]);
    }
    let n = pts.len();

    let mut d = format!("M {:.2},{:.2}", pts[0].x, pts[0].y);
    for i in 0..n - 1 {
        let p0 = match i {
            0 if closed => pts[n - 2],
            0 => pts[0],
            _ => pts[i - 1],
        };
        let p1 = pts[i];
        let p2 = pts[i + 1];
        let p3 = if i + 2 < n {
            pts[i + 2]
        } else if closed {
            pts[1]
        } else {
            pts[i + 1]
        };

        let c1x = p1.x + (p2.x - p0.x) / CATMULL_ROM_TENSION;
        let c1y = p1.y + (p2.y - p0.y) / CATMULL_ROM_TENSION;
        let c2x = p2.x - (p3.x - p1.x) / CATMULL_ROM_TENSION;
        let c2y = p2.y - (p3.y - p1.y) / CATMULL_ROM_TENSION;

        let _ = write!(
            d,
            " C {c1x:.2},{c1y:.2} {c2x:.2},{c2y:.2} {:.2},{:.2}",
            p2.x, p2.y
        );
    }
    if closed {
        d.push_str(" Z");
    }
    d
}
