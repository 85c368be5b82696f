//! Hairline extrapolation for the forehead region.
//!
//! Face meshes stop at the upper forehead, well below the hairline. The
//! top-arc points of the forehead boundary are lifted by a fraction of the
//! measured forehead height (top arc to eyebrows) and nudged laterally using
//! a hand-tuned table. The table is empirical; keep it literal.

use crate::types::{LandmarkSet, Point};

/// Outer forehead rim, nearest the hairline.
const TOP_ARC: [usize; 12] = [162, 21, 54, 103, 67, 109, 10, 338, 297, 332, 284, 251];

/// Eyebrow landmarks used as the lower reference line.
const EYEBROW_REFERENCE: [usize; 10] = [70, 63, 105, 66, 107, 336, 296, 334, 293, 300];

/// Per-index hairline offsets: (landmark, fraction of base lift, x nudge in px).
///
/// Positive x moves right in image space.
const HAIRLINE_OFFSETS: [(usize, f64, f64); 12] = [
    (162, 0.3, 20.0),  // left temple, inward
    (21, 0.3, 15.0),
    (54, 0.3, 10.0),
    (103, 0.3, -10.0), // outward
    (67, 0.8, -5.0),
    (109, 1.0, 0.0),
    (10, 1.0, 0.0),    // forehead centre
    (338, 1.0, 0.0),
    (297, 1.0, 0.0),
    (332, 1.0, 0.0),
    (284, 1.0, 0.0),
    (251, 1.0, 0.0),
];

fn mean_y(landmarks: &LandmarkSet, indices: &[usize]) -> Option<f64> {
    let ys: Vec<f64> = indices
        .iter()
        .filter_map(|&i| landmarks.get(i))
        .map(|p| p.y)
        .collect();
    if ys.is_empty() {
        None
    } else {
        Some(ys.iter().sum::<f64>() / ys.len() as f64)
    }
}

fn hairline_offset(index: usize) -> Option<(f64, f64)> {
    HAIRLINE_OFFSETS
        .iter()
        .find(|(i, _, _)| *i == index)
        .map(|&(_, lift, dx)| (lift, dx))
}

/// Base lift distance in pixels: (eyebrow mean y − top-arc mean y) × ratio.
///
/// Out-of-range indices are skipped when averaging. `None` when either
/// reference set has no in-range landmark.
pub fn base_extension(landmarks: &LandmarkSet, extension_ratio: f64) -> Option<f64> {
    let top = mean_y(landmarks, &TOP_ARC)?;
    let brow = mean_y(landmarks, &EYEBROW_REFERENCE)?;
    Some((brow - top) * extension_ratio)
}

/// Resolve `boundary` to points, lifting top-arc points toward the hairline.
///
/// Order follows `boundary`; out-of-range indices are skipped, matching how
/// every other region resolves its points. Non-top-arc points are copied
/// through untouched. If the reference height cannot be measured the
/// boundary is returned unmodified.
pub fn extrapolate_forehead(
    landmarks: &LandmarkSet,
    boundary: &[usize],
    extension_ratio: f64,
) -> Vec<Point> {
    let Some(base) = base_extension(landmarks, extension_ratio) else {
        tracing::debug!("forehead reference landmarks missing; skipping hairline extrapolation");
        return landmarks.resolve(boundary);
    };

    boundary
        .iter()
        .filter_map(|&idx| {
            let p = landmarks.get(idx)?;
            Some(match hairline_offset(idx) {
                Some((lift, dx)) => Point::new(p.x + dx, p.y - base * lift),
                None => p,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::{RegionMap, FOREHEAD_REGION};

    /// 478 points where the top arc sits 100 px above the eyebrow line.
    fn face_like() -> LandmarkSet {
        let mut pts: Vec<Point> = (0..478)
            .map(|i| Point::new(200.0 + (i % 20) as f64 * 5.0, 300.0 + (i / 20) as f64))
            .collect();
        for &i in &TOP_ARC {
            pts[i].y = 150.0;
        }
        for &i in &EYEBROW_REFERENCE {
            pts[i].y = 250.0;
        }
        LandmarkSet::new(pts).unwrap()
    }

    fn forehead_indices() -> Vec<usize> {
        RegionMap::default()
            .get(FOREHEAD_REGION)
            .map(|r| r.indices.clone())
            .unwrap()
    }

    #[test]
    fn test_base_extension() {
        let set = face_like();
        let base = base_extension(&set, 1.5).unwrap();
        assert!((base - 150.0).abs() < 1e-9, "base = {base}");
    }

    #[test]
    fn test_offset_table_literal() {
        let set = face_like();
        let out = extrapolate_forehead(&set, &[162, 67, 10, 103], 1.0);
        // base = 100 px
        assert_eq!(out[0], Point::new(set.get(162).unwrap().x + 20.0, 150.0 - 30.0));
        assert_eq!(out[1], Point::new(set.get(67).unwrap().x - 5.0, 150.0 - 80.0));
        assert_eq!(out[2], Point::new(set.get(10).unwrap().x, 150.0 - 100.0));
        assert_eq!(out[3], Point::new(set.get(103).unwrap().x - 10.0, 150.0 - 30.0));
    }

    #[test]
    fn test_top_arc_moves_up_others_untouched() {
        let set = face_like();
        let boundary = forehead_indices();
        let out = extrapolate_forehead(&set, &boundary, 1.5);
        assert_eq!(out.len(), boundary.len());

        for (&idx, p) in boundary.iter().zip(&out) {
            let src = set.get(idx).unwrap();
            if TOP_ARC.contains(&idx) {
                assert!(p.y < src.y, "index {idx} did not move up: {} -> {}", src.y, p.y);
            } else {
                assert_eq!(p.x.to_bits(), src.x.to_bits(), "index {idx} x changed");
                assert_eq!(p.y.to_bits(), src.y.to_bits(), "index {idx} y changed");
            }
        }
    }

    #[test]
    fn test_only_five_lateral_nudges() {
        let set = face_like();
        let boundary = forehead_indices();
        let out = extrapolate_forehead(&set, &boundary, 1.5);
        let nudged: Vec<usize> = boundary
            .iter()
            .zip(&out)
            .filter(|(&idx, p)| p.x != set.get(idx).unwrap().x)
            .map(|(&idx, _)| idx)
            .collect();
        assert_eq!(nudged, vec![162, 21, 54, 103, 67]);
    }

    #[test]
    fn test_out_of_range_skipped() {
        let pts: Vec<Point> = (0..200).map(|i| Point::new(i as f64, 400.0 - i as f64)).collect();
        let set = LandmarkSet::new(pts).unwrap();
        // 338 and 297 are out of range; reference means use the rest.
        let out = extrapolate_forehead(&set, &[10, 338, 70, 297], 1.0);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], set.get(70).unwrap());
    }

    #[test]
    fn test_missing_reference_passthrough() {
        let pts: Vec<Point> = (0..20).map(|i| Point::new(i as f64, i as f64)).collect();
        let set = LandmarkSet::new(pts).unwrap();
        assert!(base_extension(&set, 1.5).is_none());
        let out = extrapolate_forehead(&set, &[10, 1, 2], 1.5);
        assert_eq!(out, set.resolve(&[10, 1, 2]));
    }
}
