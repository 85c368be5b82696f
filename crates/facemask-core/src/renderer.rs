//! SVG mask overlay rendering.
//!
//! Produces one filled, semi-transparent path per renderable region (in
//! region-map order), optional numeric labels at region centroids, and an
//! optional inlined background image as the first element.

use crate::forehead::extrapolate_forehead;
use crate::path::build_path;
use crate::regions::{RegionMap, FOREHEAD_REGION};
use crate::types::{LandmarkSet, MaskResult, Point, RegionContour, RenderConfig};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt::Write;
use thiserror::Error;

const PNG_MAGIC: &[u8] = b"\x89PNG";
const MIN_POLYGON_POINTS: usize = 3;
const LABEL_FONT_SIZE: u32 = 40;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("invalid canvas dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Everything the renderer reads for one document.
pub struct MaskRequest<'a> {
    pub landmarks: &'a LandmarkSet,
    pub regions: &'a RegionMap,
    pub config: &'a RenderConfig,
    /// Raw encoded image bytes to inline as the background.
    pub background: Option<&'a [u8]>,
    pub width: u32,
    pub height: u32,
}

/// MIME subtype for an embedded image, sniffed from magic bytes.
///
/// Anything that is not PNG is labelled JPEG.
pub fn sniff_image_subtype(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(PNG_MAGIC) {
        "png"
    } else {
        "jpeg"
    }
}

/// Resolve a region's points; the forehead gets hairline extrapolation.
fn resolve_region(
    landmarks: &LandmarkSet,
    name: &str,
    indices: &[usize],
    config: &RenderConfig,
) -> Vec<Point> {
    if name == FOREHEAD_REGION {
        extrapolate_forehead(landmarks, indices, config.forehead_extension)
    } else {
        landmarks.resolve(indices)
    }
}

fn centroid(points: &[Point]) -> Point {
    let n = points.len() as f64;
    Point::new(
        points.iter().map(|p| p.x).sum::<f64>() / n,
        points.iter().map(|p| p.y).sum::<f64>() / n,
    )
}

/// Render the mask overlay document and collect per-region contours.
///
/// Regions with fewer than 3 resolved points, or with no color, are skipped
/// (not an error). Contours are returned for every region in the map.
pub fn render_mask(req: &MaskRequest<'_>) -> Result<MaskResult, RenderError> {
    let (width, height) = (req.width, req.height);
    if width == 0 || height == 0 {
        return Err(RenderError::InvalidDimensions { width, height });
    }

    let mut parts = vec![format!(
        r#"<svg width="{width}" height="{height}" xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">"#
    )];

    if let Some(bytes) = req.background.filter(|b| !b.is_empty()) {
        parts.push(format!(
            r#"  <image width="{width}" height="{height}" xlink:href="data:image/{};base64,{}"/>"#,
            sniff_image_subtype(bytes),
            STANDARD.encode(bytes)
        ));
    }

    let mut contours = Vec::with_capacity(req.regions.len());
    let mut rendered = 0u32;

    for region in req.regions.iter() {
        let points = resolve_region(req.landmarks, &region.name, &region.indices, req.config);
        contours.push(RegionContour {
            name: region.name.clone(),
            points: points.iter().map(|p| [p.x, p.y]).collect(),
        });

        let Some(color) = req.config.color_for(&region.name) else {
            tracing::debug!(region = %region.name, "no color configured; skipping region");
            continue;
        };
        if points.len() < MIN_POLYGON_POINTS {
            tracing::debug!(region = %region.name, points = points.len(), "too few points; skipping region");
            continue;
        }

        let d = build_path(&points, true, true);
        let opacity = req.config.opacity_for(&region.name);
        let mut path = format!(r#"  <path d="{d}" fill="{color}" fill-opacity="{opacity}" "#);
        if req.config.stroke_width > 0 {
            let _ = write!(
                path,
                r#"stroke="{color}" stroke-width="{}" "#,
                req.config.stroke_width
            );
        }
        path.push_str("/>");
        parts.push(path);
        rendered += 1;

        if req.config.show_labels {
            let c = centroid(&points);
            parts.push(format!(
                r#"  <text x="{:.2}" y="{:.2}" font-family="Arial, sans-serif" font-size="{LABEL_FONT_SIZE}" font-weight="bold" fill="white" text-anchor="middle" dominant-baseline="middle" opacity="0.9">{rendered}</text>"#,
                c.x, c.y
            ));
        }
    }

    parts.push("</svg>".to_string());

    tracing::debug!(regions = rendered, width, height, "mask rendered");

    Ok(MaskResult {
        svg: parts.join("\n"),
        contours,
        regions_detected: rendered,
        width,
        height,
    })
}
