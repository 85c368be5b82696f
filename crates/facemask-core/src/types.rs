use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Global mask opacity used when a request does not set one.
pub const DEFAULT_OPACITY: f64 = 0.65;
/// Color for regions that have no palette entry.
pub const DEFAULT_FALLBACK_COLOR: &str = "#B695C0";
/// Upward hairline extension, as a multiple of the measured forehead height.
pub const DEFAULT_FOREHEAD_EXTENSION: f64 = 1.5;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("landmark set is empty")]
    Empty,
    #[error("landmark {index} has invalid coordinates ({x}, {y}): must be finite and >= 0")]
    InvalidCoordinate { index: usize, x: f64, y: f64 },
    #[error("expected {expected} landmarks, got {actual}")]
    WrongCount { expected: usize, actual: usize },
}

/// A point in image-pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Fixed-size ordered facial landmark set, index-addressed.
///
/// Immutable once constructed. Coordinates are validated to be finite and
/// non-negative; the point count is only checked on request via
/// [`LandmarkSet::expect_len`] so out-of-range region indices can be skipped
/// downstream instead of rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LandmarkSet {
    points: Vec<Point>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Point>) -> Result<Self, ValidationError> {
        if points.is_empty() {
            return Err(ValidationError::Empty);
        }
        for (index, p) in points.iter().enumerate() {
            if !(p.x.is_finite() && p.y.is_finite()) || p.x < 0.0 || p.y < 0.0 {
                return Err(ValidationError::InvalidCoordinate { index, x: p.x, y: p.y });
            }
        }
        Ok(Self { points })
    }

    /// Enforce the mesh size contract (e.g. 478 for MediaPipe Face Mesh).
    pub fn expect_len(&self, expected: usize) -> Result<(), ValidationError> {
        if self.points.len() != expected {
            return Err(ValidationError::WrongCount {
                expected,
                actual: self.points.len(),
            });
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<Point> {
        self.points.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Resolve an index list to points, skipping out-of-range indices.
    pub fn resolve(&self, indices: &[usize]) -> Vec<Point> {
        indices.iter().filter_map(|&i| self.get(i)).collect()
    }
}

impl<'de> Deserialize<'de> for LandmarkSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let points = Vec::<Point>::deserialize(deserializer)?;
        LandmarkSet::new(points).map_err(serde::de::Error::custom)
    }
}

/// Rendering flags and per-region styling.
///
/// Colors and opacities are resolved through [`RenderConfig::color_for`] and
/// [`RenderConfig::opacity_for`]; nothing reads the maps directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub show_labels: bool,
    /// Global fill opacity in [0, 1].
    pub opacity: f64,
    /// Per-region opacity overrides.
    pub region_opacity: BTreeMap<String, f64>,
    /// Stroke width in pixels; 0 disables outlines.
    pub stroke_width: u32,
    pub colors: BTreeMap<String, String>,
    /// Color for regions missing from `colors`. `None` skips such regions.
    pub fallback_color: Option<String>,
    pub forehead_extension: f64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            show_labels: true,
            opacity: DEFAULT_OPACITY,
            region_opacity: BTreeMap::new(),
            stroke_width: 0,
            colors: crate::regions::default_palette(),
            fallback_color: Some(DEFAULT_FALLBACK_COLOR.to_string()),
            forehead_extension: DEFAULT_FOREHEAD_EXTENSION,
        }
    }
}

impl RenderConfig {
    pub fn color_for(&self, region: &str) -> Option<&str> {
        self.colors
            .get(region)
            .or(self.fallback_color.as_ref())
            .map(String::as_str)
    }

    pub fn opacity_for(&self, region: &str) -> f64 {
        self.region_opacity
            .get(region)
            .copied()
            .unwrap_or(self.opacity)
            .clamp(0.0, 1.0)
    }
}

/// Raw contour of one region after index resolution (and hairline extrapolation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionContour {
    pub name: String,
    pub points: Vec<[f64; 2]>,
}

/// Output of one mask render: the SVG document plus per-region contours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskResult {
    pub svg: String,
    pub contours: Vec<RegionContour>,
    /// Number of regions actually drawn.
    pub regions_detected: u32,
    pub width: u32,
    pub height: u32,
}
