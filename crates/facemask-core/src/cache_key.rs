//! Deterministic cache keys.
//!
//! Every field that can change the rendered document is collected into a
//! typed, ordered structure and serialized to JSON, so strings are quoted and
//! escaped and no two distinct requests share a canonical form. The result is
//! digested with SHA-256. Floats that come from user input (opacities,
//! forehead extension) are quantized to hundredths so float noise cannot
//! cause a spurious miss. Landmark coordinates use serde_json's shortest
//! round-trip formatting, so they are exact.

use crate::phash::content_checksum;
use crate::regions::{Region, RegionMap};
use crate::types::{LandmarkSet, Point, RenderConfig};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hundredths, rounded half away from zero.
fn quantize(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

/// Canonical form of everything but the image. Field order is fixed.
#[derive(Serialize)]
struct CanonicalParams<'a> {
    landmarks: &'a [Point],
    regions: Vec<&'a Region>,
    show_labels: bool,
    opacity: i64,
    region_opacity: BTreeMap<&'a str, i64>,
    stroke_width: u32,
    colors: &'a BTreeMap<String, String>,
    fallback_color: Option<&'a str>,
    forehead_extension: i64,
}

fn canonical_params(landmarks: &LandmarkSet, regions: &RegionMap, config: &RenderConfig) -> String {
    let params = CanonicalParams {
        landmarks: landmarks.points(),
        regions: regions.iter().collect(),
        show_labels: config.show_labels,
        opacity: quantize(config.opacity),
        region_opacity: config
            .region_opacity
            .iter()
            .map(|(name, v)| (name.as_str(), quantize(*v)))
            .collect(),
        stroke_width: config.stroke_width,
        colors: &config.colors,
        fallback_color: config.fallback_color.as_deref(),
        forehead_extension: quantize(config.forehead_extension),
    };
    // Only strings, integers, bools and finite floats: serialization cannot fail.
    serde_json::to_string(&params).unwrap_or_default()
}

/// Digest of the render parameters alone (no image).
///
/// Used to scope similarity search to requests that would render the same
/// overlay onto a visually similar image.
pub fn variant_key(landmarks: &LandmarkSet, regions: &RegionMap, config: &RenderConfig) -> String {
    content_checksum(canonical_params(landmarks, regions, config).as_bytes())
}

/// Exact-match key over the image content and all render parameters.
pub fn exact_key(
    image: &[u8],
    landmarks: &LandmarkSet,
    regions: &RegionMap,
    config: &RenderConfig,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"image:");
    hasher.update(content_checksum(image).as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_params(landmarks, regions, config).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;

    fn landmarks() -> LandmarkSet {
        LandmarkSet::new((0..478).map(|i| Point::new(i as f64 * 0.5, 10.0 + i as f64)).collect()).unwrap()
    }

    fn key_with(config: &RenderConfig) -> String {
        exact_key(b"image-bytes", &landmarks(), &RegionMap::default(), config)
    }

    #[test]
    fn test_identical_inputs_identical_key() {
        let config = RenderConfig::default();
        assert_eq!(key_with(&config), key_with(&config.clone()));
        assert_eq!(key_with(&config).len(), 64);
    }

    #[test]
    fn test_opacity_noise_ignored() {
        let base = RenderConfig {
            opacity: 0.65,
            ..RenderConfig::default()
        };
        let noisy = RenderConfig {
            opacity: 0.65 + 0.004,
            ..RenderConfig::default()
        };
        let float_noise = RenderConfig {
            opacity: 0.1 + 0.55,
            ..RenderConfig::default()
        };
        assert_eq!(key_with(&base), key_with(&noisy));
        assert_eq!(key_with(&base), key_with(&float_noise));
    }

    #[test]
    fn test_opacity_change_changes_key() {
        let base = RenderConfig {
            opacity: 0.65,
            ..RenderConfig::default()
        };
        let changed = RenderConfig {
            opacity: 0.67,
            ..RenderConfig::default()
        };
        assert_ne!(key_with(&base), key_with(&changed));
    }

    #[test]
    fn test_flags_change_key() {
        let base = RenderConfig::default();
        let labels = RenderConfig {
            show_labels: !base.show_labels,
            ..base.clone()
        };
        let stroke = RenderConfig {
            stroke_width: 2,
            ..base.clone()
        };
        let mut color = base.clone();
        color.colors.insert("nose".into(), "#000000".into());
        let keys = [key_with(&base), key_with(&labels), key_with(&stroke), key_with(&color)];
        for i in 0..keys.len() {
            for j in i + 1..keys.len() {
                assert_ne!(keys[i], keys[j], "keys {i} and {j} collide");
            }
        }
    }

    #[test]
    fn test_image_and_landmarks_change_key() {
        let config = RenderConfig::default();
        let regions = RegionMap::default();
        let base = exact_key(b"a", &landmarks(), &regions, &config);
        assert_ne!(base, exact_key(b"b", &landmarks(), &regions, &config));

        let mut pts = landmarks().points().to_vec();
        pts[100].x += 0.25;
        let moved = LandmarkSet::new(pts).unwrap();
        assert_ne!(base, exact_key(b"a", &moved, &regions, &config));
    }

    #[test]
    fn test_region_map_changes_key() {
        let config = RenderConfig::default();
        let custom = RegionMap::new([("nose_only", vec![55, 8, 285, 417])]).unwrap();
        assert_ne!(
            exact_key(b"a", &landmarks(), &RegionMap::default(), &config),
            exact_key(b"a", &landmarks(), &custom, &config)
        );
    }

    #[test]
    fn test_region_names_cannot_forge_boundaries() {
        let config = RenderConfig::default();
        let split = RegionMap::new([("a", vec![1]), ("b", vec![2])]).unwrap();
        let merged = RegionMap::new([("a=1,;b", vec![2])]).unwrap();
        assert_ne!(
            exact_key(b"a", &landmarks(), &split, &config),
            exact_key(b"a", &landmarks(), &merged, &config)
        );
        assert_ne!(
            variant_key(&landmarks(), &split, &config),
            variant_key(&landmarks(), &merged, &config)
        );
    }

    #[test]
    fn test_color_values_cannot_forge_entries() {
        let mut joined = RenderConfig::default();
        joined.colors.clear();
        joined.colors.insert("x".into(), "#111;y=#222".into());

        let mut separate = RenderConfig::default();
        separate.colors.clear();
        separate.colors.insert("x".into(), "#111".into());
        separate.colors.insert("y".into(), "#222".into());

        assert_ne!(key_with(&joined), key_with(&separate));
    }

    #[test]
    fn test_missing_fallback_differs_from_dash_color() {
        let none = RenderConfig {
            fallback_color: None,
            ..RenderConfig::default()
        };
        let dash = RenderConfig {
            fallback_color: Some("-".into()),
            ..RenderConfig::default()
        };
        assert_ne!(key_with(&none), key_with(&dash));
    }

    #[test]
    fn test_variant_key_ignores_image() {
        let config = RenderConfig::default();
        let regions = RegionMap::default();
        let v = variant_key(&landmarks(), &regions, &config);
        assert_eq!(v, variant_key(&landmarks(), &regions, &config));
        assert_ne!(v, exact_key(b"", &landmarks(), &regions, &config));
    }
}
