//! Region maps and built-in presets.
//!
//! A region is a named polygon over an ordered subset of landmark indices.
//! Presets are embedded at compile time from `contrib/regions/*.toml` and
//! parsed once.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

/// Region that receives hairline extrapolation.
pub const FOREHEAD_REGION: &str = "forehead";

/// Name of the preset used when nothing else is requested.
pub const DEFAULT_PRESET: &str = "mediapipe";

const PRESET_MEDIAPIPE: &str = include_str!("../../../contrib/regions/mediapipe.toml");
const PRESET_LEGACY: &str = include_str!("../../../contrib/regions/legacy.toml");

static PRESET_DB: OnceLock<Vec<RegionPreset>> = OnceLock::new();

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("unknown region preset: {0}")]
    UnknownPreset(String),
    #[error("failed to read region file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bad region TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate region name: {0}")]
    Duplicate(String),
}

/// One named region: ordered landmark indices define winding and label order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub indices: Vec<usize>,
}

/// Ordered mapping from region name to landmark indices.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RegionMap {
    regions: Vec<Region>,
}

impl RegionMap {
    /// Build a map from `(name, indices)` pairs, keeping declaration order.
    pub fn new<I, S>(pairs: I) -> Result<Self, RegionError>
    where
        I: IntoIterator<Item = (S, Vec<usize>)>,
        S: Into<String>,
    {
        let mut regions: Vec<Region> = Vec::new();
        for (name, indices) in pairs {
            let name = name.into();
            if regions.iter().any(|r| r.name == name) {
                return Err(RegionError::Duplicate(name));
            }
            regions.push(Region { name, indices });
        }
        Ok(Self { regions })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl<'de> Deserialize<'de> for RegionMap {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let regions = Vec::<Region>::deserialize(deserializer)?;
        RegionMap::new(regions.into_iter().map(|r| (r.name, r.indices))).map_err(serde::de::Error::custom)
    }
}

impl Default for RegionMap {
    /// The five MediaPipe mask regions.
    fn default() -> Self {
        lookup_preset(DEFAULT_PRESET)
            .map(RegionPreset::region_map)
            .unwrap_or(RegionMap { regions: Vec::new() })
    }
}

/// Top-level preset file structure (one per `contrib/regions/*.toml`).
#[derive(Debug, Clone, Deserialize)]
pub struct RegionPreset {
    pub name: String,
    /// Mesh size the indices refer to.
    pub landmark_count: Option<usize>,
    #[serde(rename = "region")]
    pub regions: Vec<PresetRegion>,
}

/// A `[[region]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PresetRegion {
    pub name: String,
    pub indices: Vec<usize>,
    pub color: Option<String>,
}

impl RegionPreset {
    /// Parse a preset from TOML text, rejecting duplicate region names.
    pub fn from_toml(src: &str) -> Result<Self, RegionError> {
        let preset: RegionPreset = toml::from_str(src)?;
        preset.validate()?;
        Ok(preset)
    }

    /// Load a custom preset from a TOML file.
    pub fn load(path: &Path) -> Result<Self, RegionError> {
        let src = std::fs::read_to_string(path).map_err(|source| RegionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&src)
    }

    fn validate(&self) -> Result<(), RegionError> {
        for (i, r) in self.regions.iter().enumerate() {
            if self.regions[..i].iter().any(|prev| prev.name == r.name) {
                return Err(RegionError::Duplicate(r.name.clone()));
            }
        }
        Ok(())
    }

    pub fn region_map(&self) -> RegionMap {
        RegionMap {
            regions: self
                .regions
                .iter()
                .map(|r| Region {
                    name: r.name.clone(),
                    indices: r.indices.clone(),
                })
                .collect(),
        }
    }

    /// Region colors declared by this preset.
    pub fn palette(&self) -> BTreeMap<String, String> {
        self.regions
            .iter()
            .filter_map(|r| r.color.as_ref().map(|c| (r.name.clone(), c.clone())))
            .collect()
    }
}

fn preset_db() -> &'static Vec<RegionPreset> {
    PRESET_DB.get_or_init(|| {
        let mut db = Vec::new();
        for src in [PRESET_MEDIAPIPE, PRESET_LEGACY] {
            match RegionPreset::from_toml(src) {
                Ok(p) => db.push(p),
                Err(e) => tracing::error!(error = %e, "bad embedded region preset"),
            }
        }
        db
    })
}

/// Look up a built-in preset by name.
pub fn lookup_preset(name: &str) -> Option<&'static RegionPreset> {
    preset_db().iter().find(|p| p.name == name)
}

/// Like [`lookup_preset`], but an unknown name is an error.
pub fn preset(name: &str) -> Result<&'static RegionPreset, RegionError> {
    lookup_preset(name).ok_or_else(|| RegionError::UnknownPreset(name.to_string()))
}

/// List all built-in presets.
pub fn list_presets() -> &'static [RegionPreset] {
    preset_db()
}

/// Colors of the default preset.
pub fn default_palette() -> BTreeMap<String, String> {
    lookup_preset(DEFAULT_PRESET)
        .map(RegionPreset::palette)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_presets_parse() {
        let names: Vec<&str> = list_presets().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["mediapipe", "legacy"]);
    }

    #[test]
    fn test_default_map_order() {
        let map = RegionMap::default();
        let names: Vec<&str> = map.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["forehead", "nose", "left_under_eye", "right_under_eye", "mouth"]
        );
        assert_eq!(map.get(FOREHEAD_REGION).map(|r| r.indices.len()), Some(25));
    }

    #[test]
    fn test_default_palette() {
        let palette = default_palette();
        assert_eq!(palette.get("nose").map(String::as_str), Some("#D4A574"));
        assert_eq!(palette.get("forehead").map(String::as_str), Some("#B695C0"));
        assert_eq!(palette.len(), 5);
    }

    #[test]
    fn test_legacy_preset() {
        let legacy = preset("legacy").unwrap();
        assert_eq!(legacy.regions.len(), 10);
        assert_eq!(legacy.landmark_count, Some(478));
        assert!(legacy.palette().values().all(|c| c.len() == 9));
    }

    #[test]
    fn test_unknown_preset() {
        assert!(matches!(preset("nope"), Err(RegionError::UnknownPreset(_))));
    }

    #[test]
    fn test_duplicate_region_rejected() {
        let src = r#"
            name = "dup"
            [[region]]
            name = "a"
            indices = [1, 2, 3]
            [[region]]
            name = "a"
            indices = [4, 5, 6]
        "#;
        assert!(matches!(RegionPreset::from_toml(src), Err(RegionError::Duplicate(_))));
        assert!(RegionMap::new([("a", vec![1]), ("a", vec![2])]).is_err());
    }

    #[test]
    fn test_region_map_deserialize_rejects_duplicates() {
        let ok: RegionMap =
            serde_json::from_str(r#"[{"name": "a", "indices": [1, 2, 3]}, {"name": "b", "indices": [4]}]"#)
                .unwrap();
        assert_eq!(ok.len(), 2);

        let dup = r#"[{"name": "a", "indices": [1]}, {"name": "a", "indices": [2]}]"#;
        let err = serde_json::from_str::<RegionMap>(dup).unwrap_err();
        assert!(err.to_string().contains("duplicate region name"), "got {err}");
    }

    #[test]
    fn test_region_map_preserves_order() {
        let map = RegionMap::new([("zeta", vec![1, 2, 3]), ("alpha", vec![4, 5, 6])]).unwrap();
        let names: Vec<&str> = map.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }
}
