//! JSON body of a `Submit` call.

use base64::Engine as _;
use facemask_cache::{ErrorKind, FailureReport, SubmitRequest};
use facemask_core::regions::{self, RegionError};
use facemask_core::{LandmarkSet, Point, Region, RegionMap, RenderConfig, ValidationError};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("malformed request: {0}")]
    Json(#[from] serde_json::Error),
    #[error("image is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid landmarks: {0}")]
    Landmarks(#[from] ValidationError),
    #[error("invalid regions: {0}")]
    Regions(#[from] RegionError),
}

impl RequestError {
    pub fn report(&self) -> FailureReport {
        let kind = match self {
            RequestError::Json(_) | RequestError::Base64(_) => ErrorKind::InputError,
            RequestError::Landmarks(_) | RequestError::Regions(_) => ErrorKind::ValidationError,
        };
        FailureReport::new(kind, self.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    /// Base64 image, optionally as a `data:image/...;base64,` URL.
    pub image: String,
    pub landmarks: Vec<Point>,
    /// Built-in preset name; ignored when `regions` is given.
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub regions: Option<Vec<Region>>,
    /// Render flags. When absent, colors come from the chosen preset.
    #[serde(default)]
    pub config: Option<RenderConfig>,
}

/// Strip a `data:` URL prefix, if present.
fn base64_payload(image: &str) -> &str {
    if image.starts_with("data:") {
        image.split_once(',').map_or(image, |(_, data)| data)
    } else {
        image
    }
}

impl SubmitBody {
    pub fn parse(json: &str) -> Result<Self, RequestError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validate and resolve into a pipeline request.
    pub fn into_request(self, landmark_count: usize, default_preset: &str) -> Result<SubmitRequest, RequestError> {
        let image = base64::engine::general_purpose::STANDARD.decode(base64_payload(self.image.trim()))?;

        let landmarks = LandmarkSet::new(self.landmarks)?;
        landmarks.expect_len(landmark_count)?;

        let preset = regions::preset(self.preset.as_deref().unwrap_or(default_preset))?;
        let regions = match self.regions {
            Some(custom) => RegionMap::new(custom.into_iter().map(|r| (r.name, r.indices)))?,
            None => preset.region_map(),
        };
        let config = self.config.unwrap_or_else(|| RenderConfig {
            colors: preset.palette(),
            ..RenderConfig::default()
        });

        Ok(SubmitRequest {
            image,
            landmarks,
            regions,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(image: &str, count: usize) -> String {
        let landmarks: Vec<_> = (0..count)
            .map(|i| serde_json::json!({ "x": i as f64, "y": 2.0 * i as f64 }))
            .collect();
        serde_json::json!({ "image": image, "landmarks": landmarks }).to_string()
    }

    #[test]
    fn test_plain_and_data_url_base64() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"pixels");
        for image in [encoded.clone(), format!("data:image/png;base64,{encoded}")] {
            let req = SubmitBody::parse(&body(&image, 478))
                .unwrap()
                .into_request(478, "mediapipe")
                .unwrap();
            assert_eq!(req.image, b"pixels");
            assert_eq!(req.regions.len(), 5);
        }
    }

    #[test]
    fn test_wrong_landmark_count_is_validation_error() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"x");
        let err = SubmitBody::parse(&body(&encoded, 10))
            .unwrap()
            .into_request(478, "mediapipe")
            .unwrap_err();
        assert!(matches!(err, RequestError::Landmarks(_)), "got {err}");
        assert_eq!(err.report().kind, ErrorKind::ValidationError);
    }

    #[test]
    fn test_bad_base64_is_input_error() {
        let err = SubmitBody::parse(&body("***", 478))
            .unwrap()
            .into_request(478, "mediapipe")
            .unwrap_err();
        assert_eq!(err.report().kind, ErrorKind::InputError);
    }

    #[test]
    fn test_negative_coordinate_rejected() {
        let json = serde_json::json!({ "image": "", "landmarks": [{ "x": -1.0, "y": 0.0 }] }).to_string();
        let err = SubmitBody::parse(&json).unwrap().into_request(1, "mediapipe").unwrap_err();
        assert!(matches!(err, RequestError::Landmarks(_)));
    }

    #[test]
    fn test_preset_palette_used_without_config() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"x");
        let mut value: serde_json::Value = serde_json::from_str(&body(&encoded, 478)).unwrap();
        value["preset"] = "legacy".into();
        let req = SubmitBody::parse(&value.to_string())
            .unwrap()
            .into_request(478, "mediapipe")
            .unwrap();
        assert_eq!(req.regions.len(), 10);
        assert_eq!(req.config.colors, regions::preset("legacy").unwrap().palette());
    }

    #[test]
    fn test_custom_regions_and_unknown_preset() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"x");
        let mut value: serde_json::Value = serde_json::from_str(&body(&encoded, 478)).unwrap();
        value["regions"] = serde_json::json!([{ "name": "nose", "indices": [1, 2, 3] }]);
        let req = SubmitBody::parse(&value.to_string())
            .unwrap()
            .into_request(478, "mediapipe")
            .unwrap();
        assert_eq!(req.regions.len(), 1);

        value["preset"] = "nonexistent".into();
        let err = SubmitBody::parse(&value.to_string())
            .unwrap()
            .into_request(478, "mediapipe")
            .unwrap_err();
        assert!(matches!(err, RequestError::Regions(_)));
    }
}
