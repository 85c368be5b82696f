//! Request pipeline: exact cache, then similarity cache, then render.
//!
//! Cache infrastructure is never allowed to fail a request. Store errors on
//! lookup fall through to computation, and store errors on write are logged
//! while the computed result is still returned.

use crate::store::{
    CacheHit, CacheStats, CacheType, EntryStatus, FailureInfo, NewEntry, RecentEntry, ResultCache,
    StoreError,
};
use facemask_core::phash::{self, DEFAULT_HASH_SIZE, DEFAULT_SIMILARITY_THRESHOLD};
use facemask_core::{cache_key, render_mask, LandmarkSet, MaskRequest, MaskResult, RegionMap, RenderConfig, RenderError, ValidationError};
use image::GenericImageView;
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;

pub const DEFAULT_TTL_HOURS: i64 = 24;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid image data: {0}")]
    Input(#[from] image::ImageError),
    #[error("invalid landmarks: {0}")]
    Validation(#[from] ValidationError),
    #[error("render failed: {0}")]
    Compute(#[from] RenderError),
    #[error("cache store: {0}")]
    Store(#[from] StoreError),
}

/// Failure category reported to callers and recorded in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InputError,
    ValidationError,
    ComputeError,
    StoreError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InputError => "InputError",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::ComputeError => "ComputeError",
            ErrorKind::StoreError => "StoreError",
        }
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Input(_) => ErrorKind::InputError,
            PipelineError::Validation(_) => ErrorKind::ValidationError,
            PipelineError::Compute(_) => ErrorKind::ComputeError,
            PipelineError::Store(_) => ErrorKind::StoreError,
        }
    }
}

/// Structured failure body: `{"status":"failed","kind":..,"message":..}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    pub status: &'static str,
    pub kind: ErrorKind,
    pub message: String,
}

impl FailureReport {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: "failed",
            kind,
            message: message.into(),
        }
    }
}

impl From<&PipelineError> for FailureReport {
    fn from(e: &PipelineError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub ttl_hours: i64,
    /// Maximum Hamming distance accepted by the similarity check.
    pub similarity_threshold: u32,
    pub hash_size: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            ttl_hours: DEFAULT_TTL_HOURS,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            hash_size: DEFAULT_HASH_SIZE,
        }
    }
}

/// One render request, already validated.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Encoded image bytes (PNG or JPEG).
    pub image: Vec<u8>,
    pub landmarks: LandmarkSet,
    pub regions: RegionMap,
    pub config: RenderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitOutcome {
    pub task_id: String,
    pub status: EntryStatus,
    #[serde(flatten)]
    pub result: MaskResult,
    /// Time of the original render; cached results report their stored time.
    pub processing_time_ms: f64,
    pub cache_hit: bool,
    pub cache_type: CacheType,
    pub hit_count: u32,
    pub similarity_distance: Option<u32>,
}

impl SubmitOutcome {
    fn from_hit(hit: CacheHit) -> Self {
        Self {
            task_id: hit.task_id,
            status: EntryStatus::Success,
            result: hit.result,
            processing_time_ms: hit.processing_time_ms.unwrap_or(0.0),
            cache_hit: true,
            cache_type: hit.cache_type,
            hit_count: hit.hit_count,
            similarity_distance: hit.distance,
        }
    }
}

pub struct Pipeline<S> {
    store: S,
    settings: PipelineSettings,
}

impl<S: ResultCache> Pipeline<S> {
    pub fn new(store: S, settings: PipelineSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Serve `req` from cache if possible, otherwise render and store it.
    ///
    /// Failed renders are recorded for diagnostics and returned as errors;
    /// a recorded failure never short-circuits a later identical request.
    pub async fn submit(&self, req: &SubmitRequest) -> Result<SubmitOutcome, PipelineError> {
        let exact = cache_key::exact_key(&req.image, &req.landmarks, &req.regions, &req.config);

        match self.store.exact_lookup(&exact).await {
            Ok(Some(hit)) => return Ok(SubmitOutcome::from_hit(hit)),
            Ok(None) => tracing::debug!("exact cache miss"),
            Err(e) => tracing::warn!(error = %e, "exact lookup failed; continuing without cache"),
        }

        let decoded = image::load_from_memory(&req.image);
        let perceptual = match &decoded {
            Ok(img) => phash::phash_image(img, self.settings.hash_size),
            Err(e) => {
                tracing::warn!(error = %e, "image decode failed; perceptual hash falls back to checksum");
                phash::content_checksum(&req.image)
            }
        };
        let variant = cache_key::variant_key(&req.landmarks, &req.regions, &req.config);

        match self
            .store
            .similarity_lookup(&perceptual, self.settings.similarity_threshold, Some(&variant))
            .await
        {
            Ok(Some(hit)) => return Ok(SubmitOutcome::from_hit(hit)),
            Ok(None) => tracing::debug!("similarity cache miss"),
            Err(e) => tracing::warn!(error = %e, "similarity lookup failed; continuing without cache"),
        }

        let task_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let rendered = decoded
            .map_err(PipelineError::from)
            .and_then(|img| {
                let (width, height) = img.dimensions();
                Ok(render_mask(&MaskRequest {
                    landmarks: &req.landmarks,
                    regions: &req.regions,
                    config: &req.config,
                    background: Some(&req.image),
                    width,
                    height,
                })?)
            });
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match rendered {
            Ok(result) => {
                tracing::info!(
                    task = %&task_id[..8],
                    regions = result.regions_detected,
                    elapsed_ms,
                    "mask rendered"
                );
                let entry = NewEntry {
                    task_id: task_id.clone(),
                    exact_key: exact,
                    perceptual_hash: Some(perceptual),
                    variant_key: Some(variant),
                    result: result.clone(),
                    processing_time_ms: elapsed_ms,
                };
                if let Err(e) = self.store.upsert(entry, self.settings.ttl_hours).await {
                    tracing::warn!(error = %e, "failed to store render; returning uncached result");
                }
                Ok(SubmitOutcome {
                    task_id,
                    status: EntryStatus::Success,
                    result,
                    processing_time_ms: elapsed_ms,
                    cache_hit: false,
                    cache_type: CacheType::None,
                    hit_count: 0,
                    similarity_distance: None,
                })
            }
            Err(e) => {
                tracing::error!(task = %&task_id[..8], kind = e.kind().as_str(), error = %e, "render failed");
                let failure = FailureInfo {
                    task_id,
                    error_type: e.kind().as_str().to_string(),
                    error_message: e.to_string(),
                };
                if let Err(store_err) = self.store.record_failure(&exact, failure).await {
                    tracing::warn!(error = %store_err, "failed to record render failure");
                }
                Err(e)
            }
        }
    }

    pub async fn stats(&self, days: u32) -> Result<CacheStats, PipelineError> {
        Ok(self.store.stats(days).await?)
    }

    pub async fn recent(&self, limit: u32) -> Result<Vec<RecentEntry>, PipelineError> {
        Ok(self.store.recent(limit).await?)
    }

    pub async fn cleanup(&self) -> Result<usize, PipelineError> {
        Ok(self.store.cleanup().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CacheStore;
    use facemask_core::Point;
    use image::codecs::jpeg::JpegEncoder;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn face_image() -> RgbImage {
        RgbImage::from_fn(220, 110, |x, y| {
            let v = ((x as f64 * 0.9 + (y as f64 * 0.1).sin() * 40.0) as u32).min(255) as u8;
            Rgb([v, (y * 2) as u8, 150])
        })
    }

    fn jpeg(img: &RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, 90).encode_image(img).unwrap();
        buf
    }

    fn png(img: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    /// 478 points on a 22-column grid, 10 px apart.
    fn grid_landmarks(offset: f64) -> LandmarkSet {
        LandmarkSet::new(
            (0..478)
                .map(|i| Point::new((i % 22) as f64 * 10.0 + offset, (i / 22) as f64 * 5.0 + offset))
                .collect(),
        )
        .unwrap()
    }

    fn request(image: Vec<u8>) -> SubmitRequest {
        SubmitRequest {
            image,
            landmarks: grid_landmarks(0.0),
            regions: RegionMap::default(),
            config: RenderConfig::default(),
        }
    }

    async fn pipeline() -> Pipeline<CacheStore> {
        Pipeline::new(CacheStore::open_in_memory().await.unwrap(), PipelineSettings::default())
    }

    #[tokio::test]
    async fn test_repeat_request_served_from_exact_cache() {
        let pipeline = pipeline().await;
        let req = request(png(&face_image()));

        let first = pipeline.submit(&req).await.unwrap();
        assert!(!first.cache_hit);
        assert_eq!(first.cache_type, CacheType::None);
        assert_eq!(first.result.width, 220);
        assert_eq!(first.result.height, 110);
        assert_eq!(first.result.regions_detected, 5);

        let second = pipeline.submit(&req).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.cache_type, CacheType::Exact);
        assert_eq!(second.hit_count, 1);
        assert_eq!(second.task_id, first.task_id);
        assert_eq!(second.result, first.result);
        assert_eq!(second.processing_time_ms, first.processing_time_ms);
    }

    #[tokio::test]
    async fn test_near_duplicate_served_from_similarity_cache() {
        let pipeline = pipeline().await;
        let original = face_image();
        let mut tweaked = original.clone();
        tweaked.put_pixel(3, 3, Rgb([255, 255, 255]));

        let first = pipeline.submit(&request(png(&original))).await.unwrap();
        let second = pipeline.submit(&request(png(&tweaked))).await.unwrap();

        assert_eq!(second.cache_type, CacheType::Perceptual);
        assert!(second.similarity_distance.unwrap() <= DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(second.task_id, first.task_id);
        // The cached document embeds the first image.
        assert_eq!(second.result.svg, first.result.svg);
    }

    #[tokio::test]
    async fn test_jpeg_reencode_served_from_similarity_cache() {
        let pipeline = pipeline().await;
        let original = face_image();
        let as_png = png(&original);
        let as_jpeg = jpeg(&original);
        assert_ne!(as_png, as_jpeg);

        let first = pipeline.submit(&request(as_png)).await.unwrap();
        assert_eq!(first.cache_type, CacheType::None);
        assert!(first.result.svg.contains("data:image/png;base64,"));

        let second = pipeline.submit(&request(as_jpeg)).await.unwrap();
        assert_eq!(second.cache_type, CacheType::Perceptual, "distance {:?}", second.similarity_distance);
        assert!(second.similarity_distance.unwrap() <= DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(second.task_id, first.task_id);
        assert_eq!(second.hit_count, 1);
    }

    #[tokio::test]
    async fn test_similarity_scoped_to_render_parameters() {
        let pipeline = pipeline().await;
        let original = face_image();
        let mut tweaked = original.clone();
        tweaked.put_pixel(3, 3, Rgb([255, 255, 255]));

        pipeline.submit(&request(png(&original))).await.unwrap();

        let mut other = request(png(&tweaked));
        other.landmarks = grid_landmarks(2.0);
        let outcome = pipeline.submit(&other).await.unwrap();
        assert_eq!(outcome.cache_type, CacheType::None);
    }

    #[tokio::test]
    async fn test_undecodable_image_recorded_as_failure() {
        let pipeline = pipeline().await;
        let req = request(b"not an image at all".to_vec());

        let err = pipeline.submit(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputError);

        let key = cache_key::exact_key(&req.image, &req.landmarks, &req.regions, &req.config);
        let failure = pipeline.store().failure_lookup(&key).await.unwrap().unwrap();
        assert_eq!(failure.error_type, "InputError");

        // Recorded failures do not short-circuit.
        let again = pipeline.submit(&req).await.unwrap_err();
        assert_eq!(again.kind(), ErrorKind::InputError);

        let report = FailureReport::from(&again);
        assert_eq!(report.status, "failed");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "InputError");
    }

    #[tokio::test]
    async fn test_stats_and_recent_passthrough() {
        let pipeline = pipeline().await;
        let req = request(png(&face_image()));
        pipeline.submit(&req).await.unwrap();
        pipeline.submit(&req).await.unwrap();

        let stats = pipeline.stats(7).await.unwrap();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_hit_ratio, 100.0);

        let recent = pipeline.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].hit_count, 1);
        assert_eq!(pipeline.cleanup().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_outcome_serializes_flat() {
        let pipeline = pipeline().await;
        let outcome = pipeline.submit(&request(png(&face_image()))).await.unwrap();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "SUCCESS");
        assert_eq!(json["cache_type"], "none");
        assert!(json["svg"].as_str().unwrap().starts_with("<svg"));
        assert_eq!(json["regions_detected"], 5);
    }

    /// Store whose every operation fails.
    struct BrokenStore;

    fn broken() -> StoreError {
        StoreError::Corrupt("store offline".into())
    }

    impl ResultCache for BrokenStore {
        async fn exact_lookup(&self, _: &str) -> Result<Option<CacheHit>, StoreError> {
            Err(broken())
        }
        async fn similarity_lookup(
            &self,
            _: &str,
            _: u32,
            _: Option<&str>,
        ) -> Result<Option<CacheHit>, StoreError> {
            Err(broken())
        }
        async fn upsert(&self, _: NewEntry, _: i64) -> Result<(), StoreError> {
            Err(broken())
        }
        async fn record_failure(&self, _: &str, _: FailureInfo) -> Result<(), StoreError> {
            Err(broken())
        }
        async fn failure_lookup(&self, _: &str) -> Result<Option<FailureInfo>, StoreError> {
            Err(broken())
        }
        async fn cleanup(&self) -> Result<usize, StoreError> {
            Err(broken())
        }
        async fn stats(&self, _: u32) -> Result<CacheStats, StoreError> {
            Err(broken())
        }
        async fn recent(&self, _: u32) -> Result<Vec<RecentEntry>, StoreError> {
            Err(broken())
        }
    }

    #[tokio::test]
    async fn test_store_outage_does_not_fail_requests() {
        let pipeline = Pipeline::new(BrokenStore, PipelineSettings::default());
        let req = request(png(&face_image()));

        let outcome = pipeline.submit(&req).await.unwrap();
        assert_eq!(outcome.cache_type, CacheType::None);
        assert_eq!(outcome.result.regions_detected, 5);

        // Errors from the request itself still surface.
        let bad = pipeline.submit(&request(vec![0, 1, 2])).await.unwrap_err();
        assert_eq!(bad.kind(), ErrorKind::InputError);

        // Reporting operations surface store errors directly.
        assert_eq!(pipeline.stats(7).await.unwrap_err().kind(), ErrorKind::StoreError);
    }
}
