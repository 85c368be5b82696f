use crate::request::SubmitBody;
use facemask_cache::{CacheStore, FailureReport, Pipeline};
use std::time::Instant;
use zbus::interface;

pub const BUS_NAME: &str = "org.facemask.Mask1";
pub const OBJECT_PATH: &str = "/org/facemask/Mask1";

/// D-Bus interface for the facemask render daemon.
///
/// Bus name: org.facemask.Mask1
/// Object path: /org/facemask/Mask1
pub struct FacemaskService {
    pipeline: Pipeline<CacheStore>,
    landmark_count: usize,
    region_preset: String,
    started: Instant,
}

impl FacemaskService {
    pub fn new(pipeline: Pipeline<CacheStore>, landmark_count: usize, region_preset: String) -> Self {
        Self {
            pipeline,
            landmark_count,
            region_preset,
            started: Instant::now(),
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.facemask.Mask1")]
impl FacemaskService {
    /// Render (or fetch from cache) a mask for a JSON request.
    ///
    /// Returns the outcome JSON, or a `{"status":"failed",...}` report when
    /// the request itself is bad or rendering fails.
    async fn submit(&self, request: &str) -> zbus::fdo::Result<String> {
        let req = match SubmitBody::parse(request)
            .and_then(|body| body.into_request(self.landmark_count, &self.region_preset))
        {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!(error = %e, "rejected submit request");
                return to_json(&e.report());
            }
        };

        match self.pipeline.submit(&req).await {
            Ok(outcome) => {
                tracing::info!(
                    task = %outcome.task_id,
                    cache_type = ?outcome.cache_type,
                    "submit complete"
                );
                to_json(&outcome)
            }
            Err(e) => to_json(&FailureReport::from(&e)),
        }
    }

    /// Cache statistics over the last `days` days.
    async fn stats(&self, days: u32) -> zbus::fdo::Result<String> {
        let stats = self
            .pipeline
            .stats(days)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        to_json(&stats)
    }

    /// Most recent cache entries, newest first.
    async fn recent(&self, limit: u32) -> zbus::fdo::Result<String> {
        let entries = self
            .pipeline
            .recent(limit)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        to_json(&entries)
    }

    /// Remove expired entries now; returns how many were deleted.
    async fn cleanup(&self) -> zbus::fdo::Result<u64> {
        tracing::info!("cleanup requested");
        let deleted = self
            .pipeline
            .cleanup()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(deleted as u64)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let settings = self.pipeline.settings();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": self.started.elapsed().as_secs(),
            "region_preset": self.region_preset,
            "landmark_count": self.landmark_count,
            "ttl_hours": settings.ttl_hours,
            "similarity_threshold": settings.similarity_threshold,
            "hash_size": settings.hash_size,
        })
        .to_string())
    }
}
