use facemask_cache::PipelineSettings;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite cache database.
    pub db_path: PathBuf,
    /// Lifetime of a successful cache entry, in hours.
    pub ttl_hours: i64,
    /// Maximum Hamming distance for a perceptual cache hit.
    pub similarity_threshold: u32,
    /// Perceptual hash side length (hash has N² bits).
    pub hash_size: u32,
    /// Seconds between expired-entry sweeps; 0 disables the sweep.
    pub cleanup_interval_secs: u64,
    /// Number of landmarks every request must carry.
    pub landmark_count: usize,
    /// Built-in region preset used when a request names none.
    pub region_preset: String,
}

impl Config {
    /// Load configuration from `FACEMASK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let db_path = std::env::var("FACEMASK_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facemask_cache::default_db_path());

        Self {
            db_path,
            ttl_hours: env_i64("FACEMASK_CACHE_TTL_HOURS", facemask_cache::pipeline::DEFAULT_TTL_HOURS),
            similarity_threshold: env_u32(
                "FACEMASK_SIMILARITY_THRESHOLD",
                facemask_core::phash::DEFAULT_SIMILARITY_THRESHOLD,
            ),
            hash_size: env_u32("FACEMASK_HASH_SIZE", facemask_core::phash::DEFAULT_HASH_SIZE),
            cleanup_interval_secs: env_u64("FACEMASK_CLEANUP_INTERVAL_SECS", 3600),
            landmark_count: env_usize("FACEMASK_LANDMARK_COUNT", 478),
            region_preset: std::env::var("FACEMASK_REGION_PRESET")
                .unwrap_or_else(|_| facemask_core::regions::DEFAULT_PRESET.to_string()),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            ttl_hours: self.ttl_hours,
            similarity_threshold: self.similarity_threshold,
            hash_size: self.hash_size,
        }
    }

    /// `None` when the periodic sweep is disabled.
    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_secs > 0).then(|| Duration::from_secs(self.cleanup_interval_secs))
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
