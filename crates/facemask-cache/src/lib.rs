//! facemask-cache — Persistent render cache and request pipeline.
//!
//! [`CacheStore`] keeps rendered masks in SQLite, keyed by an exact content
//! key and searchable by perceptual hash. [`Pipeline`] puts it in front of
//! the renderer.

pub mod pipeline;
pub mod store;

pub use pipeline::{
    ErrorKind, FailureReport, Pipeline, PipelineError, PipelineSettings, SubmitOutcome,
    SubmitRequest,
};
pub use store::{
    CacheEfficiency, CacheHit, CacheStats, CacheStore, CacheType, EntryStatus, FailureInfo,
    NewEntry, RecentEntry, ResultCache, StoreError,
};

use std::path::PathBuf;

/// `$XDG_DATA_HOME/facemask/cache.db`, falling back to `~/.local/share`.
pub fn default_db_path() -> PathBuf {
    let data_home = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    data_home.join("facemask").join("cache.db")
}
