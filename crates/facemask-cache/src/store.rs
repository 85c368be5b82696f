//! Persistent render cache on SQLite.
//!
//! One row per exact key. Rows are created on the first successful render
//! (or first recorded failure), overwritten in place on re-submission,
//! touched on every hit, and removed only by [`ResultCache::cleanup`] once
//! their TTL has passed. Timestamps are stored as UTC epoch milliseconds.

use chrono::{DateTime, Utc};
use facemask_core::phash::hamming_distance;
use facemask_core::MaskResult;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    id                  TEXT PRIMARY KEY,
    task_id             TEXT NOT NULL UNIQUE,
    exact_key           TEXT NOT NULL UNIQUE,
    perceptual_hash     TEXT,
    variant_key         TEXT,
    status              TEXT NOT NULL,
    created_at          INTEGER NOT NULL,
    completed_at        INTEGER,
    processing_time_ms  REAL,
    result_payload      TEXT,
    regions_detected    INTEGER,
    error_type          TEXT,
    error_message       TEXT,
    hit_count           INTEGER NOT NULL DEFAULT 0,
    last_accessed       INTEGER NOT NULL,
    ttl_expires_at      INTEGER
);
CREATE INDEX IF NOT EXISTS idx_cache_entries_perceptual ON cache_entries (perceptual_hash, status);
CREATE INDEX IF NOT EXISTS idx_cache_entries_created ON cache_entries (created_at);
CREATE INDEX IF NOT EXISTS idx_cache_entries_ttl ON cache_entries (ttl_expires_at);
"#;

const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("result payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("failed to create database directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt cache row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Success,
    Failure,
}

impl EntryStatus {
    fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Success => "SUCCESS",
            EntryStatus::Failure => "FAILURE",
        }
    }

    fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "SUCCESS" => Ok(EntryStatus::Success),
            "FAILURE" => Ok(EntryStatus::Failure),
            other => Err(StoreError::Corrupt(format!("unknown status {other:?}"))),
        }
    }
}

/// How a request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    Exact,
    Perceptual,
    None,
}

/// A cached render returned by a lookup.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub task_id: String,
    pub result: MaskResult,
    pub processing_time_ms: Option<f64>,
    /// Hit count after this hit was recorded.
    pub hit_count: u32,
    pub cache_type: CacheType,
    /// Hamming distance for perceptual hits.
    pub distance: Option<u32>,
}

/// A successful render to be stored.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub task_id: String,
    pub exact_key: String,
    pub perceptual_hash: Option<String>,
    /// Render-parameter digest that scopes similarity search.
    pub variant_key: Option<String>,
    pub result: MaskResult,
    pub processing_time_ms: f64,
}

/// Negative-cache record for an input that failed to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureInfo {
    pub task_id: String,
    pub error_type: String,
    pub error_message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEfficiency {
    Excellent,
    Good,
    NeedsImprovement,
}

impl CacheEfficiency {
    /// `ratio` is a percentage.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio > 70.0 {
            CacheEfficiency::Excellent
        } else if ratio > 40.0 {
            CacheEfficiency::Good
        } else {
            CacheEfficiency::NeedsImprovement
        }
    }
}

/// Aggregate report over entries created within a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub period_days: u32,
    pub total_requests: u64,
    /// Entries served from cache at least once.
    pub cache_hits: u64,
    /// Percentage, 2 decimals.
    pub cache_hit_ratio: f64,
    pub successful_tasks: u64,
    pub avg_processing_time_ms: f64,
    /// All-time success entries.
    pub total_cached_entries: u64,
    pub cache_efficiency: CacheEfficiency,
}

/// Summary row for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentEntry {
    /// First 8 characters of the task id.
    pub task_id: String,
    pub status: EntryStatus,
    pub submitted_at: DateTime<Utc>,
    pub processing_time_ms: Option<f64>,
    pub regions_detected: Option<u32>,
    pub hit_count: u32,
    pub error_type: Option<String>,
}

/// Store operations the request pipeline depends on.
#[allow(async_fn_in_trait)]
pub trait ResultCache {
    /// Successful, unexpired entry for `key`; records the hit.
    async fn exact_lookup(&self, key: &str) -> Result<Option<CacheHit>, StoreError>;

    /// Closest successful, unexpired entry by perceptual hash, if within
    /// `threshold`; records the hit. `scope` restricts candidates to one
    /// variant key. Linear in the number of candidates.
    async fn similarity_lookup(
        &self,
        perceptual_hash: &str,
        threshold: u32,
        scope: Option<&str>,
    ) -> Result<Option<CacheHit>, StoreError>;

    /// Insert or overwrite by exact key. Resets TTL and last access; keeps hit count.
    async fn upsert(&self, entry: NewEntry, ttl_hours: i64) -> Result<(), StoreError>;

    /// Write a failure entry (no payload, no TTL) for `exact_key`.
    async fn record_failure(&self, exact_key: &str, failure: FailureInfo) -> Result<(), StoreError>;

    async fn failure_lookup(&self, exact_key: &str) -> Result<Option<FailureInfo>, StoreError>;

    /// Delete entries whose TTL has passed; returns the number removed.
    async fn cleanup(&self) -> Result<usize, StoreError>;

    async fn stats(&self, days: u32) -> Result<CacheStats, StoreError>;

    /// Newest entries first.
    async fn recent(&self, limit: u32) -> Result<Vec<RecentEntry>, StoreError>;
}

/// Raw columns of a hit, decoded outside the database thread.
struct HitRow {
    task_id: String,
    payload: String,
    processing_time_ms: Option<f64>,
    hit_count: i64,
}

const HIT_COLUMNS: &str = "task_id, result_payload, processing_time_ms, hit_count";

fn read_hit(row: &rusqlite::Row<'_>) -> rusqlite::Result<HitRow> {
    Ok(HitRow {
        task_id: row.get(0)?,
        payload: row.get(1)?,
        processing_time_ms: row.get(2)?,
        hit_count: row.get(3)?,
    })
}

impl HitRow {
    fn into_hit(self, cache_type: CacheType, distance: Option<u32>) -> Result<CacheHit, StoreError> {
        Ok(CacheHit {
            task_id: self.task_id,
            result: serde_json::from_str(&self.payload)?,
            processing_time_ms: self.processing_time_ms,
            hit_count: u32::try_from(self.hit_count).unwrap_or(u32::MAX),
            cache_type,
            distance,
        })
    }
}

fn timestamp(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// SQLite-backed [`ResultCache`]. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct CacheStore {
    conn: Connection,
}

impl CacheStore {
    /// Open (creating if needed) a cache database file in WAL mode.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path).await?;
        conn.call(|c| {
            let mode: String =
                c.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            tracing::debug!(journal_mode = %mode, "cache database opened");
            c.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        tracing::info!(path = %path.display(), "cache store ready");
        Ok(Self { conn })
    }

    /// Private in-memory database, for tests and one-shot CLI use.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|c| {
            c.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    async fn exact_lookup_at(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheHit>, StoreError> {
        let key = key.to_owned();
        let now_ms = now.timestamp_millis();
        let row = self
            .conn
            .call(move |c| {
                let tx = c.transaction()?;
                let touched = tx.execute(
                    "UPDATE cache_entries SET hit_count = hit_count + 1, last_accessed = ?2
                     WHERE exact_key = ?1 AND status = 'SUCCESS' AND result_payload IS NOT NULL
                       AND (ttl_expires_at IS NULL OR ttl_expires_at > ?2)",
                    params![key, now_ms],
                )?;
                let row = if touched == 0 {
                    None
                } else {
                    tx.query_row(
                        &format!("SELECT {HIT_COLUMNS} FROM cache_entries WHERE exact_key = ?1"),
                        params![key],
                        read_hit,
                    )
                    .optional()?
                };
                tx.commit()?;
                Ok(row)
            })
            .await?;

        match row {
            Some(row) => {
                let hit = row.into_hit(CacheType::Exact, None)?;
                tracing::info!(task = %key_prefix(&hit.task_id), hits = hit.hit_count, "exact cache hit");
                Ok(Some(hit))
            }
            None => Ok(None),
        }
    }

    async fn similarity_lookup_at(
        &self,
        perceptual_hash: &str,
        threshold: u32,
        scope: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheHit>, StoreError> {
        let query = perceptual_hash.to_owned();
        let scope = scope.map(str::to_owned);
        let now_ms = now.timestamp_millis();

        let found = self
            .conn
            .call(move |c| {
                let tx = c.transaction()?;
                let best = {
                    let mut stmt = tx.prepare(
                        "SELECT id, perceptual_hash FROM cache_entries
                         WHERE status = 'SUCCESS' AND perceptual_hash IS NOT NULL
                           AND result_payload IS NOT NULL
                           AND (ttl_expires_at IS NULL OR ttl_expires_at > ?1)
                           AND (?2 IS NULL OR variant_key = ?2)
                         ORDER BY created_at",
                    )?;
                    let rows = stmt.query_map(params![now_ms, scope], |r| {
                        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
                    })?;

                    let mut best: Option<(String, u32)> = None;
                    let mut scanned = 0usize;
                    for row in rows {
                        let (id, hash) = row?;
                        scanned += 1;
                        let distance = hamming_distance(&query, &hash);
                        if best.as_ref().map_or(true, |(_, d)| distance < *d) {
                            best = Some((id, distance));
                        }
                    }
                    tracing::debug!(scanned, best = ?best.as_ref().map(|b| b.1), "perceptual scan");
                    best
                };

                let Some((id, distance)) = best.filter(|(_, d)| *d <= threshold) else {
                    return Ok(None);
                };
                tx.execute(
                    "UPDATE cache_entries SET hit_count = hit_count + 1, last_accessed = ?2 WHERE id = ?1",
                    params![id, now_ms],
                )?;
                let row = tx.query_row(
                    &format!("SELECT {HIT_COLUMNS} FROM cache_entries WHERE id = ?1"),
                    params![id],
                    read_hit,
                )?;
                tx.commit()?;
                Ok(Some((row, distance)))
            })
            .await?;

        match found {
            Some((row, distance)) => {
                let hit = row.into_hit(CacheType::Perceptual, Some(distance))?;
                tracing::info!(distance, threshold, hits = hit.hit_count, "perceptual cache hit");
                Ok(Some(hit))
            }
            None => Ok(None),
        }
    }

    async fn upsert_at(&self, entry: NewEntry, ttl_hours: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&entry.result)?;
        let now_ms = now.timestamp_millis();
        let ttl_ms = now_ms.saturating_add(ttl_hours.saturating_mul(MS_PER_HOUR));
        let id = uuid::Uuid::new_v4().to_string();
        let regions = entry.result.regions_detected;
        let key = entry.exact_key.clone();

        self.conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO cache_entries (
                        id, task_id, exact_key, perceptual_hash, variant_key, status,
                        created_at, completed_at, processing_time_ms, result_payload,
                        regions_detected, error_type, error_message, hit_count,
                        last_accessed, ttl_expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?11, ?6, ?6, ?7, ?8, ?9, NULL, NULL, 0, ?6, ?10)
                     ON CONFLICT(exact_key) DO UPDATE SET
                        perceptual_hash = excluded.perceptual_hash,
                        variant_key = excluded.variant_key,
                        status = excluded.status,
                        completed_at = excluded.completed_at,
                        processing_time_ms = excluded.processing_time_ms,
                        result_payload = excluded.result_payload,
                        regions_detected = excluded.regions_detected,
                        error_type = NULL,
                        error_message = NULL,
                        last_accessed = excluded.last_accessed,
                        ttl_expires_at = excluded.ttl_expires_at",
                    params![
                        id,
                        entry.task_id,
                        entry.exact_key,
                        entry.perceptual_hash,
                        entry.variant_key,
                        now_ms,
                        entry.processing_time_ms,
                        payload,
                        regions,
                        ttl_ms,
                        EntryStatus::Success.as_str(),
                    ],
                )?;
                Ok(())
            })
            .await?;

        tracing::info!(key = %key_prefix(&key), ttl_hours, "cache entry stored");
        Ok(())
    }

    async fn record_failure_at(
        &self,
        exact_key: &str,
        failure: FailureInfo,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let key = exact_key.to_owned();
        let now_ms = now.timestamp_millis();
        let id = uuid::Uuid::new_v4().to_string();
        let error_type = failure.error_type.clone();

        self.conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO cache_entries (
                        id, task_id, exact_key, status, created_at, completed_at,
                        error_type, error_message, hit_count, last_accessed, ttl_expires_at)
                     VALUES (?1, ?2, ?3, ?7, ?4, ?4, ?5, ?6, 0, ?4, NULL)
                     ON CONFLICT(exact_key) DO UPDATE SET
                        status = excluded.status,
                        completed_at = excluded.completed_at,
                        result_payload = NULL,
                        regions_detected = NULL,
                        error_type = excluded.error_type,
                        error_message = excluded.error_message,
                        ttl_expires_at = NULL",
                    params![
                        id,
                        failure.task_id,
                        key,
                        now_ms,
                        failure.error_type,
                        failure.error_message,
                        EntryStatus::Failure.as_str(),
                    ],
                )?;
                Ok(())
            })
            .await?;

        tracing::warn!(key = %key_prefix(exact_key), error_type = %error_type, "failure recorded");
        Ok(())
    }

    async fn cleanup_at(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let now_ms = now.timestamp_millis();
        let deleted = self
            .conn
            .call(move |c| {
                Ok(c.execute(
                    "DELETE FROM cache_entries WHERE ttl_expires_at IS NOT NULL AND ttl_expires_at < ?1",
                    params![now_ms],
                )?)
            })
            .await?;
        if deleted > 0 {
            tracing::info!(deleted, "expired cache entries removed");
        }
        Ok(deleted)
    }

    async fn stats_at(&self, days: u32, now: DateTime<Utc>) -> Result<CacheStats, StoreError> {
        let since_ms = now.timestamp_millis() - i64::from(days) * MS_PER_DAY;
        let (total, hits, successes, avg, all_time) = self
            .conn
            .call(move |c| {
                let (total, hits, successes, avg) = c.query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(CASE WHEN hit_count > 0 THEN 1 ELSE 0 END), 0),
                            COALESCE(SUM(CASE WHEN status = 'SUCCESS' THEN 1 ELSE 0 END), 0),
                            AVG(CASE WHEN status = 'SUCCESS' THEN processing_time_ms END)
                     FROM cache_entries WHERE created_at >= ?1",
                    params![since_ms],
                    |r| {
                        Ok((
                            r.get::<_, i64>(0)?,
                            r.get::<_, i64>(1)?,
                            r.get::<_, i64>(2)?,
                            r.get::<_, Option<f64>>(3)?,
                        ))
                    },
                )?;
                let all_time: i64 = c.query_row(
                    "SELECT COUNT(*) FROM cache_entries WHERE status = 'SUCCESS'",
                    [],
                    |r| r.get(0),
                )?;
                Ok((total, hits, successes, avg, all_time))
            })
            .await?;

        let ratio = if total > 0 {
            hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Ok(CacheStats {
            period_days: days,
            total_requests: total.max(0) as u64,
            cache_hits: hits.max(0) as u64,
            cache_hit_ratio: round2(ratio),
            successful_tasks: successes.max(0) as u64,
            avg_processing_time_ms: round2(avg.unwrap_or(0.0)),
            total_cached_entries: all_time.max(0) as u64,
            cache_efficiency: CacheEfficiency::from_ratio(ratio),
        })
    }
}

/// Short, log-friendly prefix of a key or id.
fn key_prefix(key: &str) -> String {
    key.chars().take(12).collect()
}

impl ResultCache for CacheStore {
    async fn exact_lookup(&self, key: &str) -> Result<Option<CacheHit>, StoreError> {
        self.exact_lookup_at(key, Utc::now()).await
    }

    async fn similarity_lookup(
        &self,
        perceptual_hash: &str,
        threshold: u32,
        scope: Option<&str>,
    ) -> Result<Option<CacheHit>, StoreError> {
        self.similarity_lookup_at(perceptual_hash, threshold, scope, Utc::now())
            .await
    }

    async fn upsert(&self, entry: NewEntry, ttl_hours: i64) -> Result<(), StoreError> {
        self.upsert_at(entry, ttl_hours, Utc::now()).await
    }

    async fn record_failure(&self, exact_key: &str, failure: FailureInfo) -> Result<(), StoreError> {
        self.record_failure_at(exact_key, failure, Utc::now()).await
    }

    async fn failure_lookup(&self, exact_key: &str) -> Result<Option<FailureInfo>, StoreError> {
        let key = exact_key.to_owned();
        Ok(self
            .conn
            .call(move |c| {
                Ok(c.query_row(
                    "SELECT task_id, COALESCE(error_type, ''), COALESCE(error_message, '')
                     FROM cache_entries WHERE exact_key = ?1 AND status = 'FAILURE'",
                    params![key],
                    |r| {
                        Ok(FailureInfo {
                            task_id: r.get(0)?,
                            error_type: r.get(1)?,
                            error_message: r.get(2)?,
                        })
                    },
                )
                .optional()?)
            })
            .await?)
    }

    async fn cleanup(&self) -> Result<usize, StoreError> {
        self.cleanup_at(Utc::now()).await
    }

    async fn stats(&self, days: u32) -> Result<CacheStats, StoreError> {
        self.stats_at(days, Utc::now()).await
    }

    async fn recent(&self, limit: u32) -> Result<Vec<RecentEntry>, StoreError> {
        let rows = self
            .conn
            .call(move |c| {
                let mut stmt = c.prepare(
                    "SELECT task_id, status, created_at, processing_time_ms, regions_detected,
                            hit_count, error_type
                     FROM cache_entries ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit], |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, i64>(2)?,
                            r.get::<_, Option<f64>>(3)?,
                            r.get::<_, Option<i64>>(4)?,
                            r.get::<_, i64>(5)?,
                            r.get::<_, Option<String>>(6)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(task_id, status, created, time, regions, hits, error_type)| {
                Ok(RecentEntry {
                    task_id: task_id.chars().take(8).collect(),
                    status: EntryStatus::parse(&status)?,
                    submitted_at: timestamp(created)?,
                    processing_time_ms: time,
                    regions_detected: regions.and_then(|r| u32::try_from(r).ok()),
                    hit_count: u32::try_from(hits).unwrap_or(u32::MAX),
                    error_type,
                })
            })
            .collect()
    }
}
