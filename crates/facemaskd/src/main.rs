use anyhow::{Context, Result};
use facemask_cache::{CacheStore, Pipeline, ResultCache};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod request;

use dbus_interface::{FacemaskService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        db = %config.db_path.display(),
        ttl_hours = config.ttl_hours,
        similarity_threshold = config.similarity_threshold,
        preset = %config.region_preset,
        "facemaskd starting"
    );

    // Fail fast on a misconfigured default preset.
    facemask_core::regions::preset(&config.region_preset)?;

    let store = CacheStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening cache at {}", config.db_path.display()))?;
    let pipeline = Pipeline::new(store.clone(), config.pipeline_settings());
    let service = FacemaskService::new(pipeline, config.landmark_count, config.region_preset.clone());

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering D-Bus service")?;

    match config.cleanup_interval() {
        Some(every) => {
            tokio::spawn(cleanup_loop(store, every));
        }
        None => tracing::info!("periodic cleanup disabled"),
    }

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "facemaskd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facemaskd shutting down");

    Ok(())
}

/// Sweep expired entries on a fixed interval.
async fn cleanup_loop(store: CacheStore, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match store.cleanup().await {
            Ok(0) => tracing::debug!("cleanup sweep: nothing expired"),
            Ok(deleted) => tracing::info!(deleted, "cleanup sweep"),
            Err(e) => tracing::warn!(error = %e, "cleanup sweep failed"),
        }
    }
}
