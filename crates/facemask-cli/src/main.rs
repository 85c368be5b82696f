use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facemask_cache::{CacheStore, FailureReport, Pipeline, PipelineSettings, SubmitRequest};
use facemask_core::phash::{self, DEFAULT_HASH_SIZE, DEFAULT_SIMILARITY_THRESHOLD};
use facemask_core::regions::{self, RegionPreset, DEFAULT_PRESET};
use facemask_core::{render_mask, LandmarkSet, MaskRequest, RenderConfig};
use image::GenericImageView;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facemask", about = "Facial region mask renderer and cache tool")]
struct Cli {
    /// Cache database (default: $XDG_DATA_HOME/facemask/cache.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a mask offline, bypassing the cache
    Render(RenderArgs),
    /// Print the perceptual hash of an image
    Hash {
        image: PathBuf,
        /// Second image to compare against
        #[arg(long)]
        compare: Option<PathBuf>,
        /// Hash side length (N² bits)
        #[arg(long, default_value_t = DEFAULT_HASH_SIZE)]
        size: u32,
    },
    /// Render through the cache
    Submit(RenderArgs),
    /// Show cache statistics
    Stats {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// List recent cache entries
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Delete expired cache entries
    Cleanup,
    /// List built-in region presets
    Presets,
    /// Show daemon status
    Status,
}

#[derive(Args)]
struct RenderArgs {
    /// Input image (PNG or JPEG)
    #[arg(short, long)]
    image: PathBuf,
    /// JSON array of {"x": .., "y": ..} landmarks
    #[arg(short, long)]
    landmarks: PathBuf,
    /// Built-in region preset
    #[arg(long, default_value = DEFAULT_PRESET)]
    preset: String,
    /// Custom region TOML file (overrides --preset)
    #[arg(long)]
    regions: Option<PathBuf>,
    /// Omit region number labels
    #[arg(long)]
    no_labels: bool,
    #[arg(long)]
    opacity: Option<f64>,
    #[arg(long, default_value_t = 0)]
    stroke_width: u32,
    /// Skip regions without an explicit color
    #[arg(long)]
    no_fallback: bool,
    /// Write the SVG here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl RenderArgs {
    fn load(&self) -> Result<SubmitRequest> {
        let image = std::fs::read(&self.image)
            .with_context(|| format!("reading {}", self.image.display()))?;
        let landmarks_json = std::fs::read_to_string(&self.landmarks)
            .with_context(|| format!("reading {}", self.landmarks.display()))?;
        let landmarks: LandmarkSet =
            serde_json::from_str(&landmarks_json).context("parsing landmarks")?;

        let preset = match &self.regions {
            Some(path) => RegionPreset::load(path)?,
            None => regions::preset(&self.preset)?.clone(),
        };
        if let Some(expected) = preset.landmark_count {
            landmarks.expect_len(expected)?;
        }

        let mut config = RenderConfig {
            show_labels: !self.no_labels,
            stroke_width: self.stroke_width,
            colors: preset.palette(),
            ..RenderConfig::default()
        };
        if let Some(opacity) = self.opacity {
            config.opacity = opacity;
        }
        if self.no_fallback {
            config.fallback_color = None;
        }

        Ok(SubmitRequest {
            image,
            landmarks,
            regions: preset.region_map(),
            config,
        })
    }

    fn write_svg(&self, svg: &str) -> Result<()> {
        match &self.output {
            Some(path) => {
                std::fs::write(path, svg).with_context(|| format!("writing {}", path.display()))?;
                eprintln!("wrote {}", path.display());
            }
            None => println!("{svg}"),
        }
        Ok(())
    }
}

#[zbus::proxy(
    interface = "org.facemask.Mask1",
    default_service = "org.facemask.Mask1",
    default_path = "/org/facemask/Mask1"
)]
trait Mask {
    async fn status(&self) -> zbus::Result<String>;
}

async fn open_store(db: Option<&Path>) -> Result<CacheStore> {
    let path = db.map(Path::to_path_buf).unwrap_or_else(facemask_cache::default_db_path);
    CacheStore::open(&path)
        .await
        .with_context(|| format!("opening cache at {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render(args) => {
            let req = args.load()?;
            let decoded = image::load_from_memory(&req.image).context("decoding image")?;
            let (width, height) = decoded.dimensions();
            let result = render_mask(&MaskRequest {
                landmarks: &req.landmarks,
                regions: &req.regions,
                config: &req.config,
                background: Some(&req.image),
                width,
                height,
            })?;
            eprintln!("{} regions rendered ({width}x{height})", result.regions_detected);
            args.write_svg(&result.svg)?;
        }
        Commands::Hash { image, compare, size } => {
            let bytes = std::fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
            let hash = phash::phash_bytes(&bytes, size);
            println!("{hash}  {}", image.display());
            if let Some(other) = compare {
                let other_bytes =
                    std::fs::read(&other).with_context(|| format!("reading {}", other.display()))?;
                let other_hash = phash::phash_bytes(&other_bytes, size);
                println!("{other_hash}  {}", other.display());
                let distance = phash::hamming_distance(&hash, &other_hash);
                let similar = distance <= DEFAULT_SIMILARITY_THRESHOLD;
                println!("distance: {distance} ({})", if similar { "similar" } else { "different" });
            }
        }
        Commands::Submit(args) => {
            let req = args.load()?;
            let store = open_store(cli.db.as_deref()).await?;
            let pipeline = Pipeline::new(store, PipelineSettings::default());
            match pipeline.submit(&req).await {
                Ok(outcome) => {
                    eprintln!(
                        "task {} cache={:?} hits={} time={:.2}ms",
                        outcome.task_id, outcome.cache_type, outcome.hit_count, outcome.processing_time_ms
                    );
                    if let Some(d) = outcome.similarity_distance {
                        eprintln!("similarity distance: {d}");
                    }
                    args.write_svg(&outcome.result.svg)?;
                }
                Err(e) => {
                    print_json(&FailureReport::from(&e))?;
                    std::process::exit(1);
                }
            }
        }
        Commands::Stats { days } => {
            let pipeline = Pipeline::new(open_store(cli.db.as_deref()).await?, PipelineSettings::default());
            print_json(&pipeline.stats(days).await?)?;
        }
        Commands::Recent { limit } => {
            let pipeline = Pipeline::new(open_store(cli.db.as_deref()).await?, PipelineSettings::default());
            let entries = pipeline.recent(limit).await?;
            if entries.is_empty() {
                println!("No cache entries");
            }
            for e in entries {
                println!(
                    "{}  {:?}  {}  hits={}  regions={}  {}",
                    e.task_id,
                    e.status,
                    e.submitted_at.format("%Y-%m-%d %H:%M:%S"),
                    e.hit_count,
                    e.regions_detected.map_or("-".to_string(), |r| r.to_string()),
                    e.error_type.as_deref().unwrap_or(""),
                );
            }
        }
        Commands::Cleanup => {
            let pipeline = Pipeline::new(open_store(cli.db.as_deref()).await?, PipelineSettings::default());
            let deleted = pipeline.cleanup().await?;
            println!("Removed {deleted} expired entries");
        }
        Commands::Presets => {
            for p in regions::list_presets() {
                let names: Vec<&str> = p.regions.iter().map(|r| r.name.as_str()).collect();
                println!("{}  ({} regions): {}", p.name, names.len(), names.join(", "));
            }
        }
        Commands::Status => {
            let conn = zbus::Connection::session().await?;
            let proxy = MaskProxy::new(&conn).await?;
            match proxy.status().await {
                Ok(status) => println!("{status}"),
                Err(e) => {
                    tracing::debug!(error = %e, "status call failed");
                    println!("facemaskd: not connected");
                }
            }
        }
    }

    Ok(())
}
