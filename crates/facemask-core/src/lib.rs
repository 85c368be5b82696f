//! facemask-core — Facial region mask rendering and cache fingerprints.
//!
//! Turns a facial landmark mesh into an SVG overlay of colored,
//! semi-transparent region masks, and computes the exact and perceptual
//! fingerprints used to cache those renders.

pub mod cache_key;
pub mod forehead;
pub mod path;
pub mod phash;
pub mod regions;
pub mod renderer;
pub mod types;

pub use regions::{Region, RegionMap, RegionPreset};
pub use renderer::{render_mask, MaskRequest, RenderError};
pub use types::{LandmarkSet, MaskResult, Point, RegionContour, RenderConfig, ValidationError};
