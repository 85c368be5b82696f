//! Perceptual image hashing (DCT pHash) and Hamming distance.
//!
//! The image is converted to grayscale, resized to 4N×4N with a Lanczos
//! filter, transformed with a 2D DCT-II, and the top-left N×N low-frequency
//! block is thresholded against its median. Bits are packed row-major into a
//! hex string (N² bits, 16 hex chars for the default N = 8).

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array2;
use sha2::{Digest, Sha256};
use std::f64::consts::PI;

pub const DEFAULT_HASH_SIZE: u32 = 8;
/// Maximum Hamming distance (of 64 bits) still considered "similar".
pub const DEFAULT_SIMILARITY_THRESHOLD: u32 = 10;
const RESIZE_FACTOR: u32 = 4;

/// Hex SHA-256 of raw bytes.
pub fn content_checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// DCT-II basis rows `0..rows` for a signal of length `n`.
///
/// `C[k][i] = 2·cos(π·k·(2i+1) / 2n)` (unnormalized, as in the usual
/// type-II definition).
fn dct_basis(rows: usize, n: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, n), |(k, i)| {
        2.0 * (PI * k as f64 * (2 * i + 1) as f64 / (2 * n) as f64).cos()
    })
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Pack a bit sequence into hex, left-padding to a whole number of nibbles.
fn bits_to_hex(bits: &[bool]) -> String {
    let pad = (4 - bits.len() % 4) % 4;
    let padded: Vec<bool> = std::iter::repeat(false).take(pad).chain(bits.iter().copied()).collect();
    padded
        .chunks(4)
        .map(|nibble| {
            let v = nibble.iter().fold(0u32, |acc, &b| (acc << 1) | b as u32);
            char::from_digit(v, 16).unwrap_or('0')
        })
        .collect()
}

/// Perceptual hash of an already-decoded image.
pub fn phash_image(image: &DynamicImage, hash_size: u32) -> String {
    let n = hash_size.max(1) as usize;
    let side = hash_size.max(1) * RESIZE_FACTOR;
    let gray = image::imageops::resize(&image.to_luma8(), side, side, FilterType::Lanczos3);

    let m = side as usize;
    let pixels = Array2::from_shape_fn((m, m), |(y, x)| gray.get_pixel(x as u32, y as u32).0[0] as f64);

    // Only the low-frequency corner is needed: C_n · X · C_nᵀ.
    let basis = dct_basis(n, m);
    let low = basis.dot(&pixels).dot(&basis.t());

    let mut coeffs: Vec<f64> = low.iter().copied().collect();
    let threshold = median(&mut coeffs);
    let bits: Vec<bool> = low.iter().map(|&c| c > threshold).collect();
    bits_to_hex(&bits)
}

/// Perceptual hash of encoded image bytes.
///
/// Undecodable input degrades to [`content_checksum`] of the raw bytes; the
/// result is still a usable (exact-only) fingerprint, since its length never
/// matches a real pHash.
pub fn phash_bytes(bytes: &[u8], hash_size: u32) -> String {
    match image::load_from_memory(bytes) {
        Ok(img) => phash_image(&img, hash_size),
        Err(e) => {
            tracing::warn!(error = %e, "image decode failed; falling back to content checksum");
            content_checksum(bytes)
        }
    }
}

/// Number of differing bits between two hex hashes.
///
/// Hashes of different length (or containing non-hex characters) are
/// maximally distant: `4 × max(len)`.
pub fn hamming_distance(a: &str, b: &str) -> u32 {
    let sentinel = 4 * a.len().max(b.len()) as u32;
    if a.len() != b.len() {
        return sentinel;
    }
    let mut distance = 0;
    for (ca, cb) in a.chars().zip(b.chars()) {
        match (ca.to_digit(16), cb.to_digit(16)) {
            (Some(x), Some(y)) => distance += (x ^ y).count_ones(),
            _ => return sentinel,
        }
    }
    distance
}

pub fn is_similar(a: &str, b: &str, threshold: u32) -> bool {
    hamming_distance(a, b) <= threshold
}
