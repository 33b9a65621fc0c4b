//! 64-bit average perceptual hash.
//!
//! The artifact is downsampled to an 8x8 luma grid; each bit records whether
//! that cell is brighter than the grid mean. Hamming distance between two
//! hashes approximates visual similarity. Stored as i64 to round-trip through
//! a Postgres BIGINT.

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::DynamicImage;

pub fn average_hash(image: &DynamicImage) -> i64 {
    let small = image.resize_exact(8, 8, FilterType::Triangle).to_luma8();
    let pixels: Vec<u64> = small.pixels().map(|p| u64::from(p.0[0])).collect();
    let mean = pixels.iter().sum::<u64>() / pixels.len() as u64;

    let mut bits: u64 = 0;
    for (i, &p) in pixels.iter().enumerate() {
        if p > mean {
            bits |= 1 << i;
        }
    }
    bits as i64
}

pub fn hash_bytes(bytes: &[u8]) -> Result<i64> {
    let image = image::load_from_memory(bytes).context("failed to decode artifact image")?;
    Ok(average_hash(&image))
}

pub fn hamming_distance(a: i64, b: i64) -> u32 {
    (a ^ b).count_ones()
}
