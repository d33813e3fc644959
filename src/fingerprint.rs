use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use img_hash::{HashAlg, HasherConfig};
use memmap2::MmapOptions;
use sha2::{Digest, Sha256};

use crate::error::DeepSeeError;

const MMAP_THRESHOLD: u64 = 500 * 1024 * 1024; // 500 MB

/// Content + perceptual hash pair identifying one image.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    /// SHA-256 over the raw file bytes, lowercase hex.
    pub content_hash: String,
    /// 64-bit gradient hash over the decoded pixels, lowercase hex.
    pub perceptual_hash: String,
}

pub fn fingerprint(path: &Path) -> Result<Fingerprint, DeepSeeError> {
    if !path.exists() {
        return Err(DeepSeeError::NotFound(path.to_path_buf()));
    }
    Ok(Fingerprint {
        content_hash: content_hash(path)?,
        perceptual_hash: perceptual_hash(path)?,
    })
}

/// SHA-256 of the file contents, read in fixed-size chunks. Large files are
/// memory-mapped instead of streamed.
pub fn content_hash(path: &Path) -> Result<String, DeepSeeError> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();

    let mut hasher = Sha256::new();

    if len > MMAP_THRESHOLD {
        // We trust the filesystem not to truncate the file under our feet.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        hasher.update(&mmap);
    } else {
        let mut reader = BufReader::new(file);
        let mut buffer = [0u8; 8192];
        loop {
            let count = reader.read(&mut buffer)?;
            if count == 0 {
                break;
            }
            hasher.update(&buffer[..count]);
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Gradient perceptual hash of the decoded image, 8x8 (64 bits).
pub fn perceptual_hash(path: &Path) -> Result<String, DeepSeeError> {
    let img = image::open(path).map_err(|e| DeepSeeError::ImageDecode(e.to_string()))?;
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Gradient)
        .hash_size(8, 8)
        .to_hasher();
    Ok(hex::encode(hasher.hash_image(&img).as_bytes()))
}

/// Bitwise distance between two hex-encoded hashes. `None` when either side
/// is empty, malformed hex, or the lengths differ — callers skip such
/// entries rather than fail.
pub fn hamming_distance(a: &str, b: &str) -> Option<u32> {
    let a = hex::decode(a).ok()?;
    let b = hex::decode(b).ok()?;
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    Some(a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum())
}
