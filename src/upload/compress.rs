//! Single-shot gzip stage for upload bodies
//!
//! Objects are small enough to be compressed in memory in one pass, so there
//! is no streaming encoder here. Fetches use [`gunzip`] when the store reports
//! `content-encoding: gzip`.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Content-Encoding value for gzip bodies
pub const GZIP_ENCODING: &str = "gzip";

/// Compress `data` with gzip at the default level
pub fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompress a complete gzip stream
pub fn gunzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Ratio of compressed to original size.
///
/// An empty original counts as incompressible (1.0).
pub fn compression_ratio(compressed: usize, original: usize) -> f64 {
    if original == 0 {
        return 1.0;
    }
    compressed as f64 / original as f64
}
