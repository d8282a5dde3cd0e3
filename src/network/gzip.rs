//! Gzip compression of request bodies, as accepted by the event endpoint.
use std::io::Write as _;

use flate2::{Compression, GzBuilder};

use crate::Result;

/// Unix, matching what the server-side SDKs send.
const GZIP_OS: u8 = 3;

/// Compress `input` into a gzip member. Empty input compresses to empty output.
pub fn gzip(input: &[u8]) -> Result<Vec<u8>> {
    if input.is_empty() {
        return Ok(Vec::new());
    }

    let mut encoder = GzBuilder::new()
        .operating_system(GZIP_OS)
        .write(Vec::with_capacity(input.len() / 2), Compression::default());
    encoder.write_all(input)?;
    Ok(encoder.finish()?)
}
