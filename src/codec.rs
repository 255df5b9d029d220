// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Payload codec.
//!
//! Feed payloads travel and rest in a length-prefixed compressed form:
//!
//! ```text
//! ┌────────────────────────┬──────────────────────────────┐
//! │ expected_size: u32 BE  │ zlib stream                  │
//! │ (4 bytes)              │ (inflates to expected_size)  │
//! └────────────────────────┴──────────────────────────────┘
//! ```
//!
//! The mirror stores payloads exactly as received; [`decode`] is a read-time
//! concern for downstream consumers.

use crate::error::{MirrorError, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Size of the big-endian length header.
pub const HEADER_LEN: usize = 4;

/// Decode a length-prefixed zlib payload into its raw bytes.
///
/// Fails with [`MirrorError::MalformedPayload`] when the header is missing,
/// the zlib stream is corrupt, or the inflated length disagrees with the
/// header.
///
/// Inflation stops one byte past the header's size, so a stream that
/// expands far beyond its header is rejected without being buffered whole.
pub fn decode(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < HEADER_LEN {
        return Err(MirrorError::malformed(format!(
            "missing header, length: {}",
            data.len()
        )));
    }

    let (header, body) = data.split_at(HEADER_LEN);
    let expected_size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;

    let mut decoder = ZlibDecoder::new(body);
    let mut decoded = Vec::new();
    decoder
        .by_ref()
        .take(expected_size as u64 + 1)
        .read_to_end(&mut decoded)
        .map_err(|e| MirrorError::malformed(format!("could not read to end: {}", e)))?;

    if decoded.len() > expected_size {
        return Err(MirrorError::malformed(format!(
            "size mismatch: expected {} bytes, got more",
            expected_size
        )));
    }
    if decoded.len() != expected_size {
        return Err(MirrorError::malformed(format!(
            "size mismatch: expected {} bytes, got {}",
            expected_size,
            decoded.len()
        )));
    }

    Ok(decoded)
}

/// Encode raw bytes into the length-prefixed zlib form accepted by [`decode`].
pub fn encode(data: &[u8]) -> Result<Vec<u8>> {
    let size = u32::try_from(data.len()).map_err(|_| {
        MirrorError::malformed(format!("payload too large for header: {} bytes", data.len()))
    })?;

    let mut out = Vec::with_capacity(HEADER_LEN + data.len() / 2);
    out.extend_from_slice(&size.to_be_bytes());

    let mut encoder = ZlibEncoder::new(out, Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| MirrorError::Internal(format!("zlib encode: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| MirrorError::Internal(format!("zlib finish: {}", e)))
}
