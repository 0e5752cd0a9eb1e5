//! Optional deflate compression envelope for outbound messages above the
//! size threshold where the CPU cost pays for itself.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::{AgentError, Result};

/// Deflate-compress `data`. Returns the raw compressed bytes; the caller is
/// responsible for wrapping them in the `Compress` envelope tag.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| AgentError::Codec(format!("compress write failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| AgentError::Codec(format!("compress finish failed: {e}")))
}

/// Inflate a deflate-compressed payload back to its original bytes.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| AgentError::Codec(format!("decompress failed: {e}")))?;
    Ok(out)
}

/// Only worth the CPU cost above this size: messages below a small
/// threshold skip compression since the envelope's own overhead would
/// outweigh any savings.
pub const MIN_COMPRESS_SIZE: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_bytes() {
        let original = b"the quick brown fox jumps over the lazy dog".repeat(8);
        let compressed = compress(&original).unwrap();
        assert!(compressed.len() < original.len());
        let restored = decompress(&compressed).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn corrupted_stream_fails_to_decompress() {
        let compressed = compress(b"hello world").unwrap();
        let mut corrupt = compressed;
        for b in corrupt.iter_mut().take(4) {
            *b ^= 0xFF;
        }
        assert!(decompress(&corrupt).is_err());
    }
}
