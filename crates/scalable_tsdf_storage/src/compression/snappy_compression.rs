use super::BytesCompression;

use serde::{Deserialize, Serialize};
use std::io::Write;

/// The [Snappy compression algorithm](https://en.wikipedia.org/wiki/Snappy_(compression)).
/// Uses a pure Rust implementation, making it suitable for use with the WASM target.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Snappy;

impl BytesCompression for Snappy {
    fn compress_bytes(
        &self,
        bytes: &[u8],
        compressed_bytes: impl std::io::Write,
    ) -> std::io::Result<()> {
        let mut encoder = snap::write::FrameEncoder::new(compressed_bytes);
        std::io::copy(&mut std::io::Cursor::new(bytes), &mut encoder)?;

        encoder.flush()
    }

    fn decompress_bytes(
        compressed_bytes: &[u8],
        bytes: &mut impl std::io::Write,
    ) -> std::io::Result<()> {
        let mut decoder = snap::read::FrameDecoder::new(compressed_bytes);
        std::io::copy(&mut decoder, bytes)?;

        Ok(())
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compress_and_decompress_weight_bytes() {
        let bytes: Vec<u8> = (0..512).map(|i| (i / 64) as u8).collect();

        let mut compressed_bytes = Vec::new();
        Snappy.compress_bytes(&bytes, &mut compressed_bytes).unwrap();
        let mut decompressed_bytes = Vec::new();
        Snappy::decompress_bytes(&compressed_bytes, &mut decompressed_bytes).unwrap();

        assert_eq!(bytes, decompressed_bytes);
    }
}
