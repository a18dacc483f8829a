use super::BytesCompression;

use serde::{Deserialize, Serialize};

/// The [LZ4 compression algorithm](https://en.wikipedia.org/wiki/LZ4_(compression_algorithm)).
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Lz4 {
    /// The compression level, from 0 to 10. 0 is fastest and least aggressive. 10 is slowest and
    /// most aggressive.
    pub level: u32,
}

impl BytesCompression for Lz4 {
    fn compress_bytes(
        &self,
        bytes: &[u8],
        compressed_bytes: impl std::io::Write,
    ) -> std::io::Result<()> {
        let mut encoder = lz4::EncoderBuilder::new()
            .level(self.level)
            .build(compressed_bytes)?;
        std::io::copy(&mut std::io::Cursor::new(bytes), &mut encoder)?;
        let (_output, result) = encoder.finish();

        result
    }

    fn decompress_bytes(
        compressed_bytes: &[u8],
        bytes: &mut impl std::io::Write,
    ) -> std::io::Result<()> {
        let mut decoder = lz4::Decoder::new(compressed_bytes)?;
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
