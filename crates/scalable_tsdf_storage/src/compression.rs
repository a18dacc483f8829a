mod compressed_bincode;

#[cfg(feature = "lz4")]
mod lz4_compression;
#[cfg(feature = "snap")]
mod snappy_compression;

pub use compressed_bincode::BincodeCompression;

#[cfg(feature = "lz4")]
pub use lz4_compression::Lz4;
#[cfg(feature = "snap")]
pub use snappy_compression::Snappy;

use crate::PersistError;

use serde::{Deserialize, Serialize};

/// An algorithm for:
///     1. compressing a specific type `Data` into type `CompressedData`
///     2. decompressing `CompressedData` back into `Data`
pub trait Compression: Sized {
    type Data;
    type CompressedData;

    fn compress(&self, data: &Self::Data) -> Result<Compressed<Self>, PersistError>;
    fn decompress(compressed: &Self::CompressedData) -> Result<Self::Data, PersistError>;
}

/// A value compressed with compression algorithm `A`.
#[derive(Clone, Deserialize, Serialize)]
pub struct Compressed<A>
where
    A: Compression,
{
    pub compressed_data: A::CompressedData,
    marker: std::marker::PhantomData<A>,
}

impl<T, A> Compressed<A>
where
    A: Compression<CompressedData = T>,
{
    pub fn new(compressed_data: A::CompressedData) -> Self {
        Self {
            compressed_data,
            marker: Default::default(),
        }
    }

    pub fn decompress(&self) -> Result<A::Data, PersistError> {
        A::decompress(&self.compressed_data)
    }

    pub fn take(self) -> A::CompressedData {
        self.compressed_data
    }
}

/// A compression algorithm that acts directly on a slice of bytes.
pub trait BytesCompression {
    fn compress_bytes(
        &self,
        bytes: &[u8],
        compressed_bytes: impl std::io::Write,
    ) -> std::io::Result<()>;
    fn decompress_bytes(
        compressed_bytes: &[u8],
        bytes: &mut impl std::io::Write,
    ) -> std::io::Result<()>;
}

/// Stores uncompressed bytes.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct NoCompression;

impl BytesCompression for NoCompression {
    fn compress_bytes(
        &self,
        bytes: &[u8],
        mut compressed_bytes: impl std::io::Write,
    ) -> std::io::Result<()> {
        compressed_bytes.write_all(bytes)
    }

    fn decompress_bytes(
        compressed_bytes: &[u8],
        bytes: &mut impl std::io::Write,
    ) -> std::io::Result<()> {
        bytes.write_all(compressed_bytes)
    }
}
