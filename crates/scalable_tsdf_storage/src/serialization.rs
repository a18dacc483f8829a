//! Saving and loading volumes.
//!
//! A volume file is:
//! 1. the magic bytes `b"TSDF"`
//! 2. a bincode `u32` format version
//! 3. a bincode `VolumeFileHeader`
//! 4. a bincode `Vec<VolumeRecord>` compressed with the header's `FileCompression`, to the end of the file
//!
//! Records are unordered. Loading uploads them in batches with `TsdfVolume::upload_volumes`.
//!
//! ```
//! use scalable_tsdf_core::prelude::*;
//! use scalable_tsdf_storage::prelude::*;
//! use scalable_tsdf_storage::{read_volume, write_volume, FileCompression, DEFAULT_BATCH_SIZE};
//!
//! let config = VolumeConfig { bucket_count: 16, value_capacity: 16, ..Default::default() };
//! let mut volume = TsdfVolume::new(config).unwrap();
//! volume.upload_keys(&[PointN([1, 2, 3])]);
//!
//! let mut bytes = Vec::new();
//! write_volume(&mut bytes, &volume, FileCompression::None).unwrap();
//! let loaded = read_volume(&bytes[..], DEFAULT_BATCH_SIZE).unwrap();
//!
//! assert_eq!(loaded.config(), volume.config());
//! assert!(loaded.block(PointN([1, 2, 3])).is_some());
//! ```

use crate::{
    compression::{BincodeCompression, Compression, NoCompression},
    PersistError, TsdfVolume, VolumeConfig, VolumeParameters, VoxelBlock,
};

#[cfg(feature = "lz4")]
use crate::Lz4;
#[cfg(feature = "snap")]
use crate::Snappy;

use scalable_tsdf_core::prelude::*;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::warn;

pub const VOLUME_FILE_MAGIC: [u8; 4] = *b"TSDF";
pub const VOLUME_FILE_VERSION: u32 = 1;

/// The number of records uploaded at once by `load_from_path`.
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// One block of a saved volume.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct VolumeRecord {
    pub key: Point3i,
    pub block: VoxelBlock,
}

/// How the records of a volume file are compressed.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FileCompression {
    None,
    Lz4 { level: u32 },
    Snappy,
}

impl FileCompression {
    pub fn name(&self) -> &'static str {
        match self {
            FileCompression::None => "no",
            FileCompression::Lz4 { .. } => "LZ4",
            FileCompression::Snappy => "Snappy",
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct VolumeFileHeader {
    pub config: VolumeConfig,
    pub compression: FileCompression,
    pub num_records: u64,
}

type RecordCompression<A> = BincodeCompression<Vec<VolumeRecord>, A>;

fn compress_records(
    records: &Vec<VolumeRecord>,
    compression: FileCompression,
) -> Result<Vec<u8>, PersistError> {
    let compressed = match compression {
        FileCompression::None => RecordCompression::new(NoCompression).compress(records)?.take(),
        #[cfg(feature = "lz4")]
        FileCompression::Lz4 { level } => {
            RecordCompression::new(Lz4 { level }).compress(records)?.take()
        }
        #[cfg(feature = "snap")]
        FileCompression::Snappy => RecordCompression::new(Snappy).compress(records)?.take(),
        #[allow(unreachable_patterns)]
        other => return Err(PersistError::UnsupportedCompression(other.name())),
    };

    Ok(compressed)
}

fn decompress_records(
    bytes: &Vec<u8>,
    compression: FileCompression,
) -> Result<Vec<VolumeRecord>, PersistError> {
    match compression {
        FileCompression::None => RecordCompression::<NoCompression>::decompress(bytes),
        #[cfg(feature = "lz4")]
        FileCompression::Lz4 { .. } => RecordCompression::<Lz4>::decompress(bytes),
        #[cfg(feature = "snap")]
        FileCompression::Snappy => RecordCompression::<Snappy>::decompress(bytes),
        #[allow(unreachable_patterns)]
        other => Err(PersistError::UnsupportedCompression(other.name())),
    }
}

impl TsdfVolume {
    /// Copies every allocated block out of the volume.
    pub fn download_records(&self) -> Vec<VolumeRecord> {
        let (keys, blocks) = self.download_volumes();

        keys.into_iter()
            .zip(blocks)
            .map(|(key, block)| VolumeRecord { key, block })
            .collect()
    }

    /// Uploads `records` in batches of `batch_size`. Returns the number of records that could not be inserted.
    pub fn upload_records(
        &mut self,
        records: Vec<VolumeRecord>,
        batch_size: usize,
    ) -> Result<usize, PersistError> {
        let mut unresolved = 0;
        let batches = records.into_iter().chunks(batch_size.max(1));
        for batch in &batches {
            let (keys, blocks): (Vec<_>, Vec<_>) = batch.map(|r| (r.key, r.block)).unzip();
            unresolved += self.upload_volumes(&keys, &blocks)?.unresolved;
        }

        Ok(unresolved)
    }
}

pub fn write_volume(
    mut writer: impl Write,
    volume: &TsdfVolume,
    compression: FileCompression,
) -> Result<(), PersistError> {
    let records = volume.download_records();
    let body = compress_records(&records, compression)?;

    writer.write_all(&VOLUME_FILE_MAGIC)?;
    bincode::serialize_into(&mut writer, &VOLUME_FILE_VERSION)?;
    bincode::serialize_into(
        &mut writer,
        &VolumeFileHeader {
            config: volume.config(),
            compression,
            num_records: records.len() as u64,
        },
    )?;
    writer.write_all(&body)?;

    Ok(())
}

pub fn read_header(mut reader: impl Read) -> Result<VolumeFileHeader, PersistError> {
    let mut magic = [0; 4];
    reader.read_exact(&mut magic)?;
    if magic != VOLUME_FILE_MAGIC {
        return Err(PersistError::BadMagic);
    }
    let version: u32 = bincode::deserialize_from(&mut reader)?;
    if version != VOLUME_FILE_VERSION {
        return Err(PersistError::UnsupportedVersion(version));
    }

    Ok(bincode::deserialize_from(&mut reader)?)
}

fn read_records(
    mut reader: impl Read,
    header: &VolumeFileHeader,
) -> Result<Vec<VolumeRecord>, PersistError> {
    let mut body = Vec::new();
    reader.read_to_end(&mut body)?;
    let records = decompress_records(&body, header.compression)?;
    if records.len() as u64 != header.num_records {
        return Err(PersistError::RecordCountMismatch {
            expected: header.num_records,
            found: records.len() as u64,
        });
    }

    Ok(records)
}

/// Creates a volume with the saved configuration and uploads every saved block into it.
///
/// Blocks that don't fit are dropped with a warning.
pub fn read_volume(mut reader: impl Read, batch_size: usize) -> Result<TsdfVolume, PersistError> {
    let header = read_header(&mut reader)?;
    let mut volume = TsdfVolume::new(header.config)?;
    let records = read_records(&mut reader, &header)?;

    let unresolved = volume.upload_records(records, batch_size)?;
    if unresolved > 0 {
        warn!(
            "{} of {} saved blocks did not fit in the volume",
            unresolved, header.num_records
        );
    }

    Ok(volume)
}

/// Uploads the saved blocks into an existing volume. Returns the number of blocks that could not be inserted.
///
/// Only the block side is checked against the saved configuration; voxels are copied as saved.
pub fn read_volume_into(
    volume: &mut TsdfVolume,
    mut reader: impl Read,
    batch_size: usize,
) -> Result<usize, PersistError> {
    let header = read_header(&mut reader)?;
    for field in mismatched_geometry(&header.config, volume.params()) {
        warn!(
            "loading a volume saved with a different {}; its TSDF values are kept as stored",
            field
        );
    }
    let records = read_records(&mut reader, &header)?;

    volume.upload_records(records, batch_size)
}

/// The scale parameters of `saved` that differ from `params`. Loading still succeeds, but the stored distances no longer
/// match the target volume's voxels.
fn mismatched_geometry(saved: &VolumeConfig, params: &VolumeParameters) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if saved.voxel_length != params.voxel_length {
        fields.push("voxel_length");
    }
    if saved.truncation_distance != params.truncation_distance {
        fields.push("truncation_distance");
    }

    fields
}

pub fn save_to_path(
    path: impl AsRef<Path>,
    volume: &TsdfVolume,
    compression: FileCompression,
) -> Result<(), PersistError> {
    let mut writer = BufWriter::new(std::fs::File::create(path)?);
    write_volume(&mut writer, volume, compression)?;
    writer.flush()?;

    Ok(())
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<TsdfVolume, PersistError> {
    let reader = BufReader::new(std::fs::File::open(path)?);

    read_volume(reader, DEFAULT_BATCH_SIZE)
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

    use crate::{Rgb, Voxel, VolumeError};

    use pretty_assertions::assert_eq;

    fn config() -> VolumeConfig {
        VolumeConfig {
            block_side: 4,
            bucket_count: 64,
            value_capacity: 64,
            ..Default::default()
        }
    }

    fn filled_volume() -> TsdfVolume {
        let mut volume = TsdfVolume::new(config()).unwrap();
        let keys: Vec<_> = (0..20).map(|i| PointN([i % 3, i / 3, -i])).collect();
        let blocks: Vec<_> = keys
            .iter()
            .map(|k| {
                VoxelBlock::fill_with(64, |i| Voxel {
                    tsdf: (k.x() + i as i32) as f32 * 0.001,
                    weight: (i % 7) as u8,
                    color: Rgb::new(k.y() as u8, i as u8, 3),
                })
            })
            .collect();
        volume.upload_volumes(&keys, &blocks).unwrap();

        volume
    }

    fn sorted_records(volume: &TsdfVolume) -> Vec<VolumeRecord> {
        let mut records = volume.download_records();
        records.sort_by_key(|r| r.key.0);

        records
    }

    fn round_trip(compression: FileCompression) {
        let volume = filled_volume();

        let mut bytes = Vec::new();
        write_volume(&mut bytes, &volume, compression).unwrap();
        let loaded = read_volume(&bytes[..], 3).unwrap();

        assert_eq!(loaded.config(), volume.config());
        assert_eq!(sorted_records(&loaded), sorted_records(&volume));
    }

    #[test]
    fn round_trip_uncompressed() {
        round_trip(FileCompression::None);
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn round_trip_lz4() {
        round_trip(FileCompression::Lz4 { level: 10 });
    }

    #[cfg(feature = "snap")]
    #[test]
    fn round_trip_snappy() {
        round_trip(FileCompression::Snappy);
    }

    #[test]
    fn rejects_foreign_files() {
        let result = read_volume(&b"VOX 1234"[..], DEFAULT_BATCH_SIZE);

        assert!(matches!(result, Err(PersistError::BadMagic)));
    }

    #[test]
    fn rejects_future_versions() {
        let mut bytes = VOLUME_FILE_MAGIC.to_vec();
        bincode::serialize_into(&mut bytes, &2u32).unwrap();

        let result = read_volume(&bytes[..], DEFAULT_BATCH_SIZE);

        assert!(matches!(result, Err(PersistError::UnsupportedVersion(2))));
    }

    #[test]
    fn read_into_volume_with_other_block_side_fails() {
        let volume = filled_volume();
        let mut bytes = Vec::new();
        write_volume(&mut bytes, &volume, FileCompression::None).unwrap();

        let mut other = TsdfVolume::new(VolumeConfig {
            block_side: 8,
            ..config()
        })
        .unwrap();
        let result = read_volume_into(&mut other, &bytes[..], DEFAULT_BATCH_SIZE);

        assert!(matches!(
            result,
            Err(PersistError::Volume(VolumeError::BlockSizeMismatch {
                expected: 512,
                found: 64
            }))
        ));
    }

    #[test]
    fn read_into_volume_with_other_voxel_length_keeps_stored_values() {
        let volume = filled_volume();
        let mut bytes = Vec::new();
        write_volume(&mut bytes, &volume, FileCompression::None).unwrap();
        let other_config = VolumeConfig {
            voxel_length: 2.0 * config().voxel_length,
            ..config()
        };
        let mut other = TsdfVolume::new(other_config).unwrap();

        assert_eq!(
            mismatched_geometry(&volume.config(), other.params()),
            vec!["voxel_length"]
        );
        assert_eq!(
            mismatched_geometry(&volume.config(), volume.params()),
            Vec::<&str>::new()
        );

        let unresolved = read_volume_into(&mut other, &bytes[..], DEFAULT_BATCH_SIZE).unwrap();
        assert_eq!(unresolved, 0);
        assert_eq!(sorted_records(&other), sorted_records(&volume));
        assert_eq!(other.params().voxel_length, other_config.voxel_length);
    }

    #[test]
    fn save_and_load_file() {
        let volume = filled_volume();
        let path = std::env::temp_dir().join(format!("scalable_tsdf_{}.tsdf", std::process::id()));

        save_to_path(&path, &volume, FileCompression::None).unwrap();
        let loaded = load_from_path(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(sorted_records(&loaded), sorted_records(&volume));
    }
}
