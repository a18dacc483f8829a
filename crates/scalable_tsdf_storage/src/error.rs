use thiserror::Error;

/// Errors from creating, configuring or bulk-loading a `TsdfVolume`.
///
/// Running out of capacity is not one of them: failed insertions are counted and reported, not raised.
#[derive(Debug, Error, PartialEq)]
pub enum VolumeError {
    #[error("volume is already created; release it before creating it again")]
    AlreadyCreated,
    #[error("invalid volume configuration: {0}")]
    InvalidConfig(String),
    #[error("block has {found} voxels but this volume stores {expected} per block")]
    BlockSizeMismatch { expected: usize, found: usize },
    #[error("got {keys} keys but {blocks} blocks")]
    LengthMismatch { keys: usize, blocks: usize },
    #[error("{0} blocks could not be inserted")]
    UnresolvedBlocks(usize),
}

/// Errors from reading or writing volume files and configuration.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("configuration error: {0}")]
    Config(#[from] ron::Error),
    #[error(transparent)]
    Volume(#[from] VolumeError),
    #[error("not a volume file")]
    BadMagic,
    #[error("unsupported volume file version {0}")]
    UnsupportedVersion(u32),
    #[error("volume file declares {expected} records but contains {found}")]
    RecordCountMismatch { expected: u64, found: u64 },
    #[error("volume file uses {0} compression, which this build does not support")]
    UnsupportedCompression(&'static str),
}
