#![allow(clippy::type_complexity, clippy::too_many_arguments, clippy::ptr_arg)]

//! A sparse, spatially hashed TSDF (truncated signed distance field) volume for dense RGB-D reconstruction.
//!
//! Voxels are grouped into cubic blocks of `block_side^3` voxels. Only blocks near observed surfaces are allocated, and
//! they are found through a `SpatialHashTable` from block key to a slot of the `VoxelPool`.
//!
//! Each depth frame moves through three parallel stages, all driven by `TsdfVolume::integrate`:
//!   1. **touch**: allocate the blocks around every valid depth sample
//!   2. **collect**: compact the blocks in the camera frustum into the `ActiveEntryArray`
//!   3. **fuse**: project every voxel of every active block into the frame and update its running average
//!
//! Reading the volume:
//!   - trilinear `tsdf_at`, `color_at` and `gradient_at` samplers on `VolumeView`
//!   - per-pixel `raycast`
//!   - `extract_surface_samples`, which reads across block faces with a `BoundaryCache`
//!
//! A volume can be reduced to half the resolution with `downsample`, bulk loaded with `upload_volumes`, and saved with
//! `save_to_path`.

pub mod active;
pub mod compression;
pub mod config;
pub mod downsample;
pub mod error;
pub mod hash_table;
pub mod image;
pub mod integration;
pub mod neighborhood;
pub mod pool;
pub mod raycast;
pub mod sampling;
pub mod serialization;
pub mod surface;
pub mod upload;
pub mod volume;
pub mod voxel;

pub use active::*;
pub use compression::*;
pub use config::*;
pub use downsample::*;
pub use error::*;
pub use hash_table::*;
pub use image::*;
pub use integration::*;
pub use neighborhood::*;
pub use pool::*;
pub use raycast::*;
pub use serialization::*;
pub use surface::*;
pub use upload::*;
pub use volume::*;
pub use voxel::*;

// Hash types to use for small keys like `PointN`.
pub type SmallKeyHashMap<K, V> = ahash::AHashMap<K, V>;
pub type SmallKeyHashSet<K> = ahash::AHashSet<K>;
pub type SmallKeyBuildHasher = ahash::RandomState;

pub mod prelude {
    pub use super::{
        BoundaryCache, ColorImage, DepthImage, DownsampleMode, FileCompression, FrameStats,
        ImageBuffer, RaycastHit, RaycastImage, Rgb, RgbdFrame, SpatialHashTable, SurfaceSample,
        TsdfVolume, UploadReport, VolumeConfig, VolumeError, VolumeView, Voxel, VoxelBlock,
    };

    #[cfg(feature = "lz4")]
    pub use super::Lz4;
    #[cfg(feature = "snap")]
    pub use super::Snappy;
}
