//! A sparse TSDF (truncated signed distance field) volume for dense RGB-D reconstruction.
//!
//! This library is organized into two crates:
//! - **core**: lattice points, extents, rigid transforms and pinhole cameras
//! - **storage**: the spatially hashed volume, its integration pipeline, samplers, downsampling and persistence
//!
//! ```
//! use scalable_tsdf::prelude::*;
//!
//! let mut volume = TsdfVolume::new(VolumeConfig {
//!     bucket_count: 2500,
//!     value_capacity: 5000,
//!     ..Default::default()
//! })
//! .unwrap();
//!
//! let camera = PinholeIntrinsics { width: 32, height: 24, fx: 16.0, fy: 16.0, cx: 16.0, cy: 12.0 };
//! let depth = ImageBuffer::filled(32, 24, 1.0f32);
//! let stats = volume.integrate(&RgbdFrame::depth_only(&depth), &camera, &Transform3::IDENTITY, 0);
//!
//! assert_eq!(stats.valid_pixels, 32 * 24);
//! assert!(volume.raycast(&camera, &Transform3::IDENTITY).num_hits() > 0);
//! ```

pub use scalable_tsdf_core as core;
pub use scalable_tsdf_storage as storage;

pub mod prelude {
    pub use super::core::prelude::*;
    pub use super::storage::prelude::*;
}
