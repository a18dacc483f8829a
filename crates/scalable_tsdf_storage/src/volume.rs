//! The sparse TSDF volume: a `SpatialHashTable` of block keys, a `VoxelPool` indexed by slot and the `ActiveEntryArray`
//! of the current pass.
//!
//! # Coordinates
//!
//! There are four spaces:
//! - **world**: where cameras live
//! - **volume**: world transformed by `volume_to_world.inverse()`, in meters
//! - **voxel**: volume divided by `voxel_length`. The center of integer voxel `X` is at volume point `(X + 0.5) * v`.
//! - **block**: voxel floor-divided by `block_side`. Block `K` owns voxels `K * N .. (K + 1) * N` on each axis.
//!
//! ```
//! use scalable_tsdf_core::prelude::*;
//! use scalable_tsdf_storage::prelude::*;
//!
//! let volume = TsdfVolume::new(VolumeConfig {
//!     block_side: 8,
//!     voxel_length: 0.5,
//!     bucket_count: 64,
//!     value_capacity: 64,
//!     ..Default::default()
//! })
//! .unwrap();
//!
//! let view = volume.view();
//! assert_eq!(view.block_of_voxel(PointN([-1, 7, 8])), PointN([-1, 0, 1]));
//! assert_eq!(view.voxelf_to_world(PointN([0.0, 1.0, 2.0])), PointN([0.25, 0.75, 1.25]));
//! ```

use crate::{
    ActiveEntryArray, BlockRef, HashEntry, SpatialHashTable, Voxel, VoxelBlock, VoxelPool,
    VolumeConfig, VolumeError,
};

use scalable_tsdf_core::prelude::*;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// The geometry of a volume. Immutable after construction.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct VolumeParameters {
    pub block_side: i32,
    pub voxel_length: f32,
    pub truncation_distance: f32,
    pub max_depth: f32,
    pub volume_to_world: Transform3,
}

impl VolumeParameters {
    pub fn from_config(config: &VolumeConfig) -> Self {
        Self {
            block_side: config.block_side as i32,
            voxel_length: config.voxel_length,
            truncation_distance: config.truncation_distance,
            max_depth: config.max_depth,
            volume_to_world: config.volume_to_world,
        }
    }

    #[inline]
    pub fn block_volume(&self) -> usize {
        let n = self.block_side as usize;

        n * n * n
    }

    /// The edge length of a block, in meters.
    #[inline]
    pub fn block_length(&self) -> f32 {
        self.block_side as f32 * self.voxel_length
    }

    /// The index of `local` in a block's voxel arrays.
    #[inline]
    pub fn local_index(&self, local: Point3i) -> usize {
        let n = self.block_side;
        debug_assert!(
            local.0.iter().all(|c| (0..n).contains(c)),
            "{:?} is not a local voxel",
            local
        );

        (local.x() + n * (local.y() + n * local.z())) as usize
    }

    #[inline]
    pub fn local_of_index(&self, index: usize) -> Point3i {
        let n = self.block_side as usize;

        PointN([
            (index % n) as i32,
            ((index / n) % n) as i32,
            (index / (n * n)) as i32,
        ])
    }

    #[inline]
    pub fn block_of_voxel(&self, voxel: Point3i) -> Point3i {
        voxel.scalar_div_floor(self.block_side)
    }

    /// The minimum voxel of block `key`.
    #[inline]
    pub fn block_min_voxel(&self, key: Point3i) -> Point3i {
        key * self.block_side
    }

    #[inline]
    pub fn voxelf_to_volume(&self, voxel: Point3f) -> Point3f {
        (voxel + Point3f::fill(0.5)) * self.voxel_length
    }

    #[inline]
    pub fn volume_to_voxelf(&self, p: Point3f) -> Point3f {
        p / self.voxel_length - Point3f::fill(0.5)
    }

    /// Block-space coordinates of a volume point. The block containing the nearest voxel center is `floor` of the
    /// result.
    #[inline]
    pub fn volume_to_blockf(&self, p: Point3f) -> Point3f {
        p / self.block_length()
    }

    #[inline]
    pub fn voxelf_to_world(&self, voxel: Point3f) -> Point3f {
        self.volume_to_world
            .transform_point(self.voxelf_to_volume(voxel))
    }

    /// The volume-space box covered by block `key`.
    #[inline]
    pub fn block_volume_extent(&self, key: Point3i) -> Extent3f {
        let l = self.block_length();

        Extent3f::from_min_and_shape(Point3f::from(key) * l, Point3f::fill(l))
    }
}

/// A shared borrow of a `TsdfVolume`, cheap to copy into parallel closures.
#[derive(Clone, Copy)]
pub struct VolumeView<'a> {
    params: &'a VolumeParameters,
    world_to_volume: Transform3,
    table: &'a SpatialHashTable,
    active: &'a ActiveEntryArray,
    pool: &'a VoxelPool,
}

impl<'a> VolumeView<'a> {
    #[inline]
    pub fn params(&self) -> &'a VolumeParameters {
        self.params
    }

    #[inline]
    pub fn block_side(&self) -> i32 {
        self.params.block_side
    }

    #[inline]
    pub fn hash_table(&self) -> &'a SpatialHashTable {
        self.table
    }

    #[inline]
    pub fn active_entries(&self) -> &'a ActiveEntryArray {
        self.active
    }

    #[inline]
    pub fn pool(&self) -> &'a VoxelPool {
        self.pool
    }

    #[inline]
    pub fn world_to_volume(&self) -> &Transform3 {
        &self.world_to_volume
    }

    #[inline]
    pub fn block_of_voxel(&self, voxel: Point3i) -> Point3i {
        self.params.block_of_voxel(voxel)
    }

    #[inline]
    pub fn voxelf_to_world(&self, voxel: Point3f) -> Point3f {
        self.params.voxelf_to_world(voxel)
    }

    #[inline]
    pub fn world_to_voxelf(&self, p: Point3f) -> Point3f {
        self.params
            .volume_to_voxelf(self.world_to_volume.transform_point(p))
    }

    /// The integer voxel whose center is nearest to world point `p`.
    #[inline]
    pub fn world_to_voxel(&self, p: Point3f) -> Point3i {
        self.world_to_voxelf(p).round().as_3i()
    }

    #[inline]
    pub fn voxel_to_world(&self, voxel: Point3i) -> Point3f {
        self.voxelf_to_world(voxel.into())
    }

    #[inline]
    pub fn slot_of_block(&self, key: Point3i) -> Option<u32> {
        self.table.find(key)
    }

    #[inline]
    pub fn block(&self, key: Point3i) -> Option<BlockRef<'a>> {
        self.slot_of_block(key).map(|s| self.pool.block(s))
    }

    /// The voxel at global voxel coordinate `voxel`, if its block is allocated.
    #[inline]
    pub fn voxel(&self, voxel: Point3i) -> Option<Voxel> {
        let key = self.block_of_voxel(voxel);
        let slot = self.slot_of_block(key)?;
        let local = voxel - self.params.block_min_voxel(key);

        Some(self.voxel_in_slot_unchecked(slot, local))
    }

    /// Reads a voxel of an already resolved slot. `local` must be in `[0, N)^3`.
    #[inline]
    pub fn voxel_in_slot_unchecked(&self, slot: u32, local: Point3i) -> Voxel {
        self.pool
            .voxel_unchecked(slot, self.params.local_index(local))
    }
}

/// Owns all storage for one sparse TSDF volume.
///
/// A volume is either created (it owns storage sized by its `bucket_count` and `value_capacity`) or released (it owns
/// nothing). Integration phases take `&mut self`; queries take `&self`, so the two can never overlap.
pub struct TsdfVolume {
    params: VolumeParameters,
    world_to_volume: Transform3,
    upload_attempts: usize,
    allocations_per_round: Option<usize>,
    table: SpatialHashTable,
    active: ActiveEntryArray,
    pool: VoxelPool,
    created: bool,
}

impl TsdfVolume {
    /// Validates `config` and creates a volume with its capacity.
    pub fn new(config: VolumeConfig) -> Result<Self, VolumeError> {
        let mut volume = Self::released(config)?;
        volume.create(config.bucket_count, config.value_capacity)?;

        Ok(volume)
    }

    /// A volume with the parameters of `config` that owns no storage yet. Call `create` before using it.
    pub fn released(config: VolumeConfig) -> Result<Self, VolumeError> {
        config.validate()?;
        let params = VolumeParameters::from_config(&config);

        Ok(Self {
            params,
            world_to_volume: params.volume_to_world.inverse(),
            upload_attempts: config.upload_attempts,
            allocations_per_round: config.allocations_per_round,
            table: SpatialHashTable::empty(),
            active: ActiveEntryArray::new(0),
            pool: VoxelPool::empty(params.block_volume()),
            created: false,
        })
    }

    /// Allocates storage. Fails without changing anything if the volume is already created.
    pub fn create(&mut self, bucket_count: usize, value_capacity: usize) -> Result<(), VolumeError> {
        if self.created {
            tracing::error!("volume is already created; release it before creating it again");
            return Err(VolumeError::AlreadyCreated);
        }
        if bucket_count == 0 || value_capacity == 0 || value_capacity > i32::MAX as usize {
            return Err(VolumeError::InvalidConfig(format!(
                "cannot create a volume with {} buckets and capacity {}",
                bucket_count, value_capacity
            )));
        }

        self.table = SpatialHashTable::new(bucket_count, value_capacity);
        self.active = ActiveEntryArray::new(value_capacity);
        self.pool = VoxelPool::new(self.params.block_volume(), value_capacity);
        self.created = true;

        Ok(())
    }

    /// Frees all storage. The volume can be created again afterwards.
    pub fn release(&mut self) {
        self.table = SpatialHashTable::empty();
        self.active = ActiveEntryArray::new(0);
        self.pool = VoxelPool::empty(self.params.block_volume());
        self.created = false;
    }

    /// Removes every block while keeping the allocated capacity.
    pub fn reset(&mut self) {
        self.table.clear();
        self.active.reset();
        self.active.forget_all();
        self.pool.clear();
    }

    #[inline]
    pub fn is_created(&self) -> bool {
        self.created
    }

    #[inline]
    pub fn params(&self) -> &VolumeParameters {
        &self.params
    }

    /// The configuration this volume was built with, including its current capacity.
    pub fn config(&self) -> VolumeConfig {
        VolumeConfig {
            block_side: self.params.block_side as u32,
            voxel_length: self.params.voxel_length,
            truncation_distance: self.params.truncation_distance,
            max_depth: self.params.max_depth,
            bucket_count: self.table.bucket_count(),
            value_capacity: self.table.value_capacity(),
            volume_to_world: self.params.volume_to_world,
            upload_attempts: self.upload_attempts,
            allocations_per_round: self.allocations_per_round,
        }
    }

    #[inline]
    pub fn view(&self) -> VolumeView<'_> {
        VolumeView {
            params: &self.params,
            world_to_volume: self.world_to_volume,
            table: &self.table,
            active: &self.active,
            pool: &self.pool,
        }
    }

    #[inline]
    pub fn hash_table(&self) -> &SpatialHashTable {
        &self.table
    }

    #[inline]
    pub fn active_entries(&self) -> &ActiveEntryArray {
        &self.active
    }

    #[inline]
    pub fn upload_attempts(&self) -> usize {
        self.upload_attempts
    }

    pub(crate) fn parts_mut(
        &mut self,
    ) -> (&VolumeParameters, &SpatialHashTable, &ActiveEntryArray, &mut VoxelPool) {
        (&self.params, &self.table, &self.active, &mut self.pool)
    }

    #[inline]
    pub fn allocations_per_round(&self) -> Option<usize> {
        self.allocations_per_round
    }

    pub(crate) fn table_mut(&mut self) -> &mut SpatialHashTable {
        &mut self.table
    }

    pub(crate) fn pool_mut(&mut self) -> &mut VoxelPool {
        &mut self.pool
    }

    /// The number of allocated blocks.
    #[inline]
    pub fn allocated_block_count(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn block(&self, key: Point3i) -> Option<BlockRef<'_>> {
        self.view().block(key)
    }

    /// Frees the block at `key` and zeroes its voxels. Returns false if it was not allocated.
    pub fn remove_block(&mut self, key: Point3i) -> bool {
        let slot = match self.table.find(key) {
            Some(s) => s,
            None => return false,
        };
        if !self.table.remove(key) {
            return false;
        }
        self.pool.block_mut(slot).clear();
        self.active.forget_slot(slot);

        true
    }

    /// The world-space minimum of the allocated blocks' voxel centers, or `None` if the volume is empty.
    pub fn min_bound(&self) -> Option<Point3f> {
        let keys = self.table.keys();
        let min_key = keys.iter().copied().reduce(|a, b| a.meet(&b))?;
        let n = self.params.block_side;

        Some(self.params.voxelf_to_world(Point3f::from(min_key * n)))
    }

    /// The world-space point one block side beyond the maximum allocated voxel center, or `None` if the volume is empty.
    pub fn max_bound(&self) -> Option<Point3f> {
        let keys = self.table.keys();
        let max_key = keys.iter().copied().reduce(|a, b| a.join(&b))?;
        let n = self.params.block_side;

        Some(
            self.params
                .voxelf_to_world(Point3f::from(max_key * n + Point3i::fill(n))),
        )
    }

    /// The world-space bounds of the weighted voxel centers in blocks with more than `min_valid_voxels` weighted voxels.
    /// Returns `None` if no block qualifies.
    pub fn min_max_bound(&self, min_valid_voxels: usize) -> Option<(Point3f, Point3f)> {
        let params = &self.params;
        let pool = &self.pool;
        let n = params.block_volume();

        self.table
            .compact_all()
            .into_par_iter()
            .filter_map(|entry| {
                let block = pool.block(entry.slot);
                if block.weight.iter().filter(|w| **w > 0).count() <= min_valid_voxels {
                    return None;
                }
                let origin = params.block_min_voxel(entry.key);
                (0..n)
                    .filter(|i| block.weight[*i] > 0)
                    .map(|i| {
                        let p = params.voxelf_to_world((origin + params.local_of_index(i)).into());
                        (p, p)
                    })
                    .reduce(merge_bounds)
            })
            .reduce_with(merge_bounds)
    }

    /// The number of allocated blocks that were collected in a camera frustum within `frame_threshold` frames of
    /// `frame_id`.
    pub fn visible_block_count(&self, frame_id: i32, frame_threshold: i32) -> usize {
        let active = &self.active;

        self.table
            .compact_all()
            .into_par_iter()
            .filter(|e| {
                active
                    .last_visible_frame(e.slot)
                    .map_or(false, |f| f <= frame_id && frame_id - f <= frame_threshold)
            })
            .count()
    }

    /// Copies every allocated block out of the volume. The order is unspecified.
    pub fn download_volumes(&self) -> (Vec<Point3i>, Vec<VoxelBlock>) {
        let pool = &self.pool;

        self.table
            .compact_all()
            .into_par_iter()
            .map(|HashEntry { key, slot }| (key, pool.block(slot).to_voxel_block()))
            .unzip()
    }
}

fn merge_bounds(a: (Point3f, Point3f), b: (Point3f, Point3f)) -> (Point3f, Point3f) {
    (a.0.meet(&b.0), a.1.join(&b.1))
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
