//! Per-frame fusion of depth (and color) into the volume.
//!
//! Each frame runs three phases, separated by the return of a parallel call:
//! 1. **touch**: allocate every block within the truncation band of a valid depth sample
//! 2. **collect**: gather the allocated blocks inside the camera frustum into the `ActiveEntryArray`
//! 3. **fuse**: update every voxel of every active block with the projected depth
//!
//! `TsdfVolume::integrate` runs all three.

use crate::{
    fuse_observation, BlockMut, ColorImage, DepthImage, InsertFailure, RgbdFrame,
    SpatialHashTable, TsdfVolume, VolumeParameters, VolumeView,
};

use scalable_tsdf_core::{prelude::*, voxels_on_segment};

use rayon::prelude::*;
use tracing::{debug, info_span, warn};

/// The near end of a touched ray segment is never closer to the camera than this, in meters.
pub const MIN_TOUCH_DEPTH: f32 = 1e-3;

/// Counters from one `touch` pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TouchStats {
    pub valid_pixels: usize,
    /// Successful insertions, including keys that were already present.
    pub touched_blocks: usize,
    pub failures: usize,
}

impl TouchStats {
    fn merge(self, other: Self) -> Self {
        Self {
            valid_pixels: self.valid_pixels + other.valid_pixels,
            touched_blocks: self.touched_blocks + other.touched_blocks,
            failures: self.failures + other.failures,
        }
    }
}

/// Counters from one `integrate` call.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FrameStats {
    pub valid_pixels: usize,
    pub touch_failures: usize,
    pub active_blocks: usize,
    pub fused_voxels: usize,
}

impl TsdfVolume {
    /// Runs `touch`, `reset_active_indices`, `collect_in_frustum` and `fuse` for one frame.
    pub fn integrate<D, C>(
        &mut self,
        frame: &RgbdFrame<'_, D, C>,
        intrinsics: &PinholeIntrinsics,
        camera_to_world: &Transform3,
        frame_id: i32,
    ) -> FrameStats
    where
        D: DepthImage + Sync,
        C: ColorImage + Sync,
    {
        let touch = self.touch(frame, intrinsics, camera_to_world);
        self.reset_active_indices();
        let active_blocks = self.collect_in_frustum(intrinsics, camera_to_world, frame_id);
        let fused_voxels = self.fuse(frame, intrinsics, camera_to_world);

        let stats = FrameStats {
            valid_pixels: touch.valid_pixels,
            touch_failures: touch.failures,
            active_blocks,
            fused_voxels,
        };
        debug!("frame {}: {:?}", frame_id, stats);

        stats
    }

    /// Allocates the blocks crossed by each valid pixel's ray segment `[d - trunc, d + trunc]`.
    ///
    /// Insertions that fail are dropped for this frame and counted.
    pub fn touch<D, C>(
        &mut self,
        frame: &RgbdFrame<'_, D, C>,
        intrinsics: &PinholeIntrinsics,
        camera_to_world: &Transform3,
    ) -> TouchStats
    where
        D: DepthImage + Sync,
        C: ColorImage + Sync,
    {
        let span = info_span!("touch");
        let _enter = span.enter();

        let view = self.view();
        view.hash_table().reset_locks();
        let width = frame.width().min(intrinsics.width) as usize;
        let height = frame.height().min(intrinsics.height) as usize;

        let stats = (0..width * height)
            .into_par_iter()
            .map(|i| {
                let pixel = PointN([(i % width) as i32, (i / width) as i32]);
                match frame.valid_depth(pixel, view.params().max_depth) {
                    Some(depth) => view.touch_pixel(pixel, depth, intrinsics, camera_to_world),
                    None => TouchStats::default(),
                }
            })
            .reduce(TouchStats::default, TouchStats::merge);

        if stats.failures > 0 {
            warn!(
                "{} block allocations failed while touching {} pixels",
                stats.failures, stats.valid_pixels
            );
        }

        stats
    }

    /// Marks every slot inactive and empties the `ActiveEntryArray`.
    pub fn reset_active_indices(&mut self) {
        self.active_entries().reset();
    }

    /// Appends every allocated block to the `ActiveEntryArray`. Returns the number of active blocks.
    pub fn collect_all(&mut self) -> usize {
        let span = info_span!("collect");
        let _enter = span.enter();

        let active = self.active_entries();
        self.hash_table().par_for_each_entry(|entry| {
            active.activate(entry, None);
        });
        let n = active.len();
        debug!("active blocks in volume: {}", n);

        n
    }

    /// Appends the allocated blocks whose bounds intersect the camera frustum to the `ActiveEntryArray`, and records
    /// `frame_id` as their last visible frame. Returns the number of active blocks.
    pub fn collect_in_frustum(
        &mut self,
        intrinsics: &PinholeIntrinsics,
        camera_to_world: &Transform3,
        frame_id: i32,
    ) -> usize {
        let span = info_span!("collect");
        let _enter = span.enter();

        let view = self.view();
        let volume_to_camera = camera_to_world
            .inverse()
            .compose(&view.params().volume_to_world);
        let active = view.active_entries();
        view.hash_table().par_for_each_entry(|entry| {
            if view.block_in_frustum(entry.key, intrinsics, &volume_to_camera) {
                active.activate(entry, Some(frame_id));
            }
        });
        let n = active.len();
        debug!("active blocks in frustum: {}", n);

        n
    }

    /// Fuses the frame into every voxel of every active block. Returns the number of voxels updated.
    pub fn fuse<D, C>(
        &mut self,
        frame: &RgbdFrame<'_, D, C>,
        intrinsics: &PinholeIntrinsics,
        camera_to_world: &Transform3,
    ) -> usize
    where
        D: DepthImage + Sync,
        C: ColorImage + Sync,
    {
        let span = info_span!("fuse");
        let _enter = span.enter();

        let (params, table, active, pool) = self.parts_mut();
        let volume_to_camera = camera_to_world.inverse().compose(&params.volume_to_world);
        let fuser = BlockFuser {
            params,
            frame,
            intrinsics,
            volume_to_camera,
        };

        pool.par_blocks_mut()
            .enumerate()
            .filter_map(|(slot, block)| {
                let position = active.position_of_slot(slot as u32)?;
                let entry = active
                    .get(position)
                    .filter(|e| table.find(e.key) == Some(slot as u32))?;

                Some((entry, block))
            })
            .map(|(entry, mut block)| fuser.fuse_block(entry.key, &mut block))
            .sum()
    }
}

impl<'a> VolumeView<'a> {
    fn touch_pixel(
        &self,
        pixel: Point2i,
        depth: f32,
        intrinsics: &PinholeIntrinsics,
        camera_to_world: &Transform3,
    ) -> TouchStats {
        let mut stats = TouchStats {
            valid_pixels: 1,
            ..Default::default()
        };

        let trunc = self.params().truncation_distance;
        let near = (depth - trunc).max(MIN_TOUCH_DEPTH);
        let far = depth + trunc;
        let to_blockf = |d: f32| {
            let p_world = camera_to_world.transform_point(intrinsics.inverse_project_pixel(pixel, d));
            let p_volume = self.world_to_volume().transform_point(p_world);

            self.params().volume_to_blockf(p_volume)
        };
        let start = to_blockf(near);
        let end = to_blockf(far);
        if !start.fits_in_i32() || !end.fits_in_i32() {
            return stats;
        }

        let table = self.hash_table();
        for key in voxels_on_segment(start, end) {
            if try_touch(table, key) {
                stats.touched_blocks += 1;
            } else {
                stats.failures += 1;
            }
        }

        stats
    }

    /// Conservative frustum test for block `key`. The block is clipped to the near plane `z = MIN_TOUCH_DEPTH` and rejected
    /// when nothing is left, when it lies entirely beyond `max_depth`, or when the clipped block projects entirely outside
    /// the image.
    pub fn block_in_frustum(
        &self,
        key: Point3i,
        intrinsics: &PinholeIntrinsics,
        volume_to_camera: &Transform3,
    ) -> bool {
        let mut corners = self.params().block_volume_extent(key).corners();
        for c in corners.iter_mut() {
            *c = volume_to_camera.transform_point(*c);
        }
        let min_z = corners.iter().map(|c| c.z()).fold(f32::INFINITY, f32::min);
        if min_z > self.params().max_depth {
            return false;
        }

        let mut min_uv = Point2f::fill(f32::INFINITY);
        let mut max_uv = Point2f::fill(f32::NEG_INFINITY);
        let mut clipped_any = false;
        let mut include = |p: Point3f| {
            let uv = intrinsics.project_unchecked(p);
            min_uv = min_uv.map_components_binary(&uv, f32::min);
            max_uv = max_uv.map_components_binary(&uv, f32::max);
            clipped_any = true;
        };
        for (i, a) in corners.iter().enumerate() {
            if a.z() >= MIN_TOUCH_DEPTH {
                include(*a);
            }
            // Crossings of every corner pair lie in the clipped box, so the box's own edge crossings are among them.
            for b in corners[i + 1..].iter() {
                if (a.z() < MIN_TOUCH_DEPTH) != (b.z() < MIN_TOUCH_DEPTH) {
                    let t = (MIN_TOUCH_DEPTH - a.z()) / (b.z() - a.z());
                    let mut p = *a + (*b - *a) * t;
                    *p.z_mut() = MIN_TOUCH_DEPTH;
                    include(p);
                }
            }
        }
        if !clipped_any {
            return false;
        }

        max_uv.x() >= 0.0
            && max_uv.y() >= 0.0
            && min_uv.x() < intrinsics.width as f32
            && min_uv.y() < intrinsics.height as f32
    }
}

/// A contended bucket is retried this many times before the insertion is dropped for the frame.
pub const TOUCH_ATTEMPTS: usize = 3;

/// Inserts `key`, retrying a contended lock a few times. A contended key still counts as touched when another worker has
/// already committed it.
#[inline]
fn try_touch(table: &SpatialHashTable, key: Point3i) -> bool {
    for _ in 0..TOUCH_ATTEMPTS {
        match table.try_insert(key) {
            Ok(_) => return true,
            Err(InsertFailure::Exhausted) => return false,
            Err(InsertFailure::Contended) => {
                if table.find(key).is_some() {
                    return true;
                }
                std::hint::spin_loop();
            }
        }
    }

    false
}

struct BlockFuser<'a, 'f, D, C> {
    params: &'a VolumeParameters,
    frame: &'a RgbdFrame<'f, D, C>,
    intrinsics: &'a PinholeIntrinsics,
    volume_to_camera: Transform3,
}

impl<'a, 'f, D, C> BlockFuser<'a, 'f, D, C>
where
    D: DepthImage,
    C: ColorImage,
{
    fn fuse_block(&self, key: Point3i, block: &mut BlockMut) -> usize {
        let params = self.params;
        let trunc = params.truncation_distance;
        let width = self.frame.width() as i32;
        let height = self.frame.height() as i32;
        let origin = params.block_min_voxel(key);

        let mut fused = 0;
        for i in 0..params.block_volume() {
            let voxel = origin + params.local_of_index(i);
            let p = self
                .volume_to_camera
                .transform_point(params.voxelf_to_volume(voxel.into()));
            let pixel = match self
                .intrinsics
                .project(p)
                .and_then(|uv| self.intrinsics.nearest_pixel(uv))
            {
                Some(pixel) if pixel.x() < width && pixel.y() < height => pixel,
                _ => continue,
            };
            let depth = match self.frame.valid_depth(pixel, params.max_depth) {
                Some(d) => d,
                None => continue,
            };

            let sdf = depth - p.z();
            if sdf < -trunc {
                continue;
            }
            fuse_observation(
                &mut block.tsdf[i],
                &mut block.weight[i],
                &mut block.color[i],
                sdf.min(trunc),
                1,
                self.frame.color(pixel),
            );
            fused += 1;
        }

        fused
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

    use crate::{ImageBuffer, Rgb, VolumeConfig};

    use pretty_assertions::assert_eq;

    fn config() -> VolumeConfig {
        VolumeConfig {
            block_side: 4,
            voxel_length: 0.05,
            truncation_distance: 0.1,
            max_depth: 3.0,
            bucket_count: 512,
            value_capacity: 1024,
            ..Default::default()
        }
    }

    fn camera() -> PinholeIntrinsics {
        PinholeIntrinsics {
            width: 16,
            height: 12,
            fx: 10.0,
            fy: 10.0,
            cx: 8.0,
            cy: 6.0,
        }
    }

    fn single_threaded<T: Send>(f: impl FnOnce() -> T + Send) -> T {
        rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap()
            .install(f)
    }

    #[test]
    fn touch_is_idempotent() {
        let mut volume = TsdfVolume::new(config()).unwrap();
        let depth = ImageBuffer::filled(16, 12, 1.0f32);
        let frame = RgbdFrame::depth_only(&depth);

        let (first, n, second) = single_threaded(|| {
            let first = volume.touch(&frame, &camera(), &Transform3::IDENTITY);
            let n = volume.allocated_block_count();
            let second = volume.touch(&frame, &camera(), &Transform3::IDENTITY);

            (first, n, second)
        });

        assert!(n > 0);
        assert_eq!(first.failures, 0);
        assert_eq!(second, first);
        assert_eq!(volume.allocated_block_count(), n);
    }

    #[test]
    fn touch_skips_invalid_and_masked_pixels() {
        let mut volume = TsdfVolume::new(config()).unwrap();
        let depth = ImageBuffer::from_fn(16, 12, |p| if p.x() < 8 { 1.0 } else { 0.0 });
        let mask = ImageBuffer::from_fn(16, 12, |p| (p.y() < 6) as u8);
        let frame = RgbdFrame::depth_only(&depth).with_mask(&mask);

        let stats = volume.touch(&frame, &camera(), &Transform3::IDENTITY);

        assert_eq!(stats.valid_pixels, 8 * 6);
    }

    #[test]
    fn touched_blocks_cover_the_surface() {
        let mut volume = TsdfVolume::new(config()).unwrap();
        let depth = ImageBuffer::filled(16, 12, 1.0f32);
        let frame = RgbdFrame::depth_only(&depth);

        volume.touch(&frame, &camera(), &Transform3::IDENTITY);

        // The principal ray hits the plane at (0, 0, 1), inside block (0, 0, 5) for 0.2m blocks.
        assert!(volume.hash_table().find(PointN([0, 0, 5])).is_some());
        assert!(volume.hash_table().find(PointN([0, 0, 10])).is_none());
    }

    #[test]
    fn exhausted_touch_counts_failures() {
        let mut volume = TsdfVolume::new(VolumeConfig {
            value_capacity: 3,
            ..config()
        })
        .unwrap();
        let depth = ImageBuffer::filled(16, 12, 1.0f32);
        let frame = RgbdFrame::depth_only(&depth);

        let stats = volume.touch(&frame, &camera(), &Transform3::IDENTITY);

        assert_eq!(volume.allocated_block_count(), 3);
        assert!(stats.failures > 0);
    }

    #[test]
    fn fuse_plane_at_known_depth() {
        let mut volume = TsdfVolume::new(config()).unwrap();
        let depth = ImageBuffer::filled(16, 12, 1.0f32);
        let color = ImageBuffer::filled(16, 12, Rgb::new(200, 100, 50));
        let frame = RgbdFrame::new(&depth, &color);

        let stats = volume.integrate(&frame, &camera(), &Transform3::IDENTITY, 0);
        assert!(stats.active_blocks > 0);
        assert!(stats.fused_voxels > 0);

        // Voxel (0, 0, 18) has its center at z = 0.925, 0.075 in front of the plane.
        let v = volume.view().voxel(PointN([0, 0, 18])).unwrap();
        assert!((v.tsdf - 0.075).abs() < 1e-5, "{}", v.tsdf);
        assert_eq!(v.weight, 1);
        assert_eq!(v.color, Rgb::new(200, 100, 50));

        // Voxel (0, 0, 21) is 0.075 behind the plane.
        let v = volume.view().voxel(PointN([0, 0, 21])).unwrap();
        assert!((v.tsdf + 0.075).abs() < 1e-5, "{}", v.tsdf);

        volume.integrate(&frame, &camera(), &Transform3::IDENTITY, 1);
        assert_eq!(volume.view().voxel(PointN([0, 0, 18])).unwrap().weight, 2);
    }

    #[test]
    fn fuse_only_updates_active_blocks() {
        let mut volume = TsdfVolume::new(config()).unwrap();
        let depth = ImageBuffer::filled(16, 12, 1.0f32);
        let frame = RgbdFrame::depth_only(&depth);

        volume.touch(&frame, &camera(), &Transform3::IDENTITY);
        volume.reset_active_indices();
        let fused = volume.fuse(&frame, &camera(), &Transform3::IDENTITY);

        assert_eq!(fused, 0);
    }

    #[test]
    fn frustum_rejects_blocks_behind_and_beside_the_camera() {
        let volume = TsdfVolume::new(config()).unwrap();
        let view = volume.view();
        let c = camera();
        let t = Transform3::IDENTITY;

        assert!(view.block_in_frustum(PointN([0, 0, 5]), &c, &t));
        assert!(!view.block_in_frustum(PointN([0, 0, -5]), &c, &t));
        assert!(!view.block_in_frustum(PointN([40, 0, 5]), &c, &t));
        // Beyond max depth.
        assert!(!view.block_in_frustum(PointN([0, 0, 20]), &c, &t));

        // Spans z in [-0.1, 0.1] of the camera.
        let shifted = Transform3::from_translation(PointN([0.0, 0.0, 0.1]));
        assert!(view.block_in_frustum(PointN([0, 0, -1]), &c, &shifted));
    }

    #[test]
    fn frustum_clips_blocks_that_straddle_the_camera_plane() {
        let volume = TsdfVolume::new(config()).unwrap();
        let view = volume.view();
        let c = camera();
        let shifted = Transform3::from_translation(PointN([0.0, 0.0, 0.1]));

        // Across the camera plane, but 20m off to either side.
        assert!(!view.block_in_frustum(PointN([100, 0, -1]), &c, &shifted));
        assert!(!view.block_in_frustum(PointN([-100, 0, -1]), &c, &shifted));
        assert!(!view.block_in_frustum(PointN([0, 100, -1]), &c, &shifted));

        // Only reaches past the camera plane by less than the near distance.
        let barely = Transform3::from_translation(PointN([0.0, 0.0, 0.0005]));
        assert!(!view.block_in_frustum(PointN([0, 0, -1]), &c, &barely));
    }

    #[test]
    fn allocation_quota_does_not_limit_touch() {
        let depth = ImageBuffer::filled(16, 12, 1.0f32);
        let frame = RgbdFrame::depth_only(&depth);
        let mut unlimited = TsdfVolume::new(config()).unwrap();
        let mut limited = TsdfVolume::new(VolumeConfig {
            allocations_per_round: Some(2),
            ..config()
        })
        .unwrap();

        let (expected, stats) = single_threaded(|| {
            unlimited.integrate(&frame, &camera(), &Transform3::IDENTITY, 0);
            let stats = limited.integrate(&frame, &camera(), &Transform3::IDENTITY, 0);

            (unlimited.allocated_block_count(), stats)
        });

        assert!(expected > 2);
        assert_eq!(stats.touch_failures, 0);
        assert_eq!(limited.allocated_block_count(), expected);

        // Bulk insertion is still limited.
        let keys = [PointN([100, 0, 0]), PointN([101, 0, 0]), PointN([102, 0, 0])];
        let report = single_threaded(|| limited.upload_keys(&keys));
        assert!(report.is_complete());
        assert_eq!(report.rounds, 2);
    }

    #[test]
    fn removed_block_is_not_fused_into_the_next_owner_of_its_slot() {
        let mut volume = TsdfVolume::new(config()).unwrap();
        let depth = ImageBuffer::filled(16, 12, 1.0f32);
        let frame = RgbdFrame::depth_only(&depth);
        let key = PointN([0, 0, 5]);

        volume.integrate(&frame, &camera(), &Transform3::IDENTITY, 0);
        let slot = volume.hash_table().find(key).unwrap();
        assert!(volume.active_entries().is_slot_active(slot));

        assert!(volume.remove_block(key));
        assert!(!volume.active_entries().is_slot_active(slot));
        volume.fuse(&frame, &camera(), &Transform3::IDENTITY);

        let fresh = PointN([50, 50, 50]);
        assert_eq!(volume.hash_table().try_insert(fresh), Ok(slot));
        let block = volume.block(fresh).unwrap();
        assert!(block.weight.iter().all(|w| *w == 0));
        assert!(block.tsdf.iter().all(|t| *t == 0.0));
    }

    #[test]
    fn contended_touch_gives_up_unless_the_key_is_committed() {
        // One bucket, so every key shares the lock.
        let table = SpatialHashTable::new(1, 8);
        let present = PointN([0, 0, 0]);
        table.try_insert(present).unwrap();

        let _guard = table.lock_bucket_of(present).unwrap();
        assert!(try_touch(&table, present));
        assert!(!try_touch(&table, PointN([1, 0, 0])));
        assert_eq!(table.len(), 1);
    }
}
