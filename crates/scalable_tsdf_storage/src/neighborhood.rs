use crate::{sampling, Voxel, VolumeView};

use scalable_tsdf_core::prelude::*;

/// The slots of a block and its 26 neighbors, resolved once so that reads near the block's faces don't hash.
///
/// Local coordinates are relative to the center block's minimum voxel and may range over `[-N, 2N)` on each axis. Reads
/// inside `[0, N)^3` go straight to the center slot.
pub struct BoundaryCache<'a> {
    view: VolumeView<'a>,
    key: Point3i,
    // Indexed by `offset_index`.
    slots: [Option<u32>; 27],
}

/// The index of the neighbor at `offset` (each component in `-1..=1`) in a `BoundaryCache`.
#[inline]
pub fn offset_index(offset: Point3i) -> usize {
    ((offset.x() + 1) + 3 * (offset.y() + 1) + 9 * (offset.z() + 1)) as usize
}

const CENTER: usize = 13;

impl<'a> BoundaryCache<'a> {
    pub fn new(view: VolumeView<'a>, key: Point3i) -> Self {
        let mut slots = [None; 27];
        for (slot, offset) in slots.iter_mut().zip(Point3i::moore_offsets_with_center()) {
            *slot = view.slot_of_block(key + offset);
        }

        Self { view, key, slots }
    }

    #[inline]
    pub fn key(&self) -> Point3i {
        self.key
    }

    /// The slot of the center block.
    #[inline]
    pub fn center_slot(&self) -> Option<u32> {
        self.slots[CENTER]
    }

    /// The slot of the neighbor at `offset`.
    #[inline]
    pub fn neighbor_slot(&self, offset: Point3i) -> Option<u32> {
        self.slots[offset_index(offset)]
    }

    /// True if reading `local` (or its trilinear cell, or its central-difference stencil when `for_gradient`) may need
    /// a neighbor block.
    #[inline]
    pub fn on_boundary(block_side: i32, local: Point3i, for_gradient: bool) -> bool {
        if for_gradient {
            local.0.iter().any(|c| *c < 1 || *c >= block_side - 2)
        } else {
            local.0.iter().any(|c| *c >= block_side - 1)
        }
    }

    #[inline]
    fn is_interior(&self, local: Point3i) -> bool {
        let n = self.view.block_side();

        local.0.iter().all(|c| (0..n).contains(c))
    }

    /// The voxel at `local`, or `None` if the block containing it is unallocated.
    #[inline]
    pub fn voxel(&self, local: Point3i) -> Option<Voxel> {
        let n = self.view.block_side();
        if self.is_interior(local) {
            return self
                .center_slot()
                .map(|s| self.view.voxel_in_slot_unchecked(s, local));
        }

        let offset = local.scalar_div_floor(n);
        debug_assert!(
            offset.0.iter().all(|c| (-1..=1).contains(c)),
            "{:?} is outside the neighborhood",
            local
        );
        let slot = self.neighbor_slot(offset)?;

        Some(self.view.voxel_in_slot_unchecked(slot, local - offset * n))
    }

    /// The TSDF at `local`, if it has been observed.
    #[inline]
    pub fn tsdf(&self, local: Point3i) -> Option<f32> {
        self.voxel(local).filter(|v| v.weight > 0).map(|v| v.tsdf)
    }

    /// The interpolated TSDF at fractional local coordinate `local`.
    pub fn tsdf_at(&self, local: Point3f) -> Option<f32> {
        let base = local.in_voxel();
        let r = local - Point3f::from(base);

        let mut corners = [Voxel::EMPTY; 8];
        if !Self::on_boundary(self.view.block_side(), base, false) && self.is_interior(base) {
            let slot = self.center_slot()?;
            for (v, c) in corners.iter_mut().zip(sampling::CELL_CORNERS.iter()) {
                *v = self.view.voxel_in_slot_unchecked(slot, base + PointN(*c));
            }
        } else {
            for (v, c) in corners.iter_mut().zip(sampling::CELL_CORNERS.iter()) {
                *v = self.voxel(base + PointN(*c))?;
            }
        }

        sampling::interpolate_tsdf(&corners, r)
    }

    /// The central difference of the TSDF at integer local coordinate `local`, in TSDF units per voxel.
    pub fn gradient(&self, local: Point3i) -> Option<Point3f> {
        let mut g = Point3f::ZERO;
        for axis in 0..3 {
            let mut d = Point3i::ZERO;
            d.0[axis] = 1;
            let plus = self.tsdf(local + d)?;
            let minus = self.tsdf(local - d)?;
            g.0[axis] = (plus - minus) / 2.0;
        }

        Some(g)
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

    use crate::{Rgb, TsdfVolume, VolumeConfig};

    use pretty_assertions::assert_eq;

    /// Allocates a 3x3x3 neighborhood of side-4 blocks around the origin where `tsdf = x + 2y + 3z` (global voxels).
    fn linear_volume() -> TsdfVolume {
        let mut volume = TsdfVolume::new(VolumeConfig {
            block_side: 4,
            voxel_length: 0.1,
            bucket_count: 64,
            value_capacity: 64,
            ..Default::default()
        })
        .unwrap();
        let params = *volume.params();
        for offset in Point3i::moore_offsets_with_center() {
            let slot = volume.hash_table().try_insert(offset).unwrap();
            let mut block = volume.pool_mut().block_mut(slot);
            for i in 0..params.block_volume() {
                let p = params.block_min_voxel(offset) + params.local_of_index(i);
                block.set(
                    i,
                    Voxel {
                        tsdf: (p.x() + 2 * p.y() + 3 * p.z()) as f32,
                        weight: 1,
                        color: Rgb::BLACK,
                    },
                );
            }
        }

        volume
    }

    #[test]
    fn offsets_are_linearized_like_moore_iteration() {
        for (i, offset) in Point3i::moore_offsets_with_center().enumerate() {
            assert_eq!(offset_index(offset), i);
        }
        assert_eq!(offset_index(Point3i::ZERO), CENTER);
    }

    #[test]
    fn boundary_classification() {
        assert!(!BoundaryCache::on_boundary(8, PointN([3, 3, 3]), false));
        assert!(BoundaryCache::on_boundary(8, PointN([7, 3, 3]), false));
        assert!(!BoundaryCache::on_boundary(8, PointN([0, 3, 3]), false));
        assert!(BoundaryCache::on_boundary(8, PointN([0, 3, 3]), true));
        assert!(BoundaryCache::on_boundary(8, PointN([3, 6, 3]), true));
        assert!(!BoundaryCache::on_boundary(8, PointN([1, 5, 3]), true));
    }

    #[test]
    fn reads_cross_block_faces() {
        let volume = linear_volume();
        let cache = BoundaryCache::new(volume.view(), Point3i::ZERO);

        for local in [PointN([-1, 0, 0]), PointN([4, 4, 4]), PointN([2, -3, 7])].iter() {
            let expected = volume.view().voxel(*local).map(|v| v.tsdf);
            assert_eq!(cache.tsdf(*local), expected);
        }
    }

    #[test]
    fn boundary_and_hashed_sampling_agree() {
        let volume = linear_volume();
        let cache = BoundaryCache::new(volume.view(), Point3i::ZERO);

        for local in [
            PointN([1.5, 1.25, 0.5]),
            PointN([3.5, 3.5, 3.5]),
            PointN([-0.5, 2.0, 4.25]),
        ]
        .iter()
        {
            assert_eq!(cache.tsdf_at(*local), volume.tsdf_at(*local));
        }
        assert_eq!(cache.gradient(PointN([3, 0, 2])), Some(PointN([1.0, 2.0, 3.0])));
    }

    #[test]
    fn missing_neighbors_stop_reads() {
        let volume = linear_volume();
        let cache = BoundaryCache::new(volume.view(), PointN([1, 1, 1]));

        assert!(cache.center_slot().is_some());
        assert_eq!(cache.neighbor_slot(PointN([1, 0, 0])), None);
        assert_eq!(cache.tsdf(PointN([4, 0, 0])), None);
        assert_eq!(cache.gradient(PointN([3, 1, 1])), None);
    }
}
