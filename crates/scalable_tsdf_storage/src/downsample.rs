//! Building a coarser volume with twice the voxel length.
//!
//! Each coarse voxel averages the 2x2x2 fine voxels it covers, weighted by their weights. Fine voxels with zero weight
//! contribute nothing. The coarse weight is the mean weight of the contributing fine voxels.
//!
//! There are two ways to lay out the coarse blocks:
//! - `HalveBlockSide`: every fine block becomes a coarse block with the same key and half the block side
//! - `KeepBlockSide`: the 2x2x2 fine blocks `2K + {0, 1}^3` merge into coarse block `K`, which has the fine block side

use crate::{
    BlockRef, SmallKeyHashSet, TsdfVolume, Voxel, VolumeConfig, VolumeError, VolumeParameters,
    WEIGHT_MAX,
};

use scalable_tsdf_core::prelude::*;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info_span;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DownsampleMode {
    HalveBlockSide,
    KeepBlockSide,
}

impl Default for DownsampleMode {
    fn default() -> Self {
        DownsampleMode::HalveBlockSide
    }
}

/// The weighted average of `voxels`.
pub fn average_voxels(voxels: impl IntoIterator<Item = Voxel>) -> Voxel {
    let mut weight_sum = 0.0;
    let mut count = 0;
    let mut tsdf = 0.0;
    let mut color = [0.0; 3];
    for v in voxels.into_iter().filter(|v| v.weight > 0) {
        let w = v.weight as f32;
        weight_sum += w;
        count += 1;
        tsdf += w * v.tsdf;
        let c = v.color.to_f32();
        for i in 0..3 {
            color[i] += w * c[i];
        }
    }
    if count == 0 {
        return Voxel::EMPTY;
    }

    Voxel {
        tsdf: tsdf / weight_sum,
        weight: (weight_sum / count as f32).round().min(WEIGHT_MAX as f32) as u8,
        color: crate::Rgb::from_f32([
            color[0] / weight_sum,
            color[1] / weight_sum,
            color[2] / weight_sum,
        ]),
    }
}

impl TsdfVolume {
    /// Equivalent to `downsample_with_mode(DownsampleMode::HalveBlockSide)`.
    pub fn downsample(&self) -> Result<TsdfVolume, VolumeError> {
        self.downsample_with_mode(DownsampleMode::default())
    }

    /// Builds a new volume with twice the voxel length and truncation distance. The coarse volume has the same bucket
    /// count and capacity. Coarse blocks that could not be inserted are dropped (see `upload_keys`).
    pub fn downsample_with_mode(&self, mode: DownsampleMode) -> Result<TsdfVolume, VolumeError> {
        let span = info_span!("downsample");
        let _enter = span.enter();

        let fine = self.config();
        let block_side = match mode {
            DownsampleMode::HalveBlockSide => fine.block_side / 2,
            DownsampleMode::KeepBlockSide => fine.block_side,
        };
        let mut coarse = TsdfVolume::new(VolumeConfig {
            block_side,
            voxel_length: 2.0 * fine.voxel_length,
            truncation_distance: 2.0 * fine.truncation_distance,
            ..fine
        })?;

        match mode {
            DownsampleMode::HalveBlockSide => self.downsample_halving(&mut coarse),
            DownsampleMode::KeepBlockSide => self.downsample_merging(&mut coarse),
        }

        Ok(coarse)
    }

    fn downsample_halving(&self, coarse: &mut TsdfVolume) {
        let entries = self.hash_table().compact_all();
        let keys: Vec<_> = entries.iter().map(|e| e.key).collect();
        let report = coarse.upload_keys(&keys);

        let mut fine_slot_of_coarse = vec![None; coarse.hash_table().value_capacity()];
        for (entry, slot) in entries.iter().zip(report.slots.iter()) {
            if let Some(slot) = slot {
                fine_slot_of_coarse[*slot as usize] = Some(entry.slot);
            }
        }

        let fine_params = self.params();
        let fine_pool = self.view().pool();
        let coarse_params = *coarse.params();
        coarse
            .pool_mut()
            .par_blocks_mut()
            .zip(fine_slot_of_coarse.par_iter())
            .for_each(|(mut block, fine_slot)| {
                let fine_block = match fine_slot {
                    Some(s) => fine_pool.block(*s),
                    None => return,
                };
                for i in 0..coarse_params.block_volume() {
                    let fine_min = coarse_params.local_of_index(i) * 2;
                    block.set(
                        i,
                        average_voxels(cell_voxels(fine_params, &[Some(fine_block)], fine_min)),
                    );
                }
            });
    }

    fn downsample_merging(&self, coarse: &mut TsdfVolume) {
        let keys: SmallKeyHashSet<Point3i> = self
            .hash_table()
            .keys()
            .into_iter()
            .map(|k| k.scalar_div_floor(2))
            .collect();
        let keys: Vec<_> = keys.into_iter().collect();
        let report = coarse.upload_keys(&keys);

        let mut key_of_coarse_slot = vec![None; coarse.hash_table().value_capacity()];
        for (key, slot) in keys.iter().zip(report.slots.iter()) {
            if let Some(slot) = slot {
                key_of_coarse_slot[*slot as usize] = Some(*key);
            }
        }

        let view = self.view();
        let fine_params = self.params();
        let coarse_params = *coarse.params();
        coarse
            .pool_mut()
            .par_blocks_mut()
            .zip(key_of_coarse_slot.par_iter())
            .for_each(|(mut block, key)| {
                let key = match key {
                    Some(k) => *k,
                    None => return,
                };
                // Fine blocks 2K + {0, 1}^3, X fastest.
                let mut fine_blocks = [None; 8];
                for (b, i) in fine_blocks.iter_mut().zip(0..) {
                    let offset = PointN([i & 1, (i >> 1) & 1, (i >> 2) & 1]);
                    *b = view.block(key * 2 + offset);
                }

                for i in 0..coarse_params.block_volume() {
                    // Relative to the minimum voxel of fine block 2K.
                    let fine_min = coarse_params.local_of_index(i) * 2;
                    block.set(
                        i,
                        average_voxels(cell_voxels(fine_params, &fine_blocks, fine_min)),
                    );
                }
            });
    }
}

/// The voxels of the 2x2x2 cell at `fine_min`, relative to the minimum voxel of `blocks[0]`. `blocks` holds the fine
/// blocks at offsets `{0, 1}^3` in X-fastest order; only the first is read when the cell can't leave it.
fn cell_voxels<'a>(
    fine_params: &'a VolumeParameters,
    blocks: &'a [Option<BlockRef<'a>>],
    fine_min: Point3i,
) -> impl Iterator<Item = Voxel> + 'a {
    let n = fine_params.block_side;

    Extent3i::from_min_and_shape(fine_min, Point3i::fill(2))
        .iter_points()
        .filter_map(move |p| {
            let offset = p.scalar_div_floor(n);
            let b = (offset.x() + 2 * offset.y() + 4 * offset.z()) as usize;
            let block = blocks.get(b).copied().flatten()?;

            Some(block.get(fine_params.local_index(p - offset * n)))
        })
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

    use crate::Rgb;

    use pretty_assertions::assert_eq;

    fn fine_config(block_side: u32) -> VolumeConfig {
        VolumeConfig {
            block_side,
            voxel_length: 0.1,
            truncation_distance: 0.3,
            bucket_count: 64,
            value_capacity: 64,
            ..Default::default()
        }
    }

    #[test]
    fn average_ignores_unobserved_voxels() {
        let v = average_voxels(vec![
            Voxel {
                tsdf: 1.0,
                weight: 1,
                color: Rgb::new(0, 0, 0),
            },
            Voxel {
                tsdf: -0.5,
                weight: 3,
                color: Rgb::new(100, 200, 40),
            },
            Voxel {
                tsdf: 9.0,
                weight: 0,
                color: Rgb::new(255, 255, 255),
            },
        ]);

        assert_eq!(v.tsdf, (1.0 - 1.5) / 4.0);
        assert_eq!(v.weight, 2);
        assert_eq!(v.color, Rgb::new(75, 150, 30));
        assert_eq!(average_voxels(vec![Voxel::EMPTY; 8]), Voxel::EMPTY);
    }

    #[test]
    fn halving_keeps_keys_and_doubles_lengths() {
        let fine = TsdfVolume::new(fine_config(4)).unwrap();
        fine.hash_table().try_insert(PointN([1, -2, 3])).unwrap();

        let coarse = fine.downsample().unwrap();

        assert_eq!(coarse.params().block_side, 2);
        assert_eq!(coarse.params().voxel_length, 0.2);
        assert_eq!(coarse.params().truncation_distance, 0.6);
        assert!(coarse.hash_table().find(PointN([1, -2, 3])).is_some());
        assert_eq!(coarse.allocated_block_count(), 1);
    }

    #[test]
    fn halving_side_two_is_rejected() {
        let fine = TsdfVolume::new(fine_config(2)).unwrap();

        assert!(matches!(fine.downsample(), Err(VolumeError::InvalidConfig(_))));
    }

    #[test]
    fn merging_combines_neighbor_blocks() {
        let mut fine = TsdfVolume::new(fine_config(4)).unwrap();
        let params = *fine.params();
        for key in [PointN([0, 0, 0]), PointN([1, 0, 0]), PointN([-1, 0, 0])].iter() {
            let slot = fine.hash_table().try_insert(*key).unwrap();
            let mut block = fine.pool_mut().block_mut(slot);
            for i in 0..params.block_volume() {
                let x = params.block_min_voxel(*key).x() + params.local_of_index(i).x();
                block.set(
                    i,
                    Voxel {
                        tsdf: x as f32,
                        weight: 2,
                        color: Rgb::BLACK,
                    },
                );
            }
        }

        let coarse = fine.downsample_with_mode(DownsampleMode::KeepBlockSide).unwrap();

        assert_eq!(coarse.params().block_side, 4);
        assert_eq!(coarse.allocated_block_count(), 2);
        // Coarse voxel x covers fine voxels 2x and 2x + 1.
        for (x, expected) in [(0, 0.5), (3, 6.5), (-1, -1.5)].iter() {
            let v = coarse.view().voxel(PointN([*x, 0, 0])).unwrap();
            assert_eq!(v.tsdf, *expected);
            assert_eq!(v.weight, 2);
        }
        // Fine block (0, 1, 0) is unallocated, so this coarse voxel has no observations.
        assert_eq!(coarse.view().voxel(PointN([0, 2, 0])).unwrap(), Voxel::EMPTY);
    }
}
