use crate::{Rgb, Voxel, VoxelBlock};

use rayon::prelude::*;

/// Flat voxel storage for `capacity` blocks of `block_volume` voxels each.
///
/// Voxel `i` of the block in slot `s` is at index `s * block_volume + i` of each channel.
pub struct VoxelPool {
    block_volume: usize,
    tsdf: Vec<f32>,
    weight: Vec<u8>,
    color: Vec<Rgb>,
}

/// Shared access to the voxels of one slot.
#[derive(Clone, Copy)]
pub struct BlockRef<'a> {
    pub tsdf: &'a [f32],
    pub weight: &'a [u8],
    pub color: &'a [Rgb],
}

/// Exclusive access to the voxels of one slot.
pub struct BlockMut<'a> {
    pub tsdf: &'a mut [f32],
    pub weight: &'a mut [u8],
    pub color: &'a mut [Rgb],
}

impl<'a> BlockRef<'a> {
    #[inline]
    pub fn get(&self, index: usize) -> Voxel {
        Voxel {
            tsdf: self.tsdf[index],
            weight: self.weight[index],
            color: self.color[index],
        }
    }

    pub fn to_voxel_block(&self) -> VoxelBlock {
        VoxelBlock {
            tsdf: self.tsdf.to_vec(),
            weight: self.weight.to_vec(),
            color: self.color.to_vec(),
        }
    }
}

impl<'a> BlockMut<'a> {
    #[inline]
    pub fn set(&mut self, index: usize, voxel: Voxel) {
        self.tsdf[index] = voxel.tsdf;
        self.weight[index] = voxel.weight;
        self.color[index] = voxel.color;
    }

    pub fn copy_from(&mut self, block: &VoxelBlock) {
        self.tsdf.copy_from_slice(&block.tsdf);
        self.weight.copy_from_slice(&block.weight);
        self.color.copy_from_slice(&block.color);
    }

    pub fn clear(&mut self) {
        self.tsdf.iter_mut().for_each(|t| *t = 0.0);
        self.weight.iter_mut().for_each(|w| *w = 0);
        self.color.iter_mut().for_each(|c| *c = Rgb::BLACK);
    }
}

impl VoxelPool {
    /// Allocates zeroed storage. Aborts the process if the allocation fails.
    pub fn new(block_volume: usize, capacity: usize) -> Self {
        let n = block_volume * capacity;

        Self {
            block_volume,
            tsdf: vec![0.0; n],
            weight: vec![0; n],
            color: vec![Rgb::BLACK; n],
        }
    }

    pub fn empty(block_volume: usize) -> Self {
        Self::new(block_volume, 0)
    }

    #[inline]
    pub fn block_volume(&self) -> usize {
        self.block_volume
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        if self.block_volume == 0 {
            0
        } else {
            self.tsdf.len() / self.block_volume
        }
    }

    #[inline]
    fn range(&self, slot: u32) -> std::ops::Range<usize> {
        let start = slot as usize * self.block_volume;

        start..start + self.block_volume
    }

    #[inline]
    pub fn block(&self, slot: u32) -> BlockRef<'_> {
        let r = self.range(slot);

        BlockRef {
            tsdf: &self.tsdf[r.clone()],
            weight: &self.weight[r.clone()],
            color: &self.color[r],
        }
    }

    #[inline]
    pub fn block_mut(&mut self, slot: u32) -> BlockMut<'_> {
        let r = self.range(slot);

        BlockMut {
            tsdf: &mut self.tsdf[r.clone()],
            weight: &mut self.weight[r.clone()],
            color: &mut self.color[r],
        }
    }

    /// Reads voxel `index` of `slot` without any hash lookup. The caller must have resolved `slot` from a live entry.
    #[inline]
    pub fn voxel_unchecked(&self, slot: u32, index: usize) -> Voxel {
        debug_assert!((slot as usize) < self.capacity(), "slot {} out of range", slot);
        debug_assert!(index < self.block_volume, "voxel index {} out of range", index);

        let i = slot as usize * self.block_volume + index;

        Voxel {
            tsdf: self.tsdf[i],
            weight: self.weight[i],
            color: self.color[i],
        }
    }

    /// Every slot's voxels as disjoint mutable views, in slot order.
    pub fn par_blocks_mut(&mut self) -> impl IndexedParallelIterator<Item = BlockMut<'_>> {
        let n = self.block_volume.max(1);

        self.tsdf
            .par_chunks_mut(n)
            .zip(self.weight.par_chunks_mut(n))
            .zip(self.color.par_chunks_mut(n))
            .map(|((tsdf, weight), color)| BlockMut {
                tsdf,
                weight,
                color,
            })
    }

    /// Zeroes every voxel.
    pub fn clear(&mut self) {
        self.par_blocks_mut().for_each(|mut b| b.clear());
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

    use pretty_assertions::assert_eq;

    #[test]
    fn blocks_do_not_overlap() {
        let mut pool = VoxelPool::new(8, 3);

        pool.par_blocks_mut().enumerate().for_each(|(slot, mut b)| {
            for i in 0..8 {
                b.set(
                    i,
                    Voxel {
                        tsdf: slot as f32,
                        weight: i as u8,
                        color: Rgb::new(slot as u8, 0, 0),
                    },
                );
            }
        });

        assert_eq!(pool.capacity(), 3);
        for slot in 0..3u32 {
            let block = pool.block(slot);
            assert!(block.tsdf.iter().all(|t| *t == slot as f32));
            assert_eq!(block.weight, &[0, 1, 2, 3, 4, 5, 6, 7]);
            assert_eq!(pool.voxel_unchecked(slot, 7).color, Rgb::new(slot as u8, 0, 0));
        }

        pool.clear();
        assert!(pool.block(1).to_voxel_block() == VoxelBlock::empty(8));
    }
}
