use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Weights saturate at this value. Once a voxel is saturated, each new observation moves its running average by a fixed
/// fraction, so older observations are progressively down-weighted.
pub const WEIGHT_MAX: u8 = 255;

/// An 8-bit RGB color.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Pod, Serialize, Zeroable)]
#[repr(C)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Self = Self::new(0, 0, 0);

    #[inline]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    #[inline]
    pub fn as_array(&self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    #[inline]
    pub fn from_array(c: [u8; 3]) -> Self {
        Self::new(c[0], c[1], c[2])
    }

    #[inline]
    pub fn to_f32(self) -> [f32; 3] {
        [self.r as f32, self.g as f32, self.b as f32]
    }

    /// Rounds and saturates each channel.
    #[inline]
    pub fn from_f32(c: [f32; 3]) -> Self {
        let q = |x: f32| x.round().max(0.0).min(255.0) as u8;

        Self::new(q(c[0]), q(c[1]), q(c[2]))
    }
}

/// One voxel of signed distance, saturating weight and color.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Voxel {
    pub tsdf: f32,
    pub weight: u8,
    pub color: Rgb,
}

impl Voxel {
    pub const EMPTY: Self = Self {
        tsdf: 0.0,
        weight: 0,
        color: Rgb::BLACK,
    };
}

/// Fuses one observation into a voxel with a weighted running average:
///
/// ```text
/// tsdf'   = (tsdf * w + sdf * w_new) / (w + w_new)
/// weight' = min(w + w_new, WEIGHT_MAX)
/// ```
///
/// `color` is averaged with the same weights. Passing `None` leaves the color unchanged.
#[inline]
pub fn fuse_observation(
    tsdf: &mut f32,
    weight: &mut u8,
    color: &mut Rgb,
    sdf: f32,
    new_weight: u8,
    new_color: Option<Rgb>,
) {
    if new_weight == 0 {
        return;
    }

    let w = *weight as f32;
    let w_new = new_weight as f32;
    let w_sum = w + w_new;

    *tsdf = (*tsdf * w + sdf * w_new) / w_sum;

    if let Some(new_color) = new_color {
        let old = color.to_f32();
        let new = new_color.to_f32();
        *color = Rgb::from_f32([
            (old[0] * w + new[0] * w_new) / w_sum,
            (old[1] * w + new[1] * w_new) / w_sum,
            (old[2] * w + new[2] * w_new) / w_sum,
        ]);
    }

    *weight = weight.saturating_add(new_weight).min(WEIGHT_MAX);
}

/// An owned copy of one block's voxels, in local row-major order (X fastest).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct VoxelBlock {
    pub tsdf: Vec<f32>,
    pub weight: Vec<u8>,
    pub color: Vec<Rgb>,
}

impl VoxelBlock {
    /// A block of `num_voxels` empty voxels.
    pub fn empty(num_voxels: usize) -> Self {
        Self {
            tsdf: vec![0.0; num_voxels],
            weight: vec![0; num_voxels],
            color: vec![Rgb::BLACK; num_voxels],
        }
    }

    pub fn fill_with(num_voxels: usize, mut f: impl FnMut(usize) -> Voxel) -> Self {
        let mut block = Self::empty(num_voxels);
        for i in 0..num_voxels {
            block.set(i, f(i));
        }

        block
    }

    /// The number of voxels, or `None` if the channels disagree.
    pub fn num_voxels(&self) -> Option<usize> {
        let n = self.tsdf.len();

        (self.weight.len() == n && self.color.len() == n).then(|| n)
    }

    #[inline]
    pub fn get(&self, index: usize) -> Voxel {
        Voxel {
            tsdf: self.tsdf[index],
            weight: self.weight[index],
            color: self.color[index],
        }
    }

    #[inline]
    pub fn set(&mut self, index: usize, voxel: Voxel) {
        self.tsdf[index] = voxel.tsdf;
        self.weight[index] = voxel.weight;
        self.color[index] = voxel.color;
    }

    /// The number of voxels that have been observed at least once.
    pub fn num_weighted_voxels(&self) -> usize {
        self.weight.iter().filter(|w| **w > 0).count()
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
