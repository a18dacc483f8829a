//! Interpolated reads at fractional voxel coordinates.
//!
//! Every accessor resolves blocks through the hash table, so it is safe to call with any point. A sample needs all 8
//! surrounding voxels; `tsdf_at` and `color_at` return `None` if any of them is unallocated or has zero weight.

use crate::{Rgb, TsdfVolume, Voxel, VolumeView};

use scalable_tsdf_core::prelude::*;

/// The 8 lattice offsets of a unit cell, in X-fastest order.
pub(crate) const CELL_CORNERS: [[i32; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [0, 1, 0],
    [1, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [0, 1, 1],
    [1, 1, 1],
];

/// Trilinear weights of the `CELL_CORNERS` for the fractional offset `r` in `[0, 1]^3`.
#[inline]
pub(crate) fn trilinear_weights(r: Point3f) -> [f32; 8] {
    let mut w = [0.0; 8];
    for (wi, c) in w.iter_mut().zip(CELL_CORNERS.iter()) {
        let f = |axis: usize| {
            if c[axis] == 0 {
                1.0 - r.at(axis)
            } else {
                r.at(axis)
            }
        };
        *wi = f(0) * f(1) * f(2);
    }

    w
}

/// Interpolates the TSDF of 8 observed corner voxels.
#[inline]
pub(crate) fn interpolate_tsdf(corners: &[Voxel; 8], r: Point3f) -> Option<f32> {
    if corners.iter().any(|v| v.weight == 0) {
        return None;
    }

    Some(
        trilinear_weights(r)
            .iter()
            .zip(corners.iter())
            .map(|(w, v)| w * v.tsdf)
            .sum(),
    )
}

#[inline]
pub(crate) fn interpolate_color(corners: &[Voxel; 8], r: Point3f) -> Option<Rgb> {
    if corners.iter().any(|v| v.weight == 0) {
        return None;
    }

    let mut c = [0.0; 3];
    for (w, v) in trilinear_weights(r).iter().zip(corners.iter()) {
        let vc = v.color.to_f32();
        for i in 0..3 {
            c[i] += w * vc[i];
        }
    }

    Some(Rgb::from_f32(c))
}

impl<'a> VolumeView<'a> {
    /// The 8 voxels around `voxel`, or `None` if any is unallocated. Also returns the fractional offset into the cell.
    fn cell(&self, voxel: Point3f) -> Option<([Voxel; 8], Point3f)> {
        if !voxel.fits_in_i32() {
            return None;
        }
        let base = voxel.in_voxel();
        let r = voxel - Point3f::from(base);

        let mut corners = [Voxel::EMPTY; 8];
        for (v, c) in corners.iter_mut().zip(CELL_CORNERS.iter()) {
            *v = self.voxel(base + PointN(*c))?;
        }

        Some((corners, r))
    }

    /// The trilinearly interpolated TSDF at fractional voxel coordinate `voxel`.
    pub fn tsdf_at(&self, voxel: Point3f) -> Option<f32> {
        let (corners, r) = self.cell(voxel)?;

        interpolate_tsdf(&corners, r)
    }

    /// The trilinearly interpolated weight at `voxel`, rounded. Unallocated voxels count as zero weight.
    pub fn weight_at(&self, voxel: Point3f) -> u8 {
        if !voxel.fits_in_i32() {
            return 0;
        }
        let base = voxel.in_voxel();
        let r = voxel - Point3f::from(base);

        let w: f32 = trilinear_weights(r)
            .iter()
            .zip(CELL_CORNERS.iter())
            .map(|(w, c)| {
                let weight = self.voxel(base + PointN(*c)).map_or(0, |v| v.weight);

                w * weight as f32
            })
            .sum();

        w.round().min(255.0) as u8
    }

    pub fn color_at(&self, voxel: Point3f) -> Option<Rgb> {
        let (corners, r) = self.cell(voxel)?;

        interpolate_color(&corners, r)
    }

    /// The central difference of `tsdf_at` with a one voxel step, in TSDF units per voxel.
    pub fn gradient_at(&self, voxel: Point3f) -> Option<Point3f> {
        let mut g = Point3f::ZERO;
        for axis in 0..3 {
            let mut d = Point3f::ZERO;
            d.0[axis] = 1.0;
            let plus = self.tsdf_at(voxel + d)?;
            let minus = self.tsdf_at(voxel - d)?;
            g.0[axis] = (plus - minus) / 2.0;
        }

        Some(g)
    }

    pub fn tsdf_at_world(&self, p: Point3f) -> Option<f32> {
        self.tsdf_at(self.world_to_voxelf(p))
    }

    pub fn weight_at_world(&self, p: Point3f) -> u8 {
        self.weight_at(self.world_to_voxelf(p))
    }

    pub fn color_at_world(&self, p: Point3f) -> Option<Rgb> {
        self.color_at(self.world_to_voxelf(p))
    }

    /// The gradient at world point `p`, rotated into world space.
    pub fn gradient_at_world(&self, p: Point3f) -> Option<Point3f> {
        self.gradient_at(self.world_to_voxelf(p))
            .map(|g| self.params().volume_to_world.transform_vector(g))
    }
}

impl TsdfVolume {
    pub fn tsdf_at(&self, voxel: Point3f) -> Option<f32> {
        self.view().tsdf_at(voxel)
    }

    pub fn weight_at(&self, voxel: Point3f) -> u8 {
        self.view().weight_at(voxel)
    }

    pub fn color_at(&self, voxel: Point3f) -> Option<Rgb> {
        self.view().color_at(voxel)
    }

    pub fn gradient_at(&self, voxel: Point3f) -> Option<Point3f> {
        self.view().gradient_at(voxel)
    }

    pub fn tsdf_at_world(&self, p: Point3f) -> Option<f32> {
        self.view().tsdf_at_world(p)
    }

    pub fn weight_at_world(&self, p: Point3f) -> u8 {
        self.view().weight_at_world(p)
    }

    pub fn color_at_world(&self, p: Point3f) -> Option<Rgb> {
        self.view().color_at_world(p)
    }

    pub fn gradient_at_world(&self, p: Point3f) -> Option<Point3f> {
        self.view().gradient_at_world(p)
    }

    pub fn world_to_voxel(&self, p: Point3f) -> Point3i {
        self.view().world_to_voxel(p)
    }

    pub fn voxel_to_world(&self, voxel: Point3i) -> Point3f {
        self.view().voxel_to_world(voxel)
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

    use crate::VolumeConfig;

    use pretty_assertions::assert_eq;

    /// A volume with 2x1x1 blocks of side 4 where `tsdf = x` at every voxel.
    fn ramp_volume(weight: u8) -> TsdfVolume {
        let mut volume = TsdfVolume::new(VolumeConfig {
            block_side: 4,
            voxel_length: 0.1,
            bucket_count: 16,
            value_capacity: 16,
            ..Default::default()
        })
        .unwrap();
        let params = *volume.params();
        for key in [PointN([0, 0, 0]), PointN([1, 0, 0])].iter() {
            let slot = volume.hash_table().try_insert(*key).unwrap();
            let mut block = volume.pool_mut().block_mut(slot);
            for i in 0..params.block_volume() {
                let x = params.block_min_voxel(*key).x() + params.local_of_index(i).x();
                block.set(
                    i,
                    Voxel {
                        tsdf: x as f32,
                        weight,
                        color: Rgb::new(10 * x as u8, 0, 0),
                    },
                );
            }
        }

        volume
    }

    #[test]
    fn tsdf_interpolates_across_blocks() {
        let volume = ramp_volume(3);

        assert_eq!(volume.tsdf_at(PointN([3.5, 1.0, 1.0])), Some(3.5));
        assert_eq!(volume.color_at(PointN([3.5, 1.0, 1.0])), Some(Rgb::new(35, 0, 0)));
        assert_eq!(volume.weight_at(PointN([3.25, 1.0, 1.0])), 3);
    }

    #[test]
    fn missing_corners_give_none() {
        let volume = ramp_volume(3);

        // The cell at y = 3.5 reaches into unallocated block (0, 1, 0).
        assert_eq!(volume.tsdf_at(PointN([1.0, 3.5, 1.0])), None);
        assert_eq!(volume.weight_at(PointN([1.0, 3.5, 1.0])), 2);
        assert_eq!(volume.tsdf_at(PointN([-0.5, 1.0, 1.0])), None);
        assert_eq!(volume.tsdf_at(PointN([f32::NAN, 1.0, 1.0])), None);
    }

    #[test]
    fn unobserved_voxels_give_none() {
        let volume = ramp_volume(0);

        assert_eq!(volume.tsdf_at(PointN([1.0, 1.0, 1.0])), None);
        assert_eq!(volume.weight_at(PointN([1.0, 1.0, 1.0])), 0);
    }

    #[test]
    fn gradient_of_ramp() {
        let volume = ramp_volume(1);

        assert_eq!(
            volume.gradient_at(PointN([3.0, 1.5, 1.5])),
            Some(PointN([1.0, 0.0, 0.0]))
        );
        assert_eq!(volume.gradient_at(PointN([0.5, 1.5, 1.5])), None);
    }

    #[test]
    fn world_accessors_match_voxel_accessors() {
        let volume = ramp_volume(2);
        let p = volume.voxel_to_world(PointN([5, 2, 2]));

        assert_eq!(volume.world_to_voxel(p), PointN([5, 2, 2]));
        let t = volume.tsdf_at_world(p).unwrap();
        assert!((t - 5.0).abs() < 1e-4, "{}", t);
    }
}
