use crate::{BoundaryCache, Rgb, TsdfVolume, VolumeView};

use scalable_tsdf_core::prelude::*;

use rayon::prelude::*;

/// A point on the zero level set, found between two adjacent observed voxels of opposite sign.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceSample {
    /// World-space position.
    pub position: Point3f,
    /// World-space unit normal, pointing towards positive TSDF.
    pub normal: Point3f,
    pub color: Rgb,
}

impl TsdfVolume {
    /// Surface samples of the blocks in the current `ActiveEntryArray`.
    pub fn extract_surface_samples(&self) -> Vec<SurfaceSample> {
        let view = self.view();

        self.active_entries()
            .par_iter()
            .flat_map_iter(|entry| view.block_surface_samples(entry.key))
            .collect()
    }

    /// Collects every block, then extracts surface samples from all of them.
    pub fn extract_all_surface_samples(&mut self) -> Vec<SurfaceSample> {
        self.reset_active_indices();
        self.collect_all();

        self.extract_surface_samples()
    }
}

impl<'a> VolumeView<'a> {
    /// Samples every sign change between a voxel of block `key` and its `+X`, `+Y` or `+Z` neighbor.
    pub fn block_surface_samples(&self, key: Point3i) -> Vec<SurfaceSample> {
        let cache = BoundaryCache::new(*self, key);
        let params = self.params();
        let origin = params.block_min_voxel(key);

        let mut samples = Vec::new();
        for i in 0..params.block_volume() {
            let local = params.local_of_index(i);
            let v = match cache.voxel(local).filter(|v| v.weight > 0) {
                Some(v) => v,
                None => continue,
            };
            for axis in 0..3 {
                let mut step = Point3i::ZERO;
                step.0[axis] = 1;
                let n = match cache.voxel(local + step).filter(|n| n.weight > 0) {
                    Some(n) => n,
                    None => continue,
                };
                if (v.tsdf < 0.0) == (n.tsdf < 0.0) {
                    continue;
                }

                let t = v.tsdf / (v.tsdf - n.tsdf);
                let mut axis_dir = Point3f::ZERO;
                axis_dir.0[axis] = 1.0;
                let position = Point3f::from(origin + local) + axis_dir * t;

                let normal = match (cache.gradient(local), cache.gradient(local + step)) {
                    (Some(g0), Some(g1)) => (g0 * (1.0 - t) + g1 * t).normalized(),
                    _ => None,
                }
                .unwrap_or_else(|| axis_dir * (n.tsdf - v.tsdf).signum());

                let c0 = v.color.to_f32();
                let c1 = n.color.to_f32();
                let color = Rgb::from_f32([
                    c0[0] + (c1[0] - c0[0]) * t,
                    c0[1] + (c1[1] - c0[1]) * t,
                    c0[2] + (c1[2] - c0[2]) * t,
                ]);

                samples.push(SurfaceSample {
                    position: params.voxelf_to_world(position),
                    normal: params.volume_to_world.transform_vector(normal),
                    color,
                });
            }
        }

        samples
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
