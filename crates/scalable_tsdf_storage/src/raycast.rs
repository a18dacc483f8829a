use crate::{Rgb, TsdfVolume, VolumeView};

use scalable_tsdf_core::prelude::*;

use rayon::prelude::*;
use tracing::info_span;

/// Where a camera ray first crosses the surface from outside (positive TSDF) to inside.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaycastHit {
    /// World-space position.
    pub vertex: Point3f,
    /// World-space unit normal, or zero if the gradient is unavailable.
    pub normal: Point3f,
    pub color: Rgb,
}

/// Per-pixel ray casting results in row-major order.
#[derive(Clone, Debug, PartialEq)]
pub struct RaycastImage {
    width: u32,
    height: u32,
    hits: Vec<Option<RaycastHit>>,
}

impl RaycastImage {
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, pixel: Point2i) -> Option<&RaycastHit> {
        if pixel.x() < 0
            || pixel.y() < 0
            || pixel.x() as u32 >= self.width
            || pixel.y() as u32 >= self.height
        {
            return None;
        }

        self.hits[pixel.y() as usize * self.width as usize + pixel.x() as usize].as_ref()
    }

    pub fn hits(&self) -> &[Option<RaycastHit>] {
        &self.hits
    }

    pub fn num_hits(&self) -> usize {
        self.hits.iter().filter(|h| h.is_some()).count()
    }
}

impl TsdfVolume {
    /// Marches a ray through every pixel of the camera up to `max_depth`.
    pub fn raycast(
        &self,
        intrinsics: &PinholeIntrinsics,
        camera_to_world: &Transform3,
    ) -> RaycastImage {
        let span = info_span!("raycast");
        let _enter = span.enter();

        let view = self.view();
        let width = intrinsics.width as usize;
        let hits = (0..intrinsics.num_pixels())
            .into_par_iter()
            .map(|i| {
                let pixel = PointN([(i % width) as i32, (i / width) as i32]);

                view.raycast_pixel(pixel, intrinsics, camera_to_world)
            })
            .collect();

        RaycastImage {
            width: intrinsics.width,
            height: intrinsics.height,
            hits,
        }
    }
}

impl<'a> VolumeView<'a> {
    /// Marches along the ray through `pixel`. The step is half a block through unallocated space and the TSDF (at
    /// least one voxel) elsewhere.
    pub fn raycast_pixel(
        &self,
        pixel: Point2i,
        intrinsics: &PinholeIntrinsics,
        camera_to_world: &Transform3,
    ) -> Option<RaycastHit> {
        let params = self.params();
        let origin = camera_to_world.translation;
        // Parameterized by camera depth, so `t` is the z of the sample in camera space.
        let direction = camera_to_world.transform_vector(intrinsics.inverse_project_pixel(pixel, 1.0));
        let meters_per_t = direction.norm();
        let min_step = params.voxel_length / meters_per_t;
        let skip_step = 0.5 * params.block_length() / meters_per_t;

        let mut t = min_step;
        let mut previous: Option<(f32, f32)> = None;
        while t < params.max_depth {
            let tsdf = match self.tsdf_at_world(origin + direction * t) {
                Some(s) => s,
                None => {
                    previous = None;
                    t += skip_step;
                    continue;
                }
            };

            if let Some((t_prev, tsdf_prev)) = previous {
                if tsdf_prev > 0.0 && tsdf <= 0.0 {
                    let t_hit = t_prev + (t - t_prev) * tsdf_prev / (tsdf_prev - tsdf);
                    let vertex = origin + direction * t_hit;
                    let normal = self
                        .gradient_at_world(vertex)
                        .and_then(|g| g.normalized())
                        .unwrap_or(Point3f::ZERO);
                    let color = self.color_at_world(vertex).unwrap_or(Rgb::BLACK);

                    return Some(RaycastHit {
                        vertex,
                        normal,
                        color,
                    });
                }
            }

            previous = Some((t, tsdf));
            t += (0.8 * tsdf).max(params.voxel_length) / meters_per_t;
        }

        None
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

    use crate::{ImageBuffer, RgbdFrame, VolumeConfig};

    use pretty_assertions::assert_eq;

    fn camera() -> PinholeIntrinsics {
        PinholeIntrinsics {
            width: 8,
            height: 6,
            fx: 8.0,
            fy: 8.0,
            cx: 4.0,
            cy: 3.0,
        }
    }

    #[test]
    fn raycast_finds_integrated_plane() {
        let mut volume = TsdfVolume::new(VolumeConfig {
            block_side: 4,
            voxel_length: 0.02,
            truncation_distance: 0.08,
            max_depth: 2.0,
            bucket_count: 1024,
            value_capacity: 2048,
            ..Default::default()
        })
        .unwrap();
        let depth = ImageBuffer::filled(8, 6, 1.0f32);
        let color = ImageBuffer::filled(8, 6, Rgb::new(30, 60, 90));
        let frame = RgbdFrame::new(&depth, &color);
        volume.integrate(&frame, &camera(), &Transform3::IDENTITY, 0);

        let image = volume.raycast(&camera(), &Transform3::IDENTITY);

        let hit = image.get(PointN([4, 3])).unwrap();
        assert!((hit.vertex.z() - 1.0).abs() < 0.02, "{:?}", hit);
        assert!(hit.normal.z() < -0.9, "{:?}", hit);
        assert_eq!(hit.color, Rgb::new(30, 60, 90));
    }

    #[test]
    fn raycast_of_empty_volume_misses() {
        let volume = TsdfVolume::new(VolumeConfig {
            bucket_count: 16,
            value_capacity: 16,
            ..Default::default()
        })
        .unwrap();

        let image = volume.raycast(&camera(), &Transform3::IDENTITY);

        assert_eq!(image.num_hits(), 0);
        assert_eq!(image.hits().len(), 48);
        assert!(image.get(PointN([8, 0])).is_none());
    }
}
