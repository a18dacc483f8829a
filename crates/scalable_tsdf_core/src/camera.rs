use crate::{Point2f, Point2i, Point3f, PointN};

use serde::{Deserialize, Serialize};

/// Pinhole camera intrinsics for a `width x height` image.
///
/// The camera looks down `+Z`, with `+X` to the right and `+Y` down the image.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct PinholeIntrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl PinholeIntrinsics {
    /// Projects a camera-space point onto the image plane. Returns `None` for points at or behind the camera.
    #[inline]
    pub fn project(&self, p: Point3f) -> Option<Point2f> {
        if p.z() <= 0.0 {
            return None;
        }

        Some(self.project_unchecked(p))
    }

    /// Like `project`, but without the `z > 0` check. The result is meaningless for `z <= 0`.
    #[inline]
    pub fn project_unchecked(&self, p: Point3f) -> Point2f {
        PointN([
            self.fx * p.x() / p.z() + self.cx,
            self.fy * p.y() / p.z() + self.cy,
        ])
    }

    /// The camera-space point at `depth` along the ray through `pixel`.
    #[inline]
    pub fn inverse_project(&self, pixel: Point2f, depth: f32) -> Point3f {
        PointN([
            (pixel.x() - self.cx) * depth / self.fx,
            (pixel.y() - self.cy) * depth / self.fy,
            depth,
        ])
    }

    /// The camera-space point at `depth` behind the center of the integer pixel `pixel`.
    #[inline]
    pub fn inverse_project_pixel(&self, pixel: Point2i, depth: f32) -> Point3f {
        self.inverse_project(Point2f::from(pixel), depth)
    }

    #[inline]
    pub fn contains_pixel(&self, pixel: Point2i) -> bool {
        pixel.x() >= 0
            && pixel.y() >= 0
            && (pixel.x() as u32) < self.width
            && (pixel.y() as u32) < self.height
    }

    /// The pixel whose sample position is nearest to the sub-pixel coordinate `p`, if it lies in the image.
    #[inline]
    pub fn nearest_pixel(&self, p: Point2f) -> Option<Point2i> {
        let pixel = p.round().as_2i();

        self.contains_pixel(pixel).then(|| pixel)
    }

    #[inline]
    pub fn num_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Intrinsics for the same camera at `1 / 2^level` of the resolution.
    pub fn downscaled(&self, level: u32) -> Self {
        let s = (1u32 << level) as f32;

        Self {
            width: self.width >> level,
            height: self.height >> level,
            fx: self.fx / s,
            fy: self.fy / s,
            cx: self.cx / s,
            cy: self.cy / s,
        }
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
