use scalable_tsdf_core::prelude::*;
use scalable_tsdf_storage::{ImageBuffer, Rgb};

use rand::prelude::*;

/// A camera with a 90 degree horizontal field of view and square pixels.
pub fn test_camera(width: u32, height: u32) -> PinholeIntrinsics {
    let f = width as f32 / 2.0;

    PinholeIntrinsics {
        width,
        height,
        fx: f,
        fy: f,
        cx: width as f32 / 2.0,
        cy: height as f32 / 2.0,
    }
}

/// Depth of the camera-space plane `z = depth`.
pub fn plane_depth(intrinsics: &PinholeIntrinsics, depth: f32) -> ImageBuffer<f32> {
    ImageBuffer::filled(intrinsics.width, intrinsics.height, depth)
}

/// Depth of the near side of a camera-space sphere. Pixels whose rays miss the sphere have zero depth.
pub fn sphere_depth(
    intrinsics: &PinholeIntrinsics,
    center: Point3f,
    radius: f32,
) -> ImageBuffer<f32> {
    ImageBuffer::from_fn(intrinsics.width, intrinsics.height, |pixel| {
        // The ray point at depth t is t * d.
        let d = intrinsics.inverse_project_pixel(pixel, 1.0);
        let a = d.dot(&d);
        let b = d.dot(&center);
        let c = center.dot(&center) - radius * radius;
        let discriminant = b * b - a * c;
        if discriminant < 0.0 {
            return 0.0;
        }
        let t = (b - discriminant.sqrt()) / a;

        t.max(0.0)
    })
}

/// Colors that vary across the image, so color fusion can be checked per pixel.
pub fn gradient_colors(intrinsics: &PinholeIntrinsics) -> ImageBuffer<Rgb> {
    let (w, h) = (intrinsics.width.max(1), intrinsics.height.max(1));

    ImageBuffer::from_fn(intrinsics.width, intrinsics.height, |pixel| {
        Rgb::new(
            (255 * pixel.x() as u32 / w) as u8,
            (255 * pixel.y() as u32 / h) as u8,
            128,
        )
    })
}

/// `n` block keys drawn uniformly from `[-radius, radius)^3`. Keys may repeat.
pub fn random_keys(n: usize, radius: i32, seed: u64) -> Vec<Point3i> {
    let mut rng = StdRng::seed_from_u64(seed);

    (0..n)
        .map(|_| {
            PointN([
                rng.gen_range(-radius..radius),
                rng.gen_range(-radius..radius),
                rng.gen_range(-radius..radius),
            ])
        })
        .collect()
}
