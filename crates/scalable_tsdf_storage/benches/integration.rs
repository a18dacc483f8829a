use scalable_tsdf_core::prelude::*;
use scalable_tsdf_storage::prelude::*;
use utilities::frames::{gradient_colors, sphere_depth, test_camera};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn integrate_sphere_frame(c: &mut Criterion) {
    let camera = test_camera(320, 240);
    let depth = sphere_depth(&camera, PointN([0.0, 0.0, 1.5]), 0.5);
    let colors = gradient_colors(&camera);

    let mut group = c.benchmark_group("integrate_sphere_frame");
    for block_side in BLOCK_SIDES.iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(block_side),
            block_side,
            |b, &block_side| {
                b.iter_with_setup(
                    || set_up_volume(block_side),
                    |mut volume| {
                        let frame = RgbdFrame::new(&depth, &colors);
                        black_box(volume.integrate(&frame, &camera, &Transform3::IDENTITY, 0));
                    },
                );
            },
        );
    }
    group.finish();
}

fn raycast_sphere(c: &mut Criterion) {
    let camera = test_camera(320, 240);
    let depth = sphere_depth(&camera, PointN([0.0, 0.0, 1.5]), 0.5);

    let mut group = c.benchmark_group("raycast_sphere");
    for block_side in BLOCK_SIDES.iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(block_side),
            block_side,
            |b, &block_side| {
                let mut volume = set_up_volume(block_side);
                volume.integrate(
                    &RgbdFrame::depth_only(&depth),
                    &camera,
                    &Transform3::IDENTITY,
                    0,
                );

                b.iter(|| black_box(volume.raycast(&camera, &Transform3::IDENTITY)));
            },
        );
    }
    group.finish();
}

fn downsample_sphere(c: &mut Criterion) {
    let camera = test_camera(320, 240);
    let depth = sphere_depth(&camera, PointN([0.0, 0.0, 1.5]), 0.5);

    let mut group = c.benchmark_group("downsample_sphere");
    for block_side in BLOCK_SIDES.iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(block_side),
            block_side,
            |b, &block_side| {
                let mut volume = set_up_volume(block_side);
                volume.integrate(
                    &RgbdFrame::depth_only(&depth),
                    &camera,
                    &Transform3::IDENTITY,
                    0,
                );

                b.iter(|| black_box(volume.downsample()));
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    integrate_sphere_frame,
    raycast_sphere,
    downsample_sphere
);
criterion_main!(benches);

const BLOCK_SIDES: [u32; 3] = [4, 8, 16];

fn set_up_volume(block_side: u32) -> TsdfVolume {
    let config = VolumeConfig {
        block_side,
        voxel_length: 0.01,
        truncation_distance: 0.04,
        bucket_count: 20_000,
        value_capacity: 60_000 / (block_side as usize / 4).pow(3),
        ..Default::default()
    };

    match TsdfVolume::new(config) {
        Ok(volume) => volume,
        Err(e) => panic!("bad bench config: {}", e),
    }
}
