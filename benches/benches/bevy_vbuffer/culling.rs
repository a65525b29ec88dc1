use std::f32::consts::TAU;

use bevy_math::{Affine3A, EulerRot, Mat4, Quat, Vec3};
use bevy_vbuffer::{
    density_volume::DensityVolumeParameters,
    view::vbuffer_frustum,
    visible_volumes::{collect_visible_volumes, VisibleVolumeList},
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

criterion_group!(benches, collect);
criterion_main!(benches);

fn random_volumes(count: usize) -> Vec<(Affine3A, DensityVolumeParameters)> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    (0..count)
        .map(|_| {
            let transform = Affine3A::from_scale_rotation_translation(
                Vec3::new(
                    rng.gen_range(0.5..8.0),
                    rng.gen_range(0.5..8.0),
                    rng.gen_range(0.5..8.0),
                ),
                Quat::from_euler(
                    EulerRot::YXZ,
                    rng.gen_range(0.0..TAU),
                    rng.gen_range(0.0..TAU),
                    0.0,
                ),
                Vec3::new(
                    rng.gen_range(-100.0..100.0),
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-100.0..100.0),
                ),
            );
            let parameters = DensityVolumeParameters::new(
                Vec3::splat(rng.gen_range(0.0..1.0)),
                rng.gen_range(1.0..50.0),
                rng.gen_range(-0.5..0.5),
            );
            (transform, parameters)
        })
        .collect()
}

fn collect(c: &mut Criterion) {
    let mut group = c.benchmark_group("collect_visible_volumes");
    group.warm_up_time(std::time::Duration::from_millis(500));
    group.measurement_time(std::time::Duration::from_secs(4));

    let clip_from_view = Mat4::perspective_infinite_reverse_rh(1.0, 16.0 / 9.0, 0.1);
    let frustum = vbuffer_frustum(&clip_from_view, &Affine3A::IDENTITY, 64.0, false);

    for count in [64, 512, 4096] {
        let volumes = random_volumes(count);
        let mut list = VisibleVolumeList::new();
        group.bench_with_input(BenchmarkId::from_parameter(count), &volumes, |b, volumes| {
            b.iter(|| {
                collect_visible_volumes(
                    volumes.iter().copied(),
                    black_box(&frustum),
                    Vec3::ZERO,
                    &mut list,
                );
                black_box(list.len())
            });
        });
    }

    group.finish();
}
