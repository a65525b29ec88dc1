use bevy_vbuffer::{
    preset::VolumetricLightingPreset,
    vbuffer::{compute_resolution_and_scale, VBufferParameters},
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

criterion_group!(benches, encode_decode, parameters);
criterion_main!(benches);

fn encode_decode(c: &mut Criterion) {
    let parameters = VBufferParameters::new(240, 135, 128, 0.1, 64.0, 0.75);
    let depths: Vec<f32> = (0..4096).map(|i| 0.1 + i as f32 * (63.9 / 4096.0)).collect();

    c.bench_function("encode_depth", |b| {
        b.iter(|| {
            for &depth in &depths {
                black_box(parameters.encode_depth(black_box(depth)));
            }
        });
    });

    c.bench_function("encode_decode_depth", |b| {
        b.iter(|| {
            for &depth in &depths {
                black_box(parameters.decode_depth(parameters.encode_depth(black_box(depth))));
            }
        });
    });
}

fn parameters(c: &mut Criterion) {
    c.bench_function("vbuffer_parameters", |b| {
        b.iter(|| {
            let resolution = compute_resolution_and_scale(
                black_box(VolumetricLightingPreset::Ultra),
                black_box(1920),
                black_box(1080),
            );
            black_box(VBufferParameters::from_resolution(&resolution, 0.1, 64.0, 0.75))
        });
    });
}
