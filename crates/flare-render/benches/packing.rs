use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;
use parking_lot::Mutex;

use flare_common::ViewId;
use flare_render::{
    pack_beams, pack_sprites, sort_particles, BaseParticle, BeamPayload, BeamReplay, EmitterKind, NoiseState,
    PackParams, ParticleBuffer, ParticleOrder, PayloadKind, PayloadLayout, ReplayBase, SceneView, SortContext,
    SortMode, SpriteReplay,
};

fn scattered_buffer(count: usize, layout: &PayloadLayout) -> ParticleBuffer {
    let mut rng = fastrand::Rng::with_seed(7);
    let mut buffer = ParticleBuffer::new(count, layout.payload_bytes()).expect("valid capacity");
    for _ in 0..count {
        let location = Vec3::new(rng.f32(), rng.f32(), rng.f32()) * 1000.0 - 500.0;
        buffer
            .spawn(BaseParticle::at(location).with_size(Vec3::splat(4.0)))
            .expect("room");
    }
    buffer
}

fn view() -> SceneView {
    SceneView::look_at(ViewId::new(0), Vec3::new(0.0, 0.0, 1500.0), Vec3::ZERO, Vec3::Y)
}

fn sort_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort_particles");
    for count in [1_000usize, 10_000] {
        let buffer = scattered_buffer(count, &PayloadLayout::new());
        let source = ReplayBase::from_buffer(EmitterKind::Sprite, &buffer);
        let context = SortContext {
            mode: SortMode::DistanceToView,
            view_origin: view().origin,
            view_projection: view().view_projection,
            local_to_world: None,
        };
        let mut out = Vec::with_capacity(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                sort_particles(&context, count, |i| source.particle(i), &mut out);
                black_box(out.len());
            });
        });
    }
    group.finish();
}

fn sprite_benchmark(c: &mut Criterion) {
    let buffer = scattered_buffer(10_000, &PayloadLayout::new());
    let source = SpriteReplay::from_buffer(EmitterKind::Sprite, &buffer);
    let order: Vec<ParticleOrder> = Vec::new();
    let view = view();
    let params = PackParams::default();
    let mut vertices = Vec::new();
    let mut indices = Vec::new();

    c.bench_function("pack_sprites_10k", |b| {
        b.iter(|| {
            vertices.clear();
            indices.clear();
            let drawn = pack_sprites(&source, &params, &view, &order, false, &mut vertices, &mut indices);
            black_box(drawn);
        });
    });
}

fn beam_benchmark(c: &mut Criterion) {
    let mut layout = PayloadLayout::new();
    let beam = layout.push::<BeamPayload>(PayloadKind::Beam);
    let mut buffer = scattered_buffer(256, &layout);
    for slot in 0..256u16 {
        let payload = BeamPayload {
            target_point: [100.0, 0.0, 0.0],
            direction: [1.0, 0.0, 0.0],
            step_size: 10.0,
            steps: 10,
            triangle_count: 2,
            ..BeamPayload::default()
        };
        buffer.write_payload(slot, beam.get(), &payload).expect("in bounds");
    }
    let source = BeamReplay {
        base: ReplayBase::from_buffer(EmitterKind::Beam, &buffer),
        vertex_count: 256 * 4,
        index_count: 256 * 4 + 255 * 4,
        beam_data_offset: Some(beam),
        ..BeamReplay::default()
    };
    let params = PackParams::default();
    let noise = Mutex::new(NoiseState::new());
    let view = view();
    let mut vertices = Vec::new();
    let mut indices = Vec::new();

    c.bench_function("pack_beams_256", |b| {
        b.iter(|| {
            vertices.clear();
            indices.clear();
            let plan = pack_beams(&source, &params, &view, &noise, 2048, &mut vertices, &mut indices);
            black_box(plan.triangles);
        });
    });
}

criterion_group!(benches, sort_benchmark, sprite_benchmark, beam_benchmark);
criterion_main!(benches);
