use bevy_gpu_fire::cpu::CpuBackend;
use bevy_gpu_fire::{FireConfig, FireSourceDesc, Pointers, SimulationContext};
use criterion::{Criterion, criterion_group, criterion_main};
use glam::{UVec2, Vec2};

fn bench_frame(c: &mut Criterion) {
    let surface = UVec2::new(128, 72);
    let config = FireConfig {
        sim_resolution: 64,
        dye_resolution: 72,
        ..FireConfig::default()
    };

    let mut sim = SimulationContext::new(CpuBackend::new(surface), &config, surface).unwrap();
    sim.add_fire_source(FireSourceDesc {
        position: Vec2::new(64.0, 4.0),
        velocity: Vec2::new(0.0, 30.0),
        num_particles: 1000,
        lifespan: 1.0,
    })
    .unwrap();
    let mut pointers = Pointers::default();

    let mut elapsed = 0.0;
    c.bench_function("cpu_frame_114x64", |b| {
        b.iter(|| {
            elapsed += config.time_step;
            sim.frame(&config, &mut pointers, elapsed).unwrap()
        })
    });
}

criterion_group!(benches, bench_frame);
criterion_main!(benches);
