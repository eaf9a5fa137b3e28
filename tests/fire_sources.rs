use bevy_gpu_fire::cpu::CpuBackend;
use bevy_gpu_fire::{FireConfig, FireError, FireSourceDesc, SimulationContext};
use glam::{UVec2, Vec2, Vec4};

const SURFACE: UVec2 = UVec2::new(16, 16);

fn context() -> (FireConfig, SimulationContext<CpuBackend>) {
    let config = FireConfig {
        sim_resolution: 16,
        dye_resolution: 16,
        ..FireConfig::conservative()
    };
    let ctx = SimulationContext::new(CpuBackend::new(SURFACE), &config, SURFACE).unwrap();
    (config, ctx)
}

fn texel(ctx: &SimulationContext<CpuBackend>, handle: bevy_gpu_fire::FieldHandle, i: usize) -> Vec4 {
    ctx.backend().read_field(handle).unwrap().texels[i]
}

#[test]
fn empty_sources_are_rejected() {
    let (_, mut ctx) = context();
    let err = ctx
        .add_fire_source(FireSourceDesc {
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            num_particles: 0,
            lifespan: 1.0,
        })
        .unwrap_err();
    assert_eq!(err, FireError::EmptyFireSource);
}

#[test]
fn particles_start_at_the_emitter_with_staggered_lifespans() {
    let (_, mut ctx) = context();
    let id = ctx
        .add_fire_source(FireSourceDesc {
            position: Vec2::new(4.0, 2.0),
            velocity: Vec2::new(1.0, 3.0),
            num_particles: 4,
            lifespan: 2.0,
        })
        .unwrap();
    let source = ctx.fire_source(id).unwrap();
    assert_eq!(source.data_width(), 2);
    assert_eq!(source.emitter(SURFACE), Vec2::new(0.25, 0.125));

    let (state, lifespans) = (source.state().read_handle(), source.lifespans().read_handle());
    for i in 0..4 {
        assert_eq!(texel(&ctx, state, i), Vec4::new(0.25, 0.125, 1.0, 3.0));
        assert_eq!(texel(&ctx, lifespans, i).x, 2.0 * (i + 1) as f32 / 4.0);
    }
}

#[test]
fn expired_particles_respawn_and_live_ones_move() {
    let (config, mut ctx) = context();
    let lifespan = 0.05;
    let velocity = Vec2::new(0.0, 16.0);
    let id = ctx
        .add_fire_source(FireSourceDesc {
            position: Vec2::new(8.0, 2.0),
            velocity,
            num_particles: 4,
            lifespan,
        })
        .unwrap();

    let dt = 0.016;
    ctx.step_fire_sources(&config, dt).unwrap();

    let source = ctx.fire_source(id).unwrap();
    let emitter = source.emitter(SURFACE);
    let (state, lifespans) = (source.state().read_handle(), source.lifespans().read_handle());

    // first particle started with lifespan / 4 < dt
    assert_eq!(texel(&ctx, state, 0), Vec4::new(emitter.x, emitter.y, velocity.x, velocity.y));
    assert_eq!(texel(&ctx, lifespans, 0).x, lifespan);

    // the last one still has time left and was carried by its own velocity
    let last = texel(&ctx, state, 3);
    assert!((texel(&ctx, lifespans, 3).x - (lifespan - dt)).abs() < 1e-6);
    let expected_y = emitter.y + velocity.y * config.velocity_dissipation * dt / 16.0;
    assert!((last.y - expected_y).abs() < 1e-5, "{} vs {expected_y}", last.y);
    assert_eq!(last.x, emitter.x);
}

#[test]
fn infinite_lifespan_never_respawns() {
    let (config, mut ctx) = context();
    let id = ctx
        .add_fire_source(FireSourceDesc {
            position: Vec2::new(2.0, 8.0),
            velocity: Vec2::new(16.0, 0.0),
            num_particles: 1,
            lifespan: -1.0,
        })
        .unwrap();
    let lifespans = ctx.fire_source(id).unwrap().lifespans().read_handle();
    let initial = texel(&ctx, lifespans, 0).x;

    for _ in 0..10_000 {
        ctx.step_fire_sources(&config, 0.016).unwrap();
    }

    let source = ctx.fire_source(id).unwrap();
    let emitter = source.emitter(SURFACE);
    let state = texel(&ctx, source.state().read_handle(), 0);
    assert!(state.x > emitter.x + 0.01);
    assert_eq!(texel(&ctx, source.lifespans().read_handle(), 0).x, initial);
}

#[test]
fn particle_fuel_lands_under_the_emitter() {
    let (config, mut ctx) = context();
    ctx.add_fire_source(FireSourceDesc {
        position: Vec2::new(4.5, 4.5),
        velocity: Vec2::ZERO,
        num_particles: 9,
        lifespan: 1.0,
    })
    .unwrap();

    ctx.deposit_particle_fuel(&config).unwrap();

    let fuel = ctx.backend().read_field(ctx.fields().fuel.read_handle()).unwrap();
    assert_eq!(fuel.fetch(glam::IVec2::new(4, 4)).x, 9.0 * config.particle_fuel);
    assert_eq!(fuel.total().x, 9.0 * config.particle_fuel);
}

#[test]
fn removed_sources_free_their_buffers() {
    let (_, mut ctx) = context();
    let fields = ctx.backend().field_count();
    let id = ctx
        .add_fire_source(FireSourceDesc {
            position: Vec2::ONE,
            velocity: Vec2::ZERO,
            num_particles: 10,
            lifespan: 1.0,
        })
        .unwrap();
    assert_eq!(ctx.backend().field_count(), fields + 4);
    assert_eq!(ctx.backend().index_buffer_count(), 1);

    ctx.remove_fire_source(id).unwrap();
    assert_eq!(ctx.backend().field_count(), fields);
    assert_eq!(ctx.backend().index_buffer_count(), 0);
    assert!(ctx.fire_source(id).is_none());
}
