use bevy_gpu_fire::cpu::CpuBackend;
use bevy_gpu_fire::{FireConfig, Pointers, SimulationContext};
use glam::{IVec2, UVec2, Vec2};

const SURFACE: UVec2 = UVec2::new(32, 16);

fn context(config: &FireConfig) -> SimulationContext<CpuBackend> {
    SimulationContext::new(CpuBackend::new(SURFACE), config, SURFACE).unwrap()
}

fn small(base: FireConfig) -> FireConfig {
    FireConfig {
        sim_resolution: 16,
        dye_resolution: 16,
        ..base
    }
}

#[test]
fn dragging_the_mouse_splats_once() {
    let config = small(FireConfig::conservative());
    let mut ctx = context(&config);
    let mut pointers = Pointers::default();

    pointers.mouse_move(Vec2::new(10.0, 8.0), config.mouse_delta_scale);
    pointers.mouse_down();
    pointers.mouse_move(Vec2::new(12.0, 8.0), config.mouse_delta_scale);
    ctx.inject(&config, &mut pointers).unwrap();

    let velocity = ctx.backend().read_field(ctx.fields().velocity.read_handle()).unwrap();
    // field and surface share a 32x16 grid, rows flipped
    let hit = velocity.fetch(IVec2::new(12, 8));
    assert!(hit.x > 0.0);
    assert!(hit.y.abs() < 1e-6);

    let fuel = ctx.backend().read_field(ctx.fields().fuel.read_handle()).unwrap();
    assert!(fuel.fetch(IVec2::new(12, 8)).x > 0.5);

    // the flag was consumed
    assert!(pointers.take_splats().is_empty());
}

#[test]
fn fuel_row_fills_the_bottom_rows() {
    let config = small(FireConfig {
        fuel_row_height: 4.0,
        ..FireConfig::conservative()
    });
    let mut ctx = context(&config);
    ctx.inject(&config, &mut Pointers::default()).unwrap();

    let fuel = ctx.backend().read_field(ctx.fields().fuel.read_handle()).unwrap();
    let size = fuel.size;
    for y in 0..size.y as i32 {
        let expected = if y < 4 { 1.0 } else { 0.0 };
        for x in 0..size.x as i32 {
            assert_eq!(fuel.fetch(IVec2::new(x, y)).x, expected, "cell ({x}, {y})");
        }
    }
}

#[test]
fn touches_splat_independently() {
    let config = small(FireConfig::conservative());
    let mut ctx = context(&config);
    let mut pointers = Pointers::default();

    pointers.touch_start(1, Vec2::new(4.0, 4.0));
    pointers.touch_start(2, Vec2::new(28.0, 12.0));
    pointers.touch_move(1, Vec2::new(5.0, 4.0), config.touch_delta_scale);
    pointers.touch_move(2, Vec2::new(28.0, 13.0), config.touch_delta_scale);
    ctx.inject(&config, &mut pointers).unwrap();

    let velocity = ctx.backend().read_field(ctx.fields().velocity.read_handle()).unwrap();
    // y grows downwards on the surface, upwards in the field
    assert!(velocity.fetch(IVec2::new(5, 11)).x > 0.0);
    assert!(velocity.fetch(IVec2::new(28, 2)).y < 0.0);
}
