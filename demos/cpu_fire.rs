use bevy::asset::RenderAssetUsages;
use bevy::prelude::*;
use bevy::render::render_resource::{Extent3d, TextureDimension, TextureFormat};
use bevy::window::PrimaryWindow;
use bevy_gpu_fire::cpu::CpuBackend;
use bevy_gpu_fire::{FireConfig, FireSourceDesc, Pointers, SimulationContext};
use glam::{UVec2, Vec2 as GVec2};

// simulated surface, scaled up to the window. Linear texels, so the
// sprite shows the same values the GPU display pass writes
const SURFACE: UVec2 = UVec2::new(160, 90);
const WINDOW_SCALE: f32 = 6.0;

#[derive(Resource)]
struct CpuFire(SimulationContext<CpuBackend>);

#[derive(Resource)]
struct FireImage(Handle<Image>);

fn main() {
    let config = FireConfig {
        sim_resolution: 64,
        dye_resolution: 90,
        pressure_iterations: 10,
        fuel_row_height: 3.0,
        ..FireConfig::default()
    };

    App::new()
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                resolution: (SURFACE.x as f32 * WINDOW_SCALE, SURFACE.y as f32 * WINDOW_SCALE).into(),
                resizable: false,
                ..default()
            }),
            ..default()
        }))
        .insert_resource(config)
        .init_resource::<Pointers>()
        .add_systems(Startup, setup)
        .add_systems(Update, (drag_input, cpu_step, upload_surface).chain())
        .run();
}

fn setup(mut commands: Commands, config: Res<FireConfig>, mut images: ResMut<Assets<Image>>) -> Result {
    let mut sim = SimulationContext::new(CpuBackend::new(SURFACE), &config, SURFACE)?;
    sim.add_fire_source(FireSourceDesc {
        position: GVec2::new(80.0, 6.0),
        velocity: GVec2::new(0.0, 30.0),
        num_particles: 400,
        lifespan: 1.0,
    })?;

    let image = Image::new_fill(
        Extent3d {
            width: SURFACE.x,
            height: SURFACE.y,
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        &[0, 0, 0, 255],
        TextureFormat::Rgba8Unorm,
        RenderAssetUsages::default(),
    );
    let handle = images.add(image);

    commands.spawn(Camera2d);
    commands.spawn(Sprite {
        image: handle.clone(),
        custom_size: Some(Vec2::new(
            SURFACE.x as f32 * WINDOW_SCALE,
            SURFACE.y as f32 * WINDOW_SCALE,
        )),
        ..default()
    });
    commands.insert_resource(FireImage(handle));
    commands.insert_resource(CpuFire(sim));
    Ok(())
}

// window pixels to surface pixels, both with the origin top-left
fn drag_input(
    buttons: Res<ButtonInput<MouseButton>>,
    windows: Query<&Window, With<PrimaryWindow>>,
    config: Res<FireConfig>,
    mut pointers: ResMut<Pointers>,
) {
    let Ok(window) = windows.single() else {
        return;
    };
    if buttons.just_pressed(MouseButton::Left) {
        pointers.mouse_down();
    }
    if let Some(cursor) = window.cursor_position() {
        let p = cursor / WINDOW_SCALE;
        pointers.mouse_move(GVec2::new(p.x, p.y), config.mouse_delta_scale);
    }
    if buttons.just_released(MouseButton::Left) {
        pointers.mouse_up();
    }
}

fn cpu_step(
    mut fire: ResMut<CpuFire>,
    config: Res<FireConfig>,
    mut pointers: ResMut<Pointers>,
    time: Res<Time>,
) -> Result {
    fire.0.frame(&config, &mut pointers, time.elapsed_secs())?;
    Ok(())
}

fn upload_surface(fire: Res<CpuFire>, target: Res<FireImage>, mut images: ResMut<Assets<Image>>) {
    let Some(image) = images.get_mut(&target.0) else {
        return;
    };
    let Some(data) = image.data.as_mut() else {
        return;
    };
    for (dst, src) in data.chunks_exact_mut(4).zip(fire.0.backend().surface_pixels()) {
        let rgb = src.truncate().clamp(glam::Vec3::ZERO, glam::Vec3::ONE);
        dst[0] = (rgb.x * 255.0) as u8;
        dst[1] = (rgb.y * 255.0) as u8;
        dst[2] = (rgb.z * 255.0) as u8;
        dst[3] = 255;
    }
}
