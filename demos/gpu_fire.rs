use bevy::prelude::*;
use bevy_gpu_fire::gpu::FirePlugin;
use bevy_gpu_fire::{FireConfig, FireSourceDesc};
use glam::Vec2 as GVec2;

fn main() {
    // three emitters along the bottom edge of the default 1280x720 window
    let sources = [320.0, 640.0, 960.0]
        .into_iter()
        .map(|x| FireSourceDesc {
            position: GVec2::new(x, 40.0),
            velocity: GVec2::new(0.0, 40.0),
            num_particles: 2000,
            lifespan: 1.5,
        })
        .collect();

    App::new()
        .add_plugins(DefaultPlugins)
        .insert_resource(ClearColor(Color::BLACK))
        .insert_resource(FireConfig::default())
        .add_plugins(FirePlugin { sources })
        .add_systems(Startup, setup)
        .run();
}

fn setup(mut commands: Commands) {
    commands.spawn(Camera2d);
    info!("drag to stir the flames, space cycles the display mode");
}
