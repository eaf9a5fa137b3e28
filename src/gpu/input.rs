use bevy::input::touch::Touches;
use bevy::prelude::*;
use bevy::window::{CursorMoved, PrimaryWindow};

use crate::config::FireConfig;
use crate::interaction::Pointers;

// window events report logical pixels; the simulation works in physical ones
fn physical(position: Vec2, window: &Window) -> glam::Vec2 {
    let scaled = position * window.scale_factor();
    glam::Vec2::new(scaled.x, scaled.y)
}

pub fn mouse_input(
    buttons: Res<ButtonInput<MouseButton>>,
    mut cursor: EventReader<CursorMoved>,
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
    for event in cursor.read() {
        pointers.mouse_move(physical(event.position, window), config.mouse_delta_scale);
    }
    if buttons.just_released(MouseButton::Left) {
        pointers.mouse_up();
    }
}

pub fn touch_input(
    touches: Res<Touches>,
    windows: Query<&Window, With<PrimaryWindow>>,
    config: Res<FireConfig>,
    mut pointers: ResMut<Pointers>,
) {
    let Ok(window) = windows.single() else {
        return;
    };
    for touch in touches.iter_just_pressed() {
        pointers.touch_start(touch.id() as i64, physical(touch.position(), window));
    }
    for touch in touches.iter() {
        if touch.delta() != Vec2::ZERO {
            pointers.touch_move(touch.id() as i64, physical(touch.position(), window), config.touch_delta_scale);
        }
    }
    for touch in touches.iter_just_released().chain(touches.iter_just_canceled()) {
        pointers.touch_end(touch.id() as i64);
    }
}

pub fn cycle_display_mode(keys: Res<ButtonInput<KeyCode>>, mut config: ResMut<FireConfig>) {
    if keys.just_pressed(KeyCode::Space) {
        config.cycle_display_mode();
        info!("display mode: {:?}", config.display_mode);
    }
}
