//! Pointer state fed by the platform input layer and drained into splats.

use bevy::prelude::Resource;
use glam::{Vec2, Vec3};
use rand::Rng;

/// Id of the mouse pointer; touches use their own identifiers.
pub const MOUSE_POINTER: i64 = -1;

#[derive(Debug, Clone, PartialEq)]
pub struct Pointer {
    pub id: i64,
    /// Surface pixels, origin at the top-left corner.
    pub position: Vec2,
    pub delta: Vec2,
    pub down: bool,
    pub moved: bool,
    pub color: Vec3,
}

impl Pointer {
    fn new(id: i64) -> Self {
        Self {
            id,
            position: Vec2::ZERO,
            delta: Vec2::ZERO,
            down: false,
            moved: false,
            color: Vec3::new(30.0, 0.0, 300.0),
        }
    }

    fn move_to(&mut self, position: Vec2, scale: f32) {
        self.moved = self.down;
        self.delta = (position - self.position) * scale;
        self.position = position;
    }
}

/// Perturbation requested by one pointer for the coming frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplatRequest {
    pub position: Vec2,
    pub delta: Vec2,
    pub color: Vec3,
}

#[derive(Resource, Debug, Clone)]
pub struct Pointers {
    pointers: Vec<Pointer>,
}

impl Default for Pointers {
    fn default() -> Self {
        Self {
            pointers: vec![Pointer::new(MOUSE_POINTER)],
        }
    }
}

/// Pale random color, every channel in `[0.05, 0.20]`.
pub fn random_color() -> Vec3 {
    let mut rng = rand::rng();
    Vec3::new(
        rng.random_range(0.05..=0.20),
        rng.random_range(0.05..=0.20),
        rng.random_range(0.05..=0.20),
    )
}

impl Pointers {
    pub fn pointers(&self) -> &[Pointer] {
        &self.pointers
    }

    pub fn get(&self, id: i64) -> Option<&Pointer> {
        self.pointers.iter().find(|p| p.id == id)
    }

    fn mouse(&mut self) -> &mut Pointer {
        if let Some(i) = self.pointers.iter().position(|p| p.id == MOUSE_POINTER) {
            return &mut self.pointers[i];
        }
        self.pointers.push(Pointer::new(MOUSE_POINTER));
        let last = self.pointers.len() - 1;
        &mut self.pointers[last]
    }

    pub fn mouse_down(&mut self) {
        let mouse = self.mouse();
        mouse.down = true;
        mouse.color = random_color();
    }

    pub fn mouse_move(&mut self, position: Vec2, scale: f32) {
        self.mouse().move_to(position, scale);
    }

    pub fn mouse_up(&mut self) {
        self.mouse().down = false;
    }

    /// Reuses a released touch slot before growing.
    pub fn touch_start(&mut self, id: i64, position: Vec2) {
        let slot = match self
            .pointers
            .iter()
            .position(|p| p.id == id || (p.id != MOUSE_POINTER && !p.down))
        {
            Some(i) => i,
            None => {
                self.pointers.push(Pointer::new(id));
                self.pointers.len() - 1
            }
        };
        let pointer = &mut self.pointers[slot];
        pointer.id = id;
        pointer.down = true;
        pointer.moved = false;
        pointer.position = position;
        pointer.delta = Vec2::ZERO;
        pointer.color = random_color();
    }

    pub fn touch_move(&mut self, id: i64, position: Vec2, scale: f32) {
        if let Some(pointer) = self.pointers.iter_mut().find(|p| p.id == id) {
            pointer.move_to(position, scale);
        }
    }

    pub fn touch_end(&mut self, id: i64) {
        for pointer in self.pointers.iter_mut().filter(|p| p.id == id) {
            pointer.down = false;
        }
    }

    /// Splats for every pointer that moved while down; clears the flags.
    pub fn take_splats(&mut self) -> Vec<SplatRequest> {
        self.pointers
            .iter_mut()
            .filter(|p| p.moved)
            .map(|p| {
                p.moved = false;
                SplatRequest {
                    position: p.position,
                    delta: p.delta,
                    color: p.color,
                }
            })
            .collect()
    }
}
