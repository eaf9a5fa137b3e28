/* layouts shared with assets/shaders/fire.wgsl, keep field order in sync */
use bytemuck::{Pod, Zeroable};

/// Number of scalar parameter slots a program can address.
pub const PARAM_SLOTS: usize = 16;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PassUniforms {
    // not using glam to make sure WGSL compatibility
    pub target_size: [f32; 2],
    pub _pad: [f32; 2],
    pub values: [[f32; 4]; PARAM_SLOTS / 4],
}

impl PassUniforms {
    pub fn slot(&self, i: usize) -> f32 {
        self.values[i / 4][i % 4]
    }

    pub fn set_slot(&mut self, i: usize, value: f32) {
        self.values[i / 4][i % 4] = value;
    }
}

/// Two triangles covering clip space, drawn by every full-screen pass.
pub const QUAD_VERTS: &[[f32; 2]] = &[
    [-1.0, -1.0],
    [1.0, -1.0],
    [1.0, 1.0],
    [-1.0, -1.0],
    [1.0, 1.0],
    [-1.0, 1.0],
];

/// Texel-centre coordinate of one particle inside its state texture.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ParticleUv {
    pub uv: [f32; 2],
}
