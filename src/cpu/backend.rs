use std::collections::HashMap;

use bevy::log::debug;
use glam::{IVec2, UVec2, Vec2, Vec4};

use super::kernels::{self, Cell, Sources};
use super::texture::{CpuTexture, mask};
use crate::backend::FieldBackend;
use crate::error::{FireError, FireResult};
use crate::field::{Channels, FieldDesc, FieldHandle, SampleType};
use crate::program::{
    IndexBufferHandle, Input, MAX_INPUTS, Param, ParticleDraw, PassInvocation, ProgramKind, RenderTarget,
};

/// Host backend. Every pass is evaluated into a fresh buffer and only then
/// stored, so a pass never observes its own partial output.
///
/// Values are kept as `f32` whatever the requested sample type.
#[derive(Debug, Clone)]
pub struct CpuBackend {
    fields: HashMap<FieldHandle, CpuTexture>,
    index_buffers: HashMap<u32, Vec<[f32; 2]>>,
    next_index_buffer: u32,
    surface: CpuTexture,
    channels: Vec<Channels>,
    linear_filtering: bool,
    passes: u64,
}

impl CpuBackend {
    pub fn new(surface: UVec2) -> Self {
        Self {
            fields: HashMap::new(),
            index_buffers: HashMap::new(),
            next_index_buffer: 0,
            surface: CpuTexture::surface(surface),
            channels: vec![Channels::R, Channels::Rg, Channels::Rgba],
            linear_filtering: true,
            passes: 0,
        }
    }

    /// Restricts the renderable channel layouts, to exercise the fallback chain.
    pub fn with_channels(mut self, channels: &[Channels]) -> Self {
        self.channels = channels.to_vec();
        self
    }

    pub fn with_linear_filtering(mut self, enabled: bool) -> Self {
        self.linear_filtering = enabled;
        self
    }

    pub fn read_field(&self, handle: FieldHandle) -> Option<&CpuTexture> {
        self.fields.get(&handle)
    }

    pub fn write_field(&mut self, handle: FieldHandle, texels: &[Vec4]) -> FireResult<()> {
        let texture = self.fields.get_mut(&handle).ok_or(FireError::UnknownField(handle))?;
        if texels.len() != texture.texels.len() {
            return Err(FireError::InvalidDimensions {
                width: texels.len() as u32,
                height: 1,
            });
        }
        let channels = texture.channels;
        for (dst, src) in texture.texels.iter_mut().zip(texels) {
            *dst = mask(channels, *src);
        }
        Ok(())
    }

    pub fn fill_field(&mut self, handle: FieldHandle, value: Vec4) -> FireResult<()> {
        self.fields
            .get_mut(&handle)
            .ok_or(FireError::UnknownField(handle))?
            .fill(value);
        Ok(())
    }

    pub fn surface(&self) -> &CpuTexture {
        &self.surface
    }

    /// Surface texels, row 0 at the top.
    pub fn surface_pixels(&self) -> &[Vec4] {
        &self.surface.texels
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn index_buffer_count(&self) -> usize {
        self.index_buffers.len()
    }

    /// Passes and draws issued so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    fn target_size(&self, target: RenderTarget) -> FireResult<UVec2> {
        match target {
            RenderTarget::Field(handle) => self
                .fields
                .get(&handle)
                .map(|t| t.size)
                .ok_or(FireError::UnknownField(handle)),
            RenderTarget::Surface => Ok(self.surface.size),
        }
    }

    fn target_mut(&mut self, target: RenderTarget) -> FireResult<&mut CpuTexture> {
        match target {
            RenderTarget::Field(handle) => self
                .fields
                .get_mut(&handle)
                .ok_or(FireError::UnknownField(handle)),
            RenderTarget::Surface => Ok(&mut self.surface),
        }
    }

    fn sources(&self, pass: &PassInvocation) -> FireResult<Sources<'_>> {
        let mut textures = [None; MAX_INPUTS];
        for (slot, handle) in pass.inputs.iter().enumerate() {
            if let Some(handle) = handle {
                textures[slot] = Some(self.fields.get(handle).ok_or(FireError::UnknownField(*handle))?);
            }
        }
        Ok(Sources {
            program: pass.program,
            textures,
        })
    }
}

impl FieldBackend for CpuBackend {
    fn supports(&self, channels: Channels, _sample: SampleType) -> bool {
        self.channels.contains(&channels)
    }

    fn supports_linear_filtering(&self, _sample: SampleType) -> bool {
        self.linear_filtering
    }

    fn create_field(&mut self, handle: FieldHandle, desc: &FieldDesc) -> FireResult<()> {
        if !self.supports(desc.channels, desc.sample) {
            return Err(FireError::UnsupportedFormat {
                channels: desc.channels,
                sample: desc.sample,
            });
        }
        self.fields.insert(handle, CpuTexture::new(desc));
        Ok(())
    }

    fn destroy_field(&mut self, handle: FieldHandle) {
        self.fields.remove(&handle);
    }

    fn field_size(&self, handle: FieldHandle) -> Option<UVec2> {
        self.fields.get(&handle).map(|t| t.size)
    }

    fn surface_size(&self) -> UVec2 {
        self.surface.size
    }

    fn set_surface_size(&mut self, size: UVec2) {
        if size != self.surface.size {
            self.surface = CpuTexture::surface(size);
        }
    }

    fn run_pass(&mut self, pass: &PassInvocation) -> FireResult<()> {
        pass.validate()?;
        if pass.program.descriptor().kind != ProgramKind::Blit {
            return Err(FireError::WrongPassKind(pass.program));
        }
        let size = self.target_size(pass.target)?;
        let flip = pass.target == RenderTarget::Surface;

        let texels: Vec<Vec4> = {
            let sources = self.sources(pass)?;
            let kernel = kernels::kernel(pass, &sources, size)?;
            let extent = size.as_vec2();
            let mut out = Vec::with_capacity((size.x * size.y) as usize);
            for y in 0..size.y {
                for x in 0..size.x {
                    let coord = IVec2::new(x as i32, y as i32);
                    let mut uv = (coord.as_vec2() + 0.5) / extent;
                    if flip {
                        uv.y = 1.0 - uv.y;
                    }
                    out.push(kernel(Cell { coord, uv }));
                }
            }
            out
        };

        let target = self.target_mut(pass.target)?;
        let channels = target.channels;
        for (dst, src) in target.texels.iter_mut().zip(texels) {
            *dst = mask(channels, src);
        }
        self.passes += 1;
        debug!("cpu pass {:?} -> {:?}", pass.program, pass.target);
        Ok(())
    }

    fn draw_particles(&mut self, draw: &ParticleDraw) -> FireResult<()> {
        let pass = &draw.pass;
        pass.validate()?;
        if pass.program.descriptor().kind != ProgramKind::Particles {
            return Err(FireError::WrongPassKind(pass.program));
        }
        let uvs = self
            .index_buffers
            .get(&draw.indices.0)
            .ok_or(FireError::UnknownIndexBuffer(draw.indices.0))?;
        let state_handle = pass.input(Input::ParticleState).ok_or(FireError::UnboundInput {
            program: pass.program,
            input: Input::ParticleState,
        })?;
        let state = self
            .fields
            .get(&state_handle)
            .ok_or(FireError::UnknownField(state_handle))?;

        let color = pass.param_vec3(Param::Color).extend(0.0);
        let footprint = pass.param(Param::PointSize).round().max(1.0) as i32;
        let flip = pass.param(Param::FlipY) > 0.5;
        let size = self.target_size(pass.target)?;

        let positions: Vec<Vec2> = uvs
            .iter()
            .take(draw.count as usize)
            .map(|uv| {
                let s = state.sample_nearest(Vec2::from(*uv));
                Vec2::new(s.x, if flip { 1.0 - s.y } else { s.y })
            })
            .collect();

        let target = self.target_mut(pass.target)?;
        let channels = target.channels;
        let half = (footprint - 1) / 2;
        for pos in positions {
            let centre = (pos * size.as_vec2()).floor().as_ivec2();
            for dy in -half..footprint - half {
                for dx in -half..footprint - half {
                    let p = centre + IVec2::new(dx, dy);
                    if p.x < 0 || p.y < 0 || p.x >= size.x as i32 || p.y >= size.y as i32 {
                        continue;
                    }
                    let i = target.index(p.x as u32, p.y as u32);
                    target.texels[i] = mask(channels, target.texels[i] + color);
                }
            }
        }
        self.passes += 1;
        Ok(())
    }

    fn create_index_buffer(&mut self, uvs: &[[f32; 2]]) -> FireResult<IndexBufferHandle> {
        let id = self.next_index_buffer;
        self.next_index_buffer += 1;
        self.index_buffers.insert(id, uvs.to_vec());
        Ok(IndexBufferHandle(id))
    }

    fn destroy_index_buffer(&mut self, handle: IndexBufferHandle) {
        self.index_buffers.remove(&handle.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FilterMode;
    use crate::program::Program;

    fn field(backend: &mut CpuBackend, handle: u32, channels: Channels) -> FieldHandle {
        let desc = FieldDesc {
            width: 4,
            height: 4,
            channels,
            sample: SampleType::F16,
            filter: FilterMode::Nearest,
        };
        backend.create_field(FieldHandle(handle), &desc).unwrap();
        FieldHandle(handle)
    }

    #[test]
    fn clear_scales_every_cell() {
        let mut backend = CpuBackend::new(UVec2::new(8, 8));
        let a = field(&mut backend, 0, Channels::R);
        let b = field(&mut backend, 1, Channels::R);
        backend.fill_field(a, Vec4::splat(2.0)).unwrap();

        let pass = PassInvocation::new(Program::Clear, RenderTarget::Field(b))
            .bind(Input::Source, a)
            .set(Param::Value, 0.25);
        backend.run_pass(&pass).unwrap();

        let out = backend.read_field(b).unwrap();
        assert!(out.texels.iter().all(|t| *t == Vec4::new(0.5, 0.0, 0.0, 0.0)));
    }

    #[test]
    fn unsupported_layout_is_rejected() {
        let mut backend = CpuBackend::new(UVec2::ONE).with_channels(&[Channels::Rgba]);
        let desc = FieldDesc {
            width: 1,
            height: 1,
            channels: Channels::R,
            sample: SampleType::F16,
            filter: FilterMode::Nearest,
        };
        assert!(backend.create_field(FieldHandle(0), &desc).is_err());
    }

    #[test]
    fn particles_add_into_target() {
        let mut backend = CpuBackend::new(UVec2::new(4, 4));
        let state = field(&mut backend, 0, Channels::Rgba);
        let target = field(&mut backend, 1, Channels::R);
        backend
            .write_field(state, &[Vec4::new(0.6, 0.1, 0.0, 0.0); 16])
            .unwrap();
        let indices = backend.create_index_buffer(&[[0.125, 0.125], [0.375, 0.125]]).unwrap();

        let pass = PassInvocation::new(Program::ParticleRender, RenderTarget::Field(target))
            .bind(Input::ParticleState, state)
            .set_vec3(Param::Color, glam::Vec3::new(1.0, 0.0, 0.0))
            .set(Param::PointSize, 1.0)
            .set_flag(Param::FlipY, false);
        let draw = ParticleDraw {
            pass,
            indices,
            count: 2,
        };
        backend.draw_particles(&draw).unwrap();

        let out = backend.read_field(target).unwrap();
        // both particles sit on cell (2, 0)
        assert_eq!(out.fetch(IVec2::new(2, 0)).x, 2.0);
        assert_eq!(out.total().x, 2.0);
    }
}
