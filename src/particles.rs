//! Fire sources: GPU-resident particle populations advected by the velocity
//! field and recycled at their emitter.
//!
//! Each particle is one texel of a square state texture holding
//! `(position.x, position.y, velocity.x, velocity.y)`, with its remaining
//! lifespan in a parallel one-channel texture. Positions are normalised field
//! coordinates with `y` up; velocities are in simulation texels per second.

use bevy::log::info;
use glam::{UVec2, Vec2, Vec3};

use crate::backend::FieldBackend;
use crate::error::{FireError, FireResult};
use crate::field::{DoubleField, FieldStore, FilterMode, Resolution};
use crate::program::{IndexBufferHandle, Input, Param, ParticleDraw, PassInvocation, Program, RenderTarget};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FireSourceDesc {
    /// Emitter position in surface pixels, measured from the bottom-left corner.
    pub position: Vec2,
    pub velocity: Vec2,
    pub num_particles: u32,
    /// Seconds a particle lives before respawning; negative never respawns.
    pub lifespan: f32,
}

impl FireSourceDesc {
    pub fn infinite(&self) -> bool {
        self.lifespan < 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FireSourceId(pub u32);

#[derive(Debug, Clone)]
pub struct FireSource {
    pub desc: FireSourceDesc,
    data_width: u32,
    state: DoubleField,
    lifespans: DoubleField,
    indices: IndexBufferHandle,
}

/// Largest particle texture side; the default wgpu 2D texture limit.
pub const MAX_DATA_WIDTH: u32 = 8192;

/// Side of the square texture holding `count` particles.
pub fn data_width(count: u32) -> FireResult<u32> {
    let too_many = FireError::TooManyParticles {
        count,
        max: MAX_DATA_WIDTH,
    };
    let mut w = ((count as f64).sqrt().ceil() as u32).max(1);
    while w.checked_mul(w).ok_or_else(|| too_many.clone())? < count {
        w += 1;
    }
    if w > MAX_DATA_WIDTH {
        return Err(too_many);
    }
    Ok(w)
}

/// Texel centres of a `width`² grid, column by column.
pub fn particle_uvs(width: u32) -> Vec<[f32; 2]> {
    let w = width as f32;
    (0..width)
        .flat_map(|i| (0..width).map(move |j| [(i as f32 + 0.5) / w, (j as f32 + 0.5) / w]))
        .collect()
}

impl FireSource {
    pub fn new<B: FieldBackend>(
        store: &mut FieldStore,
        backend: &mut B,
        desc: FireSourceDesc,
        surface: UVec2,
    ) -> FireResult<Self> {
        if desc.num_particles == 0 {
            return Err(FireError::EmptyFireSource);
        }
        let data_width = data_width(desc.num_particles)?;
        let size = Resolution::new(data_width, data_width);
        let f = store.formats;

        let state = store.allocate_double(backend, f.desc(size, f.rgba, FilterMode::Nearest))?;
        let lifespans = match store.allocate_double(backend, f.desc(size, f.r, FilterMode::Nearest)) {
            Ok(l) => l,
            Err(err) => {
                store.release_double(backend, state);
                return Err(err);
            }
        };
        let indices = match backend.create_index_buffer(&particle_uvs(data_width)) {
            Ok(i) => i,
            Err(err) => {
                store.release_double(backend, state);
                store.release_double(backend, lifespans);
                return Err(err);
            }
        };

        let mut source = Self {
            desc,
            data_width,
            state,
            lifespans,
            indices,
        };
        // fresh lifespans are zero, so every particle starts at the emitter
        source.reset_state(backend, surface)?;
        source.reset_lifespans(backend, 1.0)?;
        info!(
            "fire source: {} particles in a {}x{} texture, lifespan {}",
            desc.num_particles, data_width, data_width, desc.lifespan
        );
        Ok(source)
    }

    pub fn data_width(&self) -> u32 {
        self.data_width
    }

    pub fn state(&self) -> &DoubleField {
        &self.state
    }

    pub fn lifespans(&self) -> &DoubleField {
        &self.lifespans
    }

    pub fn index_buffer(&self) -> IndexBufferHandle {
        self.indices
    }

    /// Emitter position in normalised field coordinates.
    pub fn emitter(&self, surface: UVec2) -> Vec2 {
        self.desc.position / surface.max(UVec2::ONE).as_vec2()
    }

    /// Advect, then tick and recycle unless the lifespan is infinite.
    pub fn step<B: FieldBackend>(
        &mut self,
        backend: &mut B,
        velocity: &DoubleField,
        dt: f32,
        dissipation: f32,
        surface: UVec2,
    ) -> FireResult<()> {
        let advect = PassInvocation::new(Program::ParticleAdvection, self.state.target())
            .bind(Input::ParticleState, self.state.read_handle())
            .bind(Input::Velocity, velocity.read_handle())
            .set(Param::Dt, dt)
            .set(Param::Dissipation, dissipation);
        backend.run_pass(&advect)?;
        self.state.swap();

        if self.desc.infinite() {
            return Ok(());
        }

        let tick = PassInvocation::new(Program::ParticleStepLifespan, self.lifespans.target())
            .bind(Input::Lifespan, self.lifespans.read_handle())
            .set(Param::Dt, dt);
        backend.run_pass(&tick)?;
        self.lifespans.swap();

        self.reset_state(backend, surface)?;
        self.reset_lifespans(backend, 0.0)
    }

    /// Sends every dead particle back to the emitter.
    fn reset_state<B: FieldBackend>(&mut self, backend: &mut B, surface: UVec2) -> FireResult<()> {
        let pass = PassInvocation::new(Program::ParticleResetState, self.state.target())
            .bind(Input::ParticleState, self.state.read_handle())
            .bind(Input::Lifespan, self.lifespans.read_handle())
            .set_vec2(Param::InitialPosition, self.emitter(surface))
            .set_vec2(Param::InitialVelocity, self.desc.velocity);
        backend.run_pass(&pass)?;
        self.state.swap();
        Ok(())
    }

    fn reset_lifespans<B: FieldBackend>(&mut self, backend: &mut B, stagger: f32) -> FireResult<()> {
        let pass = PassInvocation::new(Program::ParticleResetLifespan, self.lifespans.target())
            .bind(Input::Lifespan, self.lifespans.read_handle())
            .set(Param::InitialLifespan, self.desc.lifespan)
            .set(Param::Stagger, stagger);
        backend.run_pass(&pass)?;
        self.lifespans.swap();
        Ok(())
    }

    /// Draws one sprite per live particle slot into `target`.
    pub fn render<B: FieldBackend>(
        &self,
        backend: &mut B,
        target: RenderTarget,
        color: Vec3,
        size: f32,
    ) -> FireResult<()> {
        let pass = PassInvocation::new(Program::ParticleRender, target)
            .bind(Input::ParticleState, self.state.read_handle())
            .set_vec3(Param::Color, color)
            .set(Param::PointSize, size)
            .set_flag(Param::FlipY, target == RenderTarget::Surface);
        backend.draw_particles(&ParticleDraw {
            pass,
            indices: self.indices,
            count: self.desc.num_particles,
        })
    }

    pub fn destroy<B: FieldBackend>(self, store: &mut FieldStore, backend: &mut B) {
        store.release_double(backend, self.state);
        store.release_double(backend, self.lifespans);
        backend.destroy_index_buffer(self.indices);
    }
}
