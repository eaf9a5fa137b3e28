//! The per-frame step pipeline.
//!
//! Passes are issued in a fixed order and each one assumes every earlier one
//! has been committed. On the GPU that holds because commands on one queue
//! execute in issue order; nothing else synchronises them. Every pass reads
//! `read` and writes `write` of a double field and swaps afterwards, so no
//! pass ever samples what it writes.

use bevy::log::{debug, info, warn};
use glam::{UVec2, Vec2, Vec3};

use crate::backend::FieldBackend;
use crate::config::{DisplayMode, FireConfig};
use crate::error::{FireError, FireResult};
use crate::field::{
    DoubleField, FieldFormats, FieldStore, MAX_TEXTURE_UNITS, SampleType, SimFields, get_resolution,
};
use crate::interaction::Pointers;
use crate::particles::{FireSource, FireSourceDesc, FireSourceId};
use crate::program::{Input, Param, PassInvocation, Program, RenderTarget};

/// Owns every field, fire source and the backend they live in.
#[derive(Debug)]
pub struct SimulationContext<B: FieldBackend> {
    backend: B,
    store: FieldStore,
    fields: SimFields,
    sources: Vec<(FireSourceId, FireSource)>,
    next_source: u32,
    surface: UVec2,
    pending_resize: Option<UVec2>,
}

fn commit<B: FieldBackend>(backend: &mut B, pass: PassInvocation, buffer: &mut DoubleField) -> FireResult<()> {
    backend.run_pass(&pass)?;
    buffer.swap();
    Ok(())
}

fn advect<B: FieldBackend>(
    backend: &mut B,
    velocity: &DoubleField,
    buffer: &mut DoubleField,
    dt: f32,
    dissipation: f32,
) -> FireResult<()> {
    let pass = PassInvocation::new(Program::Advection, buffer.target())
        .bind(Input::Velocity, velocity.read_handle())
        .bind(Input::Source, buffer.read_handle())
        .set(Param::Dt, dt)
        .set(Param::Dissipation, dissipation);
    commit(backend, pass, buffer)
}

fn splat_pass<B: FieldBackend>(
    backend: &mut B,
    buffer: &mut DoubleField,
    point: Vec2,
    color: Vec3,
    radius: f32,
    aspect: f32,
    use_max: bool,
) -> FireResult<()> {
    let pass = PassInvocation::new(Program::Splat, buffer.target())
        .bind(Input::Source, buffer.read_handle())
        .set_vec2(Param::Point, point)
        .set_vec3(Param::Color, color)
        .set(Param::Radius, radius)
        .set(Param::AspectRatio, aspect)
        .set_flag(Param::UseMax, use_max);
    commit(backend, pass, buffer)
}

fn check_surface(surface: UVec2) -> FireResult<()> {
    if surface.x == 0 || surface.y == 0 {
        return Err(FireError::InvalidDimensions {
            width: surface.x,
            height: surface.y,
        });
    }
    Ok(())
}

impl<B: FieldBackend> SimulationContext<B> {
    /// Probes formats, allocates every field for `surface` and seeds the noise.
    pub fn new(mut backend: B, config: &FireConfig, surface: UVec2) -> FireResult<Self> {
        check_surface(surface)?;
        backend.set_surface_size(surface);
        let formats = FieldFormats::probe(&backend, SampleType::F16)?;
        let mut store = FieldStore::new(formats, MAX_TEXTURE_UNITS);
        let fields = SimFields::allocate(&mut store, &mut backend, config, surface)?;

        let mut ctx = Self {
            backend,
            store,
            fields,
            sources: Vec::new(),
            next_source: 0,
            surface,
            pending_resize: None,
        };
        ctx.seed_noise()?;
        Ok(ctx)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn fields(&self) -> &SimFields {
        &self.fields
    }

    pub fn store(&self) -> &FieldStore {
        &self.store
    }

    pub fn surface(&self) -> UVec2 {
        self.surface
    }

    fn aspect(&self) -> f32 {
        self.surface.x as f32 / self.surface.y as f32
    }

    /// Records a new surface size; fields are rebuilt at the next frame boundary.
    pub fn request_resize(&mut self, surface: UVec2) {
        if surface.x == 0 || surface.y == 0 {
            debug!("ignoring resize to {}x{}", surface.x, surface.y);
            return;
        }
        self.pending_resize = Some(surface);
    }

    pub fn pending_resize(&self) -> Option<UVec2> {
        self.pending_resize
    }

    /// Tears down and reallocates every field when the surface or the
    /// configured resolutions changed. Prior simulation state is discarded.
    /// On failure the previous resolutions are rebuilt (zeroed) and the
    /// surface is left as it was.
    pub fn apply_pending_resize(&mut self, config: &FireConfig) -> FireResult<bool> {
        let surface = self.pending_resize.take().unwrap_or(self.surface);
        let unchanged = surface == self.surface
            && get_resolution(config.sim_resolution, surface) == self.fields.sim
            && get_resolution(config.dye_resolution, surface) == self.fields.dye;
        if unchanged {
            return Ok(false);
        }

        let (old_sim, old_dye) = (self.fields.sim, self.fields.dye);
        self.fields.clone().release(&mut self.store, &mut self.backend);
        match SimFields::allocate(&mut self.store, &mut self.backend, config, surface) {
            Ok(fields) => {
                self.fields = fields;
                self.backend.set_surface_size(surface);
                self.surface = surface;
            }
            Err(err) => {
                // the old layout fits in the units just released
                warn!("reallocation for {}x{} failed: {err}", surface.x, surface.y);
                self.fields = SimFields::allocate_at(&mut self.store, &mut self.backend, old_sim, old_dye)?;
                self.seed_noise()?;
                return Err(err);
            }
        }
        self.seed_noise()?;
        info!("surface resized to {}x{}", surface.x, surface.y);
        Ok(true)
    }

    fn seed_noise(&mut self) -> FireResult<()> {
        self.add_noise(rand::random::<f32>(), 1.0)
    }

    fn add_noise(&mut self, time: f32, blend: f32) -> FireResult<()> {
        let noise = &mut self.fields.noise;
        let pass = PassInvocation::new(Program::AddNoise, noise.target())
            .bind(Input::Source, noise.read_handle())
            .set(Param::Time, time)
            .set(Param::BlendLevel, blend);
        commit(&mut self.backend, pass, noise)
    }

    // ---------------- fire sources ----------------

    pub fn add_fire_source(&mut self, desc: FireSourceDesc) -> FireResult<FireSourceId> {
        let source = FireSource::new(&mut self.store, &mut self.backend, desc, self.surface)?;
        let id = FireSourceId(self.next_source);
        self.next_source += 1;
        self.sources.push((id, source));
        Ok(id)
    }

    /// Destroys the source's buffers and frees its texture units.
    pub fn remove_fire_source(&mut self, id: FireSourceId) -> FireResult<()> {
        let index = self
            .sources
            .iter()
            .position(|(i, _)| *i == id)
            .ok_or(FireError::UnknownFireSource(id.0))?;
        let (_, source) = self.sources.remove(index);
        source.destroy(&mut self.store, &mut self.backend);
        Ok(())
    }

    pub fn fire_source(&self, id: FireSourceId) -> Option<&FireSource> {
        self.sources.iter().find(|(i, _)| *i == id).map(|(_, s)| s)
    }

    pub fn fire_sources(&self) -> impl Iterator<Item = (FireSourceId, &FireSource)> {
        self.sources.iter().map(|(id, s)| (*id, s))
    }

    // ---------------- input ----------------

    /// Continuous fuel row, then one splat per moved pointer.
    pub fn inject(&mut self, config: &FireConfig, pointers: &mut Pointers) -> FireResult<()> {
        if config.fuel_row_height > 0.0 {
            let fuel = &mut self.fields.fuel;
            let pass = PassInvocation::new(Program::FuelRow, fuel.target())
                .bind(Input::Source, fuel.read_handle())
                .set(Param::RowHeight, config.fuel_row_height);
            commit(&mut self.backend, pass, fuel)?;
        }
        for s in pointers.take_splats() {
            self.splat(config, s.position.x, s.position.y, s.delta.x, s.delta.y, s.color)?;
        }
        Ok(())
    }

    /// Radial perturbation at surface pixel `(x, y)` (origin top-left):
    /// velocity gains `(dx, -dy)`, fuel is raised to at least 1, density gains `color`.
    pub fn splat(&mut self, config: &FireConfig, x: f32, y: f32, dx: f32, dy: f32, color: Vec3) -> FireResult<()> {
        let size = self.surface.as_vec2();
        let point = Vec2::new(x / size.x, 1.0 - y / size.y);
        let radius = config.splat_falloff();
        let aspect = self.aspect();
        let f = &mut self.fields;
        let b = &mut self.backend;

        splat_pass(b, &mut f.velocity, point, Vec3::new(dx, -dy, 0.0), radius, aspect, false)?;
        splat_pass(b, &mut f.fuel, point, Vec3::X, radius, aspect, true)?;
        splat_pass(b, &mut f.density, point, color, radius, aspect, false)
    }

    // ---------------- step ----------------

    /// Advances the simulation by `dt` seconds. `elapsed` drives the noise.
    pub fn step(&mut self, config: &FireConfig, dt: f32, elapsed: f32) -> FireResult<()> {
        self.deposit_particle_fuel(config)?;
        self.combust(config, dt)?;
        self.advect_velocity(config, dt)?;
        self.confine_vorticity(config, dt)?;
        self.apply_buoyancy(config, dt)?;
        self.project(config)?;
        self.advect_scalars(config, dt)?;
        self.refresh_noise(config, elapsed)?;
        self.step_fire_sources(config, dt)
    }

    /// Additive render into the fuel read instance; nothing is swapped.
    pub fn deposit_particle_fuel(&mut self, config: &FireConfig) -> FireResult<()> {
        let target = RenderTarget::Field(self.fields.fuel.read_handle());
        let color = Vec3::new(config.particle_fuel, 0.0, 0.0);
        for (_, source) in &self.sources {
            source.render(&mut self.backend, target, color, config.particle_size)?;
        }
        Ok(())
    }

    pub fn combust(&mut self, config: &FireConfig, dt: f32) -> FireResult<()> {
        let f = &mut self.fields;
        let pass = PassInvocation::new(Program::Combustion, f.temperature.target())
            .bind(Input::Fuel, f.fuel.read_handle())
            .bind(Input::Temperature, f.temperature.read_handle())
            .bind(Input::Noise, f.noise.read_handle())
            .set(Param::BurnTemperature, config.burn_temperature)
            .set(Param::Cooling, config.cooling)
            .set(Param::NoiseBlending, config.noise_blending)
            .set(Param::Dt, dt);
        commit(&mut self.backend, pass, &mut f.temperature)
    }

    pub fn advect_velocity(&mut self, config: &FireConfig, dt: f32) -> FireResult<()> {
        let velocity = self.fields.velocity;
        advect(
            &mut self.backend,
            &velocity,
            &mut self.fields.velocity,
            dt,
            config.velocity_dissipation,
        )
    }

    /// Curl into its single buffer, then the confinement force into velocity.
    pub fn confine_vorticity(&mut self, config: &FireConfig, dt: f32) -> FireResult<()> {
        let f = &mut self.fields;
        let curl = PassInvocation::new(Program::Curl, f.curl.target())
            .bind(Input::Velocity, f.velocity.read_handle())
            .bind(Input::Noise, f.noise.read_handle())
            .set(Param::NoiseBlending, config.noise_blending);
        self.backend.run_pass(&curl)?;

        let force = PassInvocation::new(Program::VorticityConfinement, f.velocity.target())
            .bind(Input::Velocity, f.velocity.read_handle())
            .bind(Input::Curl, f.curl.handle)
            .set(Param::Confinement, config.confinement)
            .set(Param::Dt, dt);
        commit(&mut self.backend, force, &mut f.velocity)
    }

    pub fn apply_buoyancy(&mut self, config: &FireConfig, dt: f32) -> FireResult<()> {
        let f = &mut self.fields;
        let pass = PassInvocation::new(Program::Buoyancy, f.velocity.target())
            .bind(Input::Velocity, f.velocity.read_handle())
            .bind(Input::Temperature, f.temperature.read_handle())
            .set(Param::Buoyancy, config.buoyancy)
            .set(Param::Dt, dt);
        commit(&mut self.backend, pass, &mut f.velocity)
    }

    /// Decays pressure, solves for it with Jacobi iterations and subtracts
    /// its gradient from velocity.
    pub fn project(&mut self, config: &FireConfig) -> FireResult<()> {
        let f = &mut self.fields;
        let b = &mut self.backend;

        let decay = PassInvocation::new(Program::Clear, f.pressure.target())
            .bind(Input::Source, f.pressure.read_handle())
            .set(Param::Value, config.pressure_dissipation);
        commit(b, decay, &mut f.pressure)?;

        let divergence = PassInvocation::new(Program::Divergence, f.divergence.target())
            .bind(Input::Velocity, f.velocity.read_handle());
        b.run_pass(&divergence)?;

        for _ in 0..config.jacobi_iterations() {
            let jacobi = PassInvocation::new(Program::PressureIteration, f.pressure.target())
                .bind(Input::Pressure, f.pressure.read_handle())
                .bind(Input::Divergence, f.divergence.handle);
            commit(b, jacobi, &mut f.pressure)?;
        }

        let subtract = PassInvocation::new(Program::GradientSubtract, f.velocity.target())
            .bind(Input::Pressure, f.pressure.read_handle())
            .bind(Input::Velocity, f.velocity.read_handle());
        commit(b, subtract, &mut f.velocity)
    }

    /// Density at dye resolution, then temperature, fuel and noise.
    pub fn advect_scalars(&mut self, config: &FireConfig, dt: f32) -> FireResult<()> {
        let f = &mut self.fields;
        let b = &mut self.backend;
        let velocity = f.velocity;
        advect(b, &velocity, &mut f.density, dt, config.density_dissipation)?;
        advect(b, &velocity, &mut f.temperature, dt, 1.0)?;
        advect(b, &velocity, &mut f.fuel, dt, config.fuel_dissipation)?;
        advect(b, &velocity, &mut f.noise, dt, 1.0)
    }

    /// Blends fresh noise in, cycling every ten seconds of `elapsed`.
    pub fn refresh_noise(&mut self, config: &FireConfig, elapsed: f32) -> FireResult<()> {
        let time = (elapsed / 10.0).rem_euclid(1.0);
        self.add_noise(time, config.noise_volatility)
    }

    pub fn step_fire_sources(&mut self, config: &FireConfig, dt: f32) -> FireResult<()> {
        let velocity = self.fields.velocity;
        for (_, source) in &mut self.sources {
            source.step(
                &mut self.backend,
                &velocity,
                dt,
                config.velocity_dissipation,
                self.surface,
            )?;
        }
        Ok(())
    }

    // ---------------- output ----------------

    /// Draws the configured display mode to the surface.
    pub fn render(&mut self, config: &FireConfig) -> FireResult<()> {
        let f = &self.fields;
        let debug_float = |field: &DoubleField, scalar: f32| {
            PassInvocation::new(Program::DebugFloat, RenderTarget::Surface)
                .bind(Input::Source, field.read_handle())
                .set(Param::Scalar, scalar)
        };

        let pass = match config.display_mode {
            DisplayMode::Normal => PassInvocation::new(Program::DisplayFire, RenderTarget::Surface)
                .bind(Input::Density, f.density.read_handle())
                .bind(Input::Temperature, f.temperature.read_handle())
                .bind(Input::Fuel, f.fuel.read_handle())
                .set(Param::BurnTemperature, config.burn_temperature),
            DisplayMode::DebugFire => PassInvocation::new(Program::DebugFire, RenderTarget::Surface)
                .bind(Input::Fuel, f.fuel.read_handle())
                .bind(Input::Temperature, f.temperature.read_handle())
                .set(Param::TemperatureScalar, config.temperature_debug_scalar)
                .set(Param::FuelScalar, 1.0),
            DisplayMode::DebugTemperature => debug_float(&f.temperature, config.temperature_debug_scalar),
            DisplayMode::DebugFuel => debug_float(&f.fuel, 1.0),
            DisplayMode::DebugPressure => debug_float(&f.pressure, 1.0),
            DisplayMode::DebugNoise => debug_float(&f.noise, 1.0),
            DisplayMode::DebugDensity => PassInvocation::new(Program::DisplayDensity, RenderTarget::Surface)
                .bind(Input::Source, f.density.read_handle()),
        };
        self.backend.run_pass(&pass)?;

        if config.display_mode == DisplayMode::Normal {
            for (_, source) in &self.sources {
                source.render(&mut self.backend, RenderTarget::Surface, Vec3::ONE, config.particle_size)?;
            }
        }
        Ok(())
    }

    /// One frame: deferred resize, input, a fixed `time_step` step, display.
    pub fn frame(&mut self, config: &FireConfig, pointers: &mut Pointers, elapsed: f32) -> FireResult<()> {
        self.apply_pending_resize(config)?;
        self.inject(config, pointers)?;
        self.step(config, config.time_step, elapsed)?;
        self.render(config)
    }
}
