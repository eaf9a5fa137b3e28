//! Programs, their parameter descriptors, and pass invocations.
//!
//! Each [`Program`] declares a fixed list of sampled inputs and scalar
//! parameters. Parameter slots are assigned in declaration order, so the
//! WGSL entry points read them at constant offsets.

use glam::{Vec2, Vec3};

use crate::error::{FireError, FireResult};
use crate::field::FieldHandle;
use crate::gpu::ffi::{PARAM_SLOTS, PassUniforms};

pub const MAX_INPUTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    Advection,
    Curl,
    VorticityConfinement,
    Buoyancy,
    Clear,
    Divergence,
    PressureIteration,
    GradientSubtract,
    Combustion,
    AddNoise,
    Splat,
    FuelRow,
    ParticleAdvection,
    ParticleStepLifespan,
    ParticleResetState,
    ParticleResetLifespan,
    ParticleRender,
    DisplayFire,
    DisplayDensity,
    DebugFire,
    DebugFloat,
}

/// Sampled field a program reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Input {
    Velocity,
    Source,
    Curl,
    Noise,
    Temperature,
    Fuel,
    Density,
    Pressure,
    Divergence,
    ParticleState,
    Lifespan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    Dt,
    Dissipation,
    NoiseBlending,
    Confinement,
    Buoyancy,
    Value,
    BurnTemperature,
    Cooling,
    Time,
    BlendLevel,
    Point,
    Color,
    Radius,
    AspectRatio,
    UseMax,
    RowHeight,
    InitialPosition,
    InitialVelocity,
    InitialLifespan,
    Stagger,
    PointSize,
    FlipY,
    Scalar,
    TemperatureScalar,
    FuelScalar,
}

impl Param {
    /// Consecutive slots the parameter occupies.
    pub fn width(self) -> usize {
        match self {
            Param::Point | Param::InitialPosition | Param::InitialVelocity => 2,
            Param::Color => 3,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    /// Full-screen quad over the target.
    Blit,
    /// One instanced sprite per particle.
    Particles,
}

#[derive(Debug)]
pub struct ProgramDescriptor {
    pub label: &'static str,
    pub entry_point: &'static str,
    pub kind: ProgramKind,
    pub inputs: &'static [Input],
    pub params: &'static [Param],
}

impl ProgramDescriptor {
    pub fn input_slot(&self, input: Input) -> Option<usize> {
        self.inputs.iter().position(|i| *i == input)
    }

    pub fn param_index(&self, param: Param) -> Option<usize> {
        self.params.iter().position(|p| *p == param)
    }

    pub fn param_slot(&self, param: Param) -> Option<usize> {
        let index = self.param_index(param)?;
        Some(self.params[..index].iter().map(|p| p.width()).sum())
    }
}

macro_rules! descriptor {
    ($label:literal, $entry:literal, $kind:ident, [$($input:ident),*], [$($param:ident),*]) => {
        &ProgramDescriptor {
            label: $label,
            entry_point: $entry,
            kind: ProgramKind::$kind,
            inputs: &[$(Input::$input),*],
            params: &[$(Param::$param),*],
        }
    };
}

impl Program {
    pub const ALL: [Program; 21] = [
        Program::Advection,
        Program::Curl,
        Program::VorticityConfinement,
        Program::Buoyancy,
        Program::Clear,
        Program::Divergence,
        Program::PressureIteration,
        Program::GradientSubtract,
        Program::Combustion,
        Program::AddNoise,
        Program::Splat,
        Program::FuelRow,
        Program::ParticleAdvection,
        Program::ParticleStepLifespan,
        Program::ParticleResetState,
        Program::ParticleResetLifespan,
        Program::ParticleRender,
        Program::DisplayFire,
        Program::DisplayDensity,
        Program::DebugFire,
        Program::DebugFloat,
    ];

    /// Programs that only ever draw to the display surface.
    pub fn is_display(self) -> bool {
        matches!(
            self,
            Program::DisplayFire | Program::DisplayDensity | Program::DebugFire | Program::DebugFloat
        )
    }

    pub fn descriptor(self) -> &'static ProgramDescriptor {
        match self {
            Program::Advection => {
                descriptor!("advection", "fs_advection", Blit, [Velocity, Source], [Dt, Dissipation])
            }
            Program::Curl => descriptor!("curl", "fs_curl", Blit, [Velocity, Noise], [NoiseBlending]),
            Program::VorticityConfinement => descriptor!(
                "vorticity_confinement",
                "fs_vorticity",
                Blit,
                [Velocity, Curl],
                [Confinement, Dt]
            ),
            Program::Buoyancy => {
                descriptor!("buoyancy", "fs_buoyancy", Blit, [Velocity, Temperature], [Buoyancy, Dt])
            }
            Program::Clear => descriptor!("clear", "fs_clear", Blit, [Source], [Value]),
            Program::Divergence => descriptor!("divergence", "fs_divergence", Blit, [Velocity], []),
            Program::PressureIteration => {
                descriptor!("pressure_iteration", "fs_pressure", Blit, [Pressure, Divergence], [])
            }
            Program::GradientSubtract => {
                descriptor!("gradient_subtract", "fs_gradient_subtract", Blit, [Pressure, Velocity], [])
            }
            Program::Combustion => descriptor!(
                "combustion",
                "fs_combustion",
                Blit,
                [Fuel, Temperature, Noise],
                [BurnTemperature, Cooling, NoiseBlending, Dt]
            ),
            Program::AddNoise => descriptor!("add_noise", "fs_add_noise", Blit, [Source], [Time, BlendLevel]),
            Program::Splat => descriptor!(
                "splat",
                "fs_splat",
                Blit,
                [Source],
                [Point, Color, Radius, AspectRatio, UseMax]
            ),
            Program::FuelRow => descriptor!("fuel_row", "fs_fuel_row", Blit, [Source], [RowHeight]),
            Program::ParticleAdvection => descriptor!(
                "particle_advection",
                "fs_particle_advection",
                Blit,
                [ParticleState, Velocity],
                [Dt, Dissipation]
            ),
            Program::ParticleStepLifespan => {
                descriptor!("particle_step_lifespan", "fs_particle_step_lifespan", Blit, [Lifespan], [Dt])
            }
            Program::ParticleResetState => descriptor!(
                "particle_reset_state",
                "fs_particle_reset_state",
                Blit,
                [ParticleState, Lifespan],
                [InitialPosition, InitialVelocity]
            ),
            Program::ParticleResetLifespan => descriptor!(
                "particle_reset_lifespan",
                "fs_particle_reset_lifespan",
                Blit,
                [Lifespan],
                [InitialLifespan, Stagger]
            ),
            Program::ParticleRender => descriptor!(
                "particle_render",
                "fs_particle",
                Particles,
                [ParticleState],
                [Color, PointSize, FlipY]
            ),
            Program::DisplayFire => descriptor!(
                "display_fire",
                "fs_display_fire",
                Blit,
                [Density, Temperature, Fuel],
                [BurnTemperature]
            ),
            Program::DisplayDensity => descriptor!("display_density", "fs_display_density", Blit, [Source], []),
            Program::DebugFire => descriptor!(
                "debug_fire",
                "fs_debug_fire",
                Blit,
                [Fuel, Temperature],
                [TemperatureScalar, FuelScalar]
            ),
            Program::DebugFloat => descriptor!("debug_float", "fs_debug_float", Blit, [Source], [Scalar]),
        }
    }

    pub fn label(self) -> &'static str {
        self.descriptor().label
    }
}

/// Where a pass writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    Field(FieldHandle),
    /// The presentation surface.
    Surface,
}

/// One evaluation of a program over every cell of its target.
///
/// Misuse (undeclared names, width mismatches) is remembered and surfaces
/// from [`PassInvocation::validate`] before the pass is issued.
#[derive(Debug, Clone, PartialEq)]
pub struct PassInvocation {
    pub program: Program,
    pub target: RenderTarget,
    pub inputs: [Option<FieldHandle>; MAX_INPUTS],
    pub uniforms: PassUniforms,
    assigned: u32,
    invalid: Option<FireError>,
}

impl PassInvocation {
    pub fn new(program: Program, target: RenderTarget) -> Self {
        Self {
            program,
            target,
            inputs: [None; MAX_INPUTS],
            uniforms: PassUniforms::default(),
            assigned: 0,
            invalid: None,
        }
    }

    pub fn bind(mut self, input: Input, field: FieldHandle) -> Self {
        match self.program.descriptor().input_slot(input) {
            Some(slot) => self.inputs[slot] = Some(field),
            None => self.reject(FireError::UndeclaredInput {
                program: self.program,
                input,
            }),
        }
        self
    }

    pub fn set(self, param: Param, value: f32) -> Self {
        self.set_values(param, &[value])
    }

    pub fn set_vec2(self, param: Param, value: Vec2) -> Self {
        self.set_values(param, &value.to_array())
    }

    pub fn set_vec3(self, param: Param, value: Vec3) -> Self {
        self.set_values(param, &value.to_array())
    }

    pub fn set_flag(self, param: Param, value: bool) -> Self {
        self.set(param, if value { 1.0 } else { 0.0 })
    }

    fn set_values(mut self, param: Param, values: &[f32]) -> Self {
        let descriptor = self.program.descriptor();
        let (Some(index), Some(slot)) = (descriptor.param_index(param), descriptor.param_slot(param)) else {
            self.reject(FireError::UndeclaredParam {
                program: self.program,
                param,
            });
            return self;
        };
        if values.len() != param.width() || slot + values.len() > PARAM_SLOTS {
            self.reject(FireError::UndeclaredParam {
                program: self.program,
                param,
            });
            return self;
        }
        for (i, value) in values.iter().enumerate() {
            self.uniforms.set_slot(slot + i, *value);
        }
        self.assigned |= 1 << index;
        self
    }

    fn reject(&mut self, err: FireError) {
        if self.invalid.is_none() {
            self.invalid = Some(err);
        }
    }

    pub fn input(&self, input: Input) -> Option<FieldHandle> {
        let slot = self.program.descriptor().input_slot(input)?;
        self.inputs[slot]
    }

    pub fn param(&self, param: Param) -> f32 {
        self.param_slot(param).map_or(0.0, |slot| self.uniforms.slot(slot))
    }

    pub fn param_vec2(&self, param: Param) -> Vec2 {
        self.param_slot(param).map_or(Vec2::ZERO, |slot| {
            Vec2::new(self.uniforms.slot(slot), self.uniforms.slot(slot + 1))
        })
    }

    pub fn param_vec3(&self, param: Param) -> Vec3 {
        self.param_slot(param).map_or(Vec3::ZERO, |slot| {
            Vec3::new(
                self.uniforms.slot(slot),
                self.uniforms.slot(slot + 1),
                self.uniforms.slot(slot + 2),
            )
        })
    }

    fn param_slot(&self, param: Param) -> Option<usize> {
        self.program.descriptor().param_slot(param)
    }

    /// Every declared input bound, every declared parameter set, and the
    /// target never sampled.
    pub fn validate(&self) -> FireResult<()> {
        if let Some(err) = &self.invalid {
            return Err(err.clone());
        }
        let descriptor = self.program.descriptor();
        for (slot, input) in descriptor.inputs.iter().enumerate() {
            let Some(field) = self.inputs[slot] else {
                return Err(FireError::UnboundInput {
                    program: self.program,
                    input: *input,
                });
            };
            if self.target == RenderTarget::Field(field) {
                return Err(FireError::ReadWriteHazard {
                    program: self.program,
                    field,
                });
            }
        }
        for (index, param) in descriptor.params.iter().enumerate() {
            if self.assigned & (1 << index) == 0 {
                return Err(FireError::UnboundParam {
                    program: self.program,
                    param: *param,
                });
            }
        }
        Ok(())
    }
}

/// Handle of a per-source buffer of particle texel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexBufferHandle(pub u32);

/// Point-sprite draw of a particle population into a target.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleDraw {
    pub pass: PassInvocation,
    pub indices: IndexBufferHandle,
    pub count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_follow_declaration_widths() {
        let splat = Program::Splat.descriptor();
        assert_eq!(splat.param_slot(Param::Point), Some(0));
        assert_eq!(splat.param_slot(Param::Color), Some(2));
        assert_eq!(splat.param_slot(Param::Radius), Some(5));
        assert_eq!(splat.param_slot(Param::UseMax), Some(7));
        assert_eq!(splat.param_slot(Param::Dt), None);
    }

    #[test]
    fn every_program_fits_the_uniform_block() {
        for program in Program::ALL {
            let d = program.descriptor();
            let used: usize = d.params.iter().map(|p| p.width()).sum();
            assert!(used <= PARAM_SLOTS, "{program:?}");
            assert!(d.inputs.len() <= MAX_INPUTS, "{program:?}");
        }
    }

    #[test]
    fn display_programs_are_blits() {
        let display: Vec<_> = Program::ALL.into_iter().filter(|p| p.is_display()).collect();
        assert_eq!(display.len(), 4);
        assert!(display.iter().all(|p| p.descriptor().kind == ProgramKind::Blit));
        assert!(!Program::ParticleRender.is_display());
    }

    #[test]
    fn undeclared_param_is_reported() {
        let pass = PassInvocation::new(Program::Clear, RenderTarget::Field(FieldHandle(1)))
            .bind(Input::Source, FieldHandle(0))
            .set(Param::Dt, 0.1);
        assert_eq!(
            pass.validate(),
            Err(FireError::UndeclaredParam {
                program: Program::Clear,
                param: Param::Dt
            })
        );
    }

    #[test]
    fn missing_param_is_reported() {
        let pass = PassInvocation::new(Program::Clear, RenderTarget::Field(FieldHandle(1)))
            .bind(Input::Source, FieldHandle(0));
        assert_eq!(
            pass.validate(),
            Err(FireError::UnboundParam {
                program: Program::Clear,
                param: Param::Value
            })
        );
    }

    #[test]
    fn sampling_the_target_is_a_hazard() {
        let pass = PassInvocation::new(Program::Clear, RenderTarget::Field(FieldHandle(3)))
            .bind(Input::Source, FieldHandle(3))
            .set(Param::Value, 0.5);
        assert_eq!(
            pass.validate(),
            Err(FireError::ReadWriteHazard {
                program: Program::Clear,
                field: FieldHandle(3)
            })
        );
    }

    #[test]
    fn vector_params_round_trip_through_slots() {
        let pass = PassInvocation::new(Program::Splat, RenderTarget::Surface)
            .set_vec3(Param::Color, Vec3::new(0.1, 0.2, 0.3));
        assert_eq!(pass.param_vec3(Param::Color), Vec3::new(0.1, 0.2, 0.3));
        assert_eq!(pass.uniforms.slot(3), 0.2);
    }
}
