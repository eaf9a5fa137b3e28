// per-cell host versions of the fragment programs in assets/shaders/fire.wgsl
use glam::{IVec2, UVec2, Vec2, Vec3, Vec4, Vec4Swizzles};

use super::texture::CpuTexture;
use crate::error::{FireError, FireResult};
use crate::program::{Input, MAX_INPUTS, Param, PassInvocation, Program};

/// One output cell. `uv` is the cell centre, already flipped for the surface.
#[derive(Clone, Copy, Debug)]
pub struct Cell {
    pub coord: IVec2,
    pub uv: Vec2,
}

pub type Kernel<'a> = Box<dyn Fn(Cell) -> Vec4 + 'a>;

/// Input textures of one pass, indexed by descriptor slot.
pub struct Sources<'a> {
    pub program: Program,
    pub textures: [Option<&'a CpuTexture>; MAX_INPUTS],
}

impl<'a> Sources<'a> {
    pub fn get(&self, input: Input) -> FireResult<&'a CpuTexture> {
        self.program
            .descriptor()
            .input_slot(input)
            .and_then(|slot| self.textures[slot])
            .ok_or(FireError::UnboundInput {
                program: self.program,
                input,
            })
    }
}

#[inline]
fn mix(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn hash(p: Vec2) -> f32 {
    let h = p.dot(Vec2::new(12.9898, 78.233)).sin() * 43758.547;
    h - h.floor()
}

/// Smooth value noise in [0, 1].
pub fn value_noise(p: Vec2) -> f32 {
    let i = p.floor();
    let f = p - i;
    let u = f * f * (Vec2::splat(3.0) - 2.0 * f);

    let a = hash(i);
    let b = hash(i + Vec2::X);
    let c = hash(i + Vec2::Y);
    let d = hash(i + Vec2::ONE);
    mix(mix(a, b, u.x), mix(c, d, u.x), u.y)
}

/// Lattice coordinate fed to [`value_noise`] for a cell at `time`.
pub fn noise_coord(coord: IVec2, time: f32) -> Vec2 {
    (coord.as_vec2() + 0.5) / 8.0 + time * Vec2::new(131.0, 71.0)
}

#[inline]
fn neighbours(t: &CpuTexture, c: IVec2) -> (Vec4, Vec4, Vec4, Vec4) {
    (
        t.fetch(c - IVec2::X),
        t.fetch(c + IVec2::X),
        t.fetch(c - IVec2::Y),
        t.fetch(c + IVec2::Y),
    )
}

/// Builds the per-cell function for a blit pass targeting `size` cells.
pub fn kernel<'a>(pass: &PassInvocation, src: &Sources<'a>, size: UVec2) -> FireResult<Kernel<'a>> {
    let p = |param| pass.param(param);
    let cells = (size.x * size.y) as f32;

    let kernel: Kernel<'a> = match pass.program {
        Program::Advection => {
            let (velocity, source) = (src.get(Input::Velocity)?, src.get(Input::Source)?);
            let (dt, dissipation) = (p(Param::Dt), p(Param::Dissipation));
            let texel = Vec2::ONE / velocity.size.as_vec2();
            Box::new(move |cell| {
                let v = velocity.sample_bilinear(cell.uv).xy();
                let coord = cell.uv - dt * v * texel;
                dissipation * source.sample_bilinear(coord)
            })
        }
        Program::Curl => {
            let (velocity, noise) = (src.get(Input::Velocity)?, src.get(Input::Noise)?);
            let blend = p(Param::NoiseBlending);
            Box::new(move |cell| {
                let (l, r, b, t) = neighbours(velocity, cell.coord);
                let curl = 0.5 * (r.y - l.y - t.x + b.x);
                let n = noise.sample_bilinear(cell.uv).x;
                Vec4::new(curl * mix(1.0, 2.0 * n, blend), 0.0, 0.0, 0.0)
            })
        }
        Program::VorticityConfinement => {
            let (velocity, curl) = (src.get(Input::Velocity)?, src.get(Input::Curl)?);
            let (confinement, dt) = (p(Param::Confinement), p(Param::Dt));
            Box::new(move |cell| {
                let (l, r, b, t) = neighbours(curl, cell.coord);
                let c = curl.fetch(cell.coord).x;
                let mut force = 0.5 * Vec2::new(t.x.abs() - b.x.abs(), r.x.abs() - l.x.abs());
                force /= force.length() + 1e-4;
                force *= confinement * c * Vec2::new(1.0, -1.0);
                let v = velocity.fetch(cell.coord);
                (v.xy() + force * dt).extend(0.0).extend(0.0)
            })
        }
        Program::Buoyancy => {
            let (velocity, temperature) = (src.get(Input::Velocity)?, src.get(Input::Temperature)?);
            let (buoyancy, dt) = (p(Param::Buoyancy), p(Param::Dt));
            Box::new(move |cell| {
                let t = temperature.fetch(cell.coord).x;
                velocity.fetch(cell.coord) + Vec4::new(0.0, buoyancy * t * dt, 0.0, 0.0)
            })
        }
        Program::Clear => {
            let source = src.get(Input::Source)?;
            let value = p(Param::Value);
            Box::new(move |cell| value * source.fetch(cell.coord))
        }
        Program::Divergence => {
            let velocity = src.get(Input::Velocity)?;
            Box::new(move |cell| {
                let (l, r, b, t) = neighbours(velocity, cell.coord);
                Vec4::new(0.5 * (r.x - l.x + t.y - b.y), 0.0, 0.0, 0.0)
            })
        }
        Program::PressureIteration => {
            let (pressure, divergence) = (src.get(Input::Pressure)?, src.get(Input::Divergence)?);
            Box::new(move |cell| {
                let (l, r, b, t) = neighbours(pressure, cell.coord);
                let div = divergence.fetch(cell.coord).x;
                Vec4::new((l.x + r.x + b.x + t.x - div) * 0.25, 0.0, 0.0, 0.0)
            })
        }
        Program::GradientSubtract => {
            let (pressure, velocity) = (src.get(Input::Pressure)?, src.get(Input::Velocity)?);
            Box::new(move |cell| {
                let (l, r, b, t) = neighbours(pressure, cell.coord);
                let grad = 0.5 * Vec2::new(r.x - l.x, t.x - b.x);
                let v = velocity.fetch(cell.coord).xy() - grad;
                v.extend(0.0).extend(0.0)
            })
        }
        Program::Combustion => {
            let fuel = src.get(Input::Fuel)?;
            let temperature = src.get(Input::Temperature)?;
            let noise = src.get(Input::Noise)?;
            let burn = p(Param::BurnTemperature);
            let (cooling, blend, dt) = (p(Param::Cooling), p(Param::NoiseBlending), p(Param::Dt));
            Box::new(move |cell| {
                let f = fuel.fetch(cell.coord).x;
                let n = noise.fetch(cell.coord).x;
                let ignite = f * burn * mix(1.0, n, blend);
                let mut t = temperature.fetch(cell.coord).x.max(ignite);
                if burn > 0.0 {
                    t -= dt * cooling * (t / burn).powi(4);
                }
                Vec4::new(t.max(0.0), 0.0, 0.0, 0.0)
            })
        }
        Program::AddNoise => {
            let source = src.get(Input::Source)?;
            let (time, blend) = (p(Param::Time), p(Param::BlendLevel));
            Box::new(move |cell| {
                let fresh = value_noise(noise_coord(cell.coord, time));
                let old = source.fetch(cell.coord).x;
                Vec4::new(mix(old, fresh, blend), 0.0, 0.0, 0.0)
            })
        }
        Program::Splat => {
            let source = src.get(Input::Source)?;
            let point = pass.param_vec2(Param::Point);
            let color: Vec3 = pass.param_vec3(Param::Color);
            let (radius, aspect) = (p(Param::Radius), p(Param::AspectRatio));
            let use_max = p(Param::UseMax) > 0.5;
            Box::new(move |cell| {
                let mut d = cell.uv - point;
                d.x *= aspect;
                let splat = (-d.dot(d) / radius).exp() * color;
                let base = source.fetch(cell.coord);
                let rgb = if use_max {
                    base.truncate().max(splat)
                } else {
                    base.truncate() + splat
                };
                rgb.extend(base.w)
            })
        }
        Program::FuelRow => {
            let source = src.get(Input::Source)?;
            let limit = p(Param::RowHeight) / size.y as f32;
            Box::new(move |cell| {
                let base = source.fetch(cell.coord);
                if cell.uv.y < limit {
                    Vec4::new(base.x.max(1.0), base.y, base.z, base.w)
                } else {
                    base
                }
            })
        }
        Program::ParticleAdvection => {
            let (state, velocity) = (src.get(Input::ParticleState)?, src.get(Input::Velocity)?);
            let (dt, dissipation) = (p(Param::Dt), p(Param::Dissipation));
            let texel = Vec2::ONE / velocity.size.as_vec2();
            Box::new(move |cell| {
                let s = state.fetch(cell.coord);
                let (pos, vel) = (s.xy(), s.zw());
                let u = velocity.sample_bilinear(pos).xy();
                let vel = vel * dissipation + u * (1.0 - dissipation);
                let pos = pos + vel * dt * texel;
                Vec4::new(pos.x, pos.y, vel.x, vel.y)
            })
        }
        Program::ParticleStepLifespan => {
            let lifespan = src.get(Input::Lifespan)?;
            let dt = p(Param::Dt);
            Box::new(move |cell| Vec4::new(lifespan.fetch(cell.coord).x - dt, 0.0, 0.0, 0.0))
        }
        Program::ParticleResetState => {
            let (state, lifespan) = (src.get(Input::ParticleState)?, src.get(Input::Lifespan)?);
            let position = pass.param_vec2(Param::InitialPosition);
            let velocity = pass.param_vec2(Param::InitialVelocity);
            let reset = Vec4::new(position.x, position.y, velocity.x, velocity.y);
            Box::new(move |cell| {
                let dead = lifespan.fetch(cell.coord).x <= 0.0;
                if dead { reset } else { state.fetch(cell.coord) }
            })
        }
        Program::ParticleResetLifespan => {
            let lifespan = src.get(Input::Lifespan)?;
            let (initial, stagger) = (p(Param::InitialLifespan), p(Param::Stagger));
            let width = size.x as i32;
            Box::new(move |cell| {
                let l = lifespan.fetch(cell.coord).x;
                if l > 0.0 {
                    return Vec4::new(l, 0.0, 0.0, 0.0);
                }
                let index = (cell.coord.y * width + cell.coord.x) as f32;
                let staggered = initial * (index + 1.0) / cells;
                Vec4::new(mix(initial, staggered, stagger), 0.0, 0.0, 0.0)
            })
        }
        Program::DisplayFire => {
            let density = src.get(Input::Density)?;
            let temperature = src.get(Input::Temperature)?;
            let fuel = src.get(Input::Fuel)?;
            let burn = p(Param::BurnTemperature).max(1e-4);
            Box::new(move |cell| {
                let t = (temperature.sample_bilinear(cell.uv).x / burn).clamp(0.0, 1.0);
                let f = fuel.sample_bilinear(cell.uv).x.clamp(0.0, 1.0);
                let flame = Vec3::new(1.5 * t, 1.2 * t * t, t.powi(4));
                let ember = Vec3::new(0.1, 0.02, 0.0) * f;
                let rgb = density.sample_bilinear(cell.uv).truncate() + flame + ember;
                rgb.clamp(Vec3::ZERO, Vec3::ONE).extend(1.0)
            })
        }
        Program::DisplayDensity => {
            let density = src.get(Input::Source)?;
            Box::new(move |cell| {
                let rgb = density.sample_bilinear(cell.uv).truncate();
                rgb.clamp(Vec3::ZERO, Vec3::ONE).extend(1.0)
            })
        }
        Program::DebugFire => {
            let (fuel, temperature) = (src.get(Input::Fuel)?, src.get(Input::Temperature)?);
            let (ts, fs) = (p(Param::TemperatureScalar), p(Param::FuelScalar));
            Box::new(move |cell| {
                let t = temperature.sample_bilinear(cell.uv).x * ts;
                let f = fuel.sample_bilinear(cell.uv).x * fs;
                Vec4::new(t.clamp(0.0, 1.0), f.clamp(0.0, 1.0), 0.0, 1.0)
            })
        }
        Program::DebugFloat => {
            let source = src.get(Input::Source)?;
            let scalar = p(Param::Scalar);
            Box::new(move |cell| {
                let v = (source.sample_bilinear(cell.uv).x.abs() * scalar).clamp(0.0, 1.0);
                Vec4::new(v, v, v, 1.0)
            })
        }
        Program::ParticleRender => return Err(FireError::WrongPassKind(pass.program)),
    };
    Ok(kernel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_noise_stays_in_unit_range() {
        for y in 0..32 {
            for x in 0..32 {
                let n = value_noise(noise_coord(IVec2::new(x, y), 0.37));
                assert!((0.0..=1.0).contains(&n), "{n}");
            }
        }
    }
}
