use bevy::prelude::Resource;

/// Which field the display pass shows.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayMode {
    #[default]
    Normal,
    DebugFire,
    DebugTemperature,
    DebugFuel,
    DebugPressure,
    DebugDensity,
    DebugNoise,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 7] = [
        DisplayMode::Normal,
        DisplayMode::DebugFire,
        DisplayMode::DebugTemperature,
        DisplayMode::DebugFuel,
        DisplayMode::DebugPressure,
        DisplayMode::DebugDensity,
        DisplayMode::DebugNoise,
    ];

    /// Advances circularly through [`DisplayMode::ALL`].
    pub fn next(self) -> Self {
        let i = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(i + 1) % Self::ALL.len()]
    }
}

const MIN_SPLAT_FALLOFF: f32 = 1e-6;

/// Runtime tunables. Every pass reads the current values each frame.
#[derive(Resource, Debug, Clone)]
pub struct FireConfig {
    pub buoyancy: f32,
    pub burn_temperature: f32,
    pub confinement: f32,
    pub cooling: f32,
    pub display_mode: DisplayMode,
    pub dye_resolution: u32,
    pub fuel_dissipation: f32,
    pub density_dissipation: f32,
    pub noise_blending: f32,
    pub noise_volatility: f32,
    pub pressure_dissipation: f32,
    pub pressure_iterations: u32,
    pub sim_resolution: u32,
    /// percent of the surface height, divided by 100 before it reaches the splat program
    pub splat_radius: f32,
    pub velocity_dissipation: f32,

    /// seconds advanced per frame
    pub time_step: f32,
    /// bottom texel rows that get max-combined with fuel each frame, 0 disables
    pub fuel_row_height: f32,
    /// red channel of the fuel each particle deposits per frame
    pub particle_fuel: f32,
    /// sprite edge length in pixels
    pub particle_size: f32,
    pub mouse_delta_scale: f32,
    pub touch_delta_scale: f32,
    /// scales temperature into display range in the debug views
    pub temperature_debug_scalar: f32,
}

impl Default for FireConfig {
    fn default() -> Self {
        Self {
            buoyancy: 0.2,
            burn_temperature: 1700.0,
            confinement: 15.0,
            cooling: 3000.0,
            display_mode: DisplayMode::Normal,
            dye_resolution: 512,
            fuel_dissipation: 0.92,
            density_dissipation: 0.99,
            noise_blending: 0.5,
            noise_volatility: 0.1,
            pressure_dissipation: 0.8,
            pressure_iterations: 20,
            sim_resolution: 256,
            splat_radius: 0.7,
            velocity_dissipation: 0.98,

            time_step: 0.016,
            fuel_row_height: 10.0,
            particle_fuel: 1.0,
            particle_size: 1.0,
            mouse_delta_scale: 5.0,
            touch_delta_scale: 8.0,
            temperature_debug_scalar: 0.001,
        }
    }
}

impl FireConfig {
    /// Config where nothing creates, destroys or moves mass: unit dissipation,
    /// no forces, no cooling and no continuous fuel.
    pub fn conservative() -> Self {
        Self {
            buoyancy: 0.0,
            confinement: 0.0,
            cooling: 0.0,
            fuel_dissipation: 1.0,
            density_dissipation: 1.0,
            velocity_dissipation: 1.0,
            pressure_dissipation: 1.0,
            fuel_row_height: 0.0,
            ..Self::default()
        }
    }

    /// Jacobi iteration count, never below one.
    pub fn jacobi_iterations(&self) -> u32 {
        self.pressure_iterations.max(1)
    }

    /// Gaussian falloff fed to the splat program. A zero radius would divide
    /// zero by zero at the splat centre, so it never drops below a tiny floor.
    pub fn splat_falloff(&self) -> f32 {
        (self.splat_radius / 100.0).max(MIN_SPLAT_FALLOFF)
    }

    pub fn cycle_display_mode(&mut self) {
        self.display_mode = self.display_mode.next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mode_cycles_back_to_normal() {
        let mut mode = DisplayMode::Normal;
        for _ in 0..DisplayMode::ALL.len() {
            mode = mode.next();
        }
        assert_eq!(mode, DisplayMode::Normal);
        assert_eq!(DisplayMode::DebugNoise.next(), DisplayMode::Normal);
    }

    #[test]
    fn splat_falloff_has_a_floor() {
        let mut config = FireConfig::default();
        assert!((config.splat_falloff() - 0.007).abs() < 1e-7);
        config.splat_radius = 0.0;
        assert!(config.splat_falloff() > 0.0);
        config.splat_radius = -3.0;
        assert!(config.splat_falloff() > 0.0);
    }

    #[test]
    fn iterations_have_a_floor() {
        let config = FireConfig {
            pressure_iterations: 0,
            ..FireConfig::default()
        };
        assert_eq!(config.jacobi_iterations(), 1);
    }
}
