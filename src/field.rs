//! Field Store: single and double buffered 2D fields, their texture units,
//! and the resolutions they are allocated at.

use bevy::log::{info, warn};
use glam::{UVec2, Vec2};

use crate::backend::FieldBackend;
use crate::config::FireConfig;
use crate::error::{FireError, FireResult};
use crate::program::RenderTarget;

/// Upper bound on simultaneously bound fields.
pub const MAX_TEXTURE_UNITS: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    pub fn texel(&self) -> Vec2 {
        Vec2::new(1.0 / self.width as f32, 1.0 / self.height as f32)
    }
}

/// Scales `base` along the longer surface axis by the aspect ratio; the
/// shorter axis gets `base` itself.
pub fn get_resolution(base: u32, surface: UVec2) -> Resolution {
    let (w, h) = (surface.x.max(1) as f32, surface.y.max(1) as f32);
    let mut aspect = w / h;
    if aspect < 1.0 {
        aspect = 1.0 / aspect;
    }
    let max = ((base as f32 * aspect).round() as u32).max(1);
    let min = base.max(1);

    if surface.x > surface.y {
        Resolution::new(max, min)
    } else {
        Resolution::new(min, max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channels {
    R,
    Rg,
    Rgba,
}

impl Channels {
    pub fn count(self) -> usize {
        match self {
            Channels::R => 1,
            Channels::Rg => 2,
            Channels::Rgba => 4,
        }
    }

    /// Next layout in the fallback chain.
    pub fn widen(self) -> Option<Channels> {
        match self {
            Channels::R => Some(Channels::Rg),
            Channels::Rg => Some(Channels::Rgba),
            Channels::Rgba => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
    F16,
    F32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldDesc {
    pub width: u32,
    pub height: u32,
    pub channels: Channels,
    pub sample: SampleType,
    pub filter: FilterMode,
}

impl FieldDesc {
    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }
}

/// Texture unit a field is bound to. Doubles as the backend storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub handle: FieldHandle,
    pub desc: FieldDesc,
}

/// Two slots and a parity bit. `swap` flips the parity, never the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoubleBuffer<T> {
    slots: [T; 2],
    parity: bool,
}

impl<T> DoubleBuffer<T> {
    pub fn new(first: T, second: T) -> Self {
        Self {
            slots: [first, second],
            parity: false,
        }
    }

    pub fn read(&self) -> &T {
        &self.slots[self.parity as usize]
    }

    pub fn write(&self) -> &T {
        &self.slots[!self.parity as usize]
    }

    pub fn swap(&mut self) {
        self.parity = !self.parity;
    }

    pub fn slots(&self) -> &[T; 2] {
        &self.slots
    }
}

pub type DoubleField = DoubleBuffer<Field>;

impl Field {
    pub fn target(&self) -> RenderTarget {
        RenderTarget::Field(self.handle)
    }
}

impl DoubleField {
    pub fn desc(&self) -> FieldDesc {
        self.read().desc
    }

    pub fn read_handle(&self) -> FieldHandle {
        self.read().handle
    }

    /// The write instance as a pass target.
    pub fn target(&self) -> RenderTarget {
        self.write().target()
    }
}

/// Hands out texture units and takes them back for reuse.
#[derive(Debug, Clone)]
pub struct TextureUnits {
    max: u32,
    in_use: Vec<bool>,
}

impl TextureUnits {
    pub fn new(max: u32) -> Self {
        Self {
            max,
            in_use: Vec::new(),
        }
    }

    /// Lowest free unit.
    pub fn acquire(&mut self) -> FireResult<FieldHandle> {
        if let Some(i) = self.in_use.iter().position(|used| !used) {
            self.in_use[i] = true;
            return Ok(FieldHandle(i as u32));
        }
        if (self.in_use.len() as u32) < self.max {
            self.in_use.push(true);
            return Ok(FieldHandle(self.in_use.len() as u32 - 1));
        }
        Err(FireError::TextureUnitsExhausted { max: self.max })
    }

    pub fn release(&mut self, handle: FieldHandle) {
        if let Some(slot) = self.in_use.get_mut(handle.0 as usize) {
            *slot = false;
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use.iter().filter(|used| **used).count()
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

/// Channel layouts that survived the fallback probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldFormats {
    pub sample: SampleType,
    pub r: Channels,
    pub rg: Channels,
    pub rgba: Channels,
    pub linear_filtering: bool,
}

impl FieldFormats {
    pub fn probe(backend: &impl FieldBackend, sample: SampleType) -> FireResult<Self> {
        let formats = Self {
            sample,
            r: Self::supported(backend, Channels::R, sample)?,
            rg: Self::supported(backend, Channels::Rg, sample)?,
            rgba: Self::supported(backend, Channels::Rgba, sample)?,
            linear_filtering: backend.supports_linear_filtering(sample),
        };
        info!(
            "field formats: r={:?} rg={:?} rgba={:?} sample={:?} linear={}",
            formats.r, formats.rg, formats.rgba, sample, formats.linear_filtering
        );
        Ok(formats)
    }

    fn supported(
        backend: &impl FieldBackend,
        requested: Channels,
        sample: SampleType,
    ) -> FireResult<Channels> {
        let mut channels = requested;
        loop {
            if backend.supports(channels, sample) {
                if channels != requested {
                    warn!("{requested:?} fields fall back to {channels:?}");
                }
                return Ok(channels);
            }
            channels = channels.widen().ok_or(FireError::UnsupportedFormat {
                channels: requested,
                sample,
            })?;
        }
    }

    /// Linear when the runtime can filter this sample type, else nearest.
    pub fn smooth(&self) -> FilterMode {
        if self.linear_filtering {
            FilterMode::Linear
        } else {
            FilterMode::Nearest
        }
    }

    pub fn desc(&self, size: Resolution, channels: Channels, filter: FilterMode) -> FieldDesc {
        FieldDesc {
            width: size.width,
            height: size.height,
            channels,
            sample: self.sample,
            filter,
        }
    }
}

/// Allocation front-end: binds every new field to a texture unit and asks
/// the backend for zero-cleared storage.
#[derive(Debug, Clone)]
pub struct FieldStore {
    units: TextureUnits,
    pub formats: FieldFormats,
}

impl FieldStore {
    pub fn new(formats: FieldFormats, max_units: u32) -> Self {
        Self {
            units: TextureUnits::new(max_units),
            formats,
        }
    }

    pub fn allocate(&mut self, backend: &mut impl FieldBackend, desc: FieldDesc) -> FireResult<Field> {
        if desc.width == 0 || desc.height == 0 {
            return Err(FireError::InvalidDimensions {
                width: desc.width,
                height: desc.height,
            });
        }
        let handle = self.units.acquire()?;
        if let Err(err) = backend.create_field(handle, &desc) {
            self.units.release(handle);
            return Err(err);
        }
        Ok(Field { handle, desc })
    }

    pub fn allocate_double(
        &mut self,
        backend: &mut impl FieldBackend,
        desc: FieldDesc,
    ) -> FireResult<DoubleField> {
        let first = self.allocate(backend, desc)?;
        let second = match self.allocate(backend, desc) {
            Ok(second) => second,
            Err(err) => {
                self.release(backend, first);
                return Err(err);
            }
        };
        Ok(DoubleBuffer::new(first, second))
    }

    pub fn release(&mut self, backend: &mut impl FieldBackend, field: Field) {
        backend.destroy_field(field.handle);
        self.units.release(field.handle);
    }

    pub fn release_double(&mut self, backend: &mut impl FieldBackend, field: DoubleField) {
        for slot in field.slots() {
            self.release(backend, *slot);
        }
    }

    pub fn units(&self) -> &TextureUnits {
        &self.units
    }
}

/// Every simulation field. Density lives at dye resolution, the rest at
/// sim resolution.
#[derive(Debug, Clone)]
pub struct SimFields {
    pub sim: Resolution,
    pub dye: Resolution,
    pub velocity: DoubleField,
    pub density: DoubleField,
    pub temperature: DoubleField,
    pub fuel: DoubleField,
    pub pressure: DoubleField,
    pub noise: DoubleField,
    pub curl: Field,
    pub divergence: Field,
}

impl SimFields {
    pub fn allocate(
        store: &mut FieldStore,
        backend: &mut impl FieldBackend,
        config: &FireConfig,
        surface: UVec2,
    ) -> FireResult<Self> {
        let sim = get_resolution(config.sim_resolution, surface);
        let dye = get_resolution(config.dye_resolution, surface);
        Self::allocate_at(store, backend, sim, dye)
    }

    /// All or nothing: a failure releases whatever was already allocated.
    pub fn allocate_at(
        store: &mut FieldStore,
        backend: &mut impl FieldBackend,
        sim: Resolution,
        dye: Resolution,
    ) -> FireResult<Self> {
        let mut allocated = Vec::new();
        match Self::allocate_each(store, backend, sim, dye, &mut allocated) {
            Ok(fields) => {
                info!(
                    "allocated fields: sim {}x{}, dye {}x{}",
                    sim.width, sim.height, dye.width, dye.height
                );
                Ok(fields)
            }
            Err(err) => {
                for field in allocated {
                    store.release(backend, field);
                }
                Err(err)
            }
        }
    }

    fn allocate_each(
        store: &mut FieldStore,
        backend: &mut impl FieldBackend,
        sim: Resolution,
        dye: Resolution,
        allocated: &mut Vec<Field>,
    ) -> FireResult<Self> {
        let f = store.formats;
        let smooth = f.smooth();
        let mut single = |desc: FieldDesc| -> FireResult<Field> {
            let field = store.allocate(backend, desc)?;
            allocated.push(field);
            Ok(field)
        };
        let curl = single(f.desc(sim, f.r, FilterMode::Nearest))?;
        let divergence = single(f.desc(sim, f.r, FilterMode::Nearest))?;

        let mut double = |desc: FieldDesc| -> FireResult<DoubleField> {
            let field = store.allocate_double(backend, desc)?;
            allocated.extend(field.slots());
            Ok(field)
        };
        Ok(Self {
            sim,
            dye,
            curl,
            divergence,
            density: double(f.desc(dye, f.rgba, smooth))?,
            fuel: double(f.desc(sim, f.r, smooth))?,
            noise: double(f.desc(sim, f.r, smooth))?,
            pressure: double(f.desc(sim, f.r, FilterMode::Nearest))?,
            temperature: double(f.desc(sim, f.r, smooth))?,
            velocity: double(f.desc(sim, f.rg, smooth))?,
        })
    }

    pub fn release(self, store: &mut FieldStore, backend: &mut impl FieldBackend) {
        store.release(backend, self.curl);
        store.release(backend, self.divergence);
        for field in [
            self.velocity,
            self.density,
            self.temperature,
            self.fuel,
            self.pressure,
            self.noise,
        ] {
            store.release_double(backend, field);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_twice_restores_roles() {
        let mut buffer = DoubleBuffer::new(1, 2);
        let (read, write) = (*buffer.read(), *buffer.write());
        buffer.swap();
        assert_eq!((*buffer.read(), *buffer.write()), (write, read));
        buffer.swap();
        assert_eq!((*buffer.read(), *buffer.write()), (read, write));
    }

    #[test]
    fn units_are_recycled_lowest_first() {
        let mut units = TextureUnits::new(3);
        let a = units.acquire().unwrap();
        let b = units.acquire().unwrap();
        let _c = units.acquire().unwrap();
        assert_eq!(
            units.acquire(),
            Err(FireError::TextureUnitsExhausted { max: 3 })
        );
        units.release(b);
        units.release(a);
        assert_eq!(units.acquire().unwrap(), FieldHandle(0));
        assert_eq!(units.in_use(), 2);
    }

    #[test]
    fn resolution_follows_aspect() {
        assert_eq!(
            get_resolution(256, UVec2::new(1920, 1080)),
            Resolution::new(455, 256)
        );
        assert_eq!(
            get_resolution(256, UVec2::new(1080, 1920)),
            Resolution::new(256, 455)
        );
        assert_eq!(
            get_resolution(128, UVec2::new(500, 500)),
            Resolution::new(128, 128)
        );
    }

    #[test]
    fn channels_widen_to_rgba() {
        assert_eq!(Channels::R.widen(), Some(Channels::Rg));
        assert_eq!(Channels::Rg.widen(), Some(Channels::Rgba));
        assert_eq!(Channels::Rgba.widen(), None);
    }
}
