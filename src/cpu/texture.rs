// CPU stand-in for a 2D field texture
use glam::{IVec2, UVec2, Vec2, Vec4};

use crate::field::{Channels, FieldDesc, FilterMode};

/// Texels are stored row-major with row 0 at `v = 0`. Channels the layout
/// does not carry stay zero.
#[derive(Clone, Debug)]
pub struct CpuTexture {
    pub size: UVec2,
    pub channels: Channels,
    pub filter: FilterMode,
    pub texels: Vec<Vec4>,
}

impl CpuTexture {
    pub fn new(desc: &FieldDesc) -> Self {
        Self {
            size: desc.size(),
            channels: desc.channels,
            filter: desc.filter,
            texels: vec![Vec4::ZERO; (desc.width * desc.height) as usize],
        }
    }

    /// Surface-shaped texture: four channels, nearest.
    pub fn surface(size: UVec2) -> Self {
        Self {
            size,
            channels: Channels::Rgba,
            filter: FilterMode::Nearest,
            texels: vec![Vec4::ZERO; (size.x * size.y) as usize],
        }
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        (y * self.size.x + x) as usize
    }

    /// Clamp-to-edge texel fetch.
    #[inline]
    pub fn fetch(&self, cell: IVec2) -> Vec4 {
        let max = self.size.as_ivec2() - IVec2::ONE;
        let c = cell.clamp(IVec2::ZERO, max);
        self.texels[self.index(c.x as u32, c.y as u32)]
    }

    pub fn sample_nearest(&self, uv: Vec2) -> Vec4 {
        let cell = (uv * self.size.as_vec2()).floor().as_ivec2();
        self.fetch(cell)
    }

    /// Manual blend of the four nearest texels, whatever `filter` says. The
    /// shaders read every field with `textureLoad`, so this matches them.
    pub fn sample_bilinear(&self, uv: Vec2) -> Vec4 {
        let st = uv * self.size.as_vec2() - 0.5;
        let base = st.floor();
        let f = st - base;
        let c = base.as_ivec2();

        let a = self.fetch(c);
        let b = self.fetch(c + IVec2::X);
        let d = self.fetch(c + IVec2::Y);
        let e = self.fetch(c + IVec2::ONE);
        a.lerp(b, f.x).lerp(d.lerp(e, f.x), f.y)
    }

    pub fn fill(&mut self, value: Vec4) {
        self.texels.fill(mask(self.channels, value));
    }

    /// Sum of every texel; used for conservation checks.
    pub fn total(&self) -> Vec4 {
        self.texels.iter().copied().sum()
    }
}

/// Drops whatever the channel layout cannot hold.
#[inline]
pub fn mask(channels: Channels, value: Vec4) -> Vec4 {
    match channels {
        Channels::R => Vec4::new(value.x, 0.0, 0.0, 0.0),
        Channels::Rg => Vec4::new(value.x, value.y, 0.0, 0.0),
        Channels::Rgba => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::SampleType;

    fn desc(w: u32, h: u32, filter: FilterMode) -> FieldDesc {
        FieldDesc {
            width: w,
            height: h,
            channels: Channels::Rgba,
            sample: SampleType::F32,
            filter,
        }
    }

    #[test]
    fn bilinear_hits_texel_centres_exactly() {
        let mut t = CpuTexture::new(&desc(2, 1, FilterMode::Linear));
        t.texels[0] = Vec4::splat(1.0);
        t.texels[1] = Vec4::splat(3.0);
        assert_eq!(t.sample_bilinear(Vec2::new(0.25, 0.5)), Vec4::splat(1.0));
        assert_eq!(t.sample_bilinear(Vec2::new(0.75, 0.5)), Vec4::splat(3.0));
        assert_eq!(t.sample_bilinear(Vec2::new(0.5, 0.5)), Vec4::splat(2.0));
    }

    #[test]
    fn bilinear_ignores_the_filter_mode() {
        let mut linear = CpuTexture::new(&desc(2, 2, FilterMode::Linear));
        let mut nearest = CpuTexture::new(&desc(2, 2, FilterMode::Nearest));
        for (i, v) in [0.0, 1.0, 2.0, 4.0].into_iter().enumerate() {
            linear.texels[i] = Vec4::splat(v);
            nearest.texels[i] = Vec4::splat(v);
        }
        let uv = Vec2::new(0.5, 0.5);
        assert_eq!(nearest.sample_bilinear(uv), linear.sample_bilinear(uv));
        assert_eq!(nearest.sample_bilinear(uv), Vec4::splat(1.75));
    }

    #[test]
    fn fetch_clamps_to_edge() {
        let mut t = CpuTexture::new(&desc(2, 2, FilterMode::Nearest));
        t.texels[3] = Vec4::ONE;
        assert_eq!(t.fetch(IVec2::new(5, 9)), Vec4::ONE);
        assert_eq!(t.fetch(IVec2::new(-1, -1)), Vec4::ZERO);
    }
}
