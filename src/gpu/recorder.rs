use std::collections::HashMap;
use std::sync::Arc;

use bevy::log::debug;
use bevy::render::render_resource::{TextureFormat, TextureFormatFeatureFlags, TextureUsages};
use bevy::render::renderer::RenderAdapter;
use glam::UVec2;

use crate::backend::FieldBackend;
use crate::error::{FireError, FireResult};
use crate::field::{Channels, FieldDesc, FieldHandle, SampleType};
use crate::program::{IndexBufferHandle, ParticleDraw, PassInvocation, ProgramKind, RenderTarget};

pub fn texture_format(channels: Channels, sample: SampleType) -> TextureFormat {
    match (channels, sample) {
        (Channels::R, SampleType::F16) => TextureFormat::R16Float,
        (Channels::Rg, SampleType::F16) => TextureFormat::Rg16Float,
        (Channels::Rgba, SampleType::F16) => TextureFormat::Rgba16Float,
        (Channels::R, SampleType::F32) => TextureFormat::R32Float,
        (Channels::Rg, SampleType::F32) => TextureFormat::Rg32Float,
        (Channels::Rgba, SampleType::F32) => TextureFormat::Rgba32Float,
    }
}

/// What the adapter can render to and filter, probed once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatSupport {
    renderable: Vec<(Channels, SampleType)>,
    filterable: Vec<SampleType>,
}

impl FormatSupport {
    pub fn probe(adapter: &RenderAdapter) -> Self {
        let mut support = Self::default();
        for sample in [SampleType::F16, SampleType::F32] {
            let mut filterable = true;
            for channels in [Channels::R, Channels::Rg, Channels::Rgba] {
                let features = adapter.get_texture_format_features(texture_format(channels, sample));
                let usages = TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING;
                if features.allowed_usages.contains(usages) {
                    support.renderable.push((channels, sample));
                }
                filterable &= features.flags.contains(TextureFormatFeatureFlags::FILTERABLE);
            }
            if filterable {
                support.filterable.push(sample);
            }
        }
        support
    }

    /// Everything renderable and filterable.
    pub fn all() -> Self {
        let mut support = Self::default();
        for sample in [SampleType::F16, SampleType::F32] {
            for channels in [Channels::R, Channels::Rg, Channels::Rgba] {
                support.renderable.push((channels, sample));
            }
            support.filterable.push(sample);
        }
        support
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldEvent {
    Created(FieldHandle, FieldDesc),
    Destroyed(FieldHandle),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    Pass(PassInvocation),
    Particles(ParticleDraw),
}

impl GpuCommand {
    pub fn pass(&self) -> &PassInvocation {
        match self {
            GpuCommand::Pass(pass) => pass,
            GpuCommand::Particles(draw) => &draw.pass,
        }
    }
}

/// Everything recorded since the last [`GpuRecorder::take_frame`].
#[derive(Debug, Clone, Default)]
pub struct RecordedFrame {
    /// In issue order; a handle can be destroyed and created again.
    pub field_events: Vec<FieldEvent>,
    pub commands: Vec<GpuCommand>,
    pub surface_changed: bool,
}

/// Backend that records instead of executing. The render world replays the
/// recorded commands in order on one queue.
#[derive(Debug, Clone)]
pub struct GpuRecorder {
    support: FormatSupport,
    fields: HashMap<FieldHandle, FieldDesc>,
    index_buffers: HashMap<u32, Arc<[[f32; 2]]>>,
    next_index_buffer: u32,
    surface: UVec2,
    frame: RecordedFrame,
}

impl GpuRecorder {
    pub fn new(support: FormatSupport, surface: UVec2) -> Self {
        Self {
            support,
            fields: HashMap::new(),
            index_buffers: HashMap::new(),
            next_index_buffer: 0,
            surface,
            frame: RecordedFrame::default(),
        }
    }

    pub fn take_frame(&mut self) -> RecordedFrame {
        std::mem::take(&mut self.frame)
    }

    pub fn commands(&self) -> &[GpuCommand] {
        &self.frame.commands
    }

    pub fn field_desc(&self, handle: FieldHandle) -> Option<&FieldDesc> {
        self.fields.get(&handle)
    }

    /// Texture formats of the live fields, each once.
    pub fn formats(&self) -> Vec<TextureFormat> {
        let mut formats = Vec::new();
        for desc in self.fields.values() {
            let format = texture_format(desc.channels, desc.sample);
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        formats
    }

    /// Live index buffers, shared with the render world.
    pub fn index_buffers(&self) -> &HashMap<u32, Arc<[[f32; 2]]>> {
        &self.index_buffers
    }

    fn check(&self, pass: &PassInvocation, kind: ProgramKind) -> FireResult<()> {
        pass.validate()?;
        if pass.program.descriptor().kind != kind {
            return Err(FireError::WrongPassKind(pass.program));
        }
        let targets = match pass.target {
            RenderTarget::Field(handle) => Some(handle),
            RenderTarget::Surface => None,
        };
        for handle in pass.inputs.iter().flatten().chain(targets.iter()) {
            if !self.fields.contains_key(handle) {
                return Err(FireError::UnknownField(*handle));
            }
        }
        Ok(())
    }
}

impl FieldBackend for GpuRecorder {
    fn supports(&self, channels: Channels, sample: SampleType) -> bool {
        self.support.renderable.contains(&(channels, sample))
    }

    fn supports_linear_filtering(&self, sample: SampleType) -> bool {
        self.support.filterable.contains(&sample)
    }

    fn create_field(&mut self, handle: FieldHandle, desc: &FieldDesc) -> FireResult<()> {
        if !self.supports(desc.channels, desc.sample) {
            return Err(FireError::UnsupportedFormat {
                channels: desc.channels,
                sample: desc.sample,
            });
        }
        self.fields.insert(handle, *desc);
        self.frame.field_events.push(FieldEvent::Created(handle, *desc));
        Ok(())
    }

    fn destroy_field(&mut self, handle: FieldHandle) {
        if self.fields.remove(&handle).is_some() {
            self.frame.field_events.push(FieldEvent::Destroyed(handle));
        }
    }

    fn field_size(&self, handle: FieldHandle) -> Option<UVec2> {
        self.fields.get(&handle).map(|d| d.size())
    }

    fn surface_size(&self) -> UVec2 {
        self.surface
    }

    fn set_surface_size(&mut self, size: UVec2) {
        if size != self.surface {
            self.surface = size;
            self.frame.surface_changed = true;
        }
    }

    fn run_pass(&mut self, pass: &PassInvocation) -> FireResult<()> {
        self.check(pass, ProgramKind::Blit)?;
        debug!("record {:?} -> {:?}", pass.program, pass.target);
        self.frame.commands.push(GpuCommand::Pass(pass.clone()));
        Ok(())
    }

    fn draw_particles(&mut self, draw: &ParticleDraw) -> FireResult<()> {
        self.check(&draw.pass, ProgramKind::Particles)?;
        if !self.index_buffers.contains_key(&draw.indices.0) {
            return Err(FireError::UnknownIndexBuffer(draw.indices.0));
        }
        self.frame.commands.push(GpuCommand::Particles(draw.clone()));
        Ok(())
    }

    fn create_index_buffer(&mut self, uvs: &[[f32; 2]]) -> FireResult<IndexBufferHandle> {
        let id = self.next_index_buffer;
        self.next_index_buffer += 1;
        self.index_buffers.insert(id, Arc::from(uvs));
        Ok(IndexBufferHandle(id))
    }

    fn destroy_index_buffer(&mut self, handle: IndexBufferHandle) {
        self.index_buffers.remove(&handle.0);
    }
}
