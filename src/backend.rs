use glam::UVec2;

use crate::error::FireResult;
use crate::field::{Channels, FieldDesc, FieldHandle, SampleType};
use crate::program::{IndexBufferHandle, ParticleDraw, PassInvocation};

/// Storage and execution for fields. The simulation is written against this
/// trait only; [`crate::cpu::CpuBackend`] evaluates passes directly while
/// [`crate::gpu::GpuRecorder`] records them for the render graph.
pub trait FieldBackend {
    /// Whether a field with this layout can be rendered to.
    fn supports(&self, channels: Channels, sample: SampleType) -> bool;

    fn supports_linear_filtering(&self, sample: SampleType) -> bool;

    /// Zero-cleared storage keyed by `handle`.
    fn create_field(&mut self, handle: FieldHandle, desc: &FieldDesc) -> FireResult<()>;

    fn destroy_field(&mut self, handle: FieldHandle);

    fn field_size(&self, handle: FieldHandle) -> Option<UVec2>;

    fn surface_size(&self) -> UVec2;

    fn set_surface_size(&mut self, size: UVec2);

    /// Evaluates the program once per cell of the target.
    fn run_pass(&mut self, pass: &PassInvocation) -> FireResult<()>;

    /// Additively blends one sprite per particle into the target.
    fn draw_particles(&mut self, draw: &ParticleDraw) -> FireResult<()>;

    fn create_index_buffer(&mut self, uvs: &[[f32; 2]]) -> FireResult<IndexBufferHandle>;

    fn destroy_index_buffer(&mut self, handle: IndexBufferHandle);
}
