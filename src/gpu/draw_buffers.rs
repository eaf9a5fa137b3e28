use std::collections::HashMap;
use std::sync::Arc;

use bevy::prelude::*;
use bevy::render::render_asset::RenderAssets;
use bevy::render::render_resource::*;
use bevy::render::renderer::RenderDevice;
use bevy::render::texture::{FallbackImage, GpuImage};

use crate::gpu::buffers::{ExtractedFireFrames, FireBindGroupLayout, FireFrames, PendingFrame};
use crate::gpu::draw_pipeline::FirePipelines;
use crate::gpu::recorder::GpuCommand;
use crate::gpu::replay::ReplayProgress;
use crate::program::{MAX_INPUTS, RenderTarget};

// ---------------- Types ----------------

/// Instance uv buffers on the GPU, keyed by recorder index buffer id.
#[derive(Resource, Default)]
pub struct ParticleIndexBuffers(HashMap<u32, Buffer>);

pub struct PreparedPass {
    pub label: &'static str,
    pub pipeline: CachedRenderPipelineId,
    pub bind_group: BindGroup,
    pub target: TextureView,
    /// Instance buffer and particle count for particle draws.
    pub instances: Option<(Buffer, u32)>,
}

/// Passes of every executable pending frame, in issue order, and the id of
/// the newest frame they cover.
#[derive(Resource, Default)]
pub struct PreparedFireFrame {
    pub passes: Vec<PreparedPass>,
    pub through: Option<u64>,
}

// ---------------- Systems (Render world) ----------------

fn sync_index_buffers(rd: &RenderDevice, frames: &FireFrames, executed: u64, buffers: &mut ParticleIndexBuffers) {
    let mut live: HashMap<u32, &Arc<[[f32; 2]]>> = HashMap::new();
    for (_, frame) in frames.backlog.pending(executed) {
        for (id, uvs) in &frame.index_buffers {
            live.insert(*id, uvs);
        }
    }
    buffers.0.retain(|id, _| live.contains_key(id));
    for (id, uvs) in live {
        buffers.0.entry(id).or_insert_with(|| {
            rd.create_buffer_with_data(&BufferInitDescriptor {
                label: Some("fire_particle_uv_vb"),
                contents: bytemuck::cast_slice(&uvs[..]),
                usage: BufferUsages::VERTEX,
            })
        });
    }
}

struct PassResources<'a> {
    rd: &'a RenderDevice,
    cache: &'a PipelineCache,
    layout: &'a BindGroupLayout,
    gpu_images: &'a RenderAssets<GpuImage>,
    fallback: &'a FallbackImage,
    index_buffers: &'a ParticleIndexBuffers,
}

/// Uniforms, bind group and target for one command, or `None` while a
/// texture, uv buffer or pipeline it needs is not on the GPU yet.
fn prepare_pass(
    res: &PassResources,
    pipelines: &mut FirePipelines,
    frame: &PendingFrame,
    display: &Handle<Image>,
    command: &GpuCommand,
) -> Option<PreparedPass> {
    let pass = command.pass();
    let image = match pass.target {
        RenderTarget::Field(handle) => frame.images.get(&handle),
        RenderTarget::Surface => Some(display),
    };
    let Some(target) = image.and_then(|handle| res.gpu_images.get(handle)) else {
        debug!("fire frame waits: {:?} target not uploaded", pass.program);
        return None;
    };

    let pipeline = match pipelines.get(pass.program, target.texture_format) {
        Some(id) => id,
        None => {
            let id = pipelines.get_or_queue(res.cache, res.layout, pass.program, target.texture_format);
            let ready = matches!(res.cache.get_render_pipeline_state(id), CachedPipelineState::Ok(_));
            if !ready {
                debug!("fire frame waits: {:?} pipeline compiling", pass.program);
                return None;
            }
            id
        }
    };

    let mut views = Vec::with_capacity(MAX_INPUTS);
    for input in pass.inputs {
        let view = match input {
            Some(handle) => {
                let Some(gpu) = frame.images.get(&handle).and_then(|h| res.gpu_images.get(h)) else {
                    debug!("fire frame waits: {:?} input not uploaded", pass.program);
                    return None;
                };
                gpu.texture_view.clone()
            }
            None => res.fallback.d2.texture_view.clone(),
        };
        views.push(view);
    }

    let instances = match command {
        GpuCommand::Pass(_) => None,
        GpuCommand::Particles(draw) => {
            let Some(buffer) = res.index_buffers.0.get(&draw.indices.0) else {
                debug!("fire frame waits: particle uvs not uploaded");
                return None;
            };
            Some((buffer.clone(), draw.count))
        }
    };

    let mut uniforms = pass.uniforms;
    uniforms.target_size = [target.texture.width() as f32, target.texture.height() as f32];
    let ubo = res.rd.create_buffer_with_data(&BufferInitDescriptor {
        label: Some("fire_pass_uniforms"),
        contents: bytemuck::bytes_of(&uniforms),
        usage: BufferUsages::UNIFORM,
    });

    let mut entries = vec![BindGroupEntry {
        binding: 0,
        resource: ubo.as_entire_binding(),
    }];
    for (slot, view) in views.iter().enumerate() {
        entries.push(BindGroupEntry {
            binding: slot as u32 + 1,
            resource: BindingResource::TextureView(view),
        });
    }
    let bind_group = res.rd.create_bind_group(Some("fire_pass_bg"), res.layout, &entries);

    Some(PreparedPass {
        label: pass.program.descriptor().label,
        pipeline,
        bind_group,
        target: target.texture_view.clone(),
        instances,
    })
}

// Prepares pending frames oldest first. A frame that cannot run yet stops
// the walk; it and everything after it stay queued for a later render frame.
pub fn prepare_fire_passes(
    mut commands: Commands,
    rd: Res<RenderDevice>,
    cache: Res<PipelineCache>,
    layout: Option<Res<FireBindGroupLayout>>,
    frames: Option<Res<ExtractedFireFrames>>,
    pipelines: Option<ResMut<FirePipelines>>,
    progress: Res<ReplayProgress>,
    gpu_images: Res<RenderAssets<GpuImage>>,
    fallback: Res<FallbackImage>,
    mut index_buffers: ResMut<ParticleIndexBuffers>,
) {
    commands.insert_resource(PreparedFireFrame::default());
    let (Some(layout), Some(frames), Some(mut pipelines)) = (layout, frames, pipelines) else {
        return;
    };
    let executed = progress.executed();
    let frames = &frames.0;
    sync_index_buffers(&rd, frames, executed, &mut index_buffers);

    let res = PassResources {
        rd: &rd,
        cache: &cache,
        layout: &layout.0,
        gpu_images: &gpu_images,
        fallback: &fallback,
        index_buffers: &index_buffers,
    };
    let mut prepared = PreparedFireFrame::default();
    'frames: for (id, frame) in frames.backlog.pending(executed) {
        let mut passes = Vec::with_capacity(frame.commands.len());
        for command in &frame.commands {
            match prepare_pass(&res, &mut pipelines, frame, &frames.display, command) {
                Some(pass) => passes.push(pass),
                None => break 'frames,
            }
        }
        prepared.passes.extend(passes);
        prepared.through = Some(id);
    }

    commands.insert_resource(prepared);
}
