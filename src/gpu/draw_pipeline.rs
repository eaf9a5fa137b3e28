use std::collections::{HashMap, HashSet};

use bevy::asset::AssetServer;
use bevy::prelude::*;
use bevy::render::render_resource::{
    BindGroupLayout, BlendComponent, BlendFactor, BlendOperation, BlendState, CachedPipelineState,
    CachedRenderPipelineId, ColorTargetState, ColorWrites, FragmentState, MultisampleState, PipelineCache,
    PrimitiveState, RenderPipelineDescriptor, Shader, TextureFormat, VertexAttribute, VertexBufferLayout,
    VertexFormat, VertexState, VertexStepMode,
};

use crate::error::FireError;
use crate::gpu::buffers::{DISPLAY_FORMAT, ExtractedFireFrames, FireBindGroupLayout};
use crate::gpu::ffi::ParticleUv;
use crate::gpu::replay::ReplayProgress;
use crate::program::{Program, ProgramKind};

pub const FIRE_SHADER: &str = "shaders/fire.wgsl";

const ADDITIVE: BlendComponent = BlendComponent {
    src_factor: BlendFactor::One,
    dst_factor: BlendFactor::One,
    operation: BlendOperation::Add,
};

/// One cached pipeline per (program, target format).
#[derive(Resource)]
pub struct FirePipelines {
    shader: Handle<Shader>,
    ids: HashMap<(Program, TextureFormat), CachedRenderPipelineId>,
    ready: HashSet<CachedRenderPipelineId>,
}

impl FromWorld for FirePipelines {
    fn from_world(world: &mut World) -> Self {
        let shader = world.resource::<AssetServer>().load(FIRE_SHADER);
        Self {
            shader,
            ids: HashMap::new(),
            ready: HashSet::new(),
        }
    }
}

fn quad_layout() -> VertexBufferLayout {
    VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 2]>() as u64,
        step_mode: VertexStepMode::Vertex,
        attributes: vec![VertexAttribute {
            format: VertexFormat::Float32x2,
            offset: 0,
            shader_location: 0,
        }],
    }
}

// one particle per instance, addressed by its texel in the state field
fn particle_uv_layout() -> VertexBufferLayout {
    VertexBufferLayout {
        array_stride: std::mem::size_of::<ParticleUv>() as u64,
        step_mode: VertexStepMode::Instance,
        attributes: vec![VertexAttribute {
            format: VertexFormat::Float32x2,
            offset: 0,
            shader_location: 1,
        }],
    }
}

impl FirePipelines {
    /// Queues every program that can draw into a target of this format.
    /// Display programs only ever draw to the surface.
    pub fn queue_all(
        &mut self,
        cache: &PipelineCache,
        layout: &BindGroupLayout,
        format: TextureFormat,
        surface: bool,
    ) {
        for program in Program::ALL {
            let wanted = match program {
                Program::ParticleRender => true,
                p if p.is_display() => surface,
                _ => !surface,
            };
            if wanted {
                self.get_or_queue(cache, layout, program, format);
            }
        }
    }

    /// The pipeline, once it has compiled.
    pub fn get(&self, program: Program, format: TextureFormat) -> Option<CachedRenderPipelineId> {
        self.ids
            .get(&(program, format))
            .copied()
            .filter(|id| self.ready.contains(id))
    }

    pub fn all_ready(&self) -> bool {
        !self.ids.is_empty() && self.ids.values().all(|id| self.ready.contains(id))
    }

    pub fn get_or_queue(
        &mut self,
        cache: &PipelineCache,
        layout: &BindGroupLayout,
        program: Program,
        format: TextureFormat,
    ) -> CachedRenderPipelineId {
        if let Some(id) = self.ids.get(&(program, format)) {
            return *id;
        }

        let descriptor = program.descriptor();
        let (vertex_entry, buffers, blend) = match descriptor.kind {
            ProgramKind::Blit => ("vs_blit", vec![quad_layout()], None),
            ProgramKind::Particles => (
                "vs_particles",
                vec![quad_layout(), particle_uv_layout()],
                Some(BlendState {
                    color: ADDITIVE,
                    alpha: ADDITIVE,
                }),
            ),
        };

        let desc = RenderPipelineDescriptor {
            label: Some(format!("fire_{}_{:?}", descriptor.label, format).into()),
            layout: vec![layout.clone()],
            vertex: VertexState {
                shader: self.shader.clone(),
                entry_point: vertex_entry.into(),
                shader_defs: vec![],
                buffers,
            },
            fragment: Some(FragmentState {
                shader: self.shader.clone(),
                entry_point: descriptor.entry_point.into(),
                shader_defs: vec![],
                targets: vec![Some(ColorTargetState {
                    format,
                    blend,
                    write_mask: ColorWrites::ALL,
                })],
            }),
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            // offscreen targets, never multisampled
            multisample: MultisampleState::default(),
            push_constant_ranges: vec![],
            zero_initialize_workgroup_memory: false,
        };

        let id = cache.queue_render_pipeline(desc);
        self.ids.insert((program, format), id);
        info!("fire pipeline {} QUEUED for {:?}", descriptor.label, format);
        id
    }

    pub fn queued(&self) -> impl Iterator<Item = (Program, CachedRenderPipelineId)> + '_ {
        self.ids.iter().map(|((program, _), id)| (*program, *id))
    }
}

/// Queues every pipeline the live field formats and the display can need,
/// before any recorded pass asks for one.
pub fn queue_fire_pipelines(
    pipelines: Option<ResMut<FirePipelines>>,
    cache: Res<PipelineCache>,
    layout: Option<Res<FireBindGroupLayout>>,
    frames: Option<Res<ExtractedFireFrames>>,
) {
    let (Some(mut pipelines), Some(layout), Some(frames)) = (pipelines, layout, frames) else {
        return;
    };
    for format in &frames.0.formats {
        pipelines.queue_all(&cache, &layout.0, *format, false);
    }
    pipelines.queue_all(&cache, &layout.0, DISPLAY_FORMAT, true);
}

/// Logs pipelines as they come up, turns shader failures into errors and
/// tells the main world once everything queued has compiled.
pub fn check_fire_pipelines(
    pipelines: Option<ResMut<FirePipelines>>,
    cache: Res<PipelineCache>,
    progress: Res<ReplayProgress>,
) -> Result {
    let Some(mut pipelines) = pipelines else {
        return Ok(());
    };
    let queued: Vec<_> = pipelines.queued().collect();
    for (program, id) in queued {
        if pipelines.ready.contains(&id) {
            continue;
        }
        match cache.get_render_pipeline_state(id) {
            CachedPipelineState::Ok(_) => {
                info!("fire pipeline {} READY", program.descriptor().label);
                pipelines.ready.insert(id);
            }
            CachedPipelineState::Err(err) => {
                return Err(FireError::ProgramCompile {
                    label: program.descriptor().label.to_string(),
                    message: err.to_string(),
                }
                .into());
            }
            CachedPipelineState::Queued | CachedPipelineState::Creating(_) => {
                debug!("fire pipeline {} compiling", program.descriptor().label);
            }
        }
    }
    progress.set_ready(pipelines.all_ready());
    Ok(())
}
