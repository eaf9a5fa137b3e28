use std::collections::HashMap;
use std::sync::Arc;

use bevy::asset::RenderAssetUsages;
use bevy::image::TextureFormatPixelInfo;
use bevy::prelude::*;
use bevy::render::render_resource::{
    BindGroupLayout, BindGroupLayoutEntry, BindingType, Buffer, BufferBindingType, BufferInitDescriptor,
    BufferUsages, Extent3d, ShaderStages, TextureDimension, TextureFormat, TextureSampleType, TextureUsages,
    TextureViewDimension,
};
use bevy::render::renderer::{RenderAdapter, RenderDevice};
use bevy::render::{Extract, ExtractSchedule, Render, RenderApp, RenderSet};
use bevy::window::PrimaryWindow;

use crate::config::FireConfig;
use crate::field::{FieldDesc, FieldHandle};
use crate::gpu::draw_buffers::{ParticleIndexBuffers, prepare_fire_passes};
use crate::gpu::draw_pass::add_fire_node_to_graph;
use crate::gpu::draw_pipeline::{FirePipelines, check_fire_pipelines, queue_fire_pipelines};
use crate::gpu::ffi::QUAD_VERTS;
use crate::gpu::input::{cycle_display_mode, mouse_input, touch_input};
use crate::gpu::recorder::{FieldEvent, FormatSupport, GpuCommand, GpuRecorder, texture_format};
use crate::gpu::replay::{FrameBacklog, ReplayProgress};
use crate::interaction::Pointers;
use crate::particles::FireSourceDesc;
use crate::pipeline::SimulationContext;
use crate::program::MAX_INPUTS;

pub const DISPLAY_FORMAT: TextureFormat = TextureFormat::Rgba8UnormSrgb;

// ==================== resources ======================================

#[derive(Resource)]
pub struct FireSimulation(pub SimulationContext<GpuRecorder>);

/// Fire sources created together with the simulation.
#[derive(Resource, Clone, Default)]
pub struct InitialFireSources(pub Vec<FireSourceDesc>);

/// Image assets backing every live field, plus the display surface.
#[derive(Resource, Default)]
pub struct FireTextures {
    pub fields: HashMap<FieldHandle, Handle<Image>>,
    pub display: Handle<Image>,
}

#[derive(Component)]
pub struct FireDisplay;

/// One recorded frame with the images and particle uvs its commands name.
/// Holding the handles keeps retired fields alive until the frame has run.
#[derive(Clone, Default)]
pub struct PendingFrame {
    pub commands: Vec<GpuCommand>,
    pub images: HashMap<FieldHandle, Handle<Image>>,
    pub index_buffers: HashMap<u32, Arc<[[f32; 2]]>>,
}

/// Recorded work not yet executed by the render world, plus what it needs
/// to build pipelines up front.
#[derive(Resource, Clone, Default)]
pub struct FireFrames {
    pub backlog: FrameBacklog<PendingFrame>,
    pub display: Handle<Image>,
    /// Formats of every live field; the display format is implied.
    pub formats: Vec<TextureFormat>,
}

// Rendering world copy
#[derive(Resource, Clone, Default)]
pub struct ExtractedFireFrames(pub FireFrames);

/* uniform block at binding 0, input fields at 1..=4. Fields are read with
textureLoad, so no samplers and no filterable requirement */
#[derive(Resource, Clone)]
pub struct FireBindGroupLayout(pub BindGroupLayout);

#[derive(Resource, Clone)]
pub struct QuadVertexBuffer {
    pub buffer: Buffer,
}

#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum FireSet {
    Input,
    Simulate,
    Sync,
}

// =====================================================================

// ========================== systems ==================================

fn image_with(size: Extent3d, format: TextureFormat) -> Image {
    let mut image = Image::new_fill(
        size,
        TextureDimension::D2,
        &vec![0u8; format.pixel_size()],
        format,
        RenderAssetUsages::default(),
    );
    image.texture_descriptor.usage =
        TextureUsages::TEXTURE_BINDING | TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_DST;
    image
}

fn extent(width: u32, height: u32) -> Extent3d {
    Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

pub fn field_image(desc: &FieldDesc) -> Image {
    image_with(extent(desc.width, desc.height), texture_format(desc.channels, desc.sample))
}

pub fn display_image(surface: glam::UVec2) -> Image {
    image_with(extent(surface.x, surface.y), DISPLAY_FORMAT)
}

fn physical_size(window: &Window) -> glam::UVec2 {
    glam::UVec2::new(window.physical_width(), window.physical_height())
}

// Startup systems that have to run only once

fn setup_fire(
    mut commands: Commands,
    config: Res<FireConfig>,
    adapter: Res<RenderAdapter>,
    sources: Res<InitialFireSources>,
    windows: Query<&Window, With<PrimaryWindow>>,
    mut images: ResMut<Assets<Image>>,
) -> Result {
    let window = windows.single()?;
    let surface = physical_size(window).max(glam::UVec2::ONE);

    let support = FormatSupport::probe(&adapter);
    let mut sim = SimulationContext::new(GpuRecorder::new(support, surface), &config, surface)?;
    for desc in &sources.0 {
        sim.add_fire_source(*desc)?;
    }

    let display = images.add(display_image(surface));
    commands.spawn((
        Sprite {
            image: display.clone(),
            custom_size: Some(Vec2::new(window.width(), window.height())),
            ..default()
        },
        FireDisplay,
    ));
    commands.insert_resource(FireTextures {
        fields: HashMap::new(),
        display,
    });
    commands.insert_resource(FireSimulation(sim));
    info!("fire simulation ready at {}x{}", surface.x, surface.y);
    Ok(())
}

fn init_fire_bind_group_layout(mut commands: Commands, render_device: Res<RenderDevice>) {
    let mut entries = vec![BindGroupLayoutEntry {
        binding: 0,
        visibility: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }];
    for slot in 0..MAX_INPUTS as u32 {
        entries.push(BindGroupLayoutEntry {
            binding: slot + 1,
            visibility: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: false },
                view_dimension: TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
    }
    let layout = render_device.create_bind_group_layout(Some("fire_bind_group_layout"), &entries);
    commands.insert_resource(FireBindGroupLayout(layout));
}

// full-screen quad, also the corners of every particle sprite
fn init_quad_vertex_buffer(mut commands: Commands, render_device: Res<RenderDevice>) {
    let buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
        label: Some("fire_quad_vb"),
        contents: bytemuck::cast_slice(QUAD_VERTS),
        usage: BufferUsages::VERTEX,
    });
    commands.insert_resource(QuadVertexBuffer { buffer });
}

// Update systems that have to run per frame

/// Keeps the display sprite on the window and defers field reallocation to
/// the next frame boundary.
fn track_window_size(
    windows: Query<&Window, With<PrimaryWindow>>,
    sim: Option<ResMut<FireSimulation>>,
    mut sprites: Query<&mut Sprite, With<FireDisplay>>,
) {
    let (Some(mut sim), Ok(window)) = (sim, windows.single()) else {
        return;
    };
    let size = physical_size(window);
    let current = sim.0.pending_resize().unwrap_or(sim.0.surface());
    if size != current {
        sim.0.request_resize(size);
    }
    for mut sprite in &mut sprites {
        sprite.custom_size = Some(Vec2::new(window.width(), window.height()));
    }
}

/// Steps the simulation once the render world can execute what it records.
fn run_fire_frame(
    sim: Option<ResMut<FireSimulation>>,
    progress: Res<ReplayProgress>,
    config: Res<FireConfig>,
    mut pointers: ResMut<Pointers>,
    time: Res<Time>,
) -> Result {
    let Some(mut sim) = sim else {
        return Ok(());
    };
    if !progress.ready() {
        debug!("fire frame held: pipelines compiling");
        return Ok(());
    }
    sim.0.frame(&config, &mut pointers, time.elapsed_secs())?;
    Ok(())
}

/// Turns recorded field lifetimes into image assets and queues the frame
/// until the render world has executed it.
fn sync_fire_images(
    sim: Option<ResMut<FireSimulation>>,
    textures: Option<ResMut<FireTextures>>,
    progress: Res<ReplayProgress>,
    mut images: ResMut<Assets<Image>>,
    mut frames: ResMut<FireFrames>,
) {
    let (Some(mut sim), Some(mut textures)) = (sim, textures) else {
        return;
    };
    frames.backlog.acknowledge(progress.executed());
    let recorded = sim.0.backend_mut().take_frame();

    // fields destroyed this frame are still named by its commands
    let mut retired = HashMap::new();
    for event in recorded.field_events {
        match event {
            FieldEvent::Created(handle, desc) => {
                retired.remove(&handle);
                textures.fields.insert(handle, images.add(field_image(&desc)));
            }
            FieldEvent::Destroyed(handle) => {
                if let Some(image) = textures.fields.remove(&handle) {
                    retired.insert(handle, image);
                }
            }
        }
    }
    if recorded.surface_changed {
        let surface = sim.0.surface();
        if let Some(image) = images.get_mut(&textures.display) {
            image.resize(extent(surface.x, surface.y));
        }
    }

    if !recorded.commands.is_empty() {
        let mut frame_images = textures.fields.clone();
        frame_images.extend(retired);
        let id = frames.backlog.push(PendingFrame {
            commands: recorded.commands,
            images: frame_images,
            index_buffers: sim.0.backend().index_buffers().clone(),
        });
        if frames.backlog.len() > 1 {
            debug!("fire frame {id} queued behind {} others", frames.backlog.len() - 1);
        }
    }
    frames.display = textures.display.clone();
    frames.formats = sim.0.backend().formats();
}

// Extract systems that send from App to Render

fn extract_fire_frames(mut commands: Commands, frames: Extract<Res<FireFrames>>) {
    commands.insert_resource(ExtractedFireFrames(frames.clone()));
}

fn extract_fire_render_resources(
    mut commands: Commands,
    layout: Extract<Option<Res<FireBindGroupLayout>>>,
    quad: Extract<Option<Res<QuadVertexBuffer>>>,
) {
    if let Some(layout) = layout.as_ref() {
        commands.insert_resource(FireBindGroupLayout(layout.0.clone()));
    }
    if let Some(quad) = quad.as_ref() {
        commands.insert_resource(QuadVertexBuffer {
            buffer: quad.buffer.clone(),
        });
    }
}

// =====================================================================

// Plugin

/// Runs the fire simulation on the GPU and shows it through a sprite that
/// fills the primary window.
#[derive(Default)]
pub struct FirePlugin {
    pub sources: Vec<FireSourceDesc>,
}

impl Plugin for FirePlugin {
    fn build(&self, app: &mut App) {
        let progress = ReplayProgress::default();

        // App
        app.init_resource::<FireConfig>()
            .init_resource::<Pointers>()
            .init_resource::<FireFrames>()
            .insert_resource(progress.clone())
            .insert_resource(InitialFireSources(self.sources.clone()))
            .configure_sets(Update, (FireSet::Input, FireSet::Simulate, FireSet::Sync).chain())
            .add_systems(
                Startup,
                (setup_fire, init_fire_bind_group_layout, init_quad_vertex_buffer),
            )
            .add_systems(
                Update,
                (mouse_input, touch_input, cycle_display_mode).in_set(FireSet::Input),
            )
            .add_systems(
                Update,
                (track_window_size, run_fire_frame).chain().in_set(FireSet::Simulate),
            )
            .add_systems(Update, sync_fire_images.in_set(FireSet::Sync));

        // Render
        let render_app = app.sub_app_mut(RenderApp);
        render_app
            .init_resource::<ParticleIndexBuffers>()
            .insert_resource(progress)
            .add_systems(
                ExtractSchedule,
                (extract_fire_frames, extract_fire_render_resources),
            )
            .add_systems(
                Render,
                (
                    (queue_fire_pipelines, check_fire_pipelines).chain().in_set(RenderSet::Prepare),
                    prepare_fire_passes.in_set(RenderSet::PrepareBindGroups),
                ),
            );

        add_fire_node_to_graph(render_app);
    }

    fn finish(&self, app: &mut App) {
        // the shader handle needs the render world's asset server
        app.sub_app_mut(RenderApp).init_resource::<FirePipelines>();
    }
}
