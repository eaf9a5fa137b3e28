use bevy::prelude::*;
use bevy::render::graph::CameraDriverLabel;
use bevy::render::render_graph::{Node, NodeRunError, RenderGraph, RenderGraphContext, RenderLabel};
use bevy::render::render_resource::{
    LoadOp, Operations, PipelineCache, RenderPassColorAttachment, RenderPassDescriptor, StoreOp,
};
use bevy::render::renderer::RenderContext;

use crate::gpu::buffers::QuadVertexBuffer;
use crate::gpu::draw_buffers::PreparedFireFrame;
use crate::gpu::replay::ReplayProgress;

#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub struct FirePassLabel;

/// Replays the prepared passes in issue order, before any camera draws, and
/// acknowledges the frames they came from.
#[derive(Default)]
pub struct FireNode;

impl Node for FireNode {
    fn run(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext,
        world: &World,
    ) -> Result<(), NodeRunError> {
        let Some(frame) = world.get_resource::<PreparedFireFrame>() else {
            return Ok(());
        };
        let Some(quad) = world.get_resource::<QuadVertexBuffer>() else {
            return Ok(());
        };
        let Some(through) = frame.through else {
            return Ok(());
        };

        // all or nothing; unacknowledged frames are prepared again next time
        let cache = world.resource::<PipelineCache>();
        let mut pipelines = Vec::with_capacity(frame.passes.len());
        for pass in &frame.passes {
            let Some(pipeline) = cache.get_render_pipeline(pass.pipeline) else {
                return Ok(());
            };
            pipelines.push(pipeline);
        }

        for (pass, pipeline) in frame.passes.iter().zip(pipelines) {
            let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
                label: Some(pass.label),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &pass.target,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Load,
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_render_pipeline(pipeline);
            render_pass.set_bind_group(0, &pass.bind_group, &[]);
            render_pass.set_vertex_buffer(0, quad.buffer.slice(..));
            match &pass.instances {
                Some((uvs, count)) => {
                    render_pass.set_vertex_buffer(1, uvs.slice(..));
                    render_pass.draw(0..6, 0..*count);
                }
                None => render_pass.draw(0..6, 0..1),
            }
        }
        world.resource::<ReplayProgress>().mark_executed(through);
        Ok(())
    }
}

pub fn add_fire_node_to_graph(render_app: &mut bevy::app::SubApp) {
    let mut graph = render_app.world_mut().resource_mut::<RenderGraph>();
    graph.add_node(FirePassLabel, FireNode);
    graph.add_node_edge(FirePassLabel, CameraDriverLabel);
}
