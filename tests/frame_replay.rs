use std::collections::HashMap;

use bevy_gpu_fire::cpu::CpuBackend;
use bevy_gpu_fire::gpu::recorder::{FieldEvent, FormatSupport, GpuCommand, RecordedFrame};
use bevy_gpu_fire::gpu::replay::{FrameBacklog, ReplayProgress};
use bevy_gpu_fire::gpu::GpuRecorder;
use bevy_gpu_fire::program::{IndexBufferHandle, ParticleDraw};
use bevy_gpu_fire::{FieldBackend, FireConfig, FireSourceDesc, FireSourceId, SimulationContext};
use glam::{UVec2, Vec2, Vec4};

const SURFACE: UVec2 = UVec2::new(16, 16);

fn config() -> FireConfig {
    FireConfig {
        sim_resolution: 16,
        dye_resolution: 16,
        pressure_iterations: 4,
        ..FireConfig::conservative()
    }
}

/// Executes recorded frames on the host, the way the render world would.
struct Replayer {
    cpu: CpuBackend,
    index_buffers: HashMap<u32, IndexBufferHandle>,
}

impl Replayer {
    fn new() -> Self {
        Self {
            cpu: CpuBackend::new(SURFACE),
            index_buffers: HashMap::new(),
        }
    }

    fn run(&mut self, frame: &RecordedFrame, recorder: &GpuRecorder) {
        for event in &frame.field_events {
            match event {
                FieldEvent::Created(handle, desc) => self.cpu.create_field(*handle, desc).unwrap(),
                FieldEvent::Destroyed(handle) => self.cpu.destroy_field(*handle),
            }
        }
        for command in &frame.commands {
            match command {
                GpuCommand::Pass(pass) => self.cpu.run_pass(pass).unwrap(),
                GpuCommand::Particles(draw) => {
                    let id = draw.indices.0;
                    let cpu = &mut self.cpu;
                    let indices = *self.index_buffers.entry(id).or_insert_with(|| {
                        let uvs = &recorder.index_buffers()[&id];
                        cpu.create_index_buffer(uvs).unwrap()
                    });
                    cpu.draw_particles(&ParticleDraw {
                        indices,
                        ..draw.clone()
                    })
                    .unwrap();
                }
            }
        }
    }
}

fn recorded_context(desc: FireSourceDesc) -> (SimulationContext<GpuRecorder>, FireSourceId) {
    let recorder = GpuRecorder::new(FormatSupport::all(), SURFACE);
    let mut ctx = SimulationContext::new(recorder, &config(), SURFACE).unwrap();
    let id = ctx.add_fire_source(desc).unwrap();
    (ctx, id)
}

fn particle_texels(cpu: &CpuBackend, ctx: &SimulationContext<GpuRecorder>, id: FireSourceId) -> (Vec<Vec4>, Vec<f32>) {
    let source = ctx.fire_source(id).unwrap();
    let state = cpu.read_field(source.state().read_handle()).unwrap().texels.clone();
    let lifespans = cpu.read_field(source.lifespans().read_handle()).unwrap();
    (state, lifespans.texels.iter().map(|t| t.x).collect())
}

#[test]
fn held_construction_frame_still_staggers_lifespans() {
    let (mut ctx, id) = recorded_context(FireSourceDesc {
        position: Vec2::new(4.0, 2.0),
        velocity: Vec2::new(1.0, 3.0),
        num_particles: 4,
        lifespan: 2.0,
    });
    let progress = ReplayProgress::default();
    let mut backlog = FrameBacklog::default();
    backlog.push(ctx.backend_mut().take_frame());

    // pipelines still compiling: several render frames go by with nothing run
    for _ in 0..5 {
        backlog.acknowledge(progress.executed());
        assert_eq!(backlog.pending(progress.executed()).count(), 1);
    }

    let mut replayer = Replayer::new();
    for (frame_id, frame) in backlog.pending(progress.executed()) {
        replayer.run(frame, ctx.backend());
        progress.mark_executed(frame_id);
    }
    backlog.acknowledge(progress.executed());
    assert!(backlog.is_empty());

    let emitter = ctx.fire_source(id).unwrap().emitter(SURFACE);
    let (state, lifespans) = particle_texels(&replayer.cpu, &ctx, id);
    for (i, life) in lifespans.iter().enumerate() {
        assert_eq!(*life, 2.0 * (i + 1) as f32 / 4.0);
        assert_eq!(state[i], Vec4::new(emitter.x, emitter.y, 1.0, 3.0));
    }
}

#[test]
fn infinite_source_leaves_the_emitter_after_a_hold() {
    let (mut ctx, id) = recorded_context(FireSourceDesc {
        position: Vec2::new(2.0, 8.0),
        velocity: Vec2::new(16.0, 0.0),
        num_particles: 1,
        lifespan: -1.0,
    });
    let config = config();
    let mut backlog = FrameBacklog::default();
    backlog.push(ctx.backend_mut().take_frame());
    for _ in 0..10 {
        ctx.step_fire_sources(&config, 0.016).unwrap();
        backlog.push(ctx.backend_mut().take_frame());
    }
    assert_eq!(backlog.len(), 11);

    let mut replayer = Replayer::new();
    for (_, frame) in backlog.pending(0) {
        replayer.run(frame, ctx.backend());
    }

    let emitter = ctx.fire_source(id).unwrap().emitter(SURFACE);
    let (state, _) = particle_texels(&replayer.cpu, &ctx, id);
    let expected_x = emitter.x + 10.0 * 16.0 * 0.016 / 16.0;
    assert!((state[0].x - expected_x).abs() < 1e-5, "{} vs {expected_x}", state[0].x);
    assert_eq!(state[0].y, emitter.y);
}

#[test]
fn acknowledged_frames_run_once() {
    let desc = FireSourceDesc {
        position: Vec2::new(8.0, 4.0),
        velocity: Vec2::new(0.0, 8.0),
        num_particles: 9,
        lifespan: 0.1,
    };
    let config = config();
    let (mut ctx, id) = recorded_context(desc);
    let progress = ReplayProgress::default();
    let mut backlog = FrameBacklog::default();
    let mut replayer = Replayer::new();

    backlog.push(ctx.backend_mut().take_frame());
    for _ in 0..6 {
        ctx.step_fire_sources(&config, 0.016).unwrap();
        backlog.push(ctx.backend_mut().take_frame());

        // the main world prunes late, so executed frames are still listed
        for (frame_id, frame) in backlog.pending(progress.executed()) {
            replayer.run(frame, ctx.backend());
            progress.mark_executed(frame_id);
        }
    }
    backlog.acknowledge(progress.executed());
    assert!(backlog.is_empty());

    // same work executed directly
    let mut direct = SimulationContext::new(CpuBackend::new(SURFACE), &config, SURFACE).unwrap();
    let direct_id = direct.add_fire_source(desc).unwrap();
    for _ in 0..6 {
        direct.step_fire_sources(&config, 0.016).unwrap();
    }
    let source = direct.fire_source(direct_id).unwrap();
    let read = |handle| direct.backend().read_field(handle).unwrap().texels.clone();
    let direct_state = read(source.state().read_handle());
    let direct_lifespans: Vec<f32> = read(source.lifespans().read_handle()).iter().map(|t| t.x).collect();

    let (state, lifespans) = particle_texels(&replayer.cpu, &ctx, id);
    assert_eq!(state, direct_state);
    assert_eq!(lifespans, direct_lifespans);
}
