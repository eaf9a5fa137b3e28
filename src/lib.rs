//! Real-time fire on the GPU: an Eulerian smoke/fire solver run as a chain
//! of full-screen fragment passes over ping-pong textures, fed by particle
//! fire sources and pointer splats.

pub mod backend;
pub mod config;
pub mod error;
pub mod field;
pub mod interaction;
pub mod particles;
pub mod pipeline;
pub mod program;

pub mod cpu {
    pub mod backend;
    pub mod kernels;
    pub mod texture;

    pub use backend::CpuBackend;
}

pub mod gpu {
    pub mod ffi;
    pub mod recorder;
    pub mod buffers;
    pub mod draw_buffers;
    pub mod draw_pipeline;
    pub mod draw_pass;
    pub mod input;
    pub mod replay;

    pub use buffers::{FirePlugin, FireSimulation};
    pub use recorder::GpuRecorder;
}

pub use backend::FieldBackend;
pub use config::{DisplayMode, FireConfig};
pub use error::{FireError, FireResult};
pub use field::{Channels, FieldDesc, FieldHandle, FilterMode, Resolution, SampleType, get_resolution};
pub use interaction::Pointers;
pub use particles::{FireSourceDesc, FireSourceId};
pub use pipeline::SimulationContext;
pub use program::{Input, Param, PassInvocation, Program, RenderTarget};
