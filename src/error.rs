//! Error types for the fire simulation.

use thiserror::Error;

use crate::field::{Channels, FieldHandle, SampleType};
use crate::program::{Input, Param, Program};

/// Errors raised while building or stepping the simulation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FireError {
    /// No channel layout in the fallback chain can be rendered to.
    #[error("no renderable {sample:?} format for {channels:?} or any wider channel layout")]
    UnsupportedFormat {
        channels: Channels,
        sample: SampleType,
    },

    /// Every addressable texture unit is bound.
    #[error("all {max} texture units are in use")]
    TextureUnitsExhausted { max: u32 },

    /// The backend holds no storage for this handle.
    #[error("unknown field {0:?}")]
    UnknownField(FieldHandle),

    /// A parameter was set that the program does not declare.
    #[error("{program:?} does not declare parameter {param:?}")]
    UndeclaredParam { program: Program, param: Param },

    /// A declared parameter was never set before the pass ran.
    #[error("{program:?} ran with parameter {param:?} unset")]
    UnboundParam { program: Program, param: Param },

    /// An input was bound that the program does not declare.
    #[error("{program:?} does not declare input {input:?}")]
    UndeclaredInput { program: Program, input: Input },

    /// A declared input was never bound before the pass ran.
    #[error("{program:?} ran with input {input:?} unbound")]
    UnboundInput { program: Program, input: Input },

    /// The pass samples the buffer it writes.
    #[error("{program:?} reads and writes {field:?} in the same pass")]
    ReadWriteHazard { program: Program, field: FieldHandle },

    /// A sprite program issued as a full-screen pass, or the reverse.
    #[error("{0:?} cannot be issued this way")]
    WrongPassKind(Program),

    /// A fire source was requested with no particles.
    #[error("a fire source needs at least one particle")]
    EmptyFireSource,

    /// The particle texture for this population would exceed the size limit.
    #[error("{count} particles need a texture wider than {max}")]
    TooManyParticles { count: u32, max: u32 },

    /// The fire source id is not (or no longer) registered.
    #[error("unknown fire source {0}")]
    UnknownFireSource(u32),

    /// The particle index buffer handle is not registered.
    #[error("unknown particle index buffer {0}")]
    UnknownIndexBuffer(u32),

    /// Surface or field dimensions of zero.
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// The runtime failed to build a program.
    #[error("program {label} failed to compile: {message}")]
    ProgramCompile { label: String, message: String },
}

/// Result type for simulation operations.
pub type FireResult<T> = Result<T, FireError>;
