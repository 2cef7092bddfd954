//! Error types for GPU resources, shaders and picking

use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by a [`RenderBackend`](crate::gfx::backend::RenderBackend)
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("invalid dimensions {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u32 },

    #[error("framebuffer incomplete: {0}")]
    IncompleteFramebuffer(String),

    #[error("read region {x},{y} {width}x{height} outside {target_width}x{target_height} target")]
    ReadOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        target_width: u32,
        target_height: u32,
    },

    #[error("pixel readback failed: {0}")]
    Readback(String),

    #[error("no usable GPU device: {0}")]
    Device(String),

    #[error("surface error: {0}")]
    Surface(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

/// Which half of a program failed to compile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Compile or link diagnostics for a shader program
#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("{stage} shader '{label}' failed to compile:\n{log}")]
    Compile {
        label: String,
        stage: ShaderStage,
        log: String,
    },

    #[error("program '{label}' failed to link:\n{log}")]
    Link { label: String, log: String },
}

/// Failures of the off-screen picking buffer
#[derive(Debug, Error)]
pub enum PickingError {
    #[error("picking buffer needs a non-zero size, got {width}x{height}")]
    ZeroSize { width: u32, height: u32 },

    #[error("picking buffer is not initialised")]
    NotInitialised,

    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error("failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
