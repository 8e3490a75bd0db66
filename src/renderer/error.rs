//! Renderer error types callers may want to match on.
//!
//! Everything else is reported through `anyhow` with context.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RendererError {
    #[error("No physical device meets the renderer's requirements")]
    NoSuitableDevice,

    #[error("No supported depth format among the candidates")]
    NoDepthFormat,

    #[error("No memory type matches filter {type_filter:#x} with properties {properties}")]
    NoMemoryType { type_filter: u32, properties: String },

    #[error("Object capacity of {capacity} exhausted (released slots are not reused)")]
    ObjectCapacityExhausted { capacity: u32 },

    #[error("Timed out waiting for frame slot {slot} to release swapchain image {image_index}")]
    FenceTimeout { slot: usize, image_index: u32 },

    #[error("Renderer backend is not initialized")]
    NotInitialized,

    #[error("Unable to read shader module: {path:?}")]
    ShaderLoad { path: PathBuf },

    #[error("Texture '{name}' expected {expected} bytes of pixel data, got {actual}")]
    PixelDataSize {
        name: String,
        expected: usize,
        actual: usize,
    },
}
