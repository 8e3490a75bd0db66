// Renderer types shared by the facade and every backend

use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

use super::texture::Texture;

/// Upper bound on frames in flight; per-object descriptor state is sized for it.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Descriptors per object: the object uniform buffer and the diffuse sampler.
pub const OBJECT_DESCRIPTOR_COUNT: usize = 2;

/// Combined image samplers per object.
pub const OBJECT_SAMPLER_COUNT: usize = 1;

/// Available backend implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Vulkan,
    /// Runs the frame protocol without a GPU.
    Headless,
}

/// Per-frame payload handed to [`crate::Renderer::draw_frame`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderPacket {
    pub delta_time: f32,
}

/// Per-draw payload. Borrowed for a single `update_object` call only.
#[derive(Debug, Clone, Copy)]
pub struct GeometryRenderData<'a> {
    pub object_id: u32,
    pub model: Mat4,
    pub textures: [Option<&'a Texture>; OBJECT_SAMPLER_COUNT],
}

/// Set 0, binding 0. Padded to 256 bytes so per-frame copies stay aligned.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GlobalUniformObject {
    pub projection: Mat4,
    pub view: Mat4,
    pub reserved0: Mat4,
    pub reserved1: Mat4,
}

impl Default for GlobalUniformObject {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            reserved0: Mat4::IDENTITY,
            reserved1: Mat4::IDENTITY,
        }
    }
}

/// Set 1, binding 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ObjectUniformObject {
    pub diffuse_color: Vec4,
    pub reserved0: Vec4,
    pub reserved1: Vec4,
    pub reserved2: Vec4,
}

impl ObjectUniformObject {
    pub fn with_diffuse(diffuse_color: Vec4) -> Self {
        Self {
            diffuse_color,
            ..Self::zeroed()
        }
    }
}

/// Vertex layout consumed by the material shader (location 0/1).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex3d {
    pub position: Vec3,
    pub texcoord: Vec2,
}

/// Counters exposed by every backend for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub frame_number: u64,
    pub swapchain_recreations: u64,
    pub descriptor_writes: u64,
    pub objects_acquired: u32,
}

/// Contract between the renderer facade and a graphics backend.
///
/// All calls happen on the thread that owns the renderer. `begin_frame`
/// returns `Ok(false)` when the frame must be skipped (swapchain being
/// rebuilt, window minimised, fence timeout); the caller retries next tick.
/// An `Err` from `end_frame` is unrecoverable.
pub trait RendererBackend {
    fn initialize(&mut self, application_name: &str) -> Result<()>;

    fn shutdown(&mut self);

    fn resized(&mut self, width: u32, height: u32);

    fn begin_frame(&mut self, delta_time: f32) -> Result<bool>;

    fn update_global_state(
        &mut self,
        projection: Mat4,
        view: Mat4,
        view_position: Vec3,
        ambient_color: Vec4,
        mode: i32,
    ) -> Result<()>;

    fn update_object(&mut self, data: &GeometryRenderData<'_>) -> Result<()>;

    fn end_frame(&mut self, delta_time: f32) -> Result<()>;

    /// Incremented once per `end_frame`.
    fn frame_number(&self) -> u64;

    /// Upload pixel data and bump `texture.generation`.
    fn create_texture(&mut self, texture: &mut Texture, pixels: &[u8]) -> Result<()>;

    fn destroy_texture(&mut self, texture: &mut Texture);

    /// Placeholder bound whenever an object's texture is not loaded yet.
    fn set_default_texture(&mut self, texture: &Texture);

    fn acquire_object_resources(&mut self) -> Result<u32>;

    fn release_object_resources(&mut self, object_id: u32);

    /// Force the object's samplers to be rewritten in every frame slot, e.g.
    /// after it switched to another texture.
    fn invalidate_object_samplers(&mut self, object_id: u32);

    fn stats(&self) -> BackendStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_layouts() {
        assert_eq!(std::mem::size_of::<GlobalUniformObject>(), 256);
        assert_eq!(std::mem::size_of::<ObjectUniformObject>(), 64);
        assert_eq!(std::mem::size_of::<Vertex3d>(), 20);
    }
}
