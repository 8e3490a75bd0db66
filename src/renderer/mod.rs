// Renderer facade
//
// Owns the backend, the camera matrices, the textures and the list of render
// objects. Applications only talk to `Renderer`; backends only see the
// per-frame calls of `RendererBackend`.

pub mod error;
pub mod frame;
pub mod headless;
pub mod object_state;
pub mod texture;
pub mod types;

pub use error::RendererError;
pub use headless::HeadlessBackend;
pub use texture::{Texture, TextureHandle, TextureId, INVALID_ID};
pub use types::{
    BackendKind, BackendStats, GeometryRenderData, RenderPacket, RendererBackend,
    MAX_FRAMES_IN_FLIGHT,
};

use anyhow::{Context, Result};
use glam::{Mat4, Vec3, Vec4};
use std::sync::Arc;

use crate::backend::VulkanBackend;
use crate::config::{AssetConfig, Config};
use crate::platform::SurfaceProvider;

/// Edge length of the generated default texture.
pub const DEFAULT_TEXTURE_DIMENSION: u32 = 256;
pub const DEFAULT_TEXTURE_NAME: &str = "default";

/// Something drawn every frame.
#[derive(Debug, Clone)]
pub struct RenderObject {
    pub object_id: u32,
    pub model: Mat4,
    pub diffuse: Option<TextureId>,
}

/// Build a backend of the requested kind. Vulkan needs a surface provider.
pub fn create_backend(
    kind: BackendKind,
    config: &Config,
    surface: Option<Arc<dyn SurfaceProvider>>,
) -> Result<Box<dyn RendererBackend>> {
    match kind {
        BackendKind::Vulkan => {
            let surface = surface.context("Vulkan backend requires a window surface")?;
            Ok(Box::new(VulkanBackend::new(surface, config.clone())))
        }
        BackendKind::Headless => Ok(Box::new(HeadlessBackend::new(config))),
    }
}

pub struct Renderer {
    backend: Box<dyn RendererBackend>,
    projection: Mat4,
    view: Mat4,
    field_of_view: f32,
    near_clip: f32,
    far_clip: f32,
    default_texture: Texture,
    textures: Vec<Texture>,
    objects: Vec<RenderObject>,
    assets: AssetConfig,
    shut_down: bool,
}

impl Renderer {
    /// Initialize `backend` and create the default texture.
    pub fn new(
        mut backend: Box<dyn RendererBackend>,
        application_name: &str,
        config: &Config,
    ) -> Result<Self> {
        backend
            .initialize(application_name)
            .context("Renderer backend failed to initialize")?;

        let graphics = &config.graphics;
        let field_of_view = graphics.field_of_view_degrees.to_radians();
        let aspect = config.window.width as f32 / config.window.height.max(1) as f32;
        let projection =
            Mat4::perspective_rh(field_of_view, aspect, graphics.near_clip, graphics.far_clip);
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, 30.0)).inverse();

        let default_texture = Self::create_default_texture(backend.as_mut())?;

        log::info!("Renderer initialized");
        Ok(Self {
            backend,
            projection,
            view,
            field_of_view,
            near_clip: graphics.near_clip,
            far_clip: graphics.far_clip,
            default_texture,
            textures: Vec::new(),
            objects: Vec::new(),
            assets: config.assets.clone(),
            shut_down: false,
        })
    }

    fn create_default_texture(backend: &mut dyn RendererBackend) -> Result<Texture> {
        log::trace!("Creating default texture...");
        let mut texture = Texture::new(INVALID_ID, DEFAULT_TEXTURE_NAME);
        texture.width = DEFAULT_TEXTURE_DIMENSION;
        texture.height = DEFAULT_TEXTURE_DIMENSION;
        texture.channel_count = texture::TEXTURE_CHANNELS;

        let pixels = texture::checkerboard(DEFAULT_TEXTURE_DIMENSION);
        backend
            .create_texture(&mut texture, &pixels)
            .context("Failed to create default texture")?;

        // Always treated as "not loaded" so descriptors fall back to it.
        texture.generation = INVALID_ID;
        backend.set_default_texture(&texture);
        Ok(texture)
    }

    pub fn on_resized(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.projection = Mat4::perspective_rh(
                self.field_of_view,
                width as f32 / height as f32,
                self.near_clip,
                self.far_clip,
            );
        }
        self.backend.resized(width, height);
    }

    /// Draw one frame.
    ///
    /// A skipped frame (swapchain being rebuilt, window minimised) is `Ok`.
    /// An error is unrecoverable and the caller should stop its loop.
    pub fn draw_frame(&mut self, packet: &RenderPacket) -> Result<()> {
        match self.backend.begin_frame(packet.delta_time) {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(e) => {
                log::warn!("begin_frame failed, skipping frame: {:#}", e);
                return Ok(());
            }
        }

        let recorded = self.record_frame();
        let ended = self.backend.end_frame(packet.delta_time);

        if let Err(e) = recorded.and(ended) {
            log::error!("end_frame failed. Application shutting down: {:#}", e);
            return Err(e);
        }
        Ok(())
    }

    fn record_frame(&mut self) -> Result<()> {
        self.backend
            .update_global_state(self.projection, self.view, Vec3::ZERO, Vec4::ONE, 0)?;

        for object in &self.objects {
            let texture = object
                .diffuse
                .and_then(|id| self.textures.get(id.0))
                .unwrap_or(&self.default_texture);

            self.backend.update_object(&GeometryRenderData {
                object_id: object.object_id,
                model: object.model,
                textures: [Some(texture)],
            })?;
        }
        Ok(())
    }

    pub fn set_view(&mut self, view: Mat4) {
        self.view = view;
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    /// Register an empty texture. It renders as the default until loaded.
    pub fn create_texture_slot(&mut self, name: &str) -> TextureId {
        let id = self.textures.len();
        self.textures.push(Texture::new(id as u32, name));
        TextureId(id)
    }

    /// Load `<assets>/textures/<name>.png` into the texture slot.
    ///
    /// On failure the texture keeps its previous data and generation.
    pub fn load_texture(&mut self, id: TextureId, name: &str) -> Result<()> {
        let path = self.assets.texture_path(name);
        let data = texture::decode_png(&path)?;
        self.upload_texture(
            id,
            name,
            data.width,
            data.height,
            data.has_transparency,
            &data.pixels,
        )
        .with_context(|| format!("Failed to upload texture '{}'", name))
    }

    /// Replace the contents of a texture slot with RGBA8 pixel data.
    pub fn upload_texture(
        &mut self,
        id: TextureId,
        name: &str,
        width: u32,
        height: u32,
        has_transparency: bool,
        pixels: &[u8],
    ) -> Result<()> {
        let current = self
            .textures
            .get(id.0)
            .with_context(|| format!("Unknown texture id {:?}", id))?;

        let mut replacement = Texture::new(current.id, name);
        replacement.width = width;
        replacement.height = height;
        replacement.channel_count = texture::TEXTURE_CHANNELS;
        replacement.has_transparency = has_transparency;
        // continue the generation sequence of the texture being replaced
        replacement.generation = current.generation;

        self.backend.create_texture(&mut replacement, pixels)?;

        let mut old = std::mem::replace(&mut self.textures[id.0], replacement);
        self.backend.destroy_texture(&mut old);

        log::info!(
            "Loaded texture '{}' {}x{} (generation {})",
            name,
            width,
            height,
            self.textures[id.0].generation
        );
        Ok(())
    }

    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id.0)
    }

    pub fn default_texture(&self) -> &Texture {
        &self.default_texture
    }

    /// Add an object drawn every frame. Returns its index in the object list.
    pub fn add_object(&mut self, model: Mat4, diffuse: Option<TextureId>) -> Result<usize> {
        let object_id = self.backend.acquire_object_resources()?;
        self.objects.push(RenderObject {
            object_id,
            model,
            diffuse,
        });
        Ok(self.objects.len() - 1)
    }

    pub fn remove_object(&mut self, index: usize) -> Option<RenderObject> {
        if index >= self.objects.len() {
            return None;
        }
        let object = self.objects.remove(index);
        self.backend.release_object_resources(object.object_id);
        Some(object)
    }

    pub fn set_object_model(&mut self, index: usize, model: Mat4) {
        if let Some(object) = self.objects.get_mut(index) {
            object.model = model;
        }
    }

    /// Point an object at another diffuse texture. Its samplers are
    /// rewritten on the next frame of every slot, even when the new texture's
    /// generation matches the old one.
    pub fn set_object_texture(&mut self, index: usize, diffuse: Option<TextureId>) {
        let Some(object) = self.objects.get_mut(index) else {
            return;
        };
        if object.diffuse != diffuse {
            object.diffuse = diffuse;
            self.backend.invalidate_object_samplers(object.object_id);
        }
    }

    pub fn objects(&self) -> &[RenderObject] {
        &self.objects
    }

    pub fn frame_number(&self) -> u64 {
        self.backend.frame_number()
    }

    pub fn stats(&self) -> BackendStats {
        self.backend.stats()
    }

    pub fn backend(&self) -> &dyn RendererBackend {
        self.backend.as_ref()
    }

    /// Release every texture and object, then shut the backend down.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        for object in self.objects.drain(..) {
            self.backend.release_object_resources(object.object_id);
        }
        for texture in self.textures.iter_mut() {
            self.backend.destroy_texture(texture);
        }
        self.backend.destroy_texture(&mut self.default_texture);
        self.backend.shutdown();
        log::info!("Renderer shut down");
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> Renderer {
        let config = Config::default();
        let backend = create_backend(BackendKind::Headless, &config, None).unwrap();
        Renderer::new(backend, "renderer-test", &config).unwrap()
    }

    #[test]
    fn vulkan_backend_requires_surface() {
        assert!(create_backend(BackendKind::Vulkan, &Config::default(), None).is_err());
    }

    #[test]
    fn default_texture_is_never_loaded() {
        let renderer = renderer();
        let texture = renderer.default_texture();
        assert_eq!(texture.generation, INVALID_ID);
        assert!(texture.handle.is_some());
        assert_eq!(texture.width, DEFAULT_TEXTURE_DIMENSION);
    }

    #[test]
    fn degenerate_resize_keeps_projection() {
        let mut renderer = renderer();
        let before = renderer.projection();
        renderer.on_resized(0, 0);
        assert_eq!(renderer.projection(), before);
        renderer.on_resized(1920, 1080);
        assert_ne!(renderer.projection(), before);
    }

    #[test]
    fn upload_continues_generation_sequence() {
        let mut renderer = renderer();
        let id = renderer.create_texture_slot("pixel");
        assert!(!renderer.texture(id).unwrap().is_loaded());

        renderer
            .upload_texture(id, "pixel", 1, 1, false, &[1, 2, 3, 255])
            .unwrap();
        assert_eq!(renderer.texture(id).unwrap().generation, 0);
        renderer
            .upload_texture(id, "pixel", 1, 1, true, &[1, 2, 3, 4])
            .unwrap();
        let texture = renderer.texture(id).unwrap();
        assert_eq!(texture.generation, 1);
        assert!(texture.has_transparency);
    }

    #[test]
    fn failed_upload_keeps_previous_texture() {
        let mut renderer = renderer();
        let id = renderer.create_texture_slot("pixel");
        renderer
            .upload_texture(id, "pixel", 1, 1, false, &[1, 2, 3, 255])
            .unwrap();
        assert!(renderer
            .upload_texture(id, "pixel", 2, 2, false, &[0; 4])
            .is_err());
        let texture = renderer.texture(id).unwrap();
        assert_eq!((texture.width, texture.generation), (1, 0));
    }

    #[test]
    fn remove_object_out_of_range() {
        let mut renderer = renderer();
        assert!(renderer.remove_object(0).is_none());
        let index = renderer.add_object(Mat4::IDENTITY, None).unwrap();
        assert_eq!(renderer.remove_object(index).map(|o| o.object_id), Some(0));
    }
}
