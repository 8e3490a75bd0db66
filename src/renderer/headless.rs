// Headless backend
//
// Runs the same frame lifecycle as the Vulkan backend without touching a GPU.
// Fences are simulated: a submitted frame slot completes the next time its
// fence is waited on, unless the slot is stalled, in which case the wait
// times out. Every wait, recreation and descriptor write is counted
// so the protocol can be checked from tests.

use anyhow::Result;
use glam::{Mat4, Vec3, Vec4};
use slotmap::SlotMap;

use super::error::RendererError;
use super::frame::{FrameLifecycle, FramePhase, RecreateGate};
use super::object_state::{ObjectSlots, SamplerSource};
use super::texture::{next_generation, Texture, TextureHandle};
use super::types::{BackendStats, GeometryRenderData, GlobalUniformObject, RendererBackend};
use crate::config::Config;

/// Pixel data kept for an uploaded texture.
#[derive(Debug)]
struct HeadlessTexture {
    width: u32,
    height: u32,
}

/// A descriptor write that would have been issued to the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    ObjectUniform { object_id: u32, frame: usize },
    Sampler {
        object_id: u32,
        frame: usize,
        source: SamplerSource,
    },
}

pub struct HeadlessBackend {
    width: u32,
    height: u32,
    frames_in_flight: usize,
    max_object_count: u32,

    lifecycle: Option<FrameLifecycle>,
    objects: Option<ObjectSlots>,
    textures: SlotMap<TextureHandle, HeadlessTexture>,
    default_texture: Option<TextureHandle>,

    /// Submission number each frame slot's fence is waiting for.
    slot_fences: Vec<Option<u64>>,
    stalled: Vec<bool>,
    submissions: u64,

    global_ubo: GlobalUniformObject,
    frame_number: u64,
    swapchain_recreations: u64,

    fence_waits: Vec<usize>,
    descriptor_writes: Vec<DescriptorWrite>,
}

impl HeadlessBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            width: config.window.width,
            height: config.window.height,
            frames_in_flight: config.graphics.frames_in_flight(),
            max_object_count: config.graphics.max_object_count,
            lifecycle: None,
            objects: None,
            textures: SlotMap::with_key(),
            default_texture: None,
            slot_fences: Vec::new(),
            stalled: Vec::new(),
            submissions: 0,
            global_ubo: GlobalUniformObject::default(),
            frame_number: 0,
            swapchain_recreations: 0,
            fence_waits: Vec::new(),
            descriptor_writes: Vec::new(),
        }
    }

    /// Frame slots whose fences had a pending submission when waited on, in order.
    pub fn fence_waits(&self) -> &[usize] {
        &self.fence_waits
    }

    pub fn descriptor_writes(&self) -> &[DescriptorWrite] {
        &self.descriptor_writes
    }

    pub fn global_uniform(&self) -> &GlobalUniformObject {
        &self.global_ubo
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn phase(&self) -> Option<FramePhase> {
        self.lifecycle.as_ref().map(|lifecycle| lifecycle.phase())
    }

    /// Swapchain images the simulated surface hands out.
    fn image_count(&self) -> usize {
        self.frames_in_flight + 1
    }

    /// Make waits on `slot` time out while it has work pending.
    pub fn stall_slot(&mut self, slot: usize) {
        if let Some(stalled) = self.stalled.get_mut(slot) {
            *stalled = true;
        }
    }

    pub fn release_stalls(&mut self) {
        self.stalled.iter_mut().for_each(|stalled| *stalled = false);
    }

    /// Returns false when the wait timed out.
    fn wait_slot(&mut self, slot: usize) -> bool {
        if let Some(Some(_)) = self.slot_fences.get(slot) {
            if self.stalled[slot] {
                log::warn!("Fence wait on frame slot {} timed out", slot);
                return false;
            }
            self.fence_waits.push(slot);
            self.slot_fences[slot] = None;
        }
        true
    }

    fn wait_owner(&mut self, owner: usize, image_index: u32) -> Result<()> {
        if !self.wait_slot(owner) {
            return Err(RendererError::FenceTimeout {
                slot: owner,
                image_index,
            }
            .into());
        }
        Ok(())
    }

    fn wait_idle(&mut self) {
        for fence in self.slot_fences.iter_mut() {
            *fence = None;
        }
    }

    fn recreate_swapchain(&mut self) -> Result<bool> {
        let image_count = self.image_count();
        let lifecycle = self.lifecycle.as_mut().ok_or(RendererError::NotInitialized)?;

        if lifecycle.begin_recreation() != RecreateGate::Proceed {
            return Ok(false);
        }

        let (width, height) = lifecycle.framebuffer_size();
        self.width = width;
        self.height = height;
        lifecycle.set_image_count(image_count);
        lifecycle.finish_recreation(true);
        self.swapchain_recreations += 1;

        log::debug!("Headless swapchain recreated at {}x{}", width, height);
        Ok(true)
    }
}

impl RendererBackend for HeadlessBackend {
    fn initialize(&mut self, application_name: &str) -> Result<()> {
        log::info!(
            "Initializing headless backend for '{}' ({}x{}, {} frames in flight)",
            application_name,
            self.width,
            self.height,
            self.frames_in_flight
        );

        let mut lifecycle = FrameLifecycle::new(self.width, self.height, self.frames_in_flight);
        lifecycle.set_image_count(self.image_count());
        self.lifecycle = Some(lifecycle);
        self.objects = Some(ObjectSlots::new(self.max_object_count));
        self.slot_fences = vec![None; self.frames_in_flight];
        self.stalled = vec![false; self.frames_in_flight];
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.lifecycle.take().is_some() {
            log::info!("Shutting down headless backend");
        }
        self.objects = None;
        self.textures.clear();
        self.default_texture = None;
    }

    fn resized(&mut self, width: u32, height: u32) {
        if let Some(lifecycle) = self.lifecycle.as_mut() {
            lifecycle.resized(width, height);
        }
    }

    fn begin_frame(&mut self, _delta_time: f32) -> Result<bool> {
        let lifecycle = self.lifecycle.as_ref().ok_or(RendererError::NotInitialized)?;
        let (recreating, needs_recreation, current) = (
            lifecycle.is_recreating(),
            lifecycle.needs_recreation(),
            lifecycle.current_frame(),
        );

        if recreating {
            self.wait_idle();
            return Ok(false);
        }

        if needs_recreation {
            self.wait_idle();
            self.recreate_swapchain()?;
            return Ok(false);
        }

        if !self.wait_slot(current) {
            log::warn!("In-flight fence wait failure, skipping frame");
            return Ok(false);
        }

        let image_index = (self.frame_number % self.image_count() as u64) as u32;
        let lifecycle = self.lifecycle.as_mut().ok_or(RendererError::NotInitialized)?;
        lifecycle.image_acquired(image_index);
        let owner = lifecycle.image_owner(image_index);
        if let Some(owner) = owner {
            self.wait_owner(owner, image_index)?;
        }

        if let Some(lifecycle) = self.lifecycle.as_mut() {
            lifecycle.set_phase(FramePhase::InRenderpass);
        }
        Ok(true)
    }

    fn update_global_state(
        &mut self,
        projection: Mat4,
        view: Mat4,
        _view_position: Vec3,
        _ambient_color: Vec4,
        _mode: i32,
    ) -> Result<()> {
        self.global_ubo.projection = projection;
        self.global_ubo.view = view;
        Ok(())
    }

    fn update_object(&mut self, data: &GeometryRenderData<'_>) -> Result<()> {
        let frame = self
            .lifecycle
            .as_ref()
            .ok_or(RendererError::NotInitialized)?
            .current_frame();
        let objects = self.objects.as_mut().ok_or(RendererError::NotInitialized)?;
        let Some(state) = objects.state_mut(data.object_id) else {
            anyhow::bail!("Object {} has no acquired resources", data.object_id);
        };

        if state.sync_uniform(frame) {
            self.descriptor_writes.push(DescriptorWrite::ObjectUniform {
                object_id: data.object_id,
                frame,
            });
        }

        for (sampler, texture) in data.textures.iter().enumerate() {
            let generation = texture.map(|texture| texture.generation);
            if let Some(source) = state.sync_sampler(sampler + 1, frame, generation) {
                self.descriptor_writes.push(DescriptorWrite::Sampler {
                    object_id: data.object_id,
                    frame,
                    source,
                });
            }
        }
        Ok(())
    }

    fn end_frame(&mut self, _delta_time: f32) -> Result<()> {
        let lifecycle = self.lifecycle.as_mut().ok_or(RendererError::NotInitialized)?;
        let image_index = lifecycle.image_index();
        let current = lifecycle.current_frame();

        if let Some(owner) = lifecycle.claim_image(image_index) {
            self.wait_owner(owner, image_index)?;
        }

        self.submissions += 1;
        self.slot_fences[current] = Some(self.submissions);

        if let Some(lifecycle) = self.lifecycle.as_mut() {
            lifecycle.set_phase(FramePhase::Presented);
            lifecycle.advance_frame();
        }
        self.frame_number += 1;
        Ok(())
    }

    fn frame_number(&self) -> u64 {
        self.frame_number
    }

    fn create_texture(&mut self, texture: &mut Texture, pixels: &[u8]) -> Result<()> {
        let expected = texture.expected_size();
        if pixels.len() != expected {
            return Err(RendererError::PixelDataSize {
                name: texture.name.clone(),
                expected,
                actual: pixels.len(),
            }
            .into());
        }

        let handle = self.textures.insert(HeadlessTexture {
            width: texture.width,
            height: texture.height,
        });
        texture.handle = Some(handle);
        texture.generation = next_generation(texture.generation);
        log::debug!(
            "Created headless texture '{}' {}x{} (generation {})",
            texture.name,
            texture.width,
            texture.height,
            texture.generation
        );
        Ok(())
    }

    fn destroy_texture(&mut self, texture: &mut Texture) {
        self.wait_idle();
        if let Some(handle) = texture.handle.take() {
            if let Some(data) = self.textures.remove(handle) {
                log::trace!("Destroyed headless texture {}x{}", data.width, data.height);
            }
        }
    }

    fn set_default_texture(&mut self, texture: &Texture) {
        self.default_texture = texture.handle;
    }

    fn acquire_object_resources(&mut self) -> Result<u32> {
        let objects = self.objects.as_mut().ok_or(RendererError::NotInitialized)?;
        Ok(objects.acquire()?)
    }

    fn release_object_resources(&mut self, object_id: u32) {
        self.wait_idle();
        if let Some(objects) = self.objects.as_mut() {
            objects.release(object_id);
        }
    }

    fn invalidate_object_samplers(&mut self, object_id: u32) {
        if let Some(state) = self
            .objects
            .as_mut()
            .and_then(|objects| objects.state_mut(object_id))
        {
            state.invalidate_samplers();
        }
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            frame_number: self.frame_number,
            swapchain_recreations: self.swapchain_recreations,
            descriptor_writes: self.descriptor_writes.len() as u64,
            objects_acquired: self.objects.as_ref().map_or(0, |objects| objects.acquired()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(frames_in_flight: usize) -> HeadlessBackend {
        let mut config = Config::default();
        config.graphics.max_frames_in_flight = frames_in_flight;
        config.graphics.max_object_count = 4;
        let mut backend = HeadlessBackend::new(&config);
        backend.initialize("headless-test").unwrap();
        backend
    }

    fn run_frame(backend: &mut HeadlessBackend) -> bool {
        let started = backend.begin_frame(0.016).unwrap();
        if started {
            backend.end_frame(0.016).unwrap();
        }
        started
    }

    #[test]
    fn uninitialized_backend_reports_error() {
        let mut backend = HeadlessBackend::new(&Config::default());
        let err = backend.begin_frame(0.0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RendererError>(),
            Some(RendererError::NotInitialized)
        ));
    }

    #[test]
    fn frame_slot_fence_is_waited_before_reuse() {
        let mut backend = backend(2);
        assert!(run_frame(&mut backend));
        assert!(run_frame(&mut backend));
        assert!(backend.fence_waits().is_empty());

        // third frame reuses slot 0
        assert!(run_frame(&mut backend));
        assert_eq!(backend.fence_waits(), &[0]);
        assert_eq!(backend.frame_number(), 3);
    }

    #[test]
    fn timed_out_slot_fence_skips_frame() {
        let mut backend = backend(2);
        for _ in 0..3 {
            assert!(run_frame(&mut backend));
        }

        // frame 3 runs on slot 1, still busy with frame 1
        backend.stall_slot(1);
        assert!(!run_frame(&mut backend));
        assert_eq!(backend.frame_number(), 3);

        backend.release_stalls();
        assert!(run_frame(&mut backend));
        assert_eq!(backend.frame_number(), 4);
    }

    #[test]
    fn timed_out_image_owner_is_an_error() {
        let mut backend = backend(2);
        for _ in 0..3 {
            assert!(run_frame(&mut backend));
        }

        // frame 3 acquires image 0, which slot 0 rendered into last
        backend.stall_slot(0);
        let err = backend.begin_frame(0.016).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RendererError>(),
            Some(RendererError::FenceTimeout {
                slot: 0,
                image_index: 0
            })
        ));
        assert_eq!(backend.frame_number(), 3);
    }

    #[test]
    fn resize_skips_exactly_one_frame() {
        let mut backend = backend(2);
        assert!(run_frame(&mut backend));

        backend.resized(1920, 1080);
        backend.resized(1920, 1080);
        assert!(!run_frame(&mut backend));
        assert!(run_frame(&mut backend));
        assert_eq!(backend.stats().swapchain_recreations, 1);
    }

    #[test]
    fn minimised_window_keeps_skipping_until_restored() {
        let mut backend = backend(2);
        backend.resized(0, 0);
        for _ in 0..3 {
            assert!(!run_frame(&mut backend));
        }
        assert_eq!(backend.stats().swapchain_recreations, 0);

        backend.resized(1280, 720);
        assert!(!run_frame(&mut backend));
        assert!(run_frame(&mut backend));
        assert_eq!(backend.stats().swapchain_recreations, 1);
    }

    #[test]
    fn descriptor_writes_are_minimal() {
        let mut backend = backend(2);
        let id = backend.acquire_object_resources().unwrap();

        let mut texture = Texture::new(0, "test");
        texture.width = 1;
        texture.height = 1;
        texture.channel_count = 4;
        backend.create_texture(&mut texture, &[255; 4]).unwrap();

        for _ in 0..4 {
            assert!(backend.begin_frame(0.0).unwrap());
            backend
                .update_object(&GeometryRenderData {
                    object_id: id,
                    model: Mat4::IDENTITY,
                    textures: [Some(&texture)],
                })
                .unwrap();
            backend.end_frame(0.0).unwrap();
        }

        // one uniform and one sampler write per frame slot
        assert_eq!(backend.descriptor_writes().len(), 4);
    }

    #[test]
    fn pixel_size_mismatch_is_rejected() {
        let mut backend = backend(2);
        let mut texture = Texture::new(0, "broken");
        texture.width = 2;
        texture.height = 2;
        texture.channel_count = 4;
        assert!(backend.create_texture(&mut texture, &[0; 4]).is_err());
        assert!(!texture.is_loaded());
    }

    #[test]
    fn update_unknown_object_fails() {
        let mut backend = backend(2);
        assert!(backend.begin_frame(0.0).unwrap());
        let data = GeometryRenderData {
            object_id: 3,
            model: Mat4::IDENTITY,
            textures: [None],
        };
        assert!(backend.update_object(&data).is_err());
    }
}
