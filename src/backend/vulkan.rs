// Vulkan renderer backend
//
// FRAME FLOW:
// 1. begin_frame: rebuild the swapchain if the framebuffer changed, wait for
//    this frame slot's fence, acquire an image, start recording and begin the
//    main render pass
// 2. update_global_state / update_object: record draws
// 3. end_frame: submit, present and advance to the next frame slot
//
// Command buffers and framebuffers are indexed by swapchain image.
// Fences, semaphores and uniform regions are indexed by frame slot.

use anyhow::{Context, Result};
use ash::vk;
use glam::{Mat4, Vec2, Vec3, Vec4};
use slotmap::SlotMap;
use std::sync::Arc;

use super::buffer::Buffer;
use super::command_buffer::CommandBuffer;
use super::material_shader::MaterialShader;
use super::renderpass::RenderPass;
use super::sync::FrameSync;
use super::texture::VulkanTexture;
use super::{Swapchain, VulkanDevice};
use crate::config::Config;
use crate::platform::SurfaceProvider;
use crate::renderer::frame::{FrameLifecycle, FramePhase, RecreateGate};
use crate::renderer::texture::next_generation;
use crate::renderer::types::{BackendStats, GeometryRenderData, RendererBackend, Vertex3d};
use crate::renderer::{RendererError, Texture, TextureHandle};

/// Index count of the built-in test quad.
const QUAD_INDEX_COUNT: u32 = 6;

/// Everything created by `initialize`.
///
/// Field order is drop order: resources go before the device that owns them.
struct VulkanContext {
    textures: SlotMap<TextureHandle, VulkanTexture>,
    default_texture: Option<TextureHandle>,
    material_shader: MaterialShader,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    command_buffers: Vec<CommandBuffer>,
    frame_sync: Vec<FrameSync>,
    swapchain: Swapchain,
    render_pass: RenderPass,
    lifecycle: FrameLifecycle,
    frame_delta_time: f32,
    diffuse_accumulator: f32,
    device: Arc<VulkanDevice>,
}

impl VulkanContext {
    /// Rebuild swapchain, framebuffers and command buffers for the current size.
    ///
    /// Returns `Ok(false)` when the rebuild was not attempted.
    fn recreate_swapchain(&mut self) -> Result<bool> {
        match self.lifecycle.begin_recreation() {
            RecreateGate::Proceed => {}
            RecreateGate::AlreadyRecreating | RecreateGate::DegenerateExtent => return Ok(false),
        }

        let result = self.rebuild_swapchain();
        self.lifecycle.finish_recreation(result.is_ok());
        result.map(|()| true)
    }

    fn rebuild_swapchain(&mut self) -> Result<()> {
        let (width, height) = self.lifecycle.framebuffer_size();
        self.device.wait_idle()?;

        self.swapchain
            .recreate(width, height)
            .context("Failed to recreate swapchain")?;
        self.swapchain.create_framebuffers(self.render_pass.handle)?;

        for command_buffer in self.command_buffers.iter_mut() {
            command_buffer.free();
        }
        self.command_buffers = allocate_graphics_command_buffers(
            &self.device,
            self.swapchain.image_count(),
        )?;
        self.lifecycle.set_image_count(self.swapchain.image_count());

        log::info!(
            "Swapchain recreated at {}x{} ({} images)",
            self.swapchain.extent.width,
            self.swapchain.extent.height,
            self.swapchain.image_count()
        );
        Ok(())
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        // Wait for GPU to finish before destroying anything
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait idle failed during shutdown: {:#}", e);
        }
    }
}

pub struct VulkanBackend {
    surface: Arc<dyn SurfaceProvider>,
    config: Config,
    frame_number: u64,
    swapchain_recreations: u64,
    context: Option<VulkanContext>,
}

impl VulkanBackend {
    /// Nothing touches Vulkan until `initialize`.
    pub fn new(surface: Arc<dyn SurfaceProvider>, config: Config) -> Self {
        Self {
            surface,
            config,
            frame_number: 0,
            swapchain_recreations: 0,
            context: None,
        }
    }

    fn context_mut(&mut self) -> Result<&mut VulkanContext, RendererError> {
        self.context.as_mut().ok_or(RendererError::NotInitialized)
    }
}

impl RendererBackend for VulkanBackend {
    fn initialize(&mut self, application_name: &str) -> Result<()> {
        let device = VulkanDevice::new(
            application_name,
            self.surface.as_ref(),
            &self.config.device,
            self.config.debug.validation_layers,
        )?;

        let (width, height) = self.surface.framebuffer_size();
        let mut swapchain =
            Swapchain::new(device.clone(), width, height, self.config.get_present_mode())?;

        let render_pass = RenderPass::new(
            device.clone(),
            swapchain.format,
            self.config.graphics.clear_color,
        )?;
        swapchain.create_framebuffers(render_pass.handle)?;

        let command_buffers =
            allocate_graphics_command_buffers(&device, swapchain.image_count())?;

        let frames_in_flight = self.config.graphics.frames_in_flight();
        let frame_sync = (0..frames_in_flight)
            .map(|_| FrameSync::new(&device))
            .collect::<Result<Vec<_>>>()
            .context("Failed to create frame synchronization objects")?;
        log::info!("Created {} frame sync objects", frames_in_flight);

        let material_shader = MaterialShader::new(
            device.clone(),
            &self.config.assets,
            render_pass.handle,
            frames_in_flight,
            self.config.graphics.max_object_count,
        )
        .context("Error loading built-in material shader")?;

        let (vertex_buffer, index_buffer) = create_test_geometry(&device)?;

        let mut lifecycle = FrameLifecycle::new(width, height, frames_in_flight);
        lifecycle.set_image_count(swapchain.image_count());

        self.context = Some(VulkanContext {
            textures: SlotMap::with_key(),
            default_texture: None,
            material_shader,
            vertex_buffer,
            index_buffer,
            command_buffers,
            frame_sync,
            swapchain,
            render_pass,
            lifecycle,
            frame_delta_time: 0.0,
            diffuse_accumulator: 0.0,
            device,
        });

        log::info!("Vulkan renderer initialized successfully");
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(context) = self.context.take() {
            log::info!("Cleaning up Vulkan resources...");
            drop(context);
            log::info!("Cleanup complete");
        }
    }

    fn resized(&mut self, width: u32, height: u32) {
        if let Some(context) = self.context.as_mut() {
            context.lifecycle.resized(width, height);
        }
    }

    fn begin_frame(&mut self, delta_time: f32) -> Result<bool> {
        let timeout = self.config.graphics.fence_timeout_ns;
        let context = self.context_mut()?;
        context.frame_delta_time = delta_time;

        if context.lifecycle.is_recreating() {
            context.device.wait_idle()?;
            log::info!("Recreating swapchain, skipping frame");
            return Ok(false);
        }

        if context.lifecycle.needs_recreation() {
            context.device.wait_idle()?;
            if context.recreate_swapchain()? {
                self.swapchain_recreations += 1;
            }
            return Ok(false);
        }

        // Wait for the frame that last used this slot
        let frame = context.lifecycle.current_frame();
        if !context.frame_sync[frame].in_flight.wait(timeout)? {
            log::warn!("In-flight fence wait failure, skipping frame");
            return Ok(false);
        }

        let image_available = context.frame_sync[frame].image_available;
        let Some((image_index, _suboptimal)) = context
            .swapchain
            .acquire_next_image(timeout, image_available)?
        else {
            log::debug!("Swapchain out of date on acquire");
            context.lifecycle.invalidate_swapchain();
            return Ok(false);
        };
        context.lifecycle.image_acquired(image_index);

        // Another slot may still be rendering into this image
        if let Some(owner) = context.lifecycle.image_owner(image_index) {
            if !context.frame_sync[owner].in_flight.wait(timeout)? {
                return Err(RendererError::FenceTimeout {
                    slot: owner,
                    image_index,
                }
                .into());
            }
        }

        let command_buffer = &mut context.command_buffers[image_index as usize];
        command_buffer.reset();
        command_buffer.begin(false)?;
        context.lifecycle.set_phase(FramePhase::Recording);

        // Flipped viewport so +Y is up
        let extent = context.swapchain.extent;
        let viewport = vk::Viewport {
            x: 0.0,
            y: extent.height as f32,
            width: extent.width as f32,
            height: -(extent.height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            context
                .device
                .device
                .cmd_set_viewport(command_buffer.handle, 0, &[viewport]);
            context
                .device
                .device
                .cmd_set_scissor(command_buffer.handle, 0, &[scissor]);
        }

        let framebuffer = context.swapchain.framebuffers[image_index as usize];
        context
            .render_pass
            .begin(command_buffer, framebuffer, extent);
        context.lifecycle.set_phase(FramePhase::InRenderpass);
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
        let context = self.context_mut()?;
        let frame = context.lifecycle.current_frame();
        let command_buffer = &context.command_buffers[context.lifecycle.image_index() as usize];

        context.material_shader.use_shader(command_buffer);
        context.material_shader.global_ubo.projection = projection;
        context.material_shader.global_ubo.view = view;
        context
            .material_shader
            .update_global_state(command_buffer, frame)
    }

    fn update_object(&mut self, data: &GeometryRenderData<'_>) -> Result<()> {
        let context = self.context_mut()?;
        let frame = context.lifecycle.current_frame();
        let command_buffer = &context.command_buffers[context.lifecycle.image_index() as usize];

        context.diffuse_accumulator += context.frame_delta_time;
        let shade = (context.diffuse_accumulator.sin() + 1.0) / 2.0;
        let diffuse_color = Vec4::new(shade, shade, shade, 1.0);

        context.material_shader.update_object(
            command_buffer,
            frame,
            data,
            diffuse_color,
            &context.textures,
            context.default_texture,
        )?;

        unsafe {
            let device = &context.device.device;
            device.cmd_bind_vertex_buffers(
                command_buffer.handle,
                0,
                &[context.vertex_buffer.handle],
                &[0],
            );
            device.cmd_bind_index_buffer(
                command_buffer.handle,
                context.index_buffer.handle,
                0,
                vk::IndexType::UINT32,
            );
            device.cmd_draw_indexed(command_buffer.handle, QUAD_INDEX_COUNT, 1, 0, 0, 0);
        }
        Ok(())
    }

    fn end_frame(&mut self, _delta_time: f32) -> Result<()> {
        let timeout = self.config.graphics.fence_timeout_ns;
        let context = self.context_mut()?;
        let frame = context.lifecycle.current_frame();
        let image_index = context.lifecycle.image_index();
        let command_buffer = &mut context.command_buffers[image_index as usize];

        context.render_pass.end(command_buffer);
        command_buffer.end()?;

        // Make sure the previous frame is not using this image
        if let Some(owner) = context.lifecycle.claim_image(image_index) {
            if !context.frame_sync[owner].in_flight.wait(timeout)? {
                return Err(RendererError::FenceTimeout {
                    slot: owner,
                    image_index,
                }
                .into());
            }
        }

        let sync = &mut context.frame_sync[frame];
        sync.in_flight.reset()?;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.queue_complete];
        let command_buffers = [command_buffer.handle];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            context.device.device.queue_submit(
                context.device.graphics_queue,
                &[submit_info.build()],
                sync.in_flight.handle,
            )
        }
        .context("Failed to submit frame command buffer")?;
        sync.in_flight.mark_submitted();
        command_buffer.update_submitted();
        context.lifecycle.set_phase(FramePhase::Submitted);

        let needs_recreation = context.swapchain.present(
            context.device.present_queue,
            image_index,
            &signal_semaphores,
        )?;
        if needs_recreation {
            log::debug!("Swapchain suboptimal or out of date on present");
            context.lifecycle.invalidate_swapchain();
        }
        context.lifecycle.set_phase(FramePhase::Presented);

        context.lifecycle.advance_frame();
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

        let context = self.context_mut()?;
        let internal = VulkanTexture::new(context.device.clone(), texture.width, texture.height, pixels)
            .with_context(|| format!("Failed to create texture '{}'", texture.name))?;

        texture.handle = Some(context.textures.insert(internal));
        texture.generation = next_generation(texture.generation);
        log::debug!(
            "Created texture '{}' {}x{} (generation {})",
            texture.name,
            texture.width,
            texture.height,
            texture.generation
        );
        Ok(())
    }

    fn destroy_texture(&mut self, texture: &mut Texture) {
        let Some(context) = self.context.as_mut() else {
            return;
        };
        if let Err(e) = context.device.wait_idle() {
            log::error!("Device wait idle failed: {:#}", e);
        }
        if let Some(handle) = texture.handle.take() {
            context.textures.remove(handle);
        }
    }

    fn set_default_texture(&mut self, texture: &Texture) {
        if let Some(context) = self.context.as_mut() {
            context.default_texture = texture.handle;
        }
    }

    fn acquire_object_resources(&mut self) -> Result<u32> {
        self.context_mut()?.material_shader.acquire_resources()
    }

    fn release_object_resources(&mut self, object_id: u32) {
        let Some(context) = self.context.as_mut() else {
            return;
        };
        if let Err(e) = context.device.wait_idle() {
            log::error!("Device wait idle failed: {:#}", e);
        }
        context.material_shader.release_resources(object_id);
    }

    fn invalidate_object_samplers(&mut self, object_id: u32) {
        if let Some(context) = self.context.as_mut() {
            context.material_shader.invalidate_samplers(object_id);
        }
    }

    fn stats(&self) -> BackendStats {
        let (descriptor_writes, objects_acquired) = self
            .context
            .as_ref()
            .map(|context| {
                (
                    context.material_shader.descriptor_writes(),
                    context.material_shader.objects_acquired(),
                )
            })
            .unwrap_or_default();

        BackendStats {
            frame_number: self.frame_number,
            swapchain_recreations: self.swapchain_recreations,
            descriptor_writes,
            objects_acquired,
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn allocate_graphics_command_buffers(
    device: &Arc<VulkanDevice>,
    count: usize,
) -> Result<Vec<CommandBuffer>> {
    (0..count)
        .map(|_| CommandBuffer::allocate(device.clone(), device.graphics_command_pool, true))
        .collect::<Result<Vec<_>>>()
        .context("Failed to allocate graphics command buffers")
}

/// Textured quad drawn for every object.
fn quad_geometry(size: f32) -> ([Vertex3d; 4], [u32; 6]) {
    let half = size * 0.5;
    let vertex = |x: f32, y: f32, u: f32, v: f32| Vertex3d {
        position: Vec3::new(x, y, 0.0),
        texcoord: Vec2::new(u, v),
    };
    (
        [
            vertex(-half, -half, 0.0, 0.0),
            vertex(half, half, 1.0, 1.0),
            vertex(-half, half, 0.0, 1.0),
            vertex(half, -half, 1.0, 0.0),
        ],
        [0, 1, 2, 0, 3, 1],
    )
}

fn create_test_geometry(device: &Arc<VulkanDevice>) -> Result<(Buffer, Buffer)> {
    let (vertices, indices) = quad_geometry(10.0);
    let pool = device.graphics_command_pool;
    let queue = device.graphics_queue;

    let vertex_buffer = Buffer::new(
        device.clone(),
        std::mem::size_of_val(&vertices) as vk::DeviceSize,
        vk::BufferUsageFlags::VERTEX_BUFFER
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        true,
    )
    .context("Error creating vertex buffer")?;
    vertex_buffer.upload_data_range(pool, queue, 0, &vertices)?;

    let index_buffer = Buffer::new(
        device.clone(),
        std::mem::size_of_val(&indices) as vk::DeviceSize,
        vk::BufferUsageFlags::INDEX_BUFFER
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        true,
    )
    .context("Error creating index buffer")?;
    index_buffer.upload_data_range(pool, queue, 0, &indices)?;

    Ok((vertex_buffer, index_buffer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_faces_the_camera() {
        let (vertices, indices) = quad_geometry(10.0);
        assert_eq!(vertices[0].position, Vec3::new(-5.0, -5.0, 0.0));
        assert_eq!(vertices[1].texcoord, Vec2::new(1.0, 1.0));

        // counter-clockwise when viewed from +Z
        for triangle in indices.chunks(3) {
            let a = vertices[triangle[0] as usize].position;
            let b = vertices[triangle[1] as usize].position;
            let c = vertices[triangle[2] as usize].position;
            assert!((b - a).cross(c - a).z > 0.0);
        }
    }
}
