// Builtin material shader
//
// Set 0: global uniform buffer (projection/view), one region per frame slot.
// Set 1: per-object uniform buffer + diffuse sampler, one descriptor set per
// object per frame slot. Object descriptors are only rewritten when the
// resource behind them changed (see `ObjectDescriptorState`).

use anyhow::{Context, Result};
use ash::vk;
use glam::{Mat4, Vec4};
use slotmap::SlotMap;
use std::sync::Arc;

use super::buffer::Buffer;
use super::command_buffer::CommandBuffer;
use super::pipeline::{Pipeline, PipelineDesc};
use super::shader::ShaderStage;
use super::texture::VulkanTexture;
use super::VulkanDevice;
use crate::config::AssetConfig;
use crate::renderer::object_state::{ObjectSlots, SamplerSource};
use crate::renderer::types::{
    GeometryRenderData, GlobalUniformObject, ObjectUniformObject, Vertex3d,
    OBJECT_SAMPLER_COUNT,
};
use crate::renderer::TextureHandle;

pub const BUILTIN_SHADER_NAME_MATERIAL: &str = "Builtin.MaterialShader";

/// `size` rounded up to a multiple of `alignment`.
pub fn uniform_stride(size: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return size;
    }
    size.div_ceil(alignment) * alignment
}

/// Pool sizes for `max_objects` objects with one set per frame slot each.
pub fn object_pool_sizes(max_objects: u32, frames_in_flight: u32) -> [vk::DescriptorPoolSize; 2] {
    let sets = max_objects * frames_in_flight;
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: sets,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: OBJECT_SAMPLER_COUNT as u32 * sets,
        },
    ]
}

/// Attribute layout of [`Vertex3d`].
pub fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 2] {
    [
        // position
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        },
        // texcoord
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: std::mem::size_of::<glam::Vec3>() as u32,
        },
    ]
}

pub struct MaterialShader {
    device: Arc<VulkanDevice>,
    _stages: Vec<ShaderStage>,
    pub pipeline: Pipeline,

    global_set_layout: vk::DescriptorSetLayout,
    global_pool: vk::DescriptorPool,
    global_sets: Vec<vk::DescriptorSet>,
    global_uniform_buffer: Buffer,
    global_stride: u64,
    pub global_ubo: GlobalUniformObject,

    object_set_layout: vk::DescriptorSetLayout,
    object_pool: vk::DescriptorPool,
    object_uniform_buffer: Buffer,
    object_stride: u64,
    object_slots: ObjectSlots,
    /// Descriptor sets per object id, one per frame slot. Empty when released.
    object_sets: Vec<Vec<vk::DescriptorSet>>,

    frames_in_flight: usize,
    descriptor_writes: u64,
}

impl MaterialShader {
    pub fn new(
        device: Arc<VulkanDevice>,
        assets: &AssetConfig,
        render_pass: vk::RenderPass,
        frames_in_flight: usize,
        max_objects: u32,
    ) -> Result<Self> {
        let stages = [
            ("vert", vk::ShaderStageFlags::VERTEX),
            ("frag", vk::ShaderStageFlags::FRAGMENT),
        ]
        .into_iter()
        .map(|(name, stage)| {
            ShaderStage::load(device.clone(), assets, BUILTIN_SHADER_NAME_MATERIAL, name, stage)
                .with_context(|| {
                    format!(
                        "Unable to create {} shader module for '{}'",
                        name, BUILTIN_SHADER_NAME_MATERIAL
                    )
                })
        })
        .collect::<Result<Vec<_>>>()?;

        let frames = frames_in_flight as u32;

        // Global descriptors
        let global_bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_count(1)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build()];
        let global_layout_info =
            vk::DescriptorSetLayoutCreateInfo::builder().bindings(&global_bindings);
        let global_set_layout =
            unsafe { device.device.create_descriptor_set_layout(&global_layout_info, None) }
                .context("Failed to create global descriptor set layout")?;

        let global_pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: frames,
        }];
        let global_pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&global_pool_sizes)
            .max_sets(frames);
        let global_pool = unsafe { device.device.create_descriptor_pool(&global_pool_info, None) }
            .context("Failed to create global descriptor pool")?;

        // Object descriptors: binding 0 uniform buffer, binding 1 diffuse sampler
        let object_bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_count(1)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_count(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
        ];
        let object_layout_info =
            vk::DescriptorSetLayoutCreateInfo::builder().bindings(&object_bindings);
        let object_set_layout =
            unsafe { device.device.create_descriptor_set_layout(&object_layout_info, None) }
                .context("Failed to create object descriptor set layout")?;

        let object_pool_sizes = object_pool_sizes(max_objects, frames);
        let object_pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .pool_sizes(&object_pool_sizes)
            .max_sets(max_objects * frames);
        let object_pool = unsafe { device.device.create_descriptor_pool(&object_pool_info, None) }
            .context("Failed to create object descriptor pool")?;

        let attributes = vertex_attributes();
        let set_layouts = [global_set_layout, object_set_layout];
        let pipeline = Pipeline::new(
            device.clone(),
            &PipelineDesc {
                render_pass,
                vertex_stride: std::mem::size_of::<Vertex3d>() as u32,
                attributes: &attributes,
                set_layouts: &set_layouts,
                stages: &stages,
                wireframe: false,
            },
        )
        .with_context(|| {
            format!(
                "Unable to create graphics pipeline for '{}'",
                BUILTIN_SHADER_NAME_MATERIAL
            )
        })?;

        // Uniform buffers
        let alignment = device.properties.limits.min_uniform_buffer_offset_alignment;
        let global_stride =
            uniform_stride(std::mem::size_of::<GlobalUniformObject>() as u64, alignment);
        let object_stride =
            uniform_stride(std::mem::size_of::<ObjectUniformObject>() as u64, alignment);

        let device_local_bits = if device.supports_device_local_host_visible {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        } else {
            vk::MemoryPropertyFlags::empty()
        };
        let global_uniform_buffer = Buffer::new(
            device.clone(),
            global_stride * frames as u64,
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | device_local_bits,
            true,
        )
        .context("Unable to create global uniform buffer")?;

        let object_uniform_buffer = Buffer::new(
            device.clone(),
            object_stride * max_objects as u64,
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            true,
        )
        .context("Unable to create object uniform buffer")?;

        let global_layouts = vec![global_set_layout; frames_in_flight];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(global_pool)
            .set_layouts(&global_layouts);
        let global_sets = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate global descriptor sets")?;

        log::info!(
            "Material shader created ({} frames in flight, {} objects max)",
            frames_in_flight,
            max_objects
        );

        Ok(Self {
            device,
            _stages: stages,
            pipeline,
            global_set_layout,
            global_pool,
            global_sets,
            global_uniform_buffer,
            global_stride,
            global_ubo: GlobalUniformObject::default(),
            object_set_layout,
            object_pool,
            object_uniform_buffer,
            object_stride,
            object_slots: ObjectSlots::new(max_objects),
            object_sets: vec![Vec::new(); max_objects as usize],
            frames_in_flight,
            descriptor_writes: 0,
        })
    }

    pub fn use_shader(&self, command_buffer: &CommandBuffer) {
        self.pipeline
            .bind(command_buffer, vk::PipelineBindPoint::GRAPHICS);
    }

    /// Upload `global_ubo` into this frame slot's region and bind set 0.
    pub fn update_global_state(&mut self, command_buffer: &CommandBuffer, frame: usize) -> Result<()> {
        let global_set = self.global_sets[frame];
        let range = std::mem::size_of::<GlobalUniformObject>() as u64;
        let offset = self.global_stride * frame as u64;

        self.global_uniform_buffer
            .load_data(offset, std::slice::from_ref(&self.global_ubo))?;

        let buffer_infos = [vk::DescriptorBufferInfo {
            buffer: self.global_uniform_buffer.handle,
            offset,
            range,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(global_set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_infos)
            .build();

        unsafe {
            self.device.device.update_descriptor_sets(&[write], &[]);
            self.device.device.cmd_bind_descriptor_sets(
                command_buffer.handle,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                0,
                &[global_set],
                &[],
            );
        }
        Ok(())
    }

    /// Push the model matrix, refresh stale object descriptors and bind set 1.
    pub fn update_object(
        &mut self,
        command_buffer: &CommandBuffer,
        frame: usize,
        data: &GeometryRenderData<'_>,
        diffuse_color: Vec4,
        textures: &SlotMap<TextureHandle, VulkanTexture>,
        default_texture: Option<TextureHandle>,
    ) -> Result<()> {
        unsafe {
            self.device.device.cmd_push_constants(
                command_buffer.handle,
                self.pipeline.layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of::<Mat4>(&data.model),
            );
        }

        let object_id = data.object_id;
        let object_set = self
            .object_sets
            .get(object_id as usize)
            .and_then(|sets| sets.get(frame))
            .copied()
            .with_context(|| format!("Object {} has no acquired resources", object_id))?;
        let state = self
            .object_slots
            .state_mut(object_id)
            .with_context(|| format!("Object {} has no acquired resources", object_id))?;

        // Binding 0: object uniform buffer
        let range = std::mem::size_of::<ObjectUniformObject>() as u64;
        let offset = self.object_stride * object_id as u64;
        let object_ubo = ObjectUniformObject::with_diffuse(diffuse_color);
        self.object_uniform_buffer
            .load_data(offset, std::slice::from_ref(&object_ubo))?;

        let buffer_infos = [vk::DescriptorBufferInfo {
            buffer: self.object_uniform_buffer.handle,
            offset,
            range,
        }];
        let mut image_infos = [vk::DescriptorImageInfo::default(); OBJECT_SAMPLER_COUNT];
        let mut writes = Vec::with_capacity(1 + OBJECT_SAMPLER_COUNT);

        if state.sync_uniform(frame) {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(object_set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_infos)
                    .build(),
            );
        }

        // Binding 1..: samplers
        let mut sampler_bindings = Vec::with_capacity(OBJECT_SAMPLER_COUNT);
        for (sampler_index, texture) in data.textures.iter().enumerate() {
            let binding = 1 + sampler_index;
            let generation = texture.map(|texture| texture.generation);
            let Some(source) = state.pending_sampler(binding, frame, generation) else {
                continue;
            };

            let handle = match source {
                SamplerSource::Requested => texture.and_then(|texture| texture.handle),
                SamplerSource::Default => default_texture,
            };
            let Some(internal) = handle.and_then(|handle| textures.get(handle)) else {
                log::warn!(
                    "Object {} sampler {} has no GPU texture to bind",
                    object_id,
                    sampler_index
                );
                continue;
            };

            image_infos[sampler_index] = vk::DescriptorImageInfo {
                sampler: internal.sampler,
                image_view: internal.view(),
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            };
            sampler_bindings.push((binding, sampler_index, generation));
        }

        for &(binding, sampler_index, _) in &sampler_bindings {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(object_set)
                    .dst_binding(binding as u32)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_infos[sampler_index..sampler_index + 1])
                    .build(),
            );
        }

        if !writes.is_empty() {
            unsafe { self.device.device.update_descriptor_sets(&writes, &[]) };
            self.descriptor_writes += writes.len() as u64;
        }
        for (binding, _, generation) in sampler_bindings {
            state.mark_sampler(binding, frame, generation);
        }

        unsafe {
            self.device.device.cmd_bind_descriptor_sets(
                command_buffer.handle,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                1,
                &[object_set],
                &[],
            );
        }
        Ok(())
    }

    pub fn invalidate_samplers(&mut self, object_id: u32) {
        if let Some(state) = self.object_slots.state_mut(object_id) {
            state.invalidate_samplers();
        }
    }

    /// Reserve an object slot and allocate its per-frame descriptor sets.
    pub fn acquire_resources(&mut self) -> Result<u32> {
        let object_id = self.object_slots.acquire()?;

        let layouts = vec![self.object_set_layout; self.frames_in_flight];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.object_pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate object descriptor sets")?;

        self.object_sets[object_id as usize] = sets;
        Ok(object_id)
    }

    /// Free the object's descriptor sets. The slot itself is not reused.
    pub fn release_resources(&mut self, object_id: u32) {
        let Some(sets) = self.object_sets.get_mut(object_id as usize) else {
            return;
        };
        if !sets.is_empty() {
            if let Err(e) = unsafe {
                self.device
                    .device
                    .free_descriptor_sets(self.object_pool, sets)
            } {
                log::error!("Failed to free descriptor sets: {:?}", e);
            }
            sets.clear();
        }
        self.object_slots.release(object_id);
    }

    pub fn objects_acquired(&self) -> u32 {
        self.object_slots.acquired()
    }

    pub fn descriptor_writes(&self) -> u64 {
        self.descriptor_writes
    }
}

impl Drop for MaterialShader {
    fn drop(&mut self) {
        unsafe {
            let device = &self.device.device;
            device.destroy_descriptor_pool(self.object_pool, None);
            device.destroy_descriptor_set_layout(self.object_set_layout, None);
            device.destroy_descriptor_pool(self.global_pool, None);
            device.destroy_descriptor_set_layout(self.global_set_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_rounds_up_to_alignment() {
        assert_eq!(uniform_stride(64, 256), 256);
        assert_eq!(uniform_stride(256, 256), 256);
        assert_eq!(uniform_stride(257, 256), 512);
        assert_eq!(uniform_stride(64, 16), 64);
        assert_eq!(uniform_stride(64, 0), 64);
    }

    #[test]
    fn object_pool_covers_every_frame_slot() {
        let sizes = object_pool_sizes(1024, 3);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 3072);
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[1].descriptor_count, 3072);
    }

    #[test]
    fn vertex_attributes_match_vertex_layout() {
        let attributes = vertex_attributes();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[1].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(std::mem::size_of::<Vertex3d>(), 20);
    }
}
