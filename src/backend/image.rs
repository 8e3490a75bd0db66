// 2D images with their own memory and an optional view
//
// Used for the depth attachment and for texture storage.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::buffer::find_memory_type;
use super::command_buffer::CommandBuffer;
use super::VulkanDevice;

/// Creation parameters for [`Image::new`].
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub memory_flags: vk::MemoryPropertyFlags,
    /// Create a view with this aspect right away.
    pub view_aspect: Option<vk::ImageAspectFlags>,
}

pub struct Image {
    pub handle: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: Option<vk::ImageView>,
    pub width: u32,
    pub height: u32,
    device: Arc<VulkanDevice>,
}

impl Image {
    pub fn new(device: Arc<VulkanDevice>, desc: &ImageDesc) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe { device.device.create_image(&image_info, None) }
            .context("Failed to create image")?;

        let requirements = unsafe { device.device.get_image_memory_requirements(handle) };
        let memory_type_index = match find_memory_type(
            &device.memory_properties,
            requirements.memory_type_bits,
            desc.memory_flags,
        ) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.device.destroy_image(handle, None) };
                return Err(e.into());
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.device.destroy_image(handle, None) };
                return Err(e).context("Failed to allocate image memory");
            }
        };

        let mut image = Self {
            handle,
            memory,
            view: None,
            width: desc.width,
            height: desc.height,
            device,
        };

        unsafe { image.device.device.bind_image_memory(handle, memory, 0) }
            .context("Failed to bind image memory")?;

        if let Some(aspect) = desc.view_aspect {
            image.create_view(desc.format, aspect)?;
        }

        Ok(image)
    }

    pub fn create_view(&mut self, format: vk::Format, aspect: vk::ImageAspectFlags) -> Result<()> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(self.handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { self.device.device.create_image_view(&view_info, None) }
            .context("Failed to create image view")?;
        self.view = Some(view);
        Ok(())
    }

    /// Record a layout transition. Only the two upload transitions are supported.
    pub fn transition_layout(
        &self,
        command_buffer: &CommandBuffer,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> Result<()> {
        let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
            _ => anyhow::bail!(
                "Unsupported layout transition {:?} -> {:?}",
                old_layout,
                new_layout
            ),
        };

        let family = self.device.graphics_queue_family;
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(family)
            .dst_queue_family_index(family)
            .image(self.handle)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build();

        unsafe {
            self.device.device.cmd_pipeline_barrier(
                command_buffer.handle,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        Ok(())
    }

    /// Record a copy of tightly packed pixels from `buffer` into mip 0.
    pub fn copy_from_buffer(&self, buffer: vk::Buffer, command_buffer: &CommandBuffer) {
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: self.width,
                height: self.height,
                depth: 1,
            })
            .build();

        unsafe {
            self.device.device.cmd_copy_buffer_to_image(
                command_buffer.handle,
                buffer,
                self.handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if let Some(view) = self.view.take() {
                self.device.device.destroy_image_view(view, None);
            }
            self.device.device.free_memory(self.memory, None);
            self.device.device.destroy_image(self.handle, None);
        }
    }
}
