// GPU side of a texture: sampled image plus sampler

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::buffer::Buffer;
use super::command_buffer::CommandBuffer;
use super::image::{Image, ImageDesc};
use super::VulkanDevice;

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

const MAX_ANISOTROPY: f32 = 16.0;

/// Anisotropy level for texture samplers, or `None` when the device was
/// created without the feature.
pub fn sampler_anisotropy(
    features: &vk::PhysicalDeviceFeatures,
    limits: &vk::PhysicalDeviceLimits,
) -> Option<f32> {
    (features.sampler_anisotropy == vk::TRUE)
        .then(|| limits.max_sampler_anisotropy.min(MAX_ANISOTROPY))
}

pub struct VulkanTexture {
    pub image: Image,
    pub sampler: vk::Sampler,
    device: Arc<VulkanDevice>,
}

impl VulkanTexture {
    /// Upload tightly packed RGBA8 pixels through a staging buffer.
    pub fn new(device: Arc<VulkanDevice>, width: u32, height: u32, pixels: &[u8]) -> Result<Self> {
        let staging = Buffer::new(
            device.clone(),
            pixels.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            true,
        )?;
        staging.load_data(0, pixels)?;

        let image = Image::new(
            device.clone(),
            &ImageDesc {
                width,
                height,
                format: TEXTURE_FORMAT,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                memory_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                view_aspect: Some(vk::ImageAspectFlags::COLOR),
            },
        )?;

        let pool = device.graphics_command_pool;
        let queue = device.graphics_queue;
        let command_buffer = CommandBuffer::allocate_and_begin_single_use(device.clone(), pool)?;

        image.transition_layout(
            &command_buffer,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        image.copy_from_buffer(staging.handle, &command_buffer);
        image.transition_layout(
            &command_buffer,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;

        command_buffer.end_single_use(queue)?;

        let anisotropy = sampler_anisotropy(&device.features, &device.properties.limits);
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);

        let sampler = unsafe { device.device.create_sampler(&sampler_info, None) }
            .context("Failed to create texture sampler")?;

        Ok(Self {
            image,
            sampler,
            device,
        })
    }

    pub fn view(&self) -> vk::ImageView {
        self.image.view.unwrap_or_default()
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_sampler(self.sampler, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anisotropy_follows_enabled_feature() {
        let limits = vk::PhysicalDeviceLimits {
            max_sampler_anisotropy: 8.0,
            ..Default::default()
        };
        let mut features = vk::PhysicalDeviceFeatures::default();
        assert_eq!(sampler_anisotropy(&features, &limits), None);

        features.sampler_anisotropy = vk::TRUE;
        assert_eq!(sampler_anisotropy(&features, &limits), Some(8.0));

        let generous = vk::PhysicalDeviceLimits {
            max_sampler_anisotropy: 64.0,
            ..Default::default()
        };
        assert_eq!(sampler_anisotropy(&features, &generous), Some(16.0));
    }
}
