// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen, plus
// the depth attachment and one framebuffer per image.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use super::image::{Image, ImageDesc};
use super::VulkanDevice;

/// Create one value per item. If a creation fails, the values already made
/// are passed to `destroy` before the error is returned.
fn create_each<T, U>(
    items: &[T],
    mut create: impl FnMut(&T) -> Result<U>,
    mut destroy: impl FnMut(U),
) -> Result<Vec<U>> {
    let mut created = Vec::with_capacity(items.len());
    for item in items {
        match create(item) {
            Ok(value) => created.push(value),
            Err(e) => {
                created.into_iter().for_each(&mut destroy);
                return Err(e);
            }
        }
    }
    Ok(created)
}

/// min + 1 images, capped by the surface maximum (0 means unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && image_count > caps.max_image_count {
        image_count = caps.max_image_count;
    }
    image_count
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// Prefer SRGB, otherwise take whatever the surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// The preferred mode if supported, otherwise FIFO (always available).
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub depth_attachment: Image,
    pub framebuffers: Vec<vk::Framebuffer>,
    preferred_present_mode: vk::PresentModeKHR,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        width: u32,
        height: u32,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let swapchain_loader = khr::Swapchain::new(&device.instance, &device.device);
        let parts = Self::build(
            &device,
            &swapchain_loader,
            width,
            height,
            preferred_present_mode,
            vk::SwapchainKHR::null(),
        )?;

        Ok(Self {
            swapchain: parts.swapchain,
            swapchain_loader,
            images: parts.images,
            image_views: parts.image_views,
            format: parts.format,
            extent: parts.extent,
            depth_attachment: parts.depth_attachment,
            framebuffers: Vec::new(),
            preferred_present_mode,
            device,
        })
    }

    /// Rebuild for a new size. Framebuffers must be recreated afterwards.
    /// The caller waits for device idle first.
    pub fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        self.destroy_framebuffers();

        let parts = Self::build(
            &self.device,
            &self.swapchain_loader,
            width,
            height,
            self.preferred_present_mode,
            self.swapchain,
        )?;

        self.destroy_swapchain();
        self.swapchain = parts.swapchain;
        self.images = parts.images;
        self.image_views = parts.image_views;
        self.format = parts.format;
        self.extent = parts.extent;
        // old depth attachment drops here
        self.depth_attachment = parts.depth_attachment;
        Ok(())
    }

    fn build(
        device: &Arc<VulkanDevice>,
        swapchain_loader: &khr::Swapchain,
        width: u32,
        height: u32,
        preferred_present_mode: vk::PresentModeKHR,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<SwapchainParts> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let surface_caps = device.surface_capabilities()?;
        let formats = device.surface_formats()?;
        let present_modes = device.surface_present_modes()?;

        let surface_format =
            choose_surface_format(&formats).context("No suitable surface format")?;
        let present_mode = choose_present_mode(&present_modes, preferred_present_mode);
        log::info!("Present mode: {:?}", present_mode);

        let extent = choose_extent(&surface_caps, width, height);
        let image_count = choose_image_count(&surface_caps);

        let family_indices = [device.graphics_queue_family, device.present_queue_family];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        create_info = if device.graphics_queue_family != device.present_queue_family {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let attachments =
            Self::build_attachments(device, swapchain_loader, swapchain, surface_format.format, extent);
        match attachments {
            Ok((images, image_views, depth_attachment)) => Ok(SwapchainParts {
                swapchain,
                images,
                image_views,
                format: surface_format.format,
                extent,
                depth_attachment,
            }),
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                Err(e)
            }
        }
    }

    /// Images, color views and depth attachment of a fresh swapchain.
    /// Views already created are destroyed if a later step fails.
    fn build_attachments(
        device: &Arc<VulkanDevice>,
        swapchain_loader: &khr::Swapchain,
        swapchain: vk::SwapchainKHR,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<(Vec<vk::Image>, Vec<vk::ImageView>, Image)> {
        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;
        log::info!("Created swapchain with {} images", images.len());

        let destroy_view = |view: vk::ImageView| unsafe { device.device.destroy_image_view(view, None) };
        let image_views = create_each(
            &images,
            |&image| {
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe { device.device.create_image_view(&create_info, None) }
                    .context("Failed to create image view")
            },
            destroy_view,
        )?;

        let depth_attachment = Image::new(
            device.clone(),
            &ImageDesc {
                width: extent.width,
                height: extent.height,
                format: device.depth_format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                memory_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                view_aspect: Some(vk::ImageAspectFlags::DEPTH),
            },
        )
        .context("Failed to create depth attachment");

        match depth_attachment {
            Ok(depth_attachment) => Ok((images, image_views, depth_attachment)),
            Err(e) => {
                image_views.into_iter().for_each(destroy_view);
                Err(e)
            }
        }
    }

    /// One framebuffer per swapchain image, sharing the depth attachment.
    pub fn create_framebuffers(&mut self, render_pass: vk::RenderPass) -> Result<()> {
        self.destroy_framebuffers();
        let depth_view = self
            .depth_attachment
            .view
            .context("Depth attachment has no view")?;

        for &image_view in &self.image_views {
            let attachments = [image_view, depth_view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            let framebuffer =
                unsafe { self.device.device.create_framebuffer(&framebuffer_info, None) }
                    .context("Failed to create framebuffer")?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire next image for rendering.
    ///
    /// `Ok(None)` means the swapchain is out of date and must be recreated.
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<Option<(u32, bool)>> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(Some((index, suboptimal))),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Present rendered image to screen.
    ///
    /// Returns true when the swapchain is suboptimal or out of date.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }

    fn destroy_framebuffers(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { self.device.device.destroy_framebuffer(framebuffer, None) };
        }
    }

    fn destroy_swapchain(&mut self) {
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

struct SwapchainParts {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    depth_attachment: Image,
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_framebuffers();
        self.destroy_swapchain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn image_count_honours_surface_bounds() {
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(2, 2)), 2);
        // zero maximum means no limit
        assert_eq!(choose_image_count(&caps(3, 0)), 4);
    }

    #[test]
    fn extent_uses_current_or_clamps() {
        let mut surface = caps(2, 3);
        assert_eq!(
            choose_extent(&surface, 8000, 720),
            vk::Extent2D {
                width: 4096,
                height: 720
            }
        );

        surface.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(choose_extent(&surface, 1280, 720), surface.current_extent);
    }

    #[test]
    fn surface_format_prefers_srgb() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[unorm, srgb]), Some(srgb));
        assert_eq!(choose_surface_format(&[unorm]), Some(unorm));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn partial_creation_destroys_what_was_made() {
        let mut destroyed = Vec::new();
        let result = create_each(
            &[1, 2, 3, 4],
            |&n| {
                if n == 3 {
                    anyhow::bail!("no more views");
                }
                Ok(n * 10)
            },
            |value| destroyed.push(value),
        );
        assert!(result.is_err());
        assert_eq!(destroyed, vec![10, 20]);
    }

    #[test]
    fn full_creation_destroys_nothing() {
        let mut destroyed: Vec<i32> = Vec::new();
        let created = create_each(&[1, 2], |&n| Ok(n + 1), |value| destroyed.push(value)).unwrap();
        assert_eq!(created, vec![2, 3]);
        assert!(destroyed.is_empty());
    }
}
