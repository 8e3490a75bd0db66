// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync
// Critical for correct multi-frame rendering

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

pub struct Fence {
    pub handle: vk::Fence,
    pub is_signaled: bool,
    device: Arc<VulkanDevice>,
}

impl Fence {
    pub fn new(device: Arc<VulkanDevice>, signaled: bool) -> Result<Self> {
        let mut fence_info = vk::FenceCreateInfo::builder();
        if signaled {
            fence_info = fence_info.flags(vk::FenceCreateFlags::SIGNALED);
        }

        let handle = unsafe { device.device.create_fence(&fence_info, None) }
            .context("Failed to create fence")?;

        Ok(Self {
            handle,
            is_signaled: signaled,
            device,
        })
    }

    /// Wait until signaled. A timeout is reported as `Ok(false)`.
    pub fn wait(&mut self, timeout_ns: u64) -> Result<bool> {
        if self.is_signaled {
            return Ok(true);
        }

        match unsafe { self.device.device.wait_for_fences(&[self.handle], true, timeout_ns) } {
            Ok(()) => {
                self.is_signaled = true;
                Ok(true)
            }
            Err(vk::Result::TIMEOUT) => {
                log::warn!("Fence wait timed out");
                Ok(false)
            }
            Err(e) => Err(e).context("Fence wait failed"),
        }
    }

    pub fn reset(&mut self) -> Result<()> {
        if self.is_signaled {
            unsafe { self.device.device.reset_fences(&[self.handle]) }
                .context("Failed to reset fence")?;
            self.is_signaled = false;
        }
        Ok(())
    }

    /// The fence was handed to a queue submission.
    pub fn mark_submitted(&mut self) {
        self.is_signaled = false;
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_fence(self.handle, None) };
    }
}

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub queue_complete: vk::Semaphore,
    pub in_flight: Fence,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();

        unsafe {
            Ok(Self {
                image_available: device.device.create_semaphore(&semaphore_info, None)?,
                queue_complete: device.device.create_semaphore(&semaphore_info, None)?,
                // Start signaled so the first frame does not block
                in_flight: Fence::new(device.clone(), true)?,
                device: device.clone(),
            })
        }
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_semaphore(self.image_available, None);
            self.device
                .device
                .destroy_semaphore(self.queue_complete, None);
        }
    }
}
