// Command buffers with tracked recording state

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    Ready,
    Recording,
    InRenderPass,
    RecordingEnded,
    Submitted,
    NotAllocated,
}

pub struct CommandBuffer {
    pub handle: vk::CommandBuffer,
    pub state: CommandBufferState,
    pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandBuffer {
    pub fn allocate(device: Arc<VulkanDevice>, pool: vk::CommandPool, primary: bool) -> Result<Self> {
        let level = if primary {
            vk::CommandBufferLevel::PRIMARY
        } else {
            vk::CommandBufferLevel::SECONDARY
        };
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(level)
            .command_buffer_count(1);

        let handle = unsafe { device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffer")?[0];

        Ok(Self {
            handle,
            state: CommandBufferState::Ready,
            pool,
            device,
        })
    }

    pub fn begin(&mut self, single_use: bool) -> Result<()> {
        let mut flags = vk::CommandBufferUsageFlags::empty();
        if single_use {
            flags |= vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        }
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);

        unsafe { self.device.device.begin_command_buffer(self.handle, &begin_info) }
            .context("Failed to begin command buffer")?;
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        unsafe { self.device.device.end_command_buffer(self.handle) }
            .context("Failed to end command buffer")?;
        self.state = CommandBufferState::RecordingEnded;
        Ok(())
    }

    pub fn update_submitted(&mut self) {
        self.state = CommandBufferState::Submitted;
    }

    pub fn reset(&mut self) {
        self.state = CommandBufferState::Ready;
    }

    /// Return the buffer to the pool. Leaves the handle null.
    pub fn free(&mut self) {
        if self.state == CommandBufferState::NotAllocated {
            return;
        }
        unsafe {
            self.device
                .device
                .free_command_buffers(self.pool, &[self.handle]);
        }
        self.handle = vk::CommandBuffer::null();
        self.state = CommandBufferState::NotAllocated;
    }

    /// Allocate and begin a one-time-submit buffer.
    pub fn allocate_and_begin_single_use(
        device: Arc<VulkanDevice>,
        pool: vk::CommandPool,
    ) -> Result<Self> {
        let mut command_buffer = Self::allocate(device, pool, true)?;
        command_buffer.begin(true)?;
        Ok(command_buffer)
    }

    /// End, submit and wait for the queue, then free the buffer.
    pub fn end_single_use(mut self, queue: vk::Queue) -> Result<()> {
        self.end()?;

        let command_buffers = [self.handle];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        unsafe {
            self.device
                .device
                .queue_submit(queue, &[submit_info.build()], vk::Fence::null())
                .context("Failed to submit single-use command buffer")?;
            self.device.device.queue_wait_idle(queue)?;
        }
        Ok(())
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        self.free();
    }
}
