// GPU buffers for vertex, index, uniform and staging data
//
// Memory is allocated per buffer and bound explicitly. Host writes go through
// map/copy/unmap with no flush, so mappable buffers must be HOST_COHERENT.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

use super::command_buffer::CommandBuffer;
use super::VulkanDevice;
use crate::renderer::RendererError;

/// Find a memory type allowed by `type_filter` that has all of `properties`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32, RendererError> {
    for i in 0..memory_properties.memory_type_count {
        let has_type = (type_filter & (1 << i)) != 0;
        let has_properties = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(properties);

        if has_type && has_properties {
            return Ok(i);
        }
    }

    log::warn!("Unable to find suitable memory type");
    Err(RendererError::NoMemoryType {
        type_filter,
        properties: format!("{:?}", properties),
    })
}

pub struct Buffer {
    pub handle: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_flags: vk::MemoryPropertyFlags,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
        bind_on_create: bool,
    ) -> Result<Self> {
        let (handle, memory) = Self::create_raw(&device, size, usage, memory_flags)?;

        let buffer = Self {
            handle,
            memory,
            size,
            usage,
            memory_flags,
            device,
        };

        if bind_on_create {
            buffer.bind(0)?;
        }
        Ok(buffer)
    }

    /// Create a buffer handle and allocate its memory, without binding.
    fn create_raw(
        device: &VulkanDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(handle) };

        let memory_index = match find_memory_type(
            &device.memory_properties,
            requirements.memory_type_bits,
            memory_flags,
        ) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.device.destroy_buffer(handle, None) };
                return Err(e.into());
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_index);

        let memory = match unsafe { device.device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.device.destroy_buffer(handle, None) };
                return Err(e).context("Failed to allocate buffer memory");
            }
        };

        Ok((handle, memory))
    }

    pub fn bind(&self, offset: vk::DeviceSize) -> Result<()> {
        unsafe {
            self.device
                .device
                .bind_buffer_memory(self.handle, self.memory, offset)
        }
        .context("Failed to bind buffer memory")
    }

    /// Grow or shrink the buffer, keeping its current contents.
    ///
    /// The memory type is chosen again for the new size. Blocks until the
    /// device is idle. On failure the old buffer is left untouched.
    pub fn resize(
        &mut self,
        new_size: vk::DeviceSize,
        queue: vk::Queue,
        pool: vk::CommandPool,
    ) -> Result<()> {
        let (handle, memory) =
            Self::create_raw(&self.device, new_size, self.usage, self.memory_flags)?;

        let device = &self.device.device;
        let copied = unsafe { device.bind_buffer_memory(handle, memory, 0) }
            .context("Failed to bind resized buffer memory")
            .and_then(|()| {
                copy_buffer(
                    &self.device,
                    pool,
                    queue,
                    self.handle,
                    0,
                    handle,
                    0,
                    self.size.min(new_size),
                )
            })
            // make sure nothing still uses the old buffer
            .and_then(|()| self.device.wait_idle());

        if let Err(e) = copied {
            unsafe {
                device.free_memory(memory, None);
                device.destroy_buffer(handle, None);
            }
            return Err(e);
        }

        unsafe {
            device.free_memory(self.memory, None);
            device.destroy_buffer(self.handle, None);
        }

        self.handle = handle;
        self.memory = memory;
        self.size = new_size;
        Ok(())
    }

    /// Copy `data` into the buffer at `offset`. Requires host-coherent memory.
    pub fn load_data<T: Pod>(&self, offset: vk::DeviceSize, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let size = bytes.len() as vk::DeviceSize;

        unsafe {
            let ptr = self
                .device
                .device
                .map_memory(self.memory, offset, size, vk::MemoryMapFlags::empty())
                .context("Failed to map buffer memory")? as *mut u8;

            ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
            self.device.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Device-side copy of `size` bytes into `dest`.
    pub fn copy_to(
        &self,
        pool: vk::CommandPool,
        queue: vk::Queue,
        source_offset: vk::DeviceSize,
        dest: &Buffer,
        dest_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<()> {
        copy_buffer(
            &self.device,
            pool,
            queue,
            self.handle,
            source_offset,
            dest.handle,
            dest_offset,
            size,
        )
    }

    /// Upload through a transient host-visible staging buffer.
    pub fn upload_data_range<T: Pod>(
        &self,
        pool: vk::CommandPool,
        queue: vk::Queue,
        offset: vk::DeviceSize,
        data: &[T],
    ) -> Result<()> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let staging = Buffer::new(
            self.device.clone(),
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            true,
        )?;
        staging.load_data(0, data)?;
        staging.copy_to(pool, queue, 0, self, offset, size)
    }
}

#[allow(clippy::too_many_arguments)]
fn copy_buffer(
    device: &Arc<VulkanDevice>,
    pool: vk::CommandPool,
    queue: vk::Queue,
    source: vk::Buffer,
    source_offset: vk::DeviceSize,
    dest: vk::Buffer,
    dest_offset: vk::DeviceSize,
    size: vk::DeviceSize,
) -> Result<()> {
    unsafe { device.device.queue_wait_idle(queue) }?;

    let mut command_buffer = CommandBuffer::allocate_and_begin_single_use(device.clone(), pool)?;

    let region = vk::BufferCopy {
        src_offset: source_offset,
        dst_offset: dest_offset,
        size,
    };
    unsafe {
        device
            .device
            .cmd_copy_buffer(command_buffer.handle, source, dest, &[region]);
    }

    command_buffer.end_single_use(queue)
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.free_memory(self.memory, None);
            self.device.device.destroy_buffer(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (memory_type, &flags) in props.memory_types.iter_mut().zip(flags) {
            memory_type.property_flags = flags;
        }
        props
    }

    #[test]
    fn picks_first_type_matching_filter_and_flags() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, host, host]);

        assert_eq!(find_memory_type(&props, 0b111, host).unwrap(), 1);
        // type 1 excluded by the filter
        assert_eq!(find_memory_type(&props, 0b101, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn missing_memory_type_is_an_error() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap_err();
        assert!(matches!(err, RendererError::NoMemoryType { type_filter: 1, .. }));
    }

    #[test]
    fn memory_type_is_chosen_from_the_new_buffer_requirements() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = memory_properties(&[host, host]);

        // original buffer allowed both types and got the first
        assert_eq!(find_memory_type(&props, 0b11, host).unwrap(), 0);
        // the larger replacement only allows the second
        assert_eq!(find_memory_type(&props, 0b10, host).unwrap(), 1);
        // and a filter excluding every type is refused rather than reused
        assert!(find_memory_type(&props, 0b100, host).is_err());
    }
}
