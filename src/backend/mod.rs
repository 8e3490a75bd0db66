// Backend module - Vulkan abstraction layer
//
// Design: Thin wrappers around ash that own their handles and destroy them
// on drop. Every wrapper keeps an `Arc<VulkanDevice>` so the device outlives
// the resources created from it.

pub mod buffer;
pub mod command_buffer;
pub mod device;
pub mod image;
pub mod material_shader;
pub mod pipeline;
pub mod renderpass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod vulkan;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
pub use vulkan::VulkanBackend;
