// Platform collaborator for the Vulkan backend
//
// The backend never sees winit directly. It asks a `SurfaceProvider` for the
// framebuffer size, the instance extensions the windowing system needs and a
// surface for the created instance.

use anyhow::{Context, Result};
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::c_char;
use winit::window::Window;

pub trait SurfaceProvider {
    /// Current framebuffer size in pixels.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Instance extensions required to present to this surface.
    fn required_extensions(&self) -> Result<Vec<*const c_char>>;

    /// Create a presentation surface for `instance`.
    ///
    /// # Safety
    /// The returned surface must be destroyed before `instance`.
    unsafe fn create_surface(&self, entry: &Entry, instance: &ash::Instance)
        -> Result<vk::SurfaceKHR>;
}

impl SurfaceProvider for Window {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.inner_size();
        (size.width, size.height)
    }

    fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let extensions = ash_window::enumerate_required_extensions(self.raw_display_handle())
            .context("Failed to query surface extensions for this window system")?;
        Ok(extensions.to_vec())
    }

    unsafe fn create_surface(
        &self,
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR> {
        ash_window::create_surface(
            entry,
            instance,
            self.raw_display_handle(),
            self.raw_window_handle(),
            None,
        )
        .context("Failed to create window surface")
    }
}
