// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers and window surface extensions
// - Physical device selection against a requirements record (first fit)
// - Logical device + queue creation
// - Graphics command pool and depth format probe

use anyhow::{Context, Result};
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use crate::config::DeviceConfig;
use crate::platform::SurfaceProvider;
use crate::renderer::RendererError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Depth formats probed in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// What a physical device must provide to be accepted.
#[derive(Debug, Clone)]
pub struct DeviceRequirements {
    pub graphics: bool,
    pub present: bool,
    pub compute: bool,
    pub transfer: bool,
    pub sampler_anisotropy: bool,
    pub discrete_gpu: bool,
    pub extensions: Vec<&'static CStr>,
}

impl DeviceRequirements {
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            graphics: true,
            present: true,
            compute: config.require_compute,
            transfer: config.require_transfer,
            sampler_anisotropy: config.require_sampler_anisotropy,
            discrete_gpu: config.require_discrete_gpu,
            extensions: vec![khr::Swapchain::name()],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilyIndices {
    /// Distinct families among graphics, present and transfer, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(3);
        for family in [self.graphics, self.present, self.transfer]
            .into_iter()
            .flatten()
        {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }

    pub fn satisfies(&self, requirements: &DeviceRequirements) -> bool {
        !(requirements.graphics && self.graphics.is_none()
            || requirements.present && self.present.is_none()
            || requirements.compute && self.compute.is_none()
            || requirements.transfer && self.transfer.is_none())
    }
}

/// Assign queue families in one pass.
///
/// Graphics, compute and present take the first family that qualifies.
/// Transfer takes the family that also advertises the fewest graphics and
/// compute bits; on a tie the later family wins.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();
    let mut min_transfer_score = u8::MAX;

    for (i, family) in families.iter().enumerate() {
        let index = i as u32;
        let mut transfer_score = 0u8;

        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics.get_or_insert(index);
            transfer_score += 1;
        }

        if family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
            indices.compute.get_or_insert(index);
            transfer_score += 1;
        }

        if family.queue_flags.contains(vk::QueueFlags::TRANSFER)
            && transfer_score <= min_transfer_score
        {
            min_transfer_score = transfer_score;
            indices.transfer = Some(index);
        }

        if indices.present.is_none() && supports_present(index) {
            indices.present = Some(index);
        }
    }

    indices
}

/// First required extension the device does not advertise.
pub fn missing_extension<'a>(
    available: &[vk::ExtensionProperties],
    required: &[&'a CStr],
) -> Option<&'a CStr> {
    required.iter().copied().find(|name| {
        !available.iter().any(|extension| {
            // SAFETY: the driver fills extension_name with a NUL-terminated string
            let available_name = unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) };
            available_name == *name
        })
    })
}

/// First candidate usable as a depth attachment with linear or optimal tiling.
pub fn select_depth_format(
    candidates: &[vk::Format],
    properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    let flags = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
    candidates.iter().copied().find(|&format| {
        let props = properties(format);
        props.linear_tiling_features.contains(flags)
            || props.optimal_tiling_features.contains(flags)
    })
}

/// Optional features the renderer turns on when the GPU has them.
pub fn enabled_features(supported: &vk::PhysicalDeviceFeatures) -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures {
        sampler_anisotropy: supported.sampler_anisotropy,
        ..Default::default()
    }
}

pub fn supports_device_local_host_visible(memory: &vk::PhysicalDeviceMemoryProperties) -> bool {
    let wanted = vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE;
    memory.memory_types[..memory.memory_type_count as usize]
        .iter()
        .any(|memory_type| memory_type.property_flags.contains(wanted))
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    pub entry: Entry,

    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub surface_loader: khr::Surface,
    pub surface: vk::SurfaceKHR,

    pub queue_families: QueueFamilyIndices,
    pub graphics_queue_family: u32,
    pub present_queue_family: u32,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub transfer_queue: vk::Queue,
    pub graphics_command_pool: vk::CommandPool,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
    /// Features enabled on the logical device, not everything the GPU offers.
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub supports_device_local_host_visible: bool,
    pub depth_format: vk::Format,
}

impl VulkanDevice {
    /// Create instance, surface and logical device.
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers
    pub fn new(
        app_name: &str,
        surface_provider: &dyn SurfaceProvider,
        device_config: &DeviceConfig,
        enable_validation: bool,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance
        let instance =
            Self::create_instance(&entry, app_name, surface_provider, enable_validation)?;

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 4: Surface
        let surface = unsafe { surface_provider.create_surface(&entry, &instance) }?;
        let surface_loader = khr::Surface::new(&entry, &instance);

        // Step 5: Pick physical device (GPU)
        let requirements = DeviceRequirements::from_config(device_config);
        let (physical_device, queue_families) =
            Self::pick_physical_device(&instance, &surface_loader, surface, &requirements)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let supported = unsafe { instance.get_physical_device_features(physical_device) };
        let features = enabled_features(&supported);
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        Self::log_device_info(&properties, &memory_properties, &queue_families);

        // Step 6: Create logical device
        let device =
            Self::create_logical_device(&instance, physical_device, &queue_families, &features)?;

        let graphics_queue_family = queue_families
            .graphics
            .ok_or(RendererError::NoSuitableDevice)?;
        let present_queue_family = queue_families.present.unwrap_or(graphics_queue_family);
        let transfer_queue_family = queue_families.transfer.unwrap_or(graphics_queue_family);

        let (graphics_queue, present_queue, transfer_queue) = unsafe {
            (
                device.get_device_queue(graphics_queue_family, 0),
                device.get_device_queue(present_queue_family, 0),
                device.get_device_queue(transfer_queue_family, 0),
            )
        };
        log::info!("Queues obtained");

        // Step 7: Command pool for the graphics queue
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let graphics_command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context("Failed to create graphics command pool")?;
        log::info!("Graphics command pool created");

        // Step 8: Depth format
        let depth_format = select_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| unsafe {
            instance.get_physical_device_format_properties(physical_device, format)
        })
        .ok_or(RendererError::NoDepthFormat)?;
        log::debug!("Depth format: {:?}", depth_format);

        Ok(Arc::new(Self {
            device,
            physical_device,
            instance,
            entry,
            debug_utils,
            surface_loader,
            surface,
            queue_families,
            graphics_queue_family,
            present_queue_family,
            graphics_queue,
            present_queue,
            transfer_queue,
            graphics_command_pool,
            properties,
            features,
            memory_properties,
            supports_device_local_host_visible: supports_device_local_host_visible(
                &memory_properties,
            ),
            depth_format,
        }))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        surface_provider: &dyn SurfaceProvider,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("Oko Engine")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        // Surface extensions for this window system
        let mut extensions = surface_provider.required_extensions()?;
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        // Validation layers
        let layer_names = if enable_validation {
            Self::check_validation_layer(entry)?;
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;
        log::info!("Vulkan instance created");

        Ok(instance)
    }

    fn check_validation_layer(entry: &Entry) -> Result<()> {
        log::info!("Validation layers enabled. Enumerating...");
        let layers = entry
            .enumerate_instance_layer_properties()
            .context("Failed to enumerate instance layers")?;

        let found = layers.iter().any(|layer| {
            // SAFETY: layer_name is NUL-terminated
            let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            name == VALIDATION_LAYER
        });

        if !found {
            anyhow::bail!("Required validation layer is missing: {:?}", VALIDATION_LAYER);
        }
        log::info!("All required validation layers are present");
        Ok(())
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;
        log::debug!("Vulkan debugger created");

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        requirements: &DeviceRequirements,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        log::info!("Selecting physical device...");
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        for device in devices {
            if let Some(indices) =
                Self::meets_requirements(instance, device, surface_loader, surface, requirements)?
            {
                return Ok((device, indices));
            }
        }

        log::error!("No physical devices were found which meet the requirements");
        Err(RendererError::NoSuitableDevice.into())
    }

    fn meets_requirements(
        instance: &ash::Instance,
        device: vk::PhysicalDevice,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        requirements: &DeviceRequirements,
    ) -> Result<Option<QueueFamilyIndices>> {
        let props = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();

        if requirements.discrete_gpu && props.device_type != vk::PhysicalDeviceType::DISCRETE_GPU
        {
            log::info!("'{}' is not a discrete GPU, and one is required. Skipping.", name);
            return Ok(None);
        }

        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let indices = find_queue_families(&families, |index| unsafe {
            surface_loader
                .get_physical_device_surface_support(device, index, surface)
                .unwrap_or(false)
        });

        if !indices.satisfies(requirements) {
            log::info!("'{}' does not meet queue requirements. Skipping.", name);
            return Ok(None);
        }

        let (formats, present_modes) = unsafe {
            (
                surface_loader.get_physical_device_surface_formats(device, surface)?,
                surface_loader.get_physical_device_surface_present_modes(device, surface)?,
            )
        };
        if formats.is_empty() || present_modes.is_empty() {
            log::info!("'{}' lacks required swapchain support. Skipping.", name);
            return Ok(None);
        }

        let available = unsafe { instance.enumerate_device_extension_properties(device) }?;
        if let Some(missing) = missing_extension(&available, &requirements.extensions) {
            log::info!(
                "'{}' is missing required extension {:?}. Skipping.",
                name,
                missing
            );
            return Ok(None);
        }

        if requirements.sampler_anisotropy && features.sampler_anisotropy != vk::TRUE {
            log::info!("'{}' does not support sampler anisotropy. Skipping.", name);
            return Ok(None);
        }

        Ok(Some(indices))
    }

    fn log_device_info(
        properties: &vk::PhysicalDeviceProperties,
        memory: &vk::PhysicalDeviceMemoryProperties,
        indices: &QueueFamilyIndices,
    ) {
        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!("GPU type: {:?}", properties.device_type);
        log::info!(
            "Driver version: {}.{}.{}",
            vk::api_version_major(properties.driver_version),
            vk::api_version_minor(properties.driver_version),
            vk::api_version_patch(properties.driver_version)
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        for heap in &memory.memory_heaps[..memory.memory_heap_count as usize] {
            let gib = heap.size as f64 / 1024.0 / 1024.0 / 1024.0;
            if heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL) {
                log::info!("  Local memory: {:.2} GiB", gib);
            } else {
                log::info!("  Shared memory: {:.2} GiB", gib);
            }
        }

        log::info!(
            "Queue families: graphics={:?} present={:?} compute={:?} transfer={:?}",
            indices.graphics,
            indices.present,
            indices.compute,
            indices.transfer
        );
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        indices: &QueueFamilyIndices,
        features: &vk::PhysicalDeviceFeatures,
    ) -> Result<ash::Device> {
        log::info!("Creating logical device...");

        // One create info per distinct family; duplicates are invalid
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = indices
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [khr::Swapchain::name().as_ptr()];
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;
        log::info!("Logical device created");

        Ok(device)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }

    pub fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }
        .context("Failed to query surface capabilities")
    }

    pub fn surface_formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
        }
        .context("Failed to query surface formats")
    }

    pub fn surface_present_modes(&self) -> Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
        }
        .context("Failed to query present modes")
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            self.device
                .destroy_command_pool(self.graphics_command_pool, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::trace!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn requirements() -> DeviceRequirements {
        DeviceRequirements::from_config(&DeviceConfig::default())
    }

    #[test]
    fn dedicated_transfer_family_is_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = find_queue_families(&families, |i| i == 0);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.compute, Some(0));
        assert_eq!(indices.present, Some(0));
        assert_eq!(indices.transfer, Some(2));
        assert_eq!(indices.unique(), vec![0, 2]);
    }

    #[test]
    fn transfer_tie_goes_to_later_family() {
        let all = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let families = [family(all), family(all)];
        let indices = find_queue_families(&families, |_| true);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        assert_eq!(indices.transfer, Some(1));
    }

    #[test]
    fn shared_families_produce_one_queue_request() {
        let all = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let indices = find_queue_families(&[family(all)], |_| true);
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn present_family_can_differ_from_graphics() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = find_queue_families(&families, |i| i == 1);
        assert_eq!(indices.present, Some(1));
        assert_eq!(indices.transfer, Some(1));
        assert_eq!(indices.unique(), vec![0, 1]);
    }

    #[test]
    fn missing_present_fails_requirements() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let indices = find_queue_families(&families, |_| false);
        assert!(!indices.satisfies(&requirements()));
    }

    #[test]
    fn optional_compute_is_not_enforced() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER)];
        let indices = find_queue_families(&families, |_| true);
        assert!(!indices.satisfies(&requirements()));

        let mut relaxed = requirements();
        relaxed.compute = false;
        assert!(indices.satisfies(&relaxed));
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, src) in props.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = *src as std::ffi::c_char;
        }
        props
    }

    #[test]
    fn swapchain_extension_is_required() {
        let required = [khr::Swapchain::name()];
        assert_eq!(missing_extension(&[], &required), Some(khr::Swapchain::name()));
        let available = [extension(c"VK_KHR_maintenance1"), extension(khr::Swapchain::name())];
        assert_eq!(missing_extension(&available, &required), None);
    }

    #[test]
    fn depth_probe_accepts_linear_or_optimal() {
        let supported = |format: vk::Format| {
            let mut props = vk::FormatProperties::default();
            if format == vk::Format::D32_SFLOAT_S8_UINT {
                props.linear_tiling_features = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
            }
            if format == vk::Format::D24_UNORM_S8_UINT {
                props.optimal_tiling_features = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
            }
            props
        };
        assert_eq!(
            select_depth_format(&DEPTH_FORMAT_CANDIDATES, supported),
            Some(vk::Format::D32_SFLOAT_S8_UINT)
        );
        assert_eq!(
            select_depth_format(&DEPTH_FORMAT_CANDIDATES[2..], supported),
            Some(vk::Format::D24_UNORM_S8_UINT)
        );
    }

    #[test]
    fn depth_probe_fails_without_candidates() {
        assert_eq!(
            select_depth_format(&DEPTH_FORMAT_CANDIDATES, |_| vk::FormatProperties::default()),
            None
        );
    }

    #[test]
    fn device_local_host_visible_detection() {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            ..Default::default()
        };
        memory.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        memory.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert!(!supports_device_local_host_visible(&memory));

        memory.memory_types[1].property_flags |= vk::MemoryPropertyFlags::DEVICE_LOCAL;
        assert!(supports_device_local_host_visible(&memory));

        // types past memory_type_count are ignored
        memory.memory_type_count = 1;
        assert!(!supports_device_local_host_visible(&memory));
    }

    #[test]
    fn anisotropy_enabled_only_when_supported() {
        let mut supported = vk::PhysicalDeviceFeatures {
            geometry_shader: vk::TRUE,
            ..Default::default()
        };
        let enabled = enabled_features(&supported);
        assert_eq!(enabled.sampler_anisotropy, vk::FALSE);
        assert_eq!(enabled.geometry_shader, vk::FALSE);

        supported.sampler_anisotropy = vk::TRUE;
        assert_eq!(enabled_features(&supported).sampler_anisotropy, vk::TRUE);
    }
}
