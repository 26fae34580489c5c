/// VulkanBackend - staged creation of instance, surface, device and allocator
///
/// Each stage is created by the context in order and destroyed in reverse.
/// Destroy calls for stages that were never created are no-ops, so the
/// context can unwind a partially built backend with the full destroy chain.

use ash::vk;
use lumen_engine::lumen::graphics_device::{DeviceAllocator, GraphicsBackend, GraphicsDevice, QueueFamilyIndices};
use lumen_engine::lumen::{Config, Error, Result, Window};
use lumen_engine::{engine_debug, engine_error, engine_info, engine_warn};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::c_char;
use std::sync::Arc;

use crate::vulkan_allocator::VulkanAllocator;
use crate::vulkan_graphics_device::{DeviceSelection, VulkanGraphicsDevice};

const SOURCE: &str = "lumen::vulkan";

#[cfg(feature = "vulkan-validation")]
const VALIDATION_LAYER: &std::ffi::CStr = c"VK_LAYER_KHRONOS_validation";

fn init_failed(what: &str, e: impl std::fmt::Debug) -> Error {
    engine_error!(SOURCE, "{}: {:?}", what, e);
    Error::InitializationFailed(format!("{}: {:?}", what, e))
}

/// Stage created by an earlier call, or an error naming it
fn created<'a, T>(stage: &'a Option<T>, what: &str) -> Result<&'a T> {
    stage
        .as_ref()
        .ok_or_else(|| Error::InitializationFailed(format!("{} not created", what)))
}

struct InstanceState {
    entry: ash::Entry,
    instance: ash::Instance,
    #[cfg(feature = "vulkan-validation")]
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

struct SurfaceState {
    loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
}

pub struct VulkanBackend {
    /// Instance extensions the window system needs to present
    surface_extensions: &'static [*const c_char],
    instance: Option<InstanceState>,
    surface: Option<SurfaceState>,
    device: Option<Arc<VulkanGraphicsDevice>>,
}

impl VulkanBackend {
    /// Prepare a backend able to present to windows of `window`'s display
    pub fn new<W: HasDisplayHandle + ?Sized>(window: &W) -> Result<Self> {
        let display_handle = window
            .display_handle()
            .map_err(|e| init_failed("Failed to get display handle", e))?;
        let surface_extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
            .map_err(|e| init_failed("Failed to get required extensions", e))?;

        Ok(Self { surface_extensions, instance: None, surface: None, device: None })
    }

    #[cfg(feature = "vulkan-validation")]
    fn validation_layer_available(entry: &ash::Entry) -> bool {
        // SAFETY: entry is loaded
        let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
        layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str().map(|name| name == VALIDATION_LAYER).unwrap_or(false))
    }

    /// Suitable device with the best rank, with its queue families
    fn select_physical_device(
        instance: &ash::Instance,
        surface: &SurfaceState,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        // SAFETY: instance is alive
        let physical_devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(|e| init_failed("Failed to enumerate physical devices", e))?;

        let mut best: Option<(u32, vk::PhysicalDevice, QueueFamilyIndices)> = None;
        for physical_device in physical_devices {
            // SAFETY: handle returned by the instance above
            let properties = unsafe { instance.get_physical_device_properties(physical_device) };
            let name = properties.device_name_as_c_str().unwrap_or(c"<unnamed>").to_string_lossy();

            let Some(families) = Self::find_queue_families(instance, surface, physical_device) else {
                engine_debug!(SOURCE, "Skipping '{}': no graphics/present queue", name);
                continue;
            };
            if !Self::supports_required_features(instance, physical_device) {
                engine_debug!(SOURCE, "Skipping '{}': missing swapchain or multi-draw-indirect", name);
                continue;
            }

            let rank = device_type_rank(properties.device_type);
            if best.as_ref().map_or(true, |&(best_rank, _, _)| rank > best_rank) {
                best = Some((rank, physical_device, families));
            }
        }

        best.map(|(_, physical_device, families)| (physical_device, families))
            .ok_or_else(|| {
                engine_error!(SOURCE, "No GPU can present to this surface");
                Error::InitializationFailed("No suitable GPU found".to_string())
            })
    }

    fn find_queue_families(
        instance: &ash::Instance,
        surface: &SurfaceState,
        physical_device: vk::PhysicalDevice,
    ) -> Option<QueueFamilyIndices> {
        // SAFETY: physical device and surface are alive
        unsafe {
            let families = instance.get_physical_device_queue_family_properties(physical_device);
            let graphics = families
                .iter()
                .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))? as u32;

            let supports_present = |index: u32| {
                surface
                    .loader
                    .get_physical_device_surface_support(physical_device, index, surface.surface)
                    .unwrap_or(false)
            };
            // Same family for both when possible
            let present = if supports_present(graphics) {
                graphics
            } else {
                (0..families.len() as u32).find(|&index| supports_present(index))?
            };
            Some(QueueFamilyIndices { graphics, present })
        }
    }

    fn supports_required_features(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> bool {
        // SAFETY: physical device is alive
        unsafe {
            let features = instance.get_physical_device_features(physical_device);
            let has_swapchain = instance
                .enumerate_device_extension_properties(physical_device)
                .unwrap_or_default()
                .iter()
                .any(|ext| ext.extension_name_as_c_str().map(|n| n == ash::khr::swapchain::NAME).unwrap_or(false));
            has_swapchain && features.multi_draw_indirect == vk::TRUE
        }
    }
}

/// Preference order of physical device types (higher wins)
pub(crate) fn device_type_rank(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

impl GraphicsBackend for VulkanBackend {
    fn create_instance(&mut self, config: &Config) -> Result<()> {
        // SAFETY: loading the system Vulkan library
        let entry = unsafe { ash::Entry::load() }.map_err(|e| init_failed("Failed to load Vulkan library", e))?;

        let app_name = std::ffi::CString::new(config.app_name.as_str())
            .map_err(|e| init_failed("Invalid application name", e))?;
        let (major, minor, patch) = config.app_version;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(c"Lumen")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        #[allow(unused_mut)]
        let mut extension_names = self.surface_extensions.to_vec();
        #[allow(unused_mut)]
        let mut layer_names: Vec<*const c_char> = Vec::new();

        #[cfg(feature = "vulkan-validation")]
        let validation = config.enable_validation && {
            let available = Self::validation_layer_available(&entry);
            if !available {
                engine_warn!(SOURCE, "Validation requested but {:?} is not installed", VALIDATION_LAYER);
            }
            available
        };
        #[cfg(feature = "vulkan-validation")]
        if validation {
            extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            layer_names.push(VALIDATION_LAYER.as_ptr());
        }
        #[cfg(not(feature = "vulkan-validation"))]
        if config.enable_validation {
            engine_warn!(SOURCE, "Validation requested but the backend was built without 'vulkan-validation'");
        }

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&extension_names);

        // SAFETY: every pointer in create_info outlives the call
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| init_failed("Failed to create Vulkan instance", e))?;

        #[cfg(feature = "vulkan-validation")]
        let debug = if validation {
            let debug_config = crate::debug::DebugConfig::from_config(config);
            let messenger_info = crate::debug::messenger_create_info(&debug_config);
            crate::debug::init_debug_config(debug_config);

            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            // SAFETY: instance has the debug utils extension enabled
            match unsafe { loader.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    crate::debug::cleanup_debug_config();
                    // SAFETY: nothing else was created from the instance
                    unsafe { instance.destroy_instance(None) };
                    return Err(init_failed("Failed to create debug messenger", e));
                }
            }
        } else {
            None
        };

        engine_info!(SOURCE, "Vulkan instance created for '{}'", config.app_name);
        self.instance = Some(InstanceState {
            entry,
            instance,
            #[cfg(feature = "vulkan-validation")]
            debug,
        });
        Ok(())
    }

    fn create_surface(&mut self, window: &dyn Window) -> Result<()> {
        let state = created(&self.instance, "Vulkan instance")?;
        let display_handle = window
            .display_handle()
            .map_err(|e| init_failed("Failed to get display handle", e))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| init_failed("Failed to get window handle", e))?;

        // SAFETY: handles come from a live window that outlives the surface
        let surface = unsafe {
            ash_window::create_surface(
                &state.entry,
                &state.instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| init_failed("Failed to create surface", e))?;

        let loader = ash::khr::surface::Instance::new(&state.entry, &state.instance);
        self.surface = Some(SurfaceState { loader, surface });
        Ok(())
    }

    fn create_device(&mut self) -> Result<Arc<dyn GraphicsDevice>> {
        let state = created(&self.instance, "Vulkan instance")?;
        let surface = created(&self.surface, "Surface")?;

        let (physical_device, families) = Self::select_physical_device(&state.instance, surface)?;

        // SAFETY: physical device is alive
        let (properties, features) = unsafe {
            (
                state.instance.get_physical_device_properties(physical_device),
                state.instance.get_physical_device_features(physical_device),
            )
        };
        let max_anisotropy = if features.sampler_anisotropy == vk::TRUE {
            properties.limits.max_sampler_anisotropy
        } else {
            1.0
        };

        let device = VulkanGraphicsDevice::new(
            &state.instance,
            surface.loader.clone(),
            surface.surface,
            DeviceSelection { physical_device, families, max_anisotropy },
        )?;

        let name = properties.device_name_as_c_str().unwrap_or(c"<unnamed>").to_string_lossy();
        engine_info!(
            SOURCE,
            "Using GPU '{}' (graphics queue {}, present queue {})",
            name,
            families.graphics,
            families.present
        );

        let device = Arc::new(device);
        self.device = Some(Arc::clone(&device));
        Ok(device)
    }

    fn create_allocator(&mut self) -> Result<Box<dyn DeviceAllocator>> {
        let state = created(&self.instance, "Vulkan instance")?;
        let device = created(&self.device, "Device")?;

        let allocator = VulkanAllocator::new(&state.instance, device.raw(), device.physical_device())?;
        Ok(Box::new(allocator))
    }

    fn destroy_device(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };
        match Arc::try_unwrap(device) {
            Ok(device) => drop(device),
            Err(device) => {
                engine_error!(
                    SOURCE,
                    "Graphics device still referenced ({} owners) at teardown; leaking it",
                    Arc::strong_count(&device)
                );
                std::mem::forget(device);
            }
        }
    }

    fn destroy_surface(&mut self) {
        if let Some(surface) = self.surface.take() {
            // SAFETY: the device and every swapchain on this surface are gone
            unsafe { surface.loader.destroy_surface(surface.surface, None) };
        }
    }

    fn destroy_instance(&mut self) {
        let Some(state) = self.instance.take() else {
            return;
        };

        #[cfg(feature = "vulkan-validation")]
        {
            crate::debug::cleanup_debug_config();
            if let Some((loader, messenger)) = &state.debug {
                // SAFETY: messenger belongs to this instance
                unsafe { loader.destroy_debug_utils_messenger(*messenger, None) };
            }
        }

        // SAFETY: every child object was destroyed by the previous stages
        unsafe { state.instance.destroy_instance(None) };
        engine_info!(SOURCE, "Vulkan instance destroyed");
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.destroy_device();
        self.destroy_surface();
        self.destroy_instance();
    }
}

#[cfg(test)]
#[path = "vulkan_backend_tests.rs"]
mod tests;
