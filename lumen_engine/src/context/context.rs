/// GPU context: staged creation and reverse-order teardown
///
/// Creation order is instance → surface → device → swapchain → allocator →
/// managers (descriptor pool). Teardown waits for the device to go idle and
/// walks the same chain backwards. Resources are built from a live context
/// (through `gpu()` / `device()`), and `destroy` consumes it, so nothing can
/// be created before or used after.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::graphics_device::{DescriptorPoolDesc, GraphicsBackend};
use crate::render::Swapchain;
use crate::resource::{DescriptorAllocator, MemoryManager};
use crate::window::Window;
use crate::{engine_error, engine_fatal, engine_info};
use super::device::Device;
use super::gpu_context::GpuContext;

const SOURCE: &str = "lumen::Context";

/// Descriptor budget of the context pool
const DESCRIPTOR_POOL: DescriptorPoolDesc = DescriptorPoolDesc {
    max_sets: 64,
    uniform_buffers: 64,
    storage_buffers: 64,
    combined_image_samplers: 64,
};

pub struct Context {
    config: Config,
    descriptors: ManuallyDrop<DescriptorAllocator>,
    gpu: ManuallyDrop<Arc<GpuContext>>,
    swapchain: ManuallyDrop<Swapchain>,
    device: ManuallyDrop<Arc<Device>>,
    backend: Box<dyn GraphicsBackend>,
}

struct Stages {
    device: Arc<Device>,
    swapchain: Swapchain,
    gpu: Arc<GpuContext>,
    descriptors: DescriptorAllocator,
}

impl Context {
    pub fn create(mut backend: Box<dyn GraphicsBackend>, window: &dyn Window, config: &Config) -> Result<Self> {
        engine_info!(SOURCE, "Creating context for '{}'", config.app_name);

        let extent = window.extent_in_pixels();
        if extent.is_degenerate() {
            engine_error!(SOURCE, "Window extent {}x{} cannot back a swapchain", extent.width, extent.height);
            return Err(Error::InitializationFailed(format!(
                "window extent {}x{} is degenerate",
                extent.width, extent.height
            )));
        }

        match Self::create_stages(&mut *backend, window, config) {
            Ok(stages) => {
                engine_info!(SOURCE, "Context ready");
                Ok(Self {
                    config: config.clone(),
                    descriptors: ManuallyDrop::new(stages.descriptors),
                    gpu: ManuallyDrop::new(stages.gpu),
                    swapchain: ManuallyDrop::new(stages.swapchain),
                    device: ManuallyDrop::new(stages.device),
                    backend,
                })
            }
            Err(e) => {
                engine_error!(SOURCE, "Context creation failed: {}", e);
                backend.destroy_device();
                backend.destroy_surface();
                backend.destroy_instance();
                Err(e)
            }
        }
    }

    fn create_stages(backend: &mut dyn GraphicsBackend, window: &dyn Window, config: &Config) -> Result<Stages> {
        backend.create_instance(config)?;
        engine_info!(SOURCE, "Instance created (validation: {})", config.enable_validation);

        backend.create_surface(window)?;
        engine_info!(SOURCE, "Surface created");

        let device = Arc::new(Device::new(backend.create_device()?)?);
        let families = device.queue_family_indices();
        engine_info!(
            SOURCE,
            "Device created (graphics family {}, present family {})",
            families.graphics,
            families.present
        );

        let swapchain = Swapchain::new(&device, window.extent_in_pixels())?;

        let memory = MemoryManager::new(backend.create_allocator()?);
        let gpu = Arc::new(GpuContext::new(Arc::clone(&device), memory));
        engine_info!(SOURCE, "Allocator created");

        let descriptors = DescriptorAllocator::new(&device, DESCRIPTOR_POOL)?;
        engine_info!(SOURCE, "Managers created");

        Ok(Stages { device, swapchain, gpu, descriptors })
    }

    pub fn config(&self) -> &Config { &self.config }

    pub fn device(&self) -> &Arc<Device> { &self.device }

    /// Shared state for constructing buffers and images
    pub fn gpu(&self) -> &Arc<GpuContext> { &self.gpu }

    pub fn swapchain(&self) -> &Swapchain { &self.swapchain }

    pub fn swapchain_mut(&mut self) -> &mut Swapchain { &mut self.swapchain }

    pub fn descriptors(&self) -> &DescriptorAllocator { &self.descriptors }

    pub fn descriptors_mut(&mut self) -> &mut DescriptorAllocator { &mut self.descriptors }

    /// Split borrow used by the render system when scenes open/close
    pub fn swapchain_and_descriptors(&mut self) -> (&Swapchain, &mut DescriptorAllocator) {
        (&self.swapchain, &mut self.descriptors)
    }

    /// Tear everything down; equivalent to dropping the context
    pub fn destroy(self) {}
}

impl Drop for Context {
    fn drop(&mut self) {
        engine_info!(SOURCE, "Destroying context");
        if let Err(e) = self.device.wait_idle() {
            engine_error!(SOURCE, "wait_idle failed during teardown: {}", e);
        }

        // SAFETY: each field is taken exactly once, here, and never touched again
        unsafe {
            ManuallyDrop::drop(&mut self.descriptors);

            let gpu = ManuallyDrop::take(&mut self.gpu);
            if let Err(gpu) = Arc::try_unwrap(gpu) {
                engine_fatal!(
                    SOURCE,
                    "{} GPU resource owner(s) outlive the context",
                    Arc::strong_count(&gpu) - 1
                );
            }

            ManuallyDrop::drop(&mut self.swapchain);

            let device = ManuallyDrop::take(&mut self.device);
            if let Err(device) = Arc::try_unwrap(device) {
                engine_fatal!(
                    SOURCE,
                    "{} device reference(s) outlive the context",
                    Arc::strong_count(&device) - 1
                );
            }
        }

        self.backend.destroy_device();
        self.backend.destroy_surface();
        self.backend.destroy_instance();
        engine_info!(SOURCE, "Context destroyed");
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
