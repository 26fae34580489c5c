/*!
# Lumen Engine - Vulkan Backend

Vulkan implementation of the lumen_engine backend traits, using ash for the
Vulkan bindings and gpu-allocator for device memory sub-allocation.

The backend is handed to the engine as a `Box<dyn GraphicsBackend>`; the engine
core drives its creation stages and never sees a Vulkan type.

```no_run
use lumen_engine::lumen::{Config, Engine, Window};
use lumen_engine_renderer_vulkan::VulkanBackend;

fn start(window: Box<dyn Window>) -> lumen_engine::lumen::Result<Engine> {
    let backend = VulkanBackend::new(window.as_ref())?;
    Engine::create(Box::new(backend), window, Config::default())
}
```
*/

mod vulkan_allocator;
mod vulkan_backend;
mod vulkan_format;
mod vulkan_graphics_device;

#[cfg(feature = "vulkan-validation")]
mod debug;

pub use vulkan_allocator::{VulkanAllocation, VulkanAllocator};
pub use vulkan_backend::VulkanBackend;
pub use vulkan_graphics_device::VulkanGraphicsDevice;

#[cfg(feature = "vulkan-validation")]
pub use debug::{print_validation_stats_report, validation_stats};
