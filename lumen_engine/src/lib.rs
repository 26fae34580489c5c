/*!
# Lumen Engine

Backend-agnostic core of the Lumen real-time renderer.

The core owns every rule about GPU resource and frame lifetimes: allocation
bookkeeping, buffer staging, image layout transitions and mip generation,
swapchain selection and recreation, the frames-in-flight ring and the
acquire → record → submit → present loop. A backend crate (Vulkan) supplies
the raw GPU operations through three traits.

## Architecture

- **GraphicsBackend**: staged creation of instance, surface, device, allocator
- **GraphicsDevice**: device objects, queues, command recording
- **DeviceAllocator**: sub-allocation of device memory
- **Context**: explicit owner of the whole GPU chain, created once and destroyed last
- **Engine**: window loop, event bus and resize orchestration on top of a context

Everything GPU-related is reached through `lumen::*`.
*/

// Internal modules
mod config;
mod engine;
mod error;
mod window;
pub mod context;
pub mod event;
pub mod graphics_device;
pub mod log;
pub mod render;
pub mod resource;
pub mod scene;

// Main lumen namespace module
pub mod lumen {
    pub use crate::config::{
        Config, DebugMessageFilter, DebugOutput, DebugSeverity, ValidationStats,
    };
    pub use crate::context::{Context, Device, GpuContext};
    pub use crate::engine::Engine;
    pub use crate::error::{Error, Result};
    pub use crate::window::Window;

    // Logging sub-module (types and functions; the engine_* macros live at the crate root)
    pub mod log {
        pub use crate::log::{log, log_detailed, reset_logger, set_logger};
        pub use crate::log::{DefaultLogger, LogEntry, LogSeverity, Logger};
    }

    pub mod event {
        pub use crate::event::*;
    }

    // Backend contract and GPU vocabulary
    pub mod graphics_device {
        pub use crate::graphics_device::*;
    }

    pub mod render {
        pub use crate::render::*;
        pub use crate::render::swapchain::{
            select_extent, select_image_count, select_present_mode, select_sharing_mode,
            select_surface_format,
        };
        pub use crate::render::ui_renderer::{clamp_scissor, ui_transform};
    }

    pub mod resource {
        pub use crate::resource::*;
        pub use crate::resource::layout_transition::{barrier_masks, BarrierMasks};
    }

    pub mod scene {
        pub use crate::scene::*;
    }
}

// Re-export math library at crate root
pub use glam;
