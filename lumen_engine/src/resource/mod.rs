/// GPU resources: memory bookkeeping, buffers, images and pipeline objects

pub mod buffer;
pub mod descriptor_allocator;
pub mod dynamic_buffer;
pub mod image;
pub mod image_view;
pub mod layout_transition;
pub mod memory_manager;
pub mod pipeline;

pub use buffer::{Buffer, StagingCopy};
pub use descriptor_allocator::DescriptorAllocator;
pub use dynamic_buffer::DynamicBuffer;
pub use image::{mip_extent, mip_level_count_for, Image};
pub use image_view::{ImageView, Sampler};
pub use memory_manager::MemoryManager;
pub use pipeline::{create_framebuffers, Framebuffer, Pipeline, RenderPass};
