/// Backend contract: the only way the engine core talks to a GPU
///
/// A backend provides three pieces:
/// - [`GraphicsBackend`]: the creation chain instance → surface → device → allocator
///   and its reverse teardown
/// - [`GraphicsDevice`]: device-level objects, queue operations and command recording
/// - [`DeviceAllocator`]: the sub-allocator binding buffers/images to device memory
///
/// All invariant-bearing logic (allocation tracking, layout transitions, frame
/// pipelining, swapchain selection) lives in the core on top of these traits.

use std::any::Any;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::window::Window;
use super::types::*;

/// Staged creation and teardown of a GPU backend
///
/// The context drives the stages in order and tears them down in reverse.
pub trait GraphicsBackend {
    /// Load the API and create the instance (plus debug messenger if enabled)
    fn create_instance(&mut self, config: &Config) -> Result<()>;

    /// Create the presentation surface for `window`
    fn create_surface(&mut self, window: &dyn Window) -> Result<()>;

    /// Pick a physical device, create the logical device, queues and command pools
    fn create_device(&mut self) -> Result<Arc<dyn GraphicsDevice>>;

    /// Create the device memory sub-allocator
    fn create_allocator(&mut self) -> Result<Box<dyn DeviceAllocator>>;

    /// Destroy the logical device. Every handle to it must have been released.
    ///
    /// Like the other `destroy_*` stages, a no-op when the stage was never created.
    fn destroy_device(&mut self);

    fn destroy_surface(&mut self);

    fn destroy_instance(&mut self);
}

/// Device-level GPU operations
///
/// Methods take `&self`; the engine drives them from a single control thread.
pub trait GraphicsDevice: Send + Sync {
    // ===== DEVICE =====

    fn queue_family_indices(&self) -> QueueFamilyIndices;

    /// Block until the device has finished all submitted work
    fn wait_idle(&self) -> Result<()>;

    // ===== SURFACE / SWAPCHAIN =====

    fn surface_capabilities(&self) -> Result<SurfaceCapabilities>;
    fn surface_formats(&self) -> Result<Vec<SurfaceFormat>>;
    fn surface_present_modes(&self) -> Result<Vec<PresentMode>>;

    fn create_swapchain(&self, info: &SwapchainCreateInfo) -> Result<SwapchainHandle>;
    fn swapchain_images(&self, swapchain: SwapchainHandle) -> Result<Vec<ImageHandle>>;
    fn destroy_swapchain(&self, swapchain: SwapchainHandle);

    /// Acquire the next presentable image, signaling `semaphore` when it is ready
    ///
    /// Out-of-date and other failures are returned as errors.
    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        semaphore: SemaphoreHandle,
    ) -> Result<AcquiredImage>;

    /// Queue `image_index` for presentation once `wait_semaphores` are signaled
    fn queue_present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait_semaphores: &[SemaphoreHandle],
    ) -> Result<PresentStatus>;

    // ===== VIEWS / SAMPLERS =====

    fn create_image_view(&self, desc: &ImageViewDesc) -> Result<ImageViewHandle>;
    fn destroy_image_view(&self, view: ImageViewHandle);
    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerHandle>;
    fn destroy_sampler(&self, sampler: SamplerHandle);

    // ===== RENDER PASSES / FRAMEBUFFERS / PIPELINES =====

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<RenderPassHandle>;
    fn destroy_render_pass(&self, render_pass: RenderPassHandle);
    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<FramebufferHandle>;
    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);
    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<PipelineObjects>;
    fn destroy_pipeline(&self, objects: &PipelineObjects);

    // ===== DESCRIPTORS =====

    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc) -> Result<DescriptorPoolHandle>;
    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle);
    fn reset_descriptor_pool(&self, pool: DescriptorPoolHandle) -> Result<()>;

    /// Allocate one set; pool exhaustion is `Error::ResourceExhausted`
    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle>;
    fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]);

    // ===== COMMAND BUFFERS / SYNCHRONIZATION =====

    fn allocate_command_buffer(&self, kind: CommandBufferKind) -> Result<CommandBufferHandle>;
    fn free_command_buffer(&self, kind: CommandBufferKind, command_buffer: CommandBufferHandle);
    /// Begin recording (implicitly resets the command buffer)
    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle, one_time_submit: bool) -> Result<()>;
    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<()>;

    fn create_semaphore(&self) -> Result<SemaphoreHandle>;
    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);
    fn create_fence(&self, signaled: bool) -> Result<FenceHandle>;
    fn destroy_fence(&self, fence: FenceHandle);
    fn wait_for_fence(&self, fence: FenceHandle, timeout_ns: u64) -> Result<()>;
    fn reset_fence(&self, fence: FenceHandle) -> Result<()>;

    /// Submit to the graphics queue
    fn queue_submit(&self, submit: &SubmitInfo<'_>) -> Result<()>;

    // ===== COMMAND RECORDING =====

    fn cmd_pipeline_barrier(&self, command_buffer: CommandBufferHandle, barrier: &ImageBarrier);
    fn cmd_copy_buffer(&self, command_buffer: CommandBufferHandle, src: BufferHandle, dst: BufferHandle, size: u64);
    /// Copy tightly packed texels into mip level 0 (image in TRANSFER_DST layout)
    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        extent: Extent2D,
    );
    /// Linear blit between two mip levels of the same image
    fn cmd_blit_image(&self, command_buffer: CommandBufferHandle, image: ImageHandle, region: &BlitRegion);
    fn cmd_begin_render_pass(&self, command_buffer: CommandBufferHandle, begin: &RenderPassBegin);
    fn cmd_end_render_pass(&self, command_buffer: CommandBufferHandle);
    fn cmd_bind_pipeline(&self, command_buffer: CommandBufferHandle, pipeline: PipelineHandle);
    fn cmd_set_viewport(&self, command_buffer: CommandBufferHandle, viewport: &Viewport);
    fn cmd_set_scissor(&self, command_buffer: CommandBufferHandle, scissor: &Rect2D);
    fn cmd_bind_vertex_buffer(&self, command_buffer: CommandBufferHandle, buffer: BufferHandle, offset: u64);
    fn cmd_bind_index_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        index_type: IndexType,
    );
    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    );
    fn cmd_push_constants(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    );
    fn cmd_draw_indexed(
        &self,
        command_buffer: CommandBufferHandle,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    );
    fn cmd_draw_indexed_indirect(
        &self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    );
}

/// Backend allocation record for one buffer or image
pub trait DeviceAllocation: Send {
    /// Memory block the resource is bound to
    fn memory_block(&self) -> MemoryBlock;

    /// Properties of the memory type actually chosen
    fn memory_properties(&self) -> MemoryProperties;

    fn as_any(&self) -> &dyn Any;

    /// Recover the concrete allocation when freeing it
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// Sub-allocator over device memory
///
/// Creates resources already bound to memory. The caller owns the returned
/// allocation record and hands it back on destroy.
pub trait DeviceAllocator: Send {
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<(BufferHandle, Box<dyn DeviceAllocation>)>;
    fn destroy_buffer(&mut self, buffer: BufferHandle, allocation: Box<dyn DeviceAllocation>);

    fn create_image(&mut self, desc: &ImageDesc) -> Result<(ImageHandle, Box<dyn DeviceAllocation>)>;
    fn destroy_image(&mut self, image: ImageHandle, allocation: Box<dyn DeviceAllocation>);

    /// Host pointer to the start of the allocation (host-visible memory only)
    fn map(&mut self, allocation: &dyn DeviceAllocation) -> Result<NonNull<u8>>;
    fn unmap(&mut self, allocation: &dyn DeviceAllocation);

    /// Make host writes visible to the device (no-op for coherent memory)
    fn flush(&self, allocation: &dyn DeviceAllocation) -> Result<()>;
}
