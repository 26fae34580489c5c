/// Recording mock backend for unit tests (no GPU required)
///
/// `MockBackend`, `MockGraphicsDevice` and `MockAllocator` share one
/// `MockState`: every call is appended to `calls`, live objects are tracked
/// per kind (a destroy of an unknown object panics), and fences follow the
/// real signal/reset protocol with work completing instantly on submit.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard};

use glam::{Mat4, Vec3};
use raw_window_handle::{DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::Config;
use crate::context::{Device, GpuContext};
use crate::error::{Error, Result};
use crate::event::{
    BeforeCursorModeUpdated, BeforeWindowRecreated, CursorMode, EventBus, Key, KeyInput,
    SceneClosed, SceneOpened, WindowRecreated, WindowResized,
};
use crate::resource::MemoryManager;
use crate::scene::{Primitive, SceneData, TextureData, Vertex};
use crate::window::Window;
use super::graphics_device::*;
use super::types::*;

// ============================================================================
// Call log
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    // backend
    CreateInstance { app_name: String, validation: bool },
    CreateSurface,
    CreateDevice,
    CreateAllocator,
    DestroyDevice,
    DestroySurface,
    DestroyInstance,

    // device
    WaitIdle,
    CreateSwapchain(SwapchainHandle, SwapchainCreateInfo),
    DestroySwapchain(SwapchainHandle),
    AcquireNextImage { swapchain: SwapchainHandle, semaphore: SemaphoreHandle },
    QueuePresent { swapchain: SwapchainHandle, image_index: u32, wait: Vec<SemaphoreHandle> },
    CreateImageView(ImageViewHandle, ImageViewDesc),
    DestroyImageView(ImageViewHandle),
    CreateSampler(SamplerHandle),
    DestroySampler(SamplerHandle),
    CreateRenderPass(RenderPassHandle, RenderPassDesc),
    DestroyRenderPass(RenderPassHandle),
    CreateFramebuffer(FramebufferHandle, FramebufferDesc),
    DestroyFramebuffer(FramebufferHandle),
    CreatePipeline(String, PipelineObjects),
    DestroyPipeline(PipelineHandle),
    CreateDescriptorPool(DescriptorPoolHandle),
    DestroyDescriptorPool(DescriptorPoolHandle),
    ResetDescriptorPool(DescriptorPoolHandle),
    AllocateDescriptorSet(DescriptorSetHandle),
    UpdateDescriptorSet(DescriptorSetHandle, Vec<DescriptorWrite>),
    AllocateCommandBuffer(CommandBufferKind, CommandBufferHandle),
    FreeCommandBuffer(CommandBufferHandle),
    BeginCommandBuffer(CommandBufferHandle),
    EndCommandBuffer(CommandBufferHandle),
    CreateSemaphore(SemaphoreHandle),
    DestroySemaphore(SemaphoreHandle),
    CreateFence(FenceHandle),
    DestroyFence(FenceHandle),
    WaitForFence(FenceHandle),
    ResetFence(FenceHandle),
    QueueSubmit {
        command_buffer: CommandBufferHandle,
        wait: Vec<SemaphoreHandle>,
        signal: Vec<SemaphoreHandle>,
        fence: FenceHandle,
    },

    // recording
    PipelineBarrier(ImageBarrier),
    CopyBuffer { src: BufferHandle, dst: BufferHandle, size: u64 },
    CopyBufferToImage { src: BufferHandle, dst: ImageHandle, extent: Extent2D },
    BlitImage(ImageHandle, BlitRegion),
    BeginRenderPass(RenderPassBegin),
    EndRenderPass,
    BindPipeline(PipelineHandle),
    SetViewport(Viewport),
    SetScissor(Rect2D),
    BindVertexBuffer(BufferHandle),
    BindIndexBuffer(BufferHandle, IndexType),
    BindDescriptorSet(DescriptorSetHandle),
    PushConstants { stages: ShaderStages, offset: u32, data: Vec<u8> },
    DrawIndexed { index_count: u32, first_index: u32, vertex_offset: i32 },
    DrawIndexedIndirect { buffer: BufferHandle, draw_count: u32, stride: u32 },

    // allocator
    CreateBuffer(BufferHandle, BufferDesc),
    DestroyBuffer(BufferHandle),
    CreateImage(ImageHandle, ImageDesc),
    DestroyImage(ImageHandle),
    Map(DeviceMemoryHandle),
    Unmap(DeviceMemoryHandle),
    Flush(DeviceMemoryHandle),
}

// ============================================================================
// Shared state
// ============================================================================

/// Knobs and bookkeeping shared by every mock object of one backend
pub struct MockState {
    pub calls: Vec<MockCall>,
    pub capabilities: SurfaceCapabilities,
    pub formats: Vec<SurfaceFormat>,
    pub present_modes: Vec<PresentMode>,
    pub queue_families: QueueFamilyIndices,
    pub acquire_suboptimal: bool,
    pub acquire_error: Option<Error>,
    pub fence_wait_error: Option<Error>,
    pub present_status: PresentStatus,
    pub present_error: Option<Error>,
    pub fail_pipelines: bool,
    pub fail_allocations: bool,
    /// Backend stage that fails on creation ("instance", "surface", "device", "allocator")
    pub fail_stage: Option<&'static str>,
    /// Properties of the memory type picked for non host-visible requests
    pub device_local_properties: MemoryProperties,
    next_handle: u64,
    swapchains: FxHashMap<SwapchainHandle, (Vec<ImageHandle>, u32)>,
    fences: FxHashMap<FenceHandle, bool>,
    pools: FxHashMap<DescriptorPoolHandle, (u32, u32)>,
    live: FxHashMap<&'static str, FxHashSet<u64>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            capabilities: SurfaceCapabilities {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: Extent2D::new(u32::MAX, u32::MAX),
                min_image_extent: Extent2D::new(1, 1),
                max_image_extent: Extent2D::new(4096, 4096),
            },
            formats: vec![SurfaceFormat {
                format: Format::B8G8R8A8_SRGB,
                color_space: ColorSpace::SrgbNonlinear,
            }],
            present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
            queue_families: QueueFamilyIndices { graphics: 0, present: 0 },
            acquire_suboptimal: false,
            acquire_error: None,
            fence_wait_error: None,
            present_status: PresentStatus::Success,
            present_error: None,
            fail_pipelines: false,
            fail_allocations: false,
            fail_stage: None,
            device_local_properties: MemoryProperties::DEVICE_LOCAL,
            next_handle: 0,
            swapchains: FxHashMap::default(),
            fences: FxHashMap::default(),
            pools: FxHashMap::default(),
            live: FxHashMap::default(),
        }
    }
}

impl MockState {
    fn record(&mut self, call: MockCall) {
        self.calls.push(call);
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn track(&mut self, kind: &'static str, id: u64) {
        self.live.entry(kind).or_default().insert(id);
    }

    fn untrack(&mut self, kind: &'static str, id: u64) {
        let removed = self.live.get_mut(kind).is_some_and(|set| set.remove(&id));
        assert!(removed, "mock: destroy of unknown {} {}", kind, id);
    }

    /// Number of live objects of `kind` ("buffer", "image", "image_view", "framebuffer", ...)
    pub fn live_count(&self, kind: &str) -> usize {
        self.live.get(kind).map_or(0, |set| set.len())
    }

    pub fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }
}

// ============================================================================
// Mock GraphicsDevice
// ============================================================================

/// Cloneable view over the shared mock state; tests keep a clone to inspect it
#[derive(Clone, Default)]
pub struct MockGraphicsDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockGraphicsDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.state().count(predicate)
    }

    pub fn live_count(&self, kind: &str) -> usize {
        self.state().live_count(kind)
    }

    /// Allocator bound to the same state
    pub fn allocator(&self) -> MockAllocator {
        MockAllocator { state: Arc::clone(&self.state) }
    }

    fn create_object(&self, kind: &'static str) -> u64 {
        let mut state = self.state();
        let id = state.next();
        state.track(kind, id);
        id
    }
}

impl GraphicsDevice for MockGraphicsDevice {
    fn queue_family_indices(&self) -> QueueFamilyIndices {
        self.state().queue_families
    }

    fn wait_idle(&self) -> Result<()> {
        self.state().record(MockCall::WaitIdle);
        Ok(())
    }

    fn surface_capabilities(&self) -> Result<SurfaceCapabilities> {
        Ok(self.state().capabilities)
    }

    fn surface_formats(&self) -> Result<Vec<SurfaceFormat>> {
        Ok(self.state().formats.clone())
    }

    fn surface_present_modes(&self) -> Result<Vec<PresentMode>> {
        Ok(self.state().present_modes.clone())
    }

    fn create_swapchain(&self, info: &SwapchainCreateInfo) -> Result<SwapchainHandle> {
        let mut state = self.state();
        let handle = SwapchainHandle(state.next());
        state.track("swapchain", handle.0);
        let images = (0..info.min_image_count)
            .map(|_| ImageHandle(state.next()))
            .collect();
        state.swapchains.insert(handle, (images, 0));
        state.record(MockCall::CreateSwapchain(handle, info.clone()));
        Ok(handle)
    }

    fn swapchain_images(&self, swapchain: SwapchainHandle) -> Result<Vec<ImageHandle>> {
        let state = self.state();
        match state.swapchains.get(&swapchain) {
            Some((images, _)) => Ok(images.clone()),
            None => Err(Error::InvalidResource(format!("mock: unknown swapchain {:?}", swapchain))),
        }
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        let mut state = self.state();
        state.untrack("swapchain", swapchain.0);
        state.swapchains.remove(&swapchain);
        state.record(MockCall::DestroySwapchain(swapchain));
    }

    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        semaphore: SemaphoreHandle,
    ) -> Result<AcquiredImage> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.record(MockCall::AcquireNextImage { swapchain, semaphore });
        if let Some(error) = state.acquire_error.clone() {
            return Err(error);
        }
        let (images, cursor) = state
            .swapchains
            .get_mut(&swapchain)
            .unwrap_or_else(|| panic!("mock: acquire on unknown swapchain {:?}", swapchain));
        let index = *cursor % images.len() as u32;
        *cursor += 1;
        Ok(AcquiredImage { index, suboptimal: state.acquire_suboptimal })
    }

    fn queue_present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait_semaphores: &[SemaphoreHandle],
    ) -> Result<PresentStatus> {
        let mut state = self.state();
        state.record(MockCall::QueuePresent {
            swapchain,
            image_index,
            wait: wait_semaphores.to_vec(),
        });
        match state.present_error.clone() {
            Some(error) => Err(error),
            None => Ok(state.present_status),
        }
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> Result<ImageViewHandle> {
        let handle = ImageViewHandle(self.create_object("image_view"));
        self.state().record(MockCall::CreateImageView(handle, *desc));
        Ok(handle)
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        let mut state = self.state();
        state.untrack("image_view", view.0);
        state.record(MockCall::DestroyImageView(view));
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> Result<SamplerHandle> {
        let handle = SamplerHandle(self.create_object("sampler"));
        self.state().record(MockCall::CreateSampler(handle));
        Ok(handle)
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        let mut state = self.state();
        state.untrack("sampler", sampler.0);
        state.record(MockCall::DestroySampler(sampler));
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<RenderPassHandle> {
        let handle = RenderPassHandle(self.create_object("render_pass"));
        self.state().record(MockCall::CreateRenderPass(handle, desc.clone()));
        Ok(handle)
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        let mut state = self.state();
        state.untrack("render_pass", render_pass.0);
        state.record(MockCall::DestroyRenderPass(render_pass));
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<FramebufferHandle> {
        let handle = FramebufferHandle(self.create_object("framebuffer"));
        self.state().record(MockCall::CreateFramebuffer(handle, desc.clone()));
        Ok(handle)
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        let mut state = self.state();
        state.untrack("framebuffer", framebuffer.0);
        state.record(MockCall::DestroyFramebuffer(framebuffer));
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<PipelineObjects> {
        let mut state = self.state();
        if state.fail_pipelines {
            return Err(Error::BackendError(format!(
                "mock: failed to load shaders for pipeline '{}'",
                desc.name
            )));
        }
        let objects = PipelineObjects {
            pipeline: PipelineHandle(state.next()),
            layout: PipelineLayoutHandle(state.next()),
            descriptor_set_layout: DescriptorSetLayoutHandle(state.next()),
        };
        state.track("pipeline", objects.pipeline.0);
        state.record(MockCall::CreatePipeline(desc.name.clone(), objects.clone()));
        Ok(objects)
    }

    fn destroy_pipeline(&self, objects: &PipelineObjects) {
        let mut state = self.state();
        state.untrack("pipeline", objects.pipeline.0);
        state.record(MockCall::DestroyPipeline(objects.pipeline));
    }

    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc) -> Result<DescriptorPoolHandle> {
        let handle = DescriptorPoolHandle(self.create_object("descriptor_pool"));
        let mut state = self.state();
        state.pools.insert(handle, (desc.max_sets, 0));
        state.record(MockCall::CreateDescriptorPool(handle));
        Ok(handle)
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        let mut state = self.state();
        state.untrack("descriptor_pool", pool.0);
        state.pools.remove(&pool);
        state.record(MockCall::DestroyDescriptorPool(pool));
    }

    fn reset_descriptor_pool(&self, pool: DescriptorPoolHandle) -> Result<()> {
        let mut state = self.state();
        if let Some((_, allocated)) = state.pools.get_mut(&pool) {
            *allocated = 0;
        }
        state.record(MockCall::ResetDescriptorPool(pool));
        Ok(())
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        _layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle> {
        let mut guard = self.state();
        let state = &mut *guard;
        let (max_sets, allocated) = state
            .pools
            .get_mut(&pool)
            .unwrap_or_else(|| panic!("mock: allocate from unknown pool {:?}", pool));
        if *allocated >= *max_sets {
            return Err(Error::ResourceExhausted("mock: descriptor pool exhausted".to_string()));
        }
        *allocated += 1;
        let handle = DescriptorSetHandle(state.next());
        state.record(MockCall::AllocateDescriptorSet(handle));
        Ok(handle)
    }

    fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        self.state().record(MockCall::UpdateDescriptorSet(set, writes.to_vec()));
    }

    fn allocate_command_buffer(&self, kind: CommandBufferKind) -> Result<CommandBufferHandle> {
        let handle = CommandBufferHandle(self.create_object("command_buffer"));
        self.state().record(MockCall::AllocateCommandBuffer(kind, handle));
        Ok(handle)
    }

    fn free_command_buffer(&self, _kind: CommandBufferKind, command_buffer: CommandBufferHandle) {
        let mut state = self.state();
        state.untrack("command_buffer", command_buffer.0);
        state.record(MockCall::FreeCommandBuffer(command_buffer));
    }

    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle, _one_time_submit: bool) -> Result<()> {
        self.state().record(MockCall::BeginCommandBuffer(command_buffer));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<()> {
        self.state().record(MockCall::EndCommandBuffer(command_buffer));
        Ok(())
    }

    fn create_semaphore(&self) -> Result<SemaphoreHandle> {
        let handle = SemaphoreHandle(self.create_object("semaphore"));
        self.state().record(MockCall::CreateSemaphore(handle));
        Ok(handle)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        let mut state = self.state();
        state.untrack("semaphore", semaphore.0);
        state.record(MockCall::DestroySemaphore(semaphore));
    }

    fn create_fence(&self, signaled: bool) -> Result<FenceHandle> {
        let handle = FenceHandle(self.create_object("fence"));
        let mut state = self.state();
        state.fences.insert(handle, signaled);
        state.record(MockCall::CreateFence(handle));
        Ok(handle)
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let mut state = self.state();
        state.untrack("fence", fence.0);
        state.fences.remove(&fence);
        state.record(MockCall::DestroyFence(fence));
    }

    fn wait_for_fence(&self, fence: FenceHandle, _timeout_ns: u64) -> Result<()> {
        let mut state = self.state();
        state.record(MockCall::WaitForFence(fence));
        if let Some(error) = state.fence_wait_error.clone() {
            return Err(error);
        }
        match state.fences.get(&fence) {
            Some(true) => Ok(()),
            Some(false) => Err(Error::BackendError(format!(
                "mock: wait on fence {:?} that no submission will signal",
                fence
            ))),
            None => Err(Error::InvalidResource(format!("mock: unknown fence {:?}", fence))),
        }
    }

    fn reset_fence(&self, fence: FenceHandle) -> Result<()> {
        let mut state = self.state();
        state.record(MockCall::ResetFence(fence));
        state.fences.insert(fence, false);
        Ok(())
    }

    fn queue_submit(&self, submit: &SubmitInfo<'_>) -> Result<()> {
        let mut state = self.state();
        assert_eq!(
            submit.wait_semaphores.len(),
            submit.wait_stages.len(),
            "mock: one wait stage per wait semaphore"
        );
        if !submit.fence.is_null() {
            let signaled = state.fences.insert(submit.fence, true);
            assert_eq!(signaled, Some(false), "mock: submit with a signaled or unknown fence");
        }
        state.record(MockCall::QueueSubmit {
            command_buffer: submit.command_buffer,
            wait: submit.wait_semaphores.to_vec(),
            signal: submit.signal_semaphores.to_vec(),
            fence: submit.fence,
        });
        Ok(())
    }

    fn cmd_pipeline_barrier(&self, _command_buffer: CommandBufferHandle, barrier: &ImageBarrier) {
        self.state().record(MockCall::PipelineBarrier(*barrier));
    }

    fn cmd_copy_buffer(&self, _command_buffer: CommandBufferHandle, src: BufferHandle, dst: BufferHandle, size: u64) {
        self.state().record(MockCall::CopyBuffer { src, dst, size });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        _command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        extent: Extent2D,
    ) {
        self.state().record(MockCall::CopyBufferToImage { src, dst, extent });
    }

    fn cmd_blit_image(&self, _command_buffer: CommandBufferHandle, image: ImageHandle, region: &BlitRegion) {
        self.state().record(MockCall::BlitImage(image, *region));
    }

    fn cmd_begin_render_pass(&self, _command_buffer: CommandBufferHandle, begin: &RenderPassBegin) {
        self.state().record(MockCall::BeginRenderPass(begin.clone()));
    }

    fn cmd_end_render_pass(&self, _command_buffer: CommandBufferHandle) {
        self.state().record(MockCall::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, _command_buffer: CommandBufferHandle, pipeline: PipelineHandle) {
        self.state().record(MockCall::BindPipeline(pipeline));
    }

    fn cmd_set_viewport(&self, _command_buffer: CommandBufferHandle, viewport: &Viewport) {
        self.state().record(MockCall::SetViewport(*viewport));
    }

    fn cmd_set_scissor(&self, _command_buffer: CommandBufferHandle, scissor: &Rect2D) {
        self.state().record(MockCall::SetScissor(*scissor));
    }

    fn cmd_bind_vertex_buffer(&self, _command_buffer: CommandBufferHandle, buffer: BufferHandle, _offset: u64) {
        self.state().record(MockCall::BindVertexBuffer(buffer));
    }

    fn cmd_bind_index_buffer(
        &self,
        _command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        _offset: u64,
        index_type: IndexType,
    ) {
        self.state().record(MockCall::BindIndexBuffer(buffer, index_type));
    }

    fn cmd_bind_descriptor_set(
        &self,
        _command_buffer: CommandBufferHandle,
        _layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    ) {
        self.state().record(MockCall::BindDescriptorSet(set));
    }

    fn cmd_push_constants(
        &self,
        _command_buffer: CommandBufferHandle,
        _layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) {
        self.state().record(MockCall::PushConstants { stages, offset, data: data.to_vec() });
    }

    fn cmd_draw_indexed(
        &self,
        _command_buffer: CommandBufferHandle,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) {
        self.state().record(MockCall::DrawIndexed { index_count, first_index, vertex_offset });
    }

    fn cmd_draw_indexed_indirect(
        &self,
        _command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        _offset: u64,
        draw_count: u32,
        stride: u32,
    ) {
        self.state().record(MockCall::DrawIndexedIndirect { buffer, draw_count, stride });
    }
}

// ============================================================================
// Mock allocator
// ============================================================================

/// Host-backed allocation; the bytes outlive any mapping handed out
pub struct MockAllocation {
    block: MemoryBlock,
    properties: MemoryProperties,
    storage: NonNull<[u8]>,
}

// SAFETY: the storage is uniquely owned by the allocation
unsafe impl Send for MockAllocation {}

impl MockAllocation {
    fn new(memory: DeviceMemoryHandle, size: u64, properties: MemoryProperties) -> Self {
        let bytes = vec![0u8; size.max(1) as usize].into_boxed_slice();
        Self {
            block: MemoryBlock { memory, offset: 0, size },
            properties,
            storage: NonNull::from(Box::leak(bytes)),
        }
    }
}

impl Drop for MockAllocation {
    fn drop(&mut self) {
        // SAFETY: storage came from Box::leak in `new` and is released once
        unsafe { drop(Box::from_raw(self.storage.as_ptr())) };
    }
}

impl DeviceAllocation for MockAllocation {
    fn memory_block(&self) -> MemoryBlock {
        self.block
    }

    fn memory_properties(&self) -> MemoryProperties {
        self.properties
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

pub struct MockAllocator {
    state: Arc<Mutex<MockState>>,
}

impl MockAllocator {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn allocate(&self, kind: &'static str, size: u64, requested: MemoryProperties) -> Result<(u64, MockAllocation)> {
        let mut state = self.state();
        if state.fail_allocations {
            return Err(Error::OutOfMemory);
        }
        let properties = if requested.contains(MemoryProperties::HOST_VISIBLE) {
            requested
        } else {
            state.device_local_properties
        };
        let id = state.next();
        state.track(kind, id);
        Ok((id, MockAllocation::new(DeviceMemoryHandle(id), size, properties)))
    }

    fn release(&self, kind: &'static str, id: u64, allocation: Box<dyn DeviceAllocation>) {
        assert!(
            allocation.into_any().downcast::<MockAllocation>().is_ok(),
            "mock: foreign allocation handed back"
        );
        self.state().untrack(kind, id);
    }
}

impl DeviceAllocator for MockAllocator {
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<(BufferHandle, Box<dyn DeviceAllocation>)> {
        let (id, allocation) = self.allocate("buffer", desc.size, desc.memory_properties)?;
        let handle = BufferHandle(id);
        self.state().record(MockCall::CreateBuffer(handle, *desc));
        Ok((handle, Box::new(allocation)))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle, allocation: Box<dyn DeviceAllocation>) {
        self.release("buffer", buffer.0, allocation);
        self.state().record(MockCall::DestroyBuffer(buffer));
    }

    fn create_image(&mut self, desc: &ImageDesc) -> Result<(ImageHandle, Box<dyn DeviceAllocation>)> {
        let size = desc.extent.width as u64 * desc.extent.height as u64 * 4;
        let (id, allocation) = self.allocate("image", size, desc.memory_properties)?;
        let handle = ImageHandle(id);
        self.state().record(MockCall::CreateImage(handle, *desc));
        Ok((handle, Box::new(allocation)))
    }

    fn destroy_image(&mut self, image: ImageHandle, allocation: Box<dyn DeviceAllocation>) {
        self.release("image", image.0, allocation);
        self.state().record(MockCall::DestroyImage(image));
    }

    fn map(&mut self, allocation: &dyn DeviceAllocation) -> Result<NonNull<u8>> {
        let Some(allocation) = allocation.as_any().downcast_ref::<MockAllocation>() else {
            return Err(Error::InvalidResource("mock: foreign allocation".to_string()));
        };
        if !allocation.properties.contains(MemoryProperties::HOST_VISIBLE) {
            return Err(Error::InvalidResource("mock: map of device-local memory".to_string()));
        }
        self.state().record(MockCall::Map(allocation.block.memory));
        Ok(allocation.storage.cast::<u8>())
    }

    fn unmap(&mut self, allocation: &dyn DeviceAllocation) {
        self.state().record(MockCall::Unmap(allocation.memory_block().memory));
    }

    fn flush(&self, allocation: &dyn DeviceAllocation) -> Result<()> {
        self.state().record(MockCall::Flush(allocation.memory_block().memory));
        Ok(())
    }
}

// ============================================================================
// Mock backend
// ============================================================================

pub struct MockBackend {
    device: MockGraphicsDevice,
    issued: Option<Arc<dyn GraphicsDevice>>,
    instance: bool,
    surface: bool,
}

impl MockBackend {
    /// Backend plus a handle on its state for assertions
    pub fn new() -> (Self, MockGraphicsDevice) {
        let device = MockGraphicsDevice::new();
        let backend = Self {
            device: device.clone(),
            issued: None,
            instance: false,
            surface: false,
        };
        (backend, device)
    }

    fn check_stage(&self, stage: &'static str) -> Result<()> {
        if self.device.state().fail_stage == Some(stage) {
            return Err(Error::InitializationFailed(format!("mock: {} creation failed", stage)));
        }
        Ok(())
    }
}

impl GraphicsBackend for MockBackend {
    fn create_instance(&mut self, config: &Config) -> Result<()> {
        self.check_stage("instance")?;
        self.device.state().record(MockCall::CreateInstance {
            app_name: config.app_name.clone(),
            validation: config.enable_validation,
        });
        self.instance = true;
        Ok(())
    }

    fn create_surface(&mut self, _window: &dyn Window) -> Result<()> {
        self.check_stage("surface")?;
        self.device.state().record(MockCall::CreateSurface);
        self.surface = true;
        Ok(())
    }

    fn create_device(&mut self) -> Result<Arc<dyn GraphicsDevice>> {
        self.check_stage("device")?;
        self.device.state().record(MockCall::CreateDevice);
        let device: Arc<dyn GraphicsDevice> = Arc::new(self.device.clone());
        self.issued = Some(Arc::clone(&device));
        Ok(device)
    }

    fn create_allocator(&mut self) -> Result<Box<dyn DeviceAllocator>> {
        self.check_stage("allocator")?;
        self.device.state().record(MockCall::CreateAllocator);
        Ok(Box::new(self.device.allocator()))
    }

    fn destroy_device(&mut self) {
        if let Some(device) = self.issued.take() {
            assert_eq!(Arc::strong_count(&device), 1, "mock: device destroyed while still referenced");
            self.device.state().record(MockCall::DestroyDevice);
        }
    }

    fn destroy_surface(&mut self) {
        if std::mem::take(&mut self.surface) {
            self.device.state().record(MockCall::DestroySurface);
        }
    }

    fn destroy_instance(&mut self) {
        if std::mem::take(&mut self.instance) {
            self.device.state().record(MockCall::DestroyInstance);
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Device + memory manager over a fresh mock, for resource-level tests
pub fn mock_gpu_context() -> (Arc<GpuContext>, MockGraphicsDevice) {
    let mock = MockGraphicsDevice::new();
    let device = Arc::new(Device::new(Arc::new(mock.clone())).unwrap());
    let memory = MemoryManager::new(Box::new(mock.allocator()));
    (Arc::new(GpuContext::new(device, memory)), mock)
}

/// Two textured quads on two nodes, with a `texture_size`² checkerboard
pub fn test_scene_data(texture_size: u32) -> SceneData {
    let quad = |z: f32| {
        [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]].map(|[x, y]| Vertex {
            position: [x, y, z],
            normal: [0.0, 0.0, 1.0],
            uv: [(x + 1.0) * 0.5, (y + 1.0) * 0.5],
        })
    };
    let vertices: Vec<Vertex> = quad(0.0).into_iter().chain(quad(-1.0)).collect();
    let indices = vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4];
    let pixels = (0..texture_size * texture_size)
        .flat_map(|i| {
            let (x, y) = (i % texture_size, i / texture_size);
            if (x / 8 + y / 8) % 2 == 0 { [255u8; 4] } else { [0, 0, 0, 255] }
        })
        .collect();

    SceneData {
        vertices,
        indices,
        primitives: vec![
            Primitive { first_index: 0, index_count: 6, node: 0 },
            Primitive { first_index: 6, index_count: 6, node: 1 },
        ],
        transforms: vec![Mat4::IDENTITY, Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0))],
        texture: TextureData {
            extent: Extent2D::new(texture_size, texture_size),
            pixels,
        },
    }
}

// ============================================================================
// Mock window
// ============================================================================

/// Scripted input delivered by one `poll_events` call
#[derive(Debug, Clone)]
pub enum MockWindowEvent {
    Resize(u32, u32),
    KeyPressed(Key),
    OpenScene(Arc<SceneData>),
    CloseScene,
    /// Fullscreen toggle: the window is rebuilt with the given size
    Recreate(u32, u32),
    CursorMode(CursorMode),
    Close,
}

struct MockWindowState {
    extent: Extent2D,
    script: VecDeque<Vec<MockWindowEvent>>,
    polls: usize,
    close_requested: bool,
}

/// Window whose events are scripted per poll; clones share the script
#[derive(Clone)]
pub struct MockWindow {
    state: Rc<RefCell<MockWindowState>>,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Rc::new(RefCell::new(MockWindowState {
                extent: Extent2D::new(width, height),
                script: VecDeque::new(),
                polls: 0,
                close_requested: false,
            })),
        }
    }

    /// Queue the events delivered by the next unscripted poll
    pub fn push_poll(&self, events: Vec<MockWindowEvent>) {
        self.state.borrow_mut().script.push_back(events);
    }

    pub fn polls(&self) -> usize {
        self.state.borrow().polls
    }
}

impl HasWindowHandle for MockWindow {
    fn window_handle(&self) -> std::result::Result<WindowHandle<'_>, HandleError> {
        Err(HandleError::Unavailable)
    }
}

impl HasDisplayHandle for MockWindow {
    fn display_handle(&self) -> std::result::Result<DisplayHandle<'_>, HandleError> {
        Err(HandleError::Unavailable)
    }
}

impl Window for MockWindow {
    fn should_close(&self) -> bool {
        let state = self.state.borrow();
        state.close_requested
    }

    fn poll_events(&mut self, events: &mut EventBus) {
        let batch = {
            let mut state = self.state.borrow_mut();
            state.polls += 1;
            state.script.pop_front().unwrap_or_default()
        };
        for event in batch {
            match event {
                MockWindowEvent::Resize(width, height) => {
                    self.state.borrow_mut().extent = Extent2D::new(width, height);
                    events.publish(&WindowResized { width, height });
                }
                MockWindowEvent::KeyPressed(key) => {
                    events.publish(&KeyInput { key, pressed: true });
                }
                MockWindowEvent::OpenScene(data) => {
                    events.publish(&SceneOpened { data });
                }
                MockWindowEvent::CloseScene => {
                    events.publish(&SceneClosed);
                }
                MockWindowEvent::Recreate(width, height) => {
                    events.publish(&BeforeWindowRecreated);
                    self.state.borrow_mut().extent = Extent2D::new(width, height);
                    events.publish(&WindowRecreated);
                }
                MockWindowEvent::CursorMode(mode) => {
                    events.publish(&BeforeCursorModeUpdated { mode });
                }
                MockWindowEvent::Close => {
                    self.state.borrow_mut().close_requested = true;
                }
            }
        }
    }

    fn extent_in_pixels(&self) -> Extent2D {
        self.state.borrow().extent
    }
}

#[cfg(test)]
#[path = "mock_graphics_device_tests.rs"]
mod tests;
