/// Frames in flight
///
/// Each slot of the ring owns a command buffer, its synchronization objects
/// and a persistently mapped uniform buffer. A slot is reused only after its
/// fence reports the previous submission complete.

use std::sync::Arc;

use crate::context::{Device, GpuContext};
use crate::error::Result;
use crate::graphics_device::{
    BufferDesc, BufferUsage, CommandBufferHandle, CommandBufferKind, DescriptorSetHandle,
    FenceHandle, MemoryProperties, PipelineStages, SemaphoreHandle, SubmitInfo,
};
use crate::resource::Buffer;
use crate::engine_fatal;

const SOURCE: &str = "lumen::Frame";

// ===== SYNC =====

/// Semaphores and fence guarding one command buffer submission
pub struct CommandBufferSync {
    device: Arc<Device>,
    wait_semaphores: Vec<SemaphoreHandle>,
    wait_stages: Vec<PipelineStages>,
    signal_semaphores: Vec<SemaphoreHandle>,
    fence: FenceHandle,
}

impl CommandBufferSync {
    /// Acquire semaphore (waited at color output), render-finished semaphore,
    /// and a fence created signaled so the first wait returns immediately
    pub fn new(device: &Arc<Device>) -> Result<Self> {
        let raw = device.raw();
        let mut sync = Self {
            device: Arc::clone(device),
            wait_semaphores: Vec::new(),
            wait_stages: Vec::new(),
            signal_semaphores: Vec::new(),
            fence: FenceHandle::NULL,
        };
        sync.wait_semaphores.push(raw.create_semaphore()?);
        sync.wait_stages.push(PipelineStages::COLOR_ATTACHMENT_OUTPUT);
        sync.signal_semaphores.push(raw.create_semaphore()?);
        sync.fence = raw.create_fence(true)?;
        Ok(sync)
    }

    pub fn image_available(&self) -> SemaphoreHandle { self.wait_semaphores[0] }

    pub fn render_finished(&self) -> SemaphoreHandle { self.signal_semaphores[0] }

    pub fn fence(&self) -> FenceHandle { self.fence }

    pub fn signal_semaphores(&self) -> &[SemaphoreHandle] { &self.signal_semaphores }

    pub fn submit_info(&self, command_buffer: CommandBufferHandle) -> SubmitInfo<'_> {
        SubmitInfo {
            command_buffer,
            wait_semaphores: &self.wait_semaphores,
            wait_stages: &self.wait_stages,
            signal_semaphores: &self.signal_semaphores,
            fence: self.fence,
        }
    }
}

impl Drop for CommandBufferSync {
    fn drop(&mut self) {
        let raw = self.device.raw();
        for semaphore in self.wait_semaphores.drain(..).chain(self.signal_semaphores.drain(..)) {
            raw.destroy_semaphore(semaphore);
        }
        if !self.fence.is_null() {
            raw.destroy_fence(self.fence);
        }
    }
}

// ===== STATE =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

impl FrameState {
    /// The only state allowed to follow `self`
    pub fn successor(self) -> FrameState {
        match self {
            FrameState::Idle => FrameState::Acquiring,
            FrameState::Acquiring => FrameState::Recording,
            FrameState::Recording => FrameState::Submitted,
            FrameState::Submitted => FrameState::Presenting,
            FrameState::Presenting => FrameState::Idle,
        }
    }
}

// ===== FRAME =====

pub struct Frame {
    index: usize,
    device: Arc<Device>,
    command_buffer: CommandBufferHandle,
    sync: CommandBufferSync,
    uniform_buffer: Buffer,
    descriptor_set: DescriptorSetHandle,
    image_index: Option<u32>,
    state: FrameState,
}

impl Frame {
    pub fn new(ctx: &Arc<GpuContext>, index: usize, uniform_size: u64) -> Result<Self> {
        let device = Arc::clone(ctx.device());
        let mut uniform_buffer = Buffer::new(
            Arc::clone(ctx),
            BufferDesc {
                size: uniform_size,
                usage: BufferUsage::UNIFORM,
                memory_properties: MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
            },
        )?;
        uniform_buffer.map_memory(true)?;
        let sync = CommandBufferSync::new(&device)?;
        let command_buffer = device.allocate_command_buffer(CommandBufferKind::Frame)?;

        Ok(Self {
            index,
            device,
            command_buffer,
            sync,
            uniform_buffer,
            descriptor_set: DescriptorSetHandle::NULL,
            image_index: None,
            state: FrameState::Idle,
        })
    }

    pub fn index(&self) -> usize { self.index }

    pub fn state(&self) -> FrameState { self.state }

    pub fn command_buffer(&self) -> CommandBufferHandle { self.command_buffer }

    pub fn sync(&self) -> &CommandBufferSync { &self.sync }

    pub fn uniform_buffer(&self) -> &Buffer { &self.uniform_buffer }

    pub fn descriptor_set(&self) -> DescriptorSetHandle { self.descriptor_set }

    pub fn set_descriptor_set(&mut self, set: DescriptorSetHandle) {
        self.descriptor_set = set;
    }

    /// Swapchain image acquired for the frame being built
    pub fn image_index(&self) -> Option<u32> { self.image_index }

    pub fn set_image_index(&mut self, index: u32) {
        self.image_index = Some(index);
    }

    /// Advance the state machine; anything but the successor state is fatal
    pub fn transition(&mut self, next: FrameState) {
        if self.state.successor() != next {
            engine_fatal!(
                SOURCE,
                "Illegal frame {} transition {:?} -> {:?}",
                self.index,
                self.state,
                next
            );
        }
        if next == FrameState::Idle {
            self.image_index = None;
        }
        self.state = next;
    }

    /// Overwrite the frame uniforms (the slot's fence must have been waited)
    pub fn write_uniforms(&mut self, bytes: &[u8]) -> Result<()> {
        self.uniform_buffer.fill(bytes)
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.device.free_command_buffer(CommandBufferKind::Frame, self.command_buffer);
    }
}

// ===== RING =====

/// Fixed ring of frame slots
pub struct FrameRing {
    frames: Vec<Frame>,
    current: usize,
}

impl FrameRing {
    pub fn new(ctx: &Arc<GpuContext>, frames_in_flight: usize, uniform_size: u64) -> Result<Self> {
        if frames_in_flight == 0 {
            engine_fatal!(SOURCE, "At least one frame in flight is required");
        }
        let frames = (0..frames_in_flight)
            .map(|index| Frame::new(ctx, index, uniform_size))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { frames, current: 0 })
    }

    pub fn len(&self) -> usize { self.frames.len() }

    pub fn is_empty(&self) -> bool { self.frames.is_empty() }

    pub fn current_index(&self) -> usize { self.current }

    pub fn current(&self) -> &Frame { &self.frames[self.current] }

    pub fn current_mut(&mut self) -> &mut Frame { &mut self.frames[self.current] }

    pub fn frames(&self) -> &[Frame] { &self.frames }

    pub fn frames_mut(&mut self) -> &mut [Frame] { &mut self.frames }

    /// Move to the next slot
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames.len();
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
