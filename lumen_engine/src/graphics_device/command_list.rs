/// Command list: a command buffer paired with the device that records into it

use super::graphics_device::GraphicsDevice;
use super::types::*;

/// Borrowed recording handle for one command buffer
///
/// Recording methods forward to the device; the list itself owns nothing.
#[derive(Clone, Copy)]
pub struct CommandList<'a> {
    device: &'a dyn GraphicsDevice,
    command_buffer: CommandBufferHandle,
}

impl<'a> CommandList<'a> {
    pub fn new(device: &'a dyn GraphicsDevice, command_buffer: CommandBufferHandle) -> Self {
        Self { device, command_buffer }
    }

    pub fn handle(&self) -> CommandBufferHandle {
        self.command_buffer
    }

    pub fn device(&self) -> &'a dyn GraphicsDevice {
        self.device
    }

    pub fn pipeline_barrier(&self, barrier: &ImageBarrier) {
        self.device.cmd_pipeline_barrier(self.command_buffer, barrier);
    }

    pub fn copy_buffer(&self, src: BufferHandle, dst: BufferHandle, size: u64) {
        self.device.cmd_copy_buffer(self.command_buffer, src, dst, size);
    }

    pub fn copy_buffer_to_image(&self, src: BufferHandle, dst: ImageHandle, extent: Extent2D) {
        self.device.cmd_copy_buffer_to_image(self.command_buffer, src, dst, extent);
    }

    pub fn blit_image(&self, image: ImageHandle, region: &BlitRegion) {
        self.device.cmd_blit_image(self.command_buffer, image, region);
    }

    pub fn begin_render_pass(&self, begin: &RenderPassBegin) {
        self.device.cmd_begin_render_pass(self.command_buffer, begin);
    }

    pub fn end_render_pass(&self) {
        self.device.cmd_end_render_pass(self.command_buffer);
    }

    pub fn bind_pipeline(&self, pipeline: PipelineHandle) {
        self.device.cmd_bind_pipeline(self.command_buffer, pipeline);
    }

    pub fn set_viewport(&self, viewport: &Viewport) {
        self.device.cmd_set_viewport(self.command_buffer, viewport);
    }

    pub fn set_scissor(&self, scissor: &Rect2D) {
        self.device.cmd_set_scissor(self.command_buffer, scissor);
    }

    pub fn bind_vertex_buffer(&self, buffer: BufferHandle, offset: u64) {
        self.device.cmd_bind_vertex_buffer(self.command_buffer, buffer, offset);
    }

    pub fn bind_index_buffer(&self, buffer: BufferHandle, offset: u64, index_type: IndexType) {
        self.device.cmd_bind_index_buffer(self.command_buffer, buffer, offset, index_type);
    }

    pub fn bind_descriptor_set(&self, layout: PipelineLayoutHandle, set: DescriptorSetHandle) {
        self.device.cmd_bind_descriptor_set(self.command_buffer, layout, set);
    }

    pub fn push_constants(&self, layout: PipelineLayoutHandle, stages: ShaderStages, offset: u32, data: &[u8]) {
        self.device.cmd_push_constants(self.command_buffer, layout, stages, offset, data);
    }

    pub fn draw_indexed(&self, index_count: u32, first_index: u32, vertex_offset: i32) {
        self.device.cmd_draw_indexed(self.command_buffer, index_count, first_index, vertex_offset);
    }

    pub fn draw_indexed_indirect(&self, buffer: BufferHandle, offset: u64, draw_count: u32, stride: u32) {
        self.device.cmd_draw_indexed_indirect(self.command_buffer, buffer, offset, draw_count, stride);
    }
}
