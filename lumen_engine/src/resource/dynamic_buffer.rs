/// Growable host-visible buffer, rewritten every frame (UI geometry)

use std::sync::Arc;

use crate::context::GpuContext;
use crate::error::Result;
use crate::graphics_device::{BufferDesc, BufferHandle, BufferUsage, MemoryProperties};
use crate::{engine_debug, engine_fatal};
use super::buffer::Buffer;

const SOURCE: &str = "lumen::DynamicBuffer";
const MIN_CAPACITY: u64 = 1024;

/// Persistently mapped buffer that grows geometrically
///
/// Growth drops the old buffer immediately, so the owner must guarantee the
/// GPU is done with it (per-frame buffers after their frame fence).
pub struct DynamicBuffer {
    ctx: Arc<GpuContext>,
    usage: BufferUsage,
    buffer: Option<Buffer>,
}

impl DynamicBuffer {
    pub fn new(ctx: Arc<GpuContext>, usage: BufferUsage) -> Self {
        Self { ctx, usage, buffer: None }
    }

    pub fn capacity(&self) -> u64 {
        self.buffer.as_ref().map_or(0, |b| b.size())
    }

    pub fn handle(&self) -> BufferHandle {
        self.buffer.as_ref().map_or(BufferHandle::NULL, |b| b.handle())
    }

    /// Make room for `size` bytes; returns true when the buffer was reallocated
    pub fn ensure_capacity(&mut self, size: u64) -> Result<bool> {
        if size <= self.capacity() {
            return Ok(false);
        }

        let capacity = size.next_power_of_two().max(MIN_CAPACITY);
        self.buffer = None;
        let mut buffer = Buffer::new(
            Arc::clone(&self.ctx),
            BufferDesc {
                size: capacity,
                usage: self.usage,
                memory_properties: MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
            },
        )?;
        buffer.map_memory(true)?;
        engine_debug!(SOURCE, "Grew {:?} buffer to {} bytes", self.usage, capacity);
        self.buffer = Some(buffer);
        Ok(true)
    }

    /// Copy `data` at byte `offset`; the range must fit the current capacity
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset + data.len();
        let Some(buffer) = self.buffer.as_mut() else {
            engine_fatal!(SOURCE, "Write of {} bytes into an unallocated buffer", data.len());
        };
        if end as u64 > buffer.size() {
            engine_fatal!(SOURCE, "Write of {}..{} past capacity {}", offset, end, buffer.size());
        }
        let bytes = buffer.map_memory(true)?;
        bytes[offset..end].copy_from_slice(data);
        buffer.flush()
    }
}

#[cfg(test)]
#[path = "dynamic_buffer_tests.rs"]
mod tests;
