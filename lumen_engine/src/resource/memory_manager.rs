/// Memory manager: bookkeeping over the device sub-allocator
///
/// Every live buffer and image maps to exactly one allocation record. The
/// record is created with the resource and released with it; destroying a
/// handle that is not tracked is a fatal error (double destroy or foreign
/// handle). Whatever is still tracked when the manager drops is reported as a
/// leak and freed.

use std::ptr::NonNull;

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::graphics_device::{
    BufferDesc, BufferHandle, DeviceAllocation, DeviceAllocator, ImageDesc, ImageHandle,
    MemoryBlock, MemoryProperties,
};
use crate::{engine_debug, engine_error, engine_fatal};

const SOURCE: &str = "lumen::MemoryManager";

pub struct MemoryManager {
    allocator: Box<dyn DeviceAllocator>,
    buffers: FxHashMap<BufferHandle, Box<dyn DeviceAllocation>>,
    images: FxHashMap<ImageHandle, Box<dyn DeviceAllocation>>,
}

impl MemoryManager {
    pub fn new(allocator: Box<dyn DeviceAllocator>) -> Self {
        Self {
            allocator,
            buffers: FxHashMap::default(),
            images: FxHashMap::default(),
        }
    }

    // ===== BUFFERS =====

    /// Create a buffer bound to a fresh sub-allocation
    pub fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        let (handle, allocation) = self.allocator.create_buffer(desc).map_err(|e| {
            engine_error!(SOURCE, "Failed to allocate buffer of {} bytes: {}", desc.size, e);
            e
        })?;

        engine_debug!(
            SOURCE,
            "Buffer {:?}: {} bytes, {:?}, memory {:?}",
            handle,
            desc.size,
            desc.usage,
            allocation.memory_properties()
        );

        if self.buffers.insert(handle, allocation).is_some() {
            engine_fatal!(SOURCE, "Allocator returned live buffer handle {:?}", handle);
        }
        Ok(handle)
    }

    pub fn destroy_buffer(&mut self, handle: BufferHandle) {
        match self.buffers.remove(&handle) {
            Some(allocation) => self.allocator.destroy_buffer(handle, allocation),
            None => engine_fatal!(SOURCE, "Destroy of unknown or already destroyed buffer {:?}", handle),
        }
    }

    /// Host pointer to the buffer's memory (host-visible buffers only)
    pub fn map_buffer_memory(&mut self, handle: BufferHandle) -> Result<NonNull<u8>> {
        let allocation = tracked_buffer(&self.buffers, handle);
        self.allocator.map(allocation)
    }

    pub fn unmap_buffer_memory(&mut self, handle: BufferHandle) {
        let allocation = tracked_buffer(&self.buffers, handle);
        self.allocator.unmap(allocation);
    }

    pub fn flush_buffer(&self, handle: BufferHandle) -> Result<()> {
        self.allocator.flush(self.buffer_allocation(handle))
    }

    pub fn buffer_memory_block(&self, handle: BufferHandle) -> MemoryBlock {
        self.buffer_allocation(handle).memory_block()
    }

    /// Properties of the memory type the allocator actually picked
    pub fn buffer_memory_properties(&self, handle: BufferHandle) -> MemoryProperties {
        self.buffer_allocation(handle).memory_properties()
    }

    fn buffer_allocation(&self, handle: BufferHandle) -> &dyn DeviceAllocation {
        tracked_buffer(&self.buffers, handle)
    }

    // ===== IMAGES =====

    pub fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageHandle> {
        let (handle, allocation) = self.allocator.create_image(desc).map_err(|e| {
            engine_error!(
                SOURCE,
                "Failed to allocate {}x{} image ({} mips): {}",
                desc.extent.width,
                desc.extent.height,
                desc.mip_levels,
                e
            );
            e
        })?;

        if self.images.insert(handle, allocation).is_some() {
            engine_fatal!(SOURCE, "Allocator returned live image handle {:?}", handle);
        }
        Ok(handle)
    }

    pub fn destroy_image(&mut self, handle: ImageHandle) {
        match self.images.remove(&handle) {
            Some(allocation) => self.allocator.destroy_image(handle, allocation),
            None => engine_fatal!(SOURCE, "Destroy of unknown or already destroyed image {:?}", handle),
        }
    }

    pub fn image_memory_block(&self, handle: ImageHandle) -> MemoryBlock {
        match self.images.get(&handle) {
            Some(allocation) => allocation.memory_block(),
            None => engine_fatal!(SOURCE, "Unknown image {:?}", handle),
        }
    }

    // ===== STATS =====

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

fn tracked_buffer(
    buffers: &FxHashMap<BufferHandle, Box<dyn DeviceAllocation>>,
    handle: BufferHandle,
) -> &dyn DeviceAllocation {
    match buffers.get(&handle) {
        Some(allocation) => allocation.as_ref(),
        None => engine_fatal!(SOURCE, "Unknown buffer {:?}", handle),
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        if !self.buffers.is_empty() || !self.images.is_empty() {
            engine_error!(
                SOURCE,
                "{} buffer(s) and {} image(s) leaked, freeing them",
                self.buffers.len(),
                self.images.len()
            );
        }
        for (handle, allocation) in self.buffers.drain() {
            self.allocator.destroy_buffer(handle, allocation);
        }
        for (handle, allocation) in self.images.drain() {
            self.allocator.destroy_image(handle, allocation);
        }
    }
}

#[cfg(test)]
#[path = "memory_manager_tests.rs"]
mod tests;
