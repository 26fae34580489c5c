/// GPU buffer with optional staging upload path
///
/// A `Buffer` owns one device buffer and its memory block for its whole
/// lifetime; dropping it returns both to the memory manager. Moving a buffer
/// moves that ownership, copies are impossible.
///
/// Host-visible buffers are filled through a mapping. Device-local buffers
/// are filled through an explicit staging buffer:
///
/// ```text
/// create_staging_buffer → fill → submit_staging_copy → destroy_staging_buffer
///                           └──── record_staging_copy + complete_staging_copy
/// ```
///
/// The staging buffer cannot be destroyed while a copy out of it is pending.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::context::GpuContext;
use crate::error::Result;
use crate::graphics_device::{BufferDesc, BufferHandle, BufferUsage, CommandList, MemoryProperties};
use crate::{engine_fatal, engine_warn};

const SOURCE: &str = "lumen::Buffer";

// ===== STAGING STATE =====

/// Progress of the staging → device copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingCopy {
    /// Nothing waiting in the staging buffer
    Idle,
    /// Staging holds data that has not been copied yet
    Pending,
    /// Copy recorded into a caller command buffer, not yet known complete
    Recorded,
    /// Copy finished on the GPU
    Completed,
}

struct Mapping {
    ptr: NonNull<u8>,
    persistent: bool,
}

// ===== BUFFER =====

pub struct Buffer {
    ctx: Arc<GpuContext>,
    handle: BufferHandle,
    desc: BufferDesc,
    staging: Option<Box<Buffer>>,
    staging_copy: StagingCopy,
    mapping: Option<Mapping>,
}

impl Buffer {
    /// Allocate an uninitialized buffer
    pub fn new(ctx: Arc<GpuContext>, desc: BufferDesc) -> Result<Self> {
        let handle = ctx.memory().create_buffer(&desc)?;
        Ok(Self {
            ctx,
            handle,
            desc,
            staging: None,
            staging_copy: StagingCopy::Idle,
            mapping: None,
        })
    }

    /// Allocate a buffer and load `data` into it
    ///
    /// Host-visible buffers are written directly. Device-local buffers get a
    /// staging buffer holding the data; the copy is left pending so the
    /// caller picks `submit_staging_copy` or `record_staging_copy`.
    pub fn with_data(ctx: Arc<GpuContext>, desc: BufferDesc, data: &[u8]) -> Result<Self> {
        let mut buffer = Self::new(ctx, desc)?;
        if data.is_empty() {
            return Ok(buffer);
        }

        if buffer.is_host_visible() {
            buffer.fill(data)?;
        } else {
            buffer.create_staging_buffer()?;
            buffer.fill_staging(data)?;
        }
        Ok(buffer)
    }

    pub fn handle(&self) -> BufferHandle { self.handle }

    pub fn size(&self) -> u64 { self.desc.size }

    pub fn description(&self) -> &BufferDesc { &self.desc }

    pub fn is_valid(&self) -> bool { !self.handle.is_null() }

    pub fn staging_copy(&self) -> StagingCopy { self.staging_copy }

    pub fn has_staging_buffer(&self) -> bool { self.staging.is_some() }

    pub fn staging_buffer(&self) -> Option<&Buffer> { self.staging.as_deref() }

    pub fn is_host_visible(&self) -> bool {
        self.desc.memory_properties.contains(MemoryProperties::HOST_VISIBLE)
    }

    // ===== STAGING =====

    /// Create the host-visible staging buffer used to fill this buffer
    pub fn create_staging_buffer(&mut self) -> Result<()> {
        if self.staging.is_some() {
            return Ok(());
        }
        if !self.desc.usage.contains(BufferUsage::TRANSFER_DST) {
            engine_fatal!(
                SOURCE,
                "Buffer {:?} needs TRANSFER_DST usage to receive staging copies (usage {:?})",
                self.handle,
                self.desc.usage
            );
        }

        let staging = Buffer::new(
            Arc::clone(&self.ctx),
            BufferDesc {
                size: self.desc.size,
                usage: BufferUsage::TRANSFER_SRC,
                memory_properties: MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
            },
        )?;
        self.staging = Some(Box::new(staging));
        self.staging_copy = StagingCopy::Idle;
        Ok(())
    }

    /// Release the staging buffer once its copy is done
    pub fn destroy_staging_buffer(&mut self) {
        if matches!(self.staging_copy, StagingCopy::Pending | StagingCopy::Recorded) {
            engine_fatal!(
                SOURCE,
                "Staging buffer of {:?} destroyed while its copy is {:?}",
                self.handle,
                self.staging_copy
            );
        }
        self.staging = None;
        self.staging_copy = StagingCopy::Idle;
    }

    /// Copy staging → device with a blocking one-time submission
    pub fn submit_staging_copy(&mut self) -> Result<()> {
        let (src, size) = self.staging_source();
        let dst = self.handle;
        self.ctx.device().execute_one_time_commands(|cmd| {
            cmd.copy_buffer(src, dst, size);
            Ok(())
        })?;
        self.staging_copy = StagingCopy::Completed;
        Ok(())
    }

    /// Record the staging → device copy into a caller command buffer
    ///
    /// The copy stays pending until `complete_staging_copy` is called after
    /// the caller has waited for that command buffer.
    pub fn record_staging_copy(&mut self, cmd: &CommandList<'_>) {
        let (src, size) = self.staging_source();
        cmd.copy_buffer(src, self.handle, size);
        self.staging_copy = StagingCopy::Recorded;
    }

    pub fn complete_staging_copy(&mut self) {
        if self.staging_copy != StagingCopy::Recorded {
            engine_warn!(SOURCE, "No recorded staging copy to complete on {:?}", self.handle);
            return;
        }
        self.staging_copy = StagingCopy::Completed;
    }

    fn staging_source(&self) -> (BufferHandle, u64) {
        match &self.staging {
            Some(staging) => (staging.handle, staging.size().min(self.size())),
            None => engine_fatal!(SOURCE, "Buffer {:?} has no staging buffer", self.handle),
        }
    }

    fn fill_staging(&mut self, data: &[u8]) -> Result<()> {
        if self.staging_copy == StagingCopy::Recorded {
            engine_fatal!(SOURCE, "Staging buffer of {:?} rewritten while a copy is in flight", self.handle);
        }
        match self.staging.as_mut() {
            Some(staging) => staging.fill(data)?,
            None => engine_fatal!(
                SOURCE,
                "Device-local buffer {:?} filled without a staging buffer",
                self.handle
            ),
        }
        self.staging_copy = StagingCopy::Pending;
        Ok(())
    }

    // ===== CONTENTS =====

    /// Write `data` at the start of the buffer
    ///
    /// Device-local buffers go through the staging buffer and a blocking copy.
    pub fn fill(&mut self, data: &[u8]) -> Result<()> {
        if data.len() as u64 > self.desc.size {
            engine_fatal!(
                SOURCE,
                "Fill of {} bytes into buffer {:?} of {} bytes",
                data.len(),
                self.handle,
                self.desc.size
            );
        }

        if !self.is_host_visible() {
            self.fill_staging(data)?;
            return self.submit_staging_copy();
        }

        let dst = self.map_memory(false)?;
        dst[..data.len()].copy_from_slice(data);
        self.flush()?;
        self.unmap_memory();
        Ok(())
    }

    /// Make host writes visible to the device when memory is not coherent
    pub fn flush(&self) -> Result<()> {
        let memory = self.ctx.memory();
        let properties = memory.buffer_memory_properties(self.handle);
        if properties.contains(MemoryProperties::HOST_COHERENT) {
            return Ok(());
        }
        memory.flush_buffer(self.handle)
    }

    /// Map the whole buffer
    ///
    /// A persistent mapping survives `unmap_memory` and lives until drop.
    /// Mapping an already mapped buffer returns the existing mapping.
    pub fn map_memory(&mut self, persistent: bool) -> Result<&mut [u8]> {
        let ptr = match self.mapping.as_mut() {
            Some(mapping) => {
                mapping.persistent |= persistent;
                mapping.ptr
            }
            None => {
                let ptr = self.ctx.memory().map_buffer_memory(self.handle)?;
                self.mapping = Some(Mapping { ptr, persistent });
                ptr
            }
        };
        // SAFETY: the mapping covers `size` bytes and lives until unmapped,
        // which needs `&mut self` and so ends this borrow first
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.desc.size as usize) })
    }

    /// Unmap a transient mapping (persistent mappings stay)
    pub fn unmap_memory(&mut self) {
        if self.mapping.as_ref().is_some_and(|m| !m.persistent) {
            self.release_mapping();
        }
    }

    /// Current mapping, if any
    pub fn mapped_memory(&mut self) -> Option<&mut [u8]> {
        let ptr = self.mapping.as_ref()?.ptr;
        // SAFETY: see `map_memory`
        Some(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.desc.size as usize) })
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    fn release_mapping(&mut self) {
        if self.mapping.take().is_some() {
            self.ctx.memory().unmap_buffer_memory(self.handle);
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.staging_copy == StagingCopy::Recorded {
            engine_warn!(SOURCE, "Buffer {:?} dropped with a recorded staging copy", self.handle);
        }
        self.release_mapping();
        self.ctx.memory().destroy_buffer(self.handle);
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle)
            .field("desc", &self.desc)
            .field("staging_copy", &self.staging_copy)
            .field("mapped", &self.mapping.is_some())
            .finish()
    }
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
