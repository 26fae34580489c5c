/// Shared GPU state handed to every resource that owns device memory

use std::sync::{Arc, Mutex, MutexGuard};

use super::device::Device;
use crate::resource::MemoryManager;

/// Device plus memory manager
///
/// Buffers and owned images keep an `Arc<GpuContext>` so their destructors
/// can return memory. The context tears down only after the last of them.
pub struct GpuContext {
    // Field order is drop order: memory returns before the device goes away
    memory: Mutex<MemoryManager>,
    device: Arc<Device>,
}

impl GpuContext {
    pub fn new(device: Arc<Device>, memory: MemoryManager) -> Self {
        Self { memory: Mutex::new(memory), device }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Lock the memory manager
    pub fn memory(&self) -> MutexGuard<'_, MemoryManager> {
        self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
