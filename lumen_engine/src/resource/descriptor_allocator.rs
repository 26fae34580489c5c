/// Descriptor pool owned by the context, reset wholesale when a scene closes

use std::sync::Arc;

use crate::context::Device;
use crate::error::Result;
use crate::graphics_device::{
    DescriptorPoolDesc, DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetLayoutHandle,
    DescriptorWrite,
};
use crate::engine_error;

const SOURCE: &str = "lumen::DescriptorAllocator";

pub struct DescriptorAllocator {
    device: Arc<Device>,
    pool: DescriptorPoolHandle,
    desc: DescriptorPoolDesc,
    allocated: u32,
}

impl DescriptorAllocator {
    pub fn new(device: &Arc<Device>, desc: DescriptorPoolDesc) -> Result<Self> {
        let pool = device.raw().create_descriptor_pool(&desc)?;
        Ok(Self { device: Arc::clone(device), pool, desc, allocated: 0 })
    }

    pub fn allocate(&mut self, layout: DescriptorSetLayoutHandle) -> Result<DescriptorSetHandle> {
        let set = self.device.raw().allocate_descriptor_set(self.pool, layout).map_err(|e| {
            engine_error!(
                SOURCE,
                "Descriptor set allocation failed ({}/{} sets in use): {}",
                self.allocated,
                self.desc.max_sets,
                e
            );
            e
        })?;
        self.allocated += 1;
        Ok(set)
    }

    pub fn write(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        self.device.raw().update_descriptor_set(set, writes);
    }

    /// Free every set at once; none of them may be in use by the GPU
    pub fn reset(&mut self) -> Result<()> {
        self.device.raw().reset_descriptor_pool(self.pool)?;
        self.allocated = 0;
        Ok(())
    }

    pub fn allocated(&self) -> u32 { self.allocated }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        self.device.raw().destroy_descriptor_pool(self.pool);
    }
}
