/// Device memory sub-allocation through gpu-allocator
///
/// Buffers and images are created, bound and destroyed here. The engine keeps
/// the returned `VulkanAllocation` next to the handle and hands it back on
/// destroy; the allocator itself holds no per-resource state.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use lumen_engine::lumen::graphics_device::{
    BufferDesc, BufferHandle, DeviceAllocation, DeviceAllocator, DeviceMemoryHandle, ImageDesc,
    ImageHandle, MemoryBlock, MemoryProperties,
};
use lumen_engine::lumen::{Error, Result};
use lumen_engine::{engine_bail, engine_err, engine_error};
use std::any::Any;
use std::ptr::NonNull;

use crate::vulkan_format::{
    buffer_usage_to_vk, format_to_vk, from_raw, image_usage_to_vk,
    memory_location, memory_properties_from_vk, sample_count_to_vk, to_raw,
};

const SOURCE: &str = "lumen::vulkan";

/// Allocation record of one buffer or image
pub struct VulkanAllocation {
    allocation: Allocation,
}

impl DeviceAllocation for VulkanAllocation {
    fn memory_block(&self) -> MemoryBlock {
        // SAFETY: the memory handle is only reported, never used through this record
        let memory = unsafe { self.allocation.memory() };
        MemoryBlock {
            memory: DeviceMemoryHandle(to_raw(memory)),
            offset: self.allocation.offset(),
            size: self.allocation.size(),
        }
    }

    fn memory_properties(&self) -> MemoryProperties {
        memory_properties_from_vk(self.allocation.memory_properties())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

pub struct VulkanAllocator {
    device: ash::Device,
    allocator: Allocator,
    non_coherent_atom_size: u64,
}

/// Start of a flush range covering `offset`, rounded down to `atom_size`
pub(crate) fn flush_range_offset(offset: u64, atom_size: u64) -> u64 {
    if atom_size <= 1 {
        return offset;
    }
    offset - offset % atom_size
}

impl VulkanAllocator {
    pub fn new(instance: &ash::Instance, device: &ash::Device, physical_device: vk::PhysicalDevice) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| {
            engine_error!(SOURCE, "Failed to create GPU allocator: {:?}", e);
            Error::InitializationFailed(format!("Failed to create allocator: {:?}", e))
        })?;

        // SAFETY: physical_device was enumerated from this instance
        let limits = unsafe { instance.get_physical_device_properties(physical_device) }.limits;

        Ok(Self {
            device: device.clone(),
            allocator,
            non_coherent_atom_size: limits.non_coherent_atom_size,
        })
    }

    fn allocate(
        &mut self,
        name: &str,
        requirements: vk::MemoryRequirements,
        properties: MemoryProperties,
        linear: bool,
    ) -> Result<Allocation> {
        self.allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: memory_location(properties),
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                engine_error!(SOURCE, "Out of GPU memory for {} ({:.2} MB): {:?}", name, size_mb, e);
                Error::OutOfMemory
            })
    }

    fn release(&mut self, allocation: Box<dyn DeviceAllocation>) {
        match allocation.into_any().downcast::<VulkanAllocation>() {
            Ok(record) => {
                if let Err(e) = self.allocator.free(record.allocation) {
                    engine_error!(SOURCE, "Failed to free allocation: {:?}", e);
                }
            }
            Err(_) => engine_error!(SOURCE, "Foreign allocation record handed to the Vulkan allocator"),
        }
    }
}

impl DeviceAllocator for VulkanAllocator {
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<(BufferHandle, Box<dyn DeviceAllocation>)> {
        let info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(buffer_usage_to_vk(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: valid device; every failure path below destroys what it created
        unsafe {
            let buffer = self
                .device
                .create_buffer(&info, None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create buffer of size {} bytes: {:?}", desc.size, e))?;

            let requirements = self.device.get_buffer_memory_requirements(buffer);
            let allocation = match self.allocate("buffer", requirements, desc.memory_properties, true) {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.device.destroy_buffer(buffer, None);
                    return Err(e);
                }
            };

            if let Err(e) = self.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) {
                let _ = self.allocator.free(allocation);
                self.device.destroy_buffer(buffer, None);
                engine_bail!(SOURCE, "Failed to bind buffer memory: {:?}", e);
            }

            Ok((BufferHandle(to_raw(buffer)), Box::new(VulkanAllocation { allocation })))
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle, allocation: Box<dyn DeviceAllocation>) {
        // SAFETY: the engine destroys a buffer once, after the GPU stopped using it
        unsafe { self.device.destroy_buffer(from_raw(buffer.0), None) };
        self.release(allocation);
    }

    fn create_image(&mut self, desc: &ImageDesc) -> Result<(ImageHandle, Box<dyn DeviceAllocation>)> {
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format_to_vk(desc.format))
            .extent(vk::Extent3D { width: desc.extent.width, height: desc.extent.height, depth: 1 })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(sample_count_to_vk(desc.samples))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(image_usage_to_vk(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        // SAFETY: as for buffers
        unsafe {
            let image = self
                .device
                .create_image(&info, None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create {}x{} image: {:?}", desc.extent.width, desc.extent.height, e))?;

            let requirements = self.device.get_image_memory_requirements(image);
            let allocation = match self.allocate("image", requirements, desc.memory_properties, false) {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.device.destroy_image(image, None);
                    return Err(e);
                }
            };

            if let Err(e) = self.device.bind_image_memory(image, allocation.memory(), allocation.offset()) {
                let _ = self.allocator.free(allocation);
                self.device.destroy_image(image, None);
                engine_bail!(SOURCE, "Failed to bind image memory: {:?}", e);
            }

            Ok((ImageHandle(to_raw(image)), Box::new(VulkanAllocation { allocation })))
        }
    }

    fn destroy_image(&mut self, image: ImageHandle, allocation: Box<dyn DeviceAllocation>) {
        // SAFETY: as for buffers
        unsafe { self.device.destroy_image(from_raw(image.0), None) };
        self.release(allocation);
    }

    fn map(&mut self, allocation: &dyn DeviceAllocation) -> Result<NonNull<u8>> {
        let record = allocation
            .as_any()
            .downcast_ref::<VulkanAllocation>()
            .ok_or_else(|| engine_err!(SOURCE, "Foreign allocation record handed to the Vulkan allocator"))?;

        // Host-visible allocations are persistently mapped by gpu-allocator
        record
            .allocation
            .mapped_ptr()
            .map(|ptr| ptr.cast::<u8>())
            .ok_or_else(|| engine_err!(SOURCE, "Allocation is not host-visible"))
    }

    fn unmap(&mut self, _allocation: &dyn DeviceAllocation) {}

    fn flush(&self, allocation: &dyn DeviceAllocation) -> Result<()> {
        if allocation.memory_properties().contains(MemoryProperties::HOST_COHERENT) {
            return Ok(());
        }
        let block = allocation.memory_block();
        // Flushes to the end of the memory object: a rounded-up size could overrun it
        let range = vk::MappedMemoryRange::default()
            .memory(from_raw(block.memory.0))
            .offset(flush_range_offset(block.offset, self.non_coherent_atom_size))
            .size(vk::WHOLE_SIZE);

        // SAFETY: the range starts at or before this live allocation, inside its memory object
        unsafe {
            self.device
                .flush_mapped_memory_ranges(&[range])
                .map_err(|e| engine_err!(SOURCE, "Failed to flush mapped memory: {:?}", e))
        }
    }
}

#[cfg(test)]
#[path = "vulkan_allocator_tests.rs"]
mod tests;
