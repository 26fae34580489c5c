use super::*;
use crate::error::Error;
use crate::graphics_device::mock_graphics_device::{MockCall, MockGraphicsDevice};
use crate::graphics_device::{BufferUsage, Extent2D, Format, ImageUsage, SampleCount};

fn create_manager() -> (MemoryManager, MockGraphicsDevice) {
    let mock = MockGraphicsDevice::new();
    (MemoryManager::new(Box::new(mock.allocator())), mock)
}

fn host_buffer(size: u64) -> BufferDesc {
    BufferDesc {
        size,
        usage: BufferUsage::UNIFORM,
        memory_properties: MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
    }
}

fn texture_desc() -> ImageDesc {
    ImageDesc {
        extent: Extent2D::new(64, 64),
        mip_levels: 7,
        samples: SampleCount::S1,
        format: Format::R8G8B8A8_SRGB,
        usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
        memory_properties: MemoryProperties::DEVICE_LOCAL,
    }
}

// ============================================================================
// BUFFERS
// ============================================================================

#[test]
fn test_each_buffer_gets_its_own_block() {
    let (mut manager, _mock) = create_manager();
    let a = manager.create_buffer(&host_buffer(256)).unwrap();
    let b = manager.create_buffer(&host_buffer(128)).unwrap();

    assert_eq!(manager.buffer_count(), 2);
    assert_ne!(manager.buffer_memory_block(a), manager.buffer_memory_block(b));
    assert_eq!(manager.buffer_memory_block(a).size, 256);
}

#[test]
fn test_destroy_releases_allocation() {
    let (mut manager, mock) = create_manager();
    let handle = manager.create_buffer(&host_buffer(64)).unwrap();
    manager.destroy_buffer(handle);

    assert_eq!(manager.buffer_count(), 0);
    assert_eq!(mock.live_count("buffer"), 0);
}

#[test]
#[should_panic(expected = "already destroyed buffer")]
fn test_double_destroy_is_fatal() {
    let (mut manager, _mock) = create_manager();
    let handle = manager.create_buffer(&host_buffer(64)).unwrap();
    manager.destroy_buffer(handle);
    manager.destroy_buffer(handle);
}

#[test]
fn test_allocation_failure_propagates() {
    let (mut manager, mock) = create_manager();
    mock.state().fail_allocations = true;

    assert_eq!(manager.create_buffer(&host_buffer(64)), Err(Error::OutOfMemory));
    assert_eq!(manager.buffer_count(), 0);
}

#[test]
fn test_map_and_flush_reach_the_allocator() {
    let (mut manager, mock) = create_manager();
    let handle = manager.create_buffer(&host_buffer(64)).unwrap();
    let memory = manager.buffer_memory_block(handle).memory;

    manager.map_buffer_memory(handle).unwrap();
    manager.flush_buffer(handle).unwrap();
    manager.unmap_buffer_memory(handle);

    let calls = mock.calls();
    assert!(calls.contains(&MockCall::Map(memory)));
    assert!(calls.contains(&MockCall::Flush(memory)));
    assert!(calls.contains(&MockCall::Unmap(memory)));
}

#[test]
fn test_actual_memory_properties_are_reported() {
    let (mut manager, mock) = create_manager();
    mock.state().device_local_properties = MemoryProperties::DEVICE_LOCAL | MemoryProperties::HOST_VISIBLE;

    let handle = manager
        .create_buffer(&BufferDesc {
            size: 64,
            usage: BufferUsage::VERTEX,
            memory_properties: MemoryProperties::DEVICE_LOCAL,
        })
        .unwrap();

    assert!(manager
        .buffer_memory_properties(handle)
        .contains(MemoryProperties::HOST_VISIBLE));
}

// ============================================================================
// IMAGES
// ============================================================================

#[test]
fn test_image_lifecycle() {
    let (mut manager, mock) = create_manager();
    let image = manager.create_image(&texture_desc()).unwrap();
    assert_eq!(manager.image_count(), 1);
    assert!(!manager.image_memory_block(image).memory.is_null());

    manager.destroy_image(image);
    assert_eq!(mock.live_count("image"), 0);
}

#[test]
fn test_drop_frees_leaked_resources() {
    let (mut manager, mock) = create_manager();
    manager.create_buffer(&host_buffer(64)).unwrap();
    manager.create_image(&texture_desc()).unwrap();

    drop(manager);

    assert_eq!(mock.live_count("buffer"), 0);
    assert_eq!(mock.live_count("image"), 0);
}
