/// Unit tests for the recording mock backend

use super::*;

// ============================================================================
// FENCES
// ============================================================================

#[test]
fn test_fence_created_signaled_can_be_waited() {
    let device = MockGraphicsDevice::new();
    let fence = device.create_fence(true).unwrap();
    assert!(device.wait_for_fence(fence, u64::MAX).is_ok());
}

#[test]
fn test_wait_on_reset_fence_without_submit_fails() {
    let device = MockGraphicsDevice::new();
    let fence = device.create_fence(true).unwrap();
    device.reset_fence(fence).unwrap();
    assert!(device.wait_for_fence(fence, u64::MAX).is_err());
}

#[test]
fn test_submit_signals_fence() {
    let device = MockGraphicsDevice::new();
    let fence = device.create_fence(false).unwrap();
    let cb = device.allocate_command_buffer(CommandBufferKind::OneTime).unwrap();
    device
        .queue_submit(&SubmitInfo {
            command_buffer: cb,
            wait_semaphores: &[],
            wait_stages: &[],
            signal_semaphores: &[],
            fence,
        })
        .unwrap();
    assert!(device.wait_for_fence(fence, u64::MAX).is_ok());
}

#[test]
#[should_panic(expected = "signaled or unknown fence")]
fn test_submit_with_signaled_fence_panics() {
    let device = MockGraphicsDevice::new();
    let fence = device.create_fence(true).unwrap();
    let _ = device.queue_submit(&SubmitInfo {
        command_buffer: CommandBufferHandle(1),
        wait_semaphores: &[],
        wait_stages: &[],
        signal_semaphores: &[],
        fence,
    });
}

// ============================================================================
// OBJECT TRACKING
// ============================================================================

#[test]
fn test_live_objects_are_tracked() {
    let device = MockGraphicsDevice::new();
    let a = device.create_semaphore().unwrap();
    let _b = device.create_semaphore().unwrap();
    assert_eq!(device.live_count("semaphore"), 2);
    device.destroy_semaphore(a);
    assert_eq!(device.live_count("semaphore"), 1);
}

#[test]
#[should_panic(expected = "destroy of unknown semaphore")]
fn test_double_destroy_panics() {
    let device = MockGraphicsDevice::new();
    let semaphore = device.create_semaphore().unwrap();
    device.destroy_semaphore(semaphore);
    device.destroy_semaphore(semaphore);
}

#[test]
fn test_descriptor_pool_exhaustion_and_reset() {
    let device = MockGraphicsDevice::new();
    let pool = device
        .create_descriptor_pool(&DescriptorPoolDesc {
            max_sets: 1,
            uniform_buffers: 1,
            storage_buffers: 0,
            combined_image_samplers: 1,
        })
        .unwrap();
    let layout = DescriptorSetLayoutHandle(99);

    assert!(device.allocate_descriptor_set(pool, layout).is_ok());
    assert!(matches!(
        device.allocate_descriptor_set(pool, layout),
        Err(Error::ResourceExhausted(_))
    ));

    device.reset_descriptor_pool(pool).unwrap();
    assert!(device.allocate_descriptor_set(pool, layout).is_ok());
}

// ============================================================================
// SWAPCHAIN
// ============================================================================

#[test]
fn test_swapchain_images_cycle_on_acquire() {
    let device = MockGraphicsDevice::new();
    let info = SwapchainCreateInfo {
        min_image_count: 3,
        surface_format: device.state().formats[0],
        extent: Extent2D::new(800, 600),
        usage: ImageUsage::COLOR_ATTACHMENT,
        sharing_mode: SharingMode::Exclusive,
        queue_family_indices: Vec::new(),
        present_mode: PresentMode::Fifo,
        clipped: true,
        old_swapchain: SwapchainHandle::NULL,
    };
    let swapchain = device.create_swapchain(&info).unwrap();
    assert_eq!(device.swapchain_images(swapchain).unwrap().len(), 3);

    let semaphore = device.create_semaphore().unwrap();
    let indices: Vec<u32> = (0..4)
        .map(|_| device.acquire_next_image(swapchain, semaphore).unwrap().index)
        .collect();
    assert_eq!(indices, vec![0, 1, 2, 0]);
}

// ============================================================================
// ALLOCATOR
// ============================================================================

#[test]
fn test_allocator_maps_host_visible_memory_only() {
    let device = MockGraphicsDevice::new();
    let mut allocator = device.allocator();

    let (_, host) = allocator
        .create_buffer(&BufferDesc {
            size: 16,
            usage: BufferUsage::UNIFORM,
            memory_properties: MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
        })
        .unwrap();
    let (_, local) = allocator
        .create_buffer(&BufferDesc {
            size: 16,
            usage: BufferUsage::VERTEX,
            memory_properties: MemoryProperties::DEVICE_LOCAL,
        })
        .unwrap();

    assert!(allocator.map(host.as_ref()).is_ok());
    assert!(allocator.map(local.as_ref()).is_err());
}

#[test]
fn test_allocation_failure_is_out_of_memory() {
    let device = MockGraphicsDevice::new();
    device.state().fail_allocations = true;
    let mut allocator = device.allocator();

    let result = allocator.create_buffer(&BufferDesc {
        size: 16,
        usage: BufferUsage::VERTEX,
        memory_properties: MemoryProperties::DEVICE_LOCAL,
    });
    assert!(matches!(result, Err(Error::OutOfMemory)));
}

// ============================================================================
// BACKEND
// ============================================================================

#[test]
fn test_backend_teardown_is_idempotent() {
    let (mut backend, device) = MockBackend::new();
    backend.create_instance(&Config::default()).unwrap();

    backend.destroy_device();
    backend.destroy_surface();
    backend.destroy_instance();
    backend.destroy_instance();

    assert_eq!(device.count(|c| matches!(c, MockCall::DestroyInstance)), 1);
    assert_eq!(device.count(|c| matches!(c, MockCall::DestroySurface)), 0);
}
