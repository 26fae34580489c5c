use super::*;

#[test]
fn test_handle_null_sentinel() {
    assert!(BufferHandle::NULL.is_null());
    assert!(BufferHandle::default().is_null());
    assert!(!BufferHandle(7).is_null());
}

#[test]
fn test_extent_degenerate() {
    assert!(Extent2D::new(0, 600).is_degenerate());
    assert!(Extent2D::new(800, 0).is_degenerate());
    assert!(!Extent2D::new(1, 1).is_degenerate());
}

#[test]
fn test_flag_bits_match_vulkan() {
    assert_eq!(BufferUsage::VERTEX.bits(), 0x80);
    assert_eq!(BufferUsage::INDIRECT.bits(), 0x100);
    assert_eq!(MemoryProperties::HOST_COHERENT.bits(), 0x4);
    assert_eq!(ImageUsage::DEPTH_STENCIL_ATTACHMENT.bits(), 0x20);
    assert_eq!(AccessFlags::TRANSFER_WRITE.bits(), 0x1000);
    assert_eq!(PipelineStages::COLOR_ATTACHMENT_OUTPUT.bits(), 0x400);
    assert_eq!(ShaderStages::FRAGMENT.bits(), 0x10);
}

#[test]
fn test_viewport_from_extent() {
    let viewport = Viewport::from_extent(Extent2D::new(800, 600));
    assert_eq!(viewport.width, 800.0);
    assert_eq!(viewport.height, 600.0);
    assert_eq!(viewport.max_depth, 1.0);
}

#[test]
fn test_indirect_command_layout() {
    assert_eq!(std::mem::size_of::<DrawIndexedIndirectCommand>(), 20);
    let command = DrawIndexedIndirectCommand {
        index_count: 6,
        instance_count: 1,
        first_index: 0,
        vertex_offset: 0,
        first_instance: 2,
    };
    let bytes = bytemuck::bytes_of(&command);
    assert_eq!(&bytes[0..4], &6u32.to_ne_bytes());
    assert_eq!(&bytes[16..20], &2u32.to_ne_bytes());
}
