use super::*;
use crate::graphics_device::mock_graphics_device::{mock_gpu_context, test_scene_data, MockCall};
use crate::graphics_device::{Extent2D, ImageLayout};
use crate::resource::StagingCopy;
use crate::scene::Vertex;
use glam::{Mat4, Vec3};

// ============================================================================
// UPLOAD
// ============================================================================

#[test]
fn test_new_uploads_through_staging() {
    let (ctx, mock) = mock_gpu_context();
    let scene = Scene::new(&ctx, &test_scene_data(64)).unwrap();

    assert_eq!(mock.count(|c| matches!(c, MockCall::CopyBuffer { .. })), 4);
    assert_eq!(scene.draw_count(), 2);
    for buffer in [scene.vertex_buffer(), scene.index_buffer(), scene.transform_buffer(), scene.indirect_buffer()] {
        assert!(!buffer.has_staging_buffer());
        assert_eq!(buffer.staging_copy(), StagingCopy::Idle);
    }

    // staging buffers (geometry and texture) are gone
    assert_eq!(ctx.memory().buffer_count(), 4);
    assert_eq!(ctx.memory().image_count(), 1);
}

#[test]
fn test_buffer_sizes_match_data() {
    let (ctx, _mock) = mock_gpu_context();
    let data = test_scene_data(16);
    let scene = Scene::new(&ctx, &data).unwrap();

    assert_eq!(scene.vertex_buffer().size(), (data.vertices.len() * std::mem::size_of::<Vertex>()) as u64);
    assert_eq!(scene.index_buffer().size(), (data.indices.len() * 4) as u64);
    assert_eq!(scene.transform_buffer().size(), (data.transforms.len() * 64) as u64);
    assert_eq!(scene.indirect_buffer().size(), 2 * 20);
}

#[test]
fn test_texture_has_full_mip_chain() {
    let (ctx, mock) = mock_gpu_context();
    let scene = Scene::new(&ctx, &test_scene_data(64)).unwrap();
    let texture = scene.texture();

    assert_eq!(texture.mip_levels(), 7);
    assert_eq!(mock.count(|c| matches!(c, MockCall::BlitImage(..))), 6);
    for mip in 0..texture.mip_levels() {
        assert_eq!(texture.layout(mip), ImageLayout::ShaderReadOnlyOptimal);
    }
    assert_eq!(texture.mip_extent(6), Extent2D::new(1, 1));
}

#[test]
fn test_indirect_commands_carry_node_index() {
    let commands = test_scene_data(8).indirect_commands();

    assert_eq!(commands.len(), 2);
    assert_eq!(commands[1].first_index, 6);
    assert_eq!(commands[1].index_count, 6);
    assert_eq!(commands[1].instance_count, 1);
    assert_eq!(commands[1].first_instance, 1);
}

// ============================================================================
// VALIDATION
// ============================================================================

#[test]
fn test_primitive_out_of_range_rejected() {
    let (ctx, mock) = mock_gpu_context();
    let mut data = test_scene_data(8);
    data.primitives[1].index_count = 100;

    assert!(matches!(Scene::new(&ctx, &data), Err(Error::InvalidResource(_))));
    assert_eq!(mock.live_count("buffer"), 0);
}

#[test]
fn test_unknown_node_rejected() {
    let (ctx, _mock) = mock_gpu_context();
    let mut data = test_scene_data(8);
    data.primitives[0].node = 5;

    assert!(matches!(Scene::new(&ctx, &data), Err(Error::InvalidResource(_))));
}

#[test]
fn test_texture_size_mismatch_rejected() {
    let (ctx, _mock) = mock_gpu_context();
    let mut data = test_scene_data(8);
    data.texture.pixels.truncate(10);

    assert!(matches!(Scene::new(&ctx, &data), Err(Error::InvalidResource(_))));
}

// ============================================================================
// CAMERA
// ============================================================================

#[test]
fn test_uniform_bytes_follow_camera() {
    let (ctx, _mock) = mock_gpu_context();
    let mut scene = Scene::new(&ctx, &test_scene_data(8)).unwrap();
    assert_eq!(scene.uniform_bytes().len(), std::mem::size_of::<CameraUniforms>());

    let camera = CameraUniforms::new(
        Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y),
        Mat4::perspective_rh(1.0, 4.0 / 3.0, 0.1, 100.0),
        Vec3::new(0.0, 0.0, 5.0),
    );
    scene.set_camera(camera);

    assert_eq!(scene.uniform_bytes(), bytemuck::bytes_of(&camera));
}

#[test]
fn test_drop_releases_gpu_memory() {
    let (ctx, mock) = mock_gpu_context();
    let scene = Scene::new(&ctx, &test_scene_data(8)).unwrap();
    drop(scene);

    assert_eq!(mock.live_count("buffer"), 0);
    assert_eq!(mock.live_count("image"), 0);
    assert_eq!(mock.live_count("image_view"), 0);
}
