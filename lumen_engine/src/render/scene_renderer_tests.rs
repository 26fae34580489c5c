use super::*;
use crate::graphics_device::mock_graphics_device::{mock_gpu_context, test_scene_data, MockCall, MockGraphicsDevice};
use crate::graphics_device::RenderPassDesc;

struct Fixture {
    renderer: SceneRenderer,
    swapchain: Swapchain,
    ctx: Arc<GpuContext>,
    mock: MockGraphicsDevice,
}

fn fixture(last_pass: bool) -> Fixture {
    let (ctx, mock) = mock_gpu_context();
    let swapchain = Swapchain::new(ctx.device(), Extent2D::new(800, 600)).unwrap();
    let renderer = SceneRenderer::new(&ctx, &swapchain, &Config::default(), last_pass).unwrap();
    Fixture { renderer, swapchain, ctx, mock }
}

fn render_pass_descs(mock: &MockGraphicsDevice) -> Vec<RenderPassDesc> {
    mock.calls()
        .into_iter()
        .filter_map(|c| match c {
            MockCall::CreateRenderPass(_, desc) => Some(desc),
            _ => None,
        })
        .collect()
}

// ============================================================================
// CREATION
// ============================================================================

#[test]
fn test_final_layout_depends_on_following_pass() {
    let alone = fixture(true);
    let desc = &render_pass_descs(&alone.mock)[0];
    assert_eq!(desc.color_attachments[0].final_layout, ImageLayout::PresentSrc);
    assert_eq!(desc.color_attachments[0].load_op, LoadOp::Clear);
    assert_eq!(desc.depth_attachment.unwrap().format, Format::D32_SFLOAT);

    let with_ui = fixture(false);
    let desc = &render_pass_descs(&with_ui.mock)[0];
    assert_eq!(desc.color_attachments[0].final_layout, ImageLayout::ColorAttachmentOptimal);
}

#[test]
fn test_one_framebuffer_per_swapchain_image() {
    let f = fixture(true);

    assert_eq!(f.renderer.framebuffer_count(), f.swapchain.image_count());
    assert_eq!(f.mock.live_count("framebuffer"), f.swapchain.image_count());
    assert_eq!(f.renderer.depth_image().unwrap().extent(), Extent2D::new(800, 600));
}

#[test]
fn test_pipeline_reads_scene_shaders() {
    let f = fixture(true);
    let names: Vec<String> = f
        .mock
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            MockCall::CreatePipeline(name, _) => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec!["scene".to_string()]);
    assert_eq!(f.renderer.pipeline().name(), "scene");
}

// ============================================================================
// RESIZE
// ============================================================================

#[test]
fn test_attachments_follow_swapchain_recreation() {
    let mut f = fixture(true);

    f.renderer.destroy_attachments();
    assert!(!f.renderer.has_attachments());
    assert_eq!(f.mock.live_count("framebuffer"), 0);
    assert_eq!(f.ctx.memory().image_count(), 0);

    f.swapchain.recreate(Extent2D::new(1280, 720)).unwrap();
    f.renderer.create_attachments(&f.swapchain).unwrap();

    assert_eq!(f.renderer.depth_image().unwrap().extent(), Extent2D::new(1280, 720));
    assert_eq!(f.mock.live_count("framebuffer"), f.swapchain.image_count());
}

// ============================================================================
// RECORDING
// ============================================================================

#[test]
fn test_record_draws_scene_indirectly() {
    let f = fixture(true);
    let scene = Scene::new(&f.ctx, &test_scene_data(8)).unwrap();
    let frame = Frame::new(&f.ctx, 0, 256).unwrap();
    f.mock.clear_calls();

    let cmd = f.ctx.device().command_list(frame.command_buffer());
    f.renderer.record(&cmd, &frame, 1, f.swapchain.extent(), &scene);

    let calls = f.mock.calls();
    let MockCall::BeginRenderPass(begin) = &calls[0] else {
        panic!("expected a render pass first, got {:?}", calls[0]);
    };
    assert_eq!(
        begin.clear_values,
        vec![
            ClearValue::Color([0.73, 0.95, 1.0, 1.0]),
            ClearValue::DepthStencil { depth: 1.0, stencil: 0 },
        ]
    );
    assert!(calls.contains(&MockCall::BindIndexBuffer(scene.index_buffer().handle(), IndexType::U32)));
    assert!(calls.contains(&MockCall::DrawIndexedIndirect {
        buffer: scene.indirect_buffer().handle(),
        draw_count: 2,
        stride: 20,
    }));
    assert_eq!(calls.last(), Some(&MockCall::EndRenderPass));
}

#[test]
#[should_panic(expected = "No framebuffer for swapchain image 9")]
fn test_record_unknown_image_is_fatal() {
    let f = fixture(true);
    let scene = Scene::new(&f.ctx, &test_scene_data(8)).unwrap();
    let frame = Frame::new(&f.ctx, 0, 256).unwrap();

    let cmd = f.ctx.device().command_list(frame.command_buffer());
    f.renderer.record(&cmd, &frame, 9, f.swapchain.extent(), &scene);
}

#[test]
fn test_descriptor_writes_cover_all_bindings() {
    let f = fixture(true);
    let scene = Scene::new(&f.ctx, &test_scene_data(8)).unwrap();
    let frame = Frame::new(&f.ctx, 0, 256).unwrap();

    let writes = f.renderer.descriptor_writes(&frame, &scene);

    assert_eq!(
        writes[0],
        DescriptorWrite::UniformBuffer { binding: 0, buffer: frame.uniform_buffer().handle(), offset: 0, range: 256 }
    );
    assert_eq!(
        writes[1],
        DescriptorWrite::CombinedImageSampler {
            binding: 1,
            view: scene.texture_view().handle(),
            sampler: f.renderer.sampler(),
        }
    );
    assert!(matches!(writes[2], DescriptorWrite::StorageBuffer { binding: 2, .. }));
}

// ============================================================================
// SHADER RELOAD
// ============================================================================

#[test]
fn test_failed_reload_keeps_pipeline() {
    let mut f = fixture(true);
    let before = f.renderer.pipeline().handle();

    f.mock.state().fail_pipelines = true;
    assert!(!f.renderer.reload_shaders());
    assert_eq!(f.renderer.pipeline().handle(), before);

    f.mock.state().fail_pipelines = false;
    assert!(f.renderer.reload_shaders());
    assert_ne!(f.renderer.pipeline().handle(), before);
    assert_eq!(f.mock.live_count("pipeline"), 1);
}
