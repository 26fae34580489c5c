/// Scene pass: indexed-indirect draws of the open scene into the swapchain
///
/// Owns the render pass (color + depth), the scene pipeline, the texture
/// sampler and the size-dependent attachments (depth image, one framebuffer
/// per swapchain image). Attachments are destroyed before the swapchain is
/// recreated and rebuilt against the new one.

use std::sync::Arc;

use crate::config::Config;
use crate::context::{Device, GpuContext};
use crate::error::Result;
use crate::graphics_device::{
    AttachmentDesc, BlendMode, ClearValue, CommandList, CullMode, DescriptorBinding,
    DescriptorSetLayoutHandle, DescriptorType, DescriptorWrite, DrawIndexedIndirectCommand,
    Extent2D, Format, ImageAspect, ImageDesc, ImageLayout, ImageUsage, IndexType, LoadOp,
    MemoryProperties, PipelineDesc, PrimitiveTopology, Rect2D, RenderPassBegin, RenderPassDesc,
    SampleCount, SamplerDesc, SamplerHandle, ShaderStages, StoreOp, Viewport,
};
use crate::resource::{create_framebuffers, Framebuffer, Image, ImageView, Pipeline, RenderPass, Sampler};
use crate::scene::{Scene, Vertex};
use crate::{engine_debug, engine_fatal};
use super::frame::Frame;
use super::swapchain::Swapchain;

const SOURCE: &str = "lumen::SceneRenderer";

const DEPTH_FORMAT: Format = Format::D32_SFLOAT;
const INDIRECT_STRIDE: u32 = std::mem::size_of::<DrawIndexedIndirectCommand>() as u32;

// Descriptor set 0 of the scene pipeline
const BINDING_CAMERA: u32 = 0;
const BINDING_TEXTURE: u32 = 1;
const BINDING_TRANSFORMS: u32 = 2;

struct Attachments {
    framebuffers: Vec<Framebuffer>,
    depth_view: ImageView,
    depth: Image,
}

pub struct SceneRenderer {
    ctx: Arc<GpuContext>,
    clear_color: [f32; 4],
    attachments: Option<Attachments>,
    pipeline: Pipeline,
    sampler: Sampler,
    render_pass: RenderPass,
}

impl SceneRenderer {
    /// `last_pass` selects the final color layout: `PresentSrc` when nothing
    /// draws after the scene, `ColorAttachmentOptimal` when the UI pass follows
    pub fn new(ctx: &Arc<GpuContext>, swapchain: &Swapchain, config: &Config, last_pass: bool) -> Result<Self> {
        let device = ctx.device();
        let render_pass = RenderPass::new(
            device,
            &RenderPassDesc {
                color_attachments: vec![AttachmentDesc {
                    format: swapchain.surface_format().format,
                    samples: SampleCount::S1,
                    load_op: LoadOp::Clear,
                    store_op: StoreOp::Store,
                    initial_layout: ImageLayout::Undefined,
                    final_layout: if last_pass {
                        ImageLayout::PresentSrc
                    } else {
                        ImageLayout::ColorAttachmentOptimal
                    },
                }],
                depth_attachment: Some(AttachmentDesc {
                    format: DEPTH_FORMAT,
                    samples: SampleCount::S1,
                    load_op: LoadOp::Clear,
                    store_op: StoreOp::DontCare,
                    initial_layout: ImageLayout::Undefined,
                    final_layout: ImageLayout::DepthStencilAttachmentOptimal,
                }),
            },
        )?;

        let pipeline = Pipeline::new(device, pipeline_desc(config, &render_pass))?;
        let sampler = Sampler::new(device, &SamplerDesc { max_lod: 16.0, anisotropy: Some(16.0) })?;

        let mut renderer = Self {
            ctx: Arc::clone(ctx),
            clear_color: config.clear_color,
            attachments: None,
            pipeline,
            sampler,
            render_pass,
        };
        renderer.create_attachments(swapchain)?;
        Ok(renderer)
    }

    fn device(&self) -> &Arc<Device> {
        self.ctx.device()
    }

    pub fn descriptor_set_layout(&self) -> DescriptorSetLayoutHandle {
        self.pipeline.descriptor_set_layout()
    }

    pub fn pipeline(&self) -> &Pipeline { &self.pipeline }

    pub fn sampler(&self) -> SamplerHandle { self.sampler.handle() }

    pub fn has_attachments(&self) -> bool { self.attachments.is_some() }

    pub fn framebuffer_count(&self) -> usize {
        self.attachments.as_ref().map_or(0, |a| a.framebuffers.len())
    }

    pub fn depth_image(&self) -> Option<&Image> {
        self.attachments.as_ref().map(|a| &a.depth)
    }

    // ===== ATTACHMENTS =====

    /// Build the depth attachment and framebuffers for `swapchain`
    pub fn create_attachments(&mut self, swapchain: &Swapchain) -> Result<()> {
        self.destroy_attachments();
        let extent = swapchain.extent();

        let depth = Image::new(
            &self.ctx,
            ImageDesc {
                extent,
                mip_levels: 1,
                samples: SampleCount::S1,
                format: DEPTH_FORMAT,
                usage: ImageUsage::DEPTH_STENCIL_ATTACHMENT,
                memory_properties: MemoryProperties::DEVICE_LOCAL,
            },
        )?;
        let depth_view = ImageView::new(self.device(), &depth, ImageAspect::Depth)?;
        let framebuffers = create_framebuffers(
            self.device(),
            self.render_pass.handle(),
            &swapchain.image_view_handles(),
            &[depth_view.handle()],
            extent,
        )?;

        engine_debug!(
            SOURCE,
            "Attachments created: {}x{}, {} framebuffers",
            extent.width,
            extent.height,
            framebuffers.len()
        );
        self.attachments = Some(Attachments { framebuffers, depth_view, depth });
        Ok(())
    }

    /// Release framebuffers, then the depth view and image
    pub fn destroy_attachments(&mut self) {
        self.attachments = None;
    }

    // ===== DESCRIPTORS =====

    /// Writes binding the frame uniforms, scene texture and transforms
    pub fn descriptor_writes(&self, frame: &Frame, scene: &Scene) -> [DescriptorWrite; 3] {
        [
            DescriptorWrite::UniformBuffer {
                binding: BINDING_CAMERA,
                buffer: frame.uniform_buffer().handle(),
                offset: 0,
                range: frame.uniform_buffer().size(),
            },
            DescriptorWrite::CombinedImageSampler {
                binding: BINDING_TEXTURE,
                view: scene.texture_view().handle(),
                sampler: self.sampler.handle(),
            },
            DescriptorWrite::StorageBuffer {
                binding: BINDING_TRANSFORMS,
                buffer: scene.transform_buffer().handle(),
                offset: 0,
                range: scene.transform_buffer().size(),
            },
        ]
    }

    // ===== RECORDING =====

    pub fn record(&self, cmd: &CommandList<'_>, frame: &Frame, image_index: u32, extent: Extent2D, scene: &Scene) {
        let Some(attachments) = self.attachments.as_ref() else {
            engine_fatal!(SOURCE, "Scene pass recorded without attachments");
        };
        let Some(framebuffer) = attachments.framebuffers.get(image_index as usize) else {
            engine_fatal!(
                SOURCE,
                "No framebuffer for swapchain image {} ({} framebuffers)",
                image_index,
                attachments.framebuffers.len()
            );
        };

        cmd.begin_render_pass(&RenderPassBegin {
            render_pass: self.render_pass.handle(),
            framebuffer: framebuffer.handle(),
            extent,
            clear_values: vec![
                ClearValue::Color(self.clear_color),
                ClearValue::DepthStencil { depth: 1.0, stencil: 0 },
            ],
        });
        cmd.bind_pipeline(self.pipeline.handle());
        cmd.set_viewport(&Viewport::from_extent(extent));
        cmd.set_scissor(&Rect2D::from_extent(extent));
        cmd.bind_descriptor_set(self.pipeline.layout(), frame.descriptor_set());
        cmd.bind_vertex_buffer(scene.vertex_buffer().handle(), 0);
        cmd.bind_index_buffer(scene.index_buffer().handle(), 0, IndexType::U32);
        cmd.draw_indexed_indirect(scene.indirect_buffer().handle(), 0, scene.draw_count(), INDIRECT_STRIDE);
        cmd.end_render_pass();
    }

    /// Rebuild the pipeline from its shader files; false keeps the old one
    pub fn reload_shaders(&mut self) -> bool {
        self.pipeline.rebuild()
    }
}

fn pipeline_desc(config: &Config, render_pass: &RenderPass) -> PipelineDesc {
    PipelineDesc {
        name: "scene".to_string(),
        vertex_shader: config.shader_directory.join("scene.vert.spv"),
        fragment_shader: config.shader_directory.join("scene.frag.spv"),
        vertex_layout: Vertex::layout(),
        topology: PrimitiveTopology::TriangleList,
        cull_mode: CullMode::Back,
        depth_test: true,
        depth_write: true,
        blend: BlendMode::Opaque,
        render_pass: render_pass.handle(),
        push_constant_ranges: Vec::new(),
        descriptor_bindings: vec![
            DescriptorBinding {
                binding: BINDING_CAMERA,
                descriptor_type: DescriptorType::UniformBuffer,
                stages: ShaderStages::VERTEX,
            },
            DescriptorBinding {
                binding: BINDING_TEXTURE,
                descriptor_type: DescriptorType::CombinedImageSampler,
                stages: ShaderStages::FRAGMENT,
            },
            DescriptorBinding {
                binding: BINDING_TRANSFORMS,
                descriptor_type: DescriptorType::StorageBuffer,
                stages: ShaderStages::VERTEX,
            },
        ],
    }
}

#[cfg(test)]
#[path = "scene_renderer_tests.rs"]
mod tests;
