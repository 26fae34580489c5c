/// UI overlay pass
///
/// Draws prepared UI geometry over the scene image. The pass loads the color
/// attachment left by the scene pass and hands the image over for
/// presentation, so it runs every frame even with nothing to draw. Vertex and
/// index data are streamed through per-frame dynamic buffers.
///
/// The renderer owns its font atlas and a descriptor pool of its own, so UI
/// texture sets outlive scene changes (the context pool is reset when a scene
/// closes).

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::config::Config;
use crate::context::GpuContext;
use crate::error::{Error, Result};
use crate::event::CursorMode;
use crate::graphics_device::{
    AttachmentDesc, BlendMode, BufferDesc, BufferUsage, CommandList, CullMode, DescriptorBinding,
    DescriptorPoolDesc, DescriptorSetHandle, DescriptorSetLayoutHandle, DescriptorType,
    DescriptorWrite, Extent2D, Format, ImageAspect, ImageDesc, ImageLayout, ImageUsage,
    IndexType, LoadOp, MemoryProperties, PipelineDesc, PrimitiveTopology, PushConstantRange,
    Rect2D, RenderPassBegin, RenderPassDesc, SampleCount, SamplerDesc, ShaderStages, StoreOp,
    VertexAttribute, VertexLayout, Viewport,
};
use crate::resource::{
    create_framebuffers, Buffer, DescriptorAllocator, DynamicBuffer, Framebuffer, Image, ImageView,
    Pipeline, RenderPass, Sampler,
};
use crate::{engine_fatal, engine_info};
use super::swapchain::Swapchain;

const SOURCE: &str = "lumen::UiRenderer";

/// Texture sets available to the UI (font atlas plus adapter textures)
const UI_DESCRIPTOR_POOL: DescriptorPoolDesc = DescriptorPoolDesc {
    max_sets: 32,
    uniform_buffers: 0,
    storage_buffers: 0,
    combined_image_samplers: 32,
};

// ===== DRAW DATA =====

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UiVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    /// RGBA8, packed
    pub color: u32,
}

impl UiVertex {
    pub fn layout() -> VertexLayout {
        VertexLayout {
            stride: std::mem::size_of::<UiVertex>() as u32,
            attributes: vec![
                VertexAttribute { location: 0, format: Format::R32G32_SFLOAT, offset: 0 },
                VertexAttribute { location: 1, format: Format::R32G32_SFLOAT, offset: 8 },
                VertexAttribute { location: 2, format: Format::R8G8B8A8_UNORM, offset: 16 },
            ],
        }
    }
}

/// One clipped, textured batch of triangles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiDrawCommand {
    pub index_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    /// Clip rectangle in framebuffer pixels
    pub clip_rect: Rect2D,
    /// Texture set; NULL keeps the previous binding, the font atlas at the start of the pass
    pub texture: DescriptorSetHandle,
}

/// Geometry of one UI frame, produced by the UI library adapter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UiDrawData {
    /// Logical size the vertex positions are expressed in
    pub display_size: [f32; 2],
    pub vertices: Vec<UiVertex>,
    pub indices: Vec<u16>,
    pub commands: Vec<UiDrawCommand>,
}

impl UiDrawData {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty() || self.commands.is_empty()
    }
}

/// Scale and translation mapping display coordinates to clip space
pub fn ui_transform(display_size: [f32; 2]) -> [f32; 4] {
    let scale = [2.0 / display_size[0], 2.0 / display_size[1]];
    [scale[0], scale[1], -1.0, -1.0]
}

/// Intersect `clip` with the framebuffer; None when nothing is left
pub fn clamp_scissor(clip: Rect2D, extent: Extent2D) -> Option<Rect2D> {
    let x0 = clip.x.max(0) as i64;
    let y0 = clip.y.max(0) as i64;
    let x1 = (clip.x as i64 + clip.width as i64).min(extent.width as i64);
    let y1 = (clip.y as i64 + clip.height as i64).min(extent.height as i64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(Rect2D {
        x: x0 as i32,
        y: y0 as i32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    })
}

// ===== RENDERER =====

struct FrameGeometry {
    vertices: DynamicBuffer,
    indices: DynamicBuffer,
}

struct FontAtlas {
    view: ImageView,
    image: Image,
}

pub struct UiRenderer {
    framebuffers: Vec<Framebuffer>,
    geometry: Vec<FrameGeometry>,
    font_set: DescriptorSetHandle,
    descriptors: DescriptorAllocator,
    font_atlas: FontAtlas,
    sampler: Sampler,
    pipeline: Pipeline,
    render_pass: RenderPass,
    ctx: Arc<GpuContext>,
    cursor_mode: CursorMode,
}

impl UiRenderer {
    pub fn new(ctx: &Arc<GpuContext>, swapchain: &Swapchain, config: &Config) -> Result<Self> {
        let device = ctx.device();
        let render_pass = RenderPass::new(
            device,
            &RenderPassDesc {
                color_attachments: vec![AttachmentDesc {
                    format: swapchain.surface_format().format,
                    samples: SampleCount::S1,
                    load_op: LoadOp::Load,
                    store_op: StoreOp::Store,
                    initial_layout: ImageLayout::ColorAttachmentOptimal,
                    final_layout: ImageLayout::PresentSrc,
                }],
                depth_attachment: None,
            },
        )?;

        let pipeline = Pipeline::new(
            device,
            PipelineDesc {
                name: "ui".to_string(),
                vertex_shader: config.shader_directory.join("ui.vert.spv"),
                fragment_shader: config.shader_directory.join("ui.frag.spv"),
                vertex_layout: UiVertex::layout(),
                topology: PrimitiveTopology::TriangleList,
                cull_mode: CullMode::None,
                depth_test: false,
                depth_write: false,
                blend: BlendMode::Alpha,
                render_pass: render_pass.handle(),
                push_constant_ranges: vec![PushConstantRange {
                    stages: ShaderStages::VERTEX,
                    offset: 0,
                    size: 16,
                }],
                descriptor_bindings: vec![DescriptorBinding {
                    binding: 0,
                    descriptor_type: DescriptorType::CombinedImageSampler,
                    stages: ShaderStages::FRAGMENT,
                }],
            },
        )?;

        let sampler = Sampler::new(device, &SamplerDesc { max_lod: 0.0, anisotropy: None })?;
        let font_atlas = upload_font_atlas(ctx, Extent2D::new(1, 1), &[0xff; 4])?;
        let mut descriptors = DescriptorAllocator::new(device, UI_DESCRIPTOR_POOL)?;
        let font_set = descriptors.allocate(pipeline.descriptor_set_layout())?;
        descriptors.write(font_set, &[texture_write(&font_atlas.view, &sampler)]);

        let geometry = (0..config.frames_in_flight)
            .map(|_| FrameGeometry {
                vertices: DynamicBuffer::new(Arc::clone(ctx), BufferUsage::VERTEX),
                indices: DynamicBuffer::new(Arc::clone(ctx), BufferUsage::INDEX),
            })
            .collect();

        let mut renderer = Self {
            framebuffers: Vec::new(),
            geometry,
            font_set,
            descriptors,
            font_atlas,
            sampler,
            pipeline,
            render_pass,
            ctx: Arc::clone(ctx),
            cursor_mode: CursorMode::Normal,
        };
        renderer.create_framebuffers(swapchain)?;
        Ok(renderer)
    }

    pub fn pipeline(&self) -> &Pipeline { &self.pipeline }

    /// Layout of the texture sets referenced by draw commands
    pub fn descriptor_set_layout(&self) -> DescriptorSetLayoutHandle {
        self.pipeline.descriptor_set_layout()
    }

    pub fn framebuffer_count(&self) -> usize { self.framebuffers.len() }

    // ===== TEXTURES =====

    /// Set bound at the start of every UI pass
    pub fn font_descriptor_set(&self) -> DescriptorSetHandle { self.font_set }

    pub fn font_atlas_extent(&self) -> Extent2D { self.font_atlas.image.extent() }

    /// Sets allocated from the UI pool, font atlas included
    pub fn texture_set_count(&self) -> u32 { self.descriptors.allocated() }

    /// Replace the font atlas with tightly packed RGBA8 `pixels`
    ///
    /// Waits for the device before rewriting the font set, since frames in
    /// flight may still sample the previous atlas.
    pub fn set_font_atlas(&mut self, extent: Extent2D, pixels: &[u8]) -> Result<()> {
        let atlas = upload_font_atlas(&self.ctx, extent, pixels)?;
        self.ctx.device().wait_idle()?;
        self.descriptors.write(self.font_set, &[texture_write(&atlas.view, &self.sampler)]);
        self.font_atlas = atlas;
        engine_info!(SOURCE, "Font atlas replaced ({}x{})", extent.width, extent.height);
        Ok(())
    }

    /// Descriptor set sampling `view`, usable as `UiDrawCommand::texture`
    ///
    /// Lives as long as the renderer; `view` must outlive every frame using it.
    pub fn allocate_texture_set(&mut self, view: &ImageView) -> Result<DescriptorSetHandle> {
        let set = self.descriptors.allocate(self.pipeline.descriptor_set_layout())?;
        self.descriptors.write(set, &[texture_write(view, &self.sampler)]);
        Ok(set)
    }

    /// Current vertex and index capacities of frame slot `frame`
    pub fn buffer_capacities(&self, frame: usize) -> (u64, u64) {
        self.geometry
            .get(frame)
            .map_or((0, 0), |g| (g.vertices.capacity(), g.indices.capacity()))
    }

    // ===== CURSOR =====

    pub fn cursor_mode(&self) -> CursorMode { self.cursor_mode }

    pub fn set_cursor_mode(&mut self, mode: CursorMode) {
        self.cursor_mode = mode;
    }

    /// False while the cursor is captured by the camera
    pub fn accepts_input(&self) -> bool {
        self.cursor_mode == CursorMode::Normal
    }

    // ===== FRAMEBUFFERS =====

    pub fn create_framebuffers(&mut self, swapchain: &Swapchain) -> Result<()> {
        self.framebuffers.clear();
        self.framebuffers = create_framebuffers(
            self.ctx.device(),
            self.render_pass.handle(),
            &swapchain.image_view_handles(),
            &[],
            swapchain.extent(),
        )?;
        Ok(())
    }

    pub fn destroy_framebuffers(&mut self) {
        self.framebuffers.clear();
    }

    // ===== RECORDING =====

    /// Record the overlay pass for frame slot `frame` onto swapchain image `image_index`
    ///
    /// The slot's buffers are rewritten, so its previous submission must have
    /// completed (frame fence waited).
    pub fn record(
        &mut self,
        cmd: &CommandList<'_>,
        frame: usize,
        image_index: u32,
        extent: Extent2D,
        draw_data: Option<&UiDrawData>,
    ) -> Result<()> {
        let Some(framebuffer) = self.framebuffers.get(image_index as usize) else {
            engine_fatal!(
                SOURCE,
                "No framebuffer for swapchain image {} ({} framebuffers)",
                image_index,
                self.framebuffers.len()
            );
        };
        let framebuffer = framebuffer.handle();
        let Some(geometry) = self.geometry.get_mut(frame) else {
            engine_fatal!(SOURCE, "Frame slot {} has no UI buffers", frame);
        };

        cmd.begin_render_pass(&RenderPassBegin {
            render_pass: self.render_pass.handle(),
            framebuffer,
            extent,
            clear_values: Vec::new(),
        });

        if let Some(data) = draw_data.filter(|d| !d.is_empty()) {
            let vertex_bytes: &[u8] = bytemuck::cast_slice(&data.vertices);
            let index_bytes: &[u8] = bytemuck::cast_slice(&data.indices);
            geometry.vertices.ensure_capacity(vertex_bytes.len() as u64)?;
            geometry.indices.ensure_capacity(index_bytes.len() as u64)?;
            geometry.vertices.write(0, vertex_bytes)?;
            geometry.indices.write(0, index_bytes)?;

            let layout = self.pipeline.layout();
            cmd.bind_pipeline(self.pipeline.handle());
            cmd.set_viewport(&Viewport::from_extent(extent));
            cmd.push_constants(
                layout,
                ShaderStages::VERTEX,
                0,
                bytemuck::cast_slice(&ui_transform(data.display_size)),
            );
            cmd.bind_vertex_buffer(geometry.vertices.handle(), 0);
            cmd.bind_index_buffer(geometry.indices.handle(), 0, IndexType::U16);
            cmd.bind_descriptor_set(layout, self.font_set);

            for command in &data.commands {
                let Some(scissor) = clamp_scissor(command.clip_rect, extent) else {
                    continue;
                };
                cmd.set_scissor(&scissor);
                if !command.texture.is_null() {
                    cmd.bind_descriptor_set(layout, command.texture);
                }
                cmd.draw_indexed(command.index_count, command.first_index, command.vertex_offset);
            }
        }

        cmd.end_render_pass();
        Ok(())
    }

    pub fn reload_shaders(&mut self) -> bool {
        self.pipeline.rebuild()
    }
}

fn texture_write(view: &ImageView, sampler: &Sampler) -> DescriptorWrite {
    DescriptorWrite::CombinedImageSampler {
        binding: 0,
        view: view.handle(),
        sampler: sampler.handle(),
    }
}

/// Single-mip sampled image filled through a waited staging copy
fn upload_font_atlas(ctx: &Arc<GpuContext>, extent: Extent2D, pixels: &[u8]) -> Result<FontAtlas> {
    let expected = extent.width as usize * extent.height as usize * 4;
    if extent.is_degenerate() || pixels.len() != expected {
        return Err(Error::InvalidResource(format!(
            "font atlas {}x{} needs {} bytes, got {}",
            extent.width,
            extent.height,
            expected,
            pixels.len()
        )));
    }

    let staging = Buffer::with_data(
        Arc::clone(ctx),
        BufferDesc {
            size: pixels.len() as u64,
            usage: BufferUsage::TRANSFER_SRC,
            memory_properties: MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
        },
        pixels,
    )?;
    let mut image = Image::new(
        ctx,
        ImageDesc {
            extent,
            mip_levels: 1,
            samples: SampleCount::S1,
            format: Format::R8G8B8A8_UNORM,
            usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
            memory_properties: MemoryProperties::DEVICE_LOCAL,
        },
    )?;
    image.fill_mip_level0(&staging, false)?;
    let view = ImageView::new(ctx.device(), &image, ImageAspect::Color)?;
    Ok(FontAtlas { view, image })
}

#[cfg(test)]
#[path = "ui_renderer_tests.rs"]
mod tests;
