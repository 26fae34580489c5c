/// GPU-resident scene
///
/// Built once from a [`SceneData`]: geometry, transforms and indirect draws
/// are uploaded into device-local buffers through blocking staging copies,
/// and the texture gets its full mip chain. Only the camera changes
/// afterwards, through the per-frame uniform buffers of the render system.

use std::sync::Arc;

use crate::context::GpuContext;
use crate::error::{Error, Result};
use crate::graphics_device::{
    BufferDesc, BufferUsage, Format, ImageAspect, ImageDesc, ImageUsage, MemoryProperties,
    SampleCount,
};
use crate::resource::{mip_level_count_for, Buffer, Image, ImageView};
use crate::{engine_error, engine_info};
use super::scene_data::{CameraUniforms, SceneData};

const SOURCE: &str = "lumen::Scene";

pub struct Scene {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    transform_buffer: Buffer,
    indirect_buffer: Buffer,
    draw_count: u32,
    texture_view: ImageView,
    texture: Image,
    camera: CameraUniforms,
}

impl Scene {
    pub fn new(ctx: &Arc<GpuContext>, data: &SceneData) -> Result<Self> {
        if let Err(e) = validate(data) {
            engine_error!(SOURCE, "Rejected scene data: {}", e);
            return Err(e);
        }

        let vertex_buffer = upload(ctx, BufferUsage::VERTEX, bytemuck::cast_slice(&data.vertices))?;
        let index_buffer = upload(ctx, BufferUsage::INDEX, bytemuck::cast_slice(&data.indices))?;
        let transform_buffer = upload(ctx, BufferUsage::STORAGE, bytemuck::cast_slice(&data.transforms))?;
        let commands = data.indirect_commands();
        let indirect_buffer = upload(ctx, BufferUsage::INDIRECT, bytemuck::cast_slice(&commands))?;

        let (texture, texture_view) = upload_texture(ctx, data)?;

        engine_info!(
            SOURCE,
            "Scene uploaded: {} vertices, {} indices, {} draws, {}x{} texture ({} mips)",
            data.vertices.len(),
            data.indices.len(),
            commands.len(),
            texture.extent().width,
            texture.extent().height,
            texture.mip_levels()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            transform_buffer,
            indirect_buffer,
            draw_count: commands.len() as u32,
            texture_view,
            texture,
            camera: CameraUniforms::default(),
        })
    }

    pub fn vertex_buffer(&self) -> &Buffer { &self.vertex_buffer }

    pub fn index_buffer(&self) -> &Buffer { &self.index_buffer }

    pub fn transform_buffer(&self) -> &Buffer { &self.transform_buffer }

    pub fn indirect_buffer(&self) -> &Buffer { &self.indirect_buffer }

    pub fn draw_count(&self) -> u32 { self.draw_count }

    pub fn texture(&self) -> &Image { &self.texture }

    pub fn texture_view(&self) -> &ImageView { &self.texture_view }

    pub fn camera(&self) -> &CameraUniforms { &self.camera }

    /// Camera used by the next recorded frames
    pub fn set_camera(&mut self, camera: CameraUniforms) {
        self.camera = camera;
    }

    /// Bytes written into the frame uniform buffer
    pub fn uniform_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(&self.camera)
    }
}

fn validate(data: &SceneData) -> Result<()> {
    if data.vertices.is_empty() || data.indices.is_empty() || data.primitives.is_empty() {
        return Err(Error::InvalidResource("scene has no geometry".to_string()));
    }
    if data.transforms.is_empty() {
        return Err(Error::InvalidResource("scene has no node transforms".to_string()));
    }
    for (i, p) in data.primitives.iter().enumerate() {
        let end = p.first_index as u64 + p.index_count as u64;
        if p.index_count == 0 || end > data.indices.len() as u64 {
            return Err(Error::InvalidResource(format!(
                "primitive {} indexes {}..{} out of {} indices",
                i,
                p.first_index,
                end,
                data.indices.len()
            )));
        }
        if p.node as usize >= data.transforms.len() {
            return Err(Error::InvalidResource(format!(
                "primitive {} references node {} out of {}",
                i,
                p.node,
                data.transforms.len()
            )));
        }
    }

    let extent = data.texture.extent;
    if extent.is_degenerate() {
        return Err(Error::InvalidResource("scene texture has a zero extent".to_string()));
    }
    let expected = extent.width as usize * extent.height as usize * 4;
    if data.texture.pixels.len() != expected {
        return Err(Error::InvalidResource(format!(
            "scene texture {}x{} needs {} bytes, got {}",
            extent.width,
            extent.height,
            expected,
            data.texture.pixels.len()
        )));
    }
    Ok(())
}

/// Device-local buffer filled through a staging copy that is waited on and released
fn upload(ctx: &Arc<GpuContext>, usage: BufferUsage, bytes: &[u8]) -> Result<Buffer> {
    let mut buffer = Buffer::with_data(
        Arc::clone(ctx),
        BufferDesc {
            size: bytes.len() as u64,
            usage: usage | BufferUsage::TRANSFER_DST,
            memory_properties: MemoryProperties::DEVICE_LOCAL,
        },
        bytes,
    )?;
    buffer.submit_staging_copy()?;
    buffer.destroy_staging_buffer();
    Ok(buffer)
}

fn upload_texture(ctx: &Arc<GpuContext>, data: &SceneData) -> Result<(Image, ImageView)> {
    let pixels = &data.texture.pixels;
    let staging = Buffer::with_data(
        Arc::clone(ctx),
        BufferDesc {
            size: pixels.len() as u64,
            usage: BufferUsage::TRANSFER_SRC,
            memory_properties: MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
        },
        pixels,
    )?;

    let mip_levels = mip_level_count_for(data.texture.extent);
    let mut texture = Image::new(
        ctx,
        ImageDesc {
            extent: data.texture.extent,
            mip_levels,
            samples: SampleCount::S1,
            format: Format::R8G8B8A8_SRGB,
            usage: ImageUsage::TRANSFER_DST | ImageUsage::SAMPLED | ImageUsage::TRANSFER_SRC,
            memory_properties: MemoryProperties::DEVICE_LOCAL,
        },
    )?;
    texture.fill_mip_level0(&staging, mip_levels > 1)?;

    let view = ImageView::new(ctx.device(), &texture, ImageAspect::Color)?;
    Ok((texture, view))
}

#[cfg(test)]
#[path = "scene_tests.rs"]
mod tests;
