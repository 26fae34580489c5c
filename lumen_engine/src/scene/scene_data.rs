/// CPU-side scene description handed to the engine by a loader

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::graphics_device::{
    DrawIndexedIndirectCommand, Extent2D, Format, VertexAttribute, VertexLayout,
};

/// Interleaved vertex of the scene pipeline
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn layout() -> VertexLayout {
        VertexLayout {
            stride: std::mem::size_of::<Vertex>() as u32,
            attributes: vec![
                VertexAttribute { location: 0, format: Format::R32G32B32_SFLOAT, offset: 0 },
                VertexAttribute { location: 1, format: Format::R32G32B32_SFLOAT, offset: 12 },
                VertexAttribute { location: 2, format: Format::R32G32_SFLOAT, offset: 24 },
            ],
        }
    }
}

/// Range of the index buffer drawn with the transform of `node`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Primitive {
    pub first_index: u32,
    pub index_count: u32,
    pub node: u32,
}

/// Tightly packed RGBA8 texels of mip level 0
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub extent: Extent2D,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub primitives: Vec<Primitive>,
    /// World transform per node
    pub transforms: Vec<Mat4>,
    pub texture: TextureData,
}

impl SceneData {
    /// One indirect draw per primitive; `first_instance` carries the node index
    /// so the vertex shader can fetch its transform
    pub fn indirect_commands(&self) -> Vec<DrawIndexedIndirectCommand> {
        self.primitives
            .iter()
            .map(|p| DrawIndexedIndirectCommand {
                index_count: p.index_count,
                instance_count: 1,
                first_index: p.first_index,
                vertex_offset: 0,
                first_instance: p.node,
            })
            .collect()
    }
}

/// Per-frame uniforms of the scene pipeline (binding 0)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    /// xyz = eye position, w unused
    pub eye: [f32; 4],
}

impl Default for CameraUniforms {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            eye: [0.0; 4],
        }
    }
}

impl CameraUniforms {
    pub fn new(view: Mat4, projection: Mat4, eye: Vec3) -> Self {
        Self { view, projection, eye: [eye.x, eye.y, eye.z, 0.0] }
    }
}
