//! Scene module
//!
//! `SceneData` is the in-memory description produced by a loader; `Scene`
//! holds its GPU resources.

mod scene;
mod scene_data;

pub use scene::Scene;
pub use scene_data::{CameraUniforms, Primitive, SceneData, TextureData, Vertex};
