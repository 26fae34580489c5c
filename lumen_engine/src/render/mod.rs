/// Presentation and per-frame rendering

pub mod frame;
pub mod render_system;
pub mod scene_renderer;
pub mod swapchain;
pub mod ui_renderer;

pub use frame::{CommandBufferSync, Frame, FrameRing, FrameState};
pub use render_system::{RenderStats, RenderSystem};
pub use scene_renderer::SceneRenderer;
pub use swapchain::Swapchain;
pub use ui_renderer::{UiDrawCommand, UiDrawData, UiRenderer, UiVertex};
