/// Engine event types
///
/// Window and scene events are published by external collaborators (window
/// adapter, scene loader); swapchain events are published by the engine.

use std::sync::Arc;

use crate::graphics_device::Extent2D;
use crate::scene::SceneData;

/// Marker for types that can travel on the [`EventBus`](super::EventBus)
pub trait Event: 'static {}

/// The window framebuffer changed size (zero when minimized)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowResized {
    pub width: u32,
    pub height: u32,
}

impl WindowResized {
    pub fn extent(&self) -> Extent2D {
        Extent2D::new(self.width, self.height)
    }
}

/// Published right before the swapchain is destroyed for recreation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeforeSwapchainRecreated;

/// Published once the swapchain has been recreated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainRecreated {
    pub extent: Extent2D,
    pub image_count: usize,
}

/// The native window is about to be destroyed and rebuilt (fullscreen toggle)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeforeWindowRecreated;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRecreated;

/// A scene finished loading on the CPU side and should be uploaded
#[derive(Debug, Clone)]
pub struct SceneOpened {
    pub data: Arc<SceneData>,
}

/// The current scene should be released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneClosed;

/// Rebuild every pipeline from its shader files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryReloadShaders;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    F5,
    Other(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInput {
    pub key: Key,
    pub pressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    /// Visible cursor, UI receives input
    Normal,
    /// Captured cursor (camera control), UI ignores input
    Disabled,
}

/// The cursor mode is about to change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeforeCursorModeUpdated {
    pub mode: CursorMode,
}

impl Event for WindowResized {}
impl Event for BeforeSwapchainRecreated {}
impl Event for SwapchainRecreated {}
impl Event for BeforeWindowRecreated {}
impl Event for WindowRecreated {}
impl Event for SceneOpened {}
impl Event for SceneClosed {}
impl Event for TryReloadShaders {}
impl Event for KeyInput {}
impl Event for BeforeCursorModeUpdated {}
