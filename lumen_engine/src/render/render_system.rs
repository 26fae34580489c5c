/// Per-frame submission: acquire → record → submit → present
///
/// The render system owns the frame ring and the scene/UI passes. Each
/// `render` call uses the current frame slot:
///
/// 1. wait for the slot fence (its previous submission), reset it
///    (every failure past the reset is fatal: the slot cannot be reused)
/// 2. acquire a swapchain image, signaling the slot's acquire semaphore
/// 3. write the frame uniforms and record the scene pass, then the UI pass
/// 4. submit: wait acquire at color output, signal render-finished, arm the fence
/// 5. present after render-finished
/// 6. advance the ring
///
/// The fence wait is the only CPU block in steady state; it bounds how far
/// the CPU runs ahead to `frames_in_flight` submissions.

use std::sync::Arc;

use crate::context::{Context, Device};
use crate::error::Result;
use crate::graphics_device::{DescriptorSetHandle, PresentStatus};
use crate::resource::DescriptorAllocator;
use crate::scene::{CameraUniforms, Scene};
use crate::{engine_debug, engine_fatal, engine_info, engine_warn};
use super::frame::{FrameRing, FrameState};
use super::scene_renderer::SceneRenderer;
use super::swapchain::Swapchain;
use super::ui_renderer::{UiDrawData, UiRenderer};

const SOURCE: &str = "lumen::RenderSystem";

/// Counters since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub frames_rendered: u64,
    pub suboptimal_acquires: u64,
}

pub struct RenderSystem {
    ui_renderer: Option<UiRenderer>,
    scene_renderer: SceneRenderer,
    frames: FrameRing,
    device: Arc<Device>,
    ui_draw_data: Option<UiDrawData>,
    stats: RenderStats,
}

impl RenderSystem {
    pub fn new(context: &Context) -> Result<Self> {
        let config = context.config();
        let gpu = context.gpu();
        let swapchain = context.swapchain();

        let frames = FrameRing::new(
            gpu,
            config.frames_in_flight,
            std::mem::size_of::<CameraUniforms>() as u64,
        )?;
        let scene_renderer = SceneRenderer::new(gpu, swapchain, config, !config.enable_ui)?;
        let ui_renderer = if config.enable_ui {
            Some(UiRenderer::new(gpu, swapchain, config)?)
        } else {
            None
        };

        engine_info!(
            SOURCE,
            "Render system ready: {} frames in flight, UI {}",
            frames.len(),
            if ui_renderer.is_some() { "on" } else { "off" }
        );
        Ok(Self {
            ui_renderer,
            scene_renderer,
            frames,
            device: Arc::clone(context.device()),
            ui_draw_data: None,
            stats: RenderStats::default(),
        })
    }

    pub fn frames(&self) -> &FrameRing { &self.frames }

    pub fn current_frame_index(&self) -> usize { self.frames.current_index() }

    pub fn stats(&self) -> RenderStats { self.stats }

    pub fn scene_renderer(&self) -> &SceneRenderer { &self.scene_renderer }

    pub fn ui_renderer(&self) -> Option<&UiRenderer> { self.ui_renderer.as_ref() }

    pub fn ui_renderer_mut(&mut self) -> Option<&mut UiRenderer> { self.ui_renderer.as_mut() }

    /// UI geometry drawn by the following frames until replaced
    pub fn set_ui_draw_data(&mut self, data: Option<UiDrawData>) {
        self.ui_draw_data = data;
    }

    // ===== FRAME =====

    /// Render one frame of `scene`; returns immediately without one
    pub fn render(&mut self, swapchain: &Swapchain, scene: Option<&Scene>) -> Result<()> {
        let Some(scene) = scene else {
            return Ok(());
        };
        let raw = self.device.raw();
        let frame = self.frames.current_mut();

        let fence = frame.sync().fence();
        raw.wait_for_fence(fence, u64::MAX)?;
        frame.transition(FrameState::Acquiring);

        // From here on the slot's fence is unsignaled until the submit arms it
        if let Err(e) = raw.reset_fence(fence) {
            engine_fatal!(SOURCE, "Failed to reset fence of frame {}: {}", frame.index(), e);
        }
        let acquired = match swapchain.acquire_next_image(frame.sync().image_available()) {
            Ok(acquired) => acquired,
            Err(e) => engine_fatal!(SOURCE, "Failed to acquire swapchain image: {}", e),
        };
        if acquired.suboptimal {
            self.stats.suboptimal_acquires += 1;
            engine_debug!(SOURCE, "Suboptimal swapchain image {} acquired", acquired.index);
        }
        frame.set_image_index(acquired.index);

        frame.transition(FrameState::Recording);
        let extent = swapchain.extent();
        let submitted = (|| -> Result<()> {
            frame.write_uniforms(scene.uniform_bytes())?;
            let command_buffer = frame.command_buffer();
            raw.begin_command_buffer(command_buffer, false)?;
            let cmd = self.device.command_list(command_buffer);
            self.scene_renderer.record(&cmd, frame, acquired.index, extent, scene);
            if let Some(ui) = self.ui_renderer.as_mut() {
                ui.record(&cmd, frame.index(), acquired.index, extent, self.ui_draw_data.as_ref())?;
            }
            raw.end_command_buffer(command_buffer)?;
            raw.queue_submit(&frame.sync().submit_info(command_buffer))
        })();
        if let Err(e) = submitted {
            engine_fatal!(SOURCE, "Frame {} failed between fence reset and submit: {}", frame.index(), e);
        }
        frame.transition(FrameState::Submitted);

        frame.transition(FrameState::Presenting);
        match swapchain.present(acquired.index, frame.sync().signal_semaphores()) {
            Ok(PresentStatus::Success) => {}
            Ok(status) => engine_fatal!(SOURCE, "Present of image {} returned {:?}", acquired.index, status),
            Err(e) => engine_fatal!(SOURCE, "Present of image {} failed: {}", acquired.index, e),
        }
        frame.transition(FrameState::Idle);

        self.frames.advance();
        self.stats.frames_rendered += 1;
        Ok(())
    }

    // ===== SWAPCHAIN =====

    /// Release everything that references swapchain images
    pub fn on_before_swapchain_recreated(&mut self) {
        self.scene_renderer.destroy_attachments();
        if let Some(ui) = self.ui_renderer.as_mut() {
            ui.destroy_framebuffers();
        }
    }

    pub fn on_swapchain_recreated(&mut self, swapchain: &Swapchain) -> Result<()> {
        self.scene_renderer.create_attachments(swapchain)?;
        if let Some(ui) = self.ui_renderer.as_mut() {
            ui.create_framebuffers(swapchain)?;
        }
        Ok(())
    }

    // ===== SCENE =====

    /// Give every frame slot a descriptor set bound to its uniforms and `scene`
    pub fn on_scene_open(&mut self, descriptors: &mut DescriptorAllocator, scene: &Scene) -> Result<()> {
        let layout = self.scene_renderer.descriptor_set_layout();
        for frame in self.frames.frames_mut() {
            let set = descriptors.allocate(layout)?;
            descriptors.write(set, &self.scene_renderer.descriptor_writes(frame, scene));
            frame.set_descriptor_set(set);
        }
        engine_debug!(SOURCE, "{} frame descriptor sets bound to the scene", self.frames.len());
        Ok(())
    }

    /// Drop the frame descriptor sets; the GPU must be idle before the pool resets
    pub fn on_scene_close(&mut self, descriptors: &mut DescriptorAllocator) -> Result<()> {
        self.device.wait_idle()?;
        for frame in self.frames.frames_mut() {
            frame.set_descriptor_set(DescriptorSetHandle::NULL);
        }
        descriptors.reset()
    }

    // ===== SHADERS =====

    /// Rebuild every pipeline; returns false when at least one kept its old version
    pub fn on_try_reload_shaders(&mut self) -> Result<bool> {
        self.device.wait_idle()?;
        let mut reloaded = self.scene_renderer.reload_shaders();
        if let Some(ui) = self.ui_renderer.as_mut() {
            reloaded &= ui.reload_shaders();
        }
        if reloaded {
            engine_info!(SOURCE, "Shaders reloaded");
        } else {
            engine_warn!(SOURCE, "Shader reload incomplete, previous pipelines kept");
        }
        Ok(reloaded)
    }
}

#[cfg(test)]
#[path = "render_system_tests.rs"]
mod tests;
