/// Render passes, framebuffers and rebuildable graphics pipelines

use std::sync::Arc;

use crate::context::Device;
use crate::error::Result;
use crate::graphics_device::{
    DescriptorSetLayoutHandle, Extent2D, FramebufferDesc, FramebufferHandle, ImageViewHandle,
    PipelineDesc, PipelineHandle, PipelineLayoutHandle, PipelineObjects, RenderPassDesc,
    RenderPassHandle,
};
use crate::{engine_info, engine_warn};

const SOURCE: &str = "lumen::Pipeline";

// ===== RENDER PASS =====

pub struct RenderPass {
    device: Arc<Device>,
    handle: RenderPassHandle,
}

impl RenderPass {
    pub fn new(device: &Arc<Device>, desc: &RenderPassDesc) -> Result<Self> {
        let handle = device.raw().create_render_pass(desc)?;
        Ok(Self { device: Arc::clone(device), handle })
    }

    pub fn handle(&self) -> RenderPassHandle { self.handle }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.device.raw().destroy_render_pass(self.handle);
    }
}

// ===== FRAMEBUFFER =====

pub struct Framebuffer {
    device: Arc<Device>,
    handle: FramebufferHandle,
}

impl Framebuffer {
    pub fn new(device: &Arc<Device>, desc: &FramebufferDesc) -> Result<Self> {
        let handle = device.raw().create_framebuffer(desc)?;
        Ok(Self { device: Arc::clone(device), handle })
    }

    pub fn handle(&self) -> FramebufferHandle { self.handle }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        self.device.raw().destroy_framebuffer(self.handle);
    }
}

/// One framebuffer per swapchain view, with `extra` attachments appended (depth)
pub fn create_framebuffers(
    device: &Arc<Device>,
    render_pass: RenderPassHandle,
    color_views: &[ImageViewHandle],
    extra: &[ImageViewHandle],
    extent: Extent2D,
) -> Result<Vec<Framebuffer>> {
    color_views
        .iter()
        .map(|view| {
            let mut attachments = vec![*view];
            attachments.extend_from_slice(extra);
            Framebuffer::new(device, &FramebufferDesc { render_pass, attachments, extent })
        })
        .collect()
}

// ===== PIPELINE =====

/// Graphics pipeline that keeps its description for rebuilds
pub struct Pipeline {
    device: Arc<Device>,
    desc: PipelineDesc,
    objects: PipelineObjects,
}

impl Pipeline {
    pub fn new(device: &Arc<Device>, desc: PipelineDesc) -> Result<Self> {
        let objects = device.raw().create_pipeline(&desc)?;
        engine_info!(SOURCE, "Pipeline '{}' created", desc.name);
        Ok(Self { device: Arc::clone(device), desc, objects })
    }

    pub fn name(&self) -> &str { &self.desc.name }

    pub fn handle(&self) -> PipelineHandle { self.objects.pipeline }

    pub fn layout(&self) -> PipelineLayoutHandle { self.objects.layout }

    pub fn descriptor_set_layout(&self) -> DescriptorSetLayoutHandle {
        self.objects.descriptor_set_layout
    }

    /// Rebuild from the shader files on disk
    ///
    /// On failure the previous pipeline stays in use and `false` is returned.
    /// The caller must ensure the GPU no longer uses the old pipeline.
    pub fn rebuild(&mut self) -> bool {
        match self.device.raw().create_pipeline(&self.desc) {
            Ok(objects) => {
                let old = std::mem::replace(&mut self.objects, objects);
                self.device.raw().destroy_pipeline(&old);
                engine_info!(SOURCE, "Pipeline '{}' rebuilt", self.desc.name);
                true
            }
            Err(e) => {
                engine_warn!(
                    SOURCE,
                    "Rebuild of pipeline '{}' failed, keeping previous one: {}",
                    self.desc.name,
                    e
                );
                false
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.device.raw().destroy_pipeline(&self.objects);
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
