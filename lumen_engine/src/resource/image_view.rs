/// Owned image views and samplers

use std::sync::Arc;

use crate::context::Device;
use crate::error::Result;
use crate::graphics_device::{ImageAspect, ImageViewDesc, ImageViewHandle, SamplerDesc, SamplerHandle};
use super::image::Image;

// ===== IMAGE VIEW =====

/// View over every mip of an image
pub struct ImageView {
    device: Arc<Device>,
    handle: ImageViewHandle,
}

impl ImageView {
    pub fn new(device: &Arc<Device>, image: &Image, aspect: ImageAspect) -> Result<Self> {
        let handle = device.raw().create_image_view(&ImageViewDesc {
            image: image.handle(),
            format: image.format(),
            aspect,
            mip_levels: image.mip_levels(),
        })?;
        Ok(Self { device: Arc::clone(device), handle })
    }

    pub fn handle(&self) -> ImageViewHandle { self.handle }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        self.device.raw().destroy_image_view(self.handle);
    }
}

// ===== SAMPLER =====

pub struct Sampler {
    device: Arc<Device>,
    handle: SamplerHandle,
}

impl Sampler {
    pub fn new(device: &Arc<Device>, desc: &SamplerDesc) -> Result<Self> {
        let handle = device.raw().create_sampler(desc)?;
        Ok(Self { device: Arc::clone(device), handle })
    }

    pub fn handle(&self) -> SamplerHandle { self.handle }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.device.raw().destroy_sampler(self.handle);
    }
}
