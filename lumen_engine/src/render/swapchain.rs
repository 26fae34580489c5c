/// Swapchain: surface negotiation, presentable images and their views
///
/// Selection rules are plain functions over the queried surface support so
/// they can be checked without a device.

use std::sync::Arc;

use crate::context::Device;
use crate::error::{Error, Result};
use crate::graphics_device::{
    AcquiredImage, ColorSpace, Extent2D, Format, ImageAspect, ImageDesc, ImageUsage,
    MemoryProperties, PresentMode, PresentStatus, QueueFamilyIndices, SampleCount,
    SemaphoreHandle, SharingMode, SurfaceCapabilities, SurfaceFormat, SwapchainCreateInfo,
    SwapchainHandle, ImageViewHandle,
};
use crate::resource::{Image, ImageView};
use crate::{engine_error, engine_info};

const SOURCE: &str = "lumen::Swapchain";

// ===== SELECTION =====

/// Prefer B8G8R8A8_SRGB with sRGB non-linear color space, else the first format
pub fn select_surface_format(formats: &[SurfaceFormat]) -> Option<SurfaceFormat> {
    formats
        .iter()
        .find(|f| f.format == Format::B8G8R8A8_SRGB && f.color_space == ColorSpace::SrgbNonlinear)
        .or_else(|| formats.first())
        .copied()
}

/// Prefer MAILBOX, else FIFO (always available)
pub fn select_present_mode(modes: &[PresentMode]) -> PresentMode {
    if modes.contains(&PresentMode::Mailbox) {
        PresentMode::Mailbox
    } else {
        PresentMode::Fifo
    }
}

/// Use the surface's fixed extent, or clamp `requested` into the supported range
pub fn select_extent(capabilities: &SurfaceCapabilities, requested: Extent2D) -> Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    Extent2D::new(
        requested
            .width
            .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
        requested
            .height
            .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
    )
}

/// One more than the minimum, capped by the maximum (0 = unlimited)
pub fn select_image_count(capabilities: &SurfaceCapabilities) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// CONCURRENT across distinct graphics/present families, else EXCLUSIVE
pub fn select_sharing_mode(families: QueueFamilyIndices) -> (SharingMode, Vec<u32>) {
    if families.graphics != families.present {
        (SharingMode::Concurrent, vec![families.graphics, families.present])
    } else {
        (SharingMode::Exclusive, Vec::new())
    }
}

// ===== SWAPCHAIN =====

pub struct Swapchain {
    device: Arc<Device>,
    capabilities: SurfaceCapabilities,
    present_modes: Vec<PresentMode>,
    surface_format: SurfaceFormat,
    present_mode: PresentMode,
    handle: SwapchainHandle,
    extent: Extent2D,
    images: Vec<Image>,
    views: Vec<ImageView>,
}

impl Swapchain {
    pub fn new(device: &Arc<Device>, requested: Extent2D) -> Result<Self> {
        let raw = device.raw();
        let capabilities = raw.surface_capabilities()?;
        let formats = raw.surface_formats()?;
        let present_modes = raw.surface_present_modes()?;

        let Some(surface_format) = select_surface_format(&formats) else {
            engine_error!(SOURCE, "Surface reports no formats");
            return Err(Error::InitializationFailed("surface reports no formats".to_string()));
        };
        if present_modes.is_empty() {
            engine_error!(SOURCE, "Surface reports no present modes");
            return Err(Error::InitializationFailed("surface reports no present modes".to_string()));
        }

        let mut swapchain = Self {
            device: Arc::clone(device),
            capabilities,
            present_mode: select_present_mode(&present_modes),
            present_modes,
            surface_format,
            handle: SwapchainHandle::NULL,
            extent: requested,
            images: Vec::new(),
            views: Vec::new(),
        };
        swapchain.create(requested)?;
        Ok(swapchain)
    }

    fn create(&mut self, requested: Extent2D) -> Result<()> {
        let extent = select_extent(&self.capabilities, requested);
        let image_count = select_image_count(&self.capabilities);
        let (sharing_mode, queue_family_indices) = select_sharing_mode(self.device.queue_family_indices());
        self.present_mode = select_present_mode(&self.present_modes);

        let raw = self.device.raw();
        self.handle = raw.create_swapchain(&SwapchainCreateInfo {
            min_image_count: image_count,
            surface_format: self.surface_format,
            extent,
            usage: ImageUsage::COLOR_ATTACHMENT,
            sharing_mode,
            queue_family_indices,
            present_mode: self.present_mode,
            clipped: true,
            old_swapchain: SwapchainHandle::NULL,
        })?;
        self.extent = extent;

        let desc = ImageDesc {
            extent,
            mip_levels: 1,
            samples: SampleCount::S1,
            format: self.surface_format.format,
            usage: ImageUsage::COLOR_ATTACHMENT,
            memory_properties: MemoryProperties::DEVICE_LOCAL,
        };
        self.images = raw
            .swapchain_images(self.handle)?
            .into_iter()
            .map(|handle| Image::alias(handle, desc))
            .collect();
        self.views = self
            .images
            .iter()
            .map(|image| ImageView::new(&self.device, image, ImageAspect::Color))
            .collect::<Result<Vec<_>>>()?;

        engine_info!(
            SOURCE,
            "Swapchain {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            self.images.len(),
            self.surface_format.format,
            self.present_mode
        );
        Ok(())
    }

    /// Destroy views, then the swapchain itself
    fn cleanup(&mut self) {
        self.views.clear();
        self.images.clear();
        if !self.handle.is_null() {
            self.device.raw().destroy_swapchain(self.handle);
            self.handle = SwapchainHandle::NULL;
        }
    }

    /// Rebuild for a new window size
    ///
    /// The caller waits for the device to go idle and never passes a zero extent.
    pub fn recreate(&mut self, requested: Extent2D) -> Result<()> {
        self.cleanup();
        self.capabilities = self.device.raw().surface_capabilities()?;
        self.create(requested)
    }

    pub fn acquire_next_image(&self, semaphore: SemaphoreHandle) -> Result<AcquiredImage> {
        self.device.raw().acquire_next_image(self.handle, semaphore)
    }

    pub fn present(&self, image_index: u32, wait_semaphores: &[SemaphoreHandle]) -> Result<PresentStatus> {
        self.device.raw().queue_present(self.handle, image_index, wait_semaphores)
    }

    pub fn handle(&self) -> SwapchainHandle { self.handle }

    pub fn extent(&self) -> Extent2D { self.extent }

    pub fn surface_format(&self) -> SurfaceFormat { self.surface_format }

    pub fn present_mode(&self) -> PresentMode { self.present_mode }

    pub fn image_count(&self) -> usize { self.images.len() }

    pub fn images(&self) -> &[Image] { &self.images }

    pub fn image_views(&self) -> &[ImageView] { &self.views }

    pub fn image_view_handles(&self) -> Vec<ImageViewHandle> {
        self.views.iter().map(|v| v.handle()).collect()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
#[path = "swapchain_tests.rs"]
mod tests;
