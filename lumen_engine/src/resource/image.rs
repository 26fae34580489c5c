/// GPU image: owned (allocated through the memory manager) or a swapchain alias
///
/// Layouts are tracked per mip level on the CPU side from the transitions the
/// image records; the GPU state matches once the recorded commands execute.

use std::sync::Arc;

use crate::context::GpuContext;
use crate::error::Result;
use crate::graphics_device::{
    BlitRegion, CommandList, Extent2D, Format, ImageAspect, ImageBarrier, ImageDesc, ImageHandle,
    ImageLayout, ImageUsage,
};
use crate::{engine_fatal, engine_warn};
use super::buffer::Buffer;
use super::layout_transition::{barrier_masks, supported_transitions};

const SOURCE: &str = "lumen::Image";

/// Extent of mip level `level`: each dimension halved per level, floor 1
pub fn mip_extent(extent: Extent2D, level: u32) -> Extent2D {
    Extent2D::new(
        extent.width.checked_shr(level).unwrap_or(0).max(1),
        extent.height.checked_shr(level).unwrap_or(0).max(1),
    )
}

/// Full mip chain length for `extent`: floor(log2(max(w, h))) + 1
pub fn mip_level_count_for(extent: Extent2D) -> u32 {
    let largest = extent.width.max(extent.height).max(1);
    u32::BITS - largest.leading_zeros()
}

enum Ownership {
    Owned(Arc<GpuContext>),
    SwapchainAlias,
}

pub struct Image {
    handle: ImageHandle,
    desc: ImageDesc,
    ownership: Ownership,
    layouts: Vec<ImageLayout>,
}

impl Image {
    /// Allocate a device image
    pub fn new(ctx: &Arc<GpuContext>, desc: ImageDesc) -> Result<Self> {
        if desc.mip_levels == 0 || desc.mip_levels > mip_level_count_for(desc.extent) {
            engine_fatal!(
                SOURCE,
                "{} mip levels requested for a {}x{} image",
                desc.mip_levels,
                desc.extent.width,
                desc.extent.height
            );
        }
        let handle = ctx.memory().create_image(&desc)?;
        Ok(Self {
            handle,
            desc,
            ownership: Ownership::Owned(Arc::clone(ctx)),
            layouts: vec![ImageLayout::Undefined; desc.mip_levels as usize],
        })
    }

    /// Non-owning wrapper over a swapchain image
    pub fn alias(handle: ImageHandle, desc: ImageDesc) -> Self {
        Self {
            handle,
            desc,
            ownership: Ownership::SwapchainAlias,
            layouts: vec![ImageLayout::Undefined; desc.mip_levels.max(1) as usize],
        }
    }

    pub fn handle(&self) -> ImageHandle { self.handle }

    pub fn description(&self) -> &ImageDesc { &self.desc }

    pub fn extent(&self) -> Extent2D { self.desc.extent }

    pub fn format(&self) -> Format { self.desc.format }

    pub fn mip_levels(&self) -> u32 { self.desc.mip_levels }

    pub fn is_swapchain_image(&self) -> bool {
        matches!(self.ownership, Ownership::SwapchainAlias)
    }

    /// Layout of `mip` as of the last recorded transition
    pub fn layout(&self, mip: u32) -> ImageLayout {
        self.layouts[mip as usize]
    }

    pub fn mip_extent(&self, level: u32) -> Extent2D {
        mip_extent(self.desc.extent, level)
    }

    pub fn aspect(&self) -> ImageAspect {
        match self.desc.format {
            Format::D32_SFLOAT => ImageAspect::Depth,
            _ => ImageAspect::Color,
        }
    }

    /// Record a barrier moving mips `base_mip..base_mip + level_count` from `old` to `new`
    pub fn transition_layout(
        &mut self,
        cmd: &CommandList<'_>,
        old: ImageLayout,
        new: ImageLayout,
        base_mip: u32,
        level_count: u32,
    ) {
        let Some(masks) = barrier_masks(old, new) else {
            engine_fatal!(
                SOURCE,
                "Unsupported layout transition {:?} -> {:?} on image {:?} (supported: {})",
                old,
                new,
                self.handle,
                supported_transitions()
            );
        };
        let range = base_mip as usize..(base_mip + level_count) as usize;
        if range.end > self.layouts.len() {
            engine_fatal!(
                SOURCE,
                "Mip range {:?} out of bounds for image {:?} with {} levels",
                range,
                self.handle,
                self.layouts.len()
            );
        }
        if old != ImageLayout::Undefined && self.layouts[range.clone()].iter().any(|l| *l != old) {
            engine_warn!(
                SOURCE,
                "Transition from {:?} on image {:?} but tracked layouts are {:?}",
                old,
                self.handle,
                &self.layouts[range.clone()]
            );
        }

        cmd.pipeline_barrier(&ImageBarrier {
            image: self.handle,
            old_layout: old,
            new_layout: new,
            src_access: masks.src_access,
            dst_access: masks.dst_access,
            src_stage: masks.src_stage,
            dst_stage: masks.dst_stage,
            aspect: self.aspect(),
            base_mip_level: base_mip,
            level_count,
        });
        self.layouts[range].fill(new);
    }

    /// Upload `buffer` into mip 0, then build the other mips or make the image readable
    ///
    /// Runs in a blocking one-time submission. Every mip ends in
    /// `ShaderReadOnlyOptimal`.
    pub fn fill_mip_level0(&mut self, buffer: &Buffer, generate_other_mips: bool) -> Result<()> {
        let ctx = match &self.ownership {
            Ownership::Owned(ctx) => Arc::clone(ctx),
            Ownership::SwapchainAlias => {
                engine_fatal!(SOURCE, "Cannot fill swapchain image {:?}", self.handle)
            }
        };
        if !self.desc.usage.contains(ImageUsage::TRANSFER_DST) {
            engine_fatal!(SOURCE, "Image {:?} filled without TRANSFER_DST usage", self.handle);
        }

        let mips = self.desc.mip_levels;
        let source = buffer.handle();
        ctx.device().execute_one_time_commands(|cmd| {
            self.transition_layout(cmd, ImageLayout::Undefined, ImageLayout::TransferDstOptimal, 0, mips);
            cmd.copy_buffer_to_image(source, self.handle, self.desc.extent);
            if generate_other_mips && mips > 1 {
                self.generate_mip_levels_from_level0(cmd);
            } else {
                self.transition_layout(
                    cmd,
                    ImageLayout::TransferDstOptimal,
                    ImageLayout::ShaderReadOnlyOptimal,
                    0,
                    mips,
                );
            }
            Ok(())
        })
    }

    /// Record the downsampling blit chain; expects every mip in `TransferDstOptimal`
    pub fn generate_mip_levels_from_level0(&mut self, cmd: &CommandList<'_>) {
        if !self.desc.usage.contains(ImageUsage::TRANSFER_SRC) {
            engine_fatal!(SOURCE, "Mip generation on image {:?} without TRANSFER_SRC usage", self.handle);
        }

        let last = self.desc.mip_levels - 1;
        for mip in 0..last {
            self.transition_layout(cmd, ImageLayout::TransferDstOptimal, ImageLayout::TransferSrcOptimal, mip, 1);
            cmd.blit_image(
                self.handle,
                &BlitRegion {
                    src_mip_level: mip,
                    src_extent: self.mip_extent(mip),
                    dst_mip_level: mip + 1,
                    dst_extent: self.mip_extent(mip + 1),
                },
            );
            self.transition_layout(cmd, ImageLayout::TransferSrcOptimal, ImageLayout::ShaderReadOnlyOptimal, mip, 1);
        }
        self.transition_layout(cmd, ImageLayout::TransferDstOptimal, ImageLayout::ShaderReadOnlyOptimal, last, 1);
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if let Ownership::Owned(ctx) = &self.ownership {
            ctx.memory().destroy_image(self.handle);
        }
    }
}

#[cfg(test)]
#[path = "image_tests.rs"]
mod tests;
