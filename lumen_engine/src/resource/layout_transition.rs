/// Closed table of supported image layout transitions
///
/// Each `(old, new)` pair maps to the access masks and pipeline stages of its
/// barrier. New transitions are added here explicitly; nothing is inferred.

use crate::graphics_device::{AccessFlags, ImageLayout, PipelineStages};

/// Barrier masks of one transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierMasks {
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub src_stage: PipelineStages,
    pub dst_stage: PipelineStages,
}

const TRANSITIONS: &[(ImageLayout, ImageLayout, BarrierMasks)] = &[
    (
        ImageLayout::Undefined,
        ImageLayout::TransferDstOptimal,
        BarrierMasks {
            src_access: AccessFlags::empty(),
            dst_access: AccessFlags::TRANSFER_WRITE,
            src_stage: PipelineStages::TOP_OF_PIPE,
            dst_stage: PipelineStages::TRANSFER,
        },
    ),
    (
        ImageLayout::TransferDstOptimal,
        ImageLayout::ShaderReadOnlyOptimal,
        BarrierMasks {
            src_access: AccessFlags::TRANSFER_WRITE,
            dst_access: AccessFlags::SHADER_READ,
            src_stage: PipelineStages::TRANSFER,
            dst_stage: PipelineStages::FRAGMENT_SHADER,
        },
    ),
    (
        ImageLayout::TransferDstOptimal,
        ImageLayout::TransferSrcOptimal,
        BarrierMasks {
            src_access: AccessFlags::TRANSFER_WRITE,
            dst_access: AccessFlags::TRANSFER_READ,
            src_stage: PipelineStages::TRANSFER,
            dst_stage: PipelineStages::TRANSFER,
        },
    ),
    (
        ImageLayout::TransferSrcOptimal,
        ImageLayout::ShaderReadOnlyOptimal,
        BarrierMasks {
            src_access: AccessFlags::TRANSFER_READ,
            dst_access: AccessFlags::SHADER_READ,
            src_stage: PipelineStages::TRANSFER,
            dst_stage: PipelineStages::FRAGMENT_SHADER,
        },
    ),
];

/// Masks for `old → new`, or `None` when the pair is not supported
pub fn barrier_masks(old: ImageLayout, new: ImageLayout) -> Option<BarrierMasks> {
    TRANSITIONS
        .iter()
        .find(|(src, dst, _)| *src == old && *dst == new)
        .map(|(_, _, masks)| *masks)
}

/// Human-readable list of the supported pairs, for error messages
pub fn supported_transitions() -> String {
    TRANSITIONS
        .iter()
        .map(|(src, dst, _)| format!("{:?} -> {:?}", src, dst))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
#[path = "layout_transition_tests.rs"]
mod tests;
