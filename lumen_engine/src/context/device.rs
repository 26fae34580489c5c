/// Logical device wrapper
///
/// Owns the backend device handle plus the command buffer and fence reserved
/// for one-time submissions (uploads, layout transitions, mip generation).

use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::graphics_device::{
    CommandBufferHandle, CommandBufferKind, CommandList, FenceHandle, GraphicsDevice,
    QueueFamilyIndices, SubmitInfo,
};
use crate::engine_err;

const SOURCE: &str = "lumen::Device";

struct OneTimeSubmit {
    command_buffer: CommandBufferHandle,
    fence: FenceHandle,
}

pub struct Device {
    raw: Arc<dyn GraphicsDevice>,
    one_time: Mutex<OneTimeSubmit>,
}

impl Device {
    pub fn new(raw: Arc<dyn GraphicsDevice>) -> Result<Self> {
        let command_buffer = raw.allocate_command_buffer(CommandBufferKind::OneTime)?;
        let fence = match raw.create_fence(false) {
            Ok(fence) => fence,
            Err(e) => {
                raw.free_command_buffer(CommandBufferKind::OneTime, command_buffer);
                return Err(e);
            }
        };

        Ok(Self {
            raw,
            one_time: Mutex::new(OneTimeSubmit { command_buffer, fence }),
        })
    }

    /// Backend device
    pub fn raw(&self) -> &dyn GraphicsDevice {
        &*self.raw
    }

    pub fn queue_family_indices(&self) -> QueueFamilyIndices {
        self.raw.queue_family_indices()
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.raw.wait_idle()
    }

    pub fn allocate_command_buffer(&self, kind: CommandBufferKind) -> Result<CommandBufferHandle> {
        self.raw.allocate_command_buffer(kind)
    }

    pub fn free_command_buffer(&self, kind: CommandBufferKind, command_buffer: CommandBufferHandle) {
        self.raw.free_command_buffer(kind, command_buffer);
    }

    /// Recording handle over `command_buffer`
    pub fn command_list(&self, command_buffer: CommandBufferHandle) -> CommandList<'_> {
        CommandList::new(&*self.raw, command_buffer)
    }

    /// Record with `record`, submit, and block until the GPU is done
    ///
    /// Not re-entrant: `record` must not call back into this method.
    pub fn execute_one_time_commands<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&CommandList<'_>) -> Result<()>,
    {
        let submit = self
            .one_time
            .lock()
            .map_err(|_| engine_err!(SOURCE, "One-time submit state poisoned"))?;
        let raw = &*self.raw;

        raw.begin_command_buffer(submit.command_buffer, true)?;
        let cmd = CommandList::new(raw, submit.command_buffer);
        record(&cmd)?;
        raw.end_command_buffer(submit.command_buffer)?;

        raw.queue_submit(&SubmitInfo {
            command_buffer: submit.command_buffer,
            wait_semaphores: &[],
            wait_stages: &[],
            signal_semaphores: &[],
            fence: submit.fence,
        })?;
        raw.wait_for_fence(submit.fence, u64::MAX)?;
        raw.reset_fence(submit.fence)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let submit = match self.one_time.get_mut() {
            Ok(submit) => submit,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.raw.free_command_buffer(CommandBufferKind::OneTime, submit.command_buffer);
        self.raw.destroy_fence(submit.fence);
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
