//! Blocking one-shot submissions for uploads and one-time transitions.

use std::sync::Arc;

use ash::vk;
use tracing::trace;

use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::RhiResult;
use crate::sync::Fence;

/// Owns a dedicated pool, command buffer and fence, separate from every
/// frame slot so uploads never contend with frame recording.
///
/// `submit` takes `&mut self`: only one immediate submission can be in
/// flight, and callers that upload from several places serialize through
/// the same submitter.
pub struct ImmediateSubmitter {
    device: Arc<Device>,
    // Declared before the pool so it is released first.
    cmd: CommandBuffer,
    _pool: CommandPool,
    fence: Fence,
    timeout_ns: u64,
}

impl ImmediateSubmitter {
    pub fn new(device: Arc<Device>, timeout_ns: u64) -> RhiResult<Self> {
        let pool = CommandPool::new(device.clone(), device.graphics_family())?;
        let cmd = pool.allocate()?;
        let fence = Fence::new(device.clone(), false)?;
        Ok(Self {
            device,
            cmd,
            _pool: pool,
            fence,
            timeout_ns,
        })
    }

    /// Record `record` once, submit it to the graphics queue and block until
    /// the GPU finishes. The fence is reset before returning so the next call
    /// starts clean.
    ///
    /// # Errors
    ///
    /// Recording or submission failures, and [`crate::RhiError::FenceTimeout`]
    /// or [`crate::RhiError::DeviceLost`] from the wait. After a wait error
    /// the submitter should not be reused.
    pub fn submit<F>(&mut self, record: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer),
    {
        self.cmd.reset()?;
        self.cmd.begin()?;
        record(&self.cmd);
        self.cmd.end()?;

        let cmd_info = [self.cmd.submit_info()];
        let submit = vk::SubmitInfo2::default().command_buffer_infos(&cmd_info);
        unsafe {
            self.device
                .submit_graphics(std::slice::from_ref(&submit), self.fence.handle())?;
        }

        self.fence.wait(self.timeout_ns)?;
        self.fence.reset()?;
        trace!("Immediate submission completed");
        Ok(())
    }
}
