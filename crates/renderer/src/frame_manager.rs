//! Frame orchestration.
//!
//! [`FrameManager`] owns the [`MAX_FRAMES_IN_FLIGHT`] frame slots and walks
//! the current one through a tick:
//!
//! 1. [`begin_frame`](FrameManager::begin_frame) recycles the slot (fence
//!    wait, deferred deletions, descriptor reset), acquires a surface image
//!    and starts command recording.
//! 2. The caller records into [`current_frame`](FrameManager::current_frame).
//! 3. [`end_frame`](FrameManager::end_frame) submits and presents.
//!
//! A stale surface on acquire or present is not an error. It sets
//! [`resize_requested`](FrameManager::resize_requested) and the frame
//! number still advances.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use ember_rhi::RhiResult;
use ember_rhi::allocator::GpuAllocator;
use ember_rhi::device::Device;
use ember_rhi::swapchain::{AcquiredImage, PresentSurface};

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::frame::{FrameCounter, FrameSlot, SlotState, prepare_slot};

/// Timeouts and pool sizes for the frame slots.
#[derive(Debug, Clone, Copy)]
pub struct FrameSettings {
    pub fence_timeout_ns: u64,
    pub acquire_timeout_ns: u64,
    pub descriptor_sets: u32,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            fence_timeout_ns: 1_000_000_000,
            acquire_timeout_ns: 1_000_000_000,
            descriptor_sets: 1000,
        }
    }
}

pub struct FrameManager {
    device: Arc<Device>,
    slots: Vec<FrameSlot>,
    counter: FrameCounter,
    settings: FrameSettings,
    resize_requested: bool,
}

impl FrameManager {
    pub fn new(device: Arc<Device>, settings: FrameSettings) -> RhiResult<Self> {
        let mut slots = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for i in 0..MAX_FRAMES_IN_FLIGHT {
            slots.push(FrameSlot::new(device.clone(), settings.descriptor_sets)?);
            debug!("Created frame slot {}", i);
        }
        info!("Frame manager created with {} frames in flight", MAX_FRAMES_IN_FLIGHT);

        Ok(Self {
            device,
            slots,
            counter: FrameCounter::new(),
            settings,
            resize_requested: false,
        })
    }

    /// Slot of the frame being prepared or recorded.
    #[inline]
    pub fn current_frame(&self) -> &FrameSlot {
        &self.slots[self.counter.slot_index()]
    }

    #[inline]
    pub fn current_frame_mut(&mut self) -> &mut FrameSlot {
        let index = self.counter.slot_index();
        &mut self.slots[index]
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.counter.frame_number()
    }

    #[inline]
    pub fn slot_index(&self) -> usize {
        self.counter.slot_index()
    }

    /// Set when the surface reported itself stale. Cleared by
    /// [`clear_resize_request`](Self::clear_resize_request) once the surface
    /// has been rebuilt.
    #[inline]
    pub fn resize_requested(&self) -> bool {
        self.resize_requested
    }

    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    pub fn clear_resize_request(&mut self) {
        self.resize_requested = false;
    }

    /// Recycle the current slot and acquire a surface image.
    ///
    /// Returns the acquired image index with the slot's command buffer begun,
    /// or `None` when the surface is stale. In that case the tick is over and
    /// the frame number has advanced. The slot's fence is left signalled
    /// either way; [`end_frame`](Self::end_frame) resets it right before the
    /// submit.
    ///
    /// # Errors
    ///
    /// Fence timeouts, device loss and any other acquire failure. All are
    /// fatal.
    pub fn begin_frame(
        &mut self,
        surface: &mut dyn PresentSurface,
        allocator: &mut GpuAllocator,
    ) -> RhiResult<Option<u32>> {
        let fence_timeout_ns = self.settings.fence_timeout_ns;
        let acquire_timeout_ns = self.settings.acquire_timeout_ns;
        let index = self.counter.slot_index();
        let slot = &mut self.slots[index];

        prepare_slot(slot, allocator, fence_timeout_ns)?;
        slot.set_state(SlotState::Acquiring);

        let image_index = match surface.acquire_next_image(acquire_timeout_ns, slot.swapchain_semaphore().handle())? {
            AcquiredImage::Ready { index, suboptimal } => {
                if suboptimal {
                    self.resize_requested = true;
                }
                index
            }
            AcquiredImage::Stale => {
                debug!("Surface stale on acquire, skipping frame {}", self.counter.frame_number());
                slot.set_state(SlotState::Idle);
                self.resize_requested = true;
                self.counter.advance();
                return Ok(None);
            }
        };

        let cmd = slot.command_buffer();
        cmd.reset()?;
        cmd.begin()?;
        slot.set_state(SlotState::Recording);
        Ok(Some(image_index))
    }

    /// End recording, submit the current slot and present `image_index`.
    ///
    /// The submit waits on the slot's acquire semaphore at color output and
    /// signals its render semaphore and fence; present waits on the render
    /// semaphore. The frame number advances whether or not the surface was
    /// stale.
    pub fn end_frame(&mut self, surface: &mut dyn PresentSurface, image_index: u32) -> RhiResult<()> {
        let index = self.counter.slot_index();
        let slot = &mut self.slots[index];
        let cmd = slot.command_buffer();
        cmd.end()?;

        let cmd_infos = [cmd.submit_info()];
        let wait_infos = [slot
            .swapchain_semaphore()
            .submit_info(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)];
        let signal_infos = [slot
            .render_semaphore()
            .submit_info(vk::PipelineStageFlags2::ALL_GRAPHICS)];
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos)
            .command_buffer_infos(&cmd_infos);

        // The fence stays signalled until a submit is certain to re-signal it,
        // so a frame abandoned during recording cannot stall the next wait.
        slot.render_fence().reset()?;
        unsafe {
            self.device
                .submit_graphics(std::slice::from_ref(&submit), slot.render_fence().handle())?;
        }
        slot.set_state(SlotState::Submitted);

        let stale = surface.present(image_index, slot.render_semaphore().handle())?;
        if stale {
            warn!("Surface stale on present, resize requested");
            self.resize_requested = true;
        }

        self.counter.advance();
        Ok(())
    }

    /// Wait for every slot's last submission, then run its pending deletions
    /// and release its descriptor pools.
    ///
    /// Slot fences are still waited on when an earlier one fails; the first
    /// error is returned and deletions of slots that did not finish are
    /// skipped.
    pub fn shutdown(&mut self, allocator: &mut GpuAllocator) -> RhiResult<()> {
        let mut first_error = None;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            match slot.render_fence().wait(self.settings.fence_timeout_ns) {
                Ok(()) => slot.release(allocator),
                Err(e) => {
                    warn!("Frame slot {} did not finish before shutdown: {}", i, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
