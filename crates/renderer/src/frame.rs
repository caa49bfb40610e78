//! Per-frame slots and the order they are recycled in.
//!
//! Each slot bundles everything one frame in flight needs: a command pool
//! and buffer, the acquire/render semaphores, the render fence, a deletion
//! queue and a descriptor allocator. A slot comes back around every
//! [`MAX_FRAMES_IN_FLIGHT`] frames and must not be touched until the fence
//! from its previous use has signalled.
//!
//! ```text
//! Idle ──wait fence, flush, reset descriptors──▶ Acquiring
//! Acquiring ──image ready──▶ Recording
//! Acquiring ──surface stale──▶ Idle (resize requested)
//! Recording ──reset fence, submit, present──▶ Submitted ──next use──▶ Idle
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use ember_rhi::RhiResult;
use ember_rhi::allocator::GpuAllocator;
use ember_rhi::command::{CommandBuffer, CommandPool};
use ember_rhi::deletion_queue::DeletionQueue;
use ember_rhi::descriptor::{DescriptorAllocatorGrowable, PoolSizeRatio};
use ember_rhi::device::Device;
use ember_rhi::sync::{Fence, Semaphore};

use crate::MAX_FRAMES_IN_FLIGHT;

/// Pool ratios of the per-frame descriptor allocator.
pub const FRAME_POOL_RATIOS: [PoolSizeRatio; 4] = [
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_BUFFER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4.0),
];

/// Slot used by frame number `frame_number`.
#[inline]
pub fn slot_index(frame_number: u64) -> usize {
    (frame_number % MAX_FRAMES_IN_FLIGHT as u64) as usize
}

/// Monotonic frame number.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameCounter {
    frame_number: u64,
}

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    #[inline]
    pub fn slot_index(&self) -> usize {
        slot_index(self.frame_number)
    }

    pub fn advance(&mut self) {
        self.frame_number += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
}

/// The steps that recycle a slot before it records again.
pub trait SlotLifecycle {
    /// What queued deletions run against.
    type Context;

    /// Block until the GPU work from the slot's previous use is done.
    fn wait_for_fence(&mut self, timeout_ns: u64) -> RhiResult<()>;

    fn flush_deletions(&mut self, ctx: &mut Self::Context);

    fn reset_descriptors(&mut self) -> RhiResult<()>;
}

/// Recycle `slot`: wait on its fence, then run its deferred deletions and
/// reset its descriptor pools.
///
/// Nothing is flushed or reset if the wait fails; the slot's resources may
/// still be in use and the error is fatal.
pub fn prepare_slot<S: SlotLifecycle>(slot: &mut S, ctx: &mut S::Context, timeout_ns: u64) -> RhiResult<()> {
    slot.wait_for_fence(timeout_ns)?;
    slot.flush_deletions(ctx);
    slot.reset_descriptors()
}

/// One frame in flight.
pub struct FrameSlot {
    // Declared before the pool so it is released first.
    cmd: CommandBuffer,
    _pool: CommandPool,
    swapchain_semaphore: Semaphore,
    render_semaphore: Semaphore,
    render_fence: Fence,
    deletion_queue: DeletionQueue<GpuAllocator>,
    frame_descriptors: DescriptorAllocatorGrowable,
    state: SlotState,
}

impl FrameSlot {
    pub fn new(device: Arc<Device>, descriptor_sets: u32) -> RhiResult<Self> {
        let pool = CommandPool::new(device.clone(), device.graphics_family())?;
        let cmd = pool.allocate()?;
        Ok(Self {
            cmd,
            _pool: pool,
            swapchain_semaphore: Semaphore::new(device.clone())?,
            render_semaphore: Semaphore::new(device.clone())?,
            // Signalled so the first wait on a fresh slot returns at once.
            render_fence: Fence::new(device.clone(), true)?,
            deletion_queue: DeletionQueue::new(),
            frame_descriptors: DescriptorAllocatorGrowable::new(device, descriptor_sets, &FRAME_POOL_RATIOS)?,
            state: SlotState::Idle,
        })
    }

    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.cmd
    }

    #[inline]
    pub fn swapchain_semaphore(&self) -> &Semaphore {
        &self.swapchain_semaphore
    }

    #[inline]
    pub fn render_semaphore(&self) -> &Semaphore {
        &self.render_semaphore
    }

    #[inline]
    pub fn render_fence(&self) -> &Fence {
        &self.render_fence
    }

    /// Deletions that run the next time this slot is recycled.
    pub fn deletion_queue(&mut self) -> &mut DeletionQueue<GpuAllocator> {
        &mut self.deletion_queue
    }

    /// Descriptor sets allocated here are valid until this slot is recycled.
    pub fn frame_descriptors(&mut self) -> &mut DescriptorAllocatorGrowable {
        &mut self.frame_descriptors
    }

    #[inline]
    pub fn state(&self) -> SlotState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SlotState) {
        self.state = state;
    }

    /// Run any remaining deletions and drop the descriptor pools. The slot's
    /// fence must already have signalled.
    pub(crate) fn release(&mut self, allocator: &mut GpuAllocator) {
        self.deletion_queue.flush(allocator);
        self.frame_descriptors.destroy_pools();
    }
}

impl SlotLifecycle for FrameSlot {
    type Context = GpuAllocator;

    fn wait_for_fence(&mut self, timeout_ns: u64) -> RhiResult<()> {
        self.render_fence.wait(timeout_ns)
    }

    fn flush_deletions(&mut self, ctx: &mut GpuAllocator) {
        if !self.deletion_queue.is_empty() {
            debug!("Flushing {} deferred deletion(s)", self.deletion_queue.len());
        }
        self.deletion_queue.flush(ctx);
    }

    fn reset_descriptors(&mut self) -> RhiResult<()> {
        self.frame_descriptors.clear_pools()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_rhi::RhiError;

    #[test]
    fn test_slot_rotation() {
        let mut counter = FrameCounter::new();
        let mut slots = Vec::new();
        for _ in 0..5 {
            slots.push(counter.slot_index());
            counter.advance();
        }
        assert_eq!(slots, [0, 1, 0, 1, 0]);
        assert_eq!(counter.frame_number(), 5);
    }

    #[test]
    fn test_slot_index_wraps() {
        assert_eq!(slot_index(0), 0);
        assert_eq!(slot_index(MAX_FRAMES_IN_FLIGHT as u64), 0);
        assert_eq!(slot_index(u64::MAX), (u64::MAX % MAX_FRAMES_IN_FLIGHT as u64) as usize);
    }

    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    enum Event {
        Wait(usize),
        Flush(usize),
        Reset(usize),
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    struct MockSlot {
        id: usize,
        fence_ok: bool,
        log: Log,
    }

    impl SlotLifecycle for MockSlot {
        type Context = ();

        fn wait_for_fence(&mut self, timeout_ns: u64) -> RhiResult<()> {
            self.log.borrow_mut().push(Event::Wait(self.id));
            if self.fence_ok {
                Ok(())
            } else {
                Err(RhiError::FenceTimeout { timeout_ns })
            }
        }

        fn flush_deletions(&mut self, _: &mut ()) {
            self.log.borrow_mut().push(Event::Flush(self.id));
        }

        fn reset_descriptors(&mut self) -> RhiResult<()> {
            self.log.borrow_mut().push(Event::Reset(self.id));
            Ok(())
        }
    }

    #[test]
    fn test_fence_waited_before_slot_reuse_over_many_ticks() {
        let log = Log::default();
        let mut slots: Vec<MockSlot> = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|id| MockSlot {
                id,
                fence_ok: true,
                log: log.clone(),
            })
            .collect();
        let mut counter = FrameCounter::new();
        for _ in 0..7 {
            prepare_slot(&mut slots[counter.slot_index()], &mut (), 1_000).unwrap();
            counter.advance();
        }

        let log = log.borrow();
        assert_eq!(log.len(), 21);
        for (tick, events) in log.chunks(3).enumerate() {
            let id = slot_index(tick as u64);
            assert_eq!(events, [Event::Wait(id), Event::Flush(id), Event::Reset(id)]);
        }
    }

    #[test]
    fn test_failed_wait_touches_nothing() {
        let log = Log::default();
        let mut slot = MockSlot {
            id: 0,
            fence_ok: false,
            log: log.clone(),
        };
        let err = prepare_slot(&mut slot, &mut (), 5).unwrap_err();
        assert!(matches!(err, RhiError::FenceTimeout { timeout_ns: 5 }));
        assert!(err.is_fatal());
        assert_eq!(*log.borrow(), [Event::Wait(0)]);
    }

    #[test]
    fn test_pool_ratios_cover_material_and_scene_sets() {
        let types: Vec<_> = FRAME_POOL_RATIOS.iter().map(|r| r.ty).collect();
        assert!(types.contains(&vk::DescriptorType::UNIFORM_BUFFER));
        assert!(types.contains(&vk::DescriptorType::COMBINED_IMAGE_SAMPLER));
    }
}
