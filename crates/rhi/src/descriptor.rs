//! Descriptor layouts, pools and set updates.
//!
//! - [`DescriptorLayoutBuilder`] collects bindings into a [`DescriptorSetLayout`]
//! - [`DescriptorAllocatorGrowable`] hands out sets from a list of pools and
//!   creates bigger pools when the current ones run dry
//! - [`DescriptorWriter`] batches image/buffer writes into one update call
//!
//! Each frame slot owns a growable allocator and clears it once the slot's
//! fence has signalled, so per-frame sets never need to be freed one by one.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Upper bound on sets per pool when growing.
pub const MAX_SETS_PER_POOL: u32 = 4092;

/// Descriptor set layout wrapper.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn new(device: Arc<Device>, bindings: &[vk::DescriptorSetLayoutBinding<'_>]) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };
        debug!("Created descriptor set layout with {} binding(s)", bindings.len());
        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Accumulates single-descriptor bindings, then builds a layout with one
/// shared stage mask.
#[derive(Default)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binding(mut self, binding: u32, ty: vk::DescriptorType) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1),
        );
        self
    }

    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'static>] {
        &self.bindings
    }

    pub fn build(mut self, device: Arc<Device>, stages: vk::ShaderStageFlags) -> RhiResult<DescriptorSetLayout> {
        for binding in &mut self.bindings {
            binding.stage_flags |= stages;
        }
        DescriptorSetLayout::new(device, &self.bindings)
    }
}

/// Descriptor pool. Sets allocated from it are reclaimed by [`reset`](Self::reset),
/// never individually.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    pub fn new(device: Arc<Device>, max_sets: u32, pool_sizes: &[vk::DescriptorPoolSize]) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);
        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };
        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );
        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Allocate one set, passing pool exhaustion through as the raw
    /// `vk::Result` so callers can react to it.
    pub fn allocate(&self, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet, vk::Result> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        Ok(sets[0])
    }

    /// Return every set to the pool. No set from it may still be in use by
    /// the GPU.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())?;
        }
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool (max_sets={})", self.max_sets);
    }
}

/// Share of a pool's descriptors given to one descriptor type, per set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoolSizeRatio {
    pub ty: vk::DescriptorType,
    pub ratio: f32,
}

impl PoolSizeRatio {
    pub const fn new(ty: vk::DescriptorType, ratio: f32) -> Self {
        Self { ty, ratio }
    }
}

/// Pool sizes for a pool holding `sets` descriptor sets.
pub fn pool_sizes(ratios: &[PoolSizeRatio], sets: u32) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .map(|r| vk::DescriptorPoolSize {
            ty: r.ty,
            descriptor_count: ((r.ratio * sets as f32) as u32).max(1),
        })
        .collect()
}

/// Set count for the pool created after one of `current` sets fills up.
pub fn next_sets_per_pool(current: u32) -> u32 {
    ((current as f32 * 1.5) as u32).clamp(1, MAX_SETS_PER_POOL)
}

/// Descriptor allocator that grows instead of failing.
///
/// Pools live in two lists. `allocate` takes a ready pool, and if it reports
/// `ERROR_OUT_OF_POOL_MEMORY` or `ERROR_FRAGMENTED_POOL` moves it to the
/// full list and retries on a fresh pool. Every new pool is 1.5x the
/// previous one, up to [`MAX_SETS_PER_POOL`]. `clear_pools` resets them all
/// back to ready.
pub struct DescriptorAllocatorGrowable {
    device: Arc<Device>,
    ratios: Vec<PoolSizeRatio>,
    ready_pools: Vec<DescriptorPool>,
    full_pools: Vec<DescriptorPool>,
    sets_per_pool: u32,
}

impl DescriptorAllocatorGrowable {
    pub fn new(device: Arc<Device>, initial_sets: u32, ratios: &[PoolSizeRatio]) -> RhiResult<Self> {
        if initial_sets == 0 || ratios.is_empty() {
            return Err(RhiError::InvalidArgument(
                "descriptor allocator needs a set count and at least one pool ratio".into(),
            ));
        }
        let first = DescriptorPool::new(device.clone(), initial_sets, &pool_sizes(ratios, initial_sets))?;
        Ok(Self {
            device,
            ratios: ratios.to_vec(),
            ready_pools: vec![first],
            full_pools: Vec::new(),
            sets_per_pool: next_sets_per_pool(initial_sets),
        })
    }

    /// Allocate one set with `layout`.
    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        let pool = self.take_pool()?;
        match pool.allocate(layout) {
            Ok(set) => {
                self.ready_pools.push(pool);
                Ok(set)
            }
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                self.full_pools.push(pool);
                let pool = self.take_pool()?;
                let set = pool.allocate(layout);
                self.ready_pools.push(pool);
                Ok(set?)
            }
            Err(e) => {
                self.ready_pools.push(pool);
                Err(e.into())
            }
        }
    }

    /// Reset every pool and mark them all ready. Sets handed out earlier
    /// become invalid.
    pub fn clear_pools(&mut self) -> RhiResult<()> {
        for pool in &self.ready_pools {
            pool.reset()?;
        }
        for pool in self.full_pools.drain(..) {
            pool.reset()?;
            self.ready_pools.push(pool);
        }
        Ok(())
    }

    /// Destroy every pool. The allocator can still be used afterwards and
    /// starts over with new pools.
    pub fn destroy_pools(&mut self) {
        self.ready_pools.clear();
        self.full_pools.clear();
    }

    pub fn pool_count(&self) -> usize {
        self.ready_pools.len() + self.full_pools.len()
    }

    fn take_pool(&mut self) -> RhiResult<DescriptorPool> {
        if let Some(pool) = self.ready_pools.pop() {
            return Ok(pool);
        }
        let sets = self.sets_per_pool;
        let pool = DescriptorPool::new(self.device.clone(), sets, &pool_sizes(&self.ratios, sets))?;
        self.sets_per_pool = next_sets_per_pool(sets);
        debug!("Descriptor allocator grew: new pool with {} sets", sets);
        Ok(pool)
    }
}

#[derive(Debug, Clone, Copy)]
enum PendingWrite {
    Image {
        binding: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorImageInfo,
    },
    Buffer {
        binding: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorBufferInfo,
    },
}

/// Collects descriptor writes and applies them to a set in one call.
#[derive(Debug, Default)]
pub struct DescriptorWriter {
    writes: Vec<PendingWrite>,
}

impl DescriptorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_image(
        &mut self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
        ty: vk::DescriptorType,
    ) -> &mut Self {
        let info = vk::DescriptorImageInfo::default()
            .image_view(view)
            .sampler(sampler)
            .image_layout(layout);
        self.writes.push(PendingWrite::Image { binding, ty, info });
        self
    }

    pub fn write_buffer(
        &mut self,
        binding: u32,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
        ty: vk::DescriptorType,
    ) -> &mut Self {
        let info = vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(offset)
            .range(size);
        self.writes.push(PendingWrite::Buffer { binding, ty, info });
        self
    }

    pub fn clear(&mut self) {
        self.writes.clear();
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Apply every pending write to `set`. Pending writes are kept, so the
    /// same writer can fill several sets.
    pub fn update_set(&self, device: &Device, set: vk::DescriptorSet) {
        let writes: Vec<vk::WriteDescriptorSet<'_>> = self
            .writes
            .iter()
            .map(|write| match write {
                PendingWrite::Image { binding, ty, info } => vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty)
                    .image_info(std::slice::from_ref(info)),
                PendingWrite::Buffer { binding, ty, info } => vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty)
                    .buffer_info(std::slice::from_ref(info)),
            })
            .collect();

        unsafe { device.handle().update_descriptor_sets(&writes, &[]) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_sizes_follow_ratios() {
        let ratios = [
            PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 3.0),
            PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 0.5),
        ];
        let sizes = pool_sizes(&ratios, 10);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(sizes[0].descriptor_count, 30);
        assert_eq!(sizes[1].descriptor_count, 5);
    }

    #[test]
    fn test_pool_sizes_never_zero() {
        let ratios = [PoolSizeRatio::new(vk::DescriptorType::SAMPLER, 0.01)];
        assert_eq!(pool_sizes(&ratios, 4)[0].descriptor_count, 1);
    }

    #[test]
    fn test_pool_growth_is_capped() {
        assert_eq!(next_sets_per_pool(1000), 1500);
        assert_eq!(next_sets_per_pool(1500), 2250);
        assert_eq!(next_sets_per_pool(3000), MAX_SETS_PER_POOL);
        assert_eq!(next_sets_per_pool(MAX_SETS_PER_POOL), MAX_SETS_PER_POOL);
        assert_eq!(next_sets_per_pool(0), 1);
    }

    #[test]
    fn test_layout_builder_collects_bindings() {
        let builder = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(bindings[0].descriptor_count, 1);
    }

    #[test]
    fn test_writer_accumulates_and_clears() {
        let mut writer = DescriptorWriter::new();
        writer
            .write_buffer(0, vk::Buffer::null(), 256, 0, vk::DescriptorType::UNIFORM_BUFFER)
            .write_image(
                1,
                vk::ImageView::null(),
                vk::Sampler::null(),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            );
        assert_eq!(writer.len(), 2);
        assert!(matches!(
            writer.writes[0],
            PendingWrite::Buffer { binding: 0, info, .. } if info.range == 256
        ));
        writer.clear();
        assert!(writer.is_empty());
    }
}
