//! Fallback textures and samplers available from startup.

use ash::vk;
use glam::Vec4;
use tracing::debug;

use ember_rhi::RhiResult;
use ember_rhi::allocator::{GpuAllocator, ImageDesc, ImageHandle};
use ember_rhi::deletion_queue::DeletionQueue;
use ember_rhi::immediate::ImmediateSubmitter;
use ember_rhi::sampler::Sampler;

/// Side of the error checkerboard in texels.
pub const CHECKERBOARD_SIZE: u32 = 16;

/// Pack a normalized color into one RGBA8 texel, red in the lowest byte.
pub fn pack_unorm4x8(color: Vec4) -> u32 {
    let c = (color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    (c.x as u32) | (c.y as u32) << 8 | (c.z as u32) << 16 | (c.w as u32) << 24
}

/// Square checkerboard alternating `a` and `b`, starting with `b` at the
/// origin.
pub fn checkerboard(size: u32, a: u32, b: u32) -> Vec<u32> {
    (0..size)
        .flat_map(|y| (0..size).map(move |x| if (x % 2) ^ (y % 2) == 1 { a } else { b }))
        .collect()
}

/// Handles to the default images and samplers. Their destruction is queued
/// on the deletion queue passed to [`DefaultTextures::new`].
#[derive(Debug, Clone, Copy)]
pub struct DefaultTextures {
    pub white: ImageHandle,
    pub grey: ImageHandle,
    pub black: ImageHandle,
    /// Magenta and black checkerboard for missing textures.
    pub error_checkerboard: ImageHandle,
    pub linear_sampler: vk::Sampler,
    pub nearest_sampler: vk::Sampler,
}

impl DefaultTextures {
    pub fn new(
        allocator: &mut GpuAllocator,
        submitter: &mut ImmediateSubmitter,
        deletion_queue: &mut DeletionQueue<GpuAllocator>,
    ) -> RhiResult<Self> {
        let white = solid(allocator, submitter, deletion_queue, "default white", Vec4::ONE)?;
        let grey = solid(
            allocator,
            submitter,
            deletion_queue,
            "default grey",
            Vec4::new(0.66, 0.66, 0.66, 1.0),
        )?;
        let black = solid(allocator, submitter, deletion_queue, "default black", Vec4::new(0.0, 0.0, 0.0, 1.0))?;

        let magenta = pack_unorm4x8(Vec4::new(1.0, 0.0, 1.0, 1.0));
        let pixels = checkerboard(CHECKERBOARD_SIZE, magenta, pack_unorm4x8(Vec4::W));
        let desc = texture_desc("error checkerboard", CHECKERBOARD_SIZE);
        let error_checkerboard = allocator.create_image_with_data(submitter, bytemuck::cast_slice(&pixels), &desc)?;
        deletion_queue.push_function(move |a: &mut GpuAllocator| log_destroy(a.destroy_image(error_checkerboard)));

        let linear = Sampler::new(allocator.device().clone(), vk::Filter::LINEAR)?;
        let nearest = Sampler::new(allocator.device().clone(), vk::Filter::NEAREST)?;
        let (linear_sampler, nearest_sampler) = (linear.handle(), nearest.handle());
        deletion_queue.push_function(move |_| drop((linear, nearest)));

        debug!("Default textures and samplers created");
        Ok(Self {
            white,
            grey,
            black,
            error_checkerboard,
            linear_sampler,
            nearest_sampler,
        })
    }
}

fn texture_desc(name: &str, size: u32) -> ImageDesc<'_> {
    ImageDesc::new_2d(
        name,
        size,
        size,
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageUsageFlags::SAMPLED,
    )
}

fn solid(
    allocator: &mut GpuAllocator,
    submitter: &mut ImmediateSubmitter,
    deletion_queue: &mut DeletionQueue<GpuAllocator>,
    name: &str,
    color: Vec4,
) -> RhiResult<ImageHandle> {
    let texel = pack_unorm4x8(color);
    let handle = allocator.create_image_with_data(submitter, bytemuck::bytes_of(&texel), &texture_desc(name, 1))?;
    deletion_queue.push_function(move |a: &mut GpuAllocator| log_destroy(a.destroy_image(handle)));
    Ok(handle)
}

fn log_destroy(result: RhiResult<()>) {
    if let Err(e) = result {
        tracing::error!("Failed to destroy default texture: {}", e);
    }
}
