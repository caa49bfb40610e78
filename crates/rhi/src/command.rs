//! Command pools and command buffers.
//!
//! [`CommandBuffer`] is a thin recording wrapper; every method maps to one
//! `vkCmd*` call except [`CommandBuffer::transition_image`] and
//! [`CommandBuffer::blit_full`], which build the synchronization2 barrier and
//! blit region the renderer uses everywhere.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Command pool bound to one queue family.
///
/// Created with `RESET_COMMAND_BUFFER` so individual buffers can be
/// re-recorded each time their frame slot comes around.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
}

impl CommandPool {
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };
        debug!("Command pool created for queue family {}", queue_family_index);
        Ok(Self { device, pool })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocate one primary command buffer. It is freed with the pool.
    pub fn allocate(&self) -> RhiResult<CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        Ok(CommandBuffer {
            device: self.device.clone(),
            buffer: buffers[0],
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!("Command pool destroyed");
    }
}

/// Primary command buffer owned by a [`CommandPool`].
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Submit info referencing this buffer, for `vkQueueSubmit2`.
    pub fn submit_info(&self) -> vk::CommandBufferSubmitInfo<'static> {
        vk::CommandBufferSubmitInfo::default()
            .command_buffer(self.buffer)
            .device_mask(0)
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begin a one-time-submit recording.
    pub fn begin(&self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        Ok(())
    }

    pub fn end(&self) -> RhiResult<()> {
        unsafe { self.device.handle().end_command_buffer(self.buffer)? };
        Ok(())
    }

    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    // =========================================================================
    // Dynamic Rendering
    // =========================================================================

    pub fn begin_rendering(&self, rendering_info: &vk::RenderingInfo<'_>) {
        unsafe {
            self.device
                .handle()
                .cmd_begin_rendering(self.buffer, rendering_info);
        }
    }

    pub fn end_rendering(&self) {
        unsafe { self.device.handle().cmd_end_rendering(self.buffer) };
    }

    // =========================================================================
    // Binding
    // =========================================================================

    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_pipeline(self.buffer, bind_point, pipeline);
        }
    }

    pub fn bind_index_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_index_buffer(self.buffer, buffer, offset, index_type);
        }
    }

    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                bind_point,
                layout,
                first_set,
                sets,
                &[],
            );
        }
    }

    pub fn push_constants(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        bytes: &[u8],
    ) {
        unsafe {
            self.device
                .handle()
                .cmd_push_constants(self.buffer, layout, stages, offset, bytes);
        }
    }

    // =========================================================================
    // Dynamic State
    // =========================================================================

    pub fn set_viewport(&self, viewport: vk::Viewport) {
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, std::slice::from_ref(&viewport));
        }
    }

    pub fn set_scissor(&self, scissor: vk::Rect2D) {
        unsafe {
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, std::slice::from_ref(&scissor));
        }
    }

    // =========================================================================
    // Draw / Dispatch
    // =========================================================================

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.handle().cmd_draw_indexed(
                self.buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    pub fn dispatch(&self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        unsafe {
            self.device
                .handle()
                .cmd_dispatch(self.buffer, group_count_x, group_count_y, group_count_z);
        }
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    /// Move a whole image from `old_layout` to `new_layout`.
    ///
    /// Uses an all-commands barrier. Coarse, but the renderer only transitions
    /// a handful of images per frame.
    pub fn transition_image(&self, image: vk::Image, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) {
        let aspect = if new_layout == vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };

        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .image(image)
            .subresource_range(full_subresource_range(aspect));

        let dependency = vk::DependencyInfo::default()
            .image_memory_barriers(std::slice::from_ref(&barrier));
        unsafe {
            self.device
                .handle()
                .cmd_pipeline_barrier2(self.buffer, &dependency);
        }
    }

    // =========================================================================
    // Transfer
    // =========================================================================

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.buffer, src, dst, regions);
        }
    }

    /// Copy tightly packed texels into mip 0 of a color image in
    /// `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(&self, src: vk::Buffer, dst: vk::Image, extent: vk::Extent3D) {
        let region = color_copy_region(extent);
        unsafe {
            self.device.handle().cmd_copy_buffer_to_image(
                self.buffer,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    /// Copy mip 0 of a color image in `TRANSFER_SRC_OPTIMAL` into `dst`.
    pub fn copy_image_to_buffer(&self, src: vk::Image, dst: vk::Buffer, extent: vk::Extent3D) {
        let region = color_copy_region(extent);
        unsafe {
            self.device.handle().cmd_copy_image_to_buffer(
                self.buffer,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                &[region],
            );
        }
    }

    /// Scaled copy of a whole color image, source in `TRANSFER_SRC_OPTIMAL`
    /// and destination in `TRANSFER_DST_OPTIMAL`.
    pub fn blit_full(&self, src: vk::Image, dst: vk::Image, src_size: vk::Extent2D, dst_size: vk::Extent2D) {
        let layers = mip_layers(0);
        let region = vk::ImageBlit2::default()
            .src_offsets([vk::Offset3D::default(), corner(src_size)])
            .dst_offsets([vk::Offset3D::default(), corner(dst_size)])
            .src_subresource(layers)
            .dst_subresource(layers);

        let blit = vk::BlitImageInfo2::default()
            .src_image(src)
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(dst)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .filter(vk::Filter::LINEAR)
            .regions(std::slice::from_ref(&region));

        unsafe { self.device.handle().cmd_blit_image2(self.buffer, &blit) };
    }

    /// Fill mips 1.. of a color image from mip 0 by successive half-size
    /// blits. Every level must start in `TRANSFER_DST_OPTIMAL`; the whole
    /// image ends in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn generate_mipmaps(&self, image: vk::Image, extent: vk::Extent2D, mip_levels: u32) {
        let mut size = extent;
        for mip in 0..mip_levels {
            self.mip_barrier(
                image,
                mip,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            );

            if mip + 1 < mip_levels {
                let half = vk::Extent2D {
                    width: (size.width / 2).max(1),
                    height: (size.height / 2).max(1),
                };
                let region = vk::ImageBlit2::default()
                    .src_offsets([vk::Offset3D::default(), corner(size)])
                    .dst_offsets([vk::Offset3D::default(), corner(half)])
                    .src_subresource(mip_layers(mip))
                    .dst_subresource(mip_layers(mip + 1));
                let blit = vk::BlitImageInfo2::default()
                    .src_image(image)
                    .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                    .dst_image(image)
                    .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .filter(vk::Filter::LINEAR)
                    .regions(std::slice::from_ref(&region));
                unsafe { self.device.handle().cmd_blit_image2(self.buffer, &blit) };
                size = half;
            }
        }

        self.transition_image(
            image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
    }

    fn mip_barrier(&self, image: vk::Image, mip: u32, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) {
        let range = full_subresource_range(vk::ImageAspectFlags::COLOR)
            .base_mip_level(mip)
            .level_count(1);
        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .image(image)
            .subresource_range(range);
        let dependency = vk::DependencyInfo::default()
            .image_memory_barriers(std::slice::from_ref(&barrier));
        unsafe {
            self.device
                .handle()
                .cmd_pipeline_barrier2(self.buffer, &dependency);
        }
    }

    pub fn clear_color_image(&self, image: vk::Image, layout: vk::ImageLayout, color: [f32; 4]) {
        let clear = vk::ClearColorValue { float32: color };
        let range = full_subresource_range(vk::ImageAspectFlags::COLOR);
        unsafe {
            self.device
                .handle()
                .cmd_clear_color_image(self.buffer, image, layout, &clear, &[range]);
        }
    }
}

/// Every mip level and array layer of `aspect`.
pub fn full_subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(vk::REMAINING_MIP_LEVELS)
        .base_array_layer(0)
        .layer_count(vk::REMAINING_ARRAY_LAYERS)
}

fn color_copy_region(extent: vk::Extent3D) -> vk::BufferImageCopy {
    vk::BufferImageCopy::default()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(mip_layers(0))
        .image_extent(extent)
}

fn mip_layers(mip: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(mip)
        .base_array_layer(0)
        .layer_count(1)
}

fn corner(size: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: size.width as i32,
        y: size.height as i32,
        z: 1,
    }
}
