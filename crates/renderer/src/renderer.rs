//! The renderer context.
//!
//! [`Renderer`] is the one object the rest of the engine talks to. It owns
//! the GPU allocator, the immediate submitter, the frame slots, the
//! process-wide deletion queue and the off-screen targets, and exposes
//! them to collaborators through explicit methods instead of global state.
//!
//! # Frame layout
//!
//! ```text
//! draw image  ── background effect (compute) or clear
//!             ── geometry (opaque, then transparent) with depth
//!             ── blit ──▶ surface image ── overlay ──▶ present
//! ```
//!
//! # Shutdown order
//!
//! 1. Wait for the device to go idle
//! 2. Flush every frame slot's deletion queue
//! 3. Flush the process-wide deletion queue
//! 4. Release material and descriptor resources
//! 5. Destroy anything the allocator still holds, reporting it as leaked

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use tracing::{debug, error, info, warn};

use ember_core::RendererConfig;
use ember_resources::{GpuDrawPushConstants, GpuMeshBuffers, GpuSceneData, MaterialInstance, MaterialPass, MaterialResources, Vertex};
use ember_rhi::allocator::{BufferHandle, GpuAllocator, ImageDesc, ImageHandle};
use ember_rhi::command::CommandBuffer;
use ember_rhi::deletion_queue::DeletionQueue;
use ember_rhi::descriptor::{DescriptorAllocatorGrowable, DescriptorLayoutBuilder, DescriptorSetLayout, DescriptorWriter, PoolSizeRatio};
use ember_rhi::device::Device;
use ember_rhi::immediate::ImmediateSubmitter;
use ember_rhi::swapchain::PresentSurface;
use ember_rhi::{MemoryLocation, RhiError, RhiResult};
use ember_scene::DrawContext;

use crate::bind_state::BindState;
use crate::defaults::DefaultTextures;
use crate::effects::BackgroundEffects;
use crate::frame::FrameSlot;
use crate::frame_manager::{FrameManager, FrameSettings};
use crate::material::MaterialRegistry;
use crate::stats::FrameStats;
use crate::upload;

/// HDR color target every frame is drawn into.
pub const DRAW_IMAGE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const DEPTH_IMAGE_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

const GLOBAL_POOL_RATIOS: [PoolSizeRatio; 3] = [
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 1.0),
    PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 3.0),
];
const GLOBAL_DESCRIPTOR_SETS: u32 = 10;

/// Records UI or other overlays straight onto the surface image after the
/// scene has been blitted there.
pub trait OverlayRenderer {
    /// `target` is in `COLOR_ATTACHMENT_OPTIMAL` and must be left there.
    fn record(&mut self, cmd: &CommandBuffer, target: vk::ImageView, extent: vk::Extent2D);
}

/// What happened to a call to [`Renderer::draw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The surface was stale on acquire; nothing was drawn and a resize is
    /// pending.
    Skipped,
}

/// Extent actually rendered: the smaller of the surface and the draw image,
/// scaled by `render_scale`.
pub fn draw_extent(surface: vk::Extent2D, draw_image: vk::Extent2D, render_scale: f32) -> vk::Extent2D {
    let scale = render_scale.clamp(0.1, 1.0);
    let scaled = |a: u32, b: u32| ((a.min(b) as f32 * scale) as u32).max(1);
    vk::Extent2D {
        width: scaled(surface.width, draw_image.width),
        height: scaled(surface.height, draw_image.height),
    }
}

pub struct Renderer {
    device: Arc<Device>,
    allocator: GpuAllocator,
    immediate: ImmediateSubmitter,
    frames: FrameManager,
    main_deletion_queue: DeletionQueue<GpuAllocator>,
    global_descriptors: DescriptorAllocatorGrowable,
    writer: DescriptorWriter,

    draw_image: ImageHandle,
    depth_image: ImageHandle,
    draw_image_layout: DescriptorSetLayout,
    draw_image_set: vk::DescriptorSet,
    scene_data_layout: DescriptorSetLayout,

    materials: MaterialRegistry,
    defaults: DefaultTextures,
    effects: BackgroundEffects,

    scene_data: GpuSceneData,
    stats: FrameStats,
    render_scale: f32,
    clear_color: [f32; 4],
    shut_down: bool,
}

impl Renderer {
    /// Build the renderer on `device`. The off-screen targets are sized
    /// from the configured window extent and are not resized later.
    ///
    /// No surface is needed here, so a headless device works too.
    pub fn new(device: Arc<Device>, config: &RendererConfig) -> RhiResult<Self> {
        info!(
            "Initializing renderer ({}x{}, scale {})",
            config.window_width, config.window_height, config.render_scale
        );

        let mut allocator = GpuAllocator::new(device.clone());
        let mut immediate = ImmediateSubmitter::new(device.clone(), config.fence_timeout_ns)?;
        let frames = FrameManager::new(
            device.clone(),
            FrameSettings {
                fence_timeout_ns: config.fence_timeout_ns,
                acquire_timeout_ns: config.acquire_timeout_ns,
                descriptor_sets: config.frame_descriptor_sets,
            },
        )?;
        let mut main_deletion_queue = DeletionQueue::new();

        let draw_image = allocator.create_image(&ImageDesc::new_2d(
            "draw image",
            config.window_width,
            config.window_height,
            DRAW_IMAGE_FORMAT,
            vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
        ))?;
        main_deletion_queue.push_function(move |a: &mut GpuAllocator| log_failure("draw image", a.destroy_image(draw_image)));

        let depth_image = allocator.create_image(&ImageDesc::new_2d(
            "depth image",
            config.window_width,
            config.window_height,
            DEPTH_IMAGE_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        ))?;
        main_deletion_queue.push_function(move |a: &mut GpuAllocator| log_failure("depth image", a.destroy_image(depth_image)));

        let mut global_descriptors =
            DescriptorAllocatorGrowable::new(device.clone(), GLOBAL_DESCRIPTOR_SETS, &GLOBAL_POOL_RATIOS)?;

        let draw_image_layout = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::STORAGE_IMAGE)
            .build(device.clone(), vk::ShaderStageFlags::COMPUTE)?;
        let draw_image_set = global_descriptors.allocate(draw_image_layout.handle())?;
        let mut writer = DescriptorWriter::new();
        writer.write_image(
            0,
            allocator.image(draw_image)?.view(),
            vk::Sampler::null(),
            vk::ImageLayout::GENERAL,
            vk::DescriptorType::STORAGE_IMAGE,
        );
        writer.update_set(&device, draw_image_set);

        let scene_data_layout = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .build(
                device.clone(),
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )?;

        let materials = MaterialRegistry::new(device.clone())?;
        let defaults = DefaultTextures::new(&mut allocator, &mut immediate, &mut main_deletion_queue)?;

        info!("Renderer initialized");
        Ok(Self {
            device,
            allocator,
            immediate,
            frames,
            main_deletion_queue,
            global_descriptors,
            writer,
            draw_image,
            depth_image,
            draw_image_layout,
            draw_image_set,
            scene_data_layout,
            materials,
            defaults,
            effects: BackgroundEffects::new(),
            scene_data: GpuSceneData::default(),
            stats: FrameStats::default(),
            render_scale: config.render_scale.clamp(0.1, 1.0),
            clear_color: config.clear_color,
            shut_down: false,
        })
    }

    // =========================================================================
    // Frame
    // =========================================================================

    /// Draw one frame of `ctx` to `surface`.
    ///
    /// A stale surface is absorbed: the frame is skipped, the frame number
    /// still advances and [`resize_requested`](Self::resize_requested) turns
    /// on. Every error returned here is fatal; call
    /// [`shutdown`](Self::shutdown) and stop.
    pub fn draw(
        &mut self,
        surface: &mut dyn PresentSurface,
        ctx: &DrawContext<'_>,
        overlay: Option<&mut dyn OverlayRenderer>,
    ) -> RhiResult<FrameOutcome> {
        let Some(image_index) = self.frames.begin_frame(surface, &mut self.allocator)? else {
            return Ok(FrameOutcome::Skipped);
        };
        self.stats.reset();

        let (draw_vk, draw_view, draw_size) = {
            let image = self.allocator.image(self.draw_image)?;
            (image.handle(), image.view(), image.extent_2d())
        };
        let (depth_vk, depth_view) = {
            let image = self.allocator.image(self.depth_image)?;
            (image.handle(), image.view())
        };
        let surface_extent = surface.extent();
        let extent = draw_extent(surface_extent, draw_size, self.render_scale);

        let scene_set = self.write_scene_data()?;

        let slot = self.frames.current_frame();
        let cmd = slot.command_buffer();

        cmd.transition_image(draw_vk, vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL);
        match self.effects.current() {
            Some(effect) => effect.record(cmd, self.draw_image_set, extent),
            None => cmd.clear_color_image(draw_vk, vk::ImageLayout::GENERAL, self.clear_color),
        }

        cmd.transition_image(draw_vk, vk::ImageLayout::GENERAL, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        cmd.transition_image(
            depth_vk,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        );

        let started = Instant::now();
        record_geometry(
            cmd,
            ctx,
            GeometryTargets {
                color: draw_view,
                depth: depth_view,
                extent,
                scene_set,
            },
            &mut self.stats,
        );
        self.stats.geometry_time = started.elapsed();

        let swap_image = surface.image(image_index);
        let final_layout = surface.final_layout();
        cmd.transition_image(
            draw_vk,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        cmd.transition_image(swap_image, vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        cmd.blit_full(draw_vk, swap_image, extent, surface_extent);

        match overlay {
            Some(overlay) => {
                cmd.transition_image(
                    swap_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                );
                overlay.record(cmd, surface.image_view(image_index), surface_extent);
                cmd.transition_image(swap_image, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, final_layout);
            }
            None => cmd.transition_image(swap_image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, final_layout),
        }

        self.frames.end_frame(surface, image_index)?;
        Ok(FrameOutcome::Presented)
    }

    /// Upload this frame's scene uniforms into a buffer that lives until the
    /// slot comes around again, and point a frame-scoped set at it.
    fn write_scene_data(&mut self) -> RhiResult<vk::DescriptorSet> {
        let size = std::mem::size_of::<GpuSceneData>() as vk::DeviceSize;
        let handle = self.allocator.create_buffer(
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            "scene data",
        )?;
        let slot = self.frames.current_frame_mut();
        slot.deletion_queue()
            .push_function(move |a: &mut GpuAllocator| log_failure("scene data buffer", a.destroy_buffer(handle)));

        let buffer = self.allocator.buffer(handle)?;
        buffer.write(0, bytemuck::bytes_of(&self.scene_data))?;

        let set = slot.frame_descriptors().allocate(self.scene_data_layout.handle())?;
        self.writer.clear();
        self.writer
            .write_buffer(0, buffer.handle(), size, 0, vk::DescriptorType::UNIFORM_BUFFER);
        self.writer.update_set(&self.device, set);
        Ok(set)
    }

    /// Rebuild `surface` for `extent` and clear the resize request. Zero
    /// extents (minimized windows) leave the request pending.
    pub fn handle_resize(&mut self, surface: &mut dyn PresentSurface, extent: vk::Extent2D) -> RhiResult<()> {
        if extent.width == 0 || extent.height == 0 {
            debug!("Ignoring resize to zero dimensions");
            return Ok(());
        }
        self.device.wait_idle()?;
        surface.resize(extent)?;
        self.frames.clear_resize_request();
        info!("Surface resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    #[inline]
    pub fn resize_requested(&self) -> bool {
        self.frames.resize_requested()
    }

    pub fn request_resize(&mut self) {
        self.frames.request_resize();
    }

    /// Slot the next or current frame records into.
    #[inline]
    pub fn get_current_frame(&self) -> &FrameSlot {
        self.frames.current_frame()
    }

    pub fn current_frame_mut(&mut self) -> &mut FrameSlot {
        self.frames.current_frame_mut()
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frames.frame_number()
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn scene_data_mut(&mut self) -> &mut GpuSceneData {
        &mut self.scene_data
    }

    pub fn set_render_scale(&mut self, scale: f32) {
        self.render_scale = scale.clamp(0.1, 1.0);
    }

    pub fn render_scale(&self) -> f32 {
        self.render_scale
    }

    // =========================================================================
    // Resources
    // =========================================================================

    pub fn allocator(&self) -> &GpuAllocator {
        &self.allocator
    }

    pub fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> RhiResult<BufferHandle> {
        self.allocator.create_buffer(size, usage, location, name)
    }

    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> RhiResult<()> {
        self.allocator.destroy_buffer(handle)
    }

    pub fn create_image(&mut self, desc: &ImageDesc<'_>) -> RhiResult<ImageHandle> {
        self.allocator.create_image(desc)
    }

    /// Create an image and upload `data` into it. Blocks until the copy is
    /// done.
    pub fn create_image_with_data(&mut self, data: &[u8], desc: &ImageDesc<'_>) -> RhiResult<ImageHandle> {
        self.allocator.create_image_with_data(&mut self.immediate, data, desc)
    }

    /// Read mip 0 of a `TRANSFER_SRC` image back to the host. Blocks.
    pub fn read_image(&mut self, handle: ImageHandle) -> RhiResult<Vec<u8>> {
        self.allocator.read_image(&mut self.immediate, handle)
    }

    pub fn destroy_image(&mut self, handle: ImageHandle) -> RhiResult<()> {
        self.allocator.destroy_image(handle)
    }

    /// Upload a mesh into device-local buffers. Blocks. The caller owns the
    /// result and gives it back with [`GpuMeshBuffers::destroy`] or through a
    /// deletion queue.
    pub fn upload_mesh(&mut self, indices: &[u32], vertices: &[Vertex]) -> RhiResult<GpuMeshBuffers> {
        upload::upload_mesh(&mut self.allocator, &mut self.immediate, indices, vertices)
    }

    /// Record and run a one-off command sequence, blocking until the GPU is
    /// done with it.
    pub fn immediate_submit<F>(&mut self, record: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer),
    {
        self.immediate.submit(record)
    }

    /// Queue a teardown action for shutdown.
    pub fn push_function<F>(&mut self, action: F)
    where
        F: FnOnce(&mut GpuAllocator) + Send + 'static,
    {
        self.main_deletion_queue.push_function(action);
    }

    pub fn main_deletion_queue(&mut self) -> &mut DeletionQueue<GpuAllocator> {
        &mut self.main_deletion_queue
    }

    // =========================================================================
    // Materials and effects
    // =========================================================================

    pub fn materials(&self) -> &MaterialRegistry {
        &self.materials
    }

    pub fn materials_mut(&mut self) -> &mut MaterialRegistry {
        &mut self.materials
    }

    /// Write a material whose set lives as long as the renderer.
    pub fn write_material(&mut self, pass: MaterialPass, resources: &MaterialResources) -> RhiResult<MaterialInstance> {
        self.materials
            .write_material(pass, resources, &mut self.global_descriptors)
    }

    pub fn defaults(&self) -> &DefaultTextures {
        &self.defaults
    }

    pub fn effects(&self) -> &BackgroundEffects {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut BackgroundEffects {
        &mut self.effects
    }

    /// Layout of set 0 for background effects: the draw image as a storage
    /// image.
    pub fn draw_image_layout(&self) -> vk::DescriptorSetLayout {
        self.draw_image_layout.handle()
    }

    /// Layout of set 0 for mesh pipelines: [`GpuSceneData`].
    pub fn scene_data_layout(&self) -> vk::DescriptorSetLayout {
        self.scene_data_layout.handle()
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Tear everything down in dependency order. Safe to call more than
    /// once; later calls do nothing.
    ///
    /// Every step runs even if an earlier one failed, so cleanup is as
    /// complete as the device allows. The first error is returned.
    pub fn shutdown(&mut self) -> RhiResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        info!("Shutting down renderer");

        let mut first_error: Option<RhiError> = None;
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during shutdown: {}", e);
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.frames.shutdown(&mut self.allocator) {
            first_error.get_or_insert(e);
        }
        self.main_deletion_queue.flush(&mut self.allocator);
        self.materials.clear_resources();
        self.global_descriptors.destroy_pools();

        let leaked = self.allocator.destroy_all();
        if leaked > 0 {
            warn!("{} GPU resource(s) were never destroyed", leaked);
        }
        info!("Renderer shut down");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Renderer shutdown failed: {}", e);
        }
    }
}

struct GeometryTargets {
    color: vk::ImageView,
    depth: vk::ImageView,
    extent: vk::Extent2D,
    scene_set: vk::DescriptorSet,
}

/// Draw every object of `ctx`, opaque first, skipping binds that would not
/// change anything. Depth is cleared to 0 for reverse-Z pipelines.
fn record_geometry(cmd: &CommandBuffer, ctx: &DrawContext<'_>, targets: GeometryTargets, stats: &mut FrameStats) {
    let color_attachment = vk::RenderingAttachmentInfo::default()
        .image_view(targets.color)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::LOAD)
        .store_op(vk::AttachmentStoreOp::STORE);
    let depth_attachment = vk::RenderingAttachmentInfo::default()
        .image_view(targets.depth)
        .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 0.0,
                stencil: 0,
            },
        });
    let area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: targets.extent,
    };
    let rendering_info = vk::RenderingInfo::default()
        .render_area(area)
        .layer_count(1)
        .color_attachments(std::slice::from_ref(&color_attachment))
        .depth_attachment(&depth_attachment);

    cmd.begin_rendering(&rendering_info);
    cmd.set_viewport(vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: targets.extent.width as f32,
        height: targets.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    });
    cmd.set_scissor(area);

    let mut binds = BindState::new();
    for object in ctx.iter() {
        let material = object.material;
        let layout = material.pipeline.layout;
        let changes = binds.update(material, object.index_buffer);

        if changes.pipeline {
            cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, material.pipeline.pipeline);
            cmd.bind_descriptor_sets(vk::PipelineBindPoint::GRAPHICS, layout, 0, &[targets.scene_set]);
            stats.record_pipeline_bind();
        }
        if changes.material_set {
            cmd.bind_descriptor_sets(vk::PipelineBindPoint::GRAPHICS, layout, 1, &[material.material_set]);
        }
        if changes.index_buffer {
            cmd.bind_index_buffer(object.index_buffer, 0, vk::IndexType::UINT32);
        }

        let push = GpuDrawPushConstants::new(object.transform, object.vertex_buffer_address);
        cmd.push_constants(layout, vk::ShaderStageFlags::VERTEX, 0, bytemuck::bytes_of(&push));
        cmd.draw_indexed(object.index_count, 1, object.first_index, 0, 0);
        stats.record_draw(object.index_count);
    }

    cmd.end_rendering();
}

fn log_failure(what: &str, result: RhiResult<()>) {
    if let Err(e) = result {
        error!("Failed to destroy {}: {}", what, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_draw_extent_takes_smaller_side() {
        assert_eq!(draw_extent(extent(1920, 600), extent(1700, 900), 1.0), extent(1700, 600));
    }

    #[test]
    fn test_draw_extent_applies_scale() {
        assert_eq!(draw_extent(extent(1700, 900), extent(1700, 900), 0.5), extent(850, 450));
    }

    #[test]
    fn test_draw_extent_clamps_scale_and_size() {
        assert_eq!(draw_extent(extent(100, 100), extent(100, 100), 4.0), extent(100, 100));
        assert_eq!(draw_extent(extent(5, 5), extent(100, 100), 0.0), extent(1, 1));
    }
}
