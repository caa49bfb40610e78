//! GPU-backed tests on a headless device.
//!
//! Each test skips (prints and returns) when no Vulkan 1.3 device with the
//! required features is available.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;
use glam::{Vec2, Vec3, Vec4};

use ember_core::RendererConfig;
use ember_renderer::{FrameManager, FrameOutcome, FrameSettings, MAX_FRAMES_IN_FLIGHT, Renderer};
use ember_resources::{MaterialConstants, MaterialPass, MaterialPipeline, MaterialResources, Vertex};
use ember_rhi::allocator::{GpuAllocator, ImageDesc};
use ember_rhi::device::Device;
use ember_rhi::instance::{Instance, InstanceDesc};
use ember_rhi::physical_device::select_physical_device;
use ember_rhi::swapchain::{AcquiredImage, PresentSurface};
use ember_rhi::sync::Fence;
use ember_rhi::{MemoryLocation, RhiError, RhiResult};
use ember_scene::DrawContext;

fn headless_device() -> Option<Arc<Device>> {
    let instance = match Instance::new(&InstanceDesc::default()) {
        Ok(instance) => Arc::new(instance),
        Err(e) => {
            println!("Skipping test: Vulkan not available ({e})");
            return None;
        }
    };
    let info = match select_physical_device(instance.handle(), None) {
        Ok(info) => info,
        Err(e) => {
            println!("Skipping test: no suitable GPU ({e})");
            return None;
        }
    };
    match Device::new(instance, &info) {
        Ok(device) => Some(device),
        Err(e) => {
            println!("Skipping test: device creation failed ({e})");
            None
        }
    }
}

fn headless_renderer() -> Option<Renderer> {
    let device = headless_device()?;
    let config = RendererConfig {
        window_width: 64,
        window_height: 64,
        frame_descriptor_sets: 16,
        ..Default::default()
    };
    match Renderer::new(device, &config) {
        Ok(renderer) => Some(renderer),
        Err(e) => {
            println!("Skipping test: renderer creation failed ({e})");
            None
        }
    }
}

#[test]
fn test_create_destroy_restores_live_count() {
    let Some(mut renderer) = headless_renderer() else {
        return;
    };
    let before = renderer.allocator().live_count();

    let buffer = renderer
        .create_buffer(
            1024,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            "test buffer",
        )
        .unwrap();
    let image = renderer
        .create_image(&ImageDesc::new_2d(
            "test image",
            32,
            32,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
        ))
        .unwrap();
    assert_eq!(renderer.allocator().live_count(), before + 2);

    renderer.destroy_buffer(buffer).unwrap();
    renderer.destroy_image(image).unwrap();
    assert_eq!(renderer.allocator().live_count(), before);

    renderer.shutdown().unwrap();
}

#[test]
fn test_double_destroy_is_reported() {
    let Some(mut renderer) = headless_renderer() else {
        return;
    };
    let buffer = renderer
        .create_buffer(
            64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "twice",
        )
        .unwrap();
    renderer.destroy_buffer(buffer).unwrap();
    assert!(matches!(
        renderer.destroy_buffer(buffer),
        Err(RhiError::StaleHandle { kind: "buffer" })
    ));
}

#[test]
fn test_staged_image_round_trip() {
    let Some(mut renderer) = headless_renderer() else {
        return;
    };
    let before = renderer.allocator().live_count();
    let data: Vec<u8> = (0..8 * 4 * 4).map(|i| (i * 7 % 251) as u8).collect();
    let desc = ImageDesc::new_2d(
        "round trip",
        8,
        4,
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC,
    );

    let image = renderer.create_image_with_data(&data, &desc).unwrap();
    // The staging buffer is already gone.
    assert_eq!(renderer.allocator().live_count(), before + 1);

    let read = renderer.read_image(image).unwrap();
    assert_eq!(read, data);

    renderer.destroy_image(image).unwrap();
    assert_eq!(renderer.allocator().live_count(), before);
}

#[test]
fn test_image_upload_rejects_wrong_size() {
    let Some(mut renderer) = headless_renderer() else {
        return;
    };
    let before = renderer.allocator().live_count();
    let desc = ImageDesc::new_2d(
        "short",
        4,
        4,
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageUsageFlags::SAMPLED,
    );
    let result = renderer.create_image_with_data(&[0u8; 12], &desc);
    assert!(matches!(result, Err(RhiError::InvalidArgument(_))));
    assert_eq!(renderer.allocator().live_count(), before);
}

#[test]
fn test_depth_upload_and_readback_rejected() {
    let Some(mut renderer) = headless_renderer() else {
        return;
    };
    let before = renderer.allocator().live_count();
    let desc = ImageDesc::new_2d(
        "depth upload",
        4,
        4,
        vk::Format::D32_SFLOAT,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
    );
    let result = renderer.create_image_with_data(&[0u8; 4 * 4 * 4], &desc);
    assert!(matches!(result, Err(RhiError::InvalidArgument(_))));
    assert_eq!(renderer.allocator().live_count(), before);

    let depth = renderer.create_image(&desc).unwrap();
    assert!(matches!(renderer.read_image(depth), Err(RhiError::InvalidArgument(_))));
    renderer.destroy_image(depth).unwrap();
    assert_eq!(renderer.allocator().live_count(), before);
}

#[test]
fn test_immediate_submit_is_reusable() {
    let Some(mut renderer) = headless_renderer() else {
        return;
    };
    for _ in 0..3 {
        renderer.immediate_submit(|_cmd| {}).unwrap();
    }
}

#[test]
fn test_unsignalled_fence_times_out() {
    let Some(renderer) = headless_renderer() else {
        return;
    };
    let fence = Fence::new(renderer.device().clone(), false).unwrap();
    let err = fence.wait(1_000).unwrap_err();
    assert!(matches!(err, RhiError::FenceTimeout { timeout_ns: 1_000 }));
    assert!(err.is_fatal());
}

#[test]
fn test_upload_mesh_and_destroy() {
    let Some(mut renderer) = headless_renderer() else {
        return;
    };
    let before = renderer.allocator().live_count();
    let vertices = [
        Vertex::new(Vec3::ZERO, Vec3::Z, Vec2::ZERO, Vec4::ONE),
        Vertex::new(Vec3::X, Vec3::Z, Vec2::X, Vec4::ONE),
        Vertex::new(Vec3::Y, Vec3::Z, Vec2::Y, Vec4::ONE),
    ];
    let mesh = renderer.upload_mesh(&[0, 1, 2], &vertices).unwrap();
    assert_eq!(mesh.index_count, 3);
    assert_ne!(mesh.vertex_buffer_address, 0);
    assert_eq!(renderer.allocator().live_count(), before + 2);

    renderer.destroy_buffer(mesh.index_buffer).unwrap();
    renderer.destroy_buffer(mesh.vertex_buffer).unwrap();
    assert_eq!(renderer.allocator().live_count(), before);
}

#[test]
fn test_queued_teardown_runs_at_shutdown() {
    let Some(mut renderer) = headless_renderer() else {
        return;
    };
    let vertices = [Vertex::default(); 3];
    let mesh = renderer.upload_mesh(&[0, 1, 2], &vertices).unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    renderer.push_function(move |allocator| {
        mesh.destroy(allocator).unwrap();
        flag.store(true, Ordering::SeqCst);
    });
    assert!(!ran.load(Ordering::SeqCst));

    renderer.shutdown().unwrap();
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(renderer.allocator().live_count(), 0);
    // A second shutdown is a no-op.
    renderer.shutdown().unwrap();
}

#[test]
fn test_upload_mesh_rejects_empty_input() {
    let Some(mut renderer) = headless_renderer() else {
        return;
    };
    assert!(matches!(
        renderer.upload_mesh(&[], &[Vertex::default()]),
        Err(RhiError::InvalidArgument(_))
    ));
}

#[test]
fn test_write_material_twice_gives_distinct_sets() {
    let Some(mut renderer) = headless_renderer() else {
        return;
    };
    renderer.materials_mut().register_pipeline(
        MaterialPass::Opaque,
        MaterialPipeline {
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
        },
    );

    let constants = renderer
        .create_buffer(
            std::mem::size_of::<MaterialConstants>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            "material constants",
        )
        .unwrap();
    let defaults = *renderer.defaults();
    let white = renderer.allocator().image(defaults.white).unwrap().view();
    let resources = MaterialResources {
        color_image: white,
        color_sampler: defaults.linear_sampler,
        metal_rough_image: white,
        metal_rough_sampler: defaults.linear_sampler,
        data_buffer: renderer.allocator().buffer(constants).unwrap().handle(),
        data_buffer_offset: 0,
    };

    let a = renderer.write_material(MaterialPass::Opaque, &resources).unwrap();
    let b = renderer.write_material(MaterialPass::Opaque, &resources).unwrap();
    assert_ne!(a.material_set, b.material_set);
    assert_ne!(a, b);
    assert_eq!(a.pass, MaterialPass::Opaque);
    assert_eq!(a.pipeline, b.pipeline);

    assert!(matches!(
        renderer.write_material(MaterialPass::Transparent, &resources),
        Err(RhiError::InvalidArgument(_))
    ));

    renderer.destroy_buffer(constants).unwrap();
}

/// A surface that is always out of date.
struct StaleSurface {
    acquires: u32,
    resized_to: Option<vk::Extent2D>,
}

impl PresentSurface for StaleSurface {
    fn acquire_next_image(&mut self, _timeout_ns: u64, _signal: vk::Semaphore) -> RhiResult<AcquiredImage> {
        self.acquires += 1;
        Ok(AcquiredImage::Stale)
    }

    fn present(&mut self, _image_index: u32, _wait: vk::Semaphore) -> RhiResult<bool> {
        panic!("nothing should be presented to a stale surface");
    }

    fn resize(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        self.resized_to = Some(extent);
        Ok(())
    }

    fn image(&self, _index: u32) -> vk::Image {
        vk::Image::null()
    }

    fn image_view(&self, _index: u32) -> vk::ImageView {
        vk::ImageView::null()
    }

    fn extent(&self) -> vk::Extent2D {
        vk::Extent2D { width: 64, height: 64 }
    }

    fn format(&self) -> vk::Format {
        vk::Format::B8G8R8A8_UNORM
    }
}

#[test]
fn test_stale_surface_skips_frames_but_advances() {
    let Some(mut renderer) = headless_renderer() else {
        return;
    };
    let mut surface = StaleSurface {
        acquires: 0,
        resized_to: None,
    };
    let ctx = DrawContext::new();

    // More ticks than slots: a stale acquire must leave each fence signalled
    // or the second lap would time out.
    for tick in 0..5u64 {
        assert_eq!(renderer.frame_number(), tick);
        let outcome = renderer.draw(&mut surface, &ctx, None).unwrap();
        assert_eq!(outcome, FrameOutcome::Skipped);
        assert!(renderer.resize_requested());
    }
    assert_eq!(surface.acquires, 5);
    assert_eq!(renderer.frame_number(), 5);

    let extent = vk::Extent2D { width: 80, height: 60 };
    renderer.handle_resize(&mut surface, extent).unwrap();
    assert_eq!(surface.resized_to, Some(extent));
    assert!(!renderer.resize_requested());
}

/// An off-screen present target: one allocator-owned image, with acquire and
/// present reduced to empty submissions that signal and consume the frame
/// semaphores.
struct HeadlessTarget {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    acquires: u32,
    presents: u32,
}

impl HeadlessTarget {
    const EXTENT: vk::Extent2D = vk::Extent2D { width: 64, height: 64 };
    const FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

    fn desc() -> ImageDesc<'static> {
        ImageDesc::new_2d(
            "headless target",
            Self::EXTENT.width,
            Self::EXTENT.height,
            Self::FORMAT,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::COLOR_ATTACHMENT,
        )
    }

    fn submit_empty(&self, wait: &[vk::SemaphoreSubmitInfo<'_>], signal: &[vk::SemaphoreSubmitInfo<'_>]) -> RhiResult<()> {
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(wait)
            .signal_semaphore_infos(signal);
        unsafe { self.device.submit_graphics(std::slice::from_ref(&submit), vk::Fence::null()) }
    }
}

fn semaphore_info(semaphore: vk::Semaphore) -> vk::SemaphoreSubmitInfo<'static> {
    vk::SemaphoreSubmitInfo::default()
        .semaphore(semaphore)
        .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
}

impl PresentSurface for HeadlessTarget {
    fn acquire_next_image(&mut self, _timeout_ns: u64, signal: vk::Semaphore) -> RhiResult<AcquiredImage> {
        self.submit_empty(&[], &[semaphore_info(signal)])?;
        self.acquires += 1;
        Ok(AcquiredImage::Ready {
            index: 0,
            suboptimal: false,
        })
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> RhiResult<bool> {
        assert_eq!(image_index, 0);
        self.submit_empty(&[semaphore_info(wait)], &[])?;
        self.presents += 1;
        Ok(false)
    }

    fn resize(&mut self, _extent: vk::Extent2D) -> RhiResult<()> {
        Ok(())
    }

    fn image(&self, _index: u32) -> vk::Image {
        self.image
    }

    fn image_view(&self, _index: u32) -> vk::ImageView {
        self.view
    }

    fn extent(&self) -> vk::Extent2D {
        Self::EXTENT
    }

    fn format(&self) -> vk::Format {
        Self::FORMAT
    }

    fn final_layout(&self) -> vk::ImageLayout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL
    }
}

#[test]
fn test_frames_present_and_recycle_scene_buffers() {
    let Some(mut renderer) = headless_renderer() else {
        return;
    };
    let target_image = renderer.create_image(&HeadlessTarget::desc()).unwrap();
    let (image, view) = {
        let image = renderer.allocator().image(target_image).unwrap();
        (image.handle(), image.view())
    };
    let mut target = HeadlessTarget {
        device: renderer.device().clone(),
        image,
        view,
        acquires: 0,
        presents: 0,
    };
    let baseline = renderer.allocator().live_count();
    let ctx = DrawContext::new();

    // Three laps over the slots: every fence is waited on and reused, and
    // each frame's scene buffer is destroyed when its slot comes round.
    let ticks = 3 * MAX_FRAMES_IN_FLIGHT as u64;
    for tick in 0..ticks {
        assert_eq!(renderer.frame_number(), tick);
        let outcome = renderer.draw(&mut target, &ctx, None).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(renderer.frame_number(), tick + 1);
        assert_eq!(renderer.stats().draw_calls, 0);

        let live = renderer.allocator().live_count();
        assert!(live <= baseline + MAX_FRAMES_IN_FLIGHT, "tick {tick}: {live} live resources");
        if tick + 1 >= MAX_FRAMES_IN_FLIGHT as u64 {
            assert_eq!(live, baseline + MAX_FRAMES_IN_FLIGHT);
        }
    }
    assert_eq!(target.acquires as u64, ticks);
    assert_eq!(target.presents as u64, ticks);
    assert!(!renderer.resize_requested());

    renderer.device().wait_idle().unwrap();
    renderer.destroy_image(target_image).unwrap();
    renderer.shutdown().unwrap();
    assert_eq!(renderer.allocator().live_count(), 0);
}

#[test]
fn test_abandoned_frame_leaves_fence_signalled() {
    let Some(device) = headless_device() else {
        return;
    };
    let mut allocator = GpuAllocator::new(device.clone());
    let target_image = allocator.create_image(&HeadlessTarget::desc()).unwrap();
    let (image, view) = {
        let image = allocator.image(target_image).unwrap();
        (image.handle(), image.view())
    };
    let mut target = HeadlessTarget {
        device: device.clone(),
        image,
        view,
        acquires: 0,
        presents: 0,
    };
    let mut frames = FrameManager::new(
        device.clone(),
        FrameSettings {
            fence_timeout_ns: 10_000_000,
            ..Default::default()
        },
    )
    .unwrap();

    // Recording starts, then the frame is dropped before end_frame.
    let image_index = frames.begin_frame(&mut target, &mut allocator).unwrap();
    assert_eq!(image_index, Some(0));
    assert!(frames.current_frame().render_fence().is_signaled());

    device.wait_idle().unwrap();
    frames.shutdown(&mut allocator).unwrap();
    allocator.destroy_image(target_image).unwrap();
    assert_eq!(allocator.live_count(), 0);
}
