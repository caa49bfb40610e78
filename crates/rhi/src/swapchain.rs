//! Presentation: the [`PresentSurface`] seam and its swapchain implementation.
//!
//! The renderer only talks to [`PresentSurface`]. An out-of-date or
//! suboptimal surface is not an error there: acquisition returns
//! [`AcquiredImage::Stale`] and presentation returns `true`, and the renderer
//! turns either into a resize request.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::surface::Surface;

/// Outcome of asking for the next presentable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquiredImage {
    /// `suboptimal` images can still be drawn to; the surface should be
    /// rebuilt soon.
    Ready { index: u32, suboptimal: bool },
    /// The surface no longer matches the window and must be rebuilt first.
    Stale,
}

/// Presentation collaborator driven by the frame loop.
pub trait PresentSurface {
    /// Acquire the next image, signalling `signal` when it is ready for use.
    fn acquire_next_image(&mut self, timeout_ns: u64, signal: vk::Semaphore) -> RhiResult<AcquiredImage>;

    /// Queue `image_index` for presentation after `wait` signals. Returns
    /// `true` when the surface went stale and must be resized.
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> RhiResult<bool>;

    /// Rebuild for a new window extent. The device must be idle.
    fn resize(&mut self, extent: vk::Extent2D) -> RhiResult<()>;

    fn image(&self, index: u32) -> vk::Image;
    fn image_view(&self, index: u32) -> vk::ImageView;
    fn extent(&self) -> vk::Extent2D;
    fn format(&self) -> vk::Format;

    /// Layout an image must be in when handed to [`present`](Self::present).
    /// Off-screen targets without a swapchain override this.
    fn final_layout(&self) -> vk::ImageLayout {
        vk::ImageLayout::PRESENT_SRC_KHR
    }
}

/// Map a raw `vkAcquireNextImageKHR` result.
pub fn classify_acquire(result: Result<(u32, bool), vk::Result>, timeout_ns: u64) -> RhiResult<AcquiredImage> {
    match result {
        Ok((index, suboptimal)) => Ok(AcquiredImage::Ready { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquiredImage::Stale),
        Err(e @ (vk::Result::TIMEOUT | vk::Result::NOT_READY | vk::Result::ERROR_DEVICE_LOST)) => {
            Err(RhiError::from_wait(e, timeout_ns))
        }
        Err(e) => Err(e.into()),
    }
}

/// Map a raw `vkQueuePresentKHR` result to "surface is stale".
pub fn classify_present(result: Result<bool, vk::Result>) -> RhiResult<bool> {
    match result {
        Ok(suboptimal) => Ok(suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
        Err(vk::Result::ERROR_DEVICE_LOST) => Err(RhiError::DeviceLost),
        Err(e) => Err(e.into()),
    }
}

/// Prefer 8-bit BGRA UNORM in sRGB-nonlinear space; the renderer writes
/// already-encoded colors through a blit.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first().copied())
}

/// MAILBOX when offered, otherwise FIFO, which is always available.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, wanted: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: wanted.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: wanted.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

fn image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// `VkSwapchainKHR` over an owned [`Surface`].
pub struct Swapchain {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_queue: vk::Queue,
    // Destroyed after the swapchain.
    surface: Surface,
}

impl Swapchain {
    pub fn new(device: Arc<Device>, surface: Surface, extent: vk::Extent2D) -> RhiResult<Self> {
        let present_queue = device
            .present_queue()
            .ok_or_else(|| RhiError::SwapchainError("device has no present queue".into()))?;
        let loader = ash::khr::swapchain::Device::new(device.instance().handle(), device.handle());

        let mut this = Self {
            device,
            loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            extent,
            present_queue,
            surface,
        };
        this.build(extent)?;
        Ok(this)
    }

    /// (Re)create the swapchain, retiring the previous one.
    fn build(&mut self, wanted: vk::Extent2D) -> RhiResult<()> {
        let physical = self.device.physical_device();
        let surface_loader = self.surface.loader();
        let surface = self.surface.handle();

        let capabilities =
            unsafe { surface_loader.get_physical_device_surface_capabilities(physical, surface)? };
        let formats = unsafe { surface_loader.get_physical_device_surface_formats(physical, surface)? };
        let modes = unsafe { surface_loader.get_physical_device_surface_present_modes(physical, surface)? };

        let format = choose_surface_format(&formats)
            .ok_or_else(|| RhiError::SwapchainError("surface reports no formats".into()))?;
        let present_mode = choose_present_mode(&modes);
        let extent = choose_extent(&capabilities, wanted);

        let families = self.device.queue_families();
        let indices: Vec<u32> = families.unique_families();
        let sharing = if indices.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };

        let old = self.swapchain;
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count(&capabilities))
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(sharing)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);
        if sharing == vk::SharingMode::CONCURRENT {
            create_info = create_info.queue_family_indices(&indices);
        }

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None)? };

        self.destroy_views();
        if old != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old, None) };
        }
        self.swapchain = swapchain;
        self.format = format;
        self.extent = extent;
        self.images = unsafe { self.loader.get_swapchain_images(swapchain)? };

        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .subresource_range(crate::command::full_subresource_range(vk::ImageAspectFlags::COLOR));
            let view = unsafe { self.device.handle().create_image_view(&view_info, None)? };
            self.image_views.push(view);
        }

        info!(
            "Swapchain built: {}x{}, {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            format.format,
            present_mode,
            self.images.len()
        );
        Ok(())
    }

    fn destroy_views(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe { self.device.handle().destroy_image_view(view, None) };
        }
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl PresentSurface for Swapchain {
    fn acquire_next_image(&mut self, timeout_ns: u64, signal: vk::Semaphore) -> RhiResult<AcquiredImage> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, timeout_ns, signal, vk::Fence::null())
        };
        classify_acquire(result, timeout_ns)
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> RhiResult<bool> {
        let swapchains = [self.swapchain];
        let indices = [image_index];
        let waits = [wait];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);
        classify_present(unsafe { self.loader.queue_present(self.present_queue, &info) })
    }

    fn resize(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        debug!("Resizing swapchain to {}x{}", extent.width, extent.height);
        self.build(extent)
    }

    fn image(&self, index: u32) -> vk::Image {
        self.images[index as usize]
    }

    fn image_view(&self, index: u32) -> vk::ImageView {
        self.image_views[index as usize]
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn format(&self) -> vk::Format {
        self.format.format
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
        }
        info!("Swapchain destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_date_acquire_is_stale() {
        let acquired = classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR), 10).unwrap();
        assert_eq!(acquired, AcquiredImage::Stale);
    }

    #[test]
    fn test_suboptimal_acquire_is_ready() {
        let acquired = classify_acquire(Ok((2, true)), 10).unwrap();
        assert_eq!(acquired, AcquiredImage::Ready { index: 2, suboptimal: true });
    }

    #[test]
    fn test_acquire_timeout_is_fatal() {
        let err = classify_acquire(Err(vk::Result::TIMEOUT), 10).unwrap_err();
        assert!(matches!(err, RhiError::FenceTimeout { timeout_ns: 10 }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_present_results() {
        assert!(!classify_present(Ok(false)).unwrap());
        assert!(classify_present(Ok(true)).unwrap());
        assert!(classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap());
        assert!(matches!(
            classify_present(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(RhiError::DeviceLost)
        ));
    }

    #[test]
    fn test_choose_surface_format_prefers_bgra_unorm() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(choose_surface_format(&formats[..1]).unwrap().format, vk::Format::R8G8B8A8_SRGB);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_choose_present_mode() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_extent_clamps_when_surface_is_flexible() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        };
        let extent = choose_extent(&caps, vk::Extent2D {
            width: 1700,
            height: 900,
        });
        assert_eq!((extent.width, extent.height), (1024, 900));
    }
}
