//! GPU images with a default view.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::command::full_subresource_range;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Number of mip levels in a full chain for `extent`:
/// `floor(log2(max(width, height))) + 1`.
pub fn mip_levels_for(extent: vk::Extent2D) -> u32 {
    let largest = extent.width.max(extent.height).max(1);
    largest.ilog2() + 1
}

/// Bytes per texel for the formats the renderer uploads, `None` otherwise.
pub fn texel_size(format: vk::Format) -> Option<u32> {
    match format {
        vk::Format::R8_UNORM => Some(1),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R32_SFLOAT
        | vk::Format::D32_SFLOAT => Some(4),
        vk::Format::R16G16B16A16_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Bytes per texel for a host upload or readback of `format`.
///
/// Staged copies and their barriers use the color aspect, so depth formats
/// are refused along with formats that have no fixed texel size.
pub fn transfer_texel_size(format: vk::Format) -> RhiResult<u32> {
    if is_depth_format(format) {
        return Err(RhiError::InvalidArgument(format!(
            "host transfers of depth format {format:?} are not supported"
        )));
    }
    texel_size(format)
        .ok_or_else(|| RhiError::InvalidArgument(format!("cannot transfer texels of format {format:?}")))
}

/// Device-local 2D image, its memory and a view over every mip level.
pub struct GpuImage {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    extent: vk::Extent3D,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
    mip_levels: u32,
}

impl GpuImage {
    pub fn new(
        device: Arc<Device>,
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mipmapped: bool,
        name: &str,
    ) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "image '{name}' has empty extent {}x{}x{}",
                extent.width, extent.height, extent.depth
            )));
        }

        let mip_levels = if mipmapped {
            mip_levels_for(vk::Extent2D {
                width: extent.width,
                height: extent.height,
            })
        } else {
            1
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(extent)
            .mip_levels(mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.lock_allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e.into());
            }
        };

        // From here on Drop cleans up whatever was created.
        let mut this = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            extent,
            format,
            usage,
            mip_levels,
        };

        if let Some(allocation) = &this.allocation {
            unsafe {
                this.device
                    .handle()
                    .bind_image_memory(image, allocation.memory(), allocation.offset())?;
            }
        }

        let aspect = if is_depth_format(format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(full_subresource_range(aspect));
        this.view = unsafe { this.device.handle().create_image_view(&view_info, None)? };

        debug!(
            "Created image '{}': {}x{} {:?}, {} mip(s)",
            name, extent.width, extent.height, format, mip_levels
        );
        Ok(this)
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Size in bytes of mip 0 when tightly packed.
    pub fn byte_size(&self) -> Option<u64> {
        texel_size(self.format).map(|texel| {
            u64::from(self.extent.width)
                * u64::from(self.extent.height)
                * u64::from(self.extent.depth)
                * u64::from(texel)
        })
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
        }
        if let Some(allocation) = self.allocation.take()
            && let Err(e) = self.device.lock_allocator().free(allocation)
        {
            error!("Failed to free image allocation: {:?}", e);
        }
        unsafe { self.device.handle().destroy_image(self.image, None) };
        debug!("Destroyed image {:?}", self.format);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_mip_levels_for_power_of_two() {
        assert_eq!(mip_levels_for(extent(1, 1)), 1);
        assert_eq!(mip_levels_for(extent(2, 2)), 2);
        assert_eq!(mip_levels_for(extent(1024, 1024)), 11);
    }

    #[test]
    fn test_mip_levels_for_uses_largest_side() {
        assert_eq!(mip_levels_for(extent(1024, 16)), 11);
        assert_eq!(mip_levels_for(extent(16, 1700)), 11);
        assert_eq!(mip_levels_for(extent(1700, 900)), 11);
        assert_eq!(mip_levels_for(extent(3, 1)), 2);
    }

    #[test]
    fn test_texel_sizes() {
        assert_eq!(texel_size(vk::Format::R8G8B8A8_UNORM), Some(4));
        assert_eq!(texel_size(vk::Format::R16G16B16A16_SFLOAT), Some(8));
        assert_eq!(texel_size(vk::Format::BC7_UNORM_BLOCK), None);
    }

    #[test]
    fn test_depth_formats() {
        assert!(is_depth_format(vk::Format::D32_SFLOAT));
        assert!(!is_depth_format(vk::Format::R8G8B8A8_UNORM));
    }

    #[test]
    fn test_transfer_rejects_depth_formats() {
        assert_eq!(texel_size(vk::Format::D32_SFLOAT), Some(4));
        assert!(matches!(
            transfer_texel_size(vk::Format::D32_SFLOAT),
            Err(RhiError::InvalidArgument(_))
        ));
        assert!(matches!(
            transfer_texel_size(vk::Format::BC7_UNORM_BLOCK),
            Err(RhiError::InvalidArgument(_))
        ));
        assert_eq!(transfer_texel_size(vk::Format::R8G8B8A8_UNORM).ok(), Some(4));
    }
}
