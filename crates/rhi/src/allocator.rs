//! Handle-based creation and destruction of GPU buffers and images.
//!
//! [`GpuAllocator`] is the only owner of [`GpuBuffer`]s and [`GpuImage`]s
//! created through it. Callers hold copyable handles; `destroy_*` consumes
//! the resource and invalidates every copy of its handle, so destroying twice
//! or using a destroyed resource is reported as [`RhiError::StaleHandle`].
//!
//! Nothing here waits on the GPU. Destroying a resource that in-flight
//! commands still reference is the caller's bug; defer such destroys through
//! a [`crate::deletion_queue::DeletionQueue`] flushed after the frame fence.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use tracing::{debug, warn};

use crate::buffer::GpuBuffer;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{GpuImage, transfer_texel_size};
use crate::immediate::ImmediateSubmitter;
use crate::resource_table::ResourceTable;

slotmap::new_key_type! {
    /// Handle to a buffer owned by a [`GpuAllocator`].
    pub struct BufferHandle;
    /// Handle to an image owned by a [`GpuAllocator`].
    pub struct ImageHandle;
}

/// Description of an image to create.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc<'a> {
    pub name: &'a str,
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mipmapped: bool,
}

impl<'a> ImageDesc<'a> {
    pub fn new_2d(name: &'a str, width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            name,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            format,
            usage,
            mipmapped: false,
        }
    }

    pub fn mipmapped(mut self, mipmapped: bool) -> Self {
        self.mipmapped = mipmapped;
        self
    }
}

pub struct GpuAllocator {
    device: Arc<Device>,
    buffers: ResourceTable<BufferHandle, GpuBuffer>,
    images: ResourceTable<ImageHandle, GpuImage>,
}

impl GpuAllocator {
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            buffers: ResourceTable::new("buffer"),
            images: ResourceTable::new("image"),
        }
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    // =========================================================================
    // Buffers
    // =========================================================================

    /// Create a buffer. `location` picks CPU-visible (`CpuToGpu`, `GpuToCpu`)
    /// or device-local (`GpuOnly`) memory.
    ///
    /// # Errors
    ///
    /// Out-of-memory comes back as [`RhiError::AllocatorError`], which is
    /// fatal; there is no retry.
    pub fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> RhiResult<BufferHandle> {
        let buffer = GpuBuffer::new(self.device.clone(), size, usage, location, name)?;
        Ok(self.buffers.insert(buffer))
    }

    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> RhiResult<()> {
        self.buffers.remove(handle).map(drop)
    }

    pub fn buffer(&self, handle: BufferHandle) -> RhiResult<&GpuBuffer> {
        self.buffers.get(handle)
    }

    // =========================================================================
    // Images
    // =========================================================================

    /// Create an image with a default view. `desc.mipmapped` allocates the
    /// full mip chain.
    pub fn create_image(&mut self, desc: &ImageDesc<'_>) -> RhiResult<ImageHandle> {
        let image = GpuImage::new(
            self.device.clone(),
            desc.extent,
            desc.format,
            desc.usage,
            desc.mipmapped,
            desc.name,
        )?;
        Ok(self.images.insert(image))
    }

    /// Create a color image and fill mip 0 with `data`, ending in
    /// `SHADER_READ_ONLY_OPTIMAL`. Depth formats are rejected.
    ///
    /// The bytes are staged through a temporary CPU-visible buffer and copied
    /// with one immediate submission; the staging buffer is destroyed once
    /// that submission has completed. Mipmapped images get the rest of their
    /// chain generated by blits in the same submission.
    pub fn create_image_with_data(
        &mut self,
        submitter: &mut ImmediateSubmitter,
        data: &[u8],
        desc: &ImageDesc<'_>,
    ) -> RhiResult<ImageHandle> {
        let texel = transfer_texel_size(desc.format)?;
        let expected = u64::from(desc.extent.width)
            * u64::from(desc.extent.height)
            * u64::from(desc.extent.depth)
            * u64::from(texel);
        if data.len() as u64 != expected {
            return Err(RhiError::InvalidArgument(format!(
                "image '{}' expects {} bytes, got {}",
                desc.name,
                expected,
                data.len()
            )));
        }

        let staging = self.create_buffer(
            expected,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "image staging",
        )?;
        let result = self.upload_through(submitter, staging, data, desc);
        self.destroy_buffer(staging)?;
        result
    }

    fn upload_through(
        &mut self,
        submitter: &mut ImmediateSubmitter,
        staging: BufferHandle,
        data: &[u8],
        desc: &ImageDesc<'_>,
    ) -> RhiResult<ImageHandle> {
        let staging_buffer = self.buffers.get(staging)?;
        staging_buffer.write(0, data)?;
        let staging_vk = staging_buffer.handle();

        let mut usage = desc.usage | vk::ImageUsageFlags::TRANSFER_DST;
        if desc.mipmapped {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        let handle = self.create_image(&ImageDesc { usage, ..*desc })?;
        let image = self.images.get(handle)?;
        let (image_vk, extent, mip_levels) = (image.handle(), image.extent(), image.mip_levels());
        let extent_2d = image.extent_2d();

        let submitted = submitter.submit(|cmd| {
            cmd.transition_image(
                image_vk,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            cmd.copy_buffer_to_image(staging_vk, image_vk, extent);
            if mip_levels > 1 {
                cmd.generate_mipmaps(image_vk, extent_2d, mip_levels);
            } else {
                cmd.transition_image(
                    image_vk,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            }
        });

        match submitted {
            Ok(()) => Ok(handle),
            Err(e) => {
                self.destroy_image(handle)?;
                Err(e)
            }
        }
    }

    /// Copy mip 0 of a shader-readable color image back to the host.
    ///
    /// The image must have `TRANSFER_SRC` usage; it is returned to
    /// `SHADER_READ_ONLY_OPTIMAL` afterwards.
    pub fn read_image(&mut self, submitter: &mut ImmediateSubmitter, handle: ImageHandle) -> RhiResult<Vec<u8>> {
        let image = self.images.get(handle)?;
        if !image.usage().contains(vk::ImageUsageFlags::TRANSFER_SRC) {
            return Err(RhiError::InvalidArgument("image was not created with TRANSFER_SRC".into()));
        }
        transfer_texel_size(image.format())?;
        let size = image
            .byte_size()
            .ok_or_else(|| RhiError::InvalidArgument(format!("cannot read back {:?}", image.format())))?;
        let (image_vk, extent) = (image.handle(), image.extent());

        let readback = self.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "image readback",
        )?;
        let readback_vk = self.buffers.get(readback)?.handle();

        let result = submitter
            .submit(|cmd| {
                cmd.transition_image(
                    image_vk,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                );
                cmd.copy_image_to_buffer(image_vk, readback_vk, extent);
                cmd.transition_image(
                    image_vk,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            })
            .and_then(|()| self.buffers.get(readback)?.read(0, size as usize));

        self.destroy_buffer(readback)?;
        result
    }

    pub fn destroy_image(&mut self, handle: ImageHandle) -> RhiResult<()> {
        self.images.remove(handle).map(drop)
    }

    pub fn image(&self, handle: ImageHandle) -> RhiResult<&GpuImage> {
        self.images.get(handle)
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    /// Buffers plus images currently alive.
    pub fn live_count(&self) -> usize {
        self.buffers.len() + self.images.len()
    }

    /// Destroy everything still alive, warning about each leak. Called at
    /// shutdown after the deletion queues have been flushed, so anything
    /// left here was never given back.
    pub fn destroy_all(&mut self) -> usize {
        let leaked = self.live_count();
        for (handle, buffer) in self.buffers.drain() {
            warn!("Leaked buffer {:?} ({} bytes) destroyed at shutdown", handle, buffer.size());
        }
        for (handle, image) in self.images.drain() {
            warn!("Leaked image {:?} ({:?}) destroyed at shutdown", handle, image.format());
        }
        if leaked == 0 {
            debug!("GPU allocator shut down clean");
        }
        leaked
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.destroy_all();
    }
}
