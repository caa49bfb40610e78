//! GPU buffers backed by gpu-allocator memory.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Device buffer plus its memory.
///
/// `CpuToGpu` and `GpuToCpu` buffers stay persistently mapped and can be
/// written or read directly. Memory is freed when the buffer is dropped;
/// outside this crate buffers are only released through
/// [`crate::allocator::GpuAllocator::destroy_buffer`].
pub struct GpuBuffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
}

impl GpuBuffer {
    pub fn new(
        device: Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidArgument(format!("buffer '{name}' has zero size")));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.lock_allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        let bound = unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        let buffer = Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
            location,
        };
        bound?;

        debug!("Created buffer '{}': {} bytes ({:?})", name, size, location);
        Ok(buffer)
    }

    /// Copy `data` into mapped memory at `offset`.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_range(offset, data.len())?;
        let dst = self.mapped_ptr()?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst.add(offset as usize), data.len());
        }
        Ok(())
    }

    /// Copy `len` bytes out of mapped memory starting at `offset`.
    pub fn read(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<Vec<u8>> {
        self.check_range(offset, len)?;
        let src = self.mapped_ptr()?;
        let mut out = vec![0u8; len];
        unsafe {
            std::ptr::copy_nonoverlapping(src.add(offset as usize), out.as_mut_ptr(), len);
        }
        Ok(out)
    }

    /// Device address for bindless vertex pulling. The buffer must have been
    /// created with `SHADER_DEVICE_ADDRESS`.
    pub fn device_address(&self) -> RhiResult<vk::DeviceAddress> {
        if !self.usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            return Err(RhiError::InvalidArgument(
                "buffer was not created with SHADER_DEVICE_ADDRESS".into(),
            ));
        }
        let info = vk::BufferDeviceAddressInfo::default().buffer(self.buffer);
        Ok(unsafe { self.device.handle().get_buffer_device_address(&info) })
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    #[inline]
    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    pub fn is_mapped(&self) -> bool {
        self.allocation
            .as_ref()
            .is_some_and(|a| a.mapped_ptr().is_some())
    }

    fn check_range(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<()> {
        match offset.checked_add(len as vk::DeviceSize) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(RhiError::InvalidArgument(format!(
                "range {}+{} exceeds buffer size {}",
                offset, len, self.size
            ))),
        }
    }

    fn mapped_ptr(&self) -> RhiResult<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .map(|p| p.as_ptr().cast::<u8>())
            .ok_or_else(|| RhiError::InvalidArgument("buffer memory is not host-visible".into()))
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take()
            && let Err(e) = self.device.lock_allocator().free(allocation)
        {
            error!("Failed to free buffer allocation: {:?}", e);
        }
        unsafe { self.device.handle().destroy_buffer(self.buffer, None) };
        debug!("Destroyed buffer ({} bytes)", self.size);
    }
}

