//! Mesh upload.

use ash::vk;
use tracing::debug;

use ember_resources::{GpuMeshBuffers, Vertex};
use ember_rhi::allocator::{BufferHandle, GpuAllocator};
use ember_rhi::immediate::ImmediateSubmitter;
use ember_rhi::{MemoryLocation, RhiError, RhiResult};

/// Copy `indices` and `vertices` into new device-local buffers.
///
/// Both arrays go through one staging buffer and one immediate submission.
/// The vertex buffer is read by address from shaders, so it gets storage and
/// device-address usage instead of vertex-buffer usage. The staging buffer
/// is gone by the time this returns; the mesh buffers belong to the caller.
pub fn upload_mesh(
    allocator: &mut GpuAllocator,
    submitter: &mut ImmediateSubmitter,
    indices: &[u32],
    vertices: &[Vertex],
) -> RhiResult<GpuMeshBuffers> {
    if indices.is_empty() || vertices.is_empty() {
        return Err(RhiError::InvalidArgument(format!(
            "mesh needs indices and vertices, got {} and {}",
            indices.len(),
            vertices.len()
        )));
    }
    let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
    let index_bytes: &[u8] = bytemuck::cast_slice(indices);
    let vertex_size = vertex_bytes.len() as vk::DeviceSize;
    let index_size = index_bytes.len() as vk::DeviceSize;

    let vertex_buffer = allocator.create_buffer(
        vertex_size,
        vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        MemoryLocation::GpuOnly,
        "mesh vertices",
    )?;
    let index_buffer = match allocator.create_buffer(
        index_size,
        vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuOnly,
        "mesh indices",
    ) {
        Ok(handle) => handle,
        Err(e) => {
            allocator.destroy_buffer(vertex_buffer)?;
            return Err(e);
        }
    };

    let staging = match allocator.create_buffer(
        vertex_size + index_size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        "mesh staging",
    ) {
        Ok(handle) => handle,
        Err(e) => {
            allocator.destroy_buffer(index_buffer)?;
            allocator.destroy_buffer(vertex_buffer)?;
            return Err(e);
        }
    };

    let uploaded = copy_through_staging(
        allocator,
        submitter,
        staging,
        [(vertex_buffer, vertex_bytes), (index_buffer, index_bytes)],
    );
    allocator.destroy_buffer(staging)?;

    let result = uploaded.and_then(|()| {
        Ok(GpuMeshBuffers {
            index_buffer,
            vertex_buffer,
            index_buffer_vk: allocator.buffer(index_buffer)?.handle(),
            vertex_buffer_address: allocator.buffer(vertex_buffer)?.device_address()?,
            index_count: indices.len() as u32,
        })
    });
    match result {
        Ok(mesh) => {
            debug!(
                "Uploaded mesh: {} vertices, {} indices",
                vertices.len(),
                indices.len()
            );
            Ok(mesh)
        }
        Err(e) => {
            allocator.destroy_buffer(index_buffer)?;
            allocator.destroy_buffer(vertex_buffer)?;
            Err(e)
        }
    }
}

/// Write each chunk back to back into `staging`, then copy each into its
/// destination buffer in one submission.
fn copy_through_staging<const N: usize>(
    allocator: &GpuAllocator,
    submitter: &mut ImmediateSubmitter,
    staging: BufferHandle,
    chunks: [(BufferHandle, &[u8]); N],
) -> RhiResult<()> {
    let staging_buffer = allocator.buffer(staging)?;
    let staging_vk = staging_buffer.handle();

    let mut copies = Vec::with_capacity(N);
    let mut offset: vk::DeviceSize = 0;
    for (dst, bytes) in chunks {
        staging_buffer.write(offset, bytes)?;
        let size = bytes.len() as vk::DeviceSize;
        copies.push((allocator.buffer(dst)?.handle(), vk::BufferCopy::default().src_offset(offset).size(size)));
        offset += size;
    }

    submitter.submit(|cmd| {
        for (dst, region) in &copies {
            cmd.copy_buffer(staging_vk, *dst, std::slice::from_ref(region));
        }
    })
}
