//! Uploaded meshes.

use ash::vk;
use ember_rhi::RhiResult;
use ember_rhi::allocator::{BufferHandle, GpuAllocator};

use crate::material::MaterialInstance;

/// Index and vertex buffers of one uploaded mesh.
#[derive(Debug, Clone, Copy)]
pub struct GpuMeshBuffers {
    pub index_buffer: BufferHandle,
    pub vertex_buffer: BufferHandle,
    /// Raw index buffer, for binding.
    pub index_buffer_vk: vk::Buffer,
    pub vertex_buffer_address: vk::DeviceAddress,
    pub index_count: u32,
}

impl GpuMeshBuffers {
    /// Give both buffers back to the allocator.
    pub fn destroy(self, allocator: &mut GpuAllocator) -> RhiResult<()> {
        let index = allocator.destroy_buffer(self.index_buffer);
        allocator.destroy_buffer(self.vertex_buffer)?;
        index
    }
}

/// A run of indices drawn with one material.
#[derive(Debug, Clone)]
pub struct GeoSurface {
    pub start_index: u32,
    pub count: u32,
    pub material: MaterialInstance,
}

/// A named mesh split into surfaces sharing one pair of buffers.
#[derive(Debug, Clone)]
pub struct MeshAsset {
    pub name: String,
    pub surfaces: Vec<GeoSurface>,
    pub mesh_buffers: GpuMeshBuffers,
}
