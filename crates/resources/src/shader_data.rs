//! Uniform and push-constant blocks shared with shaders.
//!
//! All structs are `#[repr(C)]`, `Pod` and laid out to match std140 / the
//! push-constant declarations without implicit padding.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Per-frame scene uniforms, bound as set 0 binding 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuSceneData {
    pub view: Mat4,
    pub proj: Mat4,
    pub viewproj: Mat4,
    pub ambient_color: Vec4,
    /// xyz direction, w sun power.
    pub sunlight_direction: Vec4,
    pub sunlight_color: Vec4,
}

impl GpuSceneData {
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        Self {
            view,
            proj,
            viewproj: proj * view,
            ..Self::default()
        }
    }
}

impl Default for GpuSceneData {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
            viewproj: Mat4::IDENTITY,
            ambient_color: Vec4::splat(0.1),
            sunlight_direction: Vec4::new(0.0, 1.0, 0.5, 1.0),
            sunlight_color: Vec4::ONE,
        }
    }
}

/// Per-draw push constants for mesh pipelines.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuDrawPushConstants {
    pub world_matrix: Mat4,
    pub vertex_buffer: vk::DeviceAddress,
    pub _padding: u64,
}

impl GpuDrawPushConstants {
    pub fn new(world_matrix: Mat4, vertex_buffer: vk::DeviceAddress) -> Self {
        Self {
            world_matrix,
            vertex_buffer,
            _padding: 0,
        }
    }
}

/// Four free-form vectors handed to a background compute effect.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ComputePushConstants {
    pub data1: Vec4,
    pub data2: Vec4,
    pub data3: Vec4,
    pub data4: Vec4,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_block_sizes() {
        assert_eq!(size_of::<GpuSceneData>(), 240);
        assert_eq!(size_of::<GpuDrawPushConstants>(), 80);
        assert_eq!(size_of::<ComputePushConstants>(), 64);
    }

    #[test]
    fn test_viewproj_is_proj_times_view() {
        let view = Mat4::from_translation(glam::Vec3::new(0.0, 0.0, -5.0));
        let proj = Mat4::from_scale(glam::Vec3::new(2.0, 2.0, 1.0));
        let data = GpuSceneData::new(view, proj);
        assert_eq!(data.viewproj, proj * view);
    }

    #[test]
    fn test_push_constants_are_byte_castable() {
        let pc = GpuDrawPushConstants::new(Mat4::IDENTITY, 0xdead_beef);
        let bytes = bytemuck::bytes_of(&pc);
        assert_eq!(bytes.len(), 80);
        assert_eq!(&bytes[64..72], &0xdead_beef_u64.to_ne_bytes());
    }
}
