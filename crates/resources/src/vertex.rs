//! Vertex layout.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// One vertex as the vertex shader reads it through the buffer's device
/// address.
///
/// UVs are split across the padding slots of the two `vec3`s so the struct
/// packs into three 16-byte rows with no holes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub uv_x: f32,
    pub normal: Vec3,
    pub uv_y: f32,
    pub color: Vec4,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2, color: Vec4) -> Self {
        Self {
            position,
            uv_x: uv.x,
            normal,
            uv_y: uv.y,
            color,
        }
    }

    #[inline]
    pub fn uv(&self) -> Vec2 {
        Vec2::new(self.uv_x, self.uv_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_vertex_layout_matches_shader() {
        assert_eq!(size_of::<Vertex>(), 48);
        assert_eq!(offset_of!(Vertex, uv_x), 12);
        assert_eq!(offset_of!(Vertex, normal), 16);
        assert_eq!(offset_of!(Vertex, uv_y), 28);
        assert_eq!(offset_of!(Vertex, color), 32);
    }

    #[test]
    fn test_uv_round_trip() {
        let v = Vertex::new(Vec3::ZERO, Vec3::Y, Vec2::new(0.25, 0.75), Vec4::ONE);
        assert_eq!(v.uv(), Vec2::new(0.25, 0.75));
    }
}
