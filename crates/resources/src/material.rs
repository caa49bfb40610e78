//! Material types.
//!
//! A material pass picks the pipeline; a [`MaterialInstance`] pairs that
//! pipeline with a descriptor set holding the material's textures,
//! samplers and constants. Instances are immutable once written.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec4;

/// Blending class of a surface. Opaque surfaces draw before transparent ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialPass {
    Opaque,
    Transparent,
}

/// Graphics pipeline and its layout, created by the pipeline compiler and
/// owned by whoever registered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialInstance {
    pub pipeline: MaterialPipeline,
    pub material_set: vk::DescriptorSet,
    pub pass: MaterialPass,
}

/// Uniform block of the metallic-roughness material. Padded to 256 bytes so
/// consecutive materials in one buffer meet uniform offset alignment.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    pub color_factors: Vec4,
    pub metal_rough_factors: Vec4,
    pub extra: [Vec4; 14],
}

impl Default for MaterialConstants {
    fn default() -> Self {
        Self {
            color_factors: Vec4::ONE,
            metal_rough_factors: Vec4::new(1.0, 0.5, 0.0, 0.0),
            extra: [Vec4::ZERO; 14],
        }
    }
}

/// Everything a material descriptor set points at. None of it is owned
/// here; the asset loader keeps the images, samplers and buffer alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialResources {
    pub color_image: vk::ImageView,
    pub color_sampler: vk::Sampler,
    pub metal_rough_image: vk::ImageView,
    pub metal_rough_sampler: vk::Sampler,
    pub data_buffer: vk::Buffer,
    pub data_buffer_offset: u32,
}
