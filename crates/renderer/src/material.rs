//! Material pipeline registry.
//!
//! Maps each [`MaterialPass`] to the pipeline that draws it and turns
//! [`MaterialResources`] into descriptor-backed [`MaterialInstance`]s.
//!
//! Material set layout (set 1):
//!
//! | binding | type                     | contents              |
//! |---------|--------------------------|-----------------------|
//! | 0       | uniform buffer           | [`MaterialConstants`] |
//! | 1       | combined image sampler   | base color            |
//! | 2       | combined image sampler   | metallic-roughness    |

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use ember_resources::{MaterialConstants, MaterialInstance, MaterialPass, MaterialPipeline, MaterialResources};
use ember_rhi::descriptor::{DescriptorAllocatorGrowable, DescriptorLayoutBuilder, DescriptorSetLayout, DescriptorWriter};
use ember_rhi::device::Device;
use ember_rhi::{RhiError, RhiResult};

/// Bindings of the material descriptor set.
pub fn material_layout_builder() -> DescriptorLayoutBuilder {
    DescriptorLayoutBuilder::new()
        .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
        .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .add_binding(2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
}

/// One optional pipeline per pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassPipelines {
    opaque: Option<MaterialPipeline>,
    transparent: Option<MaterialPipeline>,
}

impl PassPipelines {
    pub fn set(&mut self, pass: MaterialPass, pipeline: MaterialPipeline) -> Option<MaterialPipeline> {
        self.slot(pass).replace(pipeline)
    }

    pub fn get(&self, pass: MaterialPass) -> Option<MaterialPipeline> {
        match pass {
            MaterialPass::Opaque => self.opaque,
            MaterialPass::Transparent => self.transparent,
        }
    }

    fn slot(&mut self, pass: MaterialPass) -> &mut Option<MaterialPipeline> {
        match pass {
            MaterialPass::Opaque => &mut self.opaque,
            MaterialPass::Transparent => &mut self.transparent,
        }
    }
}

/// Pass-to-pipeline table plus the material set layout.
///
/// Pipelines are built elsewhere against [`layout`](Self::layout) and handed
/// in with [`register_pipeline`](Self::register_pipeline); their owner
/// destroys them. The registry owns only the layout, released by
/// [`clear_resources`](Self::clear_resources). Instances it writes stay
/// valid for as long as their descriptor allocator keeps its pools.
pub struct MaterialRegistry {
    device: Arc<Device>,
    pipelines: PassPipelines,
    layout: Option<DescriptorSetLayout>,
    writer: DescriptorWriter,
}

impl MaterialRegistry {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        let layout = material_layout_builder().build(device.clone(), stages)?;
        debug!("Material set layout created");
        Ok(Self {
            device,
            pipelines: PassPipelines::default(),
            layout: Some(layout),
            writer: DescriptorWriter::new(),
        })
    }

    /// Material set layout, or a null handle after
    /// [`clear_resources`](Self::clear_resources).
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
            .as_ref()
            .map_or(vk::DescriptorSetLayout::null(), DescriptorSetLayout::handle)
    }

    pub fn register_pipeline(&mut self, pass: MaterialPass, pipeline: MaterialPipeline) {
        if self.pipelines.set(pass, pipeline).is_some() {
            debug!("Replaced {:?} material pipeline", pass);
        } else {
            info!("Registered {:?} material pipeline", pass);
        }
    }

    pub fn pipeline(&self, pass: MaterialPass) -> RhiResult<MaterialPipeline> {
        self.pipelines
            .get(pass)
            .ok_or_else(|| RhiError::InvalidArgument(format!("no pipeline registered for {:?} materials", pass)))
    }

    /// Allocate a material set from `descriptors`, point it at `resources`
    /// and pair it with the pass's pipeline.
    ///
    /// Every call allocates a fresh set, so two instances written from the
    /// same resources never share one.
    pub fn write_material(
        &mut self,
        pass: MaterialPass,
        resources: &MaterialResources,
        descriptors: &mut DescriptorAllocatorGrowable,
    ) -> RhiResult<MaterialInstance> {
        let pipeline = self.pipeline(pass)?;
        let layout = self
            .layout
            .as_ref()
            .ok_or_else(|| RhiError::InvalidArgument("material registry already cleared".into()))?
            .handle();

        let material_set = descriptors.allocate(layout)?;

        self.writer.clear();
        self.writer
            .write_buffer(
                0,
                resources.data_buffer,
                std::mem::size_of::<MaterialConstants>() as vk::DeviceSize,
                vk::DeviceSize::from(resources.data_buffer_offset),
                vk::DescriptorType::UNIFORM_BUFFER,
            )
            .write_image(
                1,
                resources.color_image,
                resources.color_sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            )
            .write_image(
                2,
                resources.metal_rough_image,
                resources.metal_rough_sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            );
        self.writer.update_set(&self.device, material_set);

        Ok(MaterialInstance {
            pipeline,
            material_set,
            pass,
        })
    }

    /// Destroy the material set layout. Registered pipelines are forgotten
    /// but not destroyed.
    pub fn clear_resources(&mut self) {
        if self.layout.take().is_some() {
            debug!("Material registry resources released");
        }
        self.pipelines = PassPipelines::default();
    }
}
