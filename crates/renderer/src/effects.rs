//! Background compute effects.
//!
//! An effect is a compute pipeline that writes the draw image through a
//! storage-image descriptor at set 0, binding 0, with a
//! [`ComputePushConstants`] block as its parameters. The pipelines are built
//! elsewhere against [`Renderer::draw_image_layout`](crate::Renderer::draw_image_layout)
//! and stay owned by their creator.

use ash::vk;
use ember_resources::ComputePushConstants;
use ember_rhi::command::CommandBuffer;

/// Workgroup edge length the effect shaders are compiled with.
pub const WORKGROUP_SIZE: u32 = 16;

#[derive(Debug, Clone)]
pub struct ComputeEffect {
    pub name: String,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub data: ComputePushConstants,
}

impl ComputeEffect {
    /// Record the effect over `extent` of the image bound through `image_set`.
    pub fn record(&self, cmd: &CommandBuffer, image_set: vk::DescriptorSet, extent: vk::Extent2D) {
        cmd.bind_pipeline(vk::PipelineBindPoint::COMPUTE, self.pipeline);
        cmd.bind_descriptor_sets(vk::PipelineBindPoint::COMPUTE, self.layout, 0, &[image_set]);
        cmd.push_constants(
            self.layout,
            vk::ShaderStageFlags::COMPUTE,
            0,
            bytemuck::bytes_of(&self.data),
        );
        let (x, y) = dispatch_size(extent);
        cmd.dispatch(x, y, 1);
    }
}

/// Workgroups needed to cover `extent`.
pub fn dispatch_size(extent: vk::Extent2D) -> (u32, u32) {
    (
        extent.width.div_ceil(WORKGROUP_SIZE),
        extent.height.div_ceil(WORKGROUP_SIZE),
    )
}

/// Installed effects and which one runs.
#[derive(Debug, Default)]
pub struct BackgroundEffects {
    effects: Vec<ComputeEffect>,
    current: usize,
}

impl BackgroundEffects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an effect and return its index.
    pub fn push(&mut self, effect: ComputeEffect) -> usize {
        self.effects.push(effect);
        self.effects.len() - 1
    }

    /// Make `index` the running effect. Out-of-range indices are ignored.
    pub fn select(&mut self, index: usize) -> bool {
        if index < self.effects.len() {
            self.current = index;
            true
        } else {
            false
        }
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> Option<&ComputeEffect> {
        self.effects.get(self.current)
    }

    /// Lets the caller tweak the running effect's push constants.
    pub fn current_mut(&mut self) -> Option<&mut ComputeEffect> {
        self.effects.get_mut(self.current)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComputeEffect> {
        self.effects.iter()
    }
}
