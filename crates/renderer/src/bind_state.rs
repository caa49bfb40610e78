//! Redundant-bind elimination for the geometry pass.

use ash::vk;
use ember_resources::MaterialInstance;

/// What is currently bound on the command buffer, so consecutive draws
/// sharing a pipeline, material set or index buffer skip the rebind.
#[derive(Debug, Default, Clone, Copy)]
pub struct BindState {
    pipeline: Option<vk::Pipeline>,
    material_set: Option<vk::DescriptorSet>,
    index_buffer: Option<vk::Buffer>,
}

/// Binds a draw needs before it can be issued.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BindChanges {
    /// Pipeline plus the scene set, which a pipeline switch may disturb.
    pub pipeline: bool,
    pub material_set: bool,
    pub index_buffer: bool,
}

impl BindState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `material` and `index_buffer` as bound, returning which of them
    /// changed.
    pub fn update(&mut self, material: &MaterialInstance, index_buffer: vk::Buffer) -> BindChanges {
        let pipeline = swap(&mut self.pipeline, material.pipeline.pipeline);
        // A new pipeline may use an incompatible layout, so the material set
        // is rebound with it.
        let material_set = swap(&mut self.material_set, material.material_set) || pipeline;
        let index_buffer = swap(&mut self.index_buffer, index_buffer);
        BindChanges {
            pipeline,
            material_set,
            index_buffer,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn swap<T: PartialEq + Copy>(slot: &mut Option<T>, value: T) -> bool {
    if *slot == Some(value) {
        false
    } else {
        *slot = Some(value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use ember_resources::{MaterialPass, MaterialPipeline};

    fn material(pipeline: u64, set: u64) -> MaterialInstance {
        MaterialInstance {
            pipeline: MaterialPipeline {
                pipeline: vk::Pipeline::from_raw(pipeline),
                layout: vk::PipelineLayout::from_raw(pipeline),
            },
            material_set: vk::DescriptorSet::from_raw(set),
            pass: MaterialPass::Opaque,
        }
    }

    #[test]
    fn test_first_draw_binds_everything() {
        let mut state = BindState::new();
        let changes = state.update(&material(1, 10), vk::Buffer::from_raw(7));
        assert_eq!(
            changes,
            BindChanges {
                pipeline: true,
                material_set: true,
                index_buffer: true,
            }
        );
    }

    #[test]
    fn test_repeated_draw_binds_nothing() {
        let mut state = BindState::new();
        let m = material(1, 10);
        state.update(&m, vk::Buffer::from_raw(7));
        assert_eq!(state.update(&m, vk::Buffer::from_raw(7)), BindChanges::default());
    }

    #[test]
    fn test_pipeline_switch_rebinds_material_set() {
        let mut state = BindState::new();
        state.update(&material(1, 10), vk::Buffer::from_raw(7));
        let changes = state.update(&material(2, 10), vk::Buffer::from_raw(7));
        assert!(changes.pipeline);
        assert!(changes.material_set);
        assert!(!changes.index_buffer);
    }

    #[test]
    fn test_material_switch_keeps_pipeline() {
        let mut state = BindState::new();
        state.update(&material(1, 10), vk::Buffer::from_raw(7));
        let changes = state.update(&material(1, 11), vk::Buffer::from_raw(8));
        assert!(!changes.pipeline);
        assert!(changes.material_set);
        assert!(changes.index_buffer);
    }

    #[test]
    fn test_reset_forgets_bindings() {
        let mut state = BindState::new();
        let m = material(1, 10);
        state.update(&m, vk::Buffer::from_raw(7));
        state.reset();
        assert!(state.update(&m, vk::Buffer::from_raw(7)).pipeline);
    }
}
