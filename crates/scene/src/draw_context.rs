//! Per-frame draw lists.

use ash::vk;
use ember_resources::{MaterialInstance, MaterialPass};
use glam::{Mat4, Vec3};

use crate::node::Renderable;

/// One indexed draw.
///
/// Borrows its material from the scene, so a draw context can never outlive
/// the scene it was built from.
#[derive(Debug, Clone, Copy)]
pub struct RenderObject<'a> {
    pub index_count: u32,
    pub first_index: u32,
    pub index_buffer: vk::Buffer,
    pub material: &'a MaterialInstance,
    pub transform: Mat4,
    pub vertex_buffer_address: vk::DeviceAddress,
}

impl RenderObject<'_> {
    /// World-space position of the object's origin.
    pub fn origin(&self) -> Vec3 {
        self.transform.w_axis.truncate()
    }
}

/// Opaque and transparent draws for one frame, each in render order.
#[derive(Debug, Default)]
pub struct DrawContext<'a> {
    pub opaque_surfaces: Vec<RenderObject<'a>>,
    pub transparent_surfaces: Vec<RenderObject<'a>>,
}

impl<'a> DrawContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.opaque_surfaces.clear();
        self.transparent_surfaces.clear();
    }

    /// Append to the bucket chosen by the object's material pass.
    pub fn push(&mut self, object: RenderObject<'a>) {
        match object.material.pass {
            MaterialPass::Opaque => self.opaque_surfaces.push(object),
            MaterialPass::Transparent => self.transparent_surfaces.push(object),
        }
    }

    pub fn len(&self) -> usize {
        self.opaque_surfaces.len() + self.transparent_surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every object, opaque first, each bucket in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &RenderObject<'a>> {
        self.opaque_surfaces
            .iter()
            .chain(self.transparent_surfaces.iter())
    }

    /// Reorder transparent objects farthest-first from `camera`.
    ///
    /// Only the object origins are compared, and ties keep insertion order.
    /// Not called by default: without it transparent objects draw in the
    /// order the scene walk produced them.
    pub fn sort_transparent_back_to_front(&mut self, camera: Vec3) {
        self.transparent_surfaces.sort_by(|a, b| {
            let da = a.origin().distance_squared(camera);
            let db = b.origin().distance_squared(camera);
            db.total_cmp(&da)
        });
    }
}

/// Clear `ctx` and refill it from `root`, starting from `top`.
pub fn build_draw_context<'a, R>(root: &'a R, top: &Mat4, ctx: &mut DrawContext<'a>)
where
    R: Renderable + ?Sized,
{
    ctx.clear();
    root.contributes_to_draw(top, ctx);
    tracing::trace!(
        "Draw context built: {} opaque, {} transparent",
        ctx.opaque_surfaces.len(),
        ctx.transparent_surfaces.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_resources::MaterialPipeline;

    fn material(pass: MaterialPass) -> MaterialInstance {
        MaterialInstance {
            pipeline: MaterialPipeline {
                pipeline: vk::Pipeline::null(),
                layout: vk::PipelineLayout::null(),
            },
            material_set: vk::DescriptorSet::null(),
            pass,
        }
    }

    fn object(material: &MaterialInstance, at: Vec3) -> RenderObject<'_> {
        RenderObject {
            index_count: 3,
            first_index: 0,
            index_buffer: vk::Buffer::null(),
            material,
            transform: Mat4::from_translation(at),
            vertex_buffer_address: 0,
        }
    }

    #[test]
    fn test_push_routes_by_pass() {
        let opaque = material(MaterialPass::Opaque);
        let transparent = material(MaterialPass::Transparent);
        let mut ctx = DrawContext::new();
        ctx.push(object(&transparent, Vec3::ZERO));
        ctx.push(object(&opaque, Vec3::ZERO));
        ctx.push(object(&opaque, Vec3::X));

        assert_eq!(ctx.opaque_surfaces.len(), 2);
        assert_eq!(ctx.transparent_surfaces.len(), 1);
        assert_eq!(ctx.len(), 3);
    }

    #[test]
    fn test_iter_draws_opaque_first_in_insertion_order() {
        let opaque = material(MaterialPass::Opaque);
        let transparent = material(MaterialPass::Transparent);
        let mut ctx = DrawContext::new();
        ctx.push(object(&transparent, Vec3::new(9.0, 0.0, 0.0)));
        ctx.push(object(&opaque, Vec3::new(1.0, 0.0, 0.0)));
        ctx.push(object(&opaque, Vec3::new(2.0, 0.0, 0.0)));

        let xs: Vec<f32> = ctx.iter().map(|o| o.origin().x).collect();
        assert_eq!(xs, [1.0, 2.0, 9.0]);
    }

    #[test]
    fn test_clear_empties_both_buckets() {
        let opaque = material(MaterialPass::Opaque);
        let transparent = material(MaterialPass::Transparent);
        let mut ctx = DrawContext::new();
        ctx.push(object(&opaque, Vec3::ZERO));
        ctx.push(object(&transparent, Vec3::ZERO));
        ctx.clear();
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_back_to_front_sort() {
        let transparent = material(MaterialPass::Transparent);
        let mut ctx = DrawContext::new();
        ctx.push(object(&transparent, Vec3::new(0.0, 0.0, -1.0)));
        ctx.push(object(&transparent, Vec3::new(0.0, 0.0, -10.0)));
        ctx.push(object(&transparent, Vec3::new(0.0, 0.0, -5.0)));

        ctx.sort_transparent_back_to_front(Vec3::ZERO);
        let zs: Vec<f32> = ctx.transparent_surfaces.iter().map(|o| o.origin().z).collect();
        assert_eq!(zs, [-10.0, -5.0, -1.0]);
    }
}
