//! Scene graph nodes.

use std::sync::Arc;

use ember_resources::MeshAsset;
use glam::Mat4;

use crate::draw_context::{DrawContext, RenderObject};

/// Something that can add draws to a frame's [`DrawContext`].
pub trait Renderable {
    /// Emit this object's draws given the accumulated transform of its
    /// parent, then recurse into children.
    fn contributes_to_draw<'a>(&'a self, parent: &Mat4, ctx: &mut DrawContext<'a>);
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Only groups children.
    Container,
    /// Draws every surface of the mesh with the node's world transform.
    Mesh(Arc<MeshAsset>),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub local_transform: Mat4,
    /// Cached by [`Node::refresh_transform`]; the draw walk does not read it.
    pub world_transform: Mat4,
    pub children: Vec<Node>,
    pub kind: NodeKind,
}

impl Node {
    pub fn container(name: impl Into<String>, local_transform: Mat4) -> Self {
        Self::with_kind(name, local_transform, NodeKind::Container)
    }

    pub fn mesh(name: impl Into<String>, local_transform: Mat4, mesh: Arc<MeshAsset>) -> Self {
        Self::with_kind(name, local_transform, NodeKind::Mesh(mesh))
    }

    fn with_kind(name: impl Into<String>, local_transform: Mat4, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            local_transform,
            world_transform: local_transform,
            children: Vec::new(),
            kind,
        }
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Recompute cached world transforms for this subtree.
    pub fn refresh_transform(&mut self, parent: &Mat4) {
        self.world_transform = *parent * self.local_transform;
        let world = self.world_transform;
        for child in &mut self.children {
            child.refresh_transform(&world);
        }
    }

    /// Nodes in this subtree, including this one.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Node::node_count).sum::<usize>()
    }
}

impl Renderable for Node {
    fn contributes_to_draw<'a>(&'a self, parent: &Mat4, ctx: &mut DrawContext<'a>) {
        let world = *parent * self.local_transform;

        if let NodeKind::Mesh(mesh) = &self.kind {
            let buffers = &mesh.mesh_buffers;
            for surface in &mesh.surfaces {
                ctx.push(RenderObject {
                    index_count: surface.count,
                    first_index: surface.start_index,
                    index_buffer: buffers.index_buffer_vk,
                    material: &surface.material,
                    transform: world,
                    vertex_buffer_address: buffers.vertex_buffer_address,
                });
            }
        }

        for child in &self.children {
            child.contributes_to_draw(&world, ctx);
        }
    }
}

impl Renderable for [Node] {
    fn contributes_to_draw<'a>(&'a self, parent: &Mat4, ctx: &mut DrawContext<'a>) {
        for node in self {
            node.contributes_to_draw(parent, ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw_context::build_draw_context;
    use ash::vk;
    use ember_resources::{GeoSurface, GpuMeshBuffers, MaterialInstance, MaterialPass, MaterialPipeline};
    use glam::Vec3;
    use slotmap::KeyData;

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

    fn mesh(name: &str, pass: MaterialPass) -> Arc<MeshAsset> {
        Arc::new(MeshAsset {
            name: name.to_string(),
            surfaces: vec![GeoSurface {
                start_index: 0,
                count: 36,
                material: material(pass),
            }],
            mesh_buffers: GpuMeshBuffers {
                index_buffer: KeyData::from_ffi(1).into(),
                vertex_buffer: KeyData::from_ffi(2).into(),
                index_buffer_vk: vk::Buffer::null(),
                vertex_buffer_address: 0x1000,
                index_count: 36,
            },
        })
    }

    fn t(x: f32, y: f32, z: f32) -> Mat4 {
        Mat4::from_translation(Vec3::new(x, y, z))
    }

    #[test]
    fn test_three_leaves_split_by_pass_with_ancestor_transforms() {
        let group_a = t(1.0, 0.0, 0.0);
        let group_b = Mat4::from_scale(Vec3::splat(2.0));
        let leaf_1 = t(0.0, 1.0, 0.0);
        let leaf_2 = t(0.0, 0.0, 1.0);
        let leaf_3 = t(3.0, 0.0, 0.0);

        let root = Node::container("root", Mat4::IDENTITY)
            .with_child(
                Node::container("a", group_a)
                    .with_child(Node::mesh("opaque-1", leaf_1, mesh("m1", MaterialPass::Opaque)))
                    .with_child(
                        Node::container("b", group_b)
                            .with_child(Node::mesh("glass", leaf_3, mesh("m3", MaterialPass::Transparent))),
                    ),
            )
            .with_child(Node::mesh("opaque-2", leaf_2, mesh("m2", MaterialPass::Opaque)));

        let mut ctx = DrawContext::new();
        build_draw_context(&root, &Mat4::IDENTITY, &mut ctx);

        assert_eq!(ctx.opaque_surfaces.len(), 2);
        assert_eq!(ctx.transparent_surfaces.len(), 1);
        assert_eq!(ctx.opaque_surfaces[0].transform, group_a * leaf_1);
        assert_eq!(ctx.opaque_surfaces[1].transform, leaf_2);
        assert_eq!(ctx.transparent_surfaces[0].transform, group_a * group_b * leaf_3);
        assert_eq!(ctx.transparent_surfaces[0].index_count, 36);
        assert_eq!(ctx.transparent_surfaces[0].vertex_buffer_address, 0x1000);
    }

    #[test]
    fn test_rebuild_does_not_accumulate() {
        let root = Node::mesh("only", Mat4::IDENTITY, mesh("m", MaterialPass::Opaque));
        let mut ctx = DrawContext::new();
        build_draw_context(&root, &Mat4::IDENTITY, &mut ctx);
        build_draw_context(&root, &Mat4::IDENTITY, &mut ctx);
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_top_matrix_applies_to_everything() {
        let root = Node::container("root", Mat4::IDENTITY)
            .with_child(Node::mesh("leaf", t(0.0, 1.0, 0.0), mesh("m", MaterialPass::Opaque)));
        let top = t(5.0, 0.0, 0.0);
        let mut ctx = DrawContext::new();
        build_draw_context(&root, &top, &mut ctx);
        assert_eq!(ctx.opaque_surfaces[0].origin(), Vec3::new(5.0, 1.0, 0.0));
    }

    #[test]
    fn test_refresh_transform_caches_world_matrices() {
        let mut root = Node::container("root", t(1.0, 0.0, 0.0))
            .with_child(Node::container("child", t(0.0, 2.0, 0.0)).with_child(Node::container("leaf", t(0.0, 0.0, 3.0))));
        root.refresh_transform(&Mat4::IDENTITY);
        let leaf = &root.children[0].children[0];
        assert_eq!(leaf.world_transform.w_axis.truncate(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(root.node_count(), 3);
    }

    #[test]
    fn test_slice_of_roots() {
        let roots = vec![
            Node::mesh("a", Mat4::IDENTITY, mesh("a", MaterialPass::Opaque)),
            Node::mesh("b", Mat4::IDENTITY, mesh("b", MaterialPass::Transparent)),
        ];
        let mut ctx = DrawContext::new();
        build_draw_context(roots.as_slice(), &Mat4::IDENTITY, &mut ctx);
        assert_eq!(ctx.len(), 2);
    }
}
