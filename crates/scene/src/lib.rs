//! Scene nodes and per-frame draw lists.
//!
//! The scene is a tree of [`Node`]s. Each frame the tree is walked through
//! [`Renderable::contributes_to_draw`], which flattens every mesh surface
//! into a [`RenderObject`] in the opaque or transparent list of a
//! [`DrawContext`].

pub mod draw_context;
pub mod node;

pub use draw_context::{DrawContext, RenderObject, build_draw_context};
pub use node::{Node, NodeKind, Renderable};
