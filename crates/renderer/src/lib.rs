//! Frame orchestration and draw submission.
//!
//! This crate turns a [`DrawContext`](ember_scene::DrawContext) into GPU work:
//! - Frame slots and the fence-guarded order they are recycled in
//! - The frame manager that acquires, submits and presents
//! - The material pipeline registry
//! - Background effects, default textures and mesh upload
//! - The [`Renderer`] context tying them together

pub mod bind_state;
pub mod defaults;
pub mod effects;
pub mod frame;
pub mod frame_manager;
pub mod material;
pub mod renderer;
pub mod stats;
pub mod upload;

pub use bind_state::{BindChanges, BindState};
pub use defaults::DefaultTextures;
pub use effects::{BackgroundEffects, ComputeEffect};
pub use frame::{FrameCounter, FrameSlot, SlotLifecycle, SlotState};
pub use frame_manager::{FrameManager, FrameSettings};
pub use material::MaterialRegistry;
pub use renderer::{FrameOutcome, OverlayRenderer, Renderer};
pub use stats::FrameStats;

/// Maximum number of frames that can be in flight simultaneously.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
