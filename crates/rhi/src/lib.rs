//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Safe-ish wrappers over `ash` for what the frame loop needs:
//! - Instance, GPU selection, logical device and surface
//! - Fences, semaphores, command buffers and blocking immediate submits
//! - Growable descriptor allocation and batched descriptor writes
//! - Handle-based buffer/image allocation on top of gpu-allocator
//! - Deferred destruction queues
//! - The presentation seam and its swapchain implementation

mod error;

pub mod allocator;
pub mod buffer;
pub mod command;
pub mod deletion_queue;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod immediate;
pub mod instance;
pub mod physical_device;
pub mod resource_table;
pub mod sampler;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};

// Re-exports callers need to name memory placement and raw handles.
pub use ash::vk;
pub use gpu_allocator::MemoryLocation;
