//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// The device stopped responding or was removed.
    #[error("Device lost")]
    DeviceLost,

    /// A fence did not signal within the allotted time.
    #[error("Fence wait timed out after {timeout_ns} ns")]
    FenceTimeout { timeout_ns: u64 },

    /// A handle was used after it had been destroyed.
    #[error("Stale {kind} handle")]
    StaleHandle { kind: &'static str },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),
}

impl RhiError {
    /// Whether the error leaves the device unusable.
    ///
    /// Fatal errors terminate the frame loop after a best-effort flush of the
    /// deletion queues.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::DeviceLost | Self::FenceTimeout { .. } | Self::AllocatorError(_) => true,
            Self::VulkanError(r) => matches!(
                *r,
                vk::Result::ERROR_DEVICE_LOST
                    | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                    | vk::Result::ERROR_OUT_OF_HOST_MEMORY
            ),
            _ => false,
        }
    }

    /// Map the result of a fence wait, keeping timeouts and device loss
    /// distinct from ordinary failures.
    pub(crate) fn from_wait(result: vk::Result, timeout_ns: u64) -> Self {
        match result {
            vk::Result::TIMEOUT => Self::FenceTimeout { timeout_ns },
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::VulkanError(other),
        }
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
