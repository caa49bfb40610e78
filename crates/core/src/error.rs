//! Error types for the host side of the renderer.

use thiserror::Error;

/// Main error type for configuration, windowing and I/O.
///
/// GPU operations report through `ember_rhi::RhiError`; this type covers
/// everything that happens before a device exists.
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan-related errors surfaced as text by higher layers
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration values are out of range
    #[error("Config error: {0}")]
    Config(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;
