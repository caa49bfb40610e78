//! Core utilities shared by every ember crate.
//!
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - Renderer configuration loaded from TOML

mod config;
mod error;
mod logging;
mod timer;

pub use config::RendererConfig;
pub use error::{Error, Result};
pub use logging::{init_logging, init_logging_with};
pub use timer::{FrameTimer, Timer};
