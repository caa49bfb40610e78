//! Renderer configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Startup settings for the window and renderer.
///
/// Every field has a default, so a config file only needs the keys it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub window_title: String,
    pub window_width: u32,
    pub window_height: u32,

    /// Fraction of the draw image actually rendered each frame.
    pub render_scale: f32,

    /// Upper bound for a frame-slot fence wait before the device is
    /// considered unresponsive.
    pub fence_timeout_ns: u64,
    pub acquire_timeout_ns: u64,

    pub enable_validation: bool,

    /// Initial descriptor sets per pool for each frame's growable allocator.
    pub frame_descriptor_sets: u32,

    pub clear_color: [f32; 4],

    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window_title: "ember".to_string(),
            window_width: 1700,
            window_height: 900,
            render_scale: 1.0,
            fence_timeout_ns: 1_000_000_000,
            acquire_timeout_ns: 1_000_000_000,
            enable_validation: cfg!(debug_assertions),
            frame_descriptor_sets: 1000,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            log_filter: None,
        }
    }
}

impl RendererConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if self.window_width == 0 || self.window_height == 0 {
            return Err(Error::Config(format!(
                "window extent must be non-zero, got {}x{}",
                self.window_width, self.window_height
            )));
        }
        if self.fence_timeout_ns == 0 {
            return Err(Error::Config("fence_timeout_ns must be non-zero".into()));
        }
        // A zero acquire timeout turns an ordinary NOT_READY into a fatal error.
        if self.acquire_timeout_ns == 0 {
            return Err(Error::Config("acquire_timeout_ns must be non-zero".into()));
        }
        if self.frame_descriptor_sets == 0 {
            return Err(Error::Config("frame_descriptor_sets must be non-zero".into()));
        }
        self.render_scale = self.render_scale.clamp(0.1, 1.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = RendererConfig::from_toml_str("").unwrap();
        assert_eq!(config, RendererConfig::default());
        assert_eq!((config.window_width, config.window_height), (1700, 900));
    }

    #[test]
    fn test_partial_override() {
        let config = RendererConfig::from_toml_str(
            r#"
            window_width = 1280
            render_scale = 0.5
            clear_color = [0.1, 0.2, 0.3, 1.0]
            log_filter = "warn"
            "#,
        )
        .unwrap();
        assert_eq!(config.window_width, 1280);
        assert_eq!(config.window_height, 900);
        assert_eq!(config.render_scale, 0.5);
        assert_eq!(config.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(config.log_filter.as_deref(), Some("warn"));
    }

    #[test]
    fn test_render_scale_is_clamped() {
        let config = RendererConfig::from_toml_str("render_scale = 4.0").unwrap();
        assert_eq!(config.render_scale, 1.0);
        let config = RendererConfig::from_toml_str("render_scale = 0.0").unwrap();
        assert_eq!(config.render_scale, 0.1);
    }

    #[test]
    fn test_zero_extent_rejected() {
        let err = RendererConfig::from_toml_str("window_width = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        for field in ["fence_timeout_ns", "acquire_timeout_ns"] {
            let err = RendererConfig::from_toml_str(&format!("{field} = 0")).unwrap_err();
            assert!(matches!(err, Error::Config(ref msg) if msg.contains(field)));
        }
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = RendererConfig::from_toml_str("window_width = \"wide\"").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = RendererConfig::load("/nonexistent/ember/config.toml").unwrap();
        assert_eq!(config, RendererConfig::default());
    }
}
