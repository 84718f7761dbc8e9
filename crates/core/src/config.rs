//! Renderer configuration.
//!
//! Settings are read from a TOML file. Every field has a default so an empty
//! or missing file yields a usable configuration:
//!
//! ```toml
//! frames_in_flight = 2
//! validation = true
//! shader_dir = "shaders/spirv"
//!
//! [window]
//! title = "Vulkan Renderer"
//! width = 800
//! height = 600
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Largest supported number of frames in flight.
pub const MAX_FRAMES_IN_FLIGHT_LIMIT: usize = 4;

/// Top-level renderer settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    /// Initial window settings.
    pub window: WindowConfig,
    /// Number of frames the CPU may queue ahead of the GPU.
    pub frames_in_flight: usize,
    /// Enable the Khronos validation layer when it is installed.
    pub validation: bool,
    /// Directory holding compiled SPIR-V shaders.
    pub shader_dir: PathBuf,
}

/// Initial window settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            frames_in_flight: 2,
            validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("shaders/spirv"),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Renderer".to_string(),
            width: 800,
            height: 600,
        }
    }
}

impl RendererConfig {
    /// Loads the configuration at `path`, or the defaults when the file does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, does not parse,
    /// or holds values rejected by [`RendererConfig::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No configuration at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT_LIMIT {
            return Err(Error::Config(format!(
                "frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT_LIMIT, self.frames_in_flight
            )));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = RendererConfig::from_toml_str("").unwrap();
        assert_eq!(config, RendererConfig::default());
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
    }

    #[test]
    fn test_partial_window_section() {
        let config = RendererConfig::from_toml_str(
            r#"
            frames_in_flight = 3

            [window]
            width = 1024
            "#,
        )
        .unwrap();

        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.window.title, "Vulkan Renderer");
    }

    #[test]
    fn test_rejects_zero_frames_in_flight() {
        let result = RendererConfig::from_toml_str("frames_in_flight = 0");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_too_many_frames_in_flight() {
        let result = RendererConfig::from_toml_str("frames_in_flight = 9");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_window() {
        let result = RendererConfig::from_toml_str("[window]\nheight = 0");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_key_is_a_parse_error() {
        let result = RendererConfig::from_toml_str("frames_in_flite = 2");
        assert!(matches!(result, Err(Error::ConfigParse(_))));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = RendererConfig::load(Path::new("does/not/exist/renderer.toml")).unwrap();
        assert_eq!(config, RendererConfig::default());
    }
}
