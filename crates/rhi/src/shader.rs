//! SPIR-V loading.
//!
//! Shaders are kept as validated SPIR-V words ([`ShaderCode`]) rather than as
//! live `VkShaderModule`s. The pipeline is rebuilt on every swapchain
//! recreation from the same words, and the device creates and destroys the
//! modules around each pipeline build.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use renderer_rhi::shader::{ShaderCode, ShaderStage};
//!
//! # fn example() -> Result<(), renderer_rhi::RhiError> {
//! let vertex = ShaderCode::from_spirv_file(Path::new("shaders/spirv/scene.vert.spv"), ShaderStage::Vertex)?;
//! assert_eq!(vertex.stage(), ShaderStage::Vertex);
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use ash::vk;
use tracing::debug;

use crate::error::{RhiError, RhiResult};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Shader stage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// Converts the shader stage to Vulkan shader stage flags.
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    /// Returns a human-readable name for the shader stage.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Validated SPIR-V for one stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderCode {
    stage: ShaderStage,
    words: Vec<u32>,
}

impl ShaderCode {
    /// Reads a SPIR-V binary from disk.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] if the file cannot be read or is not
    /// SPIR-V.
    pub fn from_spirv_file(path: &Path, stage: ShaderStage) -> RhiResult<Self> {
        debug!("Loading {} shader from {:?}", stage, path);

        let bytes = std::fs::read(path).map_err(|e| {
            RhiError::ShaderError(format!("Failed to read shader file {:?}: {}", path, e))
        })?;

        Self::from_spirv_bytes(&bytes, stage)
    }

    /// Parses SPIR-V from little-endian bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] if the length is not a multiple of 4,
    /// the module is empty or the magic number is missing.
    pub fn from_spirv_bytes(bytes: &[u8], stage: ShaderStage) -> RhiResult<Self> {
        if !bytes.len().is_multiple_of(4) {
            return Err(RhiError::ShaderError(format!(
                "SPIR-V code must be 4-byte aligned, got {} bytes",
                bytes.len()
            )));
        }

        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        match words.first() {
            Some(&SPIRV_MAGIC) => Ok(Self { stage, words }),
            Some(other) => Err(RhiError::ShaderError(format!(
                "{stage} shader has bad magic number {other:#010x}"
            ))),
            None => Err(RhiError::ShaderError(format!("{stage} shader is empty"))),
        }
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// SPIR-V words, ready for `VkShaderModuleCreateInfo::code`.
    #[inline]
    pub fn words(&self) -> &[u32] {
        &self.words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|word| word.to_le_bytes()).collect()
    }

    #[test]
    fn test_shader_stage_to_vk_stage() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn test_shader_stage_display() {
        assert_eq!(format!("{}", ShaderStage::Vertex), "vertex");
        assert_eq!(format!("{}", ShaderStage::Fragment), "fragment");
    }

    #[test]
    fn test_parses_little_endian_words() {
        let bytes = module_bytes(&[SPIRV_MAGIC, 0x0001_0000, 7]);
        let code = ShaderCode::from_spirv_bytes(&bytes, ShaderStage::Fragment).unwrap();
        assert_eq!(code.words(), &[SPIRV_MAGIC, 0x0001_0000, 7]);
        assert_eq!(code.stage(), ShaderStage::Fragment);
    }

    #[test]
    fn test_invalid_spirv_alignment() {
        let result = ShaderCode::from_spirv_bytes(&[0u8; 5], ShaderStage::Vertex);
        assert!(matches!(result, Err(RhiError::ShaderError(_))));
    }

    #[test]
    fn test_bad_magic_and_empty_are_rejected() {
        let bytes = module_bytes(&[0xdead_beef]);
        assert!(ShaderCode::from_spirv_bytes(&bytes, ShaderStage::Vertex).is_err());
        assert!(ShaderCode::from_spirv_bytes(&[], ShaderStage::Vertex).is_err());
    }

    #[test]
    fn test_missing_file_is_shader_error() {
        let result = ShaderCode::from_spirv_file(
            Path::new("definitely/not/here.spv"),
            ShaderStage::Vertex,
        );
        assert!(matches!(result, Err(RhiError::ShaderError(_))));
    }
}
