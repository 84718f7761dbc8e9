//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// A Vulkan call failed; `operation` names the call.
    #[error("{operation} failed: {result}")]
    Vulkan {
        operation: &'static str,
        result: vk::Result,
    },

    /// Vulkan API error without operation context
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// No memory type satisfies both the resource's type mask and the
    /// requested property flags
    #[error("No suitable memory type (type bits {type_bits:#b}, required {required:?})")]
    NoSuitableMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    /// Layout transition outside the supported upload transitions
    #[error("Unsupported layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// No candidate format is supported by the device
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Shader loading error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface query or creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// Access outside an allocation
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),
}

impl RhiError {
    /// Returns the raw Vulkan result code, if this error carries one.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            Self::Vulkan { result, .. } | Self::VulkanError(result) => Some(*result),
            _ => None,
        }
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

/// Attaches the originating operation name to raw Vulkan results.
pub trait VkResultExt<T> {
    /// Converts a raw Vulkan result into an [`RhiResult`] tagged with `operation`.
    fn during(self, operation: &'static str) -> RhiResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn during(self, operation: &'static str) -> RhiResult<T> {
        self.map_err(|result| RhiError::Vulkan { operation, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_during_names_operation() {
        let raw: Result<(), vk::Result> = Err(vk::Result::ERROR_DEVICE_LOST);
        let err = raw.during("vkQueueSubmit").unwrap_err();
        assert_eq!(err.to_string(), format!("vkQueueSubmit failed: {}", vk::Result::ERROR_DEVICE_LOST));
        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_DEVICE_LOST));
    }

    #[test]
    fn test_non_vulkan_errors_have_no_result_code() {
        assert_eq!(RhiError::NoSuitableGpu.vk_result(), None);
    }
}
