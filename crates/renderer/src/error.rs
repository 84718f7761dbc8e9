//! Renderer error types.

use renderer_rhi::RhiError;
use thiserror::Error;

/// Errors surfaced by the frame loop and swapchain lifecycle.
#[derive(Error, Debug)]
pub enum RendererError {
    /// Any RHI failure, including the tagged Vulkan results that are fatal
    /// at runtime.
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// A frame was requested after shutdown began.
    #[error("Renderer is draining; no further frames can be drawn")]
    Draining,

    /// The frame slot ring needs at least one slot.
    #[error("At least one frame in flight is required")]
    ZeroFramesInFlight,
}

/// Result type for renderer operations.
pub type RendererResult<T> = Result<T, RendererError>;
