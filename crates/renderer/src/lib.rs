//! Frame pacing and swapchain lifecycle.
//!
//! This crate drives rendering on top of `renderer_rhi`:
//! - A ring of per-frame synchronization slots and the per-image fence table
//! - The frame orchestrator: acquire, submit, present, advance
//! - Recreation of every swapchain-dependent resource on resize or when the
//!   surface goes stale, with rendering paused while minimized
//! - Static scene upload and uniform data

pub mod depth_buffer;
mod error;
pub mod frame_manager;
pub mod frame_slots;
pub mod lifecycle;
pub mod resources;
pub mod ubo;

pub use error::{RendererError, RendererResult};
pub use frame_manager::{FrameContext, FrameOrchestrator, FrameOutcome, FrameState};
pub use lifecycle::{RecreateOutcome, SwapchainLifecycle};
pub use resources::{Scene, SwapchainResourceSet, TextureData};
