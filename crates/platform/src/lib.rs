//! Platform abstraction layer for the Vulkan renderer.
//!
//! This crate provides platform-specific functionality:
//! - Window management via winit
//! - The drawable-size and minimized-state queries the renderer polls
//! - Vulkan surface creation from raw window handles

pub mod surface;
mod window;

pub use surface::{SurfaceProvider, create_surface, required_extensions};
pub use window::Window;

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
