//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate wraps the Vulkan objects the renderer needs behind owned RAII
//! types. It handles:
//! - Instance, surface and device creation
//! - The [`GpuDevice`](gpu::GpuDevice) capability trait all wrappers talk to
//! - Swapchain creation and its selection policies
//! - Buffer, image and memory management, including staged uploads
//! - Command buffer recording and one-shot submission
//! - Render pass, pipeline and descriptor objects
//! - Semaphores and fences
//!
//! With the `mock` feature (always on for this crate's own tests) the
//! [`mock::MockDevice`] implements the trait in memory and records every call.

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod gpu;
pub mod image;
pub mod instance;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod upload;
pub mod vertex;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{RhiError, RhiResult, VkResultExt};

// Re-export ash types that users might need
pub use ash::vk;
