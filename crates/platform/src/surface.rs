//! Presentation surface plumbing between the window and Vulkan.
//!
//! - [`SurfaceProvider`] is what the renderer asks about the drawable area
//! - [`required_extensions`] lists the instance extensions the window system
//!   needs, before the instance exists
//! - [`create_surface`] creates the `VkSurfaceKHR` for a window and hands its
//!   ownership to [`renderer_rhi::surface::Surface`]

use std::ffi::c_char;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

use renderer_rhi::instance::Instance;
use renderer_rhi::surface::Surface;
use renderer_rhi::{RhiError, RhiResult};

/// Drawable-area queries the swapchain lifecycle depends on.
pub trait SurfaceProvider {
    /// Current drawable size in physical pixels.
    fn drawable_size(&self) -> vk::Extent2D;

    fn is_minimized(&self) -> bool;

    /// Rendering is paused while minimized or while either dimension is zero.
    fn is_paused(&self) -> bool {
        let size = self.drawable_size();
        self.is_minimized() || size.width == 0 || size.height == 0
    }
}

/// Instance extensions needed to create surfaces for `window`'s display.
///
/// The returned pointers reference static strings owned by `ash-window`.
pub fn required_extensions(window: &impl HasDisplayHandle) -> RhiResult<Vec<*const c_char>> {
    let display = window
        .display_handle()
        .map_err(|e| RhiError::SurfaceError(format!("Failed to get display handle: {e}")))?;

    let extensions = ash_window::enumerate_required_extensions(display.as_raw())
        .map_err(|e| RhiError::Vulkan {
            operation: "vkEnumerateInstanceExtensionProperties",
            result: e,
        })?;
    debug!("{} surface extension(s) required", extensions.len());
    Ok(extensions.to_vec())
}

/// Creates a presentation surface for `window` on `instance`.
///
/// # Errors
///
/// Returns [`RhiError::SurfaceError`] if the window handles are unavailable,
/// or the tagged Vulkan error if surface creation fails.
pub fn create_surface<W>(instance: &Arc<Instance>, window: &W) -> RhiResult<Surface>
where
    W: HasDisplayHandle + HasWindowHandle,
{
    let display = window
        .display_handle()
        .map_err(|e| RhiError::SurfaceError(format!("Failed to get display handle: {e}")))?;
    let handle = window
        .window_handle()
        .map_err(|e| RhiError::SurfaceError(format!("Failed to get window handle: {e}")))?;

    // SAFETY: the handles come from a live window and the instance was
    // created with the extensions from `required_extensions`.
    let surface = unsafe {
        ash_window::create_surface(
            instance.entry(),
            instance.handle(),
            display.as_raw(),
            handle.as_raw(),
            None,
        )
        .map_err(|e| RhiError::Vulkan {
            operation: "vkCreateSurfaceKHR",
            result: e,
        })?
    };

    info!("Vulkan surface created");
    Ok(Surface::from_raw(Arc::clone(instance), surface))
}
