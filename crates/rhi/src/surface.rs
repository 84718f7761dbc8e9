//! Window surface ownership.
//!
//! The platform layer creates the raw `VkSurfaceKHR` through `ash-window`;
//! [`Surface`] takes ownership of it and destroys it before the instance it
//! came from.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::instance::Instance;

/// RAII wrapper around a `VkSurfaceKHR` and its extension loader.
pub struct Surface {
    surface: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
    // Keeps the instance alive until the surface is gone.
    instance: Arc<Instance>,
}

impl Surface {
    /// Takes ownership of a surface created on `instance`.
    pub fn from_raw(instance: Arc<Instance>, surface: vk::SurfaceKHR) -> Self {
        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        debug!("Surface {:?} adopted", surface);
        Self {
            surface,
            loader,
            instance,
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }

    #[inline]
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
        debug!("Surface destroyed");
    }
}
