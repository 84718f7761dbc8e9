//! Swapchain creation and the fixed selection policies.
//!
//! # Overview
//!
//! The [`Swapchain`] struct owns a `VkSwapchainKHR` and one image view per
//! swapchain image. Its configuration comes from three pure policies that
//! must stay exactly as documented so output looks the same on every device:
//!
//! - [`choose_surface_format`]: `B8G8R8A8_SRGB` with `SRGB_NONLINEAR`, else
//!   the first format the surface lists
//! - [`choose_present_mode`]: `MAILBOX`, else `FIFO`
//! - [`choose_extent`]: the surface's current extent, unless it is the
//!   `u32::MAX` sentinel, in which case the drawable size clamped into the
//!   surface's min/max extents
//!
//! A swapchain is never resized in place. When the surface goes stale the
//! whole resource set that depends on it is dropped and a new one built.

use ash::vk;
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};
use crate::gpu::{SharedDevice, SwapchainDesc};
use crate::image::ImageView;

/// Swapchain surface support details.
///
/// Contains information about what the surface supports for swapchain creation.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, current extent {}x{}",
            formats.len(),
            present_modes.len(),
            capabilities.current_extent.width,
            capabilities.current_extent.height
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Checks if the swapchain support is adequate for rendering.
    ///
    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Owned swapchain plus its image views.
pub struct Swapchain {
    device: SharedDevice,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Creates a swapchain for the surface's current capabilities.
    ///
    /// `drawable` is the window's pixel size, used only when the surface
    /// leaves the extent to the application.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Surface queries fail
    /// - The surface reports no formats or no present modes
    /// - Swapchain or image view creation fails
    pub fn new(device: SharedDevice, drawable: vk::Extent2D) -> RhiResult<Self> {
        let support = device.surface_support()?;

        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, drawable.width, drawable.height);
        let image_count = determine_image_count(&support.capabilities);

        let desc = SwapchainDesc {
            min_image_count: image_count,
            surface_format,
            extent,
            present_mode,
            pre_transform: support.capabilities.current_transform,
            old_swapchain: vk::SwapchainKHR::null(),
        };

        let swapchain = device.create_swapchain(&desc)?;
        let images = match device.swapchain_images(swapchain) {
            Ok(images) => images,
            Err(e) => {
                device.destroy_swapchain(swapchain);
                return Err(e);
            }
        };

        // Views drop before the swapchain if this fails part way.
        let mut this = Self {
            device: device.clone(),
            swapchain,
            images,
            image_views: Vec::new(),
            format: surface_format.format,
            extent,
            present_mode,
        };
        for &image in &this.images {
            this.image_views.push(ImageView::new(
                device.clone(),
                image,
                surface_format.format,
                vk::ImageAspectFlags::COLOR,
            )?);
        }

        info!(
            "Swapchain created: {}x{}, {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            this.images.len()
        );

        Ok(this)
    }

    /// Returns the swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Returns the swapchain image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the swapchain extent (resolution).
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the present mode.
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Returns the number of swapchain images.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Returns all swapchain images.
    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Returns all image views.
    #[inline]
    pub fn image_views(&self) -> &[ImageView] {
        &self.image_views
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        // Views of swapchain images go first; the images die with the swapchain.
        self.image_views.clear();
        self.device.destroy_swapchain(self.swapchain);
        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

/// Chooses the surface format.
///
/// Prefers B8G8R8A8_SRGB with SRGB_NONLINEAR color space, otherwise the
/// first format in the list. `formats` must not be empty.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or_else(|| {
            debug!("Preferred surface format unavailable, using {:?}", formats[0]);
            formats[0]
        })
}

/// Chooses the present mode.
///
/// Prefers MAILBOX; falls back to FIFO, which every surface supports.
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Chooses the swapchain extent (resolution).
///
/// If the current extent is not set (width is u32::MAX), clamps the
/// drawable size to the surface's min/max extents.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Determines the number of swapchain images to request.
///
/// One more than the minimum, capped at the maximum when the surface sets one
/// (`max_image_count == 0` means unlimited).
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}
