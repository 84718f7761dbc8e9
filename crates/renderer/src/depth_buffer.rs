//! Depth buffer management.
//!
//! A [`DepthBuffer`] is a device-local depth image with an associated view,
//! sized to the swapchain extent and rebuilt with it. The format comes from
//! [`find_depth_format`](renderer_rhi::image::find_depth_format) and is
//! chosen once per device.

use ash::vk;
use tracing::debug;

use renderer_rhi::RhiResult;
use renderer_rhi::gpu::{ImageDesc, SharedDevice};
use renderer_rhi::image::{DeviceImage, ImageView, has_stencil_component};

/// Depth image and view.
pub struct DepthBuffer {
    // The view must go before the image.
    view: ImageView,
    image: DeviceImage,
    format: vk::Format,
}

impl DepthBuffer {
    /// Creates a depth attachment covering `extent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the image, its memory or its view cannot be
    /// created. Nothing is leaked on failure.
    pub fn new(device: SharedDevice, extent: vk::Extent2D, format: vk::Format) -> RhiResult<Self> {
        let image = DeviceImage::new(
            device.clone(),
            &ImageDesc {
                extent,
                format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            },
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let view = ImageView::new(
            device,
            image.handle(),
            format,
            vk::ImageAspectFlags::DEPTH,
        )?;

        debug!(
            "Created depth buffer: {}x{}, {:?}{}",
            extent.width,
            extent.height,
            format,
            if has_stencil_component(format) {
                " (with stencil)"
            } else {
                ""
            }
        );

        Ok(Self {
            view,
            image,
            format,
        })
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view.handle()
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image.handle()
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ash::vk::Handle;
    use renderer_rhi::mock::{MockDevice, MockEvent, ObjectKind};

    use super::*;

    #[test]
    fn test_depth_buffer_matches_extent() {
        let mock = Arc::new(MockDevice::new());
        let extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        let depth = DepthBuffer::new(mock.clone(), extent, vk::Format::D32_SFLOAT).unwrap();

        assert_eq!(depth.extent(), extent);
        assert_eq!(depth.format(), vk::Format::D32_SFLOAT);
        assert_eq!(mock.live_count(ObjectKind::Image), 1);
        assert_eq!(mock.live_count(ObjectKind::ImageView), 1);
        assert_eq!(mock.live_count(ObjectKind::Memory), 1);
    }

    #[test]
    fn test_view_is_destroyed_before_image() {
        let mock = Arc::new(MockDevice::new());
        let extent = vk::Extent2D {
            width: 64,
            height: 64,
        };
        let depth = DepthBuffer::new(mock.clone(), extent, vk::Format::D32_SFLOAT).unwrap();
        let view = depth.view().as_raw();
        let image = depth.image().as_raw();
        mock.clear_events();
        drop(depth);

        let destroyed: Vec<_> = mock
            .events()
            .into_iter()
            .filter_map(|event| match event {
                MockEvent::Destroy { kind, handle } => Some((kind, handle)),
                _ => None,
            })
            .collect();
        assert_eq!(destroyed[0], (ObjectKind::ImageView, view));
        assert_eq!(destroyed[1], (ObjectKind::Image, image));
        assert_eq!(mock.live_total(), 0);
    }
}
