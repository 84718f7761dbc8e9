//! Images, image views, samplers and layout transitions.
//!
//! # Overview
//!
//! - [`DeviceImage`] owns a 2D image and the memory bound to it
//! - [`ImageView`] and [`Sampler`] own their handles
//! - [`LayoutTransition`] is the closed set of layout changes the upload path
//!   performs; anything else is rejected with
//!   [`RhiError::UnsupportedLayoutTransition`]
//! - [`find_depth_format`] picks the first supported depth format

use ash::vk;
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::gpu::{ImageDesc, SamplerDesc, SharedDevice};
use crate::memory::DeviceMemory;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// An image with its own device memory.
///
/// Drop destroys the image, then frees the memory.
pub struct DeviceImage {
    device: SharedDevice,
    image: vk::Image,
    format: vk::Format,
    extent: vk::Extent2D,
    memory: DeviceMemory,
}

impl DeviceImage {
    /// Creates an image and binds freshly allocated memory with `properties`.
    ///
    /// # Errors
    ///
    /// Returns an error if image creation, memory type selection, allocation
    /// or binding fails. Nothing is leaked on failure.
    pub fn new(
        device: SharedDevice,
        desc: &ImageDesc,
        properties: vk::MemoryPropertyFlags,
    ) -> RhiResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::InvalidHandle(
                "Image dimensions must be greater than 0".to_string(),
            ));
        }

        let image = device.create_image(desc)?;
        let requirements = device.image_memory_requirements(image);
        let memory = DeviceMemory::allocate(device.clone(), requirements, properties).and_then(
            |memory| {
                device.bind_image_memory(image, memory.handle())?;
                Ok(memory)
            },
        );
        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_image(image);
                return Err(e);
            }
        };

        debug!(
            "Created {}x{} image {:?} ({:?})",
            desc.extent.width, desc.extent.height, image, desc.format
        );

        Ok(Self {
            device,
            image,
            format: desc.format,
            extent: desc.extent,
            memory,
        })
    }

    /// Returns the Vulkan image handle.
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Memory backing the image.
    #[inline]
    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }
}

impl Drop for DeviceImage {
    fn drop(&mut self) {
        self.device.destroy_image(self.image);
        debug!("Destroyed image {:?}", self.image);
    }
}

/// Owned image view.
pub struct ImageView {
    device: SharedDevice,
    view: vk::ImageView,
}

impl ImageView {
    /// Creates a 2D view over the first mip level and array layer of `image`.
    pub fn new(
        device: SharedDevice,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RhiResult<Self> {
        let view = device.create_image_view(image, format, aspect)?;
        Ok(Self { device, view })
    }

    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        self.device.destroy_image_view(self.view);
    }
}

/// Owned sampler.
pub struct Sampler {
    device: SharedDevice,
    sampler: vk::Sampler,
}

impl Sampler {
    pub fn new(device: SharedDevice, desc: &SamplerDesc) -> RhiResult<Self> {
        let sampler = device.create_sampler(desc)?;
        debug!("Created sampler {:?}", sampler);
        Ok(Self { device, sampler })
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.device.destroy_sampler(self.sampler);
    }
}

/// Layout transitions performed while uploading images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutTransition {
    /// `UNDEFINED -> TRANSFER_DST_OPTIMAL`, before a buffer-to-image copy.
    UndefinedToTransferDst,
    /// `TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL`, after the copy.
    TransferDstToShaderRead,
}

/// Access masks and stages of one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    /// Classifies an old/new layout pair.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::UnsupportedLayoutTransition`] for every pair other
    /// than the two upload transitions.
    pub fn from_layouts(old: vk::ImageLayout, new: vk::ImageLayout) -> RhiResult<Self> {
        match (old, new) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => {
                Ok(Self::UndefinedToTransferDst)
            }
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
                Ok(Self::TransferDstToShaderRead)
            }
            _ => Err(RhiError::UnsupportedLayoutTransition { old, new }),
        }
    }

    pub fn layouts(self) -> (vk::ImageLayout, vk::ImageLayout) {
        match self {
            Self::UndefinedToTransferDst => (
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            Self::TransferDstToShaderRead => (
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
        }
    }

    pub fn masks(self) -> BarrierMasks {
        match self {
            Self::UndefinedToTransferDst => BarrierMasks {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            },
            Self::TransferDstToShaderRead => BarrierMasks {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            },
        }
    }

    /// Builds the color-aspect barrier for `image`.
    pub fn barrier(self, image: vk::Image) -> vk::ImageMemoryBarrier<'static> {
        let (old, new) = self.layouts();
        let masks = self.masks();
        vk::ImageMemoryBarrier::default()
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_subresource_range())
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access)
    }
}

/// Full color subresource of a single-mip, single-layer image.
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Returns the first candidate usable as an optimally tiled depth attachment.
///
/// # Errors
///
/// Returns [`RhiError::UnsupportedFormat`] if none of
/// [`DEPTH_FORMAT_CANDIDATES`] qualifies.
pub fn find_depth_format(device: &SharedDevice) -> RhiResult<vk::Format> {
    find_supported_format(
        device,
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    )
}

/// Returns the first of `candidates` whose `tiling` supports `features`.
pub fn find_supported_format(
    device: &SharedDevice,
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> RhiResult<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let properties = device.format_properties(format);
            match tiling {
                vk::ImageTiling::LINEAR => properties.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => properties.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| {
            RhiError::UnsupportedFormat(format!(
                "none of {candidates:?} supports {features:?} with {tiling:?} tiling"
            ))
        })
}

/// Whether a depth format carries a stencil component.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Bytes per texel of the uncompressed color formats the uploader accepts.
pub fn texel_size(format: vk::Format) -> Option<vk::DeviceSize> {
    match format {
        vk::Format::R8_UNORM | vk::Format::R8_SRGB => Some(1),
        vk::Format::R8G8_UNORM | vk::Format::R8G8_SRGB => Some(2),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R32_SFLOAT => Some(4),
        vk::Format::R16G16B16A16_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mock::{MockDevice, ObjectKind};

    #[test]
    fn test_upload_transitions_are_supported() {
        assert_eq!(
            LayoutTransition::from_layouts(
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL
            )
            .unwrap(),
            LayoutTransition::UndefinedToTransferDst
        );
        assert_eq!(
            LayoutTransition::from_layouts(
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            )
            .unwrap(),
            LayoutTransition::TransferDstToShaderRead
        );
    }

    #[test]
    fn test_other_transitions_are_rejected() {
        let pairs = [
            (
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
            (
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            (
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ),
            (
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            ),
        ];

        for (old, new) in pairs {
            let result = LayoutTransition::from_layouts(old, new);
            assert!(
                matches!(result, Err(RhiError::UnsupportedLayoutTransition { old: o, new: n }) if o == old && n == new)
            );
        }
    }

    #[test]
    fn test_barrier_masks() {
        let masks = LayoutTransition::UndefinedToTransferDst.masks();
        assert_eq!(masks.src_access, vk::AccessFlags::empty());
        assert_eq!(masks.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let masks = LayoutTransition::TransferDstToShaderRead.masks();
        assert_eq!(masks.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(masks.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_texel_size() {
        assert_eq!(texel_size(vk::Format::R8G8B8A8_SRGB), Some(4));
        assert_eq!(texel_size(vk::Format::R32G32B32A32_SFLOAT), Some(16));
        assert_eq!(texel_size(vk::Format::D32_SFLOAT), None);
    }

    #[test]
    fn test_has_stencil_component() {
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
        assert!(has_stencil_component(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
    }

    #[test]
    fn test_find_depth_format_prefers_d32() {
        let device: SharedDevice = Arc::new(MockDevice::new());
        assert_eq!(find_depth_format(&device).unwrap(), vk::Format::D32_SFLOAT);
    }

    #[test]
    fn test_find_supported_format_reports_missing_feature() {
        let device: SharedDevice = Arc::new(MockDevice::new());
        let result = find_supported_format(
            &device,
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        );
        assert!(matches!(result, Err(RhiError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_device_image_frees_memory_after_image() {
        let mock = Arc::new(MockDevice::new());
        let image = DeviceImage::new(
            mock.clone(),
            &ImageDesc {
                extent: vk::Extent2D {
                    width: 4,
                    height: 4,
                },
                format: vk::Format::R8G8B8A8_SRGB,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::SAMPLED,
            },
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .unwrap();
        assert_eq!(mock.live_count(ObjectKind::Image), 1);
        assert_eq!(mock.live_count(ObjectKind::Memory), 1);

        mock.clear_events();
        drop(image);

        let destroyed: Vec<ObjectKind> = mock
            .events()
            .into_iter()
            .filter_map(|event| match event {
                crate::mock::MockEvent::Destroy { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(destroyed, vec![ObjectKind::Image, ObjectKind::Memory]);
    }

    #[test]
    fn test_zero_sized_image_is_rejected() {
        let mock = Arc::new(MockDevice::new());
        let result = DeviceImage::new(
            mock.clone(),
            &ImageDesc {
                extent: vk::Extent2D {
                    width: 0,
                    height: 4,
                },
                format: vk::Format::R8G8B8A8_SRGB,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::SAMPLED,
            },
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        );
        assert!(result.is_err());
        assert_eq!(mock.live_total(), 0);
    }
}
