//! Host-to-device transfers through staging buffers.
//!
//! [`Uploader`] moves bytes into device-local buffers and images. Every call
//! is synchronous: it allocates a host-visible staging buffer sized exactly to
//! the payload, records a one-time command buffer, submits it to the graphics
//! queue, waits for the queue to go idle and releases the staging buffer
//! before returning.
//!
//! Images are copied between exactly two layout transitions,
//! `UNDEFINED -> TRANSFER_DST_OPTIMAL` and
//! `TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL`; see
//! [`LayoutTransition`].
//!
//! Payloads are plain bytes. Typed data is serialized with `bytemuck`, which
//! yields the host's native byte order; the renderer only targets
//! little-endian hosts (see [`vertex`](crate::vertex)).

use ash::vk;
use tracing::{debug, trace};

use crate::buffer::{BufferUsage, DeviceBuffer, HOST_COHERENT};
use crate::command::{CommandBuffer, CommandPool, submit_one_time};
use crate::error::{RhiError, RhiResult};
use crate::gpu::SharedDevice;
use crate::image::{DeviceImage, LayoutTransition, texel_size};

/// Synchronous staging uploader with its own transient command pool.
pub struct Uploader {
    device: SharedDevice,
    pool: CommandPool,
}

impl Uploader {
    pub fn new(device: SharedDevice) -> RhiResult<Self> {
        let pool = CommandPool::new_transient(device.clone())?;
        Ok(Self { device, pool })
    }

    /// Uploads `data` into a new device-local buffer with `usage`.
    ///
    /// The destination also carries `TRANSFER_DST` and `TRANSFER_SRC` so it
    /// can be filled here and later read back.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is empty, no memory type fits, or any
    /// Vulkan call fails. Staging resources are released in every case.
    pub fn upload(&self, usage: vk::BufferUsageFlags, data: &[u8]) -> RhiResult<DeviceBuffer> {
        let staging = self.staging_with(data)?;
        let size = staging.size();

        let destination = DeviceBuffer::new(
            self.device.clone(),
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        submit_one_time(&self.pool, |cmd| {
            cmd.copy_buffer(
                staging.handle(),
                destination.handle(),
                &[vk::BufferCopy::default()
                    .src_offset(0)
                    .dst_offset(0)
                    .size(size)],
            );
            Ok(())
        })?;

        debug!(
            "Uploaded {} bytes into buffer {:?}",
            size,
            destination.handle()
        );
        Ok(destination)
    }

    /// Uploads into a buffer for one of the renderer's fixed roles.
    pub fn upload_with_usage(&self, usage: BufferUsage, data: &[u8]) -> RhiResult<DeviceBuffer> {
        self.upload(usage.to_vk_usage(), data)
    }

    /// Copies tightly packed texel rows into `image` and leaves it in
    /// `SHADER_READ_ONLY_OPTIMAL`.
    ///
    /// `image` must be freshly created (its contents are discarded by the
    /// transition from `UNDEFINED`) and must allow `TRANSFER_DST` usage.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::OutOfBounds`] when `width` x `height` does not fit
    /// the image or `data` is not exactly that many texels, and
    /// [`RhiError::UnsupportedFormat`] for formats without a known texel size.
    /// Both are checked before anything is allocated.
    pub fn upload_to_image(
        &self,
        image: &DeviceImage,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> RhiResult<()> {
        check_image_payload(image, width, height, data.len())?;
        let staging = self.staging_with(data)?;

        submit_one_time(&self.pool, |cmd| {
            record_transition(
                cmd,
                image.handle(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;

            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(1),
                )
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                });
            cmd.copy_buffer_to_image(
                staging.handle(),
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            record_transition(
                cmd,
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })?;

        debug!(
            "Uploaded {}x{} texels ({} bytes) into image {:?}",
            width,
            height,
            data.len(),
            image.handle()
        );
        Ok(())
    }

    /// Runs a single layout transition on `image` as its own submission.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::UnsupportedLayoutTransition`] for any pair other
    /// than the two upload transitions, before anything is recorded.
    pub fn transition_image_layout(
        &self,
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> RhiResult<()> {
        LayoutTransition::from_layouts(old, new)?;
        submit_one_time(&self.pool, |cmd| record_transition(cmd, image, old, new))
    }

    /// Copies the first `size` bytes of `buffer` back to the host.
    ///
    /// `buffer` must allow `TRANSFER_SRC`; buffers created by
    /// [`upload`](Self::upload) do.
    pub fn read_back(&self, buffer: &DeviceBuffer, size: vk::DeviceSize) -> RhiResult<Vec<u8>> {
        if size > buffer.size() {
            return Err(RhiError::OutOfBounds(format!(
                "read of {} bytes from a {} byte buffer",
                size,
                buffer.size()
            )));
        }
        let readback = DeviceBuffer::with_usage(self.device.clone(), BufferUsage::Readback, size)?;

        submit_one_time(&self.pool, |cmd| {
            cmd.copy_buffer(
                buffer.handle(),
                readback.handle(),
                &[vk::BufferCopy::default().size(size)],
            );
            Ok(())
        })?;

        let mut bytes = vec![0; size as usize];
        readback.read(0, &mut bytes)?;
        trace!("Read back {} bytes from buffer {:?}", size, buffer.handle());
        Ok(bytes)
    }

    fn staging_with(&self, data: &[u8]) -> RhiResult<DeviceBuffer> {
        let staging = DeviceBuffer::new(
            self.device.clone(),
            data.len() as vk::DeviceSize,
            BufferUsage::Staging.to_vk_usage(),
            HOST_COHERENT,
        )?;
        staging.write(0, data)?;
        Ok(staging)
    }
}

fn record_transition(
    cmd: &CommandBuffer,
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> RhiResult<()> {
    let transition = LayoutTransition::from_layouts(old, new)?;
    let masks = transition.masks();
    cmd.image_barrier(masks.src_stage, masks.dst_stage, &transition.barrier(image));
    Ok(())
}

fn check_image_payload(image: &DeviceImage, width: u32, height: u32, len: usize) -> RhiResult<()> {
    let format = image.format();
    let texel = texel_size(format)
        .ok_or_else(|| RhiError::UnsupportedFormat(format!("no texel size for {format:?}")))?;

    let extent = image.extent();
    if width == 0 || height == 0 || width > extent.width || height > extent.height {
        return Err(RhiError::OutOfBounds(format!(
            "{}x{} region in a {}x{} image",
            width, height, extent.width, extent.height
        )));
    }

    let expected = vk::DeviceSize::from(width) * vk::DeviceSize::from(height) * texel;
    if len as vk::DeviceSize != expected {
        return Err(RhiError::OutOfBounds(format!(
            "{len} bytes for {width}x{height} {format:?} texels, expected {expected}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::gpu::ImageDesc;
    use crate::mock::{MockDevice, MockEvent, ObjectKind, RecordedCommand};

    fn uploader() -> (Arc<MockDevice>, Uploader) {
        let mock = Arc::new(MockDevice::new());
        let uploader = Uploader::new(mock.clone()).unwrap();
        (mock, uploader)
    }

    #[test]
    fn test_buffer_round_trip() {
        let (mock, uploader) = uploader();
        let payload: Vec<u8> = (0..=255).collect();

        let buffer = uploader
            .upload(vk::BufferUsageFlags::STORAGE_BUFFER, &payload)
            .unwrap();
        let bytes = uploader.read_back(&buffer, payload.len() as u64).unwrap();

        assert_eq!(bytes, payload);
        assert!(mock.violations().is_empty());
    }

    #[test]
    fn test_staging_is_released() {
        let (mock, uploader) = uploader();
        let _buffer = uploader
            .upload_with_usage(BufferUsage::Index, &[1, 0, 2, 0, 3, 0])
            .unwrap();

        assert_eq!(mock.live_count(ObjectKind::Buffer), 1);
        assert_eq!(mock.live_count(ObjectKind::Memory), 1);
        assert_eq!(mock.live_count(ObjectKind::CommandBuffer), 0);
    }

    #[test]
    fn test_empty_payload_is_rejected() {
        let (mock, uploader) = uploader();
        assert!(uploader.upload_with_usage(BufferUsage::Vertex, &[]).is_err());
        assert_eq!(mock.live_count(ObjectKind::Buffer), 0);
    }

    #[test]
    fn test_image_upload_ends_shader_readable() {
        let (mock, uploader) = uploader();
        let image = DeviceImage::new(
            mock.clone(),
            &ImageDesc {
                extent: vk::Extent2D {
                    width: 2,
                    height: 2,
                },
                format: vk::Format::R8G8B8A8_SRGB,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            },
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .unwrap();
        let texels: Vec<u8> = (0..16).collect();
        mock.clear_events();

        uploader.upload_to_image(&image, 2, 2, &texels).unwrap();

        assert_eq!(
            mock.image_layout(image.handle()),
            Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        );
        assert_eq!(
            mock.memory_contents(image.memory().handle()).unwrap(),
            texels
        );

        let recorded: Vec<RecordedCommand> = mock
            .events()
            .into_iter()
            .filter_map(|event| match event {
                MockEvent::Record { command, .. } => Some(command),
                _ => None,
            })
            .collect();
        assert_eq!(recorded.len(), 3);
        assert!(matches!(
            recorded[0],
            RecordedCommand::ImageBarrier {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                ..
            }
        ));
        assert!(matches!(recorded[1], RecordedCommand::CopyBufferToImage { .. }));
        assert!(matches!(
            recorded[2],
            RecordedCommand::ImageBarrier {
                old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                ..
            }
        ));
        assert!(mock.violations().is_empty());
    }

    fn rgba_image(mock: &Arc<MockDevice>, width: u32, height: u32) -> DeviceImage {
        DeviceImage::new(
            mock.clone(),
            &ImageDesc {
                extent: vk::Extent2D { width, height },
                format: vk::Format::R8G8B8A8_SRGB,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            },
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .unwrap()
    }

    #[test]
    fn test_short_image_payload_is_rejected_before_staging() {
        let (mock, uploader) = uploader();
        let image = rgba_image(&mock, 4, 4);
        mock.clear_events();

        let result = uploader.upload_to_image(&image, 4, 4, &[0; 4]);

        assert!(matches!(result, Err(RhiError::OutOfBounds(_))));
        assert_eq!(mock.live_count(ObjectKind::Buffer), 0);
        assert!(mock.events().is_empty());
        assert!(mock.violations().is_empty(), "{:?}", mock.violations());
    }

    #[test]
    fn test_image_region_must_fit_the_image() {
        let (mock, uploader) = uploader();
        let image = rgba_image(&mock, 2, 2);

        let texels = [0u8; 4 * 4 * 4];
        assert!(matches!(
            uploader.upload_to_image(&image, 4, 4, &texels),
            Err(RhiError::OutOfBounds(_))
        ));
        assert!(matches!(
            uploader.upload_to_image(&image, 0, 2, &[]),
            Err(RhiError::OutOfBounds(_))
        ));
        // A long payload is as wrong as a short one.
        assert!(matches!(
            uploader.upload_to_image(&image, 2, 2, &texels),
            Err(RhiError::OutOfBounds(_))
        ));
        assert!(mock.violations().is_empty(), "{:?}", mock.violations());
    }

    #[test]
    fn test_unsupported_transition_records_nothing() {
        let (mock, uploader) = uploader();
        mock.clear_events();

        let result = uploader.transition_image_layout(
            vk::Image::null(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );

        assert!(matches!(
            result,
            Err(RhiError::UnsupportedLayoutTransition { .. })
        ));
        assert!(mock.events().is_empty());
    }

    #[test]
    fn test_read_back_past_end_is_rejected() {
        let (_mock, uploader) = uploader();
        let buffer = uploader
            .upload_with_usage(BufferUsage::Vertex, &[0; 8])
            .unwrap();
        assert!(matches!(
            uploader.read_back(&buffer, 16),
            Err(RhiError::OutOfBounds(_))
        ));
    }
}
