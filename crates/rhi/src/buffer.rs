//! GPU buffer management.
//!
//! # Overview
//!
//! - [`BufferUsage`] names the roles a buffer plays in the renderer and maps
//!   each to Vulkan usage flags and memory properties
//! - [`DeviceBuffer`] owns a `VkBuffer` and a dedicated [`DeviceMemory`]
//!
//! Device-local buffers are filled through [`Uploader`](crate::upload::Uploader);
//! host-visible ones can be written directly.
//!
//! # Example
//!
//! ```no_run
//! use renderer_rhi::buffer::{BufferUsage, DeviceBuffer};
//! use renderer_rhi::gpu::SharedDevice;
//!
//! # fn example(device: SharedDevice) -> Result<(), renderer_rhi::RhiError> {
//! let uniforms = DeviceBuffer::with_usage(device, BufferUsage::Uniform, 192)?;
//! uniforms.write(0, &[0u8; 192])?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::gpu::SharedDevice;
use crate::memory::DeviceMemory;

/// Host-visible and host-coherent: the placement of every staging buffer.
pub const HOST_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
        | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Buffer usage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex data, device-local, filled by upload
    Vertex,
    /// Index data, device-local, filled by upload
    Index,
    /// Per-image uniform data, rewritten by the host every frame
    Uniform,
    /// Transient source of an upload
    Staging,
    /// Transient destination of a readback
    Readback,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    ///
    /// Device-local kinds can be both copy source and destination so their
    /// contents can be read back.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        let transfer = vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC;
        match self {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER | transfer,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER | transfer,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferUsage::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    /// Memory properties the backing allocation must carry.
    pub fn memory_properties(self) -> vk::MemoryPropertyFlags {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            BufferUsage::Uniform | BufferUsage::Staging | BufferUsage::Readback => HOST_COHERENT,
        }
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
            BufferUsage::Readback => "readback",
        }
    }
}

/// A buffer with its own device memory.
///
/// Drop destroys the buffer, then frees the memory.
pub struct DeviceBuffer {
    device: SharedDevice,
    buffer: vk::Buffer,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory: DeviceMemory,
}

impl DeviceBuffer {
    /// Creates a buffer of `size` bytes bound to memory with `properties`.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero or if creation, memory type
    /// selection, allocation or binding fails. Nothing is leaked on failure.
    pub fn new(
        device: SharedDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer = device.create_buffer(size, usage)?;
        let requirements = device.buffer_memory_requirements(buffer);
        let memory = DeviceMemory::allocate(device.clone(), requirements, properties).and_then(
            |memory| {
                device.bind_buffer_memory(buffer, memory.handle())?;
                Ok(memory)
            },
        );
        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_buffer(buffer);
                return Err(e);
            }
        };

        debug!("Created buffer {:?}: {} bytes ({:?})", buffer, size, usage);

        Ok(Self {
            device,
            buffer,
            size,
            usage,
            memory,
        })
    }

    /// Creates a buffer for one of the renderer's fixed roles.
    pub fn with_usage(
        device: SharedDevice,
        usage: BufferUsage,
        size: vk::DeviceSize,
    ) -> RhiResult<Self> {
        Self::new(
            device,
            size,
            usage.to_vk_usage(),
            usage.memory_properties(),
        )
    }

    /// Writes `data` at `offset`. The buffer must be host-visible.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.memory.write(offset, data)
    }

    /// Reads `out.len()` bytes from `offset`. The buffer must be host-visible.
    pub fn read(&self, offset: vk::DeviceSize, out: &mut [u8]) -> RhiResult<()> {
        self.memory.read(offset, out)
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    #[inline]
    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.device.destroy_buffer(self.buffer);
        debug!("Destroyed buffer {:?}", self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mock::{MockDevice, MockEvent, ObjectKind};

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
        assert_eq!(
            BufferUsage::Readback.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_DST
        );
    }

    #[test]
    fn test_buffer_usage_memory_properties() {
        assert_eq!(
            BufferUsage::Vertex.memory_properties(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        );
        assert_eq!(BufferUsage::Uniform.memory_properties(), HOST_COHERENT);
        assert_eq!(BufferUsage::Staging.memory_properties(), HOST_COHERENT);
    }

    #[test]
    fn test_buffer_usage_name() {
        assert_eq!(BufferUsage::Vertex.name(), "vertex");
        assert_eq!(BufferUsage::Index.name(), "index");
        assert_eq!(BufferUsage::Uniform.name(), "uniform");
        assert_eq!(BufferUsage::Staging.name(), "staging");
        assert_eq!(BufferUsage::Readback.name(), "readback");
    }

    #[test]
    fn test_host_visible_write_and_read() {
        let mock = Arc::new(MockDevice::new());
        let buffer = DeviceBuffer::with_usage(mock.clone(), BufferUsage::Uniform, 16).unwrap();

        buffer.write(4, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 8];
        buffer.read(0, &mut out).unwrap();
        assert_eq!(out, [0, 0, 0, 0, 1, 2, 3, 4]);

        assert!(matches!(
            buffer.write(14, &[0; 4]),
            Err(RhiError::OutOfBounds(_))
        ));
    }

    #[test]
    fn test_device_local_is_not_mappable() {
        let mock = Arc::new(MockDevice::new());
        let buffer = DeviceBuffer::with_usage(mock.clone(), BufferUsage::Vertex, 16).unwrap();
        assert!(buffer.write(0, &[1]).is_err());
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let mock = Arc::new(MockDevice::new());
        assert!(DeviceBuffer::with_usage(mock.clone(), BufferUsage::Staging, 0).is_err());
        assert_eq!(mock.live_total(), 0);
    }

    #[test]
    fn test_failed_allocation_destroys_buffer() {
        let mut properties = crate::mock::default_memory_properties();
        properties.memory_type_count = 1;
        let mock = Arc::new(MockDevice::with_memory_properties(properties));

        let result = DeviceBuffer::with_usage(mock.clone(), BufferUsage::Staging, 64);
        assert!(matches!(
            result,
            Err(RhiError::NoSuitableMemoryType { .. })
        ));
        assert_eq!(mock.live_count(ObjectKind::Buffer), 0);
        assert_eq!(mock.live_count(ObjectKind::Memory), 0);
    }

    #[test]
    fn test_drop_order_buffer_then_memory() {
        let mock = Arc::new(MockDevice::new());
        let buffer = DeviceBuffer::with_usage(mock.clone(), BufferUsage::Staging, 8).unwrap();
        mock.clear_events();
        drop(buffer);

        let kinds: Vec<ObjectKind> = mock
            .events()
            .into_iter()
            .filter_map(|event| match event {
                MockEvent::Destroy { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![ObjectKind::Buffer, ObjectKind::Memory]);
    }
}
