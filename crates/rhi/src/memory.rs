//! Device memory type selection and raw allocations.
//!
//! Every allocation in the renderer picks its memory type through
//! [`select_memory_type`]: the first type, by ascending index, that the
//! resource accepts and that carries all requested property flags. The choice
//! is a pure function of its inputs so the same device always yields the same
//! placement.

use ash::vk;
use tracing::{debug, trace};

use crate::error::{RhiError, RhiResult};
use crate::gpu::SharedDevice;

/// Picks a memory type index for a resource.
///
/// # Arguments
///
/// * `properties` - The physical device's memory type table
/// * `type_bits` - `memoryTypeBits` from the resource's memory requirements
/// * `required` - Property flags the memory type must include
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableMemoryType`] when no type matches. This is a
/// capability gap of the device and is never retried.
pub fn select_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> RhiResult<u32> {
    let count = (properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);

    properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(index, _)| index as u32)
        .ok_or(RhiError::NoSuitableMemoryType {
            type_bits,
            required,
        })
}

/// An owned `VkDeviceMemory` allocation.
///
/// Freed on drop. Objects bound to it must be destroyed first, which the
/// owning wrappers guarantee by declaring this field last.
pub struct DeviceMemory {
    device: SharedDevice,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    properties: vk::MemoryPropertyFlags,
}

impl DeviceMemory {
    /// Allocates memory satisfying `requirements` with at least `properties`.
    ///
    /// # Errors
    ///
    /// Returns an error if no memory type matches or the allocation fails.
    pub fn allocate(
        device: SharedDevice,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> RhiResult<Self> {
        let type_index = select_memory_type(
            &device.memory_properties(),
            requirements.memory_type_bits,
            properties,
        )?;

        let memory = device.allocate_memory(requirements.size, type_index)?;

        debug!(
            "Allocated {} bytes from memory type {} ({:?})",
            requirements.size, type_index, properties
        );

        Ok(Self {
            device,
            memory,
            size: requirements.size,
            properties,
        })
    }

    /// Returns the Vulkan memory handle.
    #[inline]
    pub fn handle(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Size of the allocation in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Copies `data` into the allocation at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory is not host-visible, the range does not
    /// fit, or mapping fails.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        self.check_host_range(offset, data.len())?;
        trace!("Writing {} bytes at offset {}", data.len(), offset);
        self.device.write_memory(self.memory, offset, data)
    }

    /// Copies `out.len()` bytes starting at `offset` out of the allocation.
    pub fn read(&self, offset: vk::DeviceSize, out: &mut [u8]) -> RhiResult<()> {
        self.check_host_range(offset, out.len())?;
        self.device.read_memory(self.memory, offset, out)
    }

    fn check_host_range(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<()> {
        if !self
            .properties
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        {
            return Err(RhiError::InvalidHandle(
                "memory is not host-visible".to_string(),
            ));
        }
        let end = offset.checked_add(len as vk::DeviceSize);
        if end.is_none_or(|end| end > self.size) {
            return Err(RhiError::OutOfBounds(format!(
                "range {}..{} exceeds allocation of {} bytes",
                offset,
                offset.saturating_add(len as vk::DeviceSize),
                self.size
            )));
        }
        Ok(())
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        self.device.free_memory(self.memory);
        debug!("Freed {} bytes of device memory", self.size);
    }
}
