//! Descriptor set layouts, pools and updates.
//!
//! - [`DescriptorSetLayout`] describes the bindings a pipeline expects
//! - [`DescriptorPool`] hands out sets; sets are freed with the pool
//! - [`DescriptorBinding`] helpers build the two bindings the scene uses
//!
//! # Example
//!
//! ```no_run
//! use renderer_rhi::descriptor::{DescriptorPool, DescriptorSetLayout, uniform_buffer_binding};
//! use renderer_rhi::gpu::SharedDevice;
//!
//! # fn example(device: SharedDevice) -> Result<(), renderer_rhi::RhiError> {
//! let layout = DescriptorSetLayout::new(device.clone(), &[uniform_buffer_binding(0)])?;
//! let pool = DescriptorPool::for_layout(device, layout.bindings(), 3)?;
//! let sets = pool.allocate(&layout, 3)?;
//! assert_eq!(sets.len(), 3);
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::debug;

use crate::error::RhiResult;
use crate::gpu::{DescriptorBinding, DescriptorWrite, SharedDevice};

/// Uniform buffer read by the vertex stage.
pub fn uniform_buffer_binding(binding: u32) -> DescriptorBinding {
    DescriptorBinding {
        binding,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        stages: vk::ShaderStageFlags::VERTEX,
    }
}

/// Combined image sampler read by the fragment stage.
pub fn combined_image_sampler_binding(binding: u32) -> DescriptorBinding {
    DescriptorBinding {
        binding,
        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        stages: vk::ShaderStageFlags::FRAGMENT,
    }
}

/// Descriptor set layout wrapper.
pub struct DescriptorSetLayout {
    device: SharedDevice,
    layout: vk::DescriptorSetLayout,
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayout {
    pub fn new(device: SharedDevice, bindings: &[DescriptorBinding]) -> RhiResult<Self> {
        let layout = device.create_descriptor_set_layout(bindings)?;
        debug!(
            "Created descriptor set layout {:?} with {} bindings",
            layout,
            bindings.len()
        );
        Ok(Self {
            device,
            layout,
            bindings: bindings.to_vec(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    #[inline]
    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        self.device.destroy_descriptor_set_layout(self.layout);
        debug!("Destroyed descriptor set layout {:?}", self.layout);
    }
}

/// Descriptor pool wrapper.
///
/// Sets allocated from the pool stay valid until the pool is dropped.
pub struct DescriptorPool {
    device: SharedDevice,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    pub fn new(
        device: SharedDevice,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let pool = device.create_descriptor_pool(pool_sizes, max_sets)?;
        debug!("Created descriptor pool {:?} (max {} sets)", pool, max_sets);
        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Creates a pool with room for `set_count` sets of `bindings`.
    pub fn for_layout(
        device: SharedDevice,
        bindings: &[DescriptorBinding],
        set_count: u32,
    ) -> RhiResult<Self> {
        Self::new(device, set_count, &pool_sizes(bindings, set_count))
    }

    /// Allocates `count` sets with `layout`.
    pub fn allocate(
        &self,
        layout: &DescriptorSetLayout,
        count: usize,
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout.handle(); count];
        self.device.allocate_descriptor_sets(self.pool, &layouts)
    }

    /// Writes resource bindings into `set`.
    pub fn update(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        self.device.update_descriptor_set(set, writes);
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        self.device.destroy_descriptor_pool(self.pool);
        debug!("Destroyed descriptor pool {:?}", self.pool);
    }
}

/// One pool size entry per descriptor type, each sized for `set_count` sets.
pub fn pool_sizes(bindings: &[DescriptorBinding], set_count: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for binding in bindings {
        match sizes
            .iter_mut()
            .find(|size| size.ty == binding.descriptor_type)
        {
            Some(size) => size.descriptor_count += set_count,
            None => sizes.push(
                vk::DescriptorPoolSize::default()
                    .ty(binding.descriptor_type)
                    .descriptor_count(set_count),
            ),
        }
    }
    sizes
}
