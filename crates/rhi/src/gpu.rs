//! The device capability trait.
//!
//! [`GpuDevice`] is the single seam between the renderer's frame and upload
//! logic and the Vulkan driver. Everything above this trait speaks in raw
//! `vk` handles and small description structs; everything below it is either
//! the `ash` backed [`Device`](crate::device::Device) or, in tests, the
//! in-memory [`MockDevice`](crate::mock::MockDevice).
//!
//! Methods map one-to-one onto Vulkan entry points. Creation methods return
//! [`RhiResult`] with the entry point name attached; destroy methods are
//! infallible, as in Vulkan.
//!
//! Handle validity is the caller's responsibility. The RAII wrappers in
//! [`sync`](crate::sync), [`buffer`](crate::buffer), [`image`](crate::image)
//! and friends own handles and return them through this trait on drop.

use std::sync::Arc;

use ash::vk;

use crate::error::RhiResult;
use crate::pipeline::PipelineDesc;
use crate::swapchain::SwapchainSupportDetails;

/// Shared, type-erased device handle held by every RAII wrapper.
pub type SharedDevice = Arc<dyn GpuDevice>;

/// Queue selector for submission and idle waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Present,
}

/// Arguments of a single `vkQueueSubmit` batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitDesc<'a> {
    pub wait_semaphores: &'a [vk::Semaphore],
    /// One stage mask per wait semaphore.
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub command_buffers: &'a [vk::CommandBuffer],
    pub signal_semaphores: &'a [vk::Semaphore],
    /// Fence signaled when the batch completes; `vk::Fence::null()` for none.
    pub fence: vk::Fence,
}

/// Parameters for a 2D, single-mip, single-layer image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
}

/// Parameters for swapchain creation chosen by the selection policies.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub min_image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub old_swapchain: vk::SwapchainKHR,
}

/// Attachments of the single-subpass forward render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassDesc {
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
}

/// One binding in a descriptor set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
}

/// One write into a descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    UniformBuffer {
        binding: u32,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    },
    CombinedImageSampler {
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    },
}

/// Sampler filtering and addressing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    pub filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
    /// `None` disables anisotropic filtering; `Some(0.0)` means the device maximum.
    pub max_anisotropy: Option<f32>,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: Some(0.0),
        }
    }
}

/// Arguments of `vkCmdBeginRenderPass` with inline contents.
///
/// `vk::ClearValue` is a union without `Debug`, so neither is this.
#[derive(Clone, Copy)]
pub struct RenderPassBegin<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_values: &'a [vk::ClearValue],
}

/// Everything the renderer needs from a logical device and its queues.
///
/// The render loop drives a device from one thread. Implementations still
/// guard queue access for `Sync`, but that lock is never contended.
pub trait GpuDevice: Send + Sync {
    // =========================================================================
    // Device Queries
    // =========================================================================

    /// Memory type table of the physical device.
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;

    /// Format capabilities of the physical device.
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;

    /// Current surface capabilities, formats and present modes.
    fn surface_support(&self) -> RhiResult<SwapchainSupportDetails>;

    // =========================================================================
    // Synchronization
    // =========================================================================

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);

    /// Blocks until `fence` is signaled or `timeout` nanoseconds pass.
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> RhiResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()>;
    fn fence_status(&self, fence: vk::Fence) -> RhiResult<bool>;

    // =========================================================================
    // Queues
    // =========================================================================

    fn queue_submit(&self, queue: QueueKind, submit: &SubmitDesc<'_>) -> RhiResult<()>;
    fn queue_wait_idle(&self, queue: QueueKind) -> RhiResult<()>;
    fn device_wait_idle(&self) -> RhiResult<()>;

    // =========================================================================
    // Memory, Buffers and Images
    // =========================================================================

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> RhiResult<vk::Buffer>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<vk::Image>;
    fn destroy_image(&self, image: vk::Image);
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> RhiResult<vk::DeviceMemory>;
    fn free_memory(&self, memory: vk::DeviceMemory);
    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> RhiResult<()>;
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> RhiResult<()>;

    /// Maps `memory`, copies `data` in at `offset`, unmaps.
    fn write_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> RhiResult<()>;

    /// Maps `memory`, copies `out.len()` bytes from `offset` into `out`, unmaps.
    fn read_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        out: &mut [u8],
    ) -> RhiResult<()>;

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RhiResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // =========================================================================
    // Command Pools and Recording
    // =========================================================================

    /// Creates a pool on the graphics queue family.
    fn create_command_pool(
        &self,
        flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);

    fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()>;
    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> RhiResult<()>;

    fn cmd_copy_buffer(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    fn cmd_copy_buffer_to_image(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );
    fn cmd_image_barrier(
        &self,
        buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    );
    fn cmd_begin_render_pass(&self, buffer: vk::CommandBuffer, begin: &RenderPassBegin<'_>);
    fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer);
    fn cmd_bind_pipeline(&self, buffer: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_bind_vertex_buffer(&self, buffer: vk::CommandBuffer, vertex_buffer: vk::Buffer);
    fn cmd_bind_index_buffer(
        &self,
        buffer: vk::CommandBuffer,
        index_buffer: vk::Buffer,
        index_type: vk::IndexType,
    );
    fn cmd_bind_descriptor_set(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    );
    fn cmd_draw_indexed(&self, buffer: vk::CommandBuffer, index_count: u32);

    // =========================================================================
    // Swapchain and Presentation
    // =========================================================================

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RhiResult<vk::SwapchainKHR>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>>;

    /// Raw acquire result: `(index, suboptimal)` or the driver's error code so
    /// the caller can recognise `ERROR_OUT_OF_DATE_KHR`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout: u64,
    ) -> Result<(u32, bool), vk::Result>;

    /// Raw present result: `suboptimal` or the driver's error code.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result>;

    // =========================================================================
    // Render Pass, Pipeline and Descriptors
    // =========================================================================

    fn create_render_pass(&self, desc: &RenderPassDesc) -> RhiResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> RhiResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);

    fn create_graphics_pipeline(
        &self,
        desc: &PipelineDesc,
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> RhiResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    fn create_descriptor_pool(
        &self,
        pool_sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> RhiResult<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    /// Allocates one set per entry of `layouts`. Sets are freed with their pool.
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>>;
    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]);
}
