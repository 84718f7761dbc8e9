//! In-memory [`GpuDevice`] for tests.
//!
//! `MockDevice` hands out counter-based handles, backs device memory with
//! byte vectors and executes recorded copy and barrier commands when they are
//! submitted. Every call is appended to an event log so tests can check
//! ordering (what was waited on before what was submitted, the order objects
//! were destroyed in) without a GPU.
//!
//! GPU completion is modelled lazily: a submitted fence stays pending until
//! the host waits on it or idles the queue or device, at which point it
//! becomes signaled. Waiting on a fence that is neither signaled nor pending
//! would hang a real device; the mock reports it as `TIMEOUT` and records a
//! violation instead.
//!
//! Misuse that Vulkan validation would flag (destroying an unknown handle,
//! submitting with a signaled fence, waiting on an unsignaled semaphore,
//! a barrier whose old layout does not match) is collected in
//! [`MockDevice::violations`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use ash::vk;
use ash::vk::Handle;

use crate::error::{RhiError, RhiResult, VkResultExt};
use crate::gpu::{
    DescriptorBinding, DescriptorWrite, GpuDevice, ImageDesc, QueueKind, RenderPassBegin,
    RenderPassDesc, SamplerDesc, SubmitDesc, SwapchainDesc,
};
use crate::pipeline::PipelineDesc;
use crate::swapchain::SwapchainSupportDetails;

/// Kind of object behind a mock handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Semaphore,
    Fence,
    Buffer,
    Image,
    Memory,
    ImageView,
    Sampler,
    CommandPool,
    CommandBuffer,
    Swapchain,
    RenderPass,
    DescriptorSetLayout,
    PipelineLayout,
    Pipeline,
    Framebuffer,
    DescriptorPool,
    DescriptorSet,
}

/// Buffer-to-buffer copy region as recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRegion {
    pub src_offset: vk::DeviceSize,
    pub dst_offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

/// Buffer-to-image copy region as recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageCopyRegion {
    pub buffer_offset: vk::DeviceSize,
    pub extent: vk::Extent3D,
}

/// A command captured between begin and end of a command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    CopyBuffer {
        src: u64,
        dst: u64,
        regions: Vec<CopyRegion>,
    },
    CopyBufferToImage {
        src: u64,
        dst: u64,
        layout: vk::ImageLayout,
        regions: Vec<ImageCopyRegion>,
    },
    ImageBarrier {
        image: u64,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    },
    BeginRenderPass {
        render_pass: u64,
        framebuffer: u64,
        extent: vk::Extent2D,
    },
    EndRenderPass,
    BindPipeline(u64),
    BindVertexBuffer(u64),
    BindIndexBuffer(u64, vk::IndexType),
    BindDescriptorSet(u64),
    DrawIndexed(u32),
}

/// One entry of the mock's call log.
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    Create {
        kind: ObjectKind,
        handle: u64,
    },
    Destroy {
        kind: ObjectKind,
        handle: u64,
    },
    CreateBuffer {
        handle: u64,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    },
    AllocateMemory {
        handle: u64,
        size: vk::DeviceSize,
        memory_type_index: u32,
    },
    CreateSwapchain {
        handle: u64,
        extent: vk::Extent2D,
        image_count: u32,
    },
    WaitForFence(u64),
    ResetFence(u64),
    Submit {
        queue: QueueKind,
        command_buffers: Vec<u64>,
        wait_semaphores: Vec<u64>,
        signal_semaphores: Vec<u64>,
        fence: u64,
    },
    QueueWaitIdle(QueueKind),
    DeviceWaitIdle,
    Acquire {
        semaphore: u64,
        result: Result<u32, vk::Result>,
    },
    Present {
        image_index: u32,
        wait_semaphore: u64,
        result: Result<bool, vk::Result>,
    },
    BeginCommandBuffer {
        buffer: u64,
        flags: vk::CommandBufferUsageFlags,
    },
    EndCommandBuffer(u64),
    Record {
        buffer: u64,
        command: RecordedCommand,
    },
    WriteMemory {
        memory: u64,
        offset: vk::DeviceSize,
        len: usize,
    },
    ReadMemory {
        memory: u64,
        offset: vk::DeviceSize,
        len: usize,
    },
    UpdateDescriptorSet {
        set: u64,
        writes: usize,
    },
}

#[derive(Debug, Default)]
struct FenceState {
    signaled: bool,
    pending: bool,
}

#[derive(Debug)]
struct ImageState {
    size: vk::DeviceSize,
    memory: Option<u64>,
    layout: vk::ImageLayout,
    format: vk::Format,
}

#[derive(Debug, Default)]
struct CommandBufferState {
    pool: u64,
    recording: bool,
    commands: Vec<RecordedCommand>,
}

struct State {
    next_handle: u64,
    live: HashMap<u64, ObjectKind>,
    events: Vec<MockEvent>,
    violations: Vec<String>,

    memory_properties: vk::PhysicalDeviceMemoryProperties,
    support: SwapchainSupportDetails,

    fences: HashMap<u64, FenceState>,
    semaphores: HashMap<u64, bool>,
    max_pending_fences: usize,

    memories: HashMap<u64, Vec<u8>>,
    buffers: HashMap<u64, (vk::DeviceSize, Option<u64>)>,
    images: HashMap<u64, ImageState>,
    command_buffers: HashMap<u64, CommandBufferState>,
    descriptor_sets: HashMap<u64, u64>,
    swapchains: HashMap<u64, Vec<u64>>,

    acquire_script: VecDeque<Result<(u32, bool), vk::Result>>,
    present_script: VecDeque<Result<bool, vk::Result>>,
    submit_failure: Option<vk::Result>,
    acquire_counter: u32,
}

/// Recording, in-memory device. See the module docs.
pub struct MockDevice {
    state: Mutex<State>,
}

/// Memory type table used by [`MockDevice::new`]: index 0 device-local,
/// index 1 host-visible and host-coherent.
pub fn default_memory_properties() -> vk::PhysicalDeviceMemoryProperties {
    let mut properties = vk::PhysicalDeviceMemoryProperties {
        memory_type_count: 2,
        memory_heap_count: 1,
        ..Default::default()
    };
    properties.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    properties.memory_types[1].property_flags =
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
    properties
}

fn default_support() -> SwapchainSupportDetails {
    SwapchainSupportDetails {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        },
        formats: vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// A device with an 800x600 surface, 2..=3 images and the
    /// [`default_memory_properties`] table.
    pub fn new() -> Self {
        Self::with_memory_properties(default_memory_properties())
    }

    /// A device with a custom memory type table.
    pub fn with_memory_properties(memory_properties: vk::PhysicalDeviceMemoryProperties) -> Self {
        Self {
            state: Mutex::new(State {
                next_handle: 1,
                live: HashMap::new(),
                events: Vec::new(),
                violations: Vec::new(),
                memory_properties,
                support: default_support(),
                fences: HashMap::new(),
                semaphores: HashMap::new(),
                max_pending_fences: 0,
                memories: HashMap::new(),
                buffers: HashMap::new(),
                images: HashMap::new(),
                command_buffers: HashMap::new(),
                descriptor_sets: HashMap::new(),
                swapchains: HashMap::new(),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                submit_failure: None,
                acquire_counter: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("mock device state poisoned")
    }

    // =========================================================================
    // Test Controls
    // =========================================================================

    /// Changes the surface's reported current extent.
    pub fn set_surface_extent(&self, width: u32, height: u32) {
        self.state().support.capabilities.current_extent = vk::Extent2D { width, height };
    }

    /// Replaces the surface capabilities, formats and present modes.
    pub fn set_surface_support(&self, support: SwapchainSupportDetails) {
        self.state().support = support;
    }

    /// Queues a forced result for the next acquire.
    pub fn push_acquire_result(&self, result: Result<(u32, bool), vk::Result>) {
        self.state().acquire_script.push_back(result);
    }

    /// Queues a forced result for the next present.
    pub fn push_present_result(&self, result: Result<bool, vk::Result>) {
        self.state().present_script.push_back(result);
    }

    /// Makes the next queue submission fail with `result`.
    pub fn fail_next_submit(&self, result: vk::Result) {
        self.state().submit_failure = Some(result);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Snapshot of the call log.
    pub fn events(&self) -> Vec<MockEvent> {
        self.state().events.clone()
    }

    /// Clears the call log.
    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    /// Misuse detected so far.
    pub fn violations(&self) -> Vec<String> {
        self.state().violations.clone()
    }

    /// Number of live objects of `kind`.
    pub fn live_count(&self, kind: ObjectKind) -> usize {
        self.state().live.values().filter(|&&k| k == kind).count()
    }

    /// Total number of live objects.
    pub fn live_total(&self) -> usize {
        self.state().live.len()
    }

    /// Largest number of submitted-but-unobserved fences seen at any submit.
    pub fn max_pending_fences(&self) -> usize {
        self.state().max_pending_fences
    }

    /// Current layout of `image` as seen by executed barriers.
    pub fn image_layout(&self, image: vk::Image) -> Option<vk::ImageLayout> {
        self.state()
            .images
            .get(&image.as_raw())
            .map(|image| image.layout)
    }

    /// Bytes currently stored in `memory`.
    pub fn memory_contents(&self, memory: vk::DeviceMemory) -> Option<Vec<u8>> {
        self.state().memories.get(&memory.as_raw()).cloned()
    }

    /// Commands currently recorded in `buffer`.
    pub fn recorded_commands(&self, buffer: vk::CommandBuffer) -> Vec<RecordedCommand> {
        self.state()
            .command_buffers
            .get(&buffer.as_raw())
            .map(|state| state.commands.clone())
            .unwrap_or_default()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn record_command(&self, buffer: vk::CommandBuffer, command: RecordedCommand) {
        let mut guard = self.state();
        let state = &mut *guard;
        let raw = buffer.as_raw();
        match state.command_buffers.get_mut(&raw) {
            Some(cb) if cb.recording => cb.commands.push(command.clone()),
            _ => state
                .violations
                .push(format!("command recorded outside recording: {command:?}")),
        }
        state.events.push(MockEvent::Record {
            buffer: raw,
            command,
        });
    }

    fn create_raw(&self, kind: ObjectKind) -> u64 {
        self.state().create(kind)
    }

    fn destroy_raw(&self, kind: ObjectKind, raw: u64) {
        self.state().destroy(kind, raw);
    }
}

impl State {
    fn create(&mut self, kind: ObjectKind) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.live.insert(handle, kind);
        self.events.push(MockEvent::Create { kind, handle });
        handle
    }

    fn destroy(&mut self, kind: ObjectKind, handle: u64) {
        match self.live.remove(&handle) {
            Some(found) if found == kind => {}
            Some(found) => {
                self.violations
                    .push(format!("destroyed {handle} as {kind:?} but it is a {found:?}"));
            }
            None => {
                self.violations
                    .push(format!("destroyed unknown or freed {kind:?} {handle}"));
            }
        }
        self.events.push(MockEvent::Destroy { kind, handle });
    }

    fn pending_fences(&self) -> usize {
        self.fences.values().filter(|fence| fence.pending).count()
    }

    fn complete_all(&mut self) {
        for fence in self.fences.values_mut() {
            if fence.pending {
                fence.pending = false;
                fence.signaled = true;
            }
        }
    }

    fn buffer_memory(&self, buffer: u64) -> Option<u64> {
        self.buffers.get(&buffer).and_then(|(_, memory)| *memory)
    }

    fn execute(&mut self, command: &RecordedCommand) {
        match command {
            RecordedCommand::CopyBuffer { src, dst, regions } => {
                let (Some(src_mem), Some(dst_mem)) =
                    (self.buffer_memory(*src), self.buffer_memory(*dst))
                else {
                    self.violations
                        .push(format!("copy between unbound buffers {src} -> {dst}"));
                    return;
                };
                for region in regions {
                    self.copy_bytes(
                        src_mem,
                        region.src_offset as usize,
                        dst_mem,
                        region.dst_offset as usize,
                        region.size as usize,
                    );
                }
            }
            RecordedCommand::CopyBufferToImage {
                src,
                dst,
                layout,
                regions,
            } => {
                let Some(src_mem) = self.buffer_memory(*src) else {
                    self.violations.push(format!("copy from unbound buffer {src}"));
                    return;
                };
                let Some(image) = self.images.get(dst) else {
                    self.violations.push(format!("copy into unknown image {dst}"));
                    return;
                };
                if image.layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL
                    || *layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL
                {
                    self.violations.push(format!(
                        "copy into image {dst} in layout {:?} (declared {layout:?})",
                        image.layout
                    ));
                }
                let texel = texel_size(image.format);
                let Some(dst_mem) = image.memory else {
                    self.violations.push(format!("copy into unbound image {dst}"));
                    return;
                };
                for region in regions {
                    let len =
                        region.extent.width as usize * region.extent.height as usize * texel;
                    self.copy_bytes(src_mem, region.buffer_offset as usize, dst_mem, 0, len);
                }
            }
            RecordedCommand::ImageBarrier {
                image,
                old_layout,
                new_layout,
                ..
            } => match self.images.get_mut(image) {
                Some(state) => {
                    if *old_layout != vk::ImageLayout::UNDEFINED && state.layout != *old_layout {
                        let message = format!(
                            "barrier on image {image} expects {old_layout:?} but image is {:?}",
                            state.layout
                        );
                        self.violations.push(message);
                    }
                    state.layout = *new_layout;
                }
                None => self.violations.push(format!("barrier on unknown image {image}")),
            },
            _ => {}
        }
    }

    fn copy_bytes(&mut self, src: u64, src_offset: usize, dst: u64, dst_offset: usize, len: usize) {
        let Some(source) = self
            .memories
            .get(&src)
            .and_then(|bytes| bytes.get(src_offset..src_offset + len))
            .map(<[u8]>::to_vec)
        else {
            self.violations
                .push(format!("copy reads past the end of memory {src}"));
            return;
        };
        match self
            .memories
            .get_mut(&dst)
            .and_then(|bytes| bytes.get_mut(dst_offset..dst_offset + len))
        {
            Some(target) => target.copy_from_slice(&source),
            None => self
                .violations
                .push(format!("copy writes past the end of memory {dst}")),
        }
    }
}

fn texel_size(format: vk::Format) -> usize {
    match format {
        vk::Format::R8_UNORM | vk::Format::R8_SRGB => 1,
        vk::Format::R16G16B16A16_SFLOAT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        _ => 4,
    }
}

fn all_types_mask(properties: &vk::PhysicalDeviceMemoryProperties) -> u32 {
    1u32.checked_shl(properties.memory_type_count)
        .map_or(u32::MAX, |bit| bit - 1)
}

fn raw_list<H: Handle + Copy>(handles: &[H]) -> Vec<u64> {
    handles.iter().map(|handle| handle.as_raw()).collect()
}

impl GpuDevice for MockDevice {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.state().memory_properties
    }

    fn format_properties(&self, _format: vk::Format) -> vk::FormatProperties {
        vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::empty(),
            optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                | vk::FormatFeatureFlags::COLOR_ATTACHMENT
                | vk::FormatFeatureFlags::SAMPLED_IMAGE,
            buffer_features: vk::FormatFeatureFlags::empty(),
        }
    }

    fn surface_support(&self) -> RhiResult<SwapchainSupportDetails> {
        Ok(self.state().support.clone())
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let mut guard = self.state();
        let state = &mut *guard;
        let handle = state.create(ObjectKind::Semaphore);
        state.semaphores.insert(handle, false);
        Ok(vk::Semaphore::from_raw(handle))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut guard = self.state();
        let state = &mut *guard;
        state.semaphores.remove(&semaphore.as_raw());
        state.destroy(ObjectKind::Semaphore, semaphore.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let mut guard = self.state();
        let state = &mut *guard;
        let handle = state.create(ObjectKind::Fence);
        state.fences.insert(
            handle,
            FenceState {
                signaled,
                pending: false,
            },
        );
        Ok(vk::Fence::from_raw(handle))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut guard = self.state();
        let state = &mut *guard;
        if state
            .fences
            .remove(&fence.as_raw())
            .is_some_and(|fence| fence.pending)
        {
            state
                .violations
                .push(format!("destroyed fence {} while pending", fence.as_raw()));
        }
        state.destroy(ObjectKind::Fence, fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> RhiResult<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        let raw = fence.as_raw();
        state.events.push(MockEvent::WaitForFence(raw));
        let Some(fence_state) = state.fences.get_mut(&raw) else {
            state.violations.push(format!("wait on unknown fence {raw}"));
            return Err(vk::Result::ERROR_UNKNOWN).during("vkWaitForFences");
        };
        if fence_state.pending {
            fence_state.pending = false;
            fence_state.signaled = true;
        }
        if fence_state.signaled {
            Ok(())
        } else {
            state
                .violations
                .push(format!("wait on fence {raw} that nothing will signal"));
            Err(vk::Result::TIMEOUT).during("vkWaitForFences")
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        let raw = fence.as_raw();
        state.events.push(MockEvent::ResetFence(raw));
        match state.fences.get_mut(&raw) {
            Some(fence_state) if fence_state.pending => {
                state
                    .violations
                    .push(format!("reset of fence {raw} while pending"));
            }
            Some(fence_state) => fence_state.signaled = false,
            None => state.violations.push(format!("reset of unknown fence {raw}")),
        }
        Ok(())
    }

    fn fence_status(&self, fence: vk::Fence) -> RhiResult<bool> {
        Ok(self
            .state()
            .fences
            .get(&fence.as_raw())
            .is_some_and(|fence| fence.signaled))
    }

    fn queue_submit(&self, queue: QueueKind, submit: &SubmitDesc<'_>) -> RhiResult<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        if let Some(result) = state.submit_failure.take() {
            return Err(result).during("vkQueueSubmit");
        }

        state.events.push(MockEvent::Submit {
            queue,
            command_buffers: raw_list(submit.command_buffers),
            wait_semaphores: raw_list(submit.wait_semaphores),
            signal_semaphores: raw_list(submit.signal_semaphores),
            fence: submit.fence.as_raw(),
        });

        if submit.wait_semaphores.len() != submit.wait_stages.len() {
            state
                .violations
                .push("wait semaphore and stage counts differ".to_string());
        }
        for semaphore in submit.wait_semaphores {
            let raw = semaphore.as_raw();
            match state.semaphores.get_mut(&raw) {
                Some(signaled) if *signaled => *signaled = false,
                _ => state
                    .violations
                    .push(format!("submit waits on unsignaled semaphore {raw}")),
            }
        }

        for buffer in submit.command_buffers {
            let commands = match state.command_buffers.get(&buffer.as_raw()) {
                Some(cb) if !cb.recording => cb.commands.clone(),
                _ => {
                    state.violations.push(format!(
                        "submitted command buffer {} that is not executable",
                        buffer.as_raw()
                    ));
                    continue;
                }
            };
            for command in &commands {
                state.execute(command);
            }
        }

        for semaphore in submit.signal_semaphores {
            state.semaphores.insert(semaphore.as_raw(), true);
        }

        if submit.fence != vk::Fence::null() {
            let raw = submit.fence.as_raw();
            match state.fences.get_mut(&raw) {
                Some(fence) if fence.signaled || fence.pending => {
                    state
                        .violations
                        .push(format!("submit with fence {raw} that is not unsignaled"));
                }
                Some(fence) => fence.pending = true,
                None => state.violations.push(format!("submit with unknown fence {raw}")),
            }
            let pending = state.pending_fences();
            state.max_pending_fences = state.max_pending_fences.max(pending);
        }
        Ok(())
    }

    fn queue_wait_idle(&self, queue: QueueKind) -> RhiResult<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.events.push(MockEvent::QueueWaitIdle(queue));
        state.complete_all();
        Ok(())
    }

    fn device_wait_idle(&self) -> RhiResult<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.events.push(MockEvent::DeviceWaitIdle);
        state.complete_all();
        Ok(())
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> RhiResult<vk::Buffer> {
        let mut guard = self.state();
        let state = &mut *guard;
        let handle = state.create(ObjectKind::Buffer);
        state.buffers.insert(handle, (size, None));
        state.events.push(MockEvent::CreateBuffer {
            handle,
            size,
            usage,
        });
        Ok(vk::Buffer::from_raw(handle))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut guard = self.state();
        let state = &mut *guard;
        state.buffers.remove(&buffer.as_raw());
        state.destroy(ObjectKind::Buffer, buffer.as_raw());
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let state = self.state();
        let size = state
            .buffers
            .get(&buffer.as_raw())
            .map_or(0, |(size, _)| *size);
        vk::MemoryRequirements {
            size,
            alignment: 4,
            memory_type_bits: all_types_mask(&state.memory_properties),
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<vk::Image> {
        let mut guard = self.state();
        let state = &mut *guard;
        let handle = state.create(ObjectKind::Image);
        let size = desc.extent.width as vk::DeviceSize
            * desc.extent.height as vk::DeviceSize
            * texel_size(desc.format) as vk::DeviceSize;
        state.images.insert(
            handle,
            ImageState {
                size,
                memory: None,
                layout: vk::ImageLayout::UNDEFINED,
                format: desc.format,
            },
        );
        Ok(vk::Image::from_raw(handle))
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut guard = self.state();
        let state = &mut *guard;
        state.images.remove(&image.as_raw());
        state.destroy(ObjectKind::Image, image.as_raw());
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let state = self.state();
        let size = state
            .images
            .get(&image.as_raw())
            .map_or(0, |image| image.size);
        vk::MemoryRequirements {
            size,
            alignment: 256,
            memory_type_bits: all_types_mask(&state.memory_properties),
        }
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> RhiResult<vk::DeviceMemory> {
        let mut guard = self.state();
        let state = &mut *guard;
        if memory_type_index >= state.memory_properties.memory_type_count {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).during("vkAllocateMemory");
        }
        let handle = state.create(ObjectKind::Memory);
        state.memories.insert(handle, vec![0; size as usize]);
        state.events.push(MockEvent::AllocateMemory {
            handle,
            size,
            memory_type_index,
        });
        Ok(vk::DeviceMemory::from_raw(handle))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut guard = self.state();
        let state = &mut *guard;
        state.memories.remove(&memory.as_raw());
        state.destroy(ObjectKind::Memory, memory.as_raw());
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> RhiResult<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        match state.buffers.get_mut(&buffer.as_raw()) {
            Some((_, bound)) => {
                *bound = Some(memory.as_raw());
                Ok(())
            }
            None => Err(RhiError::InvalidHandle(format!("buffer {buffer:?}"))),
        }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> RhiResult<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        match state.images.get_mut(&image.as_raw()) {
            Some(image) => {
                image.memory = Some(memory.as_raw());
                Ok(())
            }
            None => Err(RhiError::InvalidHandle(format!("image {image:?}"))),
        }
    }

    fn write_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> RhiResult<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        let raw = memory.as_raw();
        state.events.push(MockEvent::WriteMemory {
            memory: raw,
            offset,
            len: data.len(),
        });
        let start = offset as usize;
        let target = state
            .memories
            .get_mut(&raw)
            .and_then(|bytes| bytes.get_mut(start..start + data.len()))
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)
            .during("vkMapMemory")?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn read_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        out: &mut [u8],
    ) -> RhiResult<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        let raw = memory.as_raw();
        state.events.push(MockEvent::ReadMemory {
            memory: raw,
            offset,
            len: out.len(),
        });
        let start = offset as usize;
        let source = state
            .memories
            .get(&raw)
            .and_then(|bytes| bytes.get(start..start + out.len()))
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)
            .during("vkMapMemory")?;
        out.copy_from_slice(source);
        Ok(())
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> RhiResult<vk::ImageView> {
        Ok(vk::ImageView::from_raw(self.create_raw(ObjectKind::ImageView)))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy_raw(ObjectKind::ImageView, view.as_raw());
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> RhiResult<vk::Sampler> {
        Ok(vk::Sampler::from_raw(self.create_raw(ObjectKind::Sampler)))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.destroy_raw(ObjectKind::Sampler, sampler.as_raw());
    }

    fn create_command_pool(
        &self,
        _flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<vk::CommandPool> {
        Ok(vk::CommandPool::from_raw(
            self.create_raw(ObjectKind::CommandPool),
        ))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut guard = self.state();
        let state = &mut *guard;
        let raw = pool.as_raw();
        let owned: Vec<u64> = state
            .command_buffers
            .iter()
            .filter(|(_, cb)| cb.pool == raw)
            .map(|(&handle, _)| handle)
            .collect();
        for handle in owned {
            state.command_buffers.remove(&handle);
            state.live.remove(&handle);
        }
        state.destroy(ObjectKind::CommandPool, raw);
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        let mut guard = self.state();
        let state = &mut *guard;
        let buffers = (0..count)
            .map(|_| {
                let handle = state.create(ObjectKind::CommandBuffer);
                state.command_buffers.insert(
                    handle,
                    CommandBufferState {
                        pool: pool.as_raw(),
                        ..Default::default()
                    },
                );
                vk::CommandBuffer::from_raw(handle)
            })
            .collect();
        Ok(buffers)
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut guard = self.state();
        let state = &mut *guard;
        for buffer in buffers {
            state.command_buffers.remove(&buffer.as_raw());
            state.destroy(ObjectKind::CommandBuffer, buffer.as_raw());
        }
    }

    fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        let raw = buffer.as_raw();
        state.events.push(MockEvent::BeginCommandBuffer { buffer: raw, flags });
        match state.command_buffers.get_mut(&raw) {
            Some(cb) => {
                cb.recording = true;
                cb.commands.clear();
                Ok(())
            }
            None => Err(RhiError::InvalidHandle(format!("command buffer {raw}"))),
        }
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> RhiResult<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        let raw = buffer.as_raw();
        state.events.push(MockEvent::EndCommandBuffer(raw));
        match state.command_buffers.get_mut(&raw) {
            Some(cb) if cb.recording => {
                cb.recording = false;
                Ok(())
            }
            _ => Err(RhiError::InvalidHandle(format!(
                "command buffer {raw} is not recording"
            ))),
        }
    }

    fn cmd_copy_buffer(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.record_command(
            buffer,
            RecordedCommand::CopyBuffer {
                src: src.as_raw(),
                dst: dst.as_raw(),
                regions: regions
                    .iter()
                    .map(|region| CopyRegion {
                        src_offset: region.src_offset,
                        dst_offset: region.dst_offset,
                        size: region.size,
                    })
                    .collect(),
            },
        );
    }

    fn cmd_copy_buffer_to_image(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.record_command(
            buffer,
            RecordedCommand::CopyBufferToImage {
                src: src.as_raw(),
                dst: dst.as_raw(),
                layout: dst_layout,
                regions: regions
                    .iter()
                    .map(|region| ImageCopyRegion {
                        buffer_offset: region.buffer_offset,
                        extent: region.image_extent,
                    })
                    .collect(),
            },
        );
    }

    fn cmd_image_barrier(
        &self,
        buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    ) {
        self.record_command(
            buffer,
            RecordedCommand::ImageBarrier {
                image: barrier.image.as_raw(),
                old_layout: barrier.old_layout,
                new_layout: barrier.new_layout,
                src_access: barrier.src_access_mask,
                dst_access: barrier.dst_access_mask,
                src_stage,
                dst_stage,
            },
        );
    }

    fn cmd_begin_render_pass(&self, buffer: vk::CommandBuffer, begin: &RenderPassBegin<'_>) {
        self.record_command(
            buffer,
            RecordedCommand::BeginRenderPass {
                render_pass: begin.render_pass.as_raw(),
                framebuffer: begin.framebuffer.as_raw(),
                extent: begin.extent,
            },
        );
    }

    fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer) {
        self.record_command(buffer, RecordedCommand::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.record_command(buffer, RecordedCommand::BindPipeline(pipeline.as_raw()));
    }

    fn cmd_bind_vertex_buffer(&self, buffer: vk::CommandBuffer, vertex_buffer: vk::Buffer) {
        self.record_command(
            buffer,
            RecordedCommand::BindVertexBuffer(vertex_buffer.as_raw()),
        );
    }

    fn cmd_bind_index_buffer(
        &self,
        buffer: vk::CommandBuffer,
        index_buffer: vk::Buffer,
        index_type: vk::IndexType,
    ) {
        self.record_command(
            buffer,
            RecordedCommand::BindIndexBuffer(index_buffer.as_raw(), index_type),
        );
    }

    fn cmd_bind_descriptor_set(
        &self,
        buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        self.record_command(buffer, RecordedCommand::BindDescriptorSet(set.as_raw()));
    }

    fn cmd_draw_indexed(&self, buffer: vk::CommandBuffer, index_count: u32) {
        self.record_command(buffer, RecordedCommand::DrawIndexed(index_count));
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RhiResult<vk::SwapchainKHR> {
        let mut guard = self.state();
        let state = &mut *guard;
        let handle = state.create(ObjectKind::Swapchain);
        let images = (0..desc.min_image_count)
            .map(|_| {
                let image = state.next_handle;
                state.next_handle += 1;
                image
            })
            .collect();
        state.swapchains.insert(handle, images);
        state.events.push(MockEvent::CreateSwapchain {
            handle,
            extent: desc.extent,
            image_count: desc.min_image_count,
        });
        Ok(vk::SwapchainKHR::from_raw(handle))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut guard = self.state();
        let state = &mut *guard;
        state.swapchains.remove(&swapchain.as_raw());
        state.destroy(ObjectKind::Swapchain, swapchain.as_raw());
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        self.state()
            .swapchains
            .get(&swapchain.as_raw())
            .map(|images| images.iter().copied().map(vk::Image::from_raw).collect())
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
            .during("vkGetSwapchainImagesKHR")
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        _timeout: u64,
    ) -> Result<(u32, bool), vk::Result> {
        let mut guard = self.state();
        let state = &mut *guard;
        let image_count = state
            .swapchains
            .get(&swapchain.as_raw())
            .map_or(0, |images| images.len() as u32);

        let result = match state.acquire_script.pop_front() {
            Some(result) => result,
            None if image_count == 0 => Err(vk::Result::ERROR_SURFACE_LOST_KHR),
            None => {
                let index = state.acquire_counter % image_count;
                state.acquire_counter += 1;
                Ok((index, false))
            }
        };

        let raw = semaphore.as_raw();
        state.events.push(MockEvent::Acquire {
            semaphore: raw,
            result: result.map(|(index, _)| index),
        });
        if result.is_ok() {
            match state.semaphores.get_mut(&raw) {
                Some(signaled) if !*signaled => *signaled = true,
                _ => state
                    .violations
                    .push(format!("acquire signals semaphore {raw} that is not unsignaled")),
            }
        }
        result
    }

    fn queue_present(
        &self,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let mut guard = self.state();
        let state = &mut *guard;
        let result = state.present_script.pop_front().unwrap_or(Ok(false));
        let raw = wait_semaphore.as_raw();
        state.events.push(MockEvent::Present {
            image_index,
            wait_semaphore: raw,
            result,
        });
        match state.semaphores.get_mut(&raw) {
            Some(signaled) if *signaled => *signaled = false,
            _ => state
                .violations
                .push(format!("present waits on unsignaled semaphore {raw}")),
        }
        result
    }

    fn create_render_pass(&self, _desc: &RenderPassDesc) -> RhiResult<vk::RenderPass> {
        Ok(vk::RenderPass::from_raw(
            self.create_raw(ObjectKind::RenderPass),
        ))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.destroy_raw(ObjectKind::RenderPass, render_pass.as_raw());
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[DescriptorBinding],
    ) -> RhiResult<vk::DescriptorSetLayout> {
        Ok(vk::DescriptorSetLayout::from_raw(
            self.create_raw(ObjectKind::DescriptorSetLayout),
        ))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.destroy_raw(ObjectKind::DescriptorSetLayout, layout.as_raw());
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<vk::PipelineLayout> {
        Ok(vk::PipelineLayout::from_raw(
            self.create_raw(ObjectKind::PipelineLayout),
        ))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy_raw(ObjectKind::PipelineLayout, layout.as_raw());
    }

    fn create_graphics_pipeline(
        &self,
        desc: &PipelineDesc,
        _layout: vk::PipelineLayout,
        _render_pass: vk::RenderPass,
        _extent: vk::Extent2D,
    ) -> RhiResult<vk::Pipeline> {
        if desc.vertex_spirv.is_empty() || desc.fragment_spirv.is_empty() {
            return Err(RhiError::PipelineError("empty shader code".to_string()));
        }
        Ok(vk::Pipeline::from_raw(self.create_raw(ObjectKind::Pipeline)))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy_raw(ObjectKind::Pipeline, pipeline.as_raw());
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer> {
        Ok(vk::Framebuffer::from_raw(
            self.create_raw(ObjectKind::Framebuffer),
        ))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.destroy_raw(ObjectKind::Framebuffer, framebuffer.as_raw());
    }

    fn create_descriptor_pool(
        &self,
        _pool_sizes: &[vk::DescriptorPoolSize],
        _max_sets: u32,
    ) -> RhiResult<vk::DescriptorPool> {
        Ok(vk::DescriptorPool::from_raw(
            self.create_raw(ObjectKind::DescriptorPool),
        ))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut guard = self.state();
        let state = &mut *guard;
        let raw = pool.as_raw();
        let owned: Vec<u64> = state
            .descriptor_sets
            .iter()
            .filter(|&(_, &owner)| owner == raw)
            .map(|(&set, _)| set)
            .collect();
        for set in owned {
            state.descriptor_sets.remove(&set);
            state.live.remove(&set);
        }
        state.destroy(ObjectKind::DescriptorPool, raw);
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let mut guard = self.state();
        let state = &mut *guard;
        let sets = layouts
            .iter()
            .map(|_| {
                let handle = state.create(ObjectKind::DescriptorSet);
                state.descriptor_sets.insert(handle, pool.as_raw());
                vk::DescriptorSet::from_raw(handle)
            })
            .collect();
        Ok(sets)
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        self.state().events.push(MockEvent::UpdateDescriptorSet {
            set: set.as_raw(),
            writes: writes.len(),
        });
    }
}
