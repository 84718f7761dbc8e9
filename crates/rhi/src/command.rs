//! Command pool and command buffer management.
//!
//! # Overview
//!
//! - [`CommandPool`] owns a pool on the graphics queue family and frees it,
//!   with every buffer allocated from it, on drop
//! - [`CommandBuffer`] is a thin recording handle that forwards `cmd_*` calls
//!   to the device
//! - [`submit_one_time`] records, submits and waits for a single-use buffer
//!
//! # Example
//!
//! ```no_run
//! use renderer_rhi::command::{CommandPool, submit_one_time};
//! use renderer_rhi::gpu::SharedDevice;
//! use renderer_rhi::vk;
//!
//! # fn example(device: SharedDevice, src: vk::Buffer, dst: vk::Buffer) -> Result<(), renderer_rhi::RhiError> {
//! let pool = CommandPool::new_transient(device)?;
//! submit_one_time(&pool, |cmd| {
//!     cmd.copy_buffer(src, dst, &[vk::BufferCopy::default().size(64)]);
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, trace};

use crate::error::RhiResult;
use crate::gpu::{QueueKind, RenderPassBegin, SharedDevice, SubmitDesc};

/// Vulkan command pool wrapper.
///
/// Pools are not thread-safe; the renderer records from one thread.
pub struct CommandPool {
    device: SharedDevice,
    pool: vk::CommandPool,
}

impl CommandPool {
    /// Creates a pool whose buffers can be reset individually and re-recorded.
    pub fn new(device: SharedDevice) -> RhiResult<Self> {
        Self::with_flags(device, vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
    }

    /// Creates a pool for short-lived, one-time-submit buffers.
    pub fn new_transient(device: SharedDevice) -> RhiResult<Self> {
        Self::with_flags(
            device,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                | vk::CommandPoolCreateFlags::TRANSIENT,
        )
    }

    fn with_flags(device: SharedDevice, flags: vk::CommandPoolCreateFlags) -> RhiResult<Self> {
        let pool = device.create_command_pool(flags)?;
        debug!("Created command pool {:?} ({:?})", pool, flags);
        Ok(Self { device, pool })
    }

    /// Returns the Vulkan command pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    #[inline]
    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    /// Allocates `count` primary command buffers.
    pub fn allocate(&self, count: u32) -> RhiResult<Vec<CommandBuffer>> {
        let buffers = self.device.allocate_command_buffers(self.pool, count)?;
        Ok(buffers
            .into_iter()
            .map(|buffer| CommandBuffer::from_handle(self.device.clone(), buffer))
            .collect())
    }

    /// Returns buffers to the pool.
    pub fn free(&self, buffers: &[CommandBuffer]) {
        let handles: Vec<vk::CommandBuffer> = buffers.iter().map(CommandBuffer::handle).collect();
        self.device.free_command_buffers(self.pool, &handles);
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.device.destroy_command_pool(self.pool);
        debug!("Destroyed command pool {:?}", self.pool);
    }
}

/// Recording handle for a primary command buffer.
///
/// Does not own the buffer; it is freed with its [`CommandPool`] or through
/// [`CommandPool::free`].
#[derive(Clone)]
pub struct CommandBuffer {
    device: SharedDevice,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    pub fn from_handle(device: SharedDevice, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Begins recording for a single submission.
    pub fn begin_one_time(&self) -> RhiResult<()> {
        self.device
            .begin_command_buffer(self.buffer, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
    }

    /// Begins recording for a buffer that will be submitted many times.
    pub fn begin_reusable(&self) -> RhiResult<()> {
        self.device
            .begin_command_buffer(self.buffer, vk::CommandBufferUsageFlags::empty())
    }

    pub fn end(&self) -> RhiResult<()> {
        self.device.end_command_buffer(self.buffer)
    }

    // =========================================================================
    // Transfer
    // =========================================================================

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.device.cmd_copy_buffer(self.buffer, src, dst, regions);
    }

    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.device
            .cmd_copy_buffer_to_image(self.buffer, src, dst, dst_layout, regions);
    }

    pub fn image_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    ) {
        self.device
            .cmd_image_barrier(self.buffer, src_stage, dst_stage, barrier);
    }

    // =========================================================================
    // Drawing
    // =========================================================================

    pub fn begin_render_pass(&self, begin: &RenderPassBegin<'_>) {
        self.device.cmd_begin_render_pass(self.buffer, begin);
    }

    pub fn end_render_pass(&self) {
        self.device.cmd_end_render_pass(self.buffer);
    }

    pub fn bind_pipeline(&self, pipeline: vk::Pipeline) {
        self.device.cmd_bind_pipeline(self.buffer, pipeline);
    }

    pub fn bind_vertex_buffer(&self, buffer: vk::Buffer) {
        self.device.cmd_bind_vertex_buffer(self.buffer, buffer);
    }

    pub fn bind_index_buffer(&self, buffer: vk::Buffer, index_type: vk::IndexType) {
        self.device
            .cmd_bind_index_buffer(self.buffer, buffer, index_type);
    }

    pub fn bind_descriptor_set(&self, layout: vk::PipelineLayout, set: vk::DescriptorSet) {
        self.device
            .cmd_bind_descriptor_set(self.buffer, layout, set);
    }

    pub fn draw_indexed(&self, index_count: u32) {
        self.device.cmd_draw_indexed(self.buffer, index_count);
    }
}

/// Records a single-use command buffer with `record`, submits it to the
/// graphics queue and blocks until the queue is idle.
///
/// The buffer is returned to `pool` whether or not recording or submission
/// succeeds.
///
/// # Errors
///
/// Returns the first error from allocation, recording, submission or the
/// idle wait.
pub fn submit_one_time<F>(pool: &CommandPool, record: F) -> RhiResult<()>
where
    F: FnOnce(&CommandBuffer) -> RhiResult<()>,
{
    let buffers = pool.allocate(1)?;
    let result = match buffers.first() {
        Some(cmd) => record_and_wait(pool.device(), cmd, record),
        None => Ok(()),
    };
    pool.free(&buffers);
    trace!("One-time command buffer completed");
    result
}

fn record_and_wait<F>(device: &SharedDevice, cmd: &CommandBuffer, record: F) -> RhiResult<()>
where
    F: FnOnce(&CommandBuffer) -> RhiResult<()>,
{
    cmd.begin_one_time()?;
    record(cmd)?;
    cmd.end()?;

    let handles = [cmd.handle()];
    device.queue_submit(
        QueueKind::Graphics,
        &SubmitDesc {
            command_buffers: &handles,
            ..Default::default()
        },
    )?;
    device.queue_wait_idle(QueueKind::Graphics)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mock::{MockDevice, MockEvent, ObjectKind, RecordedCommand};

    #[test]
    fn test_one_time_submit_sequence() {
        let mock = Arc::new(MockDevice::new());
        let pool = CommandPool::new_transient(mock.clone()).unwrap();
        mock.clear_events();

        submit_one_time(&pool, |_| Ok(())).unwrap();

        let events = mock.events();
        let begin = events
            .iter()
            .position(|e| matches!(e, MockEvent::BeginCommandBuffer { flags, .. } if *flags == vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT))
            .unwrap();
        let submit = events
            .iter()
            .position(|e| matches!(e, MockEvent::Submit { queue: QueueKind::Graphics, .. }))
            .unwrap();
        let idle = events
            .iter()
            .position(|e| matches!(e, MockEvent::QueueWaitIdle(QueueKind::Graphics)))
            .unwrap();
        let freed = events
            .iter()
            .position(|e| matches!(e, MockEvent::Destroy { kind: ObjectKind::CommandBuffer, .. }))
            .unwrap();

        assert!(begin < submit && submit < idle && idle < freed);
        assert_eq!(mock.live_count(ObjectKind::CommandBuffer), 0);
        assert!(mock.violations().is_empty());
    }

    #[test]
    fn test_failed_recording_frees_buffer_without_submit() {
        let mock = Arc::new(MockDevice::new());
        let pool = CommandPool::new_transient(mock.clone()).unwrap();

        let result = submit_one_time(&pool, |_| {
            Err(crate::RhiError::InvalidHandle("boom".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(mock.live_count(ObjectKind::CommandBuffer), 0);
        assert!(
            !mock
                .events()
                .iter()
                .any(|e| matches!(e, MockEvent::Submit { .. }))
        );
    }

    #[test]
    fn test_failed_submit_is_propagated() {
        let mock = Arc::new(MockDevice::new());
        let pool = CommandPool::new_transient(mock.clone()).unwrap();
        mock.fail_next_submit(vk::Result::ERROR_DEVICE_LOST);

        let result = submit_one_time(&pool, |_| Ok(()));

        assert_eq!(
            result.unwrap_err().vk_result(),
            Some(vk::Result::ERROR_DEVICE_LOST)
        );
        assert_eq!(mock.live_count(ObjectKind::CommandBuffer), 0);
    }

    #[test]
    fn test_recorded_commands_are_forwarded() {
        let mock = Arc::new(MockDevice::new());
        let pool = CommandPool::new(mock.clone()).unwrap();
        let buffers = pool.allocate(1).unwrap();
        let cmd = &buffers[0];

        cmd.begin_reusable().unwrap();
        cmd.bind_pipeline(vk::Pipeline::null());
        cmd.draw_indexed(36);
        cmd.end().unwrap();

        assert_eq!(
            mock.recorded_commands(cmd.handle()),
            vec![
                RecordedCommand::BindPipeline(0),
                RecordedCommand::DrawIndexed(36)
            ]
        );
    }

    #[test]
    fn test_pool_drop_releases_buffers() {
        let mock = Arc::new(MockDevice::new());
        let pool = CommandPool::new(mock.clone()).unwrap();
        let _buffers = pool.allocate(3).unwrap();
        assert_eq!(mock.live_count(ObjectKind::CommandBuffer), 3);

        drop(pool);

        assert_eq!(mock.live_count(ObjectKind::CommandBuffer), 0);
        assert_eq!(mock.live_count(ObjectKind::CommandPool), 0);
    }
}
