//! Frame orchestration.
//!
//! The [`FrameOrchestrator`] drives one frame per call to
//! [`draw_frame`](FrameOrchestrator::draw_frame) using a "frames in flight"
//! ring of `N` [`FrameSlot`](crate::frame_slots::FrameSlot)s:
//!
//! 1. Wait on the current slot's `in_flight` fence. This is what keeps the
//!    CPU at most `N` frames ahead of the GPU.
//! 2. Acquire a swapchain image, signaling the slot's `image_available`.
//! 3. If another submission still uses that image, wait on its fence, then
//!    record the current slot's fence as the image's last user.
//! 4. Let the caller write per-frame data for the image.
//! 5. Reset the slot's fence and submit the image's pre-recorded commands.
//! 6. Present, waiting on `render_finished`.
//! 7. Advance to the next slot.
//!
//! An out-of-date surface on acquire or present, a suboptimal present and an
//! explicit resize all lead to a full recreation through the
//! [`SwapchainLifecycle`]. Every other Vulkan error is returned to the caller
//! as fatal.
//!
//! # Example
//!
//! ```no_run
//! use renderer_platform::SurfaceProvider;
//! use renderer_renderer::frame_manager::{FrameOrchestrator, FrameOutcome};
//! use renderer_renderer::ubo::SceneUniforms;
//!
//! # fn example(
//! #     orchestrator: &mut FrameOrchestrator,
//! #     window: &dyn SurfaceProvider,
//! # ) -> renderer_renderer::RendererResult<()> {
//! loop {
//!     let outcome = orchestrator.draw_frame(window, |frame| {
//!         let uniforms = SceneUniforms::spinning(0.0, frame.extent);
//!         Ok(frame.uniforms.write(&uniforms)?)
//!     })?;
//!     if outcome == FrameOutcome::Paused {
//!         // Wait for the window to come back before drawing again.
//!         break;
//!     }
//! }
//! orchestrator.shutdown()?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, info, trace, warn};

use renderer_platform::SurfaceProvider;
use renderer_rhi::RhiError;
use renderer_rhi::gpu::{QueueKind, SharedDevice, SubmitDesc};
use renderer_rhi::sync::WAIT_FOREVER;

use crate::error::{RendererError, RendererResult};
use crate::frame_slots::{FrameSlotRing, ImageFenceTable};
use crate::lifecycle::{RecreateOutcome, SwapchainLifecycle};
use crate::ubo::UniformBuffer;

/// Where the orchestrator is in its per-frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Submitting,
    Presenting,
    Recreating,
    /// Terminal: entered once by [`FrameOrchestrator::shutdown`].
    Draining,
}

/// Result of one [`FrameOrchestrator::draw_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and presented. `recreated` is set when the
    /// swapchain was rebuilt afterwards because present reported it stale or
    /// a resize was pending.
    Presented { image_index: u32, recreated: bool },
    /// Acquire reported the swapchain out of date; it was rebuilt and no
    /// frame was submitted.
    Recreated,
    /// The surface is minimized or zero-sized; nothing was drawn.
    Paused,
}

/// Per-frame data handed to the update hook of
/// [`FrameOrchestrator::draw_frame`].
pub struct FrameContext<'a> {
    /// Frame slot index in `0..N`.
    pub frame: usize,
    /// Acquired swapchain image.
    pub image_index: u32,
    pub extent: vk::Extent2D,
    /// The uniform buffer bound to `image_index`. No GPU work reads it while
    /// the hook runs.
    pub uniforms: &'a UniformBuffer,
}

/// Drives acquire, submit and present for a fixed number of frames in flight.
pub struct FrameOrchestrator {
    state: FrameState,
    current_frame: usize,
    frames_in_flight: usize,
    needs_recreate: bool,
    image_fences: ImageFenceTable,
    slots: FrameSlotRing,
    lifecycle: SwapchainLifecycle,
    device: SharedDevice,
}

impl FrameOrchestrator {
    /// Creates `frames_in_flight` slots and an image fence table sized to the
    /// lifecycle's current swapchain.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::ZeroFramesInFlight`] for zero slots, or the
    /// first creation failure.
    pub fn new(
        device: SharedDevice,
        lifecycle: SwapchainLifecycle,
        frames_in_flight: usize,
    ) -> RendererResult<Self> {
        let slots = FrameSlotRing::create(&device, frames_in_flight)?;
        let image_fences = ImageFenceTable::new(lifecycle.image_count());
        let needs_recreate = !lifecycle.is_built();

        info!(
            "Frame orchestrator ready: {} frames in flight, {} swapchain images",
            frames_in_flight,
            image_fences.len()
        );

        Ok(Self {
            state: FrameState::Idle,
            current_frame: 0,
            frames_in_flight,
            needs_recreate,
            image_fences,
            slots,
            lifecycle,
            device,
        })
    }

    /// Runs one iteration of the frame loop.
    ///
    /// `update` runs after the GPU is known to be done with the acquired
    /// image and before its commands are submitted; it is the place to write
    /// per-frame uniforms.
    ///
    /// # Errors
    ///
    /// - [`RendererError::Draining`] after [`shutdown`](Self::shutdown)
    /// - Any Vulkan error other than an out-of-date or suboptimal surface,
    ///   tagged with the failing operation
    /// - Errors returned by `update`
    ///
    /// The orchestrator is back in [`FrameState::Idle`] after any error
    /// other than [`RendererError::Draining`].
    pub fn draw_frame<F>(
        &mut self,
        surface: &dyn SurfaceProvider,
        update: F,
    ) -> RendererResult<FrameOutcome>
    where
        F: FnOnce(&FrameContext<'_>) -> RendererResult<()>,
    {
        if self.state == FrameState::Draining {
            return Err(RendererError::Draining);
        }
        let result = self.run_frame(surface, update);
        if result.is_err() {
            self.state = FrameState::Idle;
        }
        result
    }

    fn run_frame<F>(
        &mut self,
        surface: &dyn SurfaceProvider,
        update: F,
    ) -> RendererResult<FrameOutcome>
    where
        F: FnOnce(&FrameContext<'_>) -> RendererResult<()>,
    {
        if surface.is_paused() {
            trace!("Surface paused; frame skipped");
            return Ok(FrameOutcome::Paused);
        }
        if (self.needs_recreate || !self.lifecycle.is_built())
            && self.recreate(surface)? == RecreateOutcome::Paused
        {
            return Ok(FrameOutcome::Paused);
        }

        let frame = self.current_frame;
        let Some(slot) = self.slots.get(frame) else {
            return Err(RhiError::InvalidHandle(format!("frame slot {frame}")).into());
        };
        let Some(resources) = self.lifecycle.resources() else {
            return Ok(FrameOutcome::Paused);
        };

        // Throttle on this slot's previous submission.
        self.state = FrameState::Acquiring;
        slot.in_flight().wait()?;

        let swapchain = resources.swapchain().handle();
        let acquired = self.device.acquire_next_image(
            swapchain,
            slot.image_available().handle(),
            WAIT_FOREVER,
        );
        let image_index = match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    trace!("Acquired suboptimal image {}", index);
                }
                index
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date on acquire");
                return Ok(match self.recreate(surface)? {
                    RecreateOutcome::Rebuilt => FrameOutcome::Recreated,
                    RecreateOutcome::Paused => FrameOutcome::Paused,
                });
            }
            Err(e) => {
                return Err(RhiError::Vulkan {
                    operation: "vkAcquireNextImageKHR",
                    result: e,
                }
                .into());
            }
        };

        // Another slot may still be rendering into this image.
        if let Some(previous) = self.image_fences.get(image_index) {
            self.device.wait_for_fence(previous, WAIT_FOREVER)?;
        }
        self.image_fences.set(image_index, slot.in_flight().handle());

        let (Some(command_buffer), Some(uniforms)) = (
            resources.command_buffer(image_index),
            resources.uniform_buffer(image_index),
        ) else {
            return Err(RhiError::InvalidHandle(format!("swapchain image {image_index}")).into());
        };

        update(&FrameContext {
            frame,
            image_index,
            extent: resources.extent(),
            uniforms,
        })?;

        self.state = FrameState::Submitting;
        slot.in_flight().reset()?;

        let wait_semaphores = [slot.image_available().handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [slot.render_finished().handle()];
        self.device.queue_submit(
            QueueKind::Graphics,
            &SubmitDesc {
                wait_semaphores: &wait_semaphores,
                wait_stages: &wait_stages,
                command_buffers: &command_buffers,
                signal_semaphores: &signal_semaphores,
                fence: slot.in_flight().handle(),
            },
        )?;

        self.state = FrameState::Presenting;
        let stale = match self.device.queue_present(
            swapchain,
            image_index,
            slot.render_finished().handle(),
        ) {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(e) => {
                return Err(RhiError::Vulkan {
                    operation: "vkQueuePresentKHR",
                    result: e,
                }
                .into());
            }
        };

        trace!("Frame {} presented image {}", frame, image_index);
        self.current_frame = (self.current_frame + 1) % self.frames_in_flight;
        self.state = FrameState::Idle;

        let recreated = if stale || self.needs_recreate {
            debug!(
                "Recreating after present (stale: {}, resize pending: {})",
                stale, self.needs_recreate
            );
            self.recreate(surface)? == RecreateOutcome::Rebuilt
        } else {
            false
        };

        Ok(FrameOutcome::Presented {
            image_index,
            recreated,
        })
    }

    /// Rebuilds the swapchain resources and, on success, the frame slots.
    ///
    /// A skipped recreation while paused stays pending.
    fn recreate(&mut self, surface: &dyn SurfaceProvider) -> RendererResult<RecreateOutcome> {
        self.state = FrameState::Recreating;
        let outcome = self.lifecycle.recreate(surface, &mut self.image_fences)?;

        match outcome {
            RecreateOutcome::Rebuilt => {
                // The device is idle, so the old slots can go.
                self.slots = FrameSlotRing::create(&self.device, self.frames_in_flight)?;
                self.needs_recreate = false;
            }
            RecreateOutcome::Paused => self.needs_recreate = true,
        }

        self.state = FrameState::Idle;
        Ok(outcome)
    }

    /// Requests a recreation before the next frame, whether or not the
    /// surface reports itself stale.
    pub fn notify_resized(&mut self) {
        self.needs_recreate = true;
    }

    /// Waits for all submitted work and stops accepting frames.
    ///
    /// Calling it again is harmless.
    pub fn shutdown(&mut self) -> RendererResult<()> {
        if self.state == FrameState::Draining {
            return Ok(());
        }
        self.device.device_wait_idle()?;
        self.state = FrameState::Draining;
        info!("Frame orchestrator drained");
        Ok(())
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Slot index the next frame will use.
    #[inline]
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// True when a recreation is pending.
    #[inline]
    pub fn needs_recreate(&self) -> bool {
        self.needs_recreate
    }

    #[inline]
    pub fn image_fences(&self) -> &ImageFenceTable {
        &self.image_fences
    }

    #[inline]
    pub fn slots(&self) -> &FrameSlotRing {
        &self.slots
    }

    #[inline]
    pub fn lifecycle(&self) -> &SwapchainLifecycle {
        &self.lifecycle
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        if self.state != FrameState::Draining
            && let Err(e) = self.device.device_wait_idle()
        {
            warn!("Device wait idle failed during drop: {}", e);
        }
    }
}
