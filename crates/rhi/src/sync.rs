//! Synchronization primitives.
//!
//! This module provides owning wrappers for Vulkan synchronization objects:
//! - [`Semaphore`] - GPU-to-GPU ordering between queue operations
//! - [`Fence`] - GPU-to-CPU completion signal the host can block on
//!
//! # Overview
//!
//! - **Semaphores** order queue operations without host involvement, for
//!   example image acquisition before rendering, or rendering before
//!   presentation. They carry no host-visible state.
//!
//! - **Fences** let the CPU learn that submitted GPU work has completed. The
//!   frame loop blocks on them to bound how far it runs ahead of the GPU.
//!
//! # Example
//!
//! ```no_run
//! use renderer_rhi::gpu::SharedDevice;
//! use renderer_rhi::sync::{Fence, Semaphore};
//!
//! # fn example(device: SharedDevice) -> Result<(), renderer_rhi::RhiError> {
//! let image_available = Semaphore::new(device.clone())?;
//!
//! // Signaled at creation so the first wait returns immediately
//! let in_flight = Fence::new(device, true)?;
//!
//! in_flight.wait()?;
//! in_flight.reset()?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::debug;

use crate::error::RhiResult;
use crate::gpu::SharedDevice;

/// Timeout passed to fence waits: block indefinitely.
pub const WAIT_FOREVER: u64 = u64::MAX;

/// Owned semaphore.
///
/// Created unsignaled; destroyed on drop.
pub struct Semaphore {
    device: SharedDevice,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new, unsignaled semaphore.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: SharedDevice) -> RhiResult<Self> {
        let semaphore = device.create_semaphore()?;
        debug!("Created semaphore {:?}", semaphore);
        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.semaphore);
        debug!("Destroyed semaphore {:?}", self.semaphore);
    }
}

/// Owned fence.
///
/// Wait and reset go through the device that created it; the fence is
/// destroyed on drop.
pub struct Fence {
    device: SharedDevice,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `signaled` - If true, creates the fence in the signaled state.
    ///   Used for fences that are waited on before the first submission
    ///   that would signal them.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: SharedDevice, signaled: bool) -> RhiResult<Self> {
        let fence = device.create_fence(signaled)?;
        debug!(
            "Created fence {:?} ({})",
            fence,
            if signaled { "signaled" } else { "unsignaled" }
        );
        Ok(Self { device, fence })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled. There is no timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails (for example on device loss).
    pub fn wait(&self) -> RhiResult<()> {
        self.device.wait_for_fence(self.fence, WAIT_FOREVER)
    }

    /// Resets the fence to the unsignaled state.
    ///
    /// The fence must not be pending on any queue.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_fence(self.fence)
    }

    /// Non-blocking status query.
    pub fn is_signaled(&self) -> RhiResult<bool> {
        self.device.fence_status(self.fence)
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.device.destroy_fence(self.fence);
        debug!("Destroyed fence {:?}", self.fence);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mock::{MockDevice, MockEvent, ObjectKind};

    #[test]
    fn test_semaphore_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
    }

    #[test]
    fn test_fence_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Fence>();
    }

    #[test]
    fn test_signaled_fence_wait_returns() {
        let mock = Arc::new(MockDevice::new());
        let fence = Fence::new(mock.clone(), true).unwrap();

        assert!(fence.is_signaled().unwrap());
        fence.wait().unwrap();
        fence.reset().unwrap();
        assert!(!fence.is_signaled().unwrap());
    }

    #[test]
    fn test_drop_destroys_handles() {
        let mock = Arc::new(MockDevice::new());
        {
            let _semaphore = Semaphore::new(mock.clone()).unwrap();
            let _fence = Fence::new(mock.clone(), false).unwrap();
            assert_eq!(mock.live_count(ObjectKind::Semaphore), 1);
            assert_eq!(mock.live_count(ObjectKind::Fence), 1);
        }
        assert_eq!(mock.live_count(ObjectKind::Semaphore), 0);
        assert_eq!(mock.live_count(ObjectKind::Fence), 0);

        let destroyed = mock
            .events()
            .iter()
            .filter(|event| matches!(event, MockEvent::Destroy { .. }))
            .count();
        assert_eq!(destroyed, 2);
        assert!(mock.violations().is_empty());
    }
}
