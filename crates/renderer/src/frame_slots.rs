//! Per-frame synchronization objects and the per-image fence table.
//!
//! A [`FrameSlot`] holds what one frame in flight needs to pace itself
//! against the GPU:
//!
//! ```text
//! 1. Wait on in_flight (CPU waits for the previous use of this slot)
//! 2. Acquire a swapchain image (signals image_available)
//! 3. Submit:
//!    - wait on image_available at COLOR_ATTACHMENT_OUTPUT
//!    - signal render_finished
//!    - signal in_flight
//! 4. Present (waits on render_finished)
//! ```
//!
//! The [`ImageFenceTable`] remembers, per swapchain image, the `in_flight`
//! fence of the last slot that rendered into it. The slot count and the image
//! count are independent, so two slots can target the same image and the
//! second one has to wait for the first.

use ash::vk;
use tracing::debug;

use renderer_rhi::gpu::SharedDevice;
use renderer_rhi::sync::{Fence, Semaphore};

use crate::error::{RendererError, RendererResult};

/// Synchronization objects for one frame in flight.
pub struct FrameSlot {
    index: usize,
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

impl FrameSlot {
    fn new(device: &SharedDevice, index: usize) -> RendererResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        // Signaled so the very first wait on this slot returns immediately.
        let in_flight = Fence::new(device.clone(), true)?;

        Ok(Self {
            index,
            image_available,
            render_finished,
            in_flight,
        })
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Signaled by acquire, waited on by the submission.
    #[inline]
    pub fn image_available(&self) -> &Semaphore {
        &self.image_available
    }

    /// Signaled by the submission, waited on by present.
    #[inline]
    pub fn render_finished(&self) -> &Semaphore {
        &self.render_finished
    }

    /// Signaled when this slot's last submission completes.
    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }
}

/// Fixed ring of `N` frame slots.
pub struct FrameSlotRing {
    slots: Vec<FrameSlot>,
}

impl FrameSlotRing {
    /// Creates `frames_in_flight` slots with pre-signaled fences.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::ZeroFramesInFlight`] for an empty ring, or the
    /// first creation failure. Slots created before a failure are released.
    pub fn create(device: &SharedDevice, frames_in_flight: usize) -> RendererResult<Self> {
        if frames_in_flight == 0 {
            return Err(RendererError::ZeroFramesInFlight);
        }

        let slots = (0..frames_in_flight)
            .map(|index| FrameSlot::new(device, index))
            .collect::<RendererResult<Vec<_>>>()?;

        debug!("Created {} frame slots", frames_in_flight);
        Ok(Self { slots })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns slot `index`, which must be below [`len`](Self::len).
    pub fn get(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameSlot> {
        self.slots.iter()
    }
}

/// Last-user fence per swapchain image.
///
/// Holds raw handles only. The fences are owned by the [`FrameSlotRing`];
/// the table is reset whenever the ring or the swapchain is rebuilt, so it
/// never outlives the fences it names.
#[derive(Debug, Clone, Default)]
pub struct ImageFenceTable {
    fences: Vec<Option<vk::Fence>>,
}

impl ImageFenceTable {
    pub fn new(image_count: usize) -> Self {
        Self {
            fences: vec![None; image_count],
        }
    }

    /// Resizes to `image_count` entries, all empty.
    pub fn reset(&mut self, image_count: usize) {
        self.fences.clear();
        self.fences.resize(image_count, None);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fences.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    /// Fence recorded for `image_index`, if any.
    pub fn get(&self, image_index: u32) -> Option<vk::Fence> {
        self.fences.get(image_index as usize).copied().flatten()
    }

    /// Records `fence` as the last user of `image_index`.
    ///
    /// Indices past the end are ignored; the table always matches the
    /// swapchain the index was acquired from.
    pub fn set(&mut self, image_index: u32, fence: vk::Fence) {
        if let Some(entry) = self.fences.get_mut(image_index as usize) {
            *entry = Some(fence);
        }
    }

    /// True when no image has a recorded fence.
    pub fn is_clear(&self) -> bool {
        self.fences.iter().all(Option::is_none)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ash::vk::Handle;
    use renderer_rhi::mock::{MockDevice, ObjectKind};

    use super::*;

    #[test]
    fn test_ring_creates_signaled_fences() {
        let mock = Arc::new(MockDevice::new());
        let device: SharedDevice = mock.clone();
        let ring = FrameSlotRing::create(&device, 2).unwrap();

        assert_eq!(ring.len(), 2);
        assert_eq!(mock.live_count(ObjectKind::Semaphore), 4);
        assert_eq!(mock.live_count(ObjectKind::Fence), 2);
        for slot in ring.iter() {
            assert!(slot.in_flight().is_signaled().unwrap());
            slot.in_flight().wait().unwrap();
        }
        assert_eq!(ring.get(1).map(FrameSlot::index), Some(1));
        assert!(ring.get(2).is_none());
    }

    #[test]
    fn test_zero_slots_is_rejected() {
        let device: SharedDevice = Arc::new(MockDevice::new());
        assert!(matches!(
            FrameSlotRing::create(&device, 0),
            Err(RendererError::ZeroFramesInFlight)
        ));
    }

    #[test]
    fn test_ring_drop_releases_everything() {
        let mock = Arc::new(MockDevice::new());
        let device: SharedDevice = mock.clone();
        drop(FrameSlotRing::create(&device, 3).unwrap());
        assert_eq!(mock.live_total(), 0);
        assert!(mock.violations().is_empty());
    }

    #[test]
    fn test_image_fence_table() {
        let mut table = ImageFenceTable::new(3);
        assert_eq!(table.len(), 3);
        assert!(table.is_clear());

        let fence = vk::Fence::from_raw(7);
        table.set(1, fence);
        assert_eq!(table.get(1), Some(fence));
        assert_eq!(table.get(0), None);
        assert!(!table.is_clear());

        // Out of range is a no-op.
        table.set(5, fence);
        assert_eq!(table.get(5), None);

        table.reset(4);
        assert_eq!(table.len(), 4);
        assert!(table.is_clear());
    }
}
