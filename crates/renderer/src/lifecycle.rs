//! Swapchain lifecycle management.
//!
//! [`SwapchainLifecycle`] is the only owner of the [`SwapchainResourceSet`].
//! It builds the set when the surface can be drawn to and, on
//! [`recreate`](SwapchainLifecycle::recreate), tears it down and builds it
//! again at the surface's new extent.
//!
//! While the surface is paused (minimized or zero-sized) recreation does
//! nothing at all: no waits, no destruction, no creation. The caller keeps
//! asking until the surface comes back.

use ash::vk;
use tracing::{debug, info};

use renderer_platform::SurfaceProvider;
use renderer_rhi::command::CommandPool;
use renderer_rhi::descriptor::DescriptorSetLayout;
use renderer_rhi::gpu::SharedDevice;
use renderer_rhi::image::find_depth_format;

use crate::error::RendererResult;
use crate::frame_slots::ImageFenceTable;
use crate::resources::{Scene, SwapchainResourceSet};

/// What a call to [`SwapchainLifecycle::recreate`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateOutcome {
    /// The resource set was destroyed and built again.
    Rebuilt,
    /// The surface is paused; nothing was touched.
    Paused,
}

/// Owner of the swapchain resource set and of the objects it is built from.
pub struct SwapchainLifecycle {
    // Dropped first: the set's command buffers go back to `command_pool`.
    resources: Option<SwapchainResourceSet>,
    scene: Scene,
    descriptor_layout: DescriptorSetLayout,
    command_pool: CommandPool,
    depth_format: Option<vk::Format>,
    recreations: u64,
    device: SharedDevice,
}

impl SwapchainLifecycle {
    /// Takes ownership of `scene` and builds the first resource set unless
    /// `surface` is paused.
    ///
    /// A depth format is chosen once when the scene's pipeline tests depth.
    ///
    /// # Errors
    ///
    /// Returns an error if no depth format is supported or the first build
    /// fails.
    pub fn new(
        device: SharedDevice,
        scene: Scene,
        surface: &dyn SurfaceProvider,
    ) -> RendererResult<Self> {
        let depth_format = if scene.pipeline().depth_test {
            Some(find_depth_format(&device)?)
        } else {
            None
        };
        let descriptor_layout =
            DescriptorSetLayout::new(device.clone(), &scene.descriptor_bindings())?;
        let command_pool = CommandPool::new(device.clone())?;

        let mut lifecycle = Self {
            resources: None,
            scene,
            descriptor_layout,
            command_pool,
            depth_format,
            recreations: 0,
            device,
        };

        if surface.is_paused() {
            info!("Surface paused at startup; swapchain creation deferred");
        } else {
            lifecycle.resources = Some(lifecycle.build(surface)?);
        }
        Ok(lifecycle)
    }

    /// Rebuilds the resource set at the surface's current size and resets
    /// `image_fences` to one empty entry per new swapchain image.
    ///
    /// Returns [`RecreateOutcome::Paused`] without any GPU call when the
    /// surface is minimized or has a zero dimension.
    ///
    /// # Errors
    ///
    /// Any failure is fatal. The old set is already gone by the time a build
    /// error is returned, and [`is_built`](Self::is_built) reports `false`.
    pub fn recreate(
        &mut self,
        surface: &dyn SurfaceProvider,
        image_fences: &mut ImageFenceTable,
    ) -> RendererResult<RecreateOutcome> {
        if surface.is_paused() {
            debug!("Recreation skipped: surface paused");
            return Ok(RecreateOutcome::Paused);
        }

        self.device.device_wait_idle()?;

        // Dropping the set destroys its members in reverse construction order.
        self.resources = None;

        let resources = self.build(surface)?;
        image_fences.reset(resources.image_count());
        self.resources = Some(resources);
        self.recreations += 1;

        let extent = self.extent().unwrap_or_default();
        info!(
            "Swapchain recreated ({}): {}x{}, {} images",
            self.recreations,
            extent.width,
            extent.height,
            image_fences.len()
        );
        Ok(RecreateOutcome::Rebuilt)
    }

    fn build(&self, surface: &dyn SurfaceProvider) -> RendererResult<SwapchainResourceSet> {
        Ok(SwapchainResourceSet::build(
            &self.device,
            &self.scene,
            &self.descriptor_layout,
            &self.command_pool,
            self.depth_format,
            surface.drawable_size(),
        )?)
    }

    /// The current set, if one is built.
    #[inline]
    pub fn resources(&self) -> Option<&SwapchainResourceSet> {
        self.resources.as_ref()
    }

    #[inline]
    pub fn is_built(&self) -> bool {
        self.resources.is_some()
    }

    /// Image count of the current swapchain, zero when none is built.
    pub fn image_count(&self) -> usize {
        self.resources
            .as_ref()
            .map_or(0, SwapchainResourceSet::image_count)
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.resources.as_ref().map(SwapchainResourceSet::extent)
    }

    #[inline]
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    #[inline]
    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_format
    }

    /// Number of successful recreations so far.
    #[inline]
    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    #[inline]
    pub fn device(&self) -> &SharedDevice {
        &self.device
    }
}
