//! Window management using winit.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use renderer_core::{Error, Result, WindowConfig};

use crate::surface::SurfaceProvider;

/// Size and visibility as last reported by window events.
///
/// Occlusion and size are tracked apart: a `Resized` event never clears an
/// earlier `Occluded(true)`. A zero size pauses drawing through
/// [`SurfaceProvider::is_paused`] on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DrawableState {
    width: u32,
    height: u32,
    occluded: bool,
}

impl DrawableState {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            occluded: false,
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn set_occluded(&mut self, occluded: bool) {
        self.occluded = occluded;
    }
}

impl SurfaceProvider for DrawableState {
    fn drawable_size(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    fn is_minimized(&self) -> bool {
        self.occluded
    }
}

/// A resizable winit window that reports its drawable state to the renderer.
pub struct Window {
    window: Arc<WinitWindow>,
    state: DrawableState,
}

impl Window {
    /// Creates a window from the `[window]` configuration section.
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        let size = window.inner_size();
        tracing::info!(
            "Window created: {}x{} (requested {}x{})",
            size.width,
            size.height,
            config.width,
            config.height
        );

        Ok(Self {
            window: Arc::new(window),
            state: DrawableState::new(size.width, size.height),
        })
    }

    /// Get a reference to the underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    pub fn width(&self) -> u32 {
        self.state.width
    }

    pub fn height(&self) -> u32 {
        self.state.height
    }

    /// Records a new drawable size from a `Resized` event.
    ///
    /// Some platforms report minimization only as a zero size.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.state.resize(width, height);
        tracing::debug!("Window resized: {}x{}", width, height);
    }

    /// Records a visibility change from an `Occluded` event.
    pub fn set_minimized(&mut self, minimized: bool) {
        if self.state.occluded != minimized {
            tracing::debug!("Window minimized: {}", minimized);
        }
        self.state.set_occluded(minimized);
    }

    /// Width over height, or 1.0 while the window has no area.
    pub fn aspect_ratio(&self) -> f32 {
        if self.state.height == 0 {
            1.0
        } else {
            self.state.width as f32 / self.state.height as f32
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

impl SurfaceProvider for Window {
    fn drawable_size(&self) -> vk::Extent2D {
        self.state.drawable_size()
    }

    fn is_minimized(&self) -> bool {
        self.state.is_minimized() || self.window.is_minimized().unwrap_or(false)
    }
}

impl HasDisplayHandle for Window {
    fn display_handle(&self) -> std::result::Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl HasWindowHandle for Window {
    fn window_handle(&self) -> std::result::Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}
