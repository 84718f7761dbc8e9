//! Vulkan Renderer - Main Entry Point
//!
//! Opens a window and draws a spinning textured cube with a fixed number of
//! frames in flight. Drawing stops while the window is minimized and the
//! swapchain is rebuilt whenever the window changes size.

mod context;
mod demo;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use renderer_core::RendererConfig;
use renderer_platform::{SurfaceProvider, Window};

use crate::context::RenderContext;

const CONFIG_ENV: &str = "RENDERER_CONFIG";
const DEFAULT_CONFIG: &str = "renderer.toml";

struct App {
    config: RendererConfig,
    // Dropped before the window it draws into.
    context: Option<RenderContext>,
    window: Option<Window>,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            context: None,
            window: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window =
            Window::new(event_loop, &self.config.window).context("Failed to create window")?;
        let context = RenderContext::new(&window, &self.config)?;
        self.context = Some(context);
        self.window = Some(window);
        Ok(())
    }
}

fn shutdown(context: &mut RenderContext) {
    if let Err(e) = context.shutdown() {
        error!("Shutdown failed: {}", e);
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match self.init(event_loop) {
            Ok(()) => info!("Initialization complete, entering main loop"),
            Err(e) => {
                error!("Failed to initialize: {:?}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let (Some(window), Some(context)) = (self.window.as_mut(), self.context.as_mut()) else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                shutdown(context);
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                window.resize(size.width, size.height);
                context.notify_resized();
            }
            WindowEvent::Occluded(occluded) => {
                window.set_minimized(occluded);
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = context.draw(window) {
                    error!("Render error: {}", e);
                    shutdown(context);
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        // While paused, sleep until the next window event.
        if window.is_paused() {
            event_loop.set_control_flow(ControlFlow::Wait);
        } else {
            event_loop.set_control_flow(ControlFlow::Poll);
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    renderer_core::init_logging();
    info!("Starting Vulkan Renderer");

    let config_path = std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = RendererConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
