//! GPU bring-up for the demo: instance, surface, device, scene and the frame
//! orchestrator that draws it.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use renderer_core::{FrameTimer, RendererConfig};
use renderer_platform::{Window, create_surface, required_extensions};
use renderer_renderer::ubo::SceneUniforms;
use renderer_renderer::{
    FrameOrchestrator, FrameOutcome, RendererResult, Scene, SwapchainLifecycle, TextureData,
};
use renderer_rhi::device::Device;
use renderer_rhi::gpu::SharedDevice;
use renderer_rhi::instance::Instance;
use renderer_rhi::physical_device::select_physical_device;
use renderer_rhi::pipeline::PipelineDesc;
use renderer_rhi::shader::{ShaderCode, ShaderStage};
use renderer_rhi::upload::Uploader;
use renderer_rhi::vertex::TexturedVertex;

use crate::demo;

const APP_NAME: &std::ffi::CStr = c"Vulkan Renderer";

/// Everything that lives as long as the window does.
pub struct RenderContext {
    frames: FrameOrchestrator,
    timer: FrameTimer,
}

impl RenderContext {
    pub fn new(window: &Window, config: &RendererConfig) -> Result<Self> {
        let extensions =
            required_extensions(window).context("Failed to query surface extensions")?;
        let instance = Instance::new(APP_NAME, config.validation, &extensions)
            .context("Failed to create Vulkan instance")?;
        let surface = Arc::new(
            create_surface(&instance, window).context("Failed to create window surface")?,
        );
        let gpu = select_physical_device(&surface).context("No usable GPU")?;
        info!(
            "Using {} ({}, {} MiB device local)",
            gpu.device_name(),
            gpu.device_type_name(),
            gpu.device_local_memory() / (1024 * 1024)
        );

        let device: SharedDevice =
            Device::new(surface, &gpu).context("Failed to create logical device")?;

        let scene = load_scene(&device, &config.shader_dir)?;
        let lifecycle = SwapchainLifecycle::new(device.clone(), scene, window)
            .context("Failed to build swapchain resources")?;
        let frames = FrameOrchestrator::new(device, lifecycle, config.frames_in_flight)
            .context("Failed to create frame slots")?;

        Ok(Self {
            frames,
            timer: FrameTimer::new(),
        })
    }

    /// Draws one frame unless the window is paused.
    pub fn draw(&mut self, window: &Window) -> RendererResult<FrameOutcome> {
        let elapsed = self.timer.elapsed_secs();
        let outcome = self.frames.draw_frame(window, |frame| {
            let uniforms = SceneUniforms::spinning(elapsed, frame.extent);
            Ok(frame.uniforms.write(&uniforms)?)
        })?;

        if matches!(outcome, FrameOutcome::Presented { .. })
            && let Some(fps) = self.timer.tick().fps
        {
            tracing::debug!(
                "{:.1} fps, {} frames, {} recreations",
                fps,
                self.timer.frame_count(),
                self.frames.lifecycle().recreations()
            );
        }
        Ok(outcome)
    }

    pub fn notify_resized(&mut self) {
        self.frames.notify_resized();
    }

    pub fn shutdown(&mut self) -> RendererResult<()> {
        self.frames.shutdown()
    }
}

fn load_scene(device: &SharedDevice, shader_dir: &Path) -> Result<Scene> {
    let vertex_path = shader_dir.join("scene.vert.spv");
    let fragment_path = shader_dir.join("scene.frag.spv");
    let vertex = ShaderCode::from_spirv_file(&vertex_path, ShaderStage::Vertex)
        .with_context(|| format!("Failed to load {}", vertex_path.display()))?;
    let fragment = ShaderCode::from_spirv_file(&fragment_path, ShaderStage::Fragment)
        .with_context(|| format!("Failed to load {}", fragment_path.display()))?;

    let pipeline = PipelineDesc::new(&vertex, &fragment)
        .vertex_binding(TexturedVertex::binding_description())
        .vertex_attributes(&TexturedVertex::attribute_descriptions());

    let (vertices, indices) = demo::cube();
    let texels = demo::checkerboard();
    let texture = TextureData {
        width: demo::CHECKER_SIZE,
        height: demo::CHECKER_SIZE,
        rgba: &texels,
    };

    let uploader = Uploader::new(device.clone()).context("Failed to create upload pool")?;
    Scene::upload(
        device,
        &uploader,
        pipeline,
        bytemuck::cast_slice(&vertices),
        &indices,
        Some(texture),
    )
    .context("Failed to upload scene")
}
