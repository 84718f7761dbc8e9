//! Shared fixtures for the renderer integration tests.

#![allow(dead_code)]

use std::cell::Cell;
use std::sync::Arc;

use ash::vk;
use glam::{Vec2, Vec3};

use renderer_platform::SurfaceProvider;
use renderer_renderer::{FrameOrchestrator, Scene, SwapchainLifecycle};
use renderer_rhi::gpu::SharedDevice;
use renderer_rhi::mock::{MockDevice, MockEvent, ObjectKind};
use renderer_rhi::pipeline::PipelineDesc;
use renderer_rhi::shader::{SPIRV_MAGIC, ShaderCode, ShaderStage};
use renderer_rhi::upload::Uploader;
use renderer_rhi::vertex::ColoredVertex;

/// Window stand-in whose size and minimized state tests change directly.
pub struct TestSurface {
    size: Cell<vk::Extent2D>,
    minimized: Cell<bool>,
}

impl TestSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Cell::new(vk::Extent2D { width, height }),
            minimized: Cell::new(false),
        }
    }

    pub fn set_size(&self, width: u32, height: u32) {
        self.size.set(vk::Extent2D { width, height });
    }

    pub fn set_minimized(&self, minimized: bool) {
        self.minimized.set(minimized);
    }
}

impl SurfaceProvider for TestSurface {
    fn drawable_size(&self) -> vk::Extent2D {
        self.size.get()
    }

    fn is_minimized(&self) -> bool {
        self.minimized.get()
    }
}

pub const TRIANGLE: [ColoredVertex; 3] = [
    ColoredVertex::new(Vec2::new(0.0, -0.5), Vec3::new(1.0, 0.0, 0.0)),
    ColoredVertex::new(Vec2::new(0.5, 0.5), Vec3::new(0.0, 1.0, 0.0)),
    ColoredVertex::new(Vec2::new(-0.5, 0.5), Vec3::new(0.0, 0.0, 1.0)),
];

pub fn pipeline_desc() -> PipelineDesc {
    let bytes: Vec<u8> = [SPIRV_MAGIC, 0x0001_0000, 0]
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect();
    let vertex = ShaderCode::from_spirv_bytes(&bytes, ShaderStage::Vertex).unwrap();
    let fragment = ShaderCode::from_spirv_bytes(&bytes, ShaderStage::Fragment).unwrap();
    PipelineDesc::new(&vertex, &fragment)
        .vertex_binding(ColoredVertex::binding_description())
        .vertex_attributes(&ColoredVertex::attribute_descriptions())
}

pub fn triangle_scene(device: &SharedDevice) -> Scene {
    let uploader = Uploader::new(device.clone()).unwrap();
    Scene::upload(
        device,
        &uploader,
        pipeline_desc(),
        bytemuck::cast_slice(&TRIANGLE),
        &[0, 1, 2],
        None,
    )
    .unwrap()
}

pub fn lifecycle(mock: &Arc<MockDevice>, surface: &TestSurface) -> SwapchainLifecycle {
    let device: SharedDevice = mock.clone();
    let scene = triangle_scene(&device);
    SwapchainLifecycle::new(device, scene, surface).unwrap()
}

pub fn orchestrator(
    mock: &Arc<MockDevice>,
    surface: &TestSurface,
    frames_in_flight: usize,
) -> FrameOrchestrator {
    let device: SharedDevice = mock.clone();
    FrameOrchestrator::new(device, lifecycle(mock, surface), frames_in_flight).unwrap()
}

/// Kinds of the objects destroyed in `events`, in order.
pub fn destroyed_kinds(events: &[MockEvent]) -> Vec<ObjectKind> {
    events
        .iter()
        .filter_map(|event| match event {
            MockEvent::Destroy { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect()
}

pub fn submits(events: &[MockEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, MockEvent::Submit { .. }))
        .count()
}

pub fn presents(events: &[MockEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, MockEvent::Present { .. }))
        .count()
}
