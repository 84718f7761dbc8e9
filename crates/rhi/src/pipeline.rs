//! Graphics pipeline, render pass and framebuffer objects.
//!
//! # Overview
//!
//! - [`PipelineDesc`] is the immutable description of the scene pipeline:
//!   shader words, vertex layout and fixed-function switches. It is built once
//!   and handed to the device verbatim every time the swapchain is rebuilt.
//! - [`PipelineLayout`], [`GraphicsPipeline`], [`RenderPass`] and
//!   [`Framebuffer`] own their handles.
//!
//! The viewport and scissor are baked from the extent passed at creation, so
//! the pipeline belongs to the swapchain-dependent resource set.
//!
//! # Example
//!
//! ```no_run
//! use renderer_rhi::pipeline::{CullMode, PipelineDesc};
//! use renderer_rhi::shader::ShaderCode;
//! use renderer_rhi::vertex::TexturedVertex;
//!
//! # fn example(vertex: &ShaderCode, fragment: &ShaderCode) {
//! let desc = PipelineDesc::new(vertex, fragment)
//!     .vertex_binding(TexturedVertex::binding_description())
//!     .vertex_attributes(&TexturedVertex::attribute_descriptions())
//!     .cull_mode(CullMode::Back)
//!     .depth_test_enable(true);
//! # }
//! ```

use ash::vk;
use tracing::{debug, info};

use crate::error::RhiResult;
use crate::gpu::{RenderPassDesc, SharedDevice};
use crate::shader::ShaderCode;

/// Face culling mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

impl CullMode {
    /// Converts to Vulkan cull mode flags.
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Front face winding order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrontFace {
    /// Counter-clockwise winding is front-facing.
    #[default]
    CounterClockwise,
    /// Clockwise winding is front-facing.
    Clockwise,
}

impl FrontFace {
    /// Converts to Vulkan front face.
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

/// Immutable description of the scene's graphics pipeline.
#[derive(Clone, Debug)]
pub struct PipelineDesc {
    pub vertex_spirv: Vec<u32>,
    pub fragment_spirv: Vec<u32>,
    pub vertex_binding: Option<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    /// Depth test and write with `LESS`; ignored when the render pass has no
    /// depth attachment.
    pub depth_test: bool,
}

impl PipelineDesc {
    /// Starts a description with both shader stages and default state:
    /// back-face culling, counter-clockwise front faces, depth test on.
    pub fn new(vertex: &ShaderCode, fragment: &ShaderCode) -> Self {
        Self {
            vertex_spirv: vertex.words().to_vec(),
            fragment_spirv: fragment.words().to_vec(),
            vertex_binding: None,
            vertex_attributes: Vec::new(),
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            depth_test: true,
        }
    }

    pub fn vertex_binding(mut self, binding: vk::VertexInputBindingDescription) -> Self {
        self.vertex_binding = Some(binding);
        self
    }

    pub fn vertex_attributes(mut self, attributes: &[vk::VertexInputAttributeDescription]) -> Self {
        self.vertex_attributes = attributes.to_vec();
        self
    }

    pub fn cull_mode(mut self, mode: CullMode) -> Self {
        self.cull_mode = mode;
        self
    }

    pub fn front_face(mut self, face: FrontFace) -> Self {
        self.front_face = face;
        self
    }

    pub fn depth_test_enable(mut self, enable: bool) -> Self {
        self.depth_test = enable;
        self
    }
}

/// Vulkan pipeline layout wrapper.
pub struct PipelineLayout {
    device: SharedDevice,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    pub fn new(device: SharedDevice, set_layouts: &[vk::DescriptorSetLayout]) -> RhiResult<Self> {
        let layout = device.create_pipeline_layout(set_layouts)?;
        debug!("Created pipeline layout {:?}", layout);
        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        self.device.destroy_pipeline_layout(self.layout);
        debug!("Destroyed pipeline layout {:?}", self.layout);
    }
}

/// Graphics pipeline wrapper.
pub struct GraphicsPipeline {
    device: SharedDevice,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Builds `desc` against `render_pass` with a viewport covering `extent`.
    pub fn new(
        device: SharedDevice,
        desc: &PipelineDesc,
        layout: &PipelineLayout,
        render_pass: &RenderPass,
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let pipeline =
            device.create_graphics_pipeline(desc, layout.handle(), render_pass.handle(), extent)?;
        info!(
            "Graphics pipeline created for {}x{}",
            extent.width, extent.height
        );
        Ok(Self { device, pipeline })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        self.device.destroy_pipeline(self.pipeline);
        debug!("Destroyed graphics pipeline {:?}", self.pipeline);
    }
}

/// Render pass wrapper.
pub struct RenderPass {
    device: SharedDevice,
    render_pass: vk::RenderPass,
    desc: RenderPassDesc,
}

impl RenderPass {
    pub fn new(device: SharedDevice, desc: RenderPassDesc) -> RhiResult<Self> {
        let render_pass = device.create_render_pass(&desc)?;
        debug!(
            "Created render pass {:?} (color {:?}, depth {:?})",
            render_pass, desc.color_format, desc.depth_format
        );
        Ok(Self {
            device,
            render_pass,
            desc,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn has_depth(&self) -> bool {
        self.desc.depth_format.is_some()
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.device.destroy_render_pass(self.render_pass);
        debug!("Destroyed render pass {:?}", self.render_pass);
    }
}

/// Framebuffer wrapper.
pub struct Framebuffer {
    device: SharedDevice,
    framebuffer: vk::Framebuffer,
}

impl Framebuffer {
    /// Creates a framebuffer over `attachments` in render pass order.
    pub fn new(
        device: SharedDevice,
        render_pass: &RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let framebuffer = device.create_framebuffer(render_pass.handle(), attachments, extent)?;
        Ok(Self {
            device,
            framebuffer,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        self.device.destroy_framebuffer(self.framebuffer);
    }
}
