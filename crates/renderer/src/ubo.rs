//! Uniform buffer data for the scene shaders.
//!
//! [`SceneUniforms`] must match the GLSL `UniformBufferObject` block at
//! binding 0 exactly. It is `#[repr(C)]` and `Pod`, so it is written to the
//! GPU as its raw little-endian bytes.

use std::f32::consts::FRAC_PI_2;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use tracing::debug;

use renderer_rhi::RhiResult;
use renderer_rhi::buffer::{BufferUsage, DeviceBuffer};
use renderer_rhi::gpu::SharedDevice;

/// Model, view and projection matrices.
///
/// # Memory Layout
///
/// - Offset 0: model matrix (64 bytes)
/// - Offset 64: view matrix (64 bytes)
/// - Offset 128: projection matrix (64 bytes)
/// - Total size: 192 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SceneUniforms {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl SceneUniforms {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// A model spinning around Z at 90 degrees per second, seen from (2, 2, 2).
    ///
    /// The projection has its Y axis flipped for Vulkan clip space.
    pub fn spinning(elapsed_secs: f32, extent: vk::Extent2D) -> Self {
        let aspect = if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        };

        let model = Mat4::from_rotation_z(elapsed_secs * FRAC_PI_2);
        let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);
        let mut proj = Mat4::perspective_rh(45.0_f32.to_radians(), aspect, 0.1, 10.0);
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }
}

impl Default for SceneUniforms {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
        }
    }
}

/// Host-visible, host-coherent buffer holding one [`SceneUniforms`].
///
/// One exists per swapchain image; the frame loop writes it only after the
/// image's previous user has been waited on.
pub struct UniformBuffer {
    buffer: DeviceBuffer,
}

impl UniformBuffer {
    pub fn new(device: SharedDevice) -> RhiResult<Self> {
        let buffer =
            DeviceBuffer::with_usage(device, BufferUsage::Uniform, SceneUniforms::SIZE as u64)?;
        debug!("Created uniform buffer {:?}", buffer.handle());
        Ok(Self { buffer })
    }

    /// Overwrites the whole buffer with `uniforms`.
    pub fn write(&self, uniforms: &SceneUniforms) -> RhiResult<()> {
        self.buffer.write(0, bytemuck::bytes_of(uniforms))
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size()
    }

    #[inline]
    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }
}
