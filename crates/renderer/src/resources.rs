//! Static scene data and the swapchain-dependent resource set.
//!
//! [`Scene`] is uploaded once and survives every swapchain rebuild: vertex
//! and index buffers, the optional texture, and the pipeline description the
//! resource set rebuilds its pipeline from.
//!
//! [`SwapchainResourceSet`] is everything sized by or bound to the swapchain
//! images. It is built in one go from the current surface extent:
//!
//! ```text
//! swapchain -> render pass -> pipeline layout -> pipeline -> depth buffer
//!           -> framebuffers -> uniform buffers -> descriptor sets
//!           -> command buffers (recorded)
//! ```
//!
//! and dropped in exactly the reverse order, which the field order of the
//! struct encodes.

use ash::vk;
use tracing::{debug, info};

use renderer_rhi::{RhiError, RhiResult};
use renderer_rhi::buffer::{BufferUsage, DeviceBuffer};
use renderer_rhi::command::{CommandBuffer, CommandPool};
use renderer_rhi::descriptor::{
    DescriptorPool, DescriptorSetLayout, combined_image_sampler_binding, uniform_buffer_binding,
};
use renderer_rhi::gpu::{
    DescriptorBinding, DescriptorWrite, ImageDesc, RenderPassBegin, RenderPassDesc, SamplerDesc,
    SharedDevice,
};
use renderer_rhi::image::{DeviceImage, ImageView, Sampler};
use renderer_rhi::pipeline::{Framebuffer, GraphicsPipeline, PipelineDesc, PipelineLayout, RenderPass};
use renderer_rhi::swapchain::Swapchain;
use renderer_rhi::upload::Uploader;

use crate::depth_buffer::DepthBuffer;
use crate::ubo::{SceneUniforms, UniformBuffer};

/// Clear color of every frame: opaque black.
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Texture format of scene textures.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Tightly packed RGBA8 texels.
#[derive(Debug, Clone, Copy)]
pub struct TextureData<'a> {
    pub width: u32,
    pub height: u32,
    pub rgba: &'a [u8],
}

/// Sampled texture: image, view and sampler.
pub struct SceneTexture {
    sampler: Sampler,
    view: ImageView,
    image: DeviceImage,
}

impl SceneTexture {
    fn upload(device: &SharedDevice, uploader: &Uploader, data: TextureData<'_>) -> RhiResult<Self> {
        let image = DeviceImage::new(
            device.clone(),
            &ImageDesc {
                extent: vk::Extent2D {
                    width: data.width,
                    height: data.height,
                },
                format: TEXTURE_FORMAT,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            },
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        uploader.upload_to_image(&image, data.width, data.height, data.rgba)?;

        let view = ImageView::new(
            device.clone(),
            image.handle(),
            TEXTURE_FORMAT,
            vk::ImageAspectFlags::COLOR,
        )?;
        let sampler = Sampler::new(device.clone(), &SamplerDesc::default())?;

        Ok(Self {
            sampler,
            view,
            image,
        })
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image.handle()
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view.handle()
    }

    #[inline]
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.handle()
    }
}

/// Geometry, texture and pipeline description of the single drawn mesh.
pub struct Scene {
    pipeline: PipelineDesc,
    vertex_buffer: DeviceBuffer,
    index_buffer: DeviceBuffer,
    index_count: u32,
    texture: Option<SceneTexture>,
}

impl Scene {
    /// Uploads `vertices` (already serialized) and 16-bit `indices` into
    /// device-local buffers, plus `texture` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if either payload is empty, there are more indices
    /// than a draw can address, or any upload fails.
    pub fn upload(
        device: &SharedDevice,
        uploader: &Uploader,
        pipeline: PipelineDesc,
        vertices: &[u8],
        indices: &[u16],
        texture: Option<TextureData<'_>>,
    ) -> RhiResult<Self> {
        let index_count = index_count(indices.len())?;
        let vertex_buffer = uploader.upload_with_usage(BufferUsage::Vertex, vertices)?;
        let index_buffer =
            uploader.upload_with_usage(BufferUsage::Index, bytemuck::cast_slice(indices))?;
        let texture = texture
            .map(|data| SceneTexture::upload(device, uploader, data))
            .transpose()?;

        info!(
            "Scene uploaded: {} vertex bytes, {} indices{}",
            vertices.len(),
            indices.len(),
            if texture.is_some() { ", textured" } else { "" }
        );

        Ok(Self {
            pipeline,
            vertex_buffer,
            index_buffer,
            index_count,
            texture,
        })
    }

    /// Descriptor bindings the scene's shaders expect.
    pub fn descriptor_bindings(&self) -> Vec<DescriptorBinding> {
        let mut bindings = vec![uniform_buffer_binding(0)];
        if self.texture.is_some() {
            bindings.push(combined_image_sampler_binding(1));
        }
        bindings
    }

    #[inline]
    pub fn pipeline(&self) -> &PipelineDesc {
        &self.pipeline
    }

    #[inline]
    pub fn vertex_buffer(&self) -> &DeviceBuffer {
        &self.vertex_buffer
    }

    #[inline]
    pub fn index_buffer(&self) -> &DeviceBuffer {
        &self.index_buffer
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    #[inline]
    pub fn texture(&self) -> Option<&SceneTexture> {
        self.texture.as_ref()
    }
}

/// Command buffers allocated from a pool the set does not own.
///
/// Returned to the pool on drop; the pool must outlive the set.
struct PooledCommandBuffers {
    device: SharedDevice,
    pool: vk::CommandPool,
    buffers: Vec<CommandBuffer>,
}

impl PooledCommandBuffers {
    fn allocate(pool: &CommandPool, count: usize) -> RhiResult<Self> {
        let buffers = pool.allocate(count as u32)?;
        Ok(Self {
            device: pool.device().clone(),
            pool: pool.handle(),
            buffers,
        })
    }
}

impl Drop for PooledCommandBuffers {
    fn drop(&mut self) {
        let handles: Vec<vk::CommandBuffer> =
            self.buffers.iter().map(CommandBuffer::handle).collect();
        self.device.free_command_buffers(self.pool, &handles);
        debug!("Freed {} frame command buffers", handles.len());
    }
}

/// Everything that has to be rebuilt when the swapchain changes.
pub struct SwapchainResourceSet {
    // Field order is destruction order: the reverse of construction.
    command_buffers: PooledCommandBuffers,
    descriptor_pool: DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,
    uniform_buffers: Vec<UniformBuffer>,
    framebuffers: Vec<Framebuffer>,
    depth: Option<DepthBuffer>,
    pipeline: GraphicsPipeline,
    pipeline_layout: PipelineLayout,
    render_pass: RenderPass,
    swapchain: Swapchain,
}

impl SwapchainResourceSet {
    /// Builds the full set for the surface's current state and records one
    /// command buffer per swapchain image.
    ///
    /// `drawable` is the window's pixel size; it only matters when the
    /// surface leaves the extent to the application.
    ///
    /// # Errors
    ///
    /// Returns the first creation failure. Everything built before it is
    /// dropped in reverse order.
    pub fn build(
        device: &SharedDevice,
        scene: &Scene,
        descriptor_layout: &DescriptorSetLayout,
        command_pool: &CommandPool,
        depth_format: Option<vk::Format>,
        drawable: vk::Extent2D,
    ) -> RhiResult<Self> {
        let swapchain = Swapchain::new(device.clone(), drawable)?;
        let extent = swapchain.extent();
        let image_count = swapchain.image_count();

        let render_pass = RenderPass::new(
            device.clone(),
            RenderPassDesc {
                color_format: swapchain.format(),
                depth_format,
            },
        )?;
        let pipeline_layout = PipelineLayout::new(device.clone(), &[descriptor_layout.handle()])?;
        let pipeline = GraphicsPipeline::new(
            device.clone(),
            scene.pipeline(),
            &pipeline_layout,
            &render_pass,
            extent,
        )?;

        let depth = depth_format
            .map(|format| DepthBuffer::new(device.clone(), extent, format))
            .transpose()?;

        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|view| {
                let mut attachments = vec![view.handle()];
                if let Some(depth) = &depth {
                    attachments.push(depth.view());
                }
                Framebuffer::new(device.clone(), &render_pass, &attachments, extent)
            })
            .collect::<RhiResult<Vec<_>>>()?;

        let uniform_buffers = (0..image_count)
            .map(|_| UniformBuffer::new(device.clone()))
            .collect::<RhiResult<Vec<_>>>()?;

        let descriptor_pool = DescriptorPool::for_layout(
            device.clone(),
            descriptor_layout.bindings(),
            image_count as u32,
        )?;
        let descriptor_sets = descriptor_pool.allocate(descriptor_layout, image_count)?;
        for (set, uniforms) in descriptor_sets.iter().zip(&uniform_buffers) {
            let mut writes = vec![DescriptorWrite::UniformBuffer {
                binding: 0,
                buffer: uniforms.handle(),
                range: SceneUniforms::SIZE as vk::DeviceSize,
            }];
            if let Some(texture) = scene.texture() {
                writes.push(DescriptorWrite::CombinedImageSampler {
                    binding: 1,
                    view: texture.view(),
                    sampler: texture.sampler(),
                });
            }
            descriptor_pool.update(*set, &writes);
        }

        let command_buffers = PooledCommandBuffers::allocate(command_pool, image_count)?;

        let set = Self {
            command_buffers,
            descriptor_pool,
            descriptor_sets,
            uniform_buffers,
            framebuffers,
            depth,
            pipeline,
            pipeline_layout,
            render_pass,
            swapchain,
        };
        set.record(scene)?;

        info!(
            "Swapchain resources built: {}x{}, {} images{}",
            extent.width,
            extent.height,
            image_count,
            if set.depth.is_some() { ", depth" } else { "" }
        );
        Ok(set)
    }

    /// Records the draw of `scene` into every image's command buffer.
    fn record(&self, scene: &Scene) -> RhiResult<()> {
        let mut clear_values = vec![vk::ClearValue {
            color: vk::ClearColorValue {
                float32: CLEAR_COLOR,
            },
        }];
        if self.depth.is_some() {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });
        }

        for ((cmd, framebuffer), set) in self
            .command_buffers
            .buffers
            .iter()
            .zip(&self.framebuffers)
            .zip(&self.descriptor_sets)
        {
            cmd.begin_reusable()?;
            cmd.begin_render_pass(&RenderPassBegin {
                render_pass: self.render_pass.handle(),
                framebuffer: framebuffer.handle(),
                extent: self.swapchain.extent(),
                clear_values: &clear_values,
            });
            cmd.bind_pipeline(self.pipeline.handle());
            cmd.bind_vertex_buffer(scene.vertex_buffer().handle());
            cmd.bind_index_buffer(scene.index_buffer().handle(), vk::IndexType::UINT16);
            cmd.bind_descriptor_set(self.pipeline_layout.handle(), *set);
            cmd.draw_indexed(scene.index_count());
            cmd.end_render_pass();
            cmd.end()?;
        }
        Ok(())
    }

    #[inline]
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    #[inline]
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    #[inline]
    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline.handle()
    }

    #[inline]
    pub fn depth(&self) -> Option<&DepthBuffer> {
        self.depth.as_ref()
    }

    /// Pre-recorded command buffer for `image_index`.
    pub fn command_buffer(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.command_buffers
            .buffers
            .get(image_index as usize)
            .map(CommandBuffer::handle)
    }

    pub fn uniform_buffer(&self, image_index: u32) -> Option<&UniformBuffer> {
        self.uniform_buffers.get(image_index as usize)
    }

    pub fn descriptor_set(&self, image_index: u32) -> Option<vk::DescriptorSet> {
        self.descriptor_sets.get(image_index as usize).copied()
    }
}

fn index_count(len: usize) -> RhiResult<u32> {
    u32::try_from(len)
        .map_err(|_| RhiError::OutOfBounds(format!("{len} indices in one indexed draw")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use renderer_rhi::mock::{MockDevice, MockEvent, ObjectKind, RecordedCommand};
    use renderer_rhi::shader::{SPIRV_MAGIC, ShaderCode, ShaderStage};
    use renderer_rhi::vertex::ColoredVertex;

    use super::*;

    fn pipeline_desc() -> PipelineDesc {
        let bytes: Vec<u8> = [SPIRV_MAGIC, 1, 2]
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect();
        let vertex = ShaderCode::from_spirv_bytes(&bytes, ShaderStage::Vertex).unwrap();
        let fragment = ShaderCode::from_spirv_bytes(&bytes, ShaderStage::Fragment).unwrap();
        PipelineDesc::new(&vertex, &fragment)
            .vertex_binding(ColoredVertex::binding_description())
            .vertex_attributes(&ColoredVertex::attribute_descriptions())
    }

    fn scene(device: &SharedDevice, textured: bool) -> Scene {
        let uploader = Uploader::new(device.clone()).unwrap();
        let vertices = [0u8; 60];
        let texels = [255u8; 4 * 4 * 4];
        let texture = textured.then_some(TextureData {
            width: 4,
            height: 4,
            rgba: &texels,
        });
        Scene::upload(device, &uploader, pipeline_desc(), &vertices, &[0, 1, 2], texture).unwrap()
    }

    #[test]
    fn test_scene_bindings_follow_texture() {
        let device: SharedDevice = Arc::new(MockDevice::new());
        assert_eq!(scene(&device, false).descriptor_bindings().len(), 1);

        let textured = scene(&device, true);
        let bindings = textured.descriptor_bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(textured.index_count(), 3);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_index_count_beyond_u32_is_rejected() {
        assert_eq!(index_count(36).unwrap(), 36);
        assert_eq!(index_count(u32::MAX as usize).unwrap(), u32::MAX);
        assert!(matches!(
            index_count(u32::MAX as usize + 1),
            Err(RhiError::OutOfBounds(_))
        ));
    }

    #[test]
    fn test_texture_ends_shader_readable() {
        let mock = Arc::new(MockDevice::new());
        let device: SharedDevice = mock.clone();
        let scene = scene(&device, true);
        let texture = scene.texture().unwrap();
        assert_eq!(
            mock.image_layout(texture.image()),
            Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        );
    }

    #[test]
    fn test_build_sizes_everything_per_image() {
        let mock = Arc::new(MockDevice::new());
        let device: SharedDevice = mock.clone();
        let scene = scene(&device, true);
        let layout = DescriptorSetLayout::new(device.clone(), &scene.descriptor_bindings()).unwrap();
        let pool = CommandPool::new(device.clone()).unwrap();

        let set = SwapchainResourceSet::build(
            &device,
            &scene,
            &layout,
            &pool,
            Some(vk::Format::D32_SFLOAT),
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        )
        .unwrap();

        assert_eq!(set.image_count(), 3);
        assert_eq!(set.framebuffer_count(), 3);
        assert!(set.depth().is_some());
        for index in 0..3 {
            assert!(set.command_buffer(index).is_some());
            assert!(set.uniform_buffer(index).is_some());
            assert!(set.descriptor_set(index).is_some());
        }
        assert!(set.command_buffer(3).is_none());

        let updates = mock
            .events()
            .into_iter()
            .filter(|event| matches!(event, MockEvent::UpdateDescriptorSet { writes: 2, .. }))
            .count();
        assert_eq!(updates, 3);
    }

    #[test]
    fn test_recorded_draw_sequence() {
        let mock = Arc::new(MockDevice::new());
        let device: SharedDevice = mock.clone();
        let scene = scene(&device, false);
        let layout = DescriptorSetLayout::new(device.clone(), &scene.descriptor_bindings()).unwrap();
        let pool = CommandPool::new(device.clone()).unwrap();
        let set = SwapchainResourceSet::build(
            &device,
            &scene,
            &layout,
            &pool,
            None,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        )
        .unwrap();

        let commands = mock.recorded_commands(set.command_buffer(0).unwrap());
        assert!(matches!(commands[0], RecordedCommand::BeginRenderPass { .. }));
        assert!(matches!(commands[1], RecordedCommand::BindPipeline(_)));
        assert!(matches!(commands[2], RecordedCommand::BindVertexBuffer(_)));
        assert!(matches!(
            commands[3],
            RecordedCommand::BindIndexBuffer(_, vk::IndexType::UINT16)
        ));
        assert!(matches!(commands[4], RecordedCommand::BindDescriptorSet(_)));
        assert_eq!(commands[5], RecordedCommand::DrawIndexed(3));
        assert_eq!(commands[6], RecordedCommand::EndRenderPass);
        assert!(set.depth().is_none());
    }

    #[test]
    fn test_drop_releases_everything_but_the_pool() {
        let mock = Arc::new(MockDevice::new());
        let device: SharedDevice = mock.clone();
        let scene = scene(&device, false);
        let layout = DescriptorSetLayout::new(device.clone(), &scene.descriptor_bindings()).unwrap();
        let pool = CommandPool::new(device.clone()).unwrap();
        let before = mock.live_total();

        let set = SwapchainResourceSet::build(
            &device,
            &scene,
            &layout,
            &pool,
            Some(vk::Format::D32_SFLOAT),
            vk::Extent2D {
                width: 640,
                height: 480,
            },
        )
        .unwrap();
        drop(set);

        assert_eq!(mock.live_total(), before);
        assert_eq!(mock.live_count(ObjectKind::CommandPool), 1);
        assert!(mock.violations().is_empty());
    }
}
