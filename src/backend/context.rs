// Vulkan implementation of the renderer backend
//
// Owns every GPU object the demo needs, split the same way the controller
// splits its lifecycle:
//
//   persistent (create_persistent .. shutdown)
//     surface format, descriptor objects, pipeline, vertex/index buffers,
//     command pool, per-slot FrameSync
//
//   surface targets (build_targets .. release_targets)
//     image views, framebuffers, recorded command buffers, images-in-flight
//
// The swapchain handle itself outlives release_targets so the next build can
// pass it as old_swapchain. Per-image uniforms only ever grow.

use anyhow::{Context, Result};
use ash::vk;
use glam::Mat4;
use std::sync::Arc;

use super::buffer::HostBuffer;
use super::commands::{self, DrawRecording};
use super::descriptor::{DescriptorObjects, ImageUniforms};
use super::pipeline::{self, GraphicsPipeline};
use super::swapchain::{self, SurfaceSupport, Swapchain, SwapchainDesc};
use super::sync::{self, FrameSync, FENCE_TIMEOUT_NS};
use super::VulkanDevice;
use crate::renderer::{Acquired, Presented, RenderBackend, SurfaceTargets};
use crate::scene::{SQUARE_INDICES, SQUARE_VERTICES};

/// Backend knobs that come from the config file
#[derive(Debug, Clone, Copy)]
pub struct BackendSettings {
    pub clear_color: [f32; 4],
    pub present_mode: vk::PresentModeKHR,
    pub swapchain_images: u32,
}

pub struct VulkanBackend {
    settings: BackendSettings,
    surface_format: Option<vk::SurfaceFormatKHR>,

    // ─────────────────────────────────────────────────────────────────────────
    // PERSISTENT
    // ─────────────────────────────────────────────────────────────────────────
    descriptors: Option<DescriptorObjects>,
    pipeline: Option<GraphicsPipeline>,
    vertex_buffer: Option<HostBuffer>,
    index_buffer: Option<HostBuffer>,
    command_pool: vk::CommandPool,
    frame_sync: Vec<FrameSync>,
    uniforms: ImageUniforms,

    // ─────────────────────────────────────────────────────────────────────────
    // SURFACE TARGETS
    // ─────────────────────────────────────────────────────────────────────────
    swapchain: Option<Swapchain>,
    framebuffers: Vec<vk::Framebuffer>,
    /// One per swapchain image, recorded once per build
    command_buffers: Vec<vk::CommandBuffer>,
    /// Fence of the submission currently using each image (null if none)
    images_in_flight: Vec<vk::Fence>,

    shut_down: bool,
    // Last field so every resource above is gone before the device drops
    device: Arc<VulkanDevice>,
}

impl VulkanBackend {
    pub fn new(device: Arc<VulkanDevice>, settings: BackendSettings) -> Self {
        Self {
            settings,
            surface_format: None,
            descriptors: None,
            pipeline: None,
            vertex_buffer: None,
            index_buffer: None,
            command_pool: vk::CommandPool::null(),
            frame_sync: Vec::new(),
            uniforms: ImageUniforms::default(),
            swapchain: None,
            framebuffers: Vec::new(),
            command_buffers: Vec::new(),
            images_in_flight: Vec::new(),
            shut_down: false,
            device,
        }
    }

    pub fn device_name(&self) -> String {
        self.device.name()
    }

    fn sync_slot(&self, slot: usize) -> Result<&FrameSync> {
        self.frame_sync
            .get(slot)
            .with_context(|| format!("Frame slot {} does not exist", slot))
    }

    fn live_swapchain(&self) -> Result<&Swapchain> {
        self.swapchain
            .as_ref()
            .context("No swapchain; surface targets were not built")
    }

    /// Record the square draw for every swapchain image
    fn record_command_buffers(&self, extent: vk::Extent2D) -> Result<()> {
        let pipeline = self.pipeline.as_ref().context("Pipeline not created")?;
        let vertex_buffer = self.vertex_buffer.as_ref().context("Vertex buffer not created")?;
        let index_buffer = self.index_buffer.as_ref().context("Index buffer not created")?;

        let draw = DrawRecording {
            render_pass: pipeline.render_pass,
            pipeline: pipeline.pipeline,
            pipeline_layout: pipeline.layout,
            vertex_buffer: vertex_buffer.buffer,
            index_buffer: index_buffer.buffer,
            index_count: SQUARE_INDICES.len() as u32,
            extent,
            clear_color: self.settings.clear_color,
        };

        for (i, (&cmd, &framebuffer)) in self
            .command_buffers
            .iter()
            .zip(&self.framebuffers)
            .enumerate()
        {
            let descriptor_set = self
                .uniforms
                .descriptor_set(i)
                .with_context(|| format!("No descriptor set for swapchain image {}", i))?;
            commands::record_draw(&self.device.device, cmd, framebuffer, descriptor_set, &draw)?;
        }

        Ok(())
    }

    fn destroy_targets(&mut self) {
        pipeline::destroy_framebuffers(&self.device, &mut self.framebuffers);

        if !self.command_buffers.is_empty() {
            unsafe {
                self.device
                    .device
                    .free_command_buffers(self.command_pool, &self.command_buffers)
            };
            self.command_buffers.clear();
        }

        if let Some(swapchain) = self.swapchain.as_mut() {
            swapchain.release_views();
        }
        self.images_in_flight.clear();
    }
}

impl RenderBackend for VulkanBackend {
    fn create_persistent(&mut self, frames_in_flight: usize) -> Result<()> {
        let format = swapchain::query_surface_format(&self.device)?;
        self.surface_format = Some(format);

        let descriptors = DescriptorObjects::new(self.device.clone())?;
        let layout = descriptors.layout;
        self.descriptors = Some(descriptors);

        self.pipeline = Some(GraphicsPipeline::new(
            self.device.clone(),
            format.format,
            layout,
        )?);

        self.vertex_buffer = Some(HostBuffer::with_data(
            self.device.clone(),
            "square vertices",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &SQUARE_VERTICES,
        )?);
        self.index_buffer = Some(HostBuffer::with_data(
            self.device.clone(),
            "square indices",
            vk::BufferUsageFlags::INDEX_BUFFER,
            &SQUARE_INDICES,
        )?);

        self.command_pool = commands::create_command_pool(&self.device)?;

        for _ in 0..frames_in_flight {
            self.frame_sync.push(FrameSync::new(&self.device)?);
        }

        log::info!("Persistent resources created");
        Ok(())
    }

    fn build_targets(&mut self, width: u32, height: u32) -> Result<Option<SurfaceTargets>> {
        let format = self.surface_format.context("Surface format not chosen")?;
        let support = SurfaceSupport::query(&self.device)?;
        let desc = SwapchainDesc::negotiate(
            &support,
            format,
            self.settings.present_mode,
            self.settings.swapchain_images,
            width,
            height,
        );

        if desc.is_zero_sized() {
            log::debug!("Surface extent is zero, not building a swapchain");
            return Ok(None);
        }

        // The old swapchain is retired once the new one exists
        let old = self.swapchain.take();
        let created = Swapchain::new(self.device.clone(), &desc, old.as_ref());
        drop(old);
        let swapchain = self.swapchain.insert(created?);

        let extent = swapchain.extent;
        let image_count = swapchain.images.len();
        let image_views = swapchain.image_views.clone();

        let descriptors = self.descriptors.as_ref().context("Descriptor objects not created")?;
        self.uniforms.ensure(&self.device, descriptors, image_count)?;

        let render_pass = self
            .pipeline
            .as_ref()
            .context("Pipeline not created")?
            .render_pass;
        self.framebuffers =
            pipeline::create_framebuffers(&self.device, &image_views, render_pass, extent)?;

        self.command_buffers =
            commands::allocate_command_buffers(&self.device, self.command_pool, image_count)?;
        self.record_command_buffers(extent)?;

        self.images_in_flight = vec![vk::Fence::null(); image_count];

        Ok(Some(SurfaceTargets {
            extent,
            image_count,
            command_buffers: self.command_buffers.len(),
            framebuffer_extents: vec![extent; self.framebuffers.len()],
        }))
    }

    fn release_targets(&mut self) -> Result<()> {
        self.device.wait_idle()?;
        self.destroy_targets();
        Ok(())
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.sync_slot(slot)?.wait(&self.device.device)
    }

    fn acquire_image(&mut self, slot: usize) -> Result<Acquired> {
        let semaphore = self.sync_slot(slot)?.image_available;

        match self
            .live_swapchain()?
            .acquire_next_image(FENCE_TIMEOUT_NS, semaphore)?
        {
            Some((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            None => Ok(Acquired::OutOfDate),
        }
    }

    fn submit(&mut self, slot: usize, image_index: u32, mvp: &Mat4) -> Result<()> {
        let image = image_index as usize;
        let device = &self.device.device;
        let sync = self
            .frame_sync
            .get(slot)
            .with_context(|| format!("Frame slot {} does not exist", slot))?;
        let cmd = *self
            .command_buffers
            .get(image)
            .with_context(|| format!("No command buffer for swapchain image {}", image))?;

        // Another slot may still be drawing into this image (and reading its uniform)
        let previous = self.images_in_flight[image];
        if previous != vk::Fence::null() && previous != sync.in_flight_fence {
            sync::wait_fence(device, previous)?;
        }
        self.images_in_flight[image] = sync.in_flight_fence;

        self.uniforms
            .get_mut(image)
            .with_context(|| format!("No uniform buffer for swapchain image {}", image))?
            .write(mvp)?;

        sync.reset(device)?;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            device.queue_submit(self.device.graphics_queue, &[submit_info], sync.in_flight_fence)
        }
        .context("vkQueueSubmit failed")
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<Presented> {
        let render_finished = self.sync_slot(slot)?.render_finished;
        let stale = self.live_swapchain()?.present(
            self.device.graphics_queue,
            image_index,
            &[render_finished],
        )?;

        Ok(if stale {
            Presented::Stale
        } else {
            Presented::Optimal
        })
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        log::info!("Releasing Vulkan resources...");

        // Nothing may be destroyed while the GPU still uses it
        let idle = self.device.wait_idle();
        for frame in &self.frame_sync {
            if let Err(e) = frame.wait(&self.device.device) {
                log::error!("{:#}", e);
            }
        }

        self.destroy_targets();

        // Reverse dependency order; the surface and device go with the last Arc
        for frame in self.frame_sync.drain(..) {
            frame.destroy(&self.device.device);
        }

        self.uniforms.clear();
        self.index_buffer = None;
        self.vertex_buffer = None;
        self.pipeline = None;
        self.descriptors = None;

        unsafe {
            self.device
                .device
                .destroy_command_pool(self.command_pool, None)
        };
        self.command_pool = vk::CommandPool::null();

        self.swapchain = None;

        log::info!("Vulkan resources released");
        idle
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Backend shutdown failed: {:?}", e);
        }
    }
}
